//! Deterministic offline replay driver: feeds a CSV of OHLCV bars for one
//! (symbol, timeframe) through an `AnalyzerFacade` and audits the
//! resulting structure against the invariants every consumer can rely on
//! (zone ordering, status-transition legality, score bounds).

use std::path::PathBuf;
use std::sync::Arc;

use struxis::{
    AnalyzerFacade, AnalyzerProfile, BarSource, CsvBarSource, IdGenerator, InMemoryRepository,
    Timeframe, ZoneStatus,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    struxis::init_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "usage: cargo run -q -p replay -- <csv_path> <symbol> <timeframe:1m|5m|15m|1h|4h|1d>"
        );
        std::process::exit(2);
    }

    let csv_path = PathBuf::from(&args[1]);
    let symbol = args[2].clone();
    let timeframe = parse_timeframe(&args[3])?;

    let repository = Arc::new(InMemoryRepository::new());
    let facade = AnalyzerFacade::new(AnalyzerProfile::default(), repository, IdGenerator::new(1))?;

    let mut source = CsvBarSource::new(&csv_path, &symbol, timeframe);
    let delivered = source.run(&facade).await?;

    let snapshot = facade.snapshot(&symbol, timeframe);
    let mut violations = Vec::<String>::new();

    for zone in &snapshot.active_zones {
        if zone.top <= zone.bottom {
            violations.push(format!("zone {} has top <= bottom", zone.id));
        }
        if !(0.0..=1.0).contains(&zone.strength) {
            violations.push(format!("zone {} strength out of [0,1]: {}", zone.id, zone.strength));
        }
        if zone.success_count > zone.test_count {
            violations.push(format!(
                "zone {} success_count {} exceeds test_count {}",
                zone.id, zone.success_count, zone.test_count
            ));
        }
        if !matches!(zone.status, ZoneStatus::Active | ZoneStatus::Tested) {
            violations.push(format!(
                "zone {} in active_zones but status is {:?}",
                zone.id, zone.status
            ));
        }
    }

    for pair in snapshot.swings.windows(2) {
        if pair[0].direction == pair[1].direction && pair[0].end.price == pair[1].end.price {
            violations.push(format!(
                "adjacent swings {}/{} share identical direction and end price",
                pair[0].id, pair[1].id
            ));
        }
    }

    println!(
        "REPLAY summary: bars_delivered={} fractals={} swings={} active_zones={}",
        delivered,
        snapshot.fractals.len(),
        snapshot.swings.len(),
        snapshot.active_zones.len(),
    );

    if violations.is_empty() {
        println!("REPLAY result: PASS (no invariant violations found)");
    } else {
        println!("REPLAY result: FAIL violations={}", violations.len());
        for item in violations.iter().take(30) {
            println!("- {item}");
        }
        if violations.len() > 30 {
            println!("- ... {} more", violations.len() - 30);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn parse_timeframe(raw: &str) -> Result<Timeframe, Box<dyn std::error::Error>> {
    let tf = match raw.to_ascii_lowercase().as_str() {
        "1m" => Timeframe::M1,
        "5m" => Timeframe::M5,
        "15m" => Timeframe::M15,
        "1h" | "60m" => Timeframe::H1,
        "4h" => Timeframe::H4,
        "1d" => Timeframe::D1,
        _ => return Err(format!("unsupported timeframe: {raw}").into()),
    };
    Ok(tf)
}
