//! The `BarSource` contract of spec §6 and a CSV-backed reference
//! implementation for deterministic offline replay.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::bar::Bar;
use crate::constant::Timeframe;
use crate::engine::AnalyzerFacade;
use crate::error::StructureError;

/// Something that drives bars into an `AnalyzerFacade` in order, one
/// (symbol, timeframe) stream at a time. `CsvBarSource` is the only
/// shipped implementation; a live feed adapter is the wrapper's concern.
#[async_trait::async_trait]
pub trait BarSource {
    async fn run(&mut self, facade: &AnalyzerFacade) -> Result<usize, StructureError>;
}

#[derive(Debug, Deserialize)]
struct CsvBarRow {
    #[serde(alias = "date")]
    datetime: String,
    #[serde(alias = "open")]
    open: f64,
    #[serde(alias = "high")]
    high: f64,
    #[serde(alias = "low")]
    low: f64,
    #[serde(alias = "close")]
    close: f64,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    #[allow(dead_code)]
    open_interest: f64,
    #[serde(default, alias = "money")]
    #[allow(dead_code)]
    turnover: f64,
}

/// Reads a CSV file of OHLCV rows for one (symbol, timeframe) and feeds
/// each row to `facade.on_bar(...)` in file order, per spec §1's "driven
/// by either live or historical bars, deterministically".
pub struct CsvBarSource {
    path: std::path::PathBuf,
    symbol: String,
    timeframe: Timeframe,
}

impl CsvBarSource {
    pub fn new(path: impl AsRef<Path>, symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            symbol: symbol.into(),
            timeframe,
        }
    }

    fn load_bars(&self) -> Result<Vec<Bar>, StructureError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut bars = Vec::new();
        for row in reader.deserialize::<CsvBarRow>() {
            let row = row?;
            let t = parse_datetime(&row.datetime)?;
            bars.push(Bar {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                t,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        Ok(bars)
    }
}

#[async_trait::async_trait]
impl BarSource for CsvBarSource {
    async fn run(&mut self, facade: &AnalyzerFacade) -> Result<usize, StructureError> {
        let bars = self.load_bars()?;
        let mut delivered = 0;
        for bar in bars {
            facade.on_bar(&self.symbol, self.timeframe, bar).await?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StructureError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let patterns = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y%m%d%H%M%S%.f",
    ];

    for pattern in patterns {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, pattern) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
        }
    }

    Err(StructureError::InvalidBar(format!(
        "unparseable datetime: {value}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let t = parse_datetime("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn parses_naive_space_separated() {
        let t = parse_datetime("2024-01-02 03:04:05").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("not-a-date").is_err());
    }
}
