use chrono::{DateTime, Utc};

use crate::bar::Bar;
use crate::base_range::BaseRange;
use crate::big_move::BigMove;
use crate::constant::{Direction, Timeframe, ZoneKind, ZoneStatus};
use crate::id_generator::IdGenerator;

#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub overlap_tolerance: f64,
    pub max_zones_per_timeframe: usize,
    pub zone_expiry_hours: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            overlap_tolerance: 0.1,
            max_zones_per_timeframe: 100,
            zone_expiry_hours: 168.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupplyDemandZone {
    pub id: u64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub kind: ZoneKind,
    pub top: f64,
    pub bottom: f64,
    pub left_t: DateTime<Utc>,
    pub right_t: DateTime<Utc>,
    pub strength: f64,
    pub test_count: u32,
    pub success_count: u32,
    pub status: ZoneStatus,
    pub base_range: BaseRange,
    pub big_move: BigMove,
    pub atr_at_creation: f64,
    pub volume_at_creation: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupplyDemandZone {
    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn center(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    pub fn overlaps(&self, other: &SupplyDemandZone, tolerance: f64) -> bool {
        let lo = self.bottom.max(other.bottom);
        let hi = self.top.min(other.top);
        if hi <= lo {
            return false;
        }
        let overlap = hi - lo;
        let shorter = self.height().min(other.height()).max(f64::EPSILON);
        overlap / shorter >= tolerance
    }
}

/// Pairs each `BigMove` with its nearest preceding `BaseRange` and places a
/// supply/demand zone per the eWavesHarmonics boundary rules, then resolves
/// overlaps among the candidate set.
pub struct ZoneDetector {
    config: ZoneConfig,
}

impl ZoneDetector {
    pub fn new(config: ZoneConfig) -> Self {
        Self { config }
    }

    /// `moves` must already be paired 1:1 with the `BaseRange` that
    /// produced them (the scan origin in `BigMoveDetector::detect`); this
    /// re-derives the *nearest preceding* base range per spec, which can
    /// differ from the scan-origin base range when multiple base ranges
    /// exist before a move.
    pub fn detect(
        &self,
        bars: &[Bar],
        base_ranges: &[BaseRange],
        moves: &[BigMove],
        symbol: &str,
        timeframe: Timeframe,
        id_gen: &IdGenerator,
    ) -> Vec<SupplyDemandZone> {
        let mut candidates = Vec::new();

        for big_move in moves {
            let Some(base) = nearest_preceding_base_range(base_ranges, big_move) else {
                continue;
            };
            let zone = self.place_zone(bars, base, big_move, symbol, timeframe, id_gen);
            candidates.push(zone);
        }

        self.resolve_overlaps(candidates)
    }

    fn place_zone(
        &self,
        bars: &[Bar],
        base: &BaseRange,
        big_move: &BigMove,
        symbol: &str,
        timeframe: Timeframe,
        id_gen: &IdGenerator,
    ) -> SupplyDemandZone {
        let base_bars = &bars[base.start_index..=base.end_index];

        let (kind, mut top, mut bottom) = match big_move.direction {
            Direction::Up => {
                // demand zone: top = max(high) of base candles; bottom =
                // min(open) among bearish candles in base; fallback to
                // min(low) if the base has no bearish candle.
                let top = base.high;
                let bottom = base_bars
                    .iter()
                    .filter(|b| b.is_bearish())
                    .map(|b| b.open)
                    .fold(f64::INFINITY, f64::min);
                let bottom = if bottom.is_finite() { bottom } else { base.low };
                (ZoneKind::Demand, top, bottom)
            }
            Direction::Down => {
                // supply zone: bottom = min(low) of base candles; top =
                // max(open) among bullish candles in base; fallback to
                // max(high) if none.
                let bottom = base.low;
                let top = base_bars
                    .iter()
                    .filter(|b| b.is_bullish())
                    .map(|b| b.open)
                    .fold(f64::NEG_INFINITY, f64::max);
                let top = if top.is_finite() { top } else { base.high };
                (ZoneKind::Supply, top, bottom)
            }
        };

        if top <= bottom {
            let mid = (top + bottom) / 2.0;
            let buffer = mid.abs() * 0.0001 / 2.0;
            top = mid + buffer;
            bottom = mid - buffer;
        }

        let strength = self.score_strength(bars, base, big_move);

        let now = Utc::now();
        SupplyDemandZone {
            id: id_gen.get_id(),
            symbol: symbol.to_string(),
            timeframe,
            kind,
            top,
            bottom,
            left_t: bars[base.start_index].t,
            right_t: bars[big_move.end_index].t,
            strength,
            test_count: 0,
            success_count: 0,
            status: ZoneStatus::Active,
            base_range: base.clone(),
            big_move: big_move.clone(),
            atr_at_creation: base.atr_at_creation,
            volume_at_creation: bars[big_move.end_index].volume,
            created_at: now,
            updated_at: now,
        }
    }

    fn score_strength(&self, bars: &[Bar], base: &BaseRange, big_move: &BigMove) -> f64 {
        let volume_component = {
            let lookback_start = base.start_index.saturating_sub(20);
            let baseline: f64 = if lookback_start < base.start_index {
                bars[lookback_start..base.start_index].iter().map(|b| b.volume).sum::<f64>()
                    / (base.start_index - lookback_start) as f64
            } else {
                1.0
            };
            let move_volume: f64 = bars[big_move.start_index..=big_move.end_index]
                .iter()
                .map(|b| b.volume)
                .sum::<f64>()
                / (big_move.end_index - big_move.start_index + 1) as f64;
            if baseline > 0.0 {
                (move_volume / baseline / 2.0).clamp(0.0, 1.0)
            } else {
                0.5
            }
        };

        let magnitude_component = (big_move.magnitude_in_atr / 5.0).clamp(0.0, 1.0);
        let base_quality = base.consolidation_score.clamp(0.0, 1.0);
        let momentum = big_move.momentum_score.clamp(0.0, 1.0);

        (0.4 * volume_component + 0.3 * magnitude_component + 0.2 * base_quality + 0.1 * momentum)
            .clamp(0.0, 1.0)
    }

    fn resolve_overlaps(&self, mut candidates: Vec<SupplyDemandZone>) -> Vec<SupplyDemandZone> {
        candidates.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap());
        let mut kept: Vec<SupplyDemandZone> = Vec::new();

        for candidate in candidates {
            let overlaps_kept = kept
                .iter()
                .any(|k| candidate.overlaps(k, self.config.overlap_tolerance));
            if !overlaps_kept {
                kept.push(candidate);
            }
            if kept.len() >= self.config.max_zones_per_timeframe {
                break;
            }
        }

        kept
    }
}

/// Among all base ranges ending strictly before the move starts, picks the
/// one with the maximum `end_index` (the spec's "nearest preceding").
fn nearest_preceding_base_range<'a>(
    base_ranges: &'a [BaseRange],
    big_move: &BigMove,
) -> Option<&'a BaseRange> {
    base_ranges
        .iter()
        .filter(|b| b.end_index < big_move.start_index)
        .max_by_key(|b| b.end_index)
}
