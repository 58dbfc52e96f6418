use crate::bar::Bar;
use crate::base_range::BaseRange;
use crate::constant::Direction;
use crate::fractal::Fractal;
use crate::indicator::ATR_ZERO_FLOOR;

#[derive(Debug, Clone)]
pub struct MoveConfig {
    pub max_scan_distance: usize,
    pub move_threshold: f64,
    pub min_move_candles: usize,
    pub momentum_threshold: f64,
    pub volume_multiplier: f64,
    pub require_breakout: bool,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            max_scan_distance: 30,
            move_threshold: 2.0,
            min_move_candles: 3,
            momentum_threshold: 0.6,
            volume_multiplier: 1.5,
            require_breakout: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BigMove {
    pub start_index: usize,
    pub end_index: usize,
    pub direction: Direction,
    pub magnitude_in_atr: f64,
    pub momentum_score: f64,
    pub breakout_level: Option<f64>,
    pub volume_confirmed: bool,
}

/// Scans forward from a `BaseRange`'s end for the best-magnitude impulse
/// move meeting the momentum/magnitude thresholds.
pub struct BigMoveDetector {
    config: MoveConfig,
}

impl BigMoveDetector {
    pub fn new(config: MoveConfig) -> Self {
        Self { config }
    }

    /// `bars`/`volume_lookback` are indexed from the global bar stream;
    /// `base.end_index` and all scan positions are indices into `bars`.
    pub fn detect(
        &self,
        bars: &[Bar],
        base: &BaseRange,
        fractal_levels: &[Fractal],
    ) -> Option<BigMove> {
        let start = base.end_index + 1;
        if start >= bars.len() {
            return None;
        }
        let scan_end = (start + self.config.max_scan_distance).min(bars.len() - 1);

        let mut best: Option<BigMove> = None;

        for end in (start + self.config.min_move_candles - 1)..=scan_end {
            if end >= bars.len() {
                break;
            }
            let slice = &bars[start..=end];
            let magnitude_in_atr =
                (bars[end].close - bars[start].close).abs() / base.atr_at_creation.max(ATR_ZERO_FLOOR);
            if magnitude_in_atr < self.config.move_threshold {
                continue;
            }

            let direction = if bars[end].close >= bars[start].close {
                Direction::Up
            } else {
                Direction::Down
            };

            let momentum_score = momentum(slice, direction);
            if momentum_score < self.config.momentum_threshold {
                continue;
            }

            let volume_confirmed = volume_confirmation(bars, start, end, self.config.volume_multiplier);

            let breakout_level = fractal_levels
                .iter()
                .filter(|f| match direction {
                    Direction::Up => f.price <= bars[end].high,
                    Direction::Down => f.price >= bars[end].low,
                })
                .map(|f| f.price)
                .next();

            if self.config.require_breakout && breakout_level.is_none() {
                continue;
            }

            let candidate = BigMove {
                start_index: start,
                end_index: end,
                direction,
                magnitude_in_atr,
                momentum_score,
                breakout_level,
                volume_confirmed,
            };

            if best
                .as_ref()
                .map(|b| candidate.magnitude_in_atr > b.magnitude_in_atr)
                .unwrap_or(true)
            {
                best = Some(candidate);
            }
        }

        best
    }
}

fn momentum(slice: &[Bar], direction: Direction) -> f64 {
    let directional_consistency = {
        let aligned = slice
            .iter()
            .filter(|b| match direction {
                Direction::Up => b.is_bullish(),
                Direction::Down => b.is_bearish(),
            })
            .count();
        aligned as f64 / slice.len() as f64
    };

    let avg_body_strength = {
        let ratios: Vec<f64> = slice
            .iter()
            .map(|b| {
                let range = b.range().max(ATR_ZERO_FLOOR);
                (b.body() / range).min(1.0)
            })
            .collect();
        ratios.iter().sum::<f64>() / ratios.len() as f64
    };

    // normalizes the back-half magnitude against the front-half magnitude;
    // can exceed 1.0 before the final clamp, which is authoritative.
    let momentum_persistence = {
        let mid = slice.len() / 2;
        let front: f64 = slice[..mid.max(1)]
            .windows(2)
            .map(|w| (w[1].close - w[0].close).abs())
            .sum();
        let back: f64 = slice[mid..]
            .windows(2)
            .map(|w| (w[1].close - w[0].close).abs())
            .sum();
        if front <= f64::EPSILON {
            if back > 0.0 { 1.0 } else { 0.0 }
        } else {
            back / front
        }
    };

    (0.4 * directional_consistency + 0.3 * avg_body_strength + 0.3 * momentum_persistence).clamp(0.0, 1.0)
}

fn volume_confirmation(bars: &[Bar], start: usize, end: usize, multiplier: f64) -> bool {
    let lookback_start = start.saturating_sub(20);
    if lookback_start == start {
        return false;
    }
    let baseline: f64 = bars[lookback_start..start].iter().map(|b| b.volume).sum::<f64>()
        / (start - lookback_start) as f64;
    if baseline <= 0.0 {
        return false;
    }
    let move_volume: f64 =
        bars[start..=end].iter().map(|b| b.volume).sum::<f64>() / (end - start + 1) as f64;
    move_volume >= multiplier * baseline
}
