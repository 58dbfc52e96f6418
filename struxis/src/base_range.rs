use crate::bar::Bar;
use crate::indicator::ATR_ZERO_FLOOR;

#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub consolidation_threshold: f64,
    pub body_size_threshold: f64,
    pub min_base: usize,
    pub max_base: usize,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            consolidation_threshold: 0.5,
            body_size_threshold: 0.3,
            min_base: 2,
            max_base: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseRange {
    pub start_index: usize,
    pub end_index: usize,
    pub high: f64,
    pub low: f64,
    pub atr_at_creation: f64,
    pub candle_count: usize,
    pub consolidation_score: f64,
}

/// Finds consolidation ranges (runs of tight-range, small-body candles)
/// over a closed window of bars with their per-bar ATR values.
pub struct BaseCandleDetector {
    config: BaseConfig,
}

impl BaseCandleDetector {
    pub fn new(config: BaseConfig) -> Self {
        Self { config }
    }

    fn is_consolidation_candle(&self, bar: &Bar, atr: f64) -> bool {
        let atr = atr.max(ATR_ZERO_FLOOR);
        bar.range() / atr <= self.config.consolidation_threshold
            && bar.body() / atr <= self.config.body_size_threshold
    }

    /// `bars`/`atrs` must be the same length, indexed by bar position
    /// within the scan window (not global bar index).
    pub fn detect(&self, bars: &[Bar], atrs: &[Option<f64>]) -> Vec<BaseRange> {
        debug_assert_eq!(bars.len(), atrs.len());
        let mut ranges = Vec::new();
        let mut run_start: Option<usize> = None;

        let flush = |ranges: &mut Vec<BaseRange>, start: usize, end: usize| {
            let len = end - start + 1;
            if len < self.config.min_base {
                return;
            }
            let end = if len > self.config.max_base {
                start + self.config.max_base - 1
            } else {
                end
            };
            self.score_range(bars, atrs, start, end).map(|r| ranges.push(r));
        };

        for (i, bar) in bars.iter().enumerate() {
            let Some(atr) = atrs[i] else {
                if let Some(start) = run_start.take() {
                    flush(&mut ranges, start, i - 1);
                }
                continue;
            };
            if self.is_consolidation_candle(bar, atr) {
                run_start.get_or_insert(i);
            } else if let Some(start) = run_start.take() {
                flush(&mut ranges, start, i - 1);
            }
        }
        if let Some(start) = run_start {
            flush(&mut ranges, start, bars.len() - 1);
        }

        ranges
    }

    fn score_range(
        &self,
        bars: &[Bar],
        atrs: &[Option<f64>],
        start: usize,
        end: usize,
    ) -> Option<BaseRange> {
        let slice = &bars[start..=end];
        let atr_at_creation = atrs[end]?.max(ATR_ZERO_FLOOR);
        let high = slice.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = slice.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

        let tightness: Vec<f64> = slice
            .iter()
            .map(|b| 1.0 - (b.range() / atr_at_creation / self.config.consolidation_threshold).min(1.0))
            .collect();
        let range_tightness = tightness.iter().sum::<f64>() / tightness.len() as f64;

        let bodies: Vec<f64> = slice
            .iter()
            .map(|b| b.body() / atr_at_creation)
            .collect();
        let mean_body = bodies.iter().sum::<f64>() / bodies.len() as f64;
        let body_variance = bodies.iter().map(|b| (b - mean_body).powi(2)).sum::<f64>() / bodies.len() as f64;
        let body_consistency = (1.0 - body_variance.sqrt()).clamp(0.0, 1.0);

        let range_variance = {
            let rs: Vec<f64> = slice.iter().map(|b| b.range() / atr_at_creation).collect();
            let mean = rs.iter().sum::<f64>() / rs.len() as f64;
            rs.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rs.len() as f64
        };
        let temporal_consistency = (1.0 - range_variance.sqrt()).clamp(0.0, 1.0);

        let consolidation_score = (0.5 * range_tightness.clamp(0.0, 1.0)
            + 0.3 * body_consistency
            + 0.2 * temporal_consistency)
            .clamp(0.0, 1.0);

        if consolidation_score < 0.3 {
            return None;
        }

        Some(BaseRange {
            start_index: start,
            end_index: end,
            high,
            low,
            atr_at_creation,
            candle_count: end - start + 1,
            consolidation_score,
        })
    }
}
