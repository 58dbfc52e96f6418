use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::bar::Bar;
use crate::constant::FractalKind;
use crate::error::StructureError;
use crate::indicator::Atr;

/// An immutable confirmed pivot. Once returned by the detector, a fractal's
/// fields never change.
#[derive(Debug, Clone, PartialEq)]
pub struct Fractal {
    pub index: u64,
    pub t: DateTime<Utc>,
    pub price: f64,
    pub kind: FractalKind,
    pub strength: f64,
}

/// n-bar pivot detector with ATR-normalized strength scoring.
///
/// Streaming: keeps a ring of the last `2n+1` bars and the ATR value
/// contemporaneous with each; emits a fractal exactly when the center bar's
/// neighborhood is full, per spec's O(1)-amortized streaming contract.
pub struct FractalDetector {
    pivot_n: usize,
    atr: Atr,
    next_index: u64,
    window: VecDeque<(Bar, u64, Option<f64>)>,
    last_t: Option<DateTime<Utc>>,
}

impl FractalDetector {
    pub fn new(pivot_n: usize, atr_period: usize) -> Result<Self, StructureError> {
        if pivot_n < 3 || pivot_n % 2 == 0 {
            return Err(StructureError::ConfigurationError(format!(
                "pivot_n must be odd and >= 3, got {pivot_n}"
            )));
        }
        Ok(Self {
            pivot_n,
            atr: Atr::new(atr_period),
            next_index: 0,
            window: VecDeque::with_capacity(2 * pivot_n + 1),
            last_t: None,
        })
    }

    /// Feeds one bar in sequence order; returns a newly confirmed fractal,
    /// if the bar completed one's neighborhood.
    ///
    /// `InsufficientData` (fewer than `2n+1` bars seen) yields `Ok(None)`,
    /// not an error. Non-monotonic timestamps are rejected.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<Option<Fractal>, StructureError> {
        if let Some(last_t) = self.last_t {
            if bar.t <= last_t {
                return Err(StructureError::InvalidSequence(format!(
                    "bar at {} is not strictly after previous bar at {}",
                    bar.t, last_t
                )));
            }
        }
        self.last_t = Some(bar.t);

        let atr_value = self.atr.update(bar);
        let index = self.next_index;
        self.next_index += 1;

        let window_len = 2 * self.pivot_n + 1;
        self.window.push_back((bar.clone(), index, atr_value));
        if self.window.len() > window_len {
            self.window.pop_front();
        }
        if self.window.len() < window_len {
            return Ok(None);
        }

        let center = self.pivot_n;
        let (center_bar, center_index, center_atr) = &self.window[center];
        let Some(atr) = center_atr else {
            return Ok(None);
        };

        let mut is_high = true;
        let mut is_low = true;
        let mut second_high = f64::NEG_INFINITY;
        let mut second_low = f64::INFINITY;
        for (i, (other, _, _)) in self.window.iter().enumerate() {
            if i == center {
                continue;
            }
            if other.high >= center_bar.high {
                is_high = false;
            } else {
                second_high = second_high.max(other.high);
            }
            if other.low <= center_bar.low {
                is_low = false;
            } else {
                second_low = second_low.min(other.low);
            }
        }

        if is_high && is_low {
            // degenerate flat window; neither a clean high nor low pivot
            return Ok(None);
        }

        if is_high {
            let strength = ((center_bar.high - second_high) / atr).max(0.0);
            return Ok(Some(Fractal {
                index: *center_index,
                t: center_bar.t,
                price: center_bar.high,
                kind: FractalKind::High,
                strength,
            }));
        }

        if is_low {
            let strength = ((second_low - center_bar.low) / atr).max(0.0);
            return Ok(Some(Fractal {
                index: *center_index,
                t: center_bar.t,
                price: center_bar.low,
                kind: FractalKind::Low,
                strength,
            }));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Timeframe;
    use chrono::Duration;

    fn bar(t_offset: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            t: Utc::now() + Duration::minutes(t_offset),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 10.0,
        }
    }

    #[test]
    fn rejects_even_pivot_n() {
        assert!(FractalDetector::new(4, 14).is_err());
    }

    #[test]
    fn insufficient_data_yields_none_not_error() {
        let mut d = FractalDetector::new(3, 2).unwrap();
        for i in 0..5 {
            let r = d.on_bar(&bar(i, 1.0, 1.01, 0.99, 1.0)).unwrap();
            assert!(r.is_none());
        }
    }

    #[test]
    fn non_monotonic_timestamp_rejected() {
        let mut d = FractalDetector::new(3, 2).unwrap();
        let b0 = bar(10, 1.0, 1.01, 0.99, 1.0);
        d.on_bar(&b0).unwrap();
        let b1 = bar(5, 1.0, 1.01, 0.99, 1.0);
        assert!(matches!(
            d.on_bar(&b1),
            Err(StructureError::InvalidSequence(_))
        ));
    }

    #[test]
    fn detects_high_pivot() {
        let mut d = FractalDetector::new(3, 2).unwrap();
        let highs = [1.05, 1.10, 1.12, 1.20, 1.13, 1.11, 1.09];
        let mut last = None;
        for (i, h) in highs.iter().enumerate() {
            let b = bar(i as i64, *h - 0.01, *h, h - 0.02, h - 0.005);
            last = d.on_bar(&b).unwrap();
        }
        let fractal = last.expect("expected a confirmed fractal by the end of the stream");
        assert_eq!(fractal.kind, FractalKind::High);
        assert!((fractal.price - 1.20).abs() < 1e-9);
    }
}
