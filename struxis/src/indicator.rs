//! True range, Wilder ATR, and pip/price conversion — the volatility
//! baseline every other detector normalizes against.

use crate::bar::Bar;

/// Floor applied to ATR so normalizing by it never divides by (near) zero.
pub const ATR_ZERO_FLOOR: f64 = 1e-5;

pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(prev_close) => (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs()),
        None => bar.high - bar.low,
    }
}

/// Wilder-smoothed Average True Range, updated one bar at a time.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    value: Option<f64>,
    prev_close: Option<f64>,
    seed_trs: Vec<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "period must be > 0");
        Self {
            period,
            value: None,
            prev_close: None,
            seed_trs: Vec::with_capacity(period),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Current ATR value, floored at `ATR_ZERO_FLOOR`. `None` until the
    /// indicator has seen enough bars to seed (matches the `InsufficientData`
    /// non-error: callers simply get nothing to work with yet).
    pub fn value(&self) -> Option<f64> {
        self.value.map(|v| v.max(ATR_ZERO_FLOOR))
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = true_range(bar, self.prev_close);
        self.prev_close = Some(bar.close);

        match self.value {
            Some(prev) => {
                self.value = Some((prev * (self.period as f64 - 1.0) + tr) / self.period as f64);
            }
            None => {
                self.seed_trs.push(tr);
                if self.seed_trs.len() >= self.period {
                    let seed = self.seed_trs.iter().sum::<f64>() / self.seed_trs.len() as f64;
                    self.value = Some(seed);
                    self.seed_trs.clear();
                }
            }
        }
        self.value()
    }
}

/// Converts a price delta to pips for a symbol with the given pip size
/// (e.g. `0.0001` for most FX pairs, `0.01` for JPY crosses).
pub fn price_delta_to_pips(delta: f64, pip_size: f64) -> f64 {
    if pip_size <= 0.0 {
        return 0.0;
    }
    delta.abs() / pip_size
}

pub fn pips_to_price_delta(pips: f64, pip_size: f64) -> f64 {
    pips * pip_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Timeframe;
    use chrono::Utc;

    fn bar(h: f64, l: f64, c: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            t: Utc::now(),
            open: c,
            high: h,
            low: l,
            close: c,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_seeds_after_period_bars_then_smooths() {
        let mut atr = Atr::new(3);
        assert!(atr.update(&bar(1.0010, 1.0000, 1.0005)).is_none());
        assert!(atr.update(&bar(1.0012, 1.0002, 1.0007)).is_none());
        let seeded = atr.update(&bar(1.0015, 1.0004, 1.0010)).unwrap();
        assert!(seeded > 0.0);
        let next = atr.update(&bar(1.0020, 1.0008, 1.0015)).unwrap();
        assert!(next > 0.0);
    }

    #[test]
    fn atr_value_is_floored_not_zero() {
        let mut atr = Atr::new(2);
        atr.update(&bar(1.0, 1.0, 1.0));
        let v = atr.update(&bar(1.0, 1.0, 1.0)).unwrap();
        assert!(v >= ATR_ZERO_FLOOR);
    }
}
