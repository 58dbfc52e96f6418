use chrono::{DateTime, Utc};

use crate::constant::Timeframe;
use crate::error::StructureError;

/// A single OHLCV bar for one (symbol, timeframe).
///
/// Invariant: `low <= min(open, close) <= max(open, close) <= high`, enforced
/// by `validate`, never by construction alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub t: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Checks the OHLC relation and basic finiteness/sign invariants from
    /// the data model. Does not check sequencing against prior bars; that
    /// is the caller's job (see `InvalidSequence`).
    pub fn validate(&self) -> Result<(), StructureError> {
        if !self.open.is_finite()
            || !self.high.is_finite()
            || !self.low.is_finite()
            || !self.close.is_finite()
            || !self.volume.is_finite()
        {
            return Err(StructureError::InvalidBar(format!(
                "non-finite OHLCV for {} at {}",
                self.symbol, self.t
            )));
        }
        if self.volume < 0.0 {
            return Err(StructureError::InvalidBar(format!(
                "negative volume for {} at {}",
                self.symbol, self.t
            )));
        }
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        if !(self.low <= lo && lo <= hi && hi <= self.high) {
            return Err(StructureError::InvalidBar(format!(
                "OHLC relation violated for {} at {}: o={} h={} l={} c={}",
                self.symbol, self.t, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            t: Utc::now(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        }
    }

    #[test]
    fn rejects_high_below_close() {
        let b = bar(1.0, 1.05, 0.9, 1.10);
        assert!(b.validate().is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        let mut b = bar(1.0, 1.1, 0.9, 1.05);
        b.volume = -1.0;
        assert!(b.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_bar() {
        let b = bar(1.08, 1.081, 1.0795, 1.0805);
        assert!(b.validate().is_ok());
    }
}
