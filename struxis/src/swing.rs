use chrono::{DateTime, Utc};

use crate::constant::{Direction, FractalKind};
use crate::fractal::Fractal;

#[derive(Debug, Clone)]
pub struct SwingConfig {
    pub lookback_bars: u64,
    pub min_swing_points: f64,
    pub invalidation_buffer_atr: f64,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 140,
            min_swing_points: 0.0,
            invalidation_buffer_atr: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Swing {
    pub id: u64,
    pub start: Fractal,
    pub end: Fractal,
    pub direction: Direction,
    pub magnitude_points: f64,
    pub bar_span: u64,
    pub is_dominant: bool,
    pub invalidated: bool,
    pub created_at: DateTime<Utc>,
}

impl Swing {
    fn new(id: u64, start: Fractal, end: Fractal) -> Self {
        let direction = if end.price > start.price {
            Direction::Up
        } else {
            Direction::Down
        };
        let magnitude_points = (end.price - start.price).abs();
        let bar_span = end.index.saturating_sub(start.index);
        Self {
            id,
            start,
            end,
            direction,
            magnitude_points,
            bar_span,
            is_dominant: false,
            invalidated: false,
            created_at: Utc::now(),
        }
    }
}

/// Result of feeding one fractal or one bar close into the builder.
#[derive(Debug, Clone, Default)]
pub struct SwingDelta {
    pub new_swing: Option<Swing>,
    pub dominance_changed: bool,
    pub invalidated: Option<u64>,
}

/// Links confirmed fractals into directed swings and tracks the single
/// dominant swing within the active lookback window. Dominance is computed
/// exclusively here; no other component may recompute it (see design notes).
pub struct SwingBuilder {
    config: SwingConfig,
    fractals: Vec<Fractal>,
    swings: Vec<Swing>,
    dominant_id: Option<u64>,
    next_id: u64,
}

impl SwingBuilder {
    pub fn new(config: SwingConfig) -> Self {
        Self {
            config,
            fractals: Vec::new(),
            swings: Vec::new(),
            dominant_id: None,
            next_id: 0,
        }
    }

    pub fn swings(&self) -> &[Swing] {
        &self.swings
    }

    pub fn dominant_swing(&self) -> Option<&Swing> {
        self.dominant_id
            .and_then(|id| self.swings.iter().find(|s| s.id == id))
    }

    /// Feeds a newly confirmed fractal. `current_bar_index` is the index of
    /// the most recent bar processed by the owning pipeline (fractals lag
    /// behind it by the pivot window).
    pub fn on_fractal(&mut self, fractal: Fractal, current_bar_index: u64) -> SwingDelta {
        let mut new_swing = None;

        if let Some(last) = self.fractals.last().cloned() {
            if last.kind == fractal.kind {
                self.supersede_chain_end(&last, &fractal);
            } else {
                let id = self.next_id;
                self.next_id += 1;
                let swing = Swing::new(id, last, fractal.clone());
                self.swings.push(swing.clone());
                new_swing = Some(swing);
            }
        }

        self.fractals.push(fractal);
        self.prune_fractals(current_bar_index);

        let dominance_changed = self.recompute_dominance(current_bar_index);
        SwingDelta {
            new_swing,
            dominance_changed,
            invalidated: None,
        }
    }

    /// Checks the dominant swing's invalidation condition against a bar
    /// close; re-runs dominance if it was invalidated. Call once per bar.
    pub fn on_bar_close(
        &mut self,
        close_price: f64,
        atr: Option<f64>,
        current_bar_index: u64,
    ) -> SwingDelta {
        let Some(atr) = atr else {
            return SwingDelta::default();
        };
        let Some(dominant_id) = self.dominant_id else {
            return SwingDelta::default();
        };
        let Some(dominant) = self.swings.iter().find(|s| s.id == dominant_id).cloned() else {
            return SwingDelta::default();
        };

        let buffer = self.config.invalidation_buffer_atr * atr;
        let invalidated = match dominant.direction {
            Direction::Up => close_price < dominant.start.price - buffer,
            Direction::Down => close_price > dominant.start.price + buffer,
        };

        if !invalidated {
            return SwingDelta::default();
        }

        if let Some(s) = self.swings.iter_mut().find(|s| s.id == dominant_id) {
            s.invalidated = true;
            s.is_dominant = false;
        }
        self.dominant_id = None;

        let dominance_changed = self.recompute_dominance(current_bar_index);
        SwingDelta {
            new_swing: None,
            dominance_changed,
            invalidated: Some(dominant_id),
        }
    }

    /// A same-kind fractal supersedes the pending chain end: if it is more
    /// extreme, it retroactively widens the most recent swing that ended at
    /// the old chain-end fractal (or simply becomes the new chain head if no
    /// swing has been built yet).
    fn supersede_chain_end(&mut self, previous: &Fractal, candidate: &Fractal) {
        let more_extreme = match candidate.kind {
            FractalKind::High => candidate.price > previous.price,
            FractalKind::Low => candidate.price < previous.price,
        };
        if !more_extreme {
            return;
        }
        if let Some(last_swing) = self.swings.last_mut() {
            if last_swing.end.index == previous.index {
                last_swing.end = candidate.clone();
                last_swing.magnitude_points = (last_swing.end.price - last_swing.start.price).abs();
                last_swing.bar_span = last_swing
                    .end
                    .index
                    .saturating_sub(last_swing.start.index);
                last_swing.direction = if last_swing.end.price > last_swing.start.price {
                    Direction::Up
                } else {
                    Direction::Down
                };
            }
        }
    }

    fn prune_fractals(&mut self, current_bar_index: u64) {
        let cutoff = current_bar_index.saturating_sub(self.config.lookback_bars);
        self.fractals.retain(|f| f.index >= cutoff);
    }

    /// Implements the dominance algorithm of spec §4.2 steps 1-4.
    fn recompute_dominance(&mut self, current_bar_index: u64) -> bool {
        let cutoff = current_bar_index.saturating_sub(self.config.lookback_bars);
        let window: Vec<&Fractal> = self.fractals.iter().filter(|f| f.index >= cutoff).collect();

        let highest = window
            .iter()
            .filter(|f| f.kind == FractalKind::High)
            .max_by(|a, b| a.price.partial_cmp(&b.price).unwrap());
        let lowest = window
            .iter()
            .filter(|f| f.kind == FractalKind::Low)
            .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap());

        let (Some(high), Some(low)) = (highest, lowest) else {
            let had_dominant = self.dominant_id.take().is_some();
            if had_dominant {
                self.clear_dominant_flags();
            }
            return had_dominant;
        };

        let (start, end) = if high.index <= low.index {
            ((*high).clone(), (*low).clone())
        } else {
            ((*low).clone(), (*high).clone())
        };
        let candidate_magnitude = (end.price - start.price).abs();

        if candidate_magnitude < self.config.min_swing_points {
            return self.fall_out_of_window_if_needed(cutoff);
        }

        let current = self.dominant_id.and_then(|id| self.swings.iter().find(|s| s.id == id));
        let current_fell_out = current
            .map(|s| s.start.index < cutoff || s.end.index < cutoff)
            .unwrap_or(false);
        let current_magnitude = current.map(|s| s.magnitude_points).unwrap_or(f64::MIN);

        let should_replace =
            current.is_none() || current_fell_out || candidate_magnitude > current_magnitude;

        if !should_replace {
            return false;
        }

        let matching = self
            .swings
            .iter()
            .position(|s| s.start.index == start.index && s.end.index == end.index);

        let new_id = match matching {
            Some(idx) => self.swings[idx].id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                let swing = Swing::new(id, start, end);
                self.swings.push(swing);
                id
            }
        };

        self.clear_dominant_flags();
        if let Some(s) = self.swings.iter_mut().find(|s| s.id == new_id) {
            s.is_dominant = true;
        }
        self.dominant_id = Some(new_id);
        true
    }

    fn fall_out_of_window_if_needed(&mut self, cutoff: u64) -> bool {
        let current = self.dominant_id.and_then(|id| self.swings.iter().find(|s| s.id == id));
        let fell_out = current
            .map(|s| s.start.index < cutoff || s.end.index < cutoff)
            .unwrap_or(false);
        if fell_out {
            self.clear_dominant_flags();
            self.dominant_id = None;
            return true;
        }
        false
    }

    fn clear_dominant_flags(&mut self) {
        for s in &mut self.swings {
            s.is_dominant = false;
        }
    }
}
