//! Output types of `AnalyzerFacade`: the per-bar delta, the read-only
//! snapshot for dashboard consumers, and the confluence query result.
//! Plain data, not an `Observable`/callback-registry (see design notes):
//! delivery is either the direct `on_bar` return value or the
//! best-effort broadcast in `distributor.rs`.

use crate::fibonacci::FibonacciSet;
use crate::fractal::Fractal;
use crate::swing::Swing;
use crate::zone::SupplyDemandZone;
use crate::zone_state::{ZoneStateUpdate, ZoneTestEvent};

/// Everything that changed in response to a single `on_bar` call. Every
/// event carried by one delta is stamped with the triggering bar's
/// timestamp and must be treated by consumers as a single atomic batch
/// (spec §5 ordering guarantee).
#[derive(Debug, Clone, Default)]
pub struct AnalysisDelta {
    pub new_fractal: Option<Fractal>,
    pub new_swing: Option<Swing>,
    pub dominance_changed: bool,
    pub invalidated_swing_id: Option<u64>,
    pub fibonacci: Option<FibonacciSet>,
    pub new_zones: Vec<SupplyDemandZone>,
    pub state_updates: Vec<ZoneStateUpdate>,
    pub test_events: Vec<ZoneTestEvent>,
}

impl AnalysisDelta {
    /// True when nothing observable happened this call — the case a
    /// re-delivered, already-processed bar must produce (spec §8
    /// idempotence property).
    pub fn is_empty(&self) -> bool {
        self.new_fractal.is_none()
            && self.new_swing.is_none()
            && !self.dominance_changed
            && self.invalidated_swing_id.is_none()
            && self.fibonacci.is_none()
            && self.new_zones.is_empty()
            && self.state_updates.is_empty()
            && self.test_events.is_empty()
    }
}

/// Read-only view for dashboard-style consumers (spec §4.9 `snapshot`).
#[derive(Debug, Clone, Default)]
pub struct StructureSnapshot {
    pub fractals: Vec<Fractal>,
    pub swings: Vec<Swing>,
    pub dominant_swing: Option<Swing>,
    pub fibonacci: Option<FibonacciSet>,
    pub active_zones: Vec<SupplyDemandZone>,
}
