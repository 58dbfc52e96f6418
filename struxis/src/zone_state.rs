use chrono::{DateTime, Duration, Utc};

use crate::bar::Bar;
use crate::constant::{TestKind, TransitionReason, ZoneKind, ZoneStatus};
use crate::error::StructureError;
use crate::zone::SupplyDemandZone;

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub test_penetration_threshold: f64,
    pub break_threshold: f64,
    pub flip_confirmation_bars: usize,
    pub reaction_window: usize,
    pub reaction_strength_threshold: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            test_penetration_threshold: 0.1,
            break_threshold: 0.3,
            flip_confirmation_bars: 3,
            reaction_window: 3,
            reaction_strength_threshold: 0.6,
        }
    }
}

impl StateConfig {
    pub fn validate(&self) -> Result<(), StructureError> {
        if !(self.test_penetration_threshold > 0.0 && self.test_penetration_threshold <= 1.0) {
            return Err(StructureError::ConfigurationError(
                "test_penetration_threshold must be in (0, 1]".into(),
            ));
        }
        if !(self.break_threshold > 0.0 && self.break_threshold <= 1.0) {
            return Err(StructureError::ConfigurationError(
                "break_threshold must be in (0, 1]".into(),
            ));
        }
        if self.test_penetration_threshold >= self.break_threshold {
            return Err(StructureError::ConfigurationError(
                "test_penetration_threshold must be strictly less than break_threshold".into(),
            ));
        }
        if self.flip_confirmation_bars < 1 {
            return Err(StructureError::ConfigurationError(
                "flip_confirmation_bars must be >= 1".into(),
            ));
        }
        if self.reaction_window < 1 {
            return Err(StructureError::ConfigurationError(
                "reaction_window must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ZoneStateUpdate {
    pub zone_id: u64,
    pub old_status: ZoneStatus,
    pub new_status: ZoneStatus,
    pub t: DateTime<Utc>,
    pub trigger_price: f64,
    pub reason: TransitionReason,
    pub test_success: bool,
}

#[derive(Debug, Clone)]
pub struct ZoneTestEvent {
    pub zone_id: u64,
    pub t: DateTime<Utc>,
    pub price: f64,
    pub kind: TestKind,
    pub success: bool,
    pub reaction_strength: f64,
}

/// A spawned zone of the opposite type, minted when a flip is confirmed.
#[derive(Debug, Clone)]
pub struct ZoneRebirth {
    pub source_zone_id: u64,
    pub new_kind: ZoneKind,
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneStateResult {
    pub updates: Vec<ZoneStateUpdate>,
    pub test_events: Vec<ZoneTestEvent>,
    pub rebirths: Vec<ZoneRebirth>,
}

struct FlipWatch {
    zone_id: u64,
    opposite_kind: ZoneKind,
    boundary: f64,
    consecutive: usize,
}

/// Per-bar lifecycle updates for the live zone set: tests, breaks, flips,
/// expiry. Ordering within one bar: test detection -> break classification
/// -> flip check -> expiry, at most one transition per zone, highest
/// severity wins (break > flip > test > expiry).
pub struct ZoneStateManager {
    config: StateConfig,
    zone_expiry_hours: f64,
    flip_watches: Vec<FlipWatch>,
}

impl ZoneStateManager {
    /// `zone_expiry_hours` comes from the zone-creation config group (see
    /// `ZoneConfig`), not from `StateConfig` itself, since spec groups
    /// expiry under "Zone:" options rather than "State:" options.
    pub fn new(config: StateConfig, zone_expiry_hours: f64) -> Result<Self, StructureError> {
        config.validate()?;
        Ok(Self {
            config,
            zone_expiry_hours,
            flip_watches: Vec::new(),
        })
    }

    /// Evaluates one bar against every live (non-terminal) zone. Terminal
    /// statuses (`broken`, `expired`) never transition again; `flipped`
    /// zones are terminal for the *original* id (a rebirth, if any, is a
    /// brand-new zone entity). Break/test is checked before expiry so a
    /// zone that both ages out and is broken on the same bar is marked
    /// `Broken`, matching the break > flip > test > expiry severity order;
    /// a zone only falls through to the expiry check when the bar didn't
    /// touch it at all.
    pub fn on_bar(&mut self, zones: &mut [SupplyDemandZone], bar: &Bar) -> ZoneStateResult {
        let mut result = ZoneStateResult::default();

        for zone in zones.iter_mut() {
            if matches!(zone.status, ZoneStatus::Broken | ZoneStatus::Expired | ZoneStatus::Flipped) {
                continue;
            }

            let (update, event) = self.check_break_or_test(zone, bar);
            let touched = update.is_some() || event.is_some();
            if let Some(event) = event {
                result.test_events.push(event);
            }
            if let Some(update) = update {
                result.updates.push(update);
            }

            if !touched {
                if let Some(update) = self.check_expiry(zone, bar.t) {
                    result.updates.push(update);
                }
            }
        }

        self.record_flip_progress(zones, bar, &mut result);
        result
    }

    fn check_expiry(&self, zone: &SupplyDemandZone, now: DateTime<Utc>) -> Option<ZoneStateUpdate> {
        let age = now.signed_duration_since(zone.created_at);
        if age >= Duration::milliseconds((self.zone_expiry_hours * 3_600_000.0) as i64) {
            return Some(ZoneStateUpdate {
                zone_id: zone.id,
                old_status: zone.status,
                new_status: ZoneStatus::Expired,
                t: now,
                trigger_price: zone.center(),
                reason: TransitionReason::AgeExpiry,
                test_success: false,
            });
        }
        None
    }

    fn check_break_or_test(
        &mut self,
        zone: &mut SupplyDemandZone,
        bar: &Bar,
    ) -> (Option<ZoneStateUpdate>, Option<ZoneTestEvent>) {
        let penetration = match zone.kind {
            ZoneKind::Supply | ZoneKind::Continuation => {
                if bar.high > zone.bottom {
                    Some((bar.high - zone.bottom) / zone.height())
                } else {
                    None
                }
            }
            ZoneKind::Demand => {
                if bar.low < zone.top {
                    Some((zone.top - bar.low) / zone.height())
                } else {
                    None
                }
            }
        };

        let Some(penetration) = penetration else {
            return (None, None);
        };

        let trigger_price = match zone.kind {
            ZoneKind::Demand => bar.low,
            _ => bar.high,
        };

        let kind = if penetration < self.config.test_penetration_threshold {
            TestKind::Touch
        } else if penetration < self.config.break_threshold {
            TestKind::Penetration
        } else {
            TestKind::Break
        };

        // success = reaction_strength >= threshold AND penetration < break_threshold;
        // the reaction half isn't knowable until `reaction_window` bars have
        // accumulated, so it starts false here and the caller (the facade,
        // which owns bar history) finalizes it via `score_reaction` and
        // reports the corrected event once the window closes.
        let reaction_strength = 0.0;
        let success = false;

        let event = ZoneTestEvent {
            zone_id: zone.id,
            t: bar.t,
            price: trigger_price,
            kind,
            success,
            reaction_strength,
        };

        zone.test_count += 1;
        zone.updated_at = bar.t;

        if kind == TestKind::Break {
            let update = ZoneStateUpdate {
                zone_id: zone.id,
                old_status: zone.status,
                new_status: ZoneStatus::Broken,
                t: bar.t,
                trigger_price,
                reason: TransitionReason::PriceBreak,
                test_success: false,
            };
            zone.status = ZoneStatus::Broken;
            self.flip_watches.retain(|w| w.zone_id != zone.id);
            self.flip_watches.push(FlipWatch {
                zone_id: zone.id,
                opposite_kind: zone.kind.opposite(),
                boundary: match zone.kind {
                    ZoneKind::Demand => zone.bottom,
                    _ => zone.top,
                },
                consecutive: 0,
            });
            return (Some(update), Some(event));
        }

        if zone.status == ZoneStatus::Active {
            let update = ZoneStateUpdate {
                zone_id: zone.id,
                old_status: ZoneStatus::Active,
                new_status: ZoneStatus::Tested,
                t: bar.t,
                trigger_price,
                reason: TransitionReason::ZoneTest,
                test_success: success,
            };
            zone.status = ZoneStatus::Tested;
            return (Some(update), Some(event));
        }

        (None, Some(event))
    }

    /// Reaction strength is the mean favorable displacement over the next
    /// `reaction_window` bars following a test, normalized by ATR. Called
    /// once enough subsequent bars have accumulated for a given test event;
    /// the facade is responsible for buffering test events awaiting their
    /// reaction window and invoking this.
    pub fn score_reaction(&self, zone: &SupplyDemandZone, following: &[Bar], test_price: f64) -> f64 {
        if following.is_empty() {
            return 0.0;
        }
        let favorable: f64 = following
            .iter()
            .take(self.config.reaction_window)
            .map(|b| match zone.kind {
                ZoneKind::Demand => b.close - test_price,
                _ => test_price - b.close,
            })
            .sum();
        let mean = favorable / following.len().min(self.config.reaction_window) as f64;
        (mean / zone.atr_at_creation.max(1e-9)).clamp(0.0, 1.0)
    }

    /// Broken zones are watched for a flip: `flip_confirmation_bars`
    /// consecutive closes beyond the former boundary, with lows/highs
    /// respecting it within 0.5% tolerance.
    fn record_flip_progress(&mut self, zones: &mut [SupplyDemandZone], bar: &Bar, result: &mut ZoneStateResult) {
        let mut confirmed = Vec::new();

        for watch in &mut self.flip_watches {
            let Some(zone) = zones.iter().find(|z| z.id == watch.zone_id) else {
                continue;
            };
            if zone.status != ZoneStatus::Broken {
                continue;
            }

            let tolerance = watch.boundary.abs() * 0.005;
            // `watch.opposite_kind` is the zone kind the flip would produce, i.e. the
            // direction price broke: Demand means it broke upward through a former
            // supply zone, so confirmation requires closes above (and lows respecting)
            // the boundary; Supply is the mirror image below it. Matching on the
            // zone's own (unchanged) `kind` here would check the wrong direction.
            let holds = match watch.opposite_kind {
                ZoneKind::Demand => bar.close > watch.boundary && bar.low >= watch.boundary - tolerance,
                _ => bar.close < watch.boundary && bar.high <= watch.boundary + tolerance,
            };

            if holds {
                watch.consecutive += 1;
            } else {
                watch.consecutive = 0;
            }

            if watch.consecutive >= self.config.flip_confirmation_bars {
                confirmed.push((watch.zone_id, watch.opposite_kind, bar.t, bar.close));
            }
        }

        for (zone_id, opposite_kind, t, trigger_price) in confirmed {
            if let Some(zone) = zones.iter_mut().find(|z| z.id == zone_id) {
                result.updates.push(ZoneStateUpdate {
                    zone_id,
                    old_status: ZoneStatus::Broken,
                    new_status: ZoneStatus::Flipped,
                    t,
                    trigger_price,
                    reason: TransitionReason::ZoneFlip,
                    test_success: false,
                });
                result.rebirths.push(ZoneRebirth {
                    source_zone_id: zone_id,
                    new_kind: opposite_kind,
                    top: zone.top,
                    bottom: zone.bottom,
                });
                zone.status = ZoneStatus::Flipped;
            }
        }

        self.flip_watches.retain(|w| {
            zones
                .iter()
                .find(|z| z.id == w.zone_id)
                .map(|z| z.status == ZoneStatus::Broken)
                .unwrap_or(false)
        });
        let _ = &self.recent_closes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_range::BaseRange;
    use crate::big_move::BigMove;
    use crate::constant::{Direction, Timeframe};

    fn bar(t: DateTime<Utc>, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            t,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 10.0,
        }
    }

    fn supply_zone(top: f64, bottom: f64) -> SupplyDemandZone {
        let now = Utc::now();
        SupplyDemandZone {
            id: 1,
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            kind: ZoneKind::Supply,
            top,
            bottom,
            left_t: now,
            right_t: now,
            strength: 0.7,
            test_count: 0,
            success_count: 0,
            status: ZoneStatus::Active,
            base_range: BaseRange {
                start_index: 0,
                end_index: 0,
                high: top,
                low: bottom,
                atr_at_creation: 0.0010,
                candle_count: 3,
                consolidation_score: 0.7,
            },
            big_move: BigMove {
                start_index: 1,
                end_index: 3,
                direction: Direction::Down,
                magnitude_in_atr: 3.0,
                momentum_score: 0.7,
                breakout_level: None,
                volume_confirmed: true,
            },
            atr_at_creation: 0.0010,
            volume_at_creation: 10.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn supply_zone_break_on_deep_penetration() {
        let mut manager = ZoneStateManager::new(StateConfig::default(), 168.0).unwrap();
        let mut zone = supply_zone(1.2650, 1.2600);
        let b = bar(Utc::now(), 1.2650, 1.2665, 1.2648, 1.2660);
        let result = manager.on_bar(std::slice::from_mut(&mut zone), &b);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].new_status, ZoneStatus::Broken);
        assert_eq!(result.updates[0].reason, TransitionReason::PriceBreak);
    }

    #[test]
    fn break_takes_precedence_over_same_bar_expiry() {
        let mut manager = ZoneStateManager::new(StateConfig::default(), 1.0).unwrap();
        let mut zone = supply_zone(1.2650, 1.2600);
        zone.created_at = Utc::now() - Duration::hours(2);
        let b = bar(Utc::now(), 1.2650, 1.2665, 1.2648, 1.2660);
        let result = manager.on_bar(std::slice::from_mut(&mut zone), &b);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].new_status, ZoneStatus::Broken);
        assert_eq!(result.updates[0].reason, TransitionReason::PriceBreak);
    }

    #[test]
    fn untouched_zone_still_expires() {
        let mut manager = ZoneStateManager::new(StateConfig::default(), 1.0).unwrap();
        let mut zone = supply_zone(1.2650, 1.2600);
        zone.created_at = Utc::now() - Duration::hours(2);
        let b = bar(Utc::now(), 1.2500, 1.2510, 1.2490, 1.2505);
        let result = manager.on_bar(std::slice::from_mut(&mut zone), &b);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].new_status, ZoneStatus::Expired);
    }

    #[test]
    fn score_reaction_rewards_favorable_follow_through() {
        let manager = ZoneStateManager::new(StateConfig::default(), 168.0).unwrap();
        let zone = supply_zone(1.2650, 1.2600);
        let now = Utc::now();
        let following = vec![
            bar(now, 1.2660, 1.2662, 1.2630, 1.2635),
            bar(now, 1.2635, 1.2637, 1.2605, 1.2610),
            bar(now, 1.2610, 1.2612, 1.2580, 1.2585),
        ];
        let strength = manager.score_reaction(&zone, &following, 1.2660);
        assert!(strength > 0.0);
    }

    #[test]
    fn score_reaction_is_zero_with_no_following_bars() {
        let manager = ZoneStateManager::new(StateConfig::default(), 168.0).unwrap();
        let zone = supply_zone(1.2650, 1.2600);
        assert_eq!(manager.score_reaction(&zone, &[], 1.2660), 0.0);
    }

    #[test]
    fn invalid_config_rejected() {
        let mut cfg = StateConfig::default();
        cfg.test_penetration_threshold = 0.5;
        cfg.break_threshold = 0.3;
        assert!(ZoneStateManager::new(cfg, 168.0).is_err());
    }

    #[test]
    fn flip_confirms_after_three_consecutive_closes() {
        let mut manager = ZoneStateManager::new(StateConfig::default(), 168.0).unwrap();
        let mut zone = supply_zone(1.2650, 1.2600);
        let now = Utc::now();

        let break_bar = bar(now, 1.2650, 1.2665, 1.2648, 1.2660);
        let zones = std::slice::from_mut(&mut zone);
        manager.on_bar(zones, &break_bar);
        assert_eq!(zone.status, ZoneStatus::Broken);

        let mut last_result = ZoneStateResult::default();
        for i in 1..=3 {
            let b = bar(
                now + Duration::minutes(5 * i),
                1.2660,
                1.2670,
                1.2652,
                1.2668,
            );
            last_result = manager.on_bar(std::slice::from_mut(&mut zone), &b);
        }

        assert_eq!(zone.status, ZoneStatus::Flipped);
        assert!(last_result
            .updates
            .iter()
            .any(|u| u.new_status == ZoneStatus::Flipped));
        assert_eq!(last_result.rebirths.len(), 1);
        assert_eq!(last_result.rebirths[0].new_kind, ZoneKind::Demand);
    }
}
