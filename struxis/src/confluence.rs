use std::collections::HashMap;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;

use crate::constant::{DominantSide, Timeframe, ZoneKind};
use crate::indicator::price_delta_to_pips;
use crate::zone::SupplyDemandZone;

#[derive(Debug, Clone)]
pub struct ConfluenceConfig {
    pub proximity_threshold_pips: f64,
    pub weight_strength: f64,
    pub weight_freshness: f64,
    pub weight_history: f64,
    pub max_zone_age_hours: f64,
    pub cache_timeout_minutes: u64,
    pub pip_size: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_pips: 50.0,
            weight_strength: 0.4,
            weight_freshness: 0.3,
            weight_history: 0.3,
            max_zone_age_hours: 168.0,
            cache_timeout_minutes: 5,
            pip_size: 0.0001,
        }
    }
}

/// Per-timeframe weight table from spec §4.8.
pub fn timeframe_weight(tf: Timeframe) -> f64 {
    match tf {
        Timeframe::M1 => 0.1,
        Timeframe::M5 => 0.2,
        Timeframe::M15 => 0.3,
        Timeframe::H1 => 0.4,
        Timeframe::H4 => 0.5,
        Timeframe::D1 => 0.6,
    }
}

#[derive(Debug, Clone)]
pub struct ConfluenceScore {
    pub zone_id: u64,
    pub kind: ZoneKind,
    pub proximity_score: f64,
    pub strength_score: f64,
    pub freshness_score: f64,
    pub test_history_score: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfluenceResult {
    pub total: f64,
    pub dominant_side: Option<DominantSide>,
    pub per_timeframe: HashMap<Timeframe, f64>,
    pub per_zone: Vec<ConfluenceScore>,
}

struct CacheEntry {
    zones: Vec<SupplyDemandZone>,
    stamped_at: Instant,
}

/// Multi-timeframe proximity/strength/freshness/history scorer. Zones are
/// indexed by (symbol, timeframe) in an in-memory cache invalidated after
/// `cache_timeout_minutes` or on explicit update notification.
pub struct ConfluenceScorer {
    config: ConfluenceConfig,
    cache: HashMap<(String, Timeframe), CacheEntry>,
}

impl ConfluenceScorer {
    pub fn new(config: ConfluenceConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    /// Replaces the cached zone set for (symbol, timeframe); called by the
    /// facade whenever the live zone set changes.
    pub fn notify_zones(&mut self, symbol: &str, timeframe: Timeframe, zones: Vec<SupplyDemandZone>) {
        self.cache.insert(
            (symbol.to_string(), timeframe),
            CacheEntry {
                zones,
                stamped_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&mut self, symbol: &str, timeframe: Timeframe) {
        self.cache.remove(&(symbol.to_string(), timeframe));
    }

    fn live_zones(&self, symbol: &str, timeframe: Timeframe) -> &[SupplyDemandZone] {
        match self.cache.get(&(symbol.to_string(), timeframe)) {
            Some(entry)
                if entry.stamped_at.elapsed()
                    < StdDuration::from_secs(self.config.cache_timeout_minutes * 60) =>
            {
                &entry.zones
            }
            _ => &[],
        }
    }

    pub fn query(&self, price: f64, symbol: &str, timeframes: &[Timeframe]) -> ConfluenceResult {
        let mut per_timeframe = HashMap::new();
        let mut per_zone = Vec::new();
        let mut weighted_total = 0.0;

        for &tf in timeframes {
            let zones = self.live_zones(symbol, tf);
            let scored: Vec<ConfluenceScore> =
                zones.iter().map(|z| self.score_zone(price, z)).collect();

            let best = scored
                .iter()
                .max_by(|a, b| a.total.partial_cmp(&b.total).unwrap())
                .map(|s| s.total)
                .unwrap_or(0.0);

            let weight = timeframe_weight(tf);
            let tf_score = (best * weight).clamp(0.0, 1.0);
            per_timeframe.insert(tf, tf_score);
            weighted_total += tf_score;

            per_zone.extend(scored);
        }

        let total = if timeframes.is_empty() {
            0.0
        } else {
            (weighted_total / timeframes.len() as f64).clamp(0.0, 1.0)
        };

        let dominant_side = per_zone
            .iter()
            .max_by(|a, b| a.total.partial_cmp(&b.total).unwrap())
            .map(|best| match best.kind {
                ZoneKind::Supply => DominantSide::Supply,
                ZoneKind::Demand => DominantSide::Demand,
                ZoneKind::Continuation => DominantSide::Neutral,
            });

        ConfluenceResult {
            total,
            dominant_side,
            per_timeframe,
            per_zone,
        }
    }

    fn score_zone(&self, price: f64, zone: &SupplyDemandZone) -> ConfluenceScore {
        let proximity_score = if price >= zone.bottom && price <= zone.top {
            let center_distance = (price - zone.center()).abs();
            (1.0 - center_distance / (zone.height() / 2.0)).max(0.0)
        } else {
            let distance_to_edge = if price > zone.top {
                price - zone.top
            } else {
                zone.bottom - price
            };
            let distance_pips = price_delta_to_pips(distance_to_edge, self.config.pip_size);
            (1.0 - distance_pips / self.config.proximity_threshold_pips).max(0.0)
        };

        let strength_score = zone.strength;

        let age_hours = Utc::now()
            .signed_duration_since(zone.created_at)
            .num_seconds() as f64
            / 3600.0;
        let freshness_score = if age_hours >= self.config.max_zone_age_hours {
            0.0
        } else {
            (1.0 - age_hours / self.config.max_zone_age_hours).max(0.0)
        };

        let test_history_score = if zone.test_count == 0 {
            0.8
        } else {
            let base = zone.success_count as f64 / zone.test_count.max(1) as f64;
            let success_rate = zone.success_count as f64 / zone.test_count as f64;
            if zone.test_count >= 3 && success_rate >= 0.8 {
                (base + 0.1).min(1.0)
            } else {
                base
            }
        };

        let total = (proximity_score
            * (self.config.weight_strength * strength_score
                + self.config.weight_freshness * freshness_score
                + self.config.weight_history * test_history_score))
            .clamp(0.0, 1.0);

        ConfluenceScore {
            zone_id: zone.id,
            kind: zone.kind,
            proximity_score,
            strength_score,
            freshness_score,
            test_history_score,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_range::BaseRange;
    use crate::big_move::BigMove;
    use crate::constant::Direction;
    use chrono::Duration;

    fn demand_zone(top: f64, bottom: f64, strength: f64, test_count: u32, success_count: u32, age_hours: i64) -> SupplyDemandZone {
        let created_at = Utc::now() - Duration::hours(age_hours);
        SupplyDemandZone {
            id: 1,
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            kind: ZoneKind::Demand,
            top,
            bottom,
            left_t: created_at,
            right_t: created_at,
            strength,
            test_count,
            success_count,
            status: crate::constant::ZoneStatus::Active,
            base_range: BaseRange {
                start_index: 0,
                end_index: 0,
                high: top,
                low: bottom,
                atr_at_creation: 0.001,
                candle_count: 3,
                consolidation_score: 0.7,
            },
            big_move: BigMove {
                start_index: 1,
                end_index: 3,
                direction: Direction::Up,
                magnitude_in_atr: 3.0,
                momentum_score: 0.7,
                breakout_level: None,
                volume_confirmed: true,
            },
            atr_at_creation: 0.001,
            volume_at_creation: 10.0,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn s5_confluence_at_zone_center() {
        let mut scorer = ConfluenceScorer::new(ConfluenceConfig::default());
        let zone = demand_zone(1.0820, 1.0800, 0.75, 1, 1, 6);
        scorer.notify_zones("EURUSD", Timeframe::M5, vec![zone]);

        let result = scorer.query(1.0810, "EURUSD", &[Timeframe::M5]);
        let score = &result.per_zone[0];
        assert!((score.proximity_score - 1.0).abs() < 1e-9);
        assert!(score.total > 0.8 && score.total < 0.95);
    }

    #[test]
    fn untested_zone_gets_default_history_score() {
        let mut scorer = ConfluenceScorer::new(ConfluenceConfig::default());
        let zone = demand_zone(1.0820, 1.0800, 0.5, 0, 0, 1);
        scorer.notify_zones("EURUSD", Timeframe::M5, vec![zone]);
        let result = scorer.query(1.0810, "EURUSD", &[Timeframe::M5]);
        assert!((result.per_zone[0].test_history_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn freshness_is_zero_past_max_age() {
        let mut scorer = ConfluenceScorer::new(ConfluenceConfig::default());
        let zone = demand_zone(1.0820, 1.0800, 0.5, 0, 0, 200);
        scorer.notify_zones("EURUSD", Timeframe::M5, vec![zone]);
        let result = scorer.query(1.0810, "EURUSD", &[Timeframe::M5]);
        assert_eq!(result.per_zone[0].freshness_score, 0.0);
    }
}
