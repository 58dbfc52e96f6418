//! The repository contract of spec §6 and an in-process reference
//! implementation. The core never assumes a specific durable backend; it
//! only relies on this trait, passed in as `Arc<dyn Repository>`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::constant::{Timeframe, ZoneStatus};
use crate::error::StructureError;
use crate::zone::SupplyDemandZone;
use crate::zone_state::{ZoneStateUpdate, ZoneTestEvent};

/// Filter for `query_zones`. All fields optional; `None` means "don't
/// filter on this dimension".
#[derive(Debug, Clone, Default)]
pub struct ZoneFilter {
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub status: Option<ZoneStatus>,
    pub min_strength: Option<f64>,
    pub max_age_hours: Option<f64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Bounds for `get_zone_history`/`get_test_events`.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneStatistics {
    pub test_count: u32,
    pub success_count: u32,
    pub state_update_count: usize,
}

/// Persistence contract consumed by the core (spec §6). Implementations
/// must tolerate concurrent writes with at most one writer per zone id;
/// the core never relies on this trait for correctness of the live
/// in-memory model, only for durability and rehydration.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_zone(&self, zone: SupplyDemandZone) -> Result<u64, StructureError>;
    async fn update_zone(&self, zone: SupplyDemandZone) -> Result<bool, StructureError>;
    async fn delete_zone(&self, id: u64) -> Result<bool, StructureError>;
    async fn get_zone(&self, id: u64) -> Result<Option<SupplyDemandZone>, StructureError>;
    async fn query_zones(&self, filter: ZoneFilter) -> Result<Vec<SupplyDemandZone>, StructureError>;

    async fn save_state_update(&self, update: ZoneStateUpdate) -> Result<(), StructureError>;
    async fn save_test_event(&self, event: ZoneTestEvent) -> Result<(), StructureError>;

    async fn bulk_save_zones(&self, zones: Vec<SupplyDemandZone>) -> Result<Vec<u64>, StructureError>;
    async fn cleanup_old_zones(&self, max_age_hours: f64) -> Result<usize, StructureError>;

    async fn get_zone_history(
        &self,
        zone_id: u64,
        query: HistoryQuery,
    ) -> Result<Vec<ZoneStateUpdate>, StructureError>;
    async fn get_test_events(
        &self,
        zone_id: u64,
        query: HistoryQuery,
    ) -> Result<Vec<ZoneTestEvent>, StructureError>;
    async fn get_zone_statistics(&self, zone_id: u64) -> Result<ZoneStatistics, StructureError>;
}

#[derive(Default)]
struct Tables {
    zones: HashMap<u64, SupplyDemandZone>,
    state_updates: HashMap<u64, Vec<ZoneStateUpdate>>,
    test_events: HashMap<u64, Vec<ZoneTestEvent>>,
}

/// In-memory `Repository` over `Mutex<HashMap<...>>` tables mirroring the
/// logical schema of spec §6. The in-process default, suitable for tests
/// and the `replay` demo; a durable backend is the wrapper's concern.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_zone(&self, zone: SupplyDemandZone) -> Result<u64, StructureError> {
        let id = zone.id;
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        tables.zones.insert(id, zone);
        Ok(id)
    }

    async fn update_zone(&self, zone: SupplyDemandZone) -> Result<bool, StructureError> {
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        let existed = tables.zones.contains_key(&zone.id);
        tables.zones.insert(zone.id, zone);
        Ok(existed)
    }

    async fn delete_zone(&self, id: u64) -> Result<bool, StructureError> {
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        Ok(tables.zones.remove(&id).is_some())
    }

    async fn get_zone(&self, id: u64) -> Result<Option<SupplyDemandZone>, StructureError> {
        let tables = self.tables.lock().expect("repository mutex poisoned");
        Ok(tables.zones.get(&id).cloned())
    }

    async fn query_zones(&self, filter: ZoneFilter) -> Result<Vec<SupplyDemandZone>, StructureError> {
        let tables = self.tables.lock().expect("repository mutex poisoned");
        let now = chrono::Utc::now();

        let mut matched: Vec<SupplyDemandZone> = tables
            .zones
            .values()
            .filter(|z| filter.symbol.as_deref().map(|s| s == z.symbol).unwrap_or(true))
            .filter(|z| filter.timeframe.map(|tf| tf == z.timeframe).unwrap_or(true))
            .filter(|z| filter.status.map(|s| s == z.status).unwrap_or(true))
            .filter(|z| filter.min_strength.map(|m| z.strength >= m).unwrap_or(true))
            .filter(|z| {
                filter
                    .max_age_hours
                    .map(|max_age| {
                        let age_hours = now.signed_duration_since(z.created_at).num_seconds() as f64 / 3600.0;
                        age_hours <= max_age
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let offset = filter.offset.unwrap_or(0);
        let matched = if offset < matched.len() {
            matched.split_off(offset)
        } else {
            Vec::new()
        };

        Ok(match filter.limit {
            Some(limit) => matched.into_iter().take(limit).collect(),
            None => matched,
        })
    }

    async fn save_state_update(&self, update: ZoneStateUpdate) -> Result<(), StructureError> {
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        tables.state_updates.entry(update.zone_id).or_default().push(update);
        Ok(())
    }

    async fn save_test_event(&self, event: ZoneTestEvent) -> Result<(), StructureError> {
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        tables.test_events.entry(event.zone_id).or_default().push(event);
        Ok(())
    }

    async fn bulk_save_zones(&self, zones: Vec<SupplyDemandZone>) -> Result<Vec<u64>, StructureError> {
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        let mut ids = Vec::with_capacity(zones.len());
        for zone in zones {
            ids.push(zone.id);
            tables.zones.insert(zone.id, zone);
        }
        Ok(ids)
    }

    async fn cleanup_old_zones(&self, max_age_hours: f64) -> Result<usize, StructureError> {
        let mut tables = self.tables.lock().expect("repository mutex poisoned");
        let now = chrono::Utc::now();
        let before = tables.zones.len();
        tables.zones.retain(|_, z| {
            let age_hours = now.signed_duration_since(z.created_at).num_seconds() as f64 / 3600.0;
            age_hours <= max_age_hours
        });
        Ok(before - tables.zones.len())
    }

    async fn get_zone_history(
        &self,
        zone_id: u64,
        query: HistoryQuery,
    ) -> Result<Vec<ZoneStateUpdate>, StructureError> {
        let tables = self.tables.lock().expect("repository mutex poisoned");
        let mut updates: Vec<ZoneStateUpdate> = tables
            .state_updates
            .get(&zone_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|u| query.since.map(|since| u.t >= since).unwrap_or(true))
            .collect();
        updates.sort_by(|a, b| a.t.cmp(&b.t));
        Ok(match query.limit {
            Some(limit) => updates.into_iter().take(limit).collect(),
            None => updates,
        })
    }

    async fn get_test_events(
        &self,
        zone_id: u64,
        query: HistoryQuery,
    ) -> Result<Vec<ZoneTestEvent>, StructureError> {
        let tables = self.tables.lock().expect("repository mutex poisoned");
        let mut events: Vec<ZoneTestEvent> = tables
            .test_events
            .get(&zone_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|e| query.since.map(|since| e.t >= since).unwrap_or(true))
            .collect();
        events.sort_by(|a, b| a.t.cmp(&b.t));
        Ok(match query.limit {
            Some(limit) => events.into_iter().take(limit).collect(),
            None => events,
        })
    }

    async fn get_zone_statistics(&self, zone_id: u64) -> Result<ZoneStatistics, StructureError> {
        let tables = self.tables.lock().expect("repository mutex poisoned");
        let (test_count, success_count) = tables
            .zones
            .get(&zone_id)
            .map(|z| (z.test_count, z.success_count))
            .unwrap_or((0, 0));
        let state_update_count = tables.state_updates.get(&zone_id).map(|v| v.len()).unwrap_or(0);
        Ok(ZoneStatistics {
            test_count,
            success_count,
            state_update_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_range::BaseRange;
    use crate::big_move::BigMove;
    use crate::constant::{Direction, ZoneKind};
    use chrono::Utc;

    fn zone(id: u64, status: ZoneStatus) -> SupplyDemandZone {
        let now = Utc::now();
        SupplyDemandZone {
            id,
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            kind: ZoneKind::Demand,
            top: 1.1,
            bottom: 1.0,
            left_t: now,
            right_t: now,
            strength: 0.7,
            test_count: 0,
            success_count: 0,
            status,
            base_range: BaseRange {
                start_index: 0,
                end_index: 0,
                high: 1.1,
                low: 1.0,
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
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let repo = InMemoryRepository::new();
        let id = repo.save_zone(zone(1, ZoneStatus::Active)).await.unwrap();
        let fetched = repo.get_zone(id).await.unwrap().expect("zone should exist");
        assert_eq!(fetched.id, 1);
    }

    #[tokio::test]
    async fn query_filters_by_status() {
        let repo = InMemoryRepository::new();
        repo.save_zone(zone(1, ZoneStatus::Active)).await.unwrap();
        repo.save_zone(zone(2, ZoneStatus::Broken)).await.unwrap();

        let active = repo
            .query_zones(ZoneFilter {
                status: Some(ZoneStatus::Active),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
    }

    #[tokio::test]
    async fn delete_removes_zone() {
        let repo = InMemoryRepository::new();
        repo.save_zone(zone(1, ZoneStatus::Active)).await.unwrap();
        assert!(repo.delete_zone(1).await.unwrap());
        assert!(repo.get_zone(1).await.unwrap().is_none());
    }
}
