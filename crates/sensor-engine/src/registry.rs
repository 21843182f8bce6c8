//! SensorRegistry — the single source of truth for sensor state.
//!
//! A cloneable handle over one shared map; `merge` is the only mutation
//! entry point, so inbound channel updates and optimistic local toggles can
//! never race to overwrite the same id through different paths.  Iteration
//! order is insertion order: the order in which ids were first observed.

use indexmap::IndexMap;
use sensor_proto::protocol::{SensorRecord, SensorUpdate};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct SensorRegistry {
    records: Arc<RwLock<IndexMap<String, SensorRecord>>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `update` onto the stored record for its id, creating a fresh
    /// record (unset fields empty) when the id is new.  Never fails; an
    /// update with no overlay fields re-stores the identical record.  The new
    /// state is visible to `get`/`all` as soon as this returns.
    pub async fn merge(&self, update: &SensorUpdate) -> SensorRecord {
        let mut records = self.records.write().await;
        let record = records.entry(update.id.clone()).or_insert_with(|| SensorRecord {
            id: update.id.clone(),
            ..SensorRecord::default()
        });
        update.apply_to(record);
        record.clone()
    }

    pub async fn get(&self, id: &str) -> Option<SensorRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Snapshot of every record at call time, in insertion order.  Later
    /// merges are not reflected in the returned vec.
    pub async fn all(&self) -> Vec<SensorRecord> {
        self.records.read().await.values().cloned().collect()
    }
}
