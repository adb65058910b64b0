//! Data-plane port onto a target region's store.
//!
//! A [`RegionLink`] is the only way an apply reaches a remote region: a typed
//! upsert/delete keyed by record id, plus a ping used by the health monitor.
//! [`MemRegionLink`] implements the port over an in-memory record map with
//! failure and latency injection for tests.

use crate::error::SyncError;
use crate::log::{JsonMap, SyncTable};
use crate::region::Region;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Connection to one target region's record store.
#[async_trait]
pub trait RegionLink: Send + Sync {
    /// Insert or replace a record by id. Re-applying is a no-op overwrite.
    async fn upsert(
        &self,
        table: SyncTable,
        record_id: &str,
        data: &JsonMap,
    ) -> Result<(), SyncError>;

    /// Delete a record by id. Deleting an absent record succeeds.
    async fn delete(&self, table: SyncTable, record_id: &str) -> Result<(), SyncError>;

    /// Round-trip the region's store and report the latency.
    async fn ping(&self) -> Result<Duration, SyncError>;
}

/// Resolves a region to its data-plane link.
pub trait RegionRouter: Send + Sync {
    /// The link for a region, if one is configured.
    fn link(&self, region: &Region) -> Option<Arc<dyn RegionLink>>;
}

/// In-memory [`RegionLink`] used by tests and single-node deployments.
pub struct MemRegionLink {
    region_name: String,
    records: RwLock<HashMap<(SyncTable, String), JsonMap>>,
    fail_applies: AtomicBool,
    ping_fails: AtomicBool,
    ping_latency_ms: AtomicU64,
}

impl MemRegionLink {
    /// Create an empty link for a region.
    pub fn new(region_name: &str) -> Self {
        Self {
            region_name: region_name.to_string(),
            records: RwLock::new(HashMap::new()),
            fail_applies: AtomicBool::new(false),
            ping_fails: AtomicBool::new(false),
            ping_latency_ms: AtomicU64::new(1),
        }
    }

    /// Make every upsert/delete fail until cleared.
    pub fn set_fail_applies(&self, fail: bool) {
        self.fail_applies.store(fail, Ordering::SeqCst);
    }

    /// Make pings fail until cleared.
    pub fn set_ping_fails(&self, fail: bool) {
        self.ping_fails.store(fail, Ordering::SeqCst);
    }

    /// Latency reported by successful pings.
    pub fn set_ping_latency_ms(&self, latency_ms: u64) {
        self.ping_latency_ms.store(latency_ms, Ordering::SeqCst);
    }

    /// Read a record back, for assertions.
    pub async fn record(&self, table: SyncTable, record_id: &str) -> Option<JsonMap> {
        let records = self.records.read().await;
        records.get(&(table, record_id.to_string())).cloned()
    }

    /// Number of records currently stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RegionLink for MemRegionLink {
    async fn upsert(
        &self,
        table: SyncTable,
        record_id: &str,
        data: &JsonMap,
    ) -> Result<(), SyncError> {
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(SyncError::RegionUnreachable {
                name: self.region_name.clone(),
                msg: "injected apply failure".to_string(),
            });
        }
        let mut records = self.records.write().await;
        records.insert((table, record_id.to_string()), data.clone());
        Ok(())
    }

    async fn delete(&self, table: SyncTable, record_id: &str) -> Result<(), SyncError> {
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(SyncError::RegionUnreachable {
                name: self.region_name.clone(),
                msg: "injected apply failure".to_string(),
            });
        }
        let mut records = self.records.write().await;
        records.remove(&(table, record_id.to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, SyncError> {
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(SyncError::RegionUnreachable {
                name: self.region_name.clone(),
                msg: "ping failed".to_string(),
            });
        }
        Ok(Duration::from_millis(
            self.ping_latency_ms.load(Ordering::SeqCst),
        ))
    }
}

/// In-memory [`RegionRouter`] over a fixed set of links.
#[derive(Default)]
pub struct MemRouter {
    links: std::sync::RwLock<HashMap<Uuid, Arc<MemRegionLink>>>,
}

impl MemRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a link for a region, returning it for test setup.
    pub fn add_region(&self, region: &Region) -> Arc<MemRegionLink> {
        let link = Arc::new(MemRegionLink::new(&region.name));
        self.links
            .write()
            .expect("router lock poisoned")
            .insert(region.id, link.clone());
        link
    }
}

impl RegionRouter for MemRouter {
    fn link(&self, region: &Region) -> Option<Arc<dyn RegionLink>> {
        self.links
            .read()
            .expect("router lock poisoned")
            .get(&region.id)
            .map(|l| l.clone() as Arc<dyn RegionLink>)
    }
}
