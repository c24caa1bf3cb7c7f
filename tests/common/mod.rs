//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use freightline::audit::MemoryAuditSink;
use freightline::cache::MemoryCache;
use freightline::coordinator::AssignmentCoordinator;
use freightline::events::MemoryEventBus;
use freightline::models::{
    Assignment, AssignmentDetails, AssignmentStatus, Driver, Load, LoadStatus,
};
use freightline::storage::{MemoryRecordStore, RecordStore, StoreResult};

/// Coordinator wired to in-memory collaborators that tests can inspect
pub struct Fixture {
    pub store: Arc<MemoryRecordStore>,
    pub cache: Arc<MemoryCache>,
    pub bus: Arc<MemoryEventBus>,
    pub audit: Arc<MemoryAuditSink>,
    pub coordinator: AssignmentCoordinator,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        Self::with_store(store.clone(), store)
    }

    /// Fixture whose coordinator talks to `backend` while tests inspect `store`
    pub fn with_store(store: Arc<MemoryRecordStore>, backend: Arc<dyn RecordStore>) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let bus = Arc::new(MemoryEventBus::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let coordinator =
            AssignmentCoordinator::new(backend, cache.clone(), bus.clone(), audit.clone());
        Self {
            store,
            cache,
            bus,
            audit,
            coordinator,
        }
    }

    /// Coordinator whose pre-checks never see existing state, so only the
    /// store's own guards stand between concurrent callers
    pub fn racy() -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        Self::with_store(store.clone(), Arc::new(BlindPrecheckStore::new(store)))
    }

    pub fn driver(&self, name: &str) -> Driver {
        let driver = Driver::new(name, format!("LIC-{}", Uuid::new_v4()));
        self.store.insert_driver(driver.clone());
        driver
    }

    pub fn open_load(&self) -> Load {
        self.load_with_status(LoadStatus::Open)
    }

    pub fn load_with_status(&self, status: LoadStatus) -> Load {
        let load = Load::new("Laredo, TX", "Chicago, IL", "Auto parts").with_status(status);
        self.store.insert_load(load.clone());
        load
    }

    pub async fn load_status(&self, load_id: Uuid) -> LoadStatus {
        self.store
            .get_load(load_id)
            .await
            .unwrap()
            .expect("load exists")
            .status
    }

    pub async fn assignment(&self, id: Uuid) -> Assignment {
        self.store
            .get_assignment(id)
            .await
            .unwrap()
            .expect("assignment exists")
    }
}

/// Store wrapper that reports every load as `OPEN` and never finds an
/// active assignment, emulating callers that all read before anyone writes
pub struct BlindPrecheckStore {
    inner: Arc<MemoryRecordStore>,
}

impl BlindPrecheckStore {
    pub fn new(inner: Arc<MemoryRecordStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RecordStore for BlindPrecheckStore {
    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>> {
        self.inner.get_driver(id).await
    }

    async fn get_load(&self, id: Uuid) -> StoreResult<Option<Load>> {
        Ok(self
            .inner
            .get_load(id)
            .await?
            .map(|load| load.with_status(LoadStatus::Open)))
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.inner.get_assignment(id).await?.map(|a| Assignment {
            status: AssignmentStatus::Assigned,
            ..a
        }))
    }

    async fn get_assignment_details(&self, id: Uuid) -> StoreResult<Option<AssignmentDetails>> {
        self.inner.get_assignment_details(id).await
    }

    async fn find_assignment_by_driver(
        &self,
        _driver_id: Uuid,
        _status: AssignmentStatus,
    ) -> StoreResult<Option<Assignment>> {
        Ok(None)
    }

    async fn assign(&self, assignment: &Assignment) -> StoreResult<Assignment> {
        self.inner.assign(assignment).await
    }

    async fn transition(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreResult<Assignment> {
        self.inner.transition(assignment_id, target).await
    }
}
