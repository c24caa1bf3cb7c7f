//! Assignment lifecycle coordinator
//!
//! Every mutating operation follows the same shape:
//!
//! ```text
//! read current state ─▶ check preconditions ─▶ one atomic store write ─▶ side effects
//!      (store)            (fail fast)            (assign / transition)    (best effort)
//! ```
//!
//! Preconditions are checked before any write, so a rejected call leaves the
//! store untouched. The store re-checks the same rules inside its transaction
//! (partial unique index, guarded updates) and its rejections map to the same
//! errors as the pre-checks.
//!
//! Side effects run after commit, one after another, each isolated: a failed
//! publish does not skip cache invalidation, and neither changes the result
//! returned to the caller.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::error::{
    CoordinatorError, CoordinatorResult, DRIVER_ALREADY_ACTIVE, LOAD_NOT_OPEN,
    ONLY_ACTIVE_UPDATABLE,
};
use crate::audit::{AuditEvent, SharedAuditSink};
use crate::cache::{SharedCache, LOADS_ALL_KEY};
use crate::error::FreightlineErrorTrait;
use crate::events::{publish_json, SharedPublisher, ASSIGNMENT_CREATED_TOPIC};
use crate::metrics;
use crate::models::{
    Assignment, AssignmentCreatedEvent, AssignmentDetails, AssignmentStatus, LoadStatus,
    ValidationError,
};
use crate::storage::SharedRecordStore;

const EFFECT_PUBLISH: &str = "publish";
const EFFECT_CACHE_INVALIDATE: &str = "cache_invalidate";
const EFFECT_AUDIT_APPEND: &str = "audit_append";

/// Coordinates assignment creation and status transitions
#[derive(Clone)]
pub struct AssignmentCoordinator {
    store: SharedRecordStore,
    cache: SharedCache,
    events: SharedPublisher,
    audit: SharedAuditSink,
    topic: Arc<str>,
}

impl AssignmentCoordinator {
    pub fn new(
        store: SharedRecordStore,
        cache: SharedCache,
        events: SharedPublisher,
        audit: SharedAuditSink,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            audit,
            topic: Arc::from(ASSIGNMENT_CREATED_TOPIC),
        }
    }

    /// Publish assignment-created events on `topic` instead of the default
    pub fn with_topic(mut self, topic: impl AsRef<str>) -> Self {
        self.topic = Arc::from(topic.as_ref());
        self
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    /// Bind a driver to an open load.
    ///
    /// Checks, in order: driver exists, load exists, load is `OPEN`, driver
    /// has no `ASSIGNED` assignment.
    pub async fn create(&self, driver_id: Uuid, load_id: Uuid) -> CoordinatorResult<Assignment> {
        let _timer = metrics::start_operation_timer("create");
        let result = self.try_create(driver_id, load_id).await;
        if let Err(e) = &result {
            metrics::record_operation_error("create", e.category());
        }
        result
    }

    async fn try_create(&self, driver_id: Uuid, load_id: Uuid) -> CoordinatorResult<Assignment> {
        let driver = self
            .store
            .get_driver(driver_id)
            .await?
            .ok_or(CoordinatorError::not_found("driver"))?;

        let load = self
            .store
            .get_load(load_id)
            .await?
            .ok_or(CoordinatorError::not_found("load"))?;

        if load.status != LoadStatus::Open {
            return Err(CoordinatorError::invalid_state(LOAD_NOT_OPEN));
        }

        if self
            .store
            .find_assignment_by_driver(driver_id, AssignmentStatus::Assigned)
            .await?
            .is_some()
        {
            return Err(CoordinatorError::conflict(DRIVER_ALREADY_ACTIVE));
        }

        let assignment = self
            .store
            .assign(&Assignment::new(driver_id, load_id))
            .await
            .map_err(CoordinatorError::from_assign)?;

        metrics::record_assignment_created();
        info!(
            assignment_id = %assignment.id,
            driver_id = %driver_id,
            load_id = %load_id,
            "Assignment created"
        );

        let event = AssignmentCreatedEvent {
            assignment_id: assignment.id,
            driver,
            load: load.with_status(LoadStatus::Assigned),
        };
        self.publish_created(&event).await;
        self.invalidate_loads(assignment.id).await;

        Ok(assignment)
    }

    /// Move an active assignment to `COMPLETED` or `CANCELLED`
    pub async fn update_status(
        &self,
        assignment_id: Uuid,
        status: AssignmentStatus,
    ) -> CoordinatorResult<Assignment> {
        let _timer = metrics::start_operation_timer("update_status");
        let result = self.try_update_status(assignment_id, status).await;
        if let Err(e) = &result {
            metrics::record_operation_error("update_status", e.category());
        }
        result
    }

    async fn try_update_status(
        &self,
        assignment_id: Uuid,
        status: AssignmentStatus,
    ) -> CoordinatorResult<Assignment> {
        if !status.is_terminal() {
            return Err(ValidationError::InvalidTargetStatus.into());
        }

        let current = self
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or(CoordinatorError::not_found("assignment"))?;

        if !current.status.can_transition_to(status) {
            return Err(CoordinatorError::invalid_state(ONLY_ACTIVE_UPDATABLE));
        }

        let updated = self
            .store
            .transition(assignment_id, status)
            .await
            .map_err(CoordinatorError::from_transition)?;

        metrics::record_transition(status.as_str());
        info!(
            assignment_id = %assignment_id,
            load_id = %updated.load_id,
            status = %status,
            "Assignment status updated"
        );

        self.append_audit(&updated).await;
        self.invalidate_loads(assignment_id).await;

        Ok(updated)
    }

    /// Assignment with its driver and load
    pub async fn find_one(&self, assignment_id: Uuid) -> CoordinatorResult<AssignmentDetails> {
        self.store
            .get_assignment_details(assignment_id)
            .await?
            .ok_or(CoordinatorError::not_found("assignment"))
    }

    // ========================================================================
    // Side effects
    // ========================================================================

    async fn publish_created(&self, event: &AssignmentCreatedEvent) {
        match publish_json(self.events.as_ref(), &self.topic, event).await {
            Ok(delivery_id) => {
                tracing::debug!(
                    assignment_id = %event.assignment_id,
                    delivery_id = %delivery_id,
                    "Assignment event published"
                );
            }
            Err(e) => {
                metrics::record_side_effect_failure(EFFECT_PUBLISH);
                warn!(
                    effect = EFFECT_PUBLISH,
                    assignment_id = %event.assignment_id,
                    error = %e,
                    "Side effect failed after commit"
                );
            }
        }
    }

    async fn append_audit(&self, assignment: &Assignment) {
        let Some(event) = AuditEvent::transition(assignment) else {
            return;
        };
        if let Err(e) = self.audit.append(&event).await {
            metrics::record_side_effect_failure(EFFECT_AUDIT_APPEND);
            warn!(
                effect = EFFECT_AUDIT_APPEND,
                assignment_id = %assignment.id,
                event_type = %event.event_type,
                error = %e,
                "Side effect failed after commit"
            );
        }
    }

    async fn invalidate_loads(&self, assignment_id: Uuid) {
        if let Err(e) = self.cache.delete(LOADS_ALL_KEY).await {
            metrics::record_side_effect_failure(EFFECT_CACHE_INVALIDATE);
            warn!(
                effect = EFFECT_CACHE_INVALIDATE,
                assignment_id = %assignment_id,
                error = %e,
                "Side effect failed after commit"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::cache::MemoryCache;
    use crate::events::MemoryEventBus;
    use crate::models::{Driver, Load};
    use crate::storage::{MemoryRecordStore, StoreError};

    struct Harness {
        store: Arc<MemoryRecordStore>,
        cache: Arc<MemoryCache>,
        bus: Arc<MemoryEventBus>,
        audit: Arc<MemoryAuditSink>,
        coordinator: AssignmentCoordinator,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryRecordStore::new());
        let cache = Arc::new(MemoryCache::new());
        let bus = Arc::new(MemoryEventBus::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let coordinator = AssignmentCoordinator::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            audit.clone(),
        );
        Harness {
            store,
            cache,
            bus,
            audit,
            coordinator,
        }
    }

    fn seed(h: &Harness) -> (Driver, Load) {
        let driver = Driver::new("Ana Lopez", "CA-88213");
        let load = Load::new("Fresno", "Portland", "Produce");
        h.store.insert_driver(driver.clone());
        h.store.insert_load(load.clone());
        (driver, load)
    }

    #[tokio::test]
    async fn test_precondition_order() {
        let h = harness();
        let (driver, load) = seed(&h);

        // Unknown driver wins over unknown load
        let err = h
            .coordinator
            .create(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound { entity: "driver" }));

        let err = h
            .coordinator
            .create(driver.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound { entity: "load" }));

        h.store.insert_load(load.with_status(LoadStatus::Completed));
        let err = h.coordinator.create(driver.id, load.id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_created_event_carries_assigned_load() {
        let h = harness();
        let (driver, load) = seed(&h);

        let assignment = h.coordinator.create(driver.id, load.id).await.unwrap();

        let published = h.bus.published(ASSIGNMENT_CREATED_TOPIC);
        assert_eq!(published.len(), 1);
        let event: AssignmentCreatedEvent = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(event.assignment_id, assignment.id);
        assert_eq!(event.driver, driver);
        assert_eq!(event.load.id, load.id);
        assert_eq!(event.load.status, LoadStatus::Assigned);
        assert_eq!(h.cache.deleted_keys(), vec![LOADS_ALL_KEY]);
    }

    #[tokio::test]
    async fn test_custom_topic() {
        let h = harness();
        let (driver, load) = seed(&h);
        let coordinator = h.coordinator.clone().with_topic("dispatch.assigned");

        coordinator.create(driver.id, load.id).await.unwrap();
        assert_eq!(h.bus.published("dispatch.assigned").len(), 1);
        assert!(h.bus.published(ASSIGNMENT_CREATED_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_still_invalidates_cache() {
        let h = harness();
        let (driver, load) = seed(&h);
        h.bus.set_fail_publish(true);

        let assignment = h.coordinator.create(driver.id, load.id).await.unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Assigned);
        assert_eq!(h.cache.deleted_keys(), vec![LOADS_ALL_KEY]);
    }

    #[tokio::test]
    async fn test_audit_failure_still_invalidates_cache() {
        let h = harness();
        let (driver, load) = seed(&h);
        let assignment = h.coordinator.create(driver.id, load.id).await.unwrap();
        h.audit.set_failing(true);

        let updated = h
            .coordinator
            .update_status(assignment.id, AssignmentStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(updated.status, AssignmentStatus::Cancelled);
        assert!(h.audit.events().is_empty());
        assert_eq!(h.cache.deleted_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_update_records_audit_event() {
        let h = harness();
        let (driver, load) = seed(&h);
        let assignment = h.coordinator.create(driver.id, load.id).await.unwrap();

        h.coordinator
            .update_status(assignment.id, AssignmentStatus::Completed)
            .await
            .unwrap();

        let events = h.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "LOAD_COMPLETED");
        assert_eq!(events[0].driver_id, Some(driver.id));
        assert_eq!(events[0].load_id, Some(load.id));
    }

    #[tokio::test]
    async fn test_update_rejects_assigned_target() {
        let h = harness();
        let (driver, load) = seed(&h);
        let assignment = h.coordinator.create(driver.id, load.id).await.unwrap();

        let err = h
            .coordinator
            .update_status(assignment.id, AssignmentStatus::Assigned)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_store_outage_is_transaction_error() {
        let h = harness();
        let (driver, load) = seed(&h);
        h.store.set_fail_writes(true);

        let err = h.coordinator.create(driver.id, load.id).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Transaction(StoreError::Unavailable(_))
        ));
        assert!(err.is_recoverable());
        assert!(h.store.assignments().is_empty());
        assert!(h.bus.published(ASSIGNMENT_CREATED_TOPIC).is_empty());
        assert!(h.cache.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn test_find_one_missing() {
        let h = harness();
        let err = h.coordinator.find_one(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::NotFound {
                entity: "assignment"
            }
        ));
    }
}
