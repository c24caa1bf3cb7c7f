//! Integration tests for the assignment lifecycle
//!
//! These tests verify:
//! - Precondition failures leave the store untouched
//! - Assignment and load status move together
//! - Post-commit side effects never change the result of a committed call
//! - Created events flow through the worker into the audit trail

mod common;

use std::time::Duration;

use common::Fixture;
use freightline::cache::{CacheStore, LOADS_ALL_KEY};
use freightline::coordinator::CoordinatorError;
use freightline::events::{EventsConfig, ASSIGNMENT_CREATED_TOPIC};
use freightline::models::{AssignmentStatus, LoadStatus};
use freightline::storage::RecordStore;
use freightline::worker::{provision, AuditWorker};
use uuid::Uuid;

// ============================================================================
// create
// ============================================================================

#[tokio::test]
async fn test_create_assigns_driver_and_load() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();

    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();

    assert_eq!(assignment.status, AssignmentStatus::Assigned);
    assert_eq!(assignment.driver_id, driver.id);
    assert_eq!(assignment.load_id, load.id);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Assigned);

    let stored = fx.store.assignments();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], assignment);
}

#[tokio::test]
async fn test_create_against_non_open_load_is_invalid_state() {
    for status in [LoadStatus::Assigned, LoadStatus::Completed, LoadStatus::Cancelled] {
        let fx = Fixture::new();
        let driver = fx.driver("D1");
        let load = fx.load_with_status(status);

        let err = fx.coordinator.create(driver.id, load.id).await.unwrap_err();

        assert!(
            matches!(
                err,
                CoordinatorError::InvalidState { ref reason } if reason == "load not open"
            ),
            "unexpected error for {status}: {err:?}"
        );
        assert!(fx.store.assignments().is_empty());
        assert_eq!(fx.load_status(load.id).await, status);
        assert!(fx.cache.deleted_keys().is_empty());
        assert!(fx.bus.published(ASSIGNMENT_CREATED_TOPIC).is_empty());
    }
}

#[tokio::test]
async fn test_create_for_busy_driver_is_conflict() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let first = fx.open_load();
    let second = fx.open_load();
    fx.coordinator.create(driver.id, first.id).await.unwrap();

    let err = fx.coordinator.create(driver.id, second.id).await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::Conflict { ref reason } if reason == "driver already active"
    ));
    assert_eq!(fx.store.assignments().len(), 1);
    assert_eq!(fx.load_status(second.id).await, LoadStatus::Open);
}

#[tokio::test]
async fn test_create_unknown_records() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();

    let err = fx.coordinator.create(Uuid::new_v4(), load.id).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound { entity: "driver" }));

    let err = fx.coordinator.create(driver.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound { entity: "load" }));

    assert!(fx.store.assignments().is_empty());
}

#[tokio::test]
async fn test_driver_can_take_new_load_after_completion() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let first = fx.open_load();
    let second = fx.open_load();

    let assignment = fx.coordinator.create(driver.id, first.id).await.unwrap();
    fx.coordinator
        .update_status(assignment.id, AssignmentStatus::Completed)
        .await
        .unwrap();

    let next = fx.coordinator.create(driver.id, second.id).await.unwrap();
    assert_eq!(next.status, AssignmentStatus::Assigned);
    assert_eq!(fx.store.active_count(driver.id), 1);
}

// ============================================================================
// updateStatus
// ============================================================================

#[tokio::test]
async fn test_complete_moves_assignment_and_load_together() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();

    let updated = fx
        .coordinator
        .update_status(assignment.id, AssignmentStatus::Completed)
        .await
        .unwrap();

    assert_eq!(updated.status, AssignmentStatus::Completed);
    assert_eq!(fx.assignment(assignment.id).await.status, AssignmentStatus::Completed);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Completed);
}

#[tokio::test]
async fn test_cancel_moves_assignment_and_load_together() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();

    let updated = fx
        .coordinator
        .update_status(assignment.id, AssignmentStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(updated.status, AssignmentStatus::Cancelled);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Cancelled);

    let audit = fx.audit.events();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_type, "ASSIGNMENT_CANCELLED");
    assert_eq!(audit[0].payload["assignmentId"], assignment.id.to_string());
    assert_eq!(audit[0].payload["newStatus"], "CANCELLED");
}

#[tokio::test]
async fn test_terminal_assignment_cannot_be_updated() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();
    fx.coordinator
        .update_status(assignment.id, AssignmentStatus::Completed)
        .await
        .unwrap();

    for target in [AssignmentStatus::Cancelled, AssignmentStatus::Completed] {
        let err = fx
            .coordinator
            .update_status(assignment.id, target)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::InvalidState { ref reason }
                if reason == "only active assignments can be updated"
        ));
    }

    assert_eq!(fx.assignment(assignment.id).await.status, AssignmentStatus::Completed);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Completed);
    assert_eq!(fx.audit.events().len(), 1);
}

#[tokio::test]
async fn test_update_unknown_assignment() {
    let fx = Fixture::new();
    let err = fx
        .coordinator
        .update_status(Uuid::new_v4(), AssignmentStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotFound { entity: "assignment" }));
}

#[tokio::test]
async fn test_failed_transition_leaves_both_rows() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();
    fx.store.set_fail_writes(true);

    let err = fx
        .coordinator
        .update_status(assignment.id, AssignmentStatus::Completed)
        .await
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::Transaction(_)));
    assert_eq!(fx.assignment(assignment.id).await.status, AssignmentStatus::Assigned);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Assigned);
    assert!(fx.audit.events().is_empty());
}

// ============================================================================
// findOne
// ============================================================================

#[tokio::test]
async fn test_find_one_joins_driver_and_load() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();

    let details = fx.coordinator.find_one(assignment.id).await.unwrap();

    assert_eq!(details.assignment, assignment);
    assert_eq!(details.driver, driver);
    assert_eq!(details.load.id, load.id);
    assert_eq!(details.load.status, LoadStatus::Assigned);
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_second_load_for_same_driver() {
    let fx = Fixture::new();
    let d1 = fx.driver("D1");
    let l1 = fx.open_load();
    let l2 = fx.open_load();

    let result = fx.coordinator.create(d1.id, l1.id).await.unwrap();
    assert_eq!(result.status, AssignmentStatus::Assigned);
    assert_eq!(fx.load_status(l1.id).await, LoadStatus::Assigned);

    let err = fx.coordinator.create(d1.id, l2.id).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict { .. }));
}

#[tokio::test]
async fn test_scenario_complete_then_cancel() {
    let fx = Fixture::new();
    let d1 = fx.driver("D1");
    let l1 = fx.open_load();

    let result = fx.coordinator.create(d1.id, l1.id).await.unwrap();
    fx.coordinator
        .update_status(result.id, AssignmentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(fx.load_status(l1.id).await, LoadStatus::Completed);

    let err = fx
        .coordinator
        .update_status(result.id, AssignmentStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));
}

// ============================================================================
// Side effects
// ============================================================================

#[tokio::test]
async fn test_create_invalidates_cache_and_publishes() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    fx.cache
        .set(LOADS_ALL_KEY, "[]", Duration::from_secs(60))
        .await
        .unwrap();

    fx.coordinator.create(driver.id, load.id).await.unwrap();

    assert!(!fx.cache.contains(LOADS_ALL_KEY));
    assert_eq!(fx.bus.published(ASSIGNMENT_CREATED_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_cache_failure_does_not_alter_create() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    fx.cache.set_failing(true);

    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();

    assert_eq!(assignment.status, AssignmentStatus::Assigned);
    assert_eq!(fx.store.assignments(), vec![assignment]);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Assigned);
    // Publish still attempted
    assert_eq!(fx.bus.published(ASSIGNMENT_CREATED_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_every_side_effect_failing_does_not_alter_results() {
    let fx = Fixture::new();
    let driver = fx.driver("D1");
    let load = fx.open_load();
    fx.cache.set_failing(true);
    fx.bus.set_fail_publish(true);
    fx.audit.set_failing(true);

    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();
    let updated = fx
        .coordinator
        .update_status(assignment.id, AssignmentStatus::Completed)
        .await
        .unwrap();

    assert_eq!(updated.status, AssignmentStatus::Completed);
    assert_eq!(fx.load_status(load.id).await, LoadStatus::Completed);
    assert!(fx.audit.events().is_empty());
    assert!(fx.bus.published(ASSIGNMENT_CREATED_TOPIC).is_empty());
}

#[tokio::test]
async fn test_created_event_reaches_audit_through_worker() {
    let fx = Fixture::new();
    let config = EventsConfig {
        block_ms: 0,
        ..EventsConfig::default()
    };
    let worker = AuditWorker::new(fx.bus.clone(), fx.audit.clone(), &config);
    provision(fx.bus.as_ref(), worker.subscription()).await.unwrap();

    let driver = fx.driver("D1");
    let load = fx.open_load();
    let assignment = fx.coordinator.create(driver.id, load.id).await.unwrap();

    let outcome = worker.run_once().await.unwrap();
    assert_eq!(outcome.recorded, 1);

    let events = fx.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "ASSIGNED");
    assert_eq!(events[0].payload["assignmentId"], assignment.id.to_string());
    assert_eq!(events[0].payload["load"]["status"], "ASSIGNED");
}
