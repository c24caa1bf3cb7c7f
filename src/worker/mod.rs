//! Assignment event consumer
//!
//! Reads the assignment-created topic through its own subscription and
//! appends an `ASSIGNED` audit event for every message. A message is
//! acknowledged only after its audit event is stored; anything that fails
//! stays pending and is delivered again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditError, AuditEvent, SharedAuditSink};
use crate::events::{
    Delivery, EventError, EventPublisher, EventSubscriber, EventsConfig, Subscription,
};
use crate::metrics;
use crate::models::AssignmentCreatedEvent;

/// Pause after a failed poll before trying again
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Failure handling a single delivery
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Result of one poll cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub recorded: usize,
    pub failed: usize,
}

/// Create the topic and the worker's subscription if they do not exist
pub async fn provision(
    publisher: &dyn EventPublisher,
    subscription: &Subscription,
) -> Result<(), EventError> {
    publisher.ensure_topic(&subscription.topic).await?;
    publisher
        .ensure_subscription(&subscription.topic, &subscription.group)
        .await?;
    info!(
        topic = %subscription.topic,
        subscription = %subscription.group,
        "Worker subscription ready"
    );
    Ok(())
}

/// Records assignment-created events in the audit trail
pub struct AuditWorker {
    subscriber: Arc<dyn EventSubscriber>,
    audit: SharedAuditSink,
    subscription: Subscription,
    batch_size: usize,
    block: Duration,
}

impl AuditWorker {
    pub fn new(
        subscriber: Arc<dyn EventSubscriber>,
        audit: SharedAuditSink,
        config: &EventsConfig,
    ) -> Self {
        Self {
            subscriber,
            audit,
            subscription: config.worker_subscription(),
            batch_size: config.batch_size.max(1),
            block: config.block(),
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Retry this consumer's unacknowledged deliveries, then poll for new ones,
    /// and handle every delivery in the batch
    pub async fn run_once(&self) -> Result<BatchOutcome, EventError> {
        let mut deliveries = self
            .subscriber
            .redeliver(&self.subscription, self.batch_size)
            .await?;
        if !deliveries.is_empty() {
            debug!(count = deliveries.len(), "Retrying unacknowledged deliveries");
        }

        let room = self.batch_size.saturating_sub(deliveries.len());
        if room > 0 {
            deliveries.extend(
                self.subscriber
                    .poll(&self.subscription, room, self.block)
                    .await?,
            );
        }

        let mut outcome = BatchOutcome::default();
        for delivery in &deliveries {
            match self.handle(delivery).await {
                Ok(()) => {
                    outcome.recorded += 1;
                    metrics::record_event_consumed();
                }
                Err(e) => {
                    outcome.failed += 1;
                    let stage = match &e {
                        WorkerError::Event(EventError::Decode { .. }) => "decode",
                        WorkerError::Event(_) => "ack",
                        WorkerError::Audit(_) => "audit",
                    };
                    metrics::record_worker_failure(stage);
                    error!(
                        delivery_id = %delivery.id,
                        stage,
                        error = %e,
                        "Failed to record assignment event; left unacknowledged"
                    );
                }
            }
        }
        Ok(outcome)
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), WorkerError> {
        let event: AssignmentCreatedEvent = delivery.decode()?;
        self.audit.append(&AuditEvent::assigned(&event)).await?;
        self.subscriber.ack(&self.subscription, &delivery.id).await?;

        debug!(
            delivery_id = %delivery.id,
            assignment_id = %event.assignment_id,
            "Assignment event recorded"
        );
        Ok(())
    }

    /// Consume until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(
            topic = %self.subscription.topic,
            subscription = %self.subscription.group,
            consumer = %self.subscription.consumer,
            "Worker started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.run_once() => {
                    if let Err(e) = result {
                        metrics::record_worker_failure("poll");
                        warn!(error = %e, "Poll failed, retrying");
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }

        info!("Worker stopped");
    }
}
