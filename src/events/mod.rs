//! Event notification over Redis Streams
//!
//! Topics map to streams and subscriptions map to consumer groups:
//!
//! ```text
//! publish ──XADD──▶ stream "load.assigned" ──XREADGROUP──▶ group "load.assigned.worker"
//!                                                               │
//!                                                             XACK
//! ```
//!
//! Delivery is at-least-once. An entry read but never acknowledged stays in
//! the group's pending list and is handed back to the same consumer by
//! `redeliver` (XREADGROUP from id `0`), so consumers must tolerate duplicates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic carrying [`AssignmentCreatedEvent`](crate::models::AssignmentCreatedEvent) payloads
pub const ASSIGNMENT_CREATED_TOPIC: &str = "load.assigned";

/// Consumer group used by the audit worker
pub const ASSIGNMENT_WORKER_SUBSCRIPTION: &str = "load.assigned.worker";

/// Set listing every provisioned topic
const TOPICS_KEY: &str = "freightline:topics";

/// Stream field holding the JSON payload
const PAYLOAD_FIELD: &str = "payload";

/// Event stream errors
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event broker connection failed: {0}")]
    Connection(String),

    #[error("event broker command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("failed to decode event {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("subscription '{subscription}' does not exist on topic '{topic}'")]
    UnknownSubscription { topic: String, subscription: String },

    #[error("event broker rejected the request: {0}")]
    Rejected(String),
}

pub type EventResult<T> = Result<T, EventError>;

/// Event stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Redis URL of the stream broker
    pub redis_url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Topic for assignment-created events
    pub assignment_topic: String,

    /// Consumer group used by the worker
    pub worker_group: String,

    /// Consumer name inside the group
    pub consumer_name: String,

    /// Longest time a poll blocks waiting for entries, in milliseconds
    pub block_ms: u64,

    /// Maximum entries returned per poll
    pub batch_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            assignment_topic: ASSIGNMENT_CREATED_TOPIC.to_string(),
            worker_group: ASSIGNMENT_WORKER_SUBSCRIPTION.to_string(),
            consumer_name: "worker-1".to_string(),
            block_ms: 5000,
            batch_size: 16,
        }
    }
}

impl EventsConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("EVENTS_REDIS_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .unwrap_or(defaults.redis_url),
            pool_size: crate::config::env_parse("EVENTS_POOL_SIZE").unwrap_or(defaults.pool_size),
            assignment_topic: std::env::var("EVENTS_ASSIGNMENT_TOPIC")
                .unwrap_or(defaults.assignment_topic),
            worker_group: std::env::var("EVENTS_WORKER_GROUP").unwrap_or(defaults.worker_group),
            consumer_name: std::env::var("EVENTS_CONSUMER_NAME")
                .unwrap_or(defaults.consumer_name),
            block_ms: crate::config::env_parse("EVENTS_BLOCK_MS").unwrap_or(defaults.block_ms),
            batch_size: crate::config::env_parse("EVENTS_BATCH_SIZE")
                .unwrap_or(defaults.batch_size),
        }
    }

    /// Subscription the worker reads from
    pub fn worker_subscription(&self) -> Subscription {
        Subscription {
            topic: self.assignment_topic.clone(),
            group: self.worker_group.clone(),
            consumer: self.consumer_name.clone(),
        }
    }

    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

/// A consumer inside a subscription on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub group: String,
    pub consumer: String,
}

/// One delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Delivery identifier, used to acknowledge
    pub id: String,
    pub topic: String,
    pub payload: String,
}

impl Delivery {
    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> EventResult<T> {
        serde_json::from_str(&self.payload).map_err(|e| EventError::Decode {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Publishing side of the notifier
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Create the topic if missing. Idempotent.
    async fn ensure_topic(&self, topic: &str) -> EventResult<()>;

    /// Create the subscription if missing. Idempotent.
    async fn ensure_subscription(&self, topic: &str, subscription: &str) -> EventResult<()>;

    /// Publish a payload, returning its delivery identifier
    async fn publish(&self, topic: &str, payload: &str) -> EventResult<String>;
}

/// Consuming side of the notifier
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Read up to `max` new deliveries, waiting at most `block` for the first
    async fn poll(
        &self,
        subscription: &Subscription,
        max: usize,
        block: Duration,
    ) -> EventResult<Vec<Delivery>>;

    /// Deliveries already handed to this consumer and not yet acknowledged,
    /// oldest first. Never blocks.
    async fn redeliver(&self, subscription: &Subscription, max: usize)
        -> EventResult<Vec<Delivery>>;

    /// Acknowledge a delivery so it is not redelivered
    async fn ack(&self, subscription: &Subscription, delivery_id: &str) -> EventResult<()>;
}

pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Serialize `value` and publish it on `topic`
pub async fn publish_json<T: Serialize + Sync>(
    publisher: &dyn EventPublisher,
    topic: &str,
    value: &T,
) -> EventResult<String> {
    let payload = serde_json::to_string(value).map_err(|e| EventError::Encode(e.to_string()))?;
    publisher.publish(topic, &payload).await
}

// ============================================================================
// Redis Streams
// ============================================================================

/// Notifier backed by Redis Streams consumer groups
pub struct RedisStreamBus {
    pool: Pool,
    known_topics: RwLock<HashSet<String>>,
}

impl RedisStreamBus {
    /// Create a bus; connections are opened on first use
    pub fn new(config: &EventsConfig) -> EventResult<Self> {
        let pool = PoolConfig::from_url(&config.redis_url)
            .builder()
            .map_err(|e| EventError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| EventError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            known_topics: RwLock::new(HashSet::new()),
        })
    }

    async fn conn(&self) -> EventResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| EventError::Connection(e.to_string()))
    }

    async fn read_group(
        &self,
        subscription: &Subscription,
        from: &str,
        max: usize,
        block: Duration,
    ) -> EventResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let mut opts = StreamReadOptions::default()
            .group(&subscription.group, &subscription.consumer)
            .count(max);
        // BLOCK 0 would wait forever
        if !block.is_zero() {
            opts = opts.block(usize::try_from(block.as_millis()).unwrap_or(usize::MAX));
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[subscription.topic.as_str()], &[from], &opts)
            .await
            .map_err(|e| {
                if e.code() == Some("NOGROUP") {
                    EventError::UnknownSubscription {
                        topic: subscription.topic.clone(),
                        subscription: subscription.group.clone(),
                    }
                } else {
                    EventError::Command(e)
                }
            })?;

        let mut deliveries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                match entry.get::<String>(PAYLOAD_FIELD) {
                    Some(payload) => deliveries.push(Delivery {
                        id: entry.id.clone(),
                        topic: key.key.clone(),
                        payload,
                    }),
                    None => {
                        tracing::warn!(
                            delivery_id = %entry.id,
                            "Stream entry without payload field"
                        );
                    }
                }
            }
        }
        Ok(deliveries)
    }

    fn is_known(&self, topic: &str) -> bool {
        self.known_topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic)
    }
}

#[async_trait]
impl EventPublisher for RedisStreamBus {
    async fn ensure_topic(&self, topic: &str) -> EventResult<()> {
        if self.is_known(topic) {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let added: u64 = conn.sadd(TOPICS_KEY, topic).await?;
        if added > 0 {
            tracing::info!(topic = %topic, "Provisioned topic");
        }

        self.known_topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string());
        Ok(())
    }

    async fn ensure_subscription(&self, topic: &str, subscription: &str) -> EventResult<()> {
        self.ensure_topic(topic).await?;

        let mut conn = self.conn().await?;
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(topic, subscription, "$").await;

        match created {
            Ok(()) => {
                tracing::info!(
                    topic = %topic,
                    subscription = %subscription,
                    "Created subscription"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(&self, topic: &str, payload: &str) -> EventResult<String> {
        self.ensure_topic(topic).await?;

        let mut conn = self.conn().await?;
        let id: String = conn.xadd(topic, "*", &[(PAYLOAD_FIELD, payload)]).await?;

        tracing::debug!(topic = %topic, delivery_id = %id, "Published event");
        Ok(id)
    }
}

#[async_trait]
impl EventSubscriber for RedisStreamBus {
    async fn poll(
        &self,
        subscription: &Subscription,
        max: usize,
        block: Duration,
    ) -> EventResult<Vec<Delivery>> {
        self.read_group(subscription, ">", max, block).await
    }

    async fn redeliver(
        &self,
        subscription: &Subscription,
        max: usize,
    ) -> EventResult<Vec<Delivery>> {
        // Id 0 reads this consumer's own pending entries instead of new ones
        self.read_group(subscription, "0", max, Duration::ZERO).await
    }

    async fn ack(&self, subscription: &Subscription, delivery_id: &str) -> EventResult<()> {
        let mut conn = self.conn().await?;
        let _: u64 = conn
            .xack(&subscription.topic, &subscription.group, &[delivery_id])
            .await?;
        Ok(())
    }
}

// ============================================================================
// In-memory bus
// ============================================================================

#[derive(Default)]
struct GroupState {
    next: usize,
    /// Unacknowledged delivery id -> consumer it was handed to
    pending: HashMap<String, String>,
}

#[derive(Default)]
struct BusState {
    topics: HashSet<String>,
    streams: HashMap<String, Vec<(String, String)>>,
    groups: HashMap<(String, String), GroupState>,
}

/// Process-local bus for tests and `--in-memory` runs
#[derive(Default)]
pub struct MemoryEventBus {
    state: Mutex<BusState>,
    seq: AtomicU64,
    fail_publish: AtomicBool,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Payloads published on `topic`, oldest first
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.lock()
            .streams
            .get(topic)
            .map(|entries| entries.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries read but not yet acknowledged
    pub fn pending(&self, topic: &str, group: &str) -> usize {
        self.lock()
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map_or(0, |g| g.pending.len())
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.lock().topics.contains(topic)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn ensure_topic(&self, topic: &str) -> EventResult<()> {
        let mut state = self.lock();
        state.topics.insert(topic.to_string());
        state.streams.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn ensure_subscription(&self, topic: &str, subscription: &str) -> EventResult<()> {
        self.ensure_topic(topic).await?;
        let mut state = self.lock();
        let start = state.streams.get(topic).map_or(0, Vec::len);
        state
            .groups
            .entry((topic.to_string(), subscription.to_string()))
            .or_insert_with(|| GroupState {
                next: start,
                pending: HashMap::new(),
            });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> EventResult<String> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(EventError::Rejected("publish disabled".to_string()));
        }
        self.ensure_topic(topic).await?;

        let id = format!("{}-0", self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock()
            .streams
            .entry(topic.to_string())
            .or_default()
            .push((id.clone(), payload.to_string()));
        Ok(id)
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn poll(
        &self,
        subscription: &Subscription,
        max: usize,
        block: Duration,
    ) -> EventResult<Vec<Delivery>> {
        let deliveries = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let key = (subscription.topic.clone(), subscription.group.clone());
            let group = state
                .groups
                .get_mut(&key)
                .ok_or_else(|| EventError::UnknownSubscription {
                    topic: subscription.topic.clone(),
                    subscription: subscription.group.clone(),
                })?;
            let entries = state
                .streams
                .get(&subscription.topic)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let batch: Vec<Delivery> = entries
                .iter()
                .skip(group.next)
                .take(max)
                .map(|(id, payload)| Delivery {
                    id: id.clone(),
                    topic: subscription.topic.clone(),
                    payload: payload.clone(),
                })
                .collect();

            group.next += batch.len();
            group.pending.extend(
                batch
                    .iter()
                    .map(|d| (d.id.clone(), subscription.consumer.clone())),
            );
            batch
        };

        if deliveries.is_empty() {
            tokio::time::sleep(block).await;
        }
        Ok(deliveries)
    }

    async fn redeliver(
        &self,
        subscription: &Subscription,
        max: usize,
    ) -> EventResult<Vec<Delivery>> {
        let state = self.lock();
        let group = state
            .groups
            .get(&(subscription.topic.clone(), subscription.group.clone()))
            .ok_or_else(|| EventError::UnknownSubscription {
                topic: subscription.topic.clone(),
                subscription: subscription.group.clone(),
            })?;
        let entries = state
            .streams
            .get(&subscription.topic)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(entries
            .iter()
            .filter(|(id, _)| group.pending.get(id) == Some(&subscription.consumer))
            .take(max)
            .map(|(id, payload)| Delivery {
                id: id.clone(),
                topic: subscription.topic.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    async fn ack(&self, subscription: &Subscription, delivery_id: &str) -> EventResult<()> {
        let mut state = self.lock();
        if let Some(group) = state
            .groups
            .get_mut(&(subscription.topic.clone(), subscription.group.clone()))
        {
            group.pending.remove(delivery_id);
        }
        Ok(())
    }
}
