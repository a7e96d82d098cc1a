//! Event bus.
//!
//! Topics are Redis streams and subscriptions are consumer groups on them.
//! [`memory::InMemoryEventBus`] records publishes for tests and single-process
//! runs.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use memory::InMemoryEventBus;
pub use redis::{RedisStreamBus, RedisStreamConsumer};

pub const ALERTS_UPDATED_TOPIC: &str = "alerts-updated";
pub const SETTINGS_UPDATED_TOPIC: &str = "settings-updated";
pub const FEATURES_RESET_TOPIC: &str = "features-reset";
pub const USER_DELETED_TOPIC: &str = "user-deleted";
pub const CDC_TOPIC: &str = "gateway.changes";
pub const NEW_ELIGIBLE_PARTICIPANT_TOPIC: &str = "new-eligible-participant";

/// Stream entry field carrying the JSON payload.
pub const DATA_FIELD: &str = "data";

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `payload` to `topic` and returns the message id.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<String, EventBusError>;
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub data: String,
}

impl Message {
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// An entry handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    /// `None` when the entry has no `data` field
    pub data: Option<String>,
    /// Times the entry has been delivered, this delivery included
    pub deliveries: u64,
}

impl Delivery {
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Some(data.into()),
            deliveries: 1,
        }
    }
}

/// One consumer of a subscription's consumer group.
///
/// Entries stay pending for this consumer until acknowledged.
#[async_trait]
pub trait StreamConsumer: Send {
    /// Creates the consumer group if it does not exist yet.
    async fn ensure_group(&mut self) -> Result<(), EventBusError>;

    /// Entries never delivered to the group, at most `count`.
    async fn read_new(&mut self, count: usize) -> Result<Vec<Delivery>, EventBusError>;

    /// Takes back up to `count` of this consumer's pending entries that have
    /// been idle for at least `min_idle`.
    async fn claim_pending(
        &mut self,
        count: usize,
        min_idle: Duration,
    ) -> Result<Vec<Delivery>, EventBusError>;

    async fn ack(&mut self, ids: &[String]) -> Result<(), EventBusError>;
}
