//! Redis streams transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use ::redis::AsyncCommands;
use ::redis::aio::MultiplexedConnection;
use ::redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use serde_json::Value;
use tracing::debug;

use super::{DATA_FIELD, Delivery, EventBus, EventBusError, StreamConsumer};

/// Publishes events with `XADD <topic> * data <json>`.
#[derive(Clone)]
pub struct RedisStreamBus {
    pool: Pool,
}

impl RedisStreamBus {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<String, EventBusError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| EventBusError::Pool(e.to_string()))?;

        let data = serde_json::to_string(payload)?;
        let id: String = ::redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(&data)
            .query_async(&mut *conn)
            .await?;

        debug!(topic = %topic, message_id = %id, "Published event");
        Ok(id)
    }
}

/// Consumer-group reader for one subscription.
///
/// Blocking reads hold a dedicated connection rather than a pooled one.
pub struct RedisStreamConsumer {
    conn: MultiplexedConnection,
    topic: &'static str,
    group: &'static str,
    consumer: String,
    block: Duration,
}

impl RedisStreamConsumer {
    pub async fn connect(
        redis_url: &str,
        topic: &'static str,
        group: &'static str,
        consumer: impl Into<String>,
        block: Duration,
    ) -> Result<Self, EventBusError> {
        let client = ::redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            topic,
            group,
            consumer: consumer.into(),
            block,
        })
    }
}

fn delivery(entry: StreamId, deliveries: u64) -> Delivery {
    Delivery {
        data: entry.get::<String>(DATA_FIELD),
        id: entry.id,
        deliveries,
    }
}

#[async_trait]
impl StreamConsumer for RedisStreamConsumer {
    async fn ensure_group(&mut self) -> Result<(), EventBusError> {
        let created: Result<(), ::redis::RedisError> = ::redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.topic)
            .arg(self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_new(&mut self, count: usize) -> Result<Vec<Delivery>, EventBusError> {
        let options = StreamReadOptions::default()
            .group(self.group, &self.consumer)
            .count(count)
            .block(self.block.as_millis() as usize);

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[self.topic], &[">"], &options)
            .await?;

        Ok(reply
            .map(|r| {
                r.keys
                    .into_iter()
                    .flat_map(|k| k.ids)
                    .map(|entry| delivery(entry, 1))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn claim_pending(
        &mut self,
        count: usize,
        min_idle: Duration,
    ) -> Result<Vec<Delivery>, EventBusError> {
        let min_idle_ms = min_idle.as_millis() as usize;
        let pending: StreamPendingCountReply = ::redis::cmd("XPENDING")
            .arg(self.topic)
            .arg(self.group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .arg(&self.consumer)
            .query_async(&mut self.conn)
            .await?;
        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM bumps the delivery counter reported by XPENDING
        let counts: HashMap<String, u64> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered as u64 + 1))
            .collect();
        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = self
            .conn
            .xclaim(self.topic, self.group, &self.consumer, min_idle_ms, &ids)
            .await?;

        Ok(claimed
            .ids
            .into_iter()
            .map(|entry| {
                let deliveries = counts.get(&entry.id).copied().unwrap_or(1);
                delivery(entry, deliveries)
            })
            .collect())
    }

    async fn ack(&mut self, ids: &[String]) -> Result<(), EventBusError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: usize = ::redis::cmd("XACK")
            .arg(self.topic)
            .arg(self.group)
            .arg(ids)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}
