//! Drives one worker from its Redis stream consumer group.
//!
//! ## Delivery
//!
//! 1. Read up to `max_in_flight` new entries (`>`) and handle them concurrently
//! 2. Collect successes and `XACK` them every `ack_window`, and once the batch
//!    is done
//! 3. Leave transient failures pending. Every `redelivery_delay` the consumer
//!    claims its own pending entries that have been idle that long and
//!    handles them again, between reads of new entries
//! 4. Acknowledge malformed messages right away, and drop an entry once it
//!    has been delivered `max_deliveries` times
//!
//! On startup the consumer first drains its pending entries, then switches to
//! new entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

use super::Worker;
use crate::config::AppConfig;
use crate::events::{Delivery, EventBusError, Message, RedisStreamConsumer, StreamConsumer};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub redis_url: String,
    pub consumer_name: String,
    pub block: Duration,
    pub ack_window: Duration,
    pub redelivery_delay: Duration,
    pub max_deliveries: u64,
    /// In-flight caps keyed by subscription, over the worker's default
    pub max_in_flight: HashMap<String, usize>,
}

impl RunnerConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            redis_url: config.redis.url.clone(),
            consumer_name: config.workers.consumer_name.clone(),
            block: Duration::from_millis(config.workers.block_ms),
            ack_window: Duration::from_millis(config.workers.ack_window_ms),
            redelivery_delay: Duration::from_millis(config.workers.redelivery_delay_ms),
            max_deliveries: config.workers.max_deliveries.max(1),
            max_in_flight: config.workers.max_in_flight.clone(),
        }
    }
}

/// What happens to an entry once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ack,
    Retry,
}

pub struct SubscriptionRunner {
    worker: Arc<dyn Worker>,
    config: Arc<RunnerConfig>,
}

impl SubscriptionRunner {
    pub fn new(worker: Arc<dyn Worker>, config: Arc<RunnerConfig>) -> Self {
        Self { worker, config }
    }

    pub fn max_in_flight(&self) -> usize {
        self.config
            .max_in_flight
            .get(self.worker.subscription())
            .copied()
            .unwrap_or_else(|| self.worker.max_in_flight())
            .max(1)
    }

    /// Runs until aborted, reconnecting with exponential backoff.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match self.run().await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        error!(
                            subscription = self.worker.subscription(),
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Subscription error, reconnecting..."
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<(), EventBusError> {
        let mut consumer = RedisStreamConsumer::connect(
            &self.config.redis_url,
            self.worker.topic(),
            self.worker.subscription(),
            self.config.consumer_name.clone(),
            self.config.block,
        )
        .await?;
        self.consume(&mut consumer).await
    }

    /// Drains pending entries, then alternates between new entries and
    /// redelivery of failed ones. Returns only on a transport error.
    pub async fn consume<C: StreamConsumer>(&self, consumer: &mut C) -> Result<(), EventBusError> {
        consumer.ensure_group().await?;
        info!(
            subscription = self.worker.subscription(),
            topic = self.worker.topic(),
            max_in_flight = self.max_in_flight(),
            "subscribing"
        );

        self.redeliver(consumer, Duration::ZERO).await?;
        let mut next_redelivery = Instant::now() + self.config.redelivery_delay;
        loop {
            if Instant::now() >= next_redelivery {
                self.redeliver(consumer, self.config.redelivery_delay).await?;
                next_redelivery = Instant::now() + self.config.redelivery_delay;
            }
            self.poll_new(consumer).await?;
        }
    }

    /// Reads and handles one batch of new entries.
    pub async fn poll_new<C: StreamConsumer>(&self, consumer: &mut C) -> Result<(), EventBusError> {
        let entries = consumer.read_new(self.max_in_flight()).await?;
        if !entries.is_empty() {
            self.process(consumer, entries).await?;
        }
        Ok(())
    }

    /// Handles this consumer's pending entries idle for at least `min_idle`.
    ///
    /// Stops at the first batch with a failure; those entries come back on
    /// the next round.
    pub async fn redeliver<C: StreamConsumer>(
        &self,
        consumer: &mut C,
        min_idle: Duration,
    ) -> Result<(), EventBusError> {
        loop {
            let entries = consumer.claim_pending(self.max_in_flight(), min_idle).await?;
            if entries.is_empty() {
                return Ok(());
            }
            if self.process(consumer, entries).await? {
                return Ok(());
            }
        }
    }

    /// Handles a batch concurrently. Returns whether any entry is left
    /// pending.
    async fn process<C: StreamConsumer>(
        &self,
        consumer: &mut C,
        entries: Vec<Delivery>,
    ) -> Result<bool, EventBusError> {
        let mut in_flight: FuturesUnordered<_> =
            entries.into_iter().map(|e| self.handle_entry(e)).collect();
        let mut acks = Vec::new();
        let mut retried = false;

        let mut window = tokio::time::interval(self.config.ack_window);
        window.tick().await;

        loop {
            tokio::select! {
                next = in_flight.next() => match next {
                    Some((id, Outcome::Ack)) => acks.push(id),
                    Some((_, Outcome::Retry)) => retried = true,
                    None => break,
                },
                _ = window.tick() => flush(consumer, &mut acks).await?,
            }
        }
        flush(consumer, &mut acks).await?;
        Ok(retried)
    }

    async fn handle_entry(&self, entry: Delivery) -> (String, Outcome) {
        let span = info_span!(
            "message",
            subscription = self.worker.subscription(),
            message_id = %entry.id,
            deliveries = entry.deliveries
        );
        async move {
            let Some(data) = entry.data else {
                warn!("entry without a data field, acknowledging");
                return (entry.id, Outcome::Ack);
            };
            if entry.deliveries > self.config.max_deliveries {
                error!(
                    data = %data,
                    max_deliveries = self.config.max_deliveries,
                    "giving up on message, acknowledging"
                );
                return (entry.id, Outcome::Ack);
            }

            let message = Message::new(entry.id, data);
            match self.worker.handle(&message).await {
                Ok(()) => (message.id, Outcome::Ack),
                Err(e) if e.is_permanent() => {
                    error!(error = %e, data = %message.data, "dropping malformed message");
                    (message.id, Outcome::Ack)
                }
                Err(e) => {
                    error!(error = %e, data = %message.data, "failed to process message");
                    (message.id, Outcome::Retry)
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn flush<C: StreamConsumer>(
    consumer: &mut C,
    acks: &mut Vec<String>,
) -> Result<(), EventBusError> {
    if acks.is_empty() {
        return Ok(());
    }
    consumer.ack(acks).await?;
    acks.clear();
    Ok(())
}
