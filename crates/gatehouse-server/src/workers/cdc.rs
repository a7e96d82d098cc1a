//! Change-data-capture dispatcher.
//!
//! Routes Debezium change events by source table. Tables without a handler
//! are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::{Worker, WorkerError};
use crate::events::{CDC_TOPIC, EventBus, Message, NEW_ELIGIBLE_PARTICIPANT_TOPIC};

const HEARTBEAT_SCHEMA: &str = "io.debezium.connector.common.Heartbeat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ChangeOp {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    /// Snapshot read
    #[serde(rename = "r")]
    Read,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ChangeEvent {
    pub payload: ChangePayload,
}

#[derive(Debug, Deserialize)]
pub struct ChangePayload {
    #[serde(default)]
    pub before: Option<Map<String, Value>>,
    #[serde(default)]
    pub after: Option<Map<String, Value>>,
    pub op: ChangeOp,
    pub source: ChangeSource,
}

#[derive(Debug, Deserialize)]
pub struct ChangeSource {
    #[serde(default)]
    pub table: Option<String>,
}

pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Renames the top-level keys of a row to camelCase.
pub fn camel_case_row(row: Map<String, Value>) -> Map<String, Value> {
    row.into_iter()
        .map(|(key, value)| (snake_to_camel(&key), value))
        .collect()
}

fn is_heartbeat(raw: &Value) -> bool {
    raw.pointer("/schema/name").and_then(Value::as_str) == Some(HEARTBEAT_SCHEMA)
}

fn flag(row: Option<&Map<String, Value>>, name: &str) -> bool {
    row.and_then(|r| r.get(name))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub struct CdcWorker {
    bus: Arc<dyn EventBus>,
}

impl CdcWorker {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    async fn dispatch(&self, payload: ChangePayload) -> Result<(), WorkerError> {
        let ChangePayload {
            before,
            after,
            op,
            source,
        } = payload;
        let before = before.map(camel_case_row);
        let after = after.map(camel_case_row);

        match source.table.as_deref() {
            Some("referral_participants") => {
                self.on_referral_participant(op, before.as_ref(), after).await
            }
            table => {
                debug!(table = ?table, "no handler for table");
                Ok(())
            }
        }
    }

    async fn on_referral_participant(
        &self,
        op: ChangeOp,
        before: Option<&Map<String, Value>>,
        after: Option<Map<String, Value>>,
    ) -> Result<(), WorkerError> {
        if op != ChangeOp::Update {
            return Ok(());
        }
        let Some(after) = after else {
            return Ok(());
        };
        if !flag(before, "eligible") && flag(Some(&after), "eligible") {
            self.bus
                .publish(NEW_ELIGIBLE_PARTICIPANT_TOPIC, &Value::Object(after))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for CdcWorker {
    fn topic(&self) -> &'static str {
        CDC_TOPIC
    }

    fn subscription(&self) -> &'static str {
        "gateway-cdc"
    }

    fn max_in_flight(&self) -> usize {
        10
    }

    async fn handle(&self, message: &Message) -> Result<(), WorkerError> {
        let raw: Value = message.json()?;
        if is_heartbeat(&raw) {
            return Ok(());
        }

        let result = match serde_json::from_value::<ChangeEvent>(raw) {
            Ok(event) => self.dispatch(event.payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            error!(error = %e, "failed to handle cdc message");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::events::InMemoryEventBus;

    fn change(table: &str, op: &str, before: Value, after: Value) -> Message {
        Message::new(
            "1-0",
            json!({
                "schema": { "type": "struct", "name": "gateway.public.changes.Envelope" },
                "payload": {
                    "before": before,
                    "after": after,
                    "op": op,
                    "source": { "db": "gateway", "table": table }
                }
            })
            .to_string(),
        )
    }

    fn worker() -> (Arc<InMemoryEventBus>, CdcWorker) {
        let bus = Arc::new(InMemoryEventBus::new());
        (bus.clone(), CdcWorker::new(bus))
    }

    #[tokio::test]
    async fn eligibility_transition_publishes_once() {
        let (bus, worker) = worker();
        let message = change(
            "referral_participants",
            "u",
            json!({ "referral_id": "r1", "user_id": "1", "eligible": false }),
            json!({ "referral_id": "r1", "user_id": "1", "eligible": true }),
        );

        worker.handle(&message).await.unwrap();

        assert_eq!(
            bus.published_to(NEW_ELIGIBLE_PARTICIPANT_TOPIC),
            vec![json!({ "referralId": "r1", "userId": "1", "eligible": true })]
        );
    }

    #[tokio::test]
    async fn non_eligible_update_publishes_nothing() {
        let (bus, worker) = worker();
        worker
            .handle(&change(
                "referral_participants",
                "u",
                json!({ "user_id": "1", "eligible": false, "points": 1 }),
                json!({ "user_id": "1", "eligible": false, "points": 2 }),
            ))
            .await
            .unwrap();
        worker
            .handle(&change(
                "referral_participants",
                "u",
                json!({ "user_id": "1", "eligible": true }),
                json!({ "user_id": "1", "eligible": true }),
            ))
            .await
            .unwrap();
        worker
            .handle(&change(
                "referral_participants",
                "c",
                Value::Null,
                json!({ "user_id": "1", "eligible": true }),
            ))
            .await
            .unwrap();

        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_is_discarded() {
        let (bus, worker) = worker();
        let message = Message::new(
            "1-0",
            json!({
                "schema": { "name": "io.debezium.connector.common.Heartbeat" },
                "payload": { "ts_ms": 1 }
            })
            .to_string(),
        );
        worker.handle(&message).await.unwrap();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn unknown_table_and_op_are_ignored() {
        let (bus, worker) = worker();
        worker
            .handle(&change("posts", "u", json!({}), json!({ "id": "p" })))
            .await
            .unwrap();
        worker
            .handle(&change("referral_participants", "t", Value::Null, Value::Null))
            .await
            .unwrap();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn malformed_message_is_an_error() {
        let (_, worker) = worker();
        assert!(worker.handle(&Message::new("1-0", "not json")).await.is_err());
        assert!(worker.handle(&Message::new("1-0", r#"{"payload":{}}"#)).await.is_err());
    }

    #[test]
    fn snake_case_keys_become_camel_case() {
        assert_eq!(snake_to_camel("referral_id"), "referralId");
        assert_eq!(snake_to_camel("created_at_ms"), "createdAtMs");
        assert_eq!(snake_to_camel("id"), "id");
        assert_eq!(snake_to_camel("_private"), "private");
    }
}
