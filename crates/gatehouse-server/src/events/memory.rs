use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{EventBus, EventBusError};

/// Keeps every published event in memory, in publish order.
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<(String, Value)>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<String, EventBusError> {
        let mut published = self.published.lock();
        published.push((topic.to_string(), payload.clone()));
        Ok(format!("{}-0", published.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_by_topic() {
        let bus = InMemoryEventBus::new();
        bus.publish("a", &json!({ "n": 1 })).await.unwrap();
        bus.publish("b", &json!({ "n": 2 })).await.unwrap();
        bus.publish("a", &json!({ "n": 3 })).await.unwrap();

        assert_eq!(bus.published().len(), 3);
        assert_eq!(bus.published_to("a"), vec![json!({ "n": 1 }), json!({ "n": 3 })]);
    }
}
