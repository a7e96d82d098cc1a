//! Event Fan-out Workers.
//!
//! Each worker is bound to one subscription. A transient error leaves the
//! message unacknowledged so it is delivered again; a malformed message is
//! acknowledged and dropped. See [`runner`].

pub mod cdc;
pub mod features;
pub mod preferences;
pub mod runner;
pub mod users;

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::{StorageError, UserStorage};

use crate::cache::{CacheBackend, CacheError};
use crate::events::{EventBus, EventBusError, Message};
use crate::mailing::{MailingError, MailingList};
use crate::preferences::Namespace;

pub use cdc::CdcWorker;
pub use features::ClearFeaturesCache;
pub use preferences::UpdatePreferences;
pub use runner::{RunnerConfig, SubscriptionRunner};
pub use users::{DeleteUser, DeleteUserFromMailingList};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("mailing error: {0}")]
    Mailing(#[from] MailingError),
}

impl WorkerError {
    /// Errors that redelivering the same message cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, WorkerError::Payload(_) | WorkerError::MissingField(_))
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn topic(&self) -> &'static str;

    fn subscription(&self) -> &'static str;

    /// Messages handled concurrently by one consumer.
    fn max_in_flight(&self) -> usize {
        1
    }

    async fn handle(&self, message: &Message) -> Result<(), WorkerError>;
}

/// Handles shared by the workers.
#[derive(Clone)]
pub struct WorkerDeps {
    pub cache: CacheBackend,
    pub users: Arc<dyn UserStorage>,
    pub bus: Arc<dyn EventBus>,
    pub mailing: Arc<dyn MailingList>,
}

/// Every worker the background process runs.
pub fn registry(deps: &WorkerDeps) -> Vec<Arc<dyn Worker>> {
    vec![
        Arc::new(UpdatePreferences::new(Namespace::Alerts, deps.cache.clone())),
        Arc::new(UpdatePreferences::new(Namespace::Settings, deps.cache.clone())),
        Arc::new(ClearFeaturesCache::new(deps.cache.clone())),
        Arc::new(DeleteUser::new(deps.users.clone())),
        Arc::new(DeleteUserFromMailingList::new(deps.mailing.clone())),
        Arc::new(CdcWorker::new(deps.bus.clone())),
    ]
}
