//! Visit Tracker.
//!
//! Reads are best-effort and degrade to "no prior visit". Writes run on a
//! detached task after the response is built; their failure is only logged.

use std::sync::Arc;

use gatehouse_core::{AppPlatform, FirstVisit, UserStorage, VisitRecord, VisitStorage};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct VisitTracker {
    visits: Arc<dyn VisitStorage>,
    users: Arc<dyn UserStorage>,
}

impl VisitTracker {
    pub fn new(visits: Arc<dyn VisitStorage>, users: Arc<dyn UserStorage>) -> Self {
        Self { visits, users }
    }

    pub async fn first_visit(&self, tracking_id: &str) -> Option<FirstVisit> {
        match self.visits.first_visit_and_referral(tracking_id).await {
            Ok(visit) => visit,
            Err(e) => {
                tracing::warn!(tracking_id = %tracking_id, error = %e, "failed to read visit record");
                None
            }
        }
    }

    /// User id of the referrer named by a referral cookie (id or username).
    pub async fn resolve_referral(&self, referral: &str) -> Option<String> {
        match self.users.get_by_id_or_username(referral).await {
            Ok(user) => user.map(|u| u.id),
            Err(e) => {
                tracing::warn!(referral = %referral, error = %e, "failed to resolve referral");
                None
            }
        }
    }

    /// Upserts the visit record on a detached task.
    ///
    /// Returns `None` without spawning for platforms that are not tracked.
    pub fn record_detached(
        &self,
        tracking_id: String,
        app: &AppPlatform,
        now: OffsetDateTime,
        referral: Option<String>,
        ip: Option<String>,
    ) -> Option<JoinHandle<()>> {
        if !app.is_tracked() {
            return None;
        }
        let tracker = self.clone();
        let app = app.as_str().to_string();

        Some(tokio::spawn(async move {
            if let Err(e) = tracker.record(&tracking_id, app, now, referral, ip).await {
                tracing::error!(tracking_id = %tracking_id, error = %e, "failed to update visit");
            }
        }))
    }

    async fn record(
        &self,
        tracking_id: &str,
        app: String,
        now: OffsetDateTime,
        referral: Option<String>,
        ip: Option<String>,
    ) -> Result<(), gatehouse_core::StorageError> {
        let referral = match referral {
            Some(referral) => self.users.get_by_id_or_username(&referral).await?.map(|u| u.id),
            None => None,
        };
        let record = VisitRecord {
            tracking_id: tracking_id.to_string(),
            app,
            visited_at: now,
            first_visit: now,
            referral,
            ip,
        };
        self.visits.upsert(&record).await
    }
}
