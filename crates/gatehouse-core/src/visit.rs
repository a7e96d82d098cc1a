//! Visit attribution records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Client application a boot request came from (the `app` request header).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AppPlatform {
    Extension,
    Web,
    Other(String),
}

impl AppPlatform {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("extension") => AppPlatform::Extension,
            Some("web") => AppPlatform::Web,
            Some(other) => AppPlatform::Other(other.to_string()),
            None => AppPlatform::Other(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AppPlatform::Extension => "extension",
            AppPlatform::Web => "web",
            AppPlatform::Other(name) => name,
        }
    }

    /// Only the extension and the web app get visit records.
    pub fn is_tracked(&self) -> bool {
        matches!(self, AppPlatform::Extension | AppPlatform::Web)
    }
}

/// Visit row keyed by `(tracking_id, app)`.
///
/// `first_visit` and `referral` are write-once: an upsert against an existing
/// row only moves `visited_at` and `ip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub tracking_id: String,
    pub app: String,
    #[serde(with = "time::serde::rfc3339")]
    pub visited_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub first_visit: OffsetDateTime,
    pub referral: Option<String>,
    pub ip: Option<String>,
}

impl VisitRecord {
    /// Apply a later write to this record, keeping the write-once fields.
    pub fn merge_later(&mut self, later: &VisitRecord) {
        self.visited_at = later.visited_at;
        self.ip = later.ip.clone();
    }
}

/// Earliest attribution known for a tracking id, across all apps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstVisit {
    pub first_visit: OffsetDateTime,
    pub referral: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn only_extension_and_web_are_tracked() {
        assert!(AppPlatform::from_header(Some("extension")).is_tracked());
        assert!(AppPlatform::from_header(Some("web")).is_tracked());
        assert!(!AppPlatform::from_header(Some("companion")).is_tracked());
        assert!(!AppPlatform::from_header(None).is_tracked());
    }

    #[test]
    fn merge_later_preserves_write_once_fields() {
        let mut record = VisitRecord {
            tracking_id: "t1".into(),
            app: "web".into(),
            visited_at: datetime!(2020-01-21 21:44:16 UTC),
            first_visit: datetime!(2020-01-21 21:44:16 UTC),
            referral: Some("1".into()),
            ip: Some("10.0.0.1".into()),
        };
        let later = VisitRecord {
            tracking_id: "t1".into(),
            app: "web".into(),
            visited_at: datetime!(2021-06-01 08:00:00 UTC),
            first_visit: datetime!(2021-06-01 08:00:00 UTC),
            referral: Some("2".into()),
            ip: Some("10.0.0.2".into()),
        };

        record.merge_later(&later);

        assert_eq!(record.visited_at, later.visited_at);
        assert_eq!(record.ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(record.first_visit, datetime!(2020-01-21 21:44:16 UTC));
        assert_eq!(record.referral.as_deref(), Some("1"));
    }
}
