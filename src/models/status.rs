use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Queued,
    Processing,
    Sent,
    Failed,
    Retrying,
    Skipped,
    DeadLettered,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Queued => "queued",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Retrying => "retrying",
            NotificationStatus::Skipped => "skipped",
            NotificationStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(NotificationStatus::Queued),
            "processing" => Some(NotificationStatus::Processing),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            "retrying" => Some(NotificationStatus::Retrying),
            "skipped" => Some(NotificationStatus::Skipped),
            "dead_lettered" => Some(NotificationStatus::DeadLettered),
            _ => None,
        }
    }

    /// Lifecycle order, earliest first. Breaks ties between ledger writes
    /// stamped with the same `updated_at`.
    pub const LIFECYCLE: [NotificationStatus; 7] = [
        NotificationStatus::Queued,
        NotificationStatus::Processing,
        NotificationStatus::Failed,
        NotificationStatus::Retrying,
        NotificationStatus::Skipped,
        NotificationStatus::Sent,
        NotificationStatus::DeadLettered,
    ];

    pub fn rank(&self) -> usize {
        Self::LIFECYCLE
            .iter()
            .position(|status| status == self)
            .unwrap_or_default()
    }

    /// No consumer will move the row out of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Skipped | NotificationStatus::DeadLettered
        )
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ledger row, keyed by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub request_id: String,
    pub status: NotificationStatus,
    pub provider: String,
    pub detail: String,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(request_id: impl Into<String>, status: NotificationStatus) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            provider: String::new(),
            detail: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Whether `self` should replace `existing` under last-writer-wins.
    ///
    /// Equal timestamps fall back to lifecycle rank, then provider, then
    /// detail, so the surviving row does not depend on arrival order.
    pub fn supersedes(&self, existing: &StatusRecord) -> bool {
        (
            self.updated_at,
            self.status.rank(),
            &self.provider,
            &self.detail,
        ) >= (
            existing.updated_at,
            existing.status.rank(),
            &existing.provider,
            &existing.detail,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn string_form_round_trips_every_variant() {
        for status in [
            NotificationStatus::Queued,
            NotificationStatus::Processing,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
            NotificationStatus::Retrying,
            NotificationStatus::Skipped,
            NotificationStatus::DeadLettered,
        ] {
            assert_eq!(NotificationStatus::from_string(status.as_str()), Some(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
    }

    #[test]
    fn later_write_supersedes_earlier() {
        let now = Utc::now();
        let older = StatusRecord::new("R1", NotificationStatus::Retrying).at(now);
        let newer = StatusRecord::new("R1", NotificationStatus::Sent).at(now + Duration::seconds(1));

        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
    }

    #[test]
    fn equal_timestamps_resolve_the_same_way_in_either_order() {
        let now = Utc::now();
        let processing = StatusRecord::new("R1", NotificationStatus::Processing).at(now);
        let retrying = StatusRecord::new("R1", NotificationStatus::Retrying).at(now);

        assert!(retrying.supersedes(&processing));
        assert!(!processing.supersedes(&retrying));

        let first = StatusRecord::new("R1", NotificationStatus::Failed)
            .with_detail("timeout")
            .at(now);
        let second = StatusRecord::new("R1", NotificationStatus::Failed)
            .with_detail("connection reset")
            .at(now);
        assert_ne!(first.supersedes(&second), second.supersedes(&first));
    }

    #[test]
    fn every_status_has_a_distinct_rank() {
        let mut ranks: Vec<usize> = NotificationStatus::LIFECYCLE
            .iter()
            .map(NotificationStatus::rank)
            .collect();
        ranks.dedup();
        assert_eq!(ranks, (0..7).collect::<Vec<_>>());
    }
}
