//! Outbound message shapes published by batch steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use acadbatch_core::AccountId;

/// Well-known topics.
pub mod topics {
    /// User-facing notifications (anomaly notices, reminders).
    pub const NOTIFICATIONS: &str = "academic.notifications";
    /// Aggregated job reports.
    pub const REPORTS: &str = "batch.reports";
}

/// Deterministic deduplication key for a message.
///
/// Derived only from stable facts (invariant name + record id), so a step
/// that is re-run after a partial failure produces the same key and a
/// consumer can drop the repeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationKey(String);

impl NotificationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for the notice emitted about one invariant violation.
    pub fn for_violation(invariant: &str, record_id: impl core::fmt::Display) -> Self {
        Self(format!("{invariant}:{record_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Severity carried in every payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

/// Payload of a user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: String,
    pub record_ids: Vec<String>,
    pub corrective_action: Option<String>,
    pub severity: Severity,
    pub recipients: Vec<AccountId>,
    pub detail: String,
}

impl NotificationEvent {
    pub fn new(event_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            event_type: event_type.into(),
            record_ids: Vec::new(),
            corrective_action: None,
            severity,
            recipients: Vec::new(),
            detail: String::new(),
        }
    }

    pub fn with_record(mut self, id: impl core::fmt::Display) -> Self {
        self.record_ids.push(id.to_string());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.corrective_action = Some(action.into());
        self
    }

    pub fn with_recipients(mut self, recipients: impl IntoIterator<Item = AccountId>) -> Self {
        self.recipients.extend(recipients);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A message as handed to the bus: `publish(topic, key, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: NotificationKey,
    pub payload: JsonValue,
    pub published_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, key: NotificationKey, payload: JsonValue) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
            published_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_keys_are_deterministic() {
        let id = AccountId::new();
        assert_eq!(
            NotificationKey::for_violation("user-enrollment", id),
            NotificationKey::for_violation("user-enrollment", id)
        );
        assert_ne!(
            NotificationKey::for_violation("user-enrollment", id),
            NotificationKey::for_violation("defense-enrollment", id)
        );
    }

    #[test]
    fn event_serializes_with_snake_case_severity() {
        let json = NotificationEvent::new("anomaly", Severity::High)
            .with_record("E-1")
            .with_action("SUSPEND")
            .to_json()
            .unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["record_ids"][0], "E-1");
        assert_eq!(json["corrective_action"], "SUSPEND");
    }
}
