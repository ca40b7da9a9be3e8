//! Notification store accessor: the outbox between reconciliation and the bus.
//!
//! ```text
//! insert_if_absent ──► PENDING ──publish ok──► SENT ──retention──► purged
//!                         │
//!                         └─stale + redelivery exhausted──► FAILED
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use acadbatch_core::{AccountId, NotificationId};
use acadbatch_events::{NotificationKey, OutboundMessage};

use crate::error::StoreError;
use crate::faults::Faults;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub key: NotificationKey,
    pub topic: String,
    pub payload: JsonValue,
    pub recipients: Vec<AccountId>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Notification {
    pub fn pending(
        key: NotificationKey,
        topic: impl Into<String>,
        payload: JsonValue,
        recipients: Vec<AccountId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NotificationId::new(),
            key,
            topic: topic.into(),
            payload,
            recipients,
            status: NotificationStatus::Pending,
            created_at: now,
            updated_at: now,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// The bus message this notification is delivered as.
    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage::new(self.topic.clone(), self.key.clone(), self.payload.clone())
    }
}

/// Notification store abstraction.
pub trait NotificationStore: Send + Sync {
    /// Insert unless a notification with the same key exists. Returns the
    /// stored row and whether it was newly inserted.
    fn insert_if_absent(&self, notification: Notification) -> Result<(Notification, bool), StoreError>;

    fn get_by_key(&self, key: &NotificationKey) -> Result<Option<Notification>, StoreError>;

    /// PENDING notifications created before `cutoff`, oldest first.
    fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Notification>, StoreError>;

    /// PENDING → SENT. `false` if the row is no longer PENDING.
    fn mark_sent(&self, id: NotificationId) -> Result<bool, StoreError>;

    /// PENDING → FAILED with the last delivery error.
    fn mark_failed(&self, id: NotificationId, error: &str) -> Result<bool, StoreError>;

    /// Count one delivery attempt that did not succeed; status is unchanged.
    fn record_attempt(&self, id: NotificationId, error: &str) -> Result<(), StoreError>;

    /// Delete SENT notifications last updated before `cutoff`.
    fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

impl<S> NotificationStore for Arc<S>
where
    S: NotificationStore + ?Sized,
{
    fn insert_if_absent(&self, notification: Notification) -> Result<(Notification, bool), StoreError> {
        (**self).insert_if_absent(notification)
    }

    fn get_by_key(&self, key: &NotificationKey) -> Result<Option<Notification>, StoreError> {
        (**self).get_by_key(key)
    }

    fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Notification>, StoreError> {
        (**self).pending_older_than(cutoff)
    }

    fn mark_sent(&self, id: NotificationId) -> Result<bool, StoreError> {
        (**self).mark_sent(id)
    }

    fn mark_failed(&self, id: NotificationId, error: &str) -> Result<bool, StoreError> {
        (**self).mark_failed(id, error)
    }

    fn record_attempt(&self, id: NotificationId, error: &str) -> Result<(), StoreError> {
        (**self).record_attempt(id, error)
    }

    fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).purge_sent_before(cutoff)
    }
}

#[derive(Debug, Default)]
struct Rows {
    by_id: HashMap<NotificationId, Notification>,
    by_key: HashMap<NotificationKey, NotificationId>,
}

/// In-memory notification store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    rows: RwLock<Rows>,
    faults: Faults,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub fn all(&self) -> Vec<Notification> {
        let mut all: Vec<_> = self.read().by_id.values().cloned().collect();
        all.sort_by_key(|n| (n.created_at, n.id));
        all
    }

    fn read(&self) -> RwLockReadGuard<'_, Rows> {
        self.rows.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rows> {
        self.rows.write().unwrap_or_else(|p| p.into_inner())
    }

    fn transition(&self, id: NotificationId, to: NotificationStatus, error: Option<&str>) -> Result<bool, StoreError> {
        self.faults.check("notification")?;
        let mut rows = self.write();
        match rows.by_id.get_mut(&id) {
            Some(n) if n.status == NotificationStatus::Pending => {
                n.status = to;
                n.updated_at = Utc::now();
                if let Some(error) = error {
                    n.last_error = Some(error.to_string());
                }
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("notification", id)),
        }
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn insert_if_absent(&self, notification: Notification) -> Result<(Notification, bool), StoreError> {
        self.faults.check("notification")?;
        let mut rows = self.write();
        if let Some(existing) = rows.by_key.get(&notification.key).and_then(|id| rows.by_id.get(id)) {
            return Ok((existing.clone(), false));
        }
        rows.by_key.insert(notification.key.clone(), notification.id);
        rows.by_id.insert(notification.id, notification.clone());
        Ok((notification, true))
    }

    fn get_by_key(&self, key: &NotificationKey) -> Result<Option<Notification>, StoreError> {
        self.faults.check("notification")?;
        let rows = self.read();
        Ok(rows.by_key.get(key).and_then(|id| rows.by_id.get(id)).cloned())
    }

    fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Notification>, StoreError> {
        self.faults.check("notification")?;
        let mut stale: Vec<_> = self
            .read()
            .by_id
            .values()
            .filter(|n| n.status == NotificationStatus::Pending && n.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|n| (n.created_at, n.id));
        Ok(stale)
    }

    fn mark_sent(&self, id: NotificationId) -> Result<bool, StoreError> {
        self.transition(id, NotificationStatus::Sent, None)
    }

    fn mark_failed(&self, id: NotificationId, error: &str) -> Result<bool, StoreError> {
        self.transition(id, NotificationStatus::Failed, Some(error))
    }

    fn record_attempt(&self, id: NotificationId, error: &str) -> Result<(), StoreError> {
        self.faults.check("notification")?;
        let mut rows = self.write();
        let n = rows
            .by_id
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("notification", id))?;
        n.attempts += 1;
        n.last_error = Some(error.to_string());
        n.updated_at = Utc::now();
        Ok(())
    }

    fn purge_sent_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.faults.check("notification")?;
        let mut rows = self.write();
        let doomed: Vec<_> = rows
            .by_id
            .values()
            .filter(|n| n.status == NotificationStatus::Sent && n.updated_at < cutoff)
            .map(|n| (n.id, n.key.clone()))
            .collect();
        for (id, key) in &doomed {
            rows.by_id.remove(id);
            rows.by_key.remove(key);
        }
        Ok(doomed.len())
    }
}
