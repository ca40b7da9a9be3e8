//! Notification outbox: stage in the notification store, then publish.
//!
//! Staging is keyed by `(invariant, record id)`, so a re-run finds the row a
//! previous run created instead of adding a second one. A row is published
//! only while PENDING; once SENT it is never published again by this path.

use std::sync::Arc;

use tracing::{debug, warn};

use acadbatch_core::BatchError;
use acadbatch_events::{EventBus, NotificationEvent, NotificationKey, OutboundMessage, topics};
use acadbatch_stores::{Notification, NotificationStatus, NotificationStore};

/// Result of delivering one staged notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Bus refused the publish; the row stays PENDING for the sweeper.
    Deferred,
    /// Already delivered by an earlier run.
    AlreadySent,
}

#[derive(Clone)]
pub struct Outbox {
    notifications: Arc<dyn NotificationStore>,
    bus: Arc<dyn EventBus<OutboundMessage>>,
}

impl Outbox {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        bus: Arc<dyn EventBus<OutboundMessage>>,
    ) -> Self {
        Self { notifications, bus }
    }

    /// Insert-if-absent a PENDING notification for `event` under `key`.
    pub fn stage(&self, key: NotificationKey, event: &NotificationEvent) -> Result<Notification, BatchError> {
        let notification = Notification::pending(
            key,
            topics::NOTIFICATIONS,
            event.to_json()?,
            event.recipients.clone(),
        );
        let (stored, inserted) = self.notifications.insert_if_absent(notification)?;
        if !inserted {
            debug!(key = %stored.key, status = ?stored.status, "notification already staged");
        }
        Ok(stored)
    }

    /// Publish a staged notification and mark it SENT.
    ///
    /// A bus failure is not an error here: the row stays PENDING and the
    /// retry sweeper picks it up once it is stale.
    pub fn deliver(&self, notification: &Notification) -> Result<Delivery, BatchError> {
        if notification.status != NotificationStatus::Pending {
            return Ok(Delivery::AlreadySent);
        }
        match self.bus.publish(notification.to_message()) {
            Ok(()) => {
                self.notifications.mark_sent(notification.id)?;
                Ok(Delivery::Sent)
            }
            Err(e) => {
                warn!(key = %notification.key, error = %e, "notification publish failed; left pending");
                self.notifications.record_attempt(notification.id, &e.to_string())?;
                Ok(Delivery::Deferred)
            }
        }
    }
}
