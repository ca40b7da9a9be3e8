//! Idempotent consumption of at-least-once deliveries.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::message::{NotificationKey, OutboundMessage};

/// Remembers which keys a consumer has already handled.
///
/// A consumer calls [`DeliveryLedger::accept`] for each delivery and only
/// acts when it returns `true`; re-deliveries of a known key are dropped.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    seen: Mutex<HashSet<NotificationKey>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a key is seen.
    pub fn accept(&self, message: &OutboundMessage) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.insert(message.key.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivery_is_treated_as_duplicate() {
        let ledger = DeliveryLedger::new();
        let msg = OutboundMessage::new(
            "t",
            NotificationKey::new("user-enrollment:1"),
            serde_json::json!({}),
        );
        assert!(ledger.accept(&msg));
        assert!(!ledger.accept(&msg.clone()));
        assert_eq!(ledger.len(), 1);
    }
}
