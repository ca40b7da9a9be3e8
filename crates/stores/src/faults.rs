//! Fault injection for in-memory stores.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::StoreError;

/// Queued failures and an outage switch consulted before every store
/// operation.
#[derive(Debug, Default)]
pub struct Faults {
    queued: Mutex<VecDeque<StoreError>>,
    unavailable: AtomicBool,
}

impl Faults {
    /// Fail the next operation with `err`. Queued errors are returned in order.
    pub fn fail_next(&self, err: StoreError) {
        self.queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(err);
    }

    /// While `true`, every operation fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn check(&self, store: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{store} store is unreachable")));
        }
        match self.queued.lock().unwrap_or_else(|p| p.into_inner()).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
