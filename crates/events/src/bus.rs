//! Message publishing/subscription abstraction (mechanics only).
//!
//! Batch steps publish notifications and report events through an
//! [`EventBus`]. The bus is the only channel by which a step reaches users.
//!
//! ## Delivery Guarantees
//!
//! The engine assumes **at-least-once delivery**:
//! - A step re-executed after a partial failure may publish the same message again
//! - Every message carries a deterministic key; consumers treat a repeated key as a duplicate
//! - Exactly-once is not provided and not required
//!
//! ## Error Handling
//!
//! `publish()` can fail (broker down, queue full). The failure is surfaced as a
//! [`BusError`] whose [`ErrorKind`] drives the caller's retry policy. Callers that
//! own an outbox (the reconciler) leave the message pending for a later sweep.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use acadbatch_core::{BatchError, ErrorKind};
use thiserror::Error;

/// A subscription to a message stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Collect everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Bus failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The broker could not accept the message right now.
    #[error("message bus unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected the message itself (too large, bad topic).
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Publish failed due to internal lock poisoning.
    #[error("message bus poisoned")]
    Poisoned,
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::Unavailable(_) => ErrorKind::MessageBusUnavailable,
            BusError::Rejected(_) => ErrorKind::MalformedInput,
            BusError::Poisoned => ErrorKind::Unclassified,
        }
    }
}

impl From<BusError> for BatchError {
    fn from(err: BusError) -> Self {
        BatchError::new(err.kind(), err.to_string())
    }
}

/// Transport-agnostic pub/sub bus.
///
/// The trait requires `Send + Sync`: several job executions publish
/// concurrently through one shared bus.
pub trait EventBus<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
