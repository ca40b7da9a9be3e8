//! `acadbatch-core`: shared building blocks for the batch-coordination engine.
//!
//! This crate contains **pure** primitives (no I/O): identifiers, run keys,
//! authorization roles and the error taxonomy every layer classifies into.

pub mod error;
pub mod id;
pub mod role;

pub use error::{BatchError, ErrorKind};
pub use id::{AccountId, DefenseId, EnrollmentId, ExecutionId, NotificationId, RunKey};
pub use role::Role;
