//! Store accessors for the independently owned academic stores.
//!
//! One accessor trait per store; no operation spans two stores. Writes that
//! repair cross-store drift are predicate-guarded ("only while still in
//! status X") so repeating them is harmless.

pub mod account;
pub mod artifacts;
pub mod defense;
pub mod enrollment;
pub mod error;
pub mod faults;
pub mod notification;
pub mod references;

pub use account::{Account, AccountStore, InMemoryAccountStore};
pub use artifacts::{ArtifactStorage, DEFAULT_QUARANTINE_DIR};
pub use defense::{DefenseOutcome, DefenseRequest, DefenseStatus, DefenseStore, InMemoryDefenseStore};
pub use enrollment::{
    Enrollment, EnrollmentStatus, EnrollmentStore, EnrollmentTransition, InMemoryEnrollmentStore,
    StatusTransition,
};
pub use error::StoreError;
pub use faults::Faults;
pub use notification::{InMemoryNotificationStore, Notification, NotificationStatus, NotificationStore};
pub use references::{PathReferenceSource, StaticReferences};
