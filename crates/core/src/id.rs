//! Strongly-typed identifiers used across stores and executions.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BatchError;

/// Identifier of an enrollment record (enrollment store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrollmentId(Uuid);

/// Identifier of a defense request (defense store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefenseId(Uuid);

/// Identifier of a user account (account store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

/// Identifier of an outbound notification (notification store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

/// Identifier of one job execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = BatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| BatchError::malformed(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(EnrollmentId, "EnrollmentId");
impl_uuid_newtype!(DefenseId, "DefenseId");
impl_uuid_newtype!(AccountId, "AccountId");
impl_uuid_newtype!(NotificationId, "NotificationId");
impl_uuid_newtype!(ExecutionId, "ExecutionId");

/// Key distinguishing one intended execution of a job from another.
///
/// Scheduler-fired runs derive it from the trigger timestamp, so repeated
/// triggers of the same job never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(String);

impl RunKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Millisecond-resolution key from a trigger instant, e.g. `20240131T020000.000Z`.
    pub fn from_trigger(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y%m%dT%H%M%S%.3fZ").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RunKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_key_from_trigger_is_stable() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 2, 0, 0).unwrap();
        assert_eq!(RunKey::from_trigger(at).as_str(), "20240131T020000.000Z");
    }

    #[test]
    fn distinct_trigger_instants_give_distinct_keys() {
        let a = Utc.with_ymd_and_hms(2024, 1, 31, 2, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        assert_ne!(RunKey::from_trigger(a), RunKey::from_trigger(b));
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<AccountId>().unwrap_err();
        assert!(err.message().starts_with("AccountId"));
    }
}
