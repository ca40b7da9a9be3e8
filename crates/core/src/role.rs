use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Authorization role attached to an account.
///
/// Roles are opaque strings; the batch engine only manages the
/// candidate/graduate pair and leaves every other role untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ACTIVE_CANDIDATE: Role = Role(Cow::Borrowed("active-candidate"));
    pub const GRADUATE: Role = Role(Cow::Borrowed("graduate"));
    pub const ADMINISTRATOR: Role = Role(Cow::Borrowed("administrator"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
