//! Role synchronization: derive candidate/graduate roles from records.
//!
//! | state                                   | active-candidate | graduate |
//! |-----------------------------------------|------------------|----------|
//! | passed, completed defense               | removed          | added    |
//! | VALIDATED enrollment, no passed defense | added            | kept     |
//! | neither                                 | removed          | kept     |
//!
//! Only the delta is written; every other role on the account is left alone.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use acadbatch_core::{BatchError, Role};
use acadbatch_stores::{Account, AccountStore, DefenseStore, EnrollmentStatus, EnrollmentStore};

use crate::anomaly::{Anomaly, PassReport};
use crate::pass::ReconciliationPass;

pub const ROLE_SYNC: &str = "role-sync";

/// Roles an account should hold according to its records.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DerivedRoles {
    pub active_candidate: bool,
    pub graduate: bool,
}

/// One role write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleChange {
    Add(Role),
    Remove(Role),
}

impl RoleChange {
    fn label(&self) -> String {
        match self {
            RoleChange::Add(role) => format!("ADD_ROLE {role}"),
            RoleChange::Remove(role) => format!("REMOVE_ROLE {role}"),
        }
    }
}

/// Minimal set of writes taking `account` to `derived`.
pub fn role_delta(account: &Account, derived: DerivedRoles) -> Vec<RoleChange> {
    let mut changes = Vec::new();
    let has_candidate = account.has_role(&Role::ACTIVE_CANDIDATE);
    if derived.active_candidate && !has_candidate {
        changes.push(RoleChange::Add(Role::ACTIVE_CANDIDATE));
    }
    if !derived.active_candidate && has_candidate {
        changes.push(RoleChange::Remove(Role::ACTIVE_CANDIDATE));
    }
    if derived.graduate && !account.has_role(&Role::GRADUATE) {
        changes.push(RoleChange::Add(Role::GRADUATE));
    }
    changes
}

pub struct RoleSyncPass {
    accounts: Arc<dyn AccountStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    defenses: Arc<dyn DefenseStore>,
}

impl RoleSyncPass {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        defenses: Arc<dyn DefenseStore>,
    ) -> Self {
        Self {
            accounts,
            enrollments,
            defenses,
        }
    }

    fn derive(&self, account: &Account) -> Result<DerivedRoles, BatchError> {
        let graduate = self
            .defenses
            .for_candidate(account.id)?
            .iter()
            .any(|d| d.is_successful());
        let validated = self
            .enrollments
            .for_account(account.id)?
            .iter()
            .any(|e| e.status == EnrollmentStatus::Validated);
        Ok(DerivedRoles {
            active_candidate: validated && !graduate,
            graduate,
        })
    }
}

impl ReconciliationPass for RoleSyncPass {
    fn name(&self) -> &str {
        ROLE_SYNC
    }

    fn run(&self, report: &mut PassReport) -> Result<(), BatchError> {
        let accounts = self.accounts.list()?;
        for account in &accounts {
            let changes = role_delta(account, self.derive(account)?);
            for change in changes {
                let detected_at = Utc::now();
                let changed = match &change {
                    RoleChange::Add(role) => self.accounts.add_role(account.id, role)?,
                    RoleChange::Remove(role) => self.accounts.remove_role(account.id, role)?,
                };
                debug!(account = %account.id, change = %change.label(), changed, "role delta applied");
                report.record(Anomaly {
                    invariant: ROLE_SYNC.to_string(),
                    record_id: account.id.to_string(),
                    detected_at,
                    action: change.label(),
                    corrected_at: changed.then(Utc::now),
                });
            }
        }
        info!(
            accounts = accounts.len(),
            changes = report.corrections_applied,
            "role synchronization finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived(active_candidate: bool, graduate: bool) -> DerivedRoles {
        DerivedRoles {
            active_candidate,
            graduate,
        }
    }

    #[test]
    fn delta_is_empty_when_roles_already_match() {
        let account = Account::new("a@uni.test").with_role(Role::ACTIVE_CANDIDATE);
        assert!(role_delta(&account, derived(true, false)).is_empty());
    }

    #[test]
    fn graduation_swaps_candidate_for_graduate() {
        let account = Account::new("a@uni.test")
            .with_role(Role::ACTIVE_CANDIDATE)
            .with_role(Role::new("library"));
        assert_eq!(
            role_delta(&account, derived(false, true)),
            vec![RoleChange::Remove(Role::ACTIVE_CANDIDATE), RoleChange::Add(Role::GRADUATE)]
        );
    }

    #[test]
    fn absent_role_is_not_removed_again() {
        let account = Account::new("a@uni.test");
        assert!(role_delta(&account, derived(false, false)).is_empty());
    }
}
