//! Cross-store invariants checked by the consistency reconciler.
//!
//! Each invariant reads candidates from the store it may correct, checks
//! the referenced store(s) read-only, and repairs only its own store with a
//! write guarded on the status it observed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use acadbatch_core::AccountId;
use acadbatch_events::Severity;
use acadbatch_stores::{
    AccountStore, DefenseStatus, DefenseStore, Enrollment, EnrollmentStatus, EnrollmentStore,
    StoreError,
};

use crate::anomaly::CorrectiveAction;

pub const USER_ENROLLMENT: &str = "user-enrollment";
pub const DEFENSE_ENROLLMENT: &str = "defense-enrollment";
pub const ENROLLMENT_DURATION: &str = "enrollment-duration";

/// A record that breaks an invariant, with the repair to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub record_id: String,
    pub action: CorrectiveAction,
    pub recipients: Vec<AccountId>,
    pub severity: Severity,
    pub detail: String,
}

pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self) -> Result<Vec<Violation>, StoreError>;

    /// Apply `action`. `Ok(false)` means the guard matched nothing: the
    /// record already left its pre-correction status.
    fn correct(&self, action: &CorrectiveAction) -> Result<bool, StoreError>;
}

fn recipients(parts: impl IntoIterator<Item = AccountId>) -> Vec<AccountId> {
    parts.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

fn administrators(accounts: &dyn AccountStore) -> Result<Vec<AccountId>, StoreError> {
    Ok(accounts.administrators()?.into_iter().map(|a| a.id).collect())
}

fn suspend(enrollments: &dyn EnrollmentStore, action: &CorrectiveAction) -> Result<bool, StoreError> {
    match action {
        CorrectiveAction::SuspendEnrollment { id, from } => {
            enrollments.transition_status(*id, *from, EnrollmentStatus::Suspended)
        }
        other => Err(StoreError::Misconfigured(format!(
            "enrollment invariant cannot apply {}",
            other.label()
        ))),
    }
}

/// Every active enrollment references an existing account.
pub struct UserEnrollmentInvariant {
    enrollments: Arc<dyn EnrollmentStore>,
    accounts: Arc<dyn AccountStore>,
}

impl UserEnrollmentInvariant {
    pub fn new(enrollments: Arc<dyn EnrollmentStore>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { enrollments, accounts }
    }
}

impl Invariant for UserEnrollmentInvariant {
    fn name(&self) -> &'static str {
        USER_ENROLLMENT
    }

    fn detect(&self) -> Result<Vec<Violation>, StoreError> {
        let candidates = self.enrollments.reconciliation_candidates()?;
        let admins = administrators(self.accounts.as_ref())?;
        let mut violations = Vec::new();
        for enrollment in candidates {
            if self.accounts.get(enrollment.account_id)?.is_some() {
                continue;
            }
            violations.push(Violation {
                record_id: enrollment.id.to_string(),
                action: CorrectiveAction::SuspendEnrollment {
                    id: enrollment.id,
                    from: enrollment.status,
                },
                recipients: recipients(enrollment.supervisor_id.into_iter().chain(admins.iter().copied())),
                severity: Severity::High,
                detail: format!("enrollment references missing account {}", enrollment.account_id),
            });
        }
        Ok(violations)
    }

    fn correct(&self, action: &CorrectiveAction) -> Result<bool, StoreError> {
        suspend(self.enrollments.as_ref(), action)
    }
}

/// Every non-terminal defense request references a VALIDATED enrollment.
pub struct DefenseEnrollmentInvariant {
    defenses: Arc<dyn DefenseStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    accounts: Arc<dyn AccountStore>,
}

impl DefenseEnrollmentInvariant {
    pub fn new(
        defenses: Arc<dyn DefenseStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            defenses,
            enrollments,
            accounts,
        }
    }
}

impl Invariant for DefenseEnrollmentInvariant {
    fn name(&self) -> &'static str {
        DEFENSE_ENROLLMENT
    }

    fn detect(&self) -> Result<Vec<Violation>, StoreError> {
        let open = self.defenses.open_requests()?;
        let admins = administrators(self.accounts.as_ref())?;
        let mut violations = Vec::new();
        for defense in open {
            let enrollment = self.enrollments.get(defense.enrollment_id)?;
            let detail = match &enrollment {
                Some(e) if e.status == EnrollmentStatus::Validated => continue,
                Some(e) => format!("enrollment {} is {}, expected VALIDATED", e.id, e.status),
                None => format!("enrollment {} does not exist", defense.enrollment_id),
            };
            let supervisor = defense
                .supervisor_id
                .or_else(|| enrollment.as_ref().and_then(|e| e.supervisor_id));
            violations.push(Violation {
                record_id: defense.id.to_string(),
                action: CorrectiveAction::BlockDefense {
                    id: defense.id,
                    from: defense.status,
                },
                recipients: recipients(supervisor.into_iter().chain(admins.iter().copied())),
                severity: Severity::High,
                detail,
            });
        }
        Ok(violations)
    }

    fn correct(&self, action: &CorrectiveAction) -> Result<bool, StoreError> {
        match action {
            CorrectiveAction::BlockDefense { id, from } => {
                self.defenses.transition_status(*id, *from, DefenseStatus::Blocked)
            }
            other => Err(StoreError::Misconfigured(format!(
                "defense invariant cannot apply {}",
                other.label()
            ))),
        }
    }
}

/// A VALIDATED enrollment must reach a completed defense within the limit.
pub struct EnrollmentDurationInvariant {
    enrollments: Arc<dyn EnrollmentStore>,
    defenses: Arc<dyn DefenseStore>,
    limit: Duration,
}

impl EnrollmentDurationInvariant {
    pub fn new(
        enrollments: Arc<dyn EnrollmentStore>,
        defenses: Arc<dyn DefenseStore>,
        limit_years: u32,
    ) -> Self {
        Self {
            enrollments,
            defenses,
            limit: Duration::days(365 * i64::from(limit_years)),
        }
    }

    fn overdue(&self, enrollment: &Enrollment) -> Result<bool, StoreError> {
        if enrollment.status != EnrollmentStatus::Validated
            || Utc::now() - enrollment.enrolled_at <= self.limit
        {
            return Ok(false);
        }
        let defended = self
            .defenses
            .for_candidate(enrollment.account_id)?
            .iter()
            .any(|d| d.enrollment_id == enrollment.id && d.status == DefenseStatus::Completed);
        Ok(!defended)
    }
}

impl Invariant for EnrollmentDurationInvariant {
    fn name(&self) -> &'static str {
        ENROLLMENT_DURATION
    }

    fn detect(&self) -> Result<Vec<Violation>, StoreError> {
        let mut violations = Vec::new();
        for enrollment in self.enrollments.reconciliation_candidates()? {
            if !self.overdue(&enrollment)? {
                continue;
            }
            violations.push(Violation {
                record_id: enrollment.id.to_string(),
                action: CorrectiveAction::SuspendEnrollment {
                    id: enrollment.id,
                    from: enrollment.status,
                },
                recipients: recipients(
                    std::iter::once(enrollment.account_id).chain(enrollment.supervisor_id),
                ),
                severity: Severity::Warning,
                detail: format!(
                    "enrolled since {} without a completed defense",
                    enrollment.enrolled_at.date_naive()
                ),
            });
        }
        Ok(violations)
    }

    fn correct(&self, action: &CorrectiveAction) -> Result<bool, StoreError> {
        suspend(self.enrollments.as_ref(), action)
    }
}
