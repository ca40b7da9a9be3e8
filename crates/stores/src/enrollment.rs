//! Enrollment store accessor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acadbatch_core::{AccountId, EnrollmentId};

use crate::error::StoreError;
use crate::faults::Faults;
use crate::references::PathReferenceSource;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Submitted,
    Validated,
    Rejected,
    Suspended,
    Completed,
    Archived,
}

impl EnrollmentStatus {
    /// Statuses the reconciler no longer inspects.
    pub fn is_excluded(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Rejected
                | EnrollmentStatus::Suspended
                | EnrollmentStatus::Completed
                | EnrollmentStatus::Archived
        )
    }

    /// Closed enrollments are eligible for archival.
    pub fn is_closed(&self) -> bool {
        matches!(self, EnrollmentStatus::Completed | EnrollmentStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Submitted => "SUBMITTED",
            EnrollmentStatus::Validated => "VALIDATED",
            EnrollmentStatus::Rejected => "REJECTED",
            EnrollmentStatus::Suspended => "SUSPENDED",
            EnrollmentStatus::Completed => "COMPLETED",
            EnrollmentStatus::Archived => "ARCHIVED",
        }
    }
}

impl core::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub account_id: AccountId,
    pub supervisor_id: Option<AccountId>,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub legal_hold: bool,
    pub document_paths: Vec<String>,
}

impl Enrollment {
    pub fn new(account_id: AccountId, status: EnrollmentStatus, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            id: EnrollmentId::new(),
            account_id,
            supervisor_id: None,
            status,
            enrolled_at,
            updated_at: enrolled_at,
            legal_hold: false,
            document_paths: Vec::new(),
        }
    }

    pub fn with_supervisor(mut self, supervisor: AccountId) -> Self {
        self.supervisor_id = Some(supervisor);
        self
    }

    pub fn with_document(mut self, path: impl Into<String>) -> Self {
        self.document_paths.push(path.into());
        self
    }

    pub fn on_legal_hold(mut self) -> Self {
        self.legal_hold = true;
        self
    }
}

/// Predicate-guarded status change: applies only while the record is still
/// in `from`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition<Id, S> {
    pub id: Id,
    pub from: S,
    pub to: S,
}

pub type EnrollmentTransition = StatusTransition<EnrollmentId, EnrollmentStatus>;

/// Enrollment store abstraction.
pub trait EnrollmentStore: Send + Sync {
    fn get(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError>;

    /// Enrollments not yet in an excluded status (SUBMITTED, VALIDATED).
    fn reconciliation_candidates(&self) -> Result<Vec<Enrollment>, StoreError>;

    fn for_account(&self, account_id: AccountId) -> Result<Vec<Enrollment>, StoreError>;

    /// COMPLETED or REJECTED enrollments last updated before `cutoff`.
    fn closed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Enrollment>, StoreError>;

    /// Move `id` from `from` to `to`. Returns `false` (no-op) when the record
    /// is missing or no longer in `from`.
    fn transition_status(
        &self,
        id: EnrollmentId,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    ) -> Result<bool, StoreError>;

    /// Apply a batch of guarded transitions in one transaction. Returns how
    /// many rows actually changed.
    fn apply_transitions(&self, transitions: &[EnrollmentTransition]) -> Result<usize, StoreError>;
}

impl<S> EnrollmentStore for Arc<S>
where
    S: EnrollmentStore + ?Sized,
{
    fn get(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        (**self).get(id)
    }

    fn reconciliation_candidates(&self) -> Result<Vec<Enrollment>, StoreError> {
        (**self).reconciliation_candidates()
    }

    fn for_account(&self, account_id: AccountId) -> Result<Vec<Enrollment>, StoreError> {
        (**self).for_account(account_id)
    }

    fn closed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Enrollment>, StoreError> {
        (**self).closed_before(cutoff)
    }

    fn transition_status(
        &self,
        id: EnrollmentId,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    ) -> Result<bool, StoreError> {
        (**self).transition_status(id, from, to)
    }

    fn apply_transitions(&self, transitions: &[EnrollmentTransition]) -> Result<usize, StoreError> {
        (**self).apply_transitions(transitions)
    }
}

/// In-memory enrollment store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    rows: RwLock<HashMap<EnrollmentId, Enrollment>>,
    faults: Faults,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, enrollment: Enrollment) -> EnrollmentId {
        let id = enrollment.id;
        self.write().insert(id, enrollment);
        id
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EnrollmentId, Enrollment>> {
        self.rows.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EnrollmentId, Enrollment>> {
        self.rows.write().unwrap_or_else(|p| p.into_inner())
    }

    fn select(&self, pred: impl Fn(&Enrollment) -> bool) -> Vec<Enrollment> {
        let mut out: Vec<_> = self.read().values().filter(|e| pred(e)).cloned().collect();
        out.sort_by_key(|e| (e.enrolled_at, e.id));
        out
    }
}

fn apply(rows: &mut HashMap<EnrollmentId, Enrollment>, t: &EnrollmentTransition, now: DateTime<Utc>) -> bool {
    match rows.get_mut(&t.id) {
        Some(row) if row.status == t.from => {
            row.status = t.to;
            row.updated_at = now;
            true
        }
        _ => false,
    }
}

impl EnrollmentStore for InMemoryEnrollmentStore {
    fn get(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        self.faults.check("enrollment")?;
        Ok(self.read().get(&id).cloned())
    }

    fn reconciliation_candidates(&self) -> Result<Vec<Enrollment>, StoreError> {
        self.faults.check("enrollment")?;
        Ok(self.select(|e| !e.status.is_excluded()))
    }

    fn for_account(&self, account_id: AccountId) -> Result<Vec<Enrollment>, StoreError> {
        self.faults.check("enrollment")?;
        Ok(self.select(|e| e.account_id == account_id))
    }

    fn closed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Enrollment>, StoreError> {
        self.faults.check("enrollment")?;
        Ok(self.select(|e| e.status.is_closed() && e.updated_at < cutoff))
    }

    fn transition_status(
        &self,
        id: EnrollmentId,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    ) -> Result<bool, StoreError> {
        self.faults.check("enrollment")?;
        Ok(apply(&mut self.write(), &StatusTransition { id, from, to }, Utc::now()))
    }

    fn apply_transitions(&self, transitions: &[EnrollmentTransition]) -> Result<usize, StoreError> {
        // Faults fire before any row is touched, so a failed call leaves nothing behind.
        self.faults.check("enrollment")?;
        let now = Utc::now();
        let mut rows = self.write();
        Ok(transitions.iter().filter(|t| apply(&mut rows, t, now)).count())
    }
}

impl PathReferenceSource for InMemoryEnrollmentStore {
    fn source_name(&self) -> &str {
        "enrollment"
    }

    fn path_references(&self) -> Result<Vec<String>, StoreError> {
        self.faults.check("enrollment")?;
        Ok(self
            .read()
            .values()
            .flat_map(|e| e.document_paths.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with(status: EnrollmentStatus) -> (InMemoryEnrollmentStore, EnrollmentId) {
        let store = InMemoryEnrollmentStore::new();
        let id = store.insert(Enrollment::new(AccountId::new(), status, Utc::now()));
        (store, id)
    }

    #[test]
    fn guarded_transition_is_idempotent() {
        let (store, id) = store_with(EnrollmentStatus::Validated);

        assert!(store
            .transition_status(id, EnrollmentStatus::Validated, EnrollmentStatus::Suspended)
            .unwrap());
        assert!(!store
            .transition_status(id, EnrollmentStatus::Validated, EnrollmentStatus::Suspended)
            .unwrap());
        assert_eq!(store.get(id).unwrap().unwrap().status, EnrollmentStatus::Suspended);
    }

    #[test]
    fn candidates_exclude_terminal_statuses() {
        let store = InMemoryEnrollmentStore::new();
        for status in [
            EnrollmentStatus::Submitted,
            EnrollmentStatus::Validated,
            EnrollmentStatus::Suspended,
            EnrollmentStatus::Archived,
        ] {
            store.insert(Enrollment::new(AccountId::new(), status, Utc::now()));
        }
        let statuses: Vec<_> = store
            .reconciliation_candidates()
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| !s.is_excluded()));
    }

    #[test]
    fn failed_batch_leaves_no_partial_writes() {
        let store = InMemoryEnrollmentStore::new();
        let old = Utc::now() - Duration::days(4000);
        let a = store.insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Completed, old));
        let b = store.insert(Enrollment::new(AccountId::new(), EnrollmentStatus::Rejected, old));
        let batch = [
            StatusTransition { id: a, from: EnrollmentStatus::Completed, to: EnrollmentStatus::Archived },
            StatusTransition { id: b, from: EnrollmentStatus::Rejected, to: EnrollmentStatus::Archived },
        ];

        store.faults().fail_next(StoreError::Deadlock("40P01".into()));
        assert!(store.apply_transitions(&batch).is_err());
        assert_eq!(store.closed_before(Utc::now()).unwrap().len(), 2);

        assert_eq!(store.apply_transitions(&batch).unwrap(), 2);
        assert_eq!(store.apply_transitions(&batch).unwrap(), 0);
    }

    #[test]
    fn outage_fails_every_operation() {
        let (store, id) = store_with(EnrollmentStatus::Submitted);
        store.faults().set_unavailable(true);
        assert_eq!(
            store.get(id).unwrap_err().kind(),
            acadbatch_core::ErrorKind::DatabaseTransient
        );
        store.faults().set_unavailable(false);
        assert!(store.get(id).unwrap().is_some());
    }
}
