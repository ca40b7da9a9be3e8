//! Defense request store accessor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acadbatch_core::{AccountId, DefenseId, EnrollmentId};

use crate::error::StoreError;
use crate::faults::Faults;
use crate::references::PathReferenceSource;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefenseStatus {
    Pending,
    Scheduled,
    Authorized,
    Completed,
    Rejected,
    Blocked,
    Cancelled,
}

impl DefenseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DefenseStatus::Completed
                | DefenseStatus::Rejected
                | DefenseStatus::Blocked
                | DefenseStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DefenseStatus::Pending => "PENDING",
            DefenseStatus::Scheduled => "SCHEDULED",
            DefenseStatus::Authorized => "AUTHORIZED",
            DefenseStatus::Completed => "COMPLETED",
            DefenseStatus::Rejected => "REJECTED",
            DefenseStatus::Blocked => "BLOCKED",
            DefenseStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for DefenseStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefenseOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenseRequest {
    pub id: DefenseId,
    pub enrollment_id: EnrollmentId,
    pub candidate_id: AccountId,
    pub supervisor_id: Option<AccountId>,
    pub status: DefenseStatus,
    pub outcome: Option<DefenseOutcome>,
    pub requested_at: DateTime<Utc>,
    pub document_paths: Vec<String>,
}

impl DefenseRequest {
    pub fn new(enrollment_id: EnrollmentId, candidate_id: AccountId, status: DefenseStatus) -> Self {
        Self {
            id: DefenseId::new(),
            enrollment_id,
            candidate_id,
            supervisor_id: None,
            status,
            outcome: None,
            requested_at: Utc::now(),
            document_paths: Vec::new(),
        }
    }

    pub fn with_supervisor(mut self, supervisor: AccountId) -> Self {
        self.supervisor_id = Some(supervisor);
        self
    }

    pub fn with_outcome(mut self, outcome: DefenseOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_document(mut self, path: impl Into<String>) -> Self {
        self.document_paths.push(path.into());
        self
    }

    /// A completed defense the candidate passed.
    pub fn is_successful(&self) -> bool {
        self.status == DefenseStatus::Completed && self.outcome == Some(DefenseOutcome::Passed)
    }
}

/// Defense store abstraction.
pub trait DefenseStore: Send + Sync {
    fn get(&self, id: DefenseId) -> Result<Option<DefenseRequest>, StoreError>;

    /// Requests not yet in a terminal status.
    fn open_requests(&self) -> Result<Vec<DefenseRequest>, StoreError>;

    fn for_candidate(&self, candidate_id: AccountId) -> Result<Vec<DefenseRequest>, StoreError>;

    /// Guarded status change; `false` when the request is no longer in `from`.
    fn transition_status(
        &self,
        id: DefenseId,
        from: DefenseStatus,
        to: DefenseStatus,
    ) -> Result<bool, StoreError>;
}

impl<S> DefenseStore for Arc<S>
where
    S: DefenseStore + ?Sized,
{
    fn get(&self, id: DefenseId) -> Result<Option<DefenseRequest>, StoreError> {
        (**self).get(id)
    }

    fn open_requests(&self) -> Result<Vec<DefenseRequest>, StoreError> {
        (**self).open_requests()
    }

    fn for_candidate(&self, candidate_id: AccountId) -> Result<Vec<DefenseRequest>, StoreError> {
        (**self).for_candidate(candidate_id)
    }

    fn transition_status(
        &self,
        id: DefenseId,
        from: DefenseStatus,
        to: DefenseStatus,
    ) -> Result<bool, StoreError> {
        (**self).transition_status(id, from, to)
    }
}

/// In-memory defense store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDefenseStore {
    rows: RwLock<HashMap<DefenseId, DefenseRequest>>,
    faults: Faults,
}

impl InMemoryDefenseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, request: DefenseRequest) -> DefenseId {
        let id = request.id;
        self.write().insert(id, request);
        id
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DefenseId, DefenseRequest>> {
        self.rows.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DefenseId, DefenseRequest>> {
        self.rows.write().unwrap_or_else(|p| p.into_inner())
    }

    fn select(&self, pred: impl Fn(&DefenseRequest) -> bool) -> Vec<DefenseRequest> {
        let mut out: Vec<_> = self.read().values().filter(|d| pred(d)).cloned().collect();
        out.sort_by_key(|d| (d.requested_at, d.id));
        out
    }
}

impl DefenseStore for InMemoryDefenseStore {
    fn get(&self, id: DefenseId) -> Result<Option<DefenseRequest>, StoreError> {
        self.faults.check("defense")?;
        Ok(self.read().get(&id).cloned())
    }

    fn open_requests(&self) -> Result<Vec<DefenseRequest>, StoreError> {
        self.faults.check("defense")?;
        Ok(self.select(|d| !d.status.is_terminal()))
    }

    fn for_candidate(&self, candidate_id: AccountId) -> Result<Vec<DefenseRequest>, StoreError> {
        self.faults.check("defense")?;
        Ok(self.select(|d| d.candidate_id == candidate_id))
    }

    fn transition_status(
        &self,
        id: DefenseId,
        from: DefenseStatus,
        to: DefenseStatus,
    ) -> Result<bool, StoreError> {
        self.faults.check("defense")?;
        let mut rows = self.write();
        match rows.get_mut(&id) {
            Some(row) if row.status == from => {
                row.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl PathReferenceSource for InMemoryDefenseStore {
    fn source_name(&self) -> &str {
        "defense"
    }

    fn path_references(&self) -> Result<Vec<String>, StoreError> {
        self.faults.check("defense")?;
        Ok(self
            .read()
            .values()
            .flat_map(|d| d.document_paths.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_requests_skip_terminal_ones_and_block_is_guarded() {
        let store = InMemoryDefenseStore::new();
        let open = store.insert(DefenseRequest::new(EnrollmentId::new(), AccountId::new(), DefenseStatus::Scheduled));
        store.insert(DefenseRequest::new(EnrollmentId::new(), AccountId::new(), DefenseStatus::Cancelled));

        let ids: Vec<_> = store.open_requests().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![open]);

        assert!(store.transition_status(open, DefenseStatus::Scheduled, DefenseStatus::Blocked).unwrap());
        assert!(!store.transition_status(open, DefenseStatus::Scheduled, DefenseStatus::Blocked).unwrap());
        assert!(store.open_requests().unwrap().is_empty());
    }

    #[test]
    fn success_needs_completion_and_pass() {
        let base = DefenseRequest::new(EnrollmentId::new(), AccountId::new(), DefenseStatus::Completed);
        assert!(!base.is_successful());
        assert!(base.clone().with_outcome(DefenseOutcome::Passed).is_successful());
        assert!(!base.with_outcome(DefenseOutcome::Failed).is_successful());
    }
}
