//! Account store accessor.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use acadbatch_core::{AccountId, Role};

use crate::error::StoreError;
use crate::faults::Faults;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub roles: BTreeSet<Role>,
}

impl Account {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            email: email.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

/// Account store abstraction.
///
/// Role writes are set operations: adding a present role or removing an
/// absent one is a no-op reported as `false`, never an error.
pub trait AccountStore: Send + Sync {
    fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn list(&self) -> Result<Vec<Account>, StoreError>;

    fn administrators(&self) -> Result<Vec<Account>, StoreError>;

    fn add_role(&self, id: AccountId, role: &Role) -> Result<bool, StoreError>;

    fn remove_role(&self, id: AccountId, role: &Role) -> Result<bool, StoreError>;
}

impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).get(id)
    }

    fn list(&self) -> Result<Vec<Account>, StoreError> {
        (**self).list()
    }

    fn administrators(&self) -> Result<Vec<Account>, StoreError> {
        (**self).administrators()
    }

    fn add_role(&self, id: AccountId, role: &Role) -> Result<bool, StoreError> {
        (**self).add_role(id, role)
    }

    fn remove_role(&self, id: AccountId, role: &Role) -> Result<bool, StoreError> {
        (**self).remove_role(id, role)
    }
}

/// In-memory account store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    rows: RwLock<HashMap<AccountId, Account>>,
    faults: Faults,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert(&self, account: Account) -> AccountId {
        let id = account.id;
        self.write().insert(id, account);
        id
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AccountId, Account>> {
        self.rows.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AccountId, Account>> {
        self.rows.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl AccountStore for InMemoryAccountStore {
    fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.faults.check("account")?;
        Ok(self.read().get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<Account>, StoreError> {
        self.faults.check("account")?;
        let mut all: Vec<_> = self.read().values().cloned().collect();
        all.sort_by_key(|a| a.id);
        Ok(all)
    }

    fn administrators(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| a.has_role(&Role::ADMINISTRATOR))
            .collect())
    }

    fn add_role(&self, id: AccountId, role: &Role) -> Result<bool, StoreError> {
        self.faults.check("account")?;
        match self.write().get_mut(&id) {
            Some(account) => Ok(account.roles.insert(role.clone())),
            None => Err(StoreError::not_found("account", id)),
        }
    }

    fn remove_role(&self, id: AccountId, role: &Role) -> Result<bool, StoreError> {
        self.faults.check("account")?;
        match self.write().get_mut(&id) {
            Some(account) => Ok(account.roles.remove(role)),
            None => Err(StoreError::not_found("account", id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_writes_report_whether_anything_changed() {
        let store = InMemoryAccountStore::new();
        let id = store.insert(Account::new("c@uni.test"));

        assert!(store.add_role(id, &Role::ACTIVE_CANDIDATE).unwrap());
        assert!(!store.add_role(id, &Role::ACTIVE_CANDIDATE).unwrap());
        assert!(store.remove_role(id, &Role::ACTIVE_CANDIDATE).unwrap());
        assert!(!store.remove_role(id, &Role::ACTIVE_CANDIDATE).unwrap());
    }

    #[test]
    fn administrators_are_filtered_by_role() {
        let store = InMemoryAccountStore::new();
        let admin = store.insert(Account::new("admin@uni.test").with_role(Role::ADMINISTRATOR));
        store.insert(Account::new("c@uni.test"));
        let admins: Vec<_> = store.administrators().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(admins, vec![admin]);
    }
}
