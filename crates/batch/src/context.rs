//! Execution-scoped key/value context shared by the steps of one job execution.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use acadbatch_core::{BatchError, RunKey};

/// Typed handle to a context entry.
///
/// Two steps agree on a key by sharing the same `ContextKey<T>` value, which
/// also fixes the type stored under it.
#[derive(Debug)]
pub struct ContextKey<T> {
    name: String,
    _type: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

/// Key/value bag owned by exactly one job execution.
///
/// Created empty when the execution starts and dropped when it ends; it is
/// never persisted, so a step must not assume values from an earlier,
/// crashed run are present.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    job_name: String,
    run_key: RunKey,
    entries: BTreeMap<String, JsonValue>,
}

impl ExecutionContext {
    pub fn new(job_name: impl Into<String>, run_key: RunKey) -> Self {
        Self {
            job_name: job_name.into(),
            run_key,
            entries: BTreeMap::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn run_key(&self) -> &RunKey {
        &self.run_key
    }

    pub fn put<T: Serialize>(&mut self, key: &ContextKey<T>, value: &T) -> Result<(), BatchError> {
        let json = serde_json::to_value(value)?;
        self.entries.insert(key.name.clone(), json);
        Ok(())
    }

    /// Read a typed value. A missing key yields `Ok(None)`; a value of the
    /// wrong shape is a malformed-input error.
    pub fn get<T: DeserializeOwned>(&self, key: &ContextKey<T>) -> Result<Option<T>, BatchError> {
        match self.entries.get(&key.name) {
            Some(json) => Ok(Some(serde_json::from_value(json.clone())?)),
            None => Ok(None),
        }
    }

    /// Read a counter, treating absence as zero.
    pub fn counter(&self, key: &ContextKey<u64>) -> Result<u64, BatchError> {
        Ok(self.get(key)?.unwrap_or(0))
    }

    /// Add to a counter, creating it if absent.
    pub fn increment(&mut self, key: &ContextKey<u64>, by: u64) -> Result<u64, BatchError> {
        let next = self.counter(key)?.saturating_add(by);
        self.put(key, &next)?;
        Ok(next)
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(&key.name)
    }

    /// Raw entries whose name starts with `prefix`.
    pub fn entries_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a JsonValue)> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every entry as one JSON object (for reports/listeners).
    pub fn snapshot(&self) -> JsonValue {
        JsonValue::Object(self.entries.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Totals {
        found: u64,
        fixed: u64,
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("job", RunKey::new("r1"))
    }

    #[test]
    fn typed_round_trip() {
        let mut ctx = ctx();
        let key = ContextKey::<Totals>::new("reconcile.totals");
        ctx.put(&key, &Totals { found: 3, fixed: 2 }).unwrap();
        assert_eq!(ctx.get(&key).unwrap(), Some(Totals { found: 3, fixed: 2 }));
    }

    #[test]
    fn missing_key_is_none_and_counters_default_to_zero() {
        let mut ctx = ctx();
        let key = ContextKey::<u64>::new("n");
        assert_eq!(ctx.get(&key).unwrap(), None);
        assert_eq!(ctx.counter(&key).unwrap(), 0);
        ctx.increment(&key, 2).unwrap();
        assert_eq!(ctx.increment(&key, 3).unwrap(), 5);
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let mut ctx = ctx();
        ctx.put(&ContextKey::<String>::new("k"), &"text".to_string()).unwrap();
        let err = ctx.get(&ContextKey::<u64>::new("k")).unwrap_err();
        assert_eq!(err.kind(), acadbatch_core::ErrorKind::MalformedInput);
    }

    #[test]
    fn prefix_scan_only_returns_matching_entries() {
        let mut ctx = ctx();
        ctx.put(&ContextKey::<u64>::new("step.a.summary"), &1).unwrap();
        ctx.put(&ContextKey::<u64>::new("step.b.summary"), &2).unwrap();
        ctx.put(&ContextKey::<u64>::new("stepx"), &3).unwrap();
        let names: Vec<_> = ctx.entries_with_prefix("step.").map(|(k, _)| k).collect();
        assert_eq!(names, vec!["step.a.summary", "step.b.summary"]);
    }
}
