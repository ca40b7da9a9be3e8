//! Sources of artifact path references.

use std::sync::Arc;

use crate::error::StoreError;

/// A store that records file paths pointing into managed artifact storage.
///
/// Paths may be partial (relative, or prefixed with a mount point), so
/// consumers must match them by path components rather than equality.
pub trait PathReferenceSource: Send + Sync {
    fn source_name(&self) -> &str;

    fn path_references(&self) -> Result<Vec<String>, StoreError>;
}

impl<S> PathReferenceSource for Arc<S>
where
    S: PathReferenceSource + ?Sized,
{
    fn source_name(&self) -> &str {
        (**self).source_name()
    }

    fn path_references(&self) -> Result<Vec<String>, StoreError> {
        (**self).path_references()
    }
}

/// Fixed list of references, for stores that expose paths through another
/// channel (exports, legacy tables).
#[derive(Debug, Clone, Default)]
pub struct StaticReferences {
    name: String,
    paths: Vec<String>,
}

impl StaticReferences {
    pub fn new(name: impl Into<String>, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl PathReferenceSource for StaticReferences {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn path_references(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.paths.clone())
    }
}
