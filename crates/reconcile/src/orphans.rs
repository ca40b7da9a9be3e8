//! Orphan-artifact pass: quarantine files no store references.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use acadbatch_core::BatchError;
use acadbatch_stores::{ArtifactStorage, PathReferenceSource};

use crate::anomaly::{Anomaly, CorrectiveAction, PassReport};
use crate::pass::ReconciliationPass;

pub const ORPHAN_ARTIFACTS: &str = "orphan-artifacts";

fn components(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// Whether `reference` points at the file `rel` (relative to the storage
/// root).
///
/// Stores record partial paths, so a reference matches when either path is
/// a component-wise suffix of the other: `/srv/uploads/x.pdf` and `x.pdf`
/// both refer to `uploads/x.pdf`'s file `x.pdf`, while `ax.pdf` does not.
pub fn references_file(reference: &str, rel: &str) -> bool {
    let reference = components(reference);
    let file = components(rel);
    if reference.is_empty() || file.is_empty() {
        return false;
    }
    reference.ends_with(&file) || file.ends_with(&reference)
}

pub struct OrphanArtifactPass {
    storage: ArtifactStorage,
    sources: Vec<Arc<dyn PathReferenceSource>>,
    dry_run: bool,
}

impl OrphanArtifactPass {
    pub fn new(storage: ArtifactStorage, sources: Vec<Arc<dyn PathReferenceSource>>) -> Self {
        Self {
            storage,
            sources,
            dry_run: false,
        }
    }

    /// Report orphans without moving them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Union of references across all sources. Any unreadable source fails
    /// the pass: a partial union would quarantine referenced files.
    fn references(&self) -> Result<Vec<String>, BatchError> {
        let mut all = Vec::new();
        for source in &self.sources {
            let paths = source.path_references()?;
            info!(source = source.source_name(), references = paths.len(), "path references loaded");
            all.extend(paths);
        }
        Ok(all)
    }
}

impl ReconciliationPass for OrphanArtifactPass {
    fn name(&self) -> &str {
        ORPHAN_ARTIFACTS
    }

    fn run(&self, report: &mut PassReport) -> Result<(), BatchError> {
        let references = self.references()?;
        let files = self.storage.list()?;

        for rel in files {
            if references.iter().any(|r| references_file(r, &rel)) {
                continue;
            }
            let detected_at = Utc::now();
            let corrected_at = if self.dry_run {
                warn!(path = %rel, "orphan artifact found (dry run, not moved)");
                None
            } else {
                self.storage.quarantine(&rel)?;
                Some(Utc::now())
            };
            report.record(Anomaly {
                invariant: ORPHAN_ARTIFACTS.to_string(),
                record_id: rel.clone(),
                detected_at,
                action: CorrectiveAction::QuarantineArtifact { path: rel }.label().to_string(),
                corrected_at,
            });
        }
        Ok(())
    }
}
