//! Managed artifact storage on the local filesystem.
//!
//! Files are addressed by `/`-separated paths relative to the storage root.
//! Nothing here deletes a file: unreferenced files are moved under the
//! quarantine subtree, and a quarantine move never overwrites.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StoreError;

pub const DEFAULT_QUARANTINE_DIR: &str = "quarantine";

#[derive(Debug, Clone)]
pub struct ArtifactStorage {
    root: PathBuf,
    quarantine_dir: String,
}

impl ArtifactStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_quarantine_dir(root, DEFAULT_QUARANTINE_DIR)
    }

    pub fn with_quarantine_dir(root: impl Into<PathBuf>, quarantine_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            quarantine_dir: quarantine_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn quarantine_root(&self) -> PathBuf {
        self.root.join(&self.quarantine_dir)
    }

    /// All files under the root except the quarantine subtree, sorted.
    ///
    /// A missing root is a configuration error, not an empty listing.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.is_dir() {
            return Err(StoreError::Misconfigured(format!(
                "artifact root {} is not a directory",
                self.root.display()
            )));
        }
        let mut files = Vec::new();
        self.walk(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn walk(&self, dir: &Path, files: &mut Vec<String>) -> Result<(), StoreError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if dir == self.root && entry.file_name() == self.quarantine_dir.as_str() {
                    continue;
                }
                self.walk(&path, files)?;
            } else if file_type.is_file() {
                if let Some(rel) = self.relative(&path) {
                    files.push(rel);
                }
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Where `rel` would land in quarantine: `<root>/<quarantine>/<rel>`, or
    /// a numbered sibling (`x.1.pdf`, `x.2.pdf`, …) when that name is taken.
    pub fn quarantine_target(&self, rel: &str) -> PathBuf {
        let target = self.quarantine_root().join(rel);
        if !target.exists() {
            return target;
        }
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = target.extension().map(|e| e.to_string_lossy().into_owned());
        (1u32..)
            .map(|n| {
                let name = match &ext {
                    Some(ext) => format!("{stem}.{n}.{ext}"),
                    None => format!("{stem}.{n}"),
                };
                target.with_file_name(name)
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or(target)
    }

    /// Move `rel` into quarantine and return its new absolute path.
    pub fn quarantine(&self, rel: &str) -> Result<PathBuf, StoreError> {
        let source = self.root.join(rel);
        if !source.is_file() {
            return Err(StoreError::not_found("artifact", rel));
        }
        let target = self.quarantine_target(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
        info!(from = %source.display(), to = %target.display(), "artifact quarantined");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }

    #[test]
    fn listing_is_recursive_and_skips_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "x.pdf");
        touch(dir.path(), "theses/2020/a.pdf");
        touch(dir.path(), "quarantine/old.pdf");

        let storage = ArtifactStorage::new(dir.path());
        assert_eq!(storage.list().unwrap(), vec!["theses/2020/a.pdf", "x.pdf"]);
    }

    #[test]
    fn quarantine_moves_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "quarantine/x.pdf");
        touch(dir.path(), "x.pdf");
        let storage = ArtifactStorage::new(dir.path());

        let moved = storage.quarantine("x.pdf").unwrap();

        assert_eq!(moved, dir.path().join("quarantine/x.1.pdf"));
        assert!(!dir.path().join("x.pdf").exists());
        assert_eq!(fs::read(dir.path().join("quarantine/x.pdf")).unwrap(), b"quarantine/x.pdf");
        assert_eq!(fs::read(moved).unwrap(), b"x.pdf");
    }

    #[test]
    fn missing_root_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ArtifactStorage::new(dir.path().join("nope"));
        assert_eq!(
            storage.list().unwrap_err().kind(),
            acadbatch_core::ErrorKind::Configuration
        );
    }
}
