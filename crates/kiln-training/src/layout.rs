use crate::job::Identifier;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Filesystem layout for one job's transient files.
///
/// Everything lives under `<work_dir>/job-<train_id>/`:
///
/// ```text
/// Model.zip                      downloaded bundle
/// model/<user_id>/Model/         unpacked bundle
/// dataset/                       downloaded dataset files
/// export/<user_id>/<timestamp>/  saved model before upload
/// <user_id>-<timestamp>.zip      upload archive
/// ```
///
/// Ids are opaque, so anything outside `[A-Za-z0-9_-]` is replaced with `_`
/// before it names a directory or file. The one exception is the unpacked
/// bundle, whose directory name is chosen by the conversion service; ids
/// that would leave the extract directory are rejected there instead.
#[derive(Debug, Clone)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn for_job(work_dir: &Path, train_id: &Identifier) -> Self {
        Self::new(work_dir.join(format!("job-{}", path_safe(train_id))))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn model_archive(&self) -> PathBuf {
        self.root.join("Model.zip")
    }

    #[must_use]
    pub fn model_extract_dir(&self) -> PathBuf {
        self.root.join("model")
    }

    /// `model/<user_id>/Model`, or `None` when `user_id` is empty, absolute
    /// or contains `.`/`..` segments.
    #[must_use]
    pub fn model_dir(&self, user_id: &Identifier) -> Option<PathBuf> {
        let rel = PathBuf::from(user_id.to_string());
        let mut components = rel.components().peekable();
        if components.peek().is_none() || !components.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.model_extract_dir().join(rel).join("Model"))
    }

    #[must_use]
    pub fn dataset_dir(&self) -> PathBuf {
        self.root.join("dataset")
    }

    #[must_use]
    pub fn export_root(&self) -> PathBuf {
        self.root.join("export")
    }

    #[must_use]
    pub fn export_dir(&self, user_id: &Identifier, stamp: &str) -> PathBuf {
        self.export_root().join(path_safe(user_id)).join(stamp)
    }

    #[must_use]
    pub fn export_archive(&self, user_id: &Identifier, stamp: &str) -> PathBuf {
        self.root.join(format!("{}-{stamp}.zip", path_safe(user_id)))
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.dataset_dir())?;
        Ok(())
    }

    /// Remove the whole job directory. Each entry is attempted even if an
    /// earlier one fails; the failures are returned.
    pub fn cleanup(&self) -> Vec<(PathBuf, io::Error)> {
        let mut paths = vec![
            self.model_extract_dir(),
            self.model_archive(),
            self.dataset_dir(),
            self.export_root(),
        ];
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            paths.extend(entries.filter_map(Result::ok).map(|e| e.path()));
        }
        paths.push(self.root.clone());
        remove_all(&paths)
    }
}

/// A single path segment derived from `id`.
fn path_safe(id: &Identifier) -> String {
    id.to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Best-effort removal of files and directories. Missing paths are not errors.
pub fn remove_all(paths: &[PathBuf]) -> Vec<(PathBuf, io::Error)> {
    let mut failures = Vec::new();
    for path in paths {
        let result = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
            Ok(_) => std::fs::remove_file(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => failures.push((path.clone(), e)),
        }
    }
    failures
}
