use crate::classifier::DiffClassifier;
use crate::lifecycle::RequestScope;
use crate::walker::PathWalker;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use treecmp_common::{AppConfig, CompareError, ComparisonResult, FileRecord, SourceDescriptor};

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A directory tree already on disk
    Directory(PathBuf),
    /// An archive file to be staged before walking
    Archive(PathBuf),
}

impl Subject {
    /// Treat directories as trees and regular files as archives
    pub fn detect(path: impl Into<PathBuf>) -> Result<Self, CompareError> {
        let path = path.into();
        let meta = fs::metadata(&path).map_err(|e| CompareError::io_at(&path, e))?;
        if meta.is_dir() {
            Ok(Subject::Directory(path))
        } else if meta.is_file() {
            Ok(Subject::Archive(path))
        } else {
            Err(CompareError::Path(format!(
                "Neither a directory nor a file: {}",
                path.display()
            )))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Subject::Directory(path) | Subject::Archive(path) => path,
        }
    }

    pub fn name(&self) -> String {
        let path = self.path();
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

/// A subject ready to be walked
struct PreparedRoot {
    root: PathBuf,
    archive_size: Option<u64>,
}

/// Runs one comparison request end to end
pub struct ComparisonEngine {
    walker: PathWalker,
    classifier: DiffClassifier,
    staging_root: PathBuf,
    remove_inputs: bool,
}

impl ComparisonEngine {
    pub fn new(staging_root: impl Into<PathBuf>, hash_workers: usize) -> Result<Self, CompareError> {
        Ok(Self {
            walker: PathWalker::new(hash_workers)?,
            classifier: DiffClassifier::new(),
            staging_root: staging_root.into(),
            remove_inputs: false,
        })
    }

    /// Build from configuration, using `default_staging` when none is configured
    pub fn from_config(config: &AppConfig, default_staging: PathBuf) -> Result<Self, CompareError> {
        let staging = config.staging_dir.clone().unwrap_or(default_staging);
        Ok(Self::new(staging, config.hash_workers)?.with_remove_inputs(config.remove_inputs))
    }

    /// Delete both inputs once the request finishes, whatever the outcome
    pub fn with_remove_inputs(mut self, enabled: bool) -> Self {
        self.remove_inputs = enabled;
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn compare_folders(&self, left: &Path, right: &Path) -> Result<ComparisonResult, CompareError> {
        self.compare(
            Subject::Directory(left.to_path_buf()),
            Subject::Directory(right.to_path_buf()),
        )
    }

    pub fn compare_archives(&self, left: &Path, right: &Path) -> Result<ComparisonResult, CompareError> {
        self.compare(
            Subject::Archive(left.to_path_buf()),
            Subject::Archive(right.to_path_buf()),
        )
    }

    /// Compare two subjects. Every staged or adopted path is removed before
    /// this returns, on success and on failure alike.
    pub fn compare(&self, source1: Subject, source2: Subject) -> Result<ComparisonResult, CompareError> {
        let mut scope = RequestScope::new(&self.staging_root)?;
        info!(
            "Request {}: comparing {} with {}",
            scope.id(),
            source1.path().display(),
            source2.path().display()
        );

        if self.remove_inputs {
            scope.adopt(source1.path());
            scope.adopt(source2.path());
        }

        let prepared1 = self.prepare(&mut scope, &source1, "extracted1")?;
        let prepared2 = self.prepare(&mut scope, &source2, "extracted2")?;

        let records1 = self.walker.walk(&prepared1.root)?;
        let records2 = self.walker.walk(&prepared2.root)?;
        info!(
            "Request {}: {} files on side 1, {} files on side 2",
            scope.id(),
            records1.len(),
            records2.len()
        );

        let partition = self.classifier.classify(&records1, &records2);
        let result = ComparisonResult {
            source1: describe(&source1, &prepared1, &records1),
            source2: describe(&source2, &prepared2, &records2),
            partition,
        };

        let id = scope.id();
        let report = scope.release();
        if !report.is_clean() {
            warn!(
                "Request {}: {} transient paths could not be removed",
                id,
                report.failures.len()
            );
        }

        let summary = result.summary();
        info!(
            "Request {}: {} removed, {} added, {} changed, {} unchanged",
            id, summary.removed, summary.added, summary.changed, summary.unchanged
        );
        Ok(result)
    }

    fn prepare(
        &self,
        scope: &mut RequestScope,
        subject: &Subject,
        label: &str,
    ) -> Result<PreparedRoot, CompareError> {
        match subject {
            Subject::Directory(path) => Ok(PreparedRoot {
                root: path.clone(),
                archive_size: None,
            }),
            Subject::Archive(path) => stage_archive(scope, path, label),
        }
    }
}

#[cfg(feature = "archives")]
fn stage_archive(
    scope: &mut RequestScope,
    path: &Path,
    label: &str,
) -> Result<PreparedRoot, CompareError> {
    let staged = crate::stager::ArchiveStager::new().stage(scope, path, label)?;
    Ok(PreparedRoot {
        root: staged.root,
        archive_size: Some(staged.archive_size),
    })
}

#[cfg(not(feature = "archives"))]
fn stage_archive(
    _scope: &mut RequestScope,
    path: &Path,
    _label: &str,
) -> Result<PreparedRoot, CompareError> {
    Err(CompareError::archive(path, "archive support is not enabled"))
}

fn describe(subject: &Subject, prepared: &PreparedRoot, records: &[FileRecord]) -> SourceDescriptor {
    SourceDescriptor {
        name: subject.name(),
        total_size_bytes: prepared
            .archive_size
            .unwrap_or_else(|| records.iter().map(|r| r.size_bytes).sum()),
    }
}
