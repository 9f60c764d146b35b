//! Scoped ownership of transient storage for one comparison request.
//!
//! Every path handed to a [`RequestScope`] is removed, with all descendants,
//! exactly once: either by an explicit [`RequestScope::release`] or, on any
//! other exit path (early `?` return, panic unwinding), by `Drop`.

use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use treecmp_common::CompareError;
use uuid::Uuid;

const CREATE_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Created by this scope under the staging root
    Staged,
    /// Materialized elsewhere (e.g. by an upload layer) and handed over
    Adopted,
}

#[derive(Debug)]
struct ScopedPath {
    path: PathBuf,
    ownership: Ownership,
}

/// Outcome of releasing a scope
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    /// Paths that were already gone
    pub missing: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Transient storage owned by a single request
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    staging_root: PathBuf,
    entries: Vec<ScopedPath>,
    released: bool,
}

impl RequestScope {
    pub fn new(staging_root: impl Into<PathBuf>) -> Result<Self, CompareError> {
        let staging_root = staging_root.into();
        fs::create_dir_all(&staging_root).map_err(|e| CompareError::io_at(&staging_root, e))?;

        let id = Uuid::new_v4();
        debug!("Opened request scope {} under {:?}", id, staging_root);
        Ok(Self {
            id,
            staging_root,
            entries: Vec::new(),
            released: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Paths currently owned by this scope, in acquisition order
    pub fn owned_paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.path.as_path())
    }

    /// Create a fresh, uniquely named directory under the staging root
    pub fn create_dir(&mut self, label: &str) -> Result<PathBuf, CompareError> {
        let label = sanitize_label(label);
        let mut last_err = None;

        for _ in 0..CREATE_ATTEMPTS {
            let name = format!(
                "{}_{}_{}",
                label,
                Utc::now().timestamp_millis(),
                Uuid::new_v4().simple()
            );
            let path = self.staging_root.join(name);

            // create_dir fails on an existing name, so a hit is never shared
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("Scope {} created {:?}", self.id, path);
                    self.entries.push(ScopedPath {
                        path: path.clone(),
                        ownership: Ownership::Staged,
                    });
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(CompareError::io_at(&path, e)),
            }
        }

        Err(CompareError::io_at(
            &self.staging_root,
            last_err.unwrap_or_else(|| ErrorKind::AlreadyExists.into()),
        ))
    }

    /// Take ownership of an existing file or directory so it is removed with the scope
    pub fn adopt(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.entries.iter().any(|e| e.path == path) {
            return;
        }
        debug!("Scope {} adopted {:?}", self.id, path);
        self.entries.push(ScopedPath {
            path,
            ownership: Ownership::Adopted,
        });
    }

    /// Remove everything owned by the scope
    pub fn release(mut self) -> CleanupReport {
        self.cleanup()
    }

    fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.released {
            return report;
        }
        self.released = true;

        // Newest first
        for entry in self.entries.drain(..).rev() {
            match remove_path(&entry.path) {
                Ok(true) => {
                    debug!("Removed {:?} ({:?})", entry.path, entry.ownership);
                    report.removed += 1;
                }
                Ok(false) => report.missing += 1,
                Err(e) => {
                    warn!("Failed to remove {:?}: {}", entry.path, e);
                    report.failures.push((entry.path, e.to_string()));
                }
            }
        }

        report
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let report = self.cleanup();
        if !report.is_clean() {
            warn!(
                "Request scope {} dropped with {} cleanup failures",
                self.id,
                report.failures.len()
            );
        }
    }
}

/// Outcome of a stale staging sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Remove staging entries older than `max_age`, left behind by crashed processes
pub fn sweep_stale(staging_root: &Path, max_age: Duration) -> Result<SweepReport, CompareError> {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(staging_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(CompareError::io_at(staging_root, e)),
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = entry.map_err(|e| CompareError::io_at(staging_root, e))?;
        let path = entry.path();
        report.scanned += 1;

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                report.failures.push((path, e.to_string()));
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        match remove_path(&path) {
            Ok(_) => report.removed.push(path),
            Err(e) => {
                warn!("Failed to sweep {:?}: {}", path, e);
                report.failures.push((path, e.to_string()));
            }
        }
    }

    debug!(
        "Swept {} of {} staging entries in {:?}",
        report.removed.len(),
        report.scanned,
        staging_root
    );
    Ok(report)
}

/// Remove a file or a directory tree. Returns false if it was already gone.
fn remove_path(path: &Path) -> std::io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "staged".to_string()
    } else {
        cleaned
    }
}
