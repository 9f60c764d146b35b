use crate::hasher::ContentHasher;
use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use treecmp_common::{CompareError, FileRecord};

/// Upper bound on hashing threads, keeps open file handles in check
pub const MAX_HASH_WORKERS: usize = 16;

/// A regular file found during enumeration, before its content is hashed
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Enumerates regular files under a root and fingerprints them on a bounded pool
pub struct PathWalker {
    hasher: ContentHasher,
    pool: Arc<ThreadPool>,
}

impl PathWalker {
    /// Create a walker with its own hashing pool (0 = available parallelism)
    pub fn new(workers: usize) -> Result<Self, CompareError> {
        Ok(Self::with_pool(Arc::new(build_hash_pool(workers)?)))
    }

    pub fn with_pool(pool: Arc<ThreadPool>) -> Self {
        Self {
            hasher: ContentHasher::new(),
            pool,
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// List every regular file below `root` without reading contents
    pub fn list(&self, root: &Path) -> Result<Vec<WalkedFile>, CompareError> {
        let meta = fs::metadata(root).map_err(|e| CompareError::io_at(root, e))?;
        if !meta.is_dir() {
            return Err(CompareError::Path(format!(
                "Not a directory: {}",
                root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .skip_hidden(false);

        for entry in walker {
            let entry = entry.map_err(|e| CompareError::io_at(
                root,
                std::io::Error::new(std::io::ErrorKind::Other, format!("Walk error: {}", e)),
            ))?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative_path = normalize_relative(root, &path)?;
            let metadata = fs::metadata(&path).map_err(|e| CompareError::io_at(&path, e))?;
            let modified = metadata
                .modified()
                .map_err(|e| CompareError::io_at(&path, e))?;

            files.push(WalkedFile {
                relative_path,
                size_bytes: metadata.len(),
                last_modified: DateTime::<Utc>::from(modified),
                absolute_path: path,
            });
        }

        debug!("Listed {} files under {:?}", files.len(), root);
        Ok(files)
    }

    /// Enumerate and hash every regular file below `root`
    pub fn walk(&self, root: &Path) -> Result<Vec<FileRecord>, CompareError> {
        let files = self.list(root)?;
        let hasher = self.hasher;

        let records = self.pool.install(|| {
            files
                .into_par_iter()
                .map(|file| {
                    let digest = hasher.digest(&file.absolute_path)?;
                    Ok(FileRecord {
                        relative_path: file.relative_path,
                        absolute_path: file.absolute_path,
                        size_bytes: file.size_bytes,
                        last_modified: file.last_modified,
                        digest,
                    })
                })
                .collect::<Result<Vec<_>, CompareError>>()
        })?;

        debug!("Hashed {} files under {:?}", records.len(), root);
        Ok(records)
    }
}

/// Build the bounded hashing pool
pub fn build_hash_pool(workers: usize) -> Result<ThreadPool, CompareError> {
    let workers = if workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        workers
    };

    ThreadPoolBuilder::new()
        .num_threads(workers.clamp(1, MAX_HASH_WORKERS))
        .thread_name(|idx| format!("treecmp-hash-{}", idx))
        .build()
        .map_err(|e| CompareError::Config(format!("Failed to build hash pool: {}", e)))
}

/// Express `path` relative to `root` with `/` separators
pub fn normalize_relative(root: &Path, path: &Path) -> Result<String, CompareError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| CompareError::Path(format!("{}: {}", path.display(), e)))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    CompareError::Path(format!("Non UTF-8 file name: {}", path.display()))
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(CompareError::Path(format!(
                    "Unexpected path component in {}",
                    path.display()
                )))
            }
        }
    }

    if parts.is_empty() {
        return Err(CompareError::Path(format!(
            "Empty relative path for {}",
            path.display()
        )));
    }

    Ok(parts.join("/"))
}
