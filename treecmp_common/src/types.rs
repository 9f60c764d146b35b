use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// BLAKE3 digest of a file's full byte content (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for ContentDigest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A regular file found under a comparison root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the root, `/`-separated on every platform
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub digest: ContentDigest,
}

/// Describes one compared root or archive as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    #[serde(rename = "size")]
    pub total_size_bytes: u64,
}

/// Path present only on side 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedEntry {
    pub file: String,
    pub size1: u64,
    pub last_modified1: DateTime<Utc>,
}

/// Path present only on side 2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedEntry {
    pub file: String,
    pub size2: u64,
    pub last_modified2: DateTime<Utc>,
}

/// Path present on both sides, used for changed and unchanged entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedEntry {
    pub file: String,
    pub size1: u64,
    pub size2: u64,
    pub last_modified1: DateTime<Utc>,
    pub last_modified2: DateTime<Utc>,
}

impl RemovedEntry {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            file: record.relative_path.clone(),
            size1: record.size_bytes,
            last_modified1: record.last_modified,
        }
    }
}

impl AddedEntry {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            file: record.relative_path.clone(),
            size2: record.size_bytes,
            last_modified2: record.last_modified,
        }
    }
}

impl PairedEntry {
    pub fn from_records(left: &FileRecord, right: &FileRecord) -> Self {
        Self {
            file: left.relative_path.clone(),
            size1: left.size_bytes,
            size2: right.size_bytes,
            last_modified1: left.last_modified,
            last_modified2: right.last_modified,
        }
    }
}

/// The four-way classification of every path from both sides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub removed: Vec<RemovedEntry>,
    pub added: Vec<AddedEntry>,
    pub changed: Vec<PairedEntry>,
    pub unchanged: Vec<PairedEntry>,
}

/// Category a path was classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Removed,
    Added,
    Changed,
    Unchanged,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.removed.len() + self.added.len() + self.changed.len() + self.unchanged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths of one category, in stored order
    pub fn paths(&self, category: Category) -> Vec<&str> {
        match category {
            Category::Removed => self.removed.iter().map(|e| e.file.as_str()).collect(),
            Category::Added => self.added.iter().map(|e| e.file.as_str()).collect(),
            Category::Changed => self.changed.iter().map(|e| e.file.as_str()).collect(),
            Category::Unchanged => self.unchanged.iter().map(|e| e.file.as_str()).collect(),
        }
    }

    /// Find which category holds a path
    pub fn category_of(&self, path: &str) -> Option<Category> {
        if self.removed.iter().any(|e| e.file == path) {
            Some(Category::Removed)
        } else if self.added.iter().any(|e| e.file == path) {
            Some(Category::Added)
        } else if self.changed.iter().any(|e| e.file == path) {
            Some(Category::Changed)
        } else if self.unchanged.iter().any(|e| e.file == path) {
            Some(Category::Unchanged)
        } else {
            None
        }
    }
}

/// Result of comparing two sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub source1: SourceDescriptor,
    pub source2: SourceDescriptor,
    #[serde(flatten)]
    pub partition: Partition,
}

/// Per-category counts of a comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total: usize,
    pub removed: usize,
    pub added: usize,
    pub changed: usize,
    pub unchanged: usize,
}

impl ComparisonResult {
    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary {
            total: self.partition.len(),
            removed: self.partition.removed.len(),
            added: self.partition.added.len(),
            changed: self.partition.changed.len(),
            unchanged: self.partition.unchanged.len(),
        }
    }

    /// True when nothing was removed, added or changed
    pub fn is_identical(&self) -> bool {
        self.partition.removed.is_empty()
            && self.partition.added.is_empty()
            && self.partition.changed.is_empty()
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Directory under which archive extractions are staged
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Hashing worker threads (0 = available parallelism)
    #[serde(default)]
    pub hash_workers: usize,

    /// Delete the supplied inputs once the comparison finishes
    #[serde(default)]
    pub remove_inputs: bool,

    /// Age in seconds after which a leftover staging entry is swept (0 = one day)
    #[serde(default)]
    pub stale_after_secs: u64,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,
}
