use std::collections::HashMap;
use tracing::debug;
use treecmp_common::{AddedEntry, FileRecord, PairedEntry, Partition, RemovedEntry};

/// Partitions two record sets by relative path and content digest
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffClassifier;

impl DiffClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify every path from both sides into exactly one category.
    ///
    /// A path is matched only by its relative key; identical content under a
    /// different path is reported as one removal plus one addition.
    pub fn classify(&self, left: &[FileRecord], right: &[FileRecord]) -> Partition {
        let right_map: HashMap<&str, &FileRecord> = right
            .iter()
            .map(|r| (r.relative_path.as_str(), r))
            .collect();
        let left_map: HashMap<&str, &FileRecord> = left
            .iter()
            .map(|r| (r.relative_path.as_str(), r))
            .collect();

        let mut partition = Partition::default();

        for (path, l) in &left_map {
            match right_map.get(path) {
                None => partition.removed.push(RemovedEntry::from_record(l)),
                Some(r) if l.digest != r.digest => {
                    partition.changed.push(PairedEntry::from_records(l, r))
                }
                Some(r) => partition.unchanged.push(PairedEntry::from_records(l, r)),
            }
        }

        for (path, r) in &right_map {
            if !left_map.contains_key(path) {
                partition.added.push(AddedEntry::from_record(r));
            }
        }

        partition.removed.sort_by(|a, b| a.file.cmp(&b.file));
        partition.added.sort_by(|a, b| a.file.cmp(&b.file));
        partition.changed.sort_by(|a, b| a.file.cmp(&b.file));
        partition.unchanged.sort_by(|a, b| a.file.cmp(&b.file));

        debug!(
            "Classified {} left / {} right records: {} removed, {} added, {} changed, {} unchanged",
            left.len(),
            right.len(),
            partition.removed.len(),
            partition.added.len(),
            partition.changed.len(),
            partition.unchanged.len()
        );
        partition
    }
}
