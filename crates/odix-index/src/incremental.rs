//! SHA-256 based change detection for incremental indexing.
//!
//! Compares scan fingerprints against stored file records so unchanged
//! files can be skipped and vanished files removed.

use crate::scanner::{ScanResult, ScannedFile};
use odix_core::FileRecord;
use std::collections::{HashMap, HashSet};

/// Disjoint classification of one scan.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub unchanged: Vec<ScannedFile>,
    /// Files to (re-)extract, new ones included.
    pub modified: Vec<ScannedFile>,
    /// Paths in `modified` that had no record before.
    pub new_files: HashSet<String>,
    /// Recorded paths that are no longer present.
    pub deleted: Vec<FileRecord>,
}

impl ChangeSet {
    pub fn is_noop(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Tracks file content hashes for incremental change detection.
pub struct ChangeDetector {
    /// Map of file_path -> record from the last successful run.
    known: HashMap<String, FileRecord>,
}

impl ChangeDetector {
    /// Create a new empty ChangeDetector.
    pub fn new() -> Self {
        Self {
            known: HashMap::new(),
        }
    }

    /// Build from stored records (already restricted to the run's module
    /// filter, so out-of-filter files are never reported deleted).
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        Self {
            known: records
                .into_iter()
                .map(|r| (r.file_path.clone(), r))
                .collect(),
        }
    }

    /// True if the file is new or its fingerprint differs.
    pub fn is_changed(&self, path: &str, fingerprint: &str) -> bool {
        self.known
            .get(path)
            .map_or(true, |r| r.fingerprint != fingerprint)
    }

    /// Classify a scan. With `incremental` off every scanned file is
    /// treated as modified.
    pub fn classify(&self, scan: &ScanResult, incremental: bool) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut present: HashSet<&str> = HashSet::with_capacity(scan.files.len());

        for file in &scan.files {
            present.insert(&file.file_path);
            if !self.known.contains_key(&file.file_path) {
                changes.new_files.insert(file.file_path.clone());
                changes.modified.push(file.clone());
            } else if !incremental || self.is_changed(&file.file_path, &file.fingerprint) {
                changes.modified.push(file.clone());
            } else {
                changes.unchanged.push(file.clone());
            }
        }

        // Skipped files keep their prior rows.
        for skipped in &scan.skipped {
            present.insert(&skipped.file_path);
        }

        let mut deleted: Vec<FileRecord> = self
            .known
            .values()
            .filter(|r| !present.contains(r.file_path.as_str()))
            .cloned()
            .collect();
        deleted.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        changes.deleted = deleted;

        changes
    }

    /// Get the number of tracked files.
    pub fn tracked_count(&self) -> usize {
        self.known.len()
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}
