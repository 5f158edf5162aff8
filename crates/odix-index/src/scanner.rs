//! Codebase walker: finds Odoo modules and the source files they own.
//!
//! A module is a directory holding `__manifest__.py` (or the legacy
//! `__openerp__.py`). Every recognized file belongs to its deepest enclosing
//! module; files outside any module are ignored.

use ignore::WalkBuilder;
use odix_core::OdixError;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILES: [&str; 2] = ["__manifest__.py", "__openerp__.py"];

/// The only CSV file name that carries indexable content.
pub const ACCESS_CSV: &str = "ir.model.access.csv";

/// Directories never descended into. `static` holds web assets whose XML
/// files are client templates, not data files.
const IGNORE_DIRS: &[&str] = &["__pycache__", "node_modules", ".git", "static", "i18n"];

/// One recognized file under a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub module: String,
    pub path: PathBuf,
    /// Absolute path as stored in the index.
    pub file_path: String,
    /// Lowercase hex SHA-256 of the content at scan time.
    pub fingerprint: String,
}

/// A recognized file left out of the scan. Its prior index content stays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub module: String,
    pub file_path: String,
    pub code: String,
    pub message: String,
}

impl SkippedFile {
    fn new(module: &str, file_path: &str, err: &OdixError) -> Self {
        Self {
            module: module.to_string(),
            file_path: file_path.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Sorted by module, then path.
    pub files: Vec<ScannedFile>,
    /// Module name -> module directory.
    pub modules: BTreeMap<String, PathBuf>,
    /// Recognized files that could not be read or exceed the size limit.
    /// They are neither indexed nor treated as deleted.
    pub skipped: Vec<SkippedFile>,
}

impl ScanResult {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Walks a codebase root.
pub struct Scanner {
    root: PathBuf,
    max_file_size: u64,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: u64::MAX,
        }
    }

    /// Skip files larger than `bytes`.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Enumerate recognized files, optionally restricted to some modules.
    ///
    /// Fails with `Scan` when the root is missing or unreadable.
    pub fn scan(&self, module_filter: Option<&[String]>) -> Result<ScanResult, OdixError> {
        let root = std::fs::canonicalize(&self.root).map_err(|e| {
            OdixError::Scan(format!("codebase root {}: {e}", self.root.display()))
        })?;
        if !root.is_dir() {
            return Err(OdixError::Scan(format!(
                "codebase root {} is not a directory",
                root.display()
            )));
        }
        std::fs::read_dir(&root)
            .map_err(|e| OdixError::Scan(format!("codebase root {}: {e}", root.display())))?;

        let mut module_dirs = Vec::new();
        let mut candidates = Vec::new();

        let walker = WalkBuilder::new(&root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !(is_dir && IGNORE_DIRS.iter().any(|d| entry.file_name() == *d))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!("Walk error: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if MANIFEST_FILES.contains(&file_name) {
                if let Some(dir) = path.parent() {
                    module_dirs.push(dir.to_path_buf());
                }
            }
            if is_recognized(path) {
                candidates.push(path.to_path_buf());
            }
        }

        // Module directory -> name; `None` marks a shadowed duplicate name.
        module_dirs.sort();
        module_dirs.dedup();
        let mut modules: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut owners: HashMap<PathBuf, Option<String>> = HashMap::new();
        for dir in module_dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if let Some(first) = modules.get(&name) {
                tracing::warn!(
                    "Duplicate module name '{}' at {} (already found at {}), skipping",
                    name,
                    dir.display(),
                    first.display()
                );
                owners.insert(dir, None);
                continue;
            }
            modules.insert(name.clone(), dir.clone());
            owners.insert(dir, Some(name));
        }

        let mut result = ScanResult::default();
        for path in candidates {
            let Some(module) = owning_module(&path, &root, &owners) else {
                continue;
            };
            if let Some(filter) = module_filter {
                if !filter.iter().any(|m| m == &module) {
                    continue;
                }
            }
            let file_path = path.to_string_lossy().into_owned();

            let content = match std::fs::metadata(&path) {
                Ok(meta) if meta.len() > self.max_file_size => Err(OdixError::FileTooLarge {
                    file: file_path.clone(),
                    size: meta.len(),
                    limit: self.max_file_size,
                }),
                Ok(_) => std::fs::read(&path).map_err(OdixError::from),
                Err(err) => Err(OdixError::from(err)),
            };
            let content = match content {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!("Skipping {}: {}", file_path, err);
                    result.skipped.push(SkippedFile::new(&module, &file_path, &err));
                    continue;
                }
            };

            result.files.push(ScannedFile {
                module,
                fingerprint: fingerprint(&content),
                path,
                file_path,
            });
        }

        result
            .files
            .sort_by(|a, b| (&a.module, &a.file_path).cmp(&(&b.module, &b.file_path)));
        result.modules = match module_filter {
            Some(filter) => modules
                .into_iter()
                .filter(|(name, _)| filter.contains(name))
                .collect(),
            None => modules,
        };

        tracing::debug!(
            "Scanned {}: {} modules, {} files, {} skipped",
            root.display(),
            result.modules.len(),
            result.files.len(),
            result.skipped.len()
        );
        Ok(result)
    }
}

/// The deepest module directory above `path`, if any and not shadowed.
fn owning_module(
    path: &Path,
    root: &Path,
    owners: &HashMap<PathBuf, Option<String>>,
) -> Option<String> {
    for dir in path.ancestors().skip(1) {
        if let Some(owner) = owners.get(dir) {
            return owner.clone();
        }
        if dir == root {
            break;
        }
    }
    None
}

/// `.py` and `.xml` files, and CSV files named `ir.model.access.csv`.
pub fn is_recognized(path: &Path) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") | Some("xml") => true,
        Some("csv") => file_name == ACCESS_CSV,
        _ => false,
    }
}

/// Compute the SHA-256 hex fingerprint of file content.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
