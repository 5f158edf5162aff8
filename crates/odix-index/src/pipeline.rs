//! Indexing run pipeline.
//!
//! Scan, detect changes, extract on a bounded worker pool, resolve (barrier),
//! then commit per module group. The orchestrator is the only writer of the
//! index store; run exclusivity is enforced by the coordinator.

use crate::candidate::Candidate;
use crate::coordinator::{RunPhase, RunProgress};
use crate::extractor::Extraction;
use crate::incremental::ChangeDetector;
use crate::parser::SourceParser;
use crate::resolver::ReferenceResolver;
use crate::scanner::{fingerprint, ScanResult, ScannedFile, Scanner};
use odix_core::{Entity, FileRecord, IndexingConfig, OdixError, Relationship};
use odix_storage::{CommitBatch, CommitSummary, FileCommit, Resolution, Storage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Parameters of one indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    /// Skip files whose fingerprint is unchanged.
    pub incremental: bool,
    /// Restrict the run to these modules.
    pub modules: Option<Vec<String>>,
    /// Drop the existing index (or the filtered modules' part of it) first.
    pub clear_all: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            incremental: true,
            modules: None,
            clear_all: false,
        }
    }
}

impl RunParams {
    /// A from-scratch run over the whole codebase.
    pub fn full() -> Self {
        Self {
            incremental: false,
            modules: None,
            clear_all: false,
        }
    }
}

/// A file that could not be indexed. Its prior index content is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_path: String,
    pub module: String,
    pub code: String,
    pub message: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub files_scanned: usize,
    pub files_unchanged: usize,
    pub files_new: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_indexed: usize,
    /// Unreadable or oversized files; each is also listed in `failures`.
    pub files_skipped: usize,
    pub modules_committed: usize,
    pub entities_written: usize,
    pub relationships_written: usize,
    pub relationships_dangling: usize,
    /// Stored dangling relationships resolved after the commit.
    pub relationships_resolved_later: usize,
    /// Resolved relationships whose target vanished.
    pub relationships_invalidated: usize,
    pub failures: Vec<FileFailure>,
    /// True when nothing changed and nothing was written.
    pub noop: bool,
    pub duration_ms: u64,
}

/// Extraction result of one file.
struct FileOutcome {
    file: ScannedFile,
    result: Result<(Extraction, String), OdixError>,
}

/// A successfully extracted file awaiting resolution.
struct Extracted {
    file: ScannedFile,
    fingerprint: String,
    entities: Vec<Entity>,
    candidates: Vec<Candidate>,
}

/// Coordinates full and incremental indexing runs.
pub struct Orchestrator {
    storage: Arc<Storage>,
    root: PathBuf,
    config: IndexingConfig,
    parser: Arc<SourceParser>,
}

impl Orchestrator {
    pub fn new(storage: Arc<Storage>, root: impl Into<PathBuf>, config: IndexingConfig) -> Self {
        Self {
            storage,
            root: root.into(),
            config,
            parser: Arc::new(SourceParser::new()),
        }
    }

    /// Replace the extractor set (used by tests to inject slow extractors).
    pub fn with_parser(mut self, parser: SourceParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Execute one run. Per-file failures land in the report; scan and
    /// store failures fail the run, leaving the store at its last commit.
    pub async fn run(
        &self,
        params: &RunParams,
        progress: &Arc<RunProgress>,
    ) -> Result<RunReport, OdixError> {
        let started = Instant::now();
        let mut report = RunReport::default();
        let filter = params.modules.clone().filter(|m| !m.is_empty());

        // ── Scan + detect ───────────────────────────────────────────────
        progress.set_phase(RunPhase::Scanning);
        let scanner = Scanner::new(&self.root).with_max_file_size(self.config.max_file_size_bytes);
        let scan_filter = filter.clone();
        let scan: ScanResult = tokio::task::spawn_blocking(move || scanner.scan(scan_filter.as_deref()))
            .await
            .map_err(|e| OdixError::Internal(format!("scan task: {e}")))??;

        let records = self.storage.file_records(filter.as_deref())?;
        let in_scope: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.module.clone(), r.file_path.clone()))
            .collect();
        let detector = ChangeDetector::from_records(records);
        let changes = detector.classify(&scan, params.incremental && !params.clear_all);

        report.files_scanned = scan.file_count();
        report.files_skipped = scan.skipped.len();
        report.files_unchanged = changes.unchanged.len();
        report.files_new = changes.new_files.len();
        report.files_modified = changes.modified.len() - changes.new_files.len();
        report.files_deleted = changes.deleted.len();
        for skipped in &scan.skipped {
            report.failures.push(FileFailure {
                file_path: skipped.file_path.clone(),
                module: skipped.module.clone(),
                code: skipped.code.clone(),
                message: skipped.message.clone(),
            });
        }

        if changes.is_noop() && !params.clear_all {
            tracing::info!(
                "Index up to date: {} files scanned, nothing changed",
                report.files_scanned
            );
            report.noop = true;
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }

        tracing::info!(
            "Indexing {}: {} new, {} modified, {} deleted, {} unchanged",
            self.root.display(),
            report.files_new,
            report.files_modified,
            report.files_deleted,
            report.files_unchanged
        );

        // ── Extract (parallel) ──────────────────────────────────────────
        progress.set_phase(RunPhase::Extracting);
        progress.set_total(changes.modified.len());
        let outcomes = self.extract_all(changes.modified, progress).await?;

        let mut extracted = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome.result {
                Ok((extraction, fingerprint)) => extracted.push(Extracted {
                    file: outcome.file,
                    fingerprint,
                    entities: extraction.entities,
                    candidates: extraction.candidates,
                }),
                Err(err) => {
                    tracing::warn!("Failed to index {}: {}", outcome.file.file_path, err);
                    report.failures.push(FileFailure {
                        file_path: outcome.file.file_path,
                        module: outcome.file.module,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        // ── Resolve (barrier) ───────────────────────────────────────────
        progress.set_phase(RunPhase::Resolving);
        let wipe_everything = params.clear_all && filter.is_none();
        let mut deleted: Vec<(String, String)> = changes
            .deleted
            .iter()
            .map(|r| (r.module.clone(), r.file_path.clone()))
            .collect();
        if params.clear_all && !wipe_everything {
            // Filtered clear: every in-scope file not rewritten below goes.
            let keep: HashSet<&str> = extracted
                .iter()
                .map(|e| e.file.file_path.as_str())
                .chain(deleted.iter().map(|(_, p)| p.as_str()))
                .collect();
            let stale: Vec<(String, String)> = in_scope
                .into_iter()
                .filter(|(_, path)| !keep.contains(path.as_str()))
                .collect();
            deleted.extend(stale);
        }

        let mut replaced: HashSet<String> = extracted.iter().map(|e| e.file.file_path.clone()).collect();
        replaced.extend(deleted.iter().map(|(_, p)| p.clone()));

        let storage = Arc::clone(&self.storage);
        let batch_entities: Vec<Entity> = extracted.iter().flat_map(|e| e.entities.clone()).collect();
        let mut resolver = tokio::task::spawn_blocking(move || -> Result<ReferenceResolver, OdixError> {
            let mut resolver = ReferenceResolver::new();
            resolver.add_entities(&batch_entities);
            if !wipe_everything {
                resolver.add_dependencies(storage.module_dependencies()?);
                resolver.add_entries(storage.symbol_entries(&replaced)?);
            }
            Ok(resolver)
        })
        .await
        .map_err(|e| OdixError::Internal(format!("resolver task: {e}")))??;

        let now = chrono::Utc::now().timestamp();
        let mut groups: BTreeMap<String, CommitBatch> = BTreeMap::new();
        for file in extracted {
            let relationships: Vec<Relationship> = resolver.resolve_all(&file.candidates);
            report.relationships_dangling += relationships.iter().filter(|r| !r.is_resolved()).count();
            groups
                .entry(file.file.module.clone())
                .or_default()
                .files
                .push(FileCommit {
                    record: FileRecord {
                        file_path: file.file.file_path.clone(),
                        module: file.file.module.clone(),
                        fingerprint: file.fingerprint,
                        last_indexed_at: now,
                    },
                    entities: file.entities,
                    relationships,
                });
        }
        for (module, path) in deleted {
            groups.entry(module).or_default().deleted_files.push(path);
        }

        // ── Commit ──────────────────────────────────────────────────────
        progress.set_phase(RunPhase::Committing);
        let summaries = if wipe_everything {
            let mut whole = CommitBatch {
                check_targets: true,
                ..CommitBatch::default()
            };
            for (_, batch) in groups {
                whole.files.extend(batch.files);
                whole.deleted_files.extend(batch.deleted_files);
            }
            report.modules_committed = whole
                .files
                .iter()
                .map(|f| f.record.module.as_str())
                .collect::<HashSet<_>>()
                .len();
            vec![self.commit(whole, true).await?]
        } else {
            // Targets written by a later module's commit are still pending,
            // so stale targets are only checked once every module is in.
            let batches: Vec<(String, CommitBatch)> =
                groups.into_iter().filter(|(_, b)| !b.is_empty()).collect();
            let last = batches.len().saturating_sub(1);
            let mut summaries = Vec::with_capacity(batches.len());
            for (i, (module, mut batch)) in batches.into_iter().enumerate() {
                batch.check_targets = i == last;
                tracing::debug!(
                    "Committing module {}: {} files, {} deleted",
                    module,
                    batch.files.len(),
                    batch.deleted_files.len()
                );
                summaries.push(self.commit(batch, false).await?);
                report.modules_committed += 1;
            }
            summaries
        };
        for summary in summaries {
            report.files_indexed += summary.files_written;
            report.entities_written += summary.entities_written;
            report.relationships_written += summary.relationships_written;
            report.relationships_invalidated += summary.relationships_invalidated;
        }

        report.relationships_resolved_later = self.resolve_dangling().await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Indexed {} files in {} ms: {} entities, {} relationships ({} dangling), {} failed",
            report.files_indexed,
            report.duration_ms,
            report.entities_written,
            report.relationships_written,
            report.relationships_dangling,
            report.failures.len()
        );
        Ok(report)
    }

    /// Extract every file, bounded by the module and worker limits. Each
    /// file gets its own timeout; a timed-out file is a per-file failure.
    async fn extract_all(
        &self,
        files: Vec<ScannedFile>,
        progress: &Arc<RunProgress>,
    ) -> Result<Vec<FileOutcome>, OdixError> {
        let mut by_module: BTreeMap<String, Vec<ScannedFile>> = BTreeMap::new();
        for file in files {
            by_module.entry(file.module.clone()).or_default().push(file);
        }

        let module_slots = Arc::new(Semaphore::new(self.config.max_concurrent_modules.max(1)));
        let workers = Arc::new(Semaphore::new(self.config.worker_count().max(1)));
        let timeout = self.config.parse_timeout();

        let mut modules = JoinSet::new();
        for (module, files) in by_module {
            let module_slots = Arc::clone(&module_slots);
            let workers = Arc::clone(&workers);
            let parser = Arc::clone(&self.parser);
            let progress = Arc::clone(progress);
            modules.spawn(async move {
                let _slot = module_slots
                    .acquire_owned()
                    .await
                    .map_err(|e| OdixError::Internal(format!("module semaphore: {e}")))?;
                tracing::debug!("Extracting module {} ({} files)", module, files.len());

                let mut tasks = JoinSet::new();
                for file in files {
                    let workers = Arc::clone(&workers);
                    let parser = Arc::clone(&parser);
                    let progress = Arc::clone(&progress);
                    tasks.spawn(async move {
                        let permit = match workers.acquire_owned().await {
                            Ok(p) => p,
                            Err(e) => {
                                progress.file_done();
                                return FileOutcome {
                                    file,
                                    result: Err(OdixError::Internal(format!("worker semaphore: {e}"))),
                                };
                            }
                        };
                        let task_file = file.clone();
                        let work = tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            extract_file(&parser, &task_file)
                        });
                        let result = match tokio::time::timeout(timeout, work).await {
                            Ok(Ok(result)) => result,
                            Ok(Err(join)) => Err(OdixError::parse(
                                &file.file_path,
                                format!("extractor panicked: {join}"),
                            )),
                            Err(_) => Err(OdixError::Timeout {
                                what: file.file_path.clone(),
                                secs: timeout.as_secs(),
                            }),
                        };
                        progress.file_done();
                        FileOutcome { file, result }
                    });
                }

                let mut outcomes = Vec::new();
                while let Some(joined) = tasks.join_next().await {
                    let outcome =
                        joined.map_err(|e| OdixError::Internal(format!("extraction task: {e}")))?;
                    outcomes.push(outcome);
                }
                Ok::<_, OdixError>(outcomes)
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = modules.join_next().await {
            let outcomes =
                joined.map_err(|e| OdixError::Internal(format!("module task: {e}")))??;
            all.extend(outcomes);
        }
        // Completion order is nondeterministic; commit order must not be.
        all.sort_by(|a, b| {
            (&a.file.module, &a.file.file_path).cmp(&(&b.file.module, &b.file.file_path))
        });
        Ok(all)
    }

    async fn commit(&self, batch: CommitBatch, clear_first: bool) -> Result<CommitSummary, OdixError> {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || storage.commit_files(&batch, clear_first))
            .await
            .map_err(|e| OdixError::Internal(format!("commit task: {e}")))?
    }

    /// Re-resolve stored dangling relationships against the committed state.
    async fn resolve_dangling(&self) -> Result<usize, OdixError> {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || -> Result<usize, OdixError> {
            let dangling = storage.dangling_relationships()?;
            if dangling.is_empty() {
                return Ok(0);
            }
            let mut resolver = ReferenceResolver::new();
            resolver.add_dependencies(storage.module_dependencies()?);
            resolver.add_entries(storage.symbol_entries(&HashSet::new())?);

            let resolutions: Vec<Resolution> = dangling
                .into_iter()
                .filter_map(|rel| {
                    let resolved = resolver.resolve_dangling(&rel)?;
                    Some(Resolution {
                        dangling: rel,
                        resolved,
                    })
                })
                .collect();
            if resolutions.is_empty() {
                return Ok(0);
            }
            let count = resolutions.len();
            storage.apply_resolutions(&resolutions)?;
            tracing::debug!("Resolved {} previously dangling relationships", count);
            Ok(count)
        })
        .await
        .map_err(|e| OdixError::Internal(format!("re-resolve task: {e}")))?
    }
}

/// Read and extract one file. The fingerprint is recomputed from the bytes
/// actually extracted.
fn extract_file(parser: &SourceParser, file: &ScannedFile) -> Result<(Extraction, String), OdixError> {
    let content = std::fs::read(&file.path)?;
    let extraction = parser.parse_file(&file.module, &file.file_path, &content)?;
    Ok((extraction, fingerprint(&content)))
}
