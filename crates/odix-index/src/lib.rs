//! odix-index: Odoo codebase scanning, extraction and indexing runs.
//!
//! Walks an Odoo codebase, extracts models, fields, methods, views, actions,
//! menus and security records from Python, XML and CSV sources, resolves
//! cross-module references, and commits the result to the index store.
//! Supports incremental runs with SHA-256 change detection.
//!
//! # Architecture
//!
//! - **scanner**: Module discovery and recognized-file enumeration
//! - **incremental**: Fingerprint-based change classification
//! - **extractor**: Trait for per-format entity extraction
//! - **languages**: Format extractors (manifest, Python, XML, access CSV)
//! - **parser**: Dispatches files to the first claiming extractor
//! - **resolver**: Dependency-aware resolution of candidate relationships
//! - **pipeline**: Scan, extract, resolve, commit
//! - **coordinator**: Single-writer run exclusivity and status

pub mod candidate;
pub mod coordinator;
pub mod extractor;
pub mod incremental;
pub mod languages;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod scanner;

pub use candidate::Candidate;
pub use coordinator::{IndexingStatus, LastRun, RunCoordinator, RunGuard, RunPhase, RunProgress};
pub use extractor::{Extraction, FileContext, SourceExtractor};
pub use incremental::{ChangeDetector, ChangeSet};
pub use parser::SourceParser;
pub use pipeline::{FileFailure, Orchestrator, RunParams, RunReport};
pub use resolver::ReferenceResolver;
pub use scanner::{ScanResult, ScannedFile, Scanner, SkippedFile};
