//! SourceExtractor trait for per-format entity extraction.

use crate::candidate::Candidate;
use odix_core::{Entity, OdixError};
use std::path::Path;

/// Where the bytes being extracted came from.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    /// Owning module.
    pub module: &'a str,
    /// Absolute path, as stored in the index.
    pub file_path: &'a str,
}

/// Everything one file declares.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub candidates: Vec<Candidate>,
}

impl Extraction {
    pub fn push_entity(&mut self, entity: Entity) {
        self.entities.push(entity);
    }

    pub fn push_candidate(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }
}

/// Trait for per-format extraction of entities and candidate relationships.
///
/// Implementations must be pure functions of `(context, source)`: no reads
/// of other files, no shared state. The pipeline runs them in parallel.
pub trait SourceExtractor: Send + Sync {
    /// Short human-readable name (e.g. "python", "xml").
    fn name(&self) -> &str;

    /// Whether this extractor claims the file. The first claiming extractor
    /// in registration order wins.
    fn handles(&self, path: &Path) -> bool;

    /// Extract from one file. Malformed input is a `Parse` error.
    fn extract(&self, ctx: &FileContext<'_>, source: &[u8]) -> Result<Extraction, OdixError>;
}
