//! Extraction coordinator.
//!
//! Selects the extractor for a file by name and extension and runs it.

use crate::extractor::{Extraction, FileContext, SourceExtractor};
use crate::languages;
use odix_core::OdixError;
use std::path::Path;

/// Coordinates extraction across the supported file formats.
pub struct SourceParser {
    extractors: Vec<Box<dyn SourceExtractor>>,
}

impl SourceParser {
    /// Create a SourceParser with all registered extractors.
    pub fn new() -> Self {
        Self {
            extractors: languages::all_extractors(),
        }
    }

    /// Create a SourceParser with a custom extractor set.
    pub fn with_extractors(extractors: Vec<Box<dyn SourceExtractor>>) -> Self {
        Self { extractors }
    }

    /// Extract entities and candidates from one file.
    pub fn parse_file(
        &self,
        module: &str,
        file_path: &str,
        content: &[u8],
    ) -> Result<Extraction, OdixError> {
        let extractor = self
            .find_extractor(Path::new(file_path))
            .ok_or_else(|| OdixError::parse(file_path, "no extractor for this file type"))?;
        let ctx = FileContext { module, file_path };
        extractor.extract(&ctx, content)
    }

    /// Check if any extractor claims the path.
    pub fn supports(&self, path: &Path) -> bool {
        self.find_extractor(path).is_some()
    }

    /// Names of the registered extractors, in dispatch order.
    pub fn extractor_names(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    fn find_extractor(&self, path: &Path) -> Option<&dyn SourceExtractor> {
        self.extractors
            .iter()
            .find(|e| e.handles(path))
            .map(|e| e.as_ref())
    }
}

impl Default for SourceParser {
    fn default() -> Self {
        Self::new()
    }
}
