/// Unified error type for odix.
#[derive(Debug, thiserror::Error)]
pub enum OdixError {
    /// The codebase root is missing or unreadable. Fatal to an indexing run.
    #[error("Scan error: {0}")]
    Scan(String),

    /// One source file could not be parsed. Never aborts a run.
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    /// Bad query parameters, rejected before the store is touched.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("An indexing run is already in progress (started {started_secs_ago}s ago)")]
    ConcurrentRunRejected { started_secs_ago: u64 },

    #[error("Invalid entity kind: {0}")]
    InvalidEntityKind(String),

    #[error("Invalid relationship kind: {0}")]
    InvalidRelationshipKind(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A source file over the configured size limit. Skipped, never deleted.
    #[error("{file} is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { file: String, size: u64, limit: u64 },

    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OdixError {
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code used in structured query errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan_error",
            Self::Parse { .. } => "parse_error",
            Self::Storage(_) => "store_error",
            Self::Validation(_) | Self::InvalidEntityKind(_) | Self::InvalidRelationshipKind(_) => {
                "validation_error"
            }
            Self::ConcurrentRunRejected { .. } => "concurrent_run_rejected",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::Config(_) => "config_error",
            Self::LockPoisoned(_) | Self::Internal(_) => "internal_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}
