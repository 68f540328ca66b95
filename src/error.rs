//! Error taxonomy for the curation engine.
//!
//! Mirrors the propagation policy: read-side parse failures on
//! peripheral files are logged and skipped by the caller rather than turned
//! into a hard error; only the playbook itself and user-facing validation
//! failures are fatal. This enum is the one error type threaded through the
//! library; `anyhow` is reserved for the CLI boundary (see `cli/mod.rs`).

use std::path::PathBuf;

/// Every error the curation engine can surface.
#[derive(Debug, thiserror::Error)]
pub enum CassMemoryError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as {format}: {source}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("schema invariant violated in {entity}: {reason}")]
    Schema { entity: &'static str, reason: String },

    #[error("history tool unavailable: {reason}")]
    ToolUnavailable { reason: String },

    #[error("history tool failed (exit {exit_code}): {message}")]
    ToolFailure { exit_code: i32, message: String },

    #[error("oracle extraction failed: {reason}")]
    OracleFailure { reason: String },

    #[error("validation failed: {reason}")]
    ValidationFailure { reason: String },

    #[error("config error: {reason}")]
    Config { reason: String },
}

impl CassMemoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn parse_json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse { path: path.into(), format: "json", source: Box::new(source) }
    }

    pub fn parse_yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Parse { path: path.into(), format: "yaml", source: Box::new(source) }
    }

    pub fn schema(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::Schema { entity, reason: reason.into() }
    }

    /// Stable string code for the JSON command envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "IO_ERROR",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::Schema { .. } => "SCHEMA_ERROR",
            Self::ToolUnavailable { .. } => "TOOL_UNAVAILABLE",
            Self::ToolFailure { .. } => "TOOL_FAILURE",
            Self::OracleFailure { .. } => "ORACLE_FAILURE",
            Self::ValidationFailure { .. } => "VALIDATION_FAILURE",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// Whether this error should abort the calling operation outright
    /// (as opposed to being logged-and-skipped by a read-side loop).
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Self::Schema { .. } | Self::Io { .. } | Self::Config { .. })
    }
}

pub type Result<T> = std::result::Result<T, CassMemoryError>;
