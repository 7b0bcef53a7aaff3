use std::fmt;

use thiserror::Error;

/// A pre- or post-condition that did not hold at a phase boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    pub hint: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} (hint: {})", self.message, hint),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A single malformed record in a scanner file. Never leaves the parser.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("invalid field {field}: {reason}")]
    Field { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{tool} timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("command not allowed: {0}")]
    ToolNotAllowed(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("resolver error: {0}")]
    Resolver(String),

    #[error("a scan is already in progress")]
    ScanInProgress,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn tool_failed<S: Into<String>>(tool: S, message: S) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
