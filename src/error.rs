//! Error types for the coach orchestrator

use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// A single problem found while validating a record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    Invalid {
        field: String,
        value: String,
        reason: String,
    },
    Missing {
        field: String,
    },
}

impl FieldIssue {
    pub fn field(&self) -> &str {
        match self {
            FieldIssue::Invalid { field, .. } | FieldIssue::Missing { field } => field,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldIssue::Missing { .. })
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldIssue::Invalid {
                field,
                value,
                reason,
            } => write!(
                f,
                "Invalid value '{}' for column '{}': {}",
                value, field, reason
            ),
            FieldIssue::Missing { field } => write!(f, "Missing required field: {}", field),
        }
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Record Access Errors
    // =============================

    #[error("Table '{table}' is not accessible. Allowed tables: {allowed:?}")]
    UnknownTable { table: String, allowed: Vec<String> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<FieldIssue>),

    #[error("{0} not found or access denied")]
    NotFound(String),

    #[error("Invalid table schema: {0}")]
    InvalidSchema(String),

    // =============================
    // Turn Pipeline Errors
    // =============================

    #[error("Tool '{0}' is not available.")]
    ToolNotFound(String),

    #[error("Tool dispatch failure: {0}")]
    ToolDispatchFailure(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Turn context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Structured payload handed back to the model when a tool fails.
    ///
    /// Validation failures become a list: one line per invalid value, then a
    /// single line naming every missing required field.
    pub fn to_tool_payload(&self) -> Value {
        match self {
            OrchestrationError::Validation(issues) => {
                let mut lines: Vec<String> = issues
                    .iter()
                    .filter(|i| !i.is_missing())
                    .map(|i| i.to_string())
                    .collect();
                let missing = self.missing_fields();
                if !missing.is_empty() {
                    lines.push(format!("Missing required fields: {:?}", missing));
                }
                json!({ "error": lines })
            }
            other => json!({ "error": other.to_string() }),
        }
    }

    /// Missing required fields carried by a validation failure.
    pub fn missing_fields(&self) -> Vec<&str> {
        match self {
            OrchestrationError::Validation(issues) => issues
                .iter()
                .filter(|i| i.is_missing())
                .map(|i| i.field())
                .collect(),
            _ => Vec::new(),
        }
    }
}
