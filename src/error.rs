//! Error types for the deployment-configuration pipeline
//!
//! Provides structured error types for schema validation, artifact
//! compilation, secret management, rendering, and destructive operations.

use thiserror::Error;

/// A single unresolved template variable, reported per service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIssue {
    /// Service whose template failed to render
    pub service: String,
    /// Variable that could not be resolved
    pub variable: String,
}

impl std::fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: unresolved variable '{}'", self.service, self.variable)
    }
}

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum StackError {
    /// Malformed or inconsistent schema; aborts compilation before any write
    #[error("Schema error: {0}")]
    Schema(String),

    /// Schema document or artifact could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unresolved template variables, collected across all services before abort
    #[error("Template error: {} unresolved reference(s): {}", .0.len(), format_issues(.0))]
    Template(Vec<TemplateIssue>),

    /// File access or I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Secret store lock held elsewhere after bounded retries
    #[error("Lock error: could not acquire {path} after {attempts} attempt(s)")]
    Lock { path: String, attempts: u32 },

    /// External process exceeded its deadline
    #[error("Timeout: {operation} did not finish within {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// External process exited unsuccessfully
    #[error("Command failed: {command}: {detail}")]
    Command { command: String, detail: String },

    /// Operator aborted a destructive operation; not a failure of the system
    #[error("Operation cancelled by operator")]
    Cancelled,

    /// Aggregate credential-validation failure
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_issues(issues: &[TemplateIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl StackError {
    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        StackError::Schema(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        StackError::Parse(msg.into())
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        StackError::Io(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        StackError::Internal(msg.into())
    }

    /// Check if this error stems from operator input rather than the system
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StackError::Schema(_)
                | StackError::Parse(_)
                | StackError::Template(_)
                | StackError::Cancelled
        )
    }
}

impl From<std::io::Error> for StackError {
    fn from(err: std::io::Error) -> Self {
        StackError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for StackError {
    fn from(err: serde_yaml::Error) -> Self {
        StackError::Parse(format!("YAML error: {}", err))
    }
}

impl From<serde_json::Error> for StackError {
    fn from(err: serde_json::Error) -> Self {
        StackError::Parse(format!("JSON error: {}", err))
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StackError::Schema("dangling reference".to_string());
        assert_eq!(err.to_string(), "Schema error: dangling reference");
    }

    #[test]
    fn test_template_error_collects_issues() {
        let err = StackError::Template(vec![
            TemplateIssue {
                service: "postgres".into(),
                variable: "POSTGRES_PASSWORD".into(),
            },
            TemplateIssue {
                service: "redis".into(),
                variable: "REDIS_PASSWORD".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 unresolved"));
        assert!(msg.contains("POSTGRES_PASSWORD"));
        assert!(msg.contains("REDIS_PASSWORD"));
    }

    #[test]
    fn test_is_user_error() {
        assert!(StackError::schema("x").is_user_error());
        assert!(StackError::Cancelled.is_user_error());
        assert!(!StackError::internal("x").is_user_error());
        assert!(!StackError::Lock {
            path: "p".into(),
            attempts: 3
        }
        .is_user_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StackError = io.into();
        assert!(matches!(err, StackError::Io(_)));
    }
}
