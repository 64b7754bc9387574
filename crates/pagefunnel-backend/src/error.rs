//! Backend error types.

use thiserror::Error;

/// Errors that can occur during backend operations.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Failed to connect to the backend.
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Failed to execute a SQL statement.
    #[error("Execution failed for '{context}': {message}")]
    ExecutionFailed { context: String, message: String },

    /// Table or view not found.
    #[error("Table or view not found: {schema}.{name}")]
    NotFound { schema: String, name: String },

    /// A guarded insert saw rows outside the write scope and wrote nothing.
    #[error("Insert into {table} rejected: {rejected} row(s) fall outside scope [{predicate}]")]
    ScopeViolation {
        table: String,
        predicate: String,
        rejected: usize,
    },

    /// The delete half of a two-step replace committed but the insert failed.
    ///
    /// The scope is left empty until the job is rerun.
    #[error("Replace of {table} failed after deleting {deleted} row(s); scope is empty until rerun: {source}")]
    PartialReplace {
        table: String,
        deleted: usize,
        #[source]
        source: Box<BackendError>,
    },

    /// Generic backend error.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Create an execution failed error.
    pub fn execution_failed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            schema: schema.into(),
            name: name.into(),
        }
    }
}
