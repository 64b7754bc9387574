use crate::params::ParamError;
use crate::rows::RowDecodeError;
use pagefunnel_backend::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Setup errors: configuration and target selection.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to load configuration file: {path}\n{source}")]
    ConfigLoadError {
        path: PathBuf,
        source: anyhow::Error,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Target '{target}' not found in pagefunnel.yml. Available targets: {available}")]
    TargetNotFound { target: String, available: String },

    #[error("Unsupported target type '{target_type}'. Supported: duckdb")]
    UnsupportedBackend { target_type: String },
}

/// Errors of one pipeline run, one variant per failure point.
///
/// The message says what state the target scope was left in.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Params(#[from] ParamError),

    #[error("Source table not found: {table}\n\nHint: seed a local source with 'pagefunnel seed'")]
    SourceTableNotFound { table: String },

    #[error("Failed to inspect source table {table}: {source}")]
    SourceCheckFailed {
        table: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to prepare target table {table}: {source}")]
    TargetSetupFailed {
        table: String,
        #[source]
        source: BackendError,
    },

    #[error("Metric derivation failed; nothing was written:\n  {source}\n\nSQL:\n{sql}")]
    DerivationFailed {
        sql: String,
        #[source]
        source: BackendError,
    },

    #[error("Delete of scope [{scope}] from {table} failed; target unchanged: {source}")]
    DeleteFailed {
        table: String,
        scope: String,
        #[source]
        source: BackendError,
    },

    #[error("Insert into {table} failed after deleting {deleted} row(s) of scope [{scope}]; the scope stays empty until the job is rerun: {source}")]
    InsertFailed {
        table: String,
        scope: String,
        deleted: usize,
        #[source]
        source: BackendError,
    },

    #[error("{backend} cannot guard inserts; refusing to delete scope [{scope}] from {table}")]
    UnguardedBackend {
        backend: &'static str,
        table: String,
        scope: String,
    },

    #[error("Replace of scope [{scope}] in {table} was rolled back; target unchanged: {source}")]
    ReplaceFailed {
        table: String,
        scope: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to read scope [{scope}] from {table}: {source}")]
    ScopeReadFailed {
        table: String,
        scope: String,
        #[source]
        source: BackendError,
    },

    #[error("Rows of {table} have an unexpected shape: {source}")]
    RowDecode {
        table: String,
        #[source]
        source: RowDecodeError,
    },
}
