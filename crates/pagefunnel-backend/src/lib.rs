//! Backend trait and types for pagefunnel execution engines.
//!
//! The job only decides what to compute and which slice of the target table to
//! replace. Backends own the SQL engine and the table store.

mod capabilities;
mod error;
mod types;

pub use capabilities::BackendCapabilities;
pub use error::BackendError;
pub use types::{ReplaceOutcome, ScopePredicate, TableRef};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use std::time::Instant;

/// Abstract interface for pagefunnel execution backends.
///
/// Backends are responsible for:
/// - Executing SQL queries and statements
/// - Staging derived rows before any write
/// - Conditional delete and guarded insert against a scope predicate
/// - Storage maintenance
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a SQL query and return results.
    async fn execute_sql(&self, sql: &str) -> Result<Vec<RecordBatch>, BackendError>;

    /// Execute a DDL or DML statement, returning the number of affected rows.
    async fn execute_statement(&self, sql: &str) -> Result<usize, BackendError>;

    /// Check if a table exists.
    async fn table_exists(&self, table: &TableRef) -> Result<bool, BackendError>;

    /// Ensure a schema exists, creating it if necessary.
    async fn ensure_schema(&self, schema: &str) -> Result<(), BackendError>;

    /// Get the row count of a table.
    async fn get_row_count(&self, table: &TableRef) -> Result<usize, BackendError>;

    /// Materialize a query into a session-local temporary table.
    async fn stage_query(&self, name: &str, sql: &str) -> Result<TableRef, BackendError>;

    /// Drop a table if it exists.
    async fn drop_table_if_exists(&self, table: &TableRef) -> Result<(), BackendError>;

    /// Delete every row matching the scope predicate.
    async fn delete_where(
        &self,
        table: &TableRef,
        scope: &ScopePredicate,
    ) -> Result<usize, BackendError>;

    /// Insert the rows of `sql`, failing with [`BackendError::ScopeViolation`]
    /// and writing nothing if any row does not satisfy the scope predicate.
    /// Columns are matched to the table by name, not position.
    async fn insert_guarded(
        &self,
        table: &TableRef,
        sql: &str,
        scope: &ScopePredicate,
    ) -> Result<usize, BackendError>;

    /// Compact or checkpoint the table's storage.
    async fn optimize_table(&self, table: &TableRef) -> Result<(), BackendError>;

    /// Get the capabilities of this backend.
    fn capabilities(&self) -> BackendCapabilities;

    /// Replace the scope of `table` with the rows of `sql`.
    ///
    /// The default is the two-step delete + guarded insert. Backends with
    /// transactions override this so a failure leaves the old rows in place.
    async fn replace_partition(
        &self,
        table: &TableRef,
        sql: &str,
        scope: &ScopePredicate,
    ) -> Result<ReplaceOutcome, BackendError> {
        two_step_replace(self, table, sql, scope).await
    }
}

/// Delete the scope, then insert with the same predicate as a write guard.
///
/// If the insert fails after the delete went through, the error is wrapped in
/// [`BackendError::PartialReplace`]: the scope is empty, never duplicated.
pub async fn two_step_replace<B: Backend + ?Sized>(
    backend: &B,
    table: &TableRef,
    sql: &str,
    scope: &ScopePredicate,
) -> Result<ReplaceOutcome, BackendError> {
    let start = Instant::now();

    let deleted = backend.delete_where(table, scope).await?;

    let inserted = backend
        .insert_guarded(table, sql, scope)
        .await
        .map_err(|e| BackendError::PartialReplace {
            table: table.to_string(),
            deleted,
            source: Box::new(e),
        })?;

    Ok(ReplaceOutcome {
        deleted,
        inserted,
        transactional: false,
        duration: start.elapsed(),
    })
}
