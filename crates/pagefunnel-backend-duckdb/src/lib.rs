//! DuckDB backend implementation for pagefunnel.

use anyhow::Context;
use arrow::array::RecordBatch;
use async_trait::async_trait;
use duckdb::Connection;
use pagefunnel_backend::{
    Backend, BackendCapabilities, BackendError, ReplaceOutcome, ScopePredicate, TableRef,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::debug;

/// DuckDB backend for pagefunnel.
///
/// Wraps a single DuckDB connection and implements the Backend trait.
/// DuckDB operations are synchronous, so they're wrapped in spawn_blocking.
/// Uses Arc<Mutex<Connection>> since Connection is not Sync; temp tables staged
/// by [`Backend::stage_query`] live on that one connection.
pub struct DuckDbBackend {
    connection: Arc<Mutex<Connection>>,
}

fn lock(connection: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, BackendError> {
    connection
        .lock()
        .map_err(|_| BackendError::connection_failed("DuckDB connection mutex poisoned"))
}

fn guard_sql(sql: &str, scope: &ScopePredicate) -> String {
    format!(
        "SELECT COUNT(*) FROM ({}) AS incoming WHERE ({}) IS NOT TRUE",
        sql,
        scope.to_sql()
    )
}

/// Columns are matched by name, so the query's column order is free.
fn insert_by_name(table: &TableRef, sql: &str) -> String {
    format!("INSERT INTO {} BY NAME {}", table, sql)
}

fn count_out_of_scope(
    conn: &Connection,
    table: &TableRef,
    sql: &str,
    scope: &ScopePredicate,
) -> Result<(), BackendError> {
    let rejected: i64 = conn
        .query_row(&guard_sql(sql, scope), [], |row| row.get(0))
        .map_err(|e| BackendError::execution_failed(table.to_string(), e.to_string()))?;

    if rejected > 0 {
        return Err(BackendError::ScopeViolation {
            table: table.to_string(),
            predicate: scope.to_sql(),
            rejected: rejected as usize,
        });
    }
    Ok(())
}

impl DuckDbBackend {
    /// Open or create a database file at the given path.
    pub async fn new(database_path: &Path) -> Result<Self, BackendError> {
        let database_path = database_path.to_owned();

        let connection = tokio::task::spawn_blocking(move || {
            if let Some(parent) = database_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }

            Connection::open(&database_path)
                .with_context(|| format!("Failed to open DuckDB database: {:?}", database_path))
        })
        .await
        .map_err(|e| BackendError::connection_failed(e.to_string()))?
        .map_err(|e| BackendError::connection_failed(format!("{:#}", e)))?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Open a transient in-memory database.
    pub fn in_memory() -> Result<Self, BackendError> {
        let connection = Connection::open_in_memory()
            .map_err(|e| BackendError::connection_failed(e.to_string()))?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut Connection) -> Result<T, BackendError> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&connection)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| BackendError::Other(e.into()))?
    }
}

#[async_trait]
impl Backend for DuckDbBackend {
    async fn execute_sql(&self, sql: &str) -> Result<Vec<RecordBatch>, BackendError> {
        let sql = sql.to_string();

        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| BackendError::execution_failed("query", e.to_string()))?;

            let result = stmt
                .query_arrow([])
                .map_err(|e| BackendError::execution_failed("query", e.to_string()))?;

            Ok(result.collect())
        })
        .await
    }

    async fn execute_statement(&self, sql: &str) -> Result<usize, BackendError> {
        let sql = sql.to_string();

        self.with_connection(move |conn| {
            conn.execute(&sql, [])
                .map_err(|e| BackendError::execution_failed("statement", e.to_string()))
        })
        .await
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, BackendError> {
        let query = "SELECT COUNT(*) > 0 FROM information_schema.tables \
                     WHERE lower(table_schema) = lower(?) AND lower(table_name) = lower(?)";
        let table = table.clone();

        self.with_connection(move |conn| {
            conn.query_row(query, [&table.schema, &table.name], |row| row.get(0))
                .map_err(|e| BackendError::execution_failed(table.to_string(), e.to_string()))
        })
        .await
    }

    async fn ensure_schema(&self, schema: &str) -> Result<(), BackendError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", schema);

        self.with_connection(move |conn| {
            conn.execute(&sql, [])
                .map_err(|e| BackendError::execution_failed("schema", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get_row_count(&self, table: &TableRef) -> Result<usize, BackendError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let table = table.clone();

        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0)).map_err(|e| {
                if e.to_string().contains("does not exist") {
                    BackendError::not_found(table.schema.clone(), table.name.clone())
                } else {
                    BackendError::execution_failed(table.to_string(), e.to_string())
                }
            })?;
            Ok(count as usize)
        })
        .await
    }

    async fn stage_query(&self, name: &str, sql: &str) -> Result<TableRef, BackendError> {
        let staged = TableRef::temp(name);
        let create_sql = format!("CREATE OR REPLACE TEMP TABLE {} AS {}", name, sql);
        let context = staged.to_string();

        self.with_connection(move |conn| {
            conn.execute(&create_sql, [])
                .map_err(|e| BackendError::execution_failed(context, e.to_string()))?;
            Ok(())
        })
        .await?;

        Ok(staged)
    }

    async fn drop_table_if_exists(&self, table: &TableRef) -> Result<(), BackendError> {
        let drop_sql = format!("DROP TABLE IF EXISTS {}", table);
        let context = table.to_string();

        self.with_connection(move |conn| {
            conn.execute(&drop_sql, [])
                .map_err(|e| BackendError::execution_failed(context, e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn delete_where(
        &self,
        table: &TableRef,
        scope: &ScopePredicate,
    ) -> Result<usize, BackendError> {
        let delete_sql = format!("DELETE FROM {} WHERE {}", table, scope.to_sql());
        let context = table.to_string();

        self.with_connection(move |conn| {
            conn.execute(&delete_sql, [])
                .map_err(|e| BackendError::execution_failed(context, e.to_string()))
        })
        .await
    }

    async fn insert_guarded(
        &self,
        table: &TableRef,
        sql: &str,
        scope: &ScopePredicate,
    ) -> Result<usize, BackendError> {
        let table = table.clone();
        let sql = sql.to_string();
        let scope = scope.clone();

        self.with_connection(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| BackendError::execution_failed(table.to_string(), e.to_string()))?;

            // Dropping the transaction on an early return rolls it back.
            count_out_of_scope(&tx, &table, &sql, &scope)?;

            let inserted = tx
                .execute(&insert_by_name(&table, &sql), [])
                .map_err(|e| BackendError::execution_failed(table.to_string(), e.to_string()))?;

            tx.commit()
                .map_err(|e| BackendError::execution_failed(table.to_string(), e.to_string()))?;

            Ok(inserted)
        })
        .await
    }

    async fn optimize_table(&self, table: &TableRef) -> Result<(), BackendError> {
        let context = table.to_string();

        self.with_connection(move |conn| {
            // DuckDB has no per-table compaction; a checkpoint folds the WAL
            // into the database file and reclaims deleted row groups.
            conn.execute_batch("CHECKPOINT")
                .map_err(|e| BackendError::execution_failed(context, e.to_string()))
        })
        .await
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::duckdb()
    }

    async fn replace_partition(
        &self,
        table: &TableRef,
        sql: &str,
        scope: &ScopePredicate,
    ) -> Result<ReplaceOutcome, BackendError> {
        let start = Instant::now();
        let table = table.clone();
        let sql = sql.to_string();
        let scope = scope.clone();

        let (deleted, inserted) = self
            .with_connection(move |conn| {
                let context = table.to_string();
                let tx = conn
                    .transaction()
                    .map_err(|e| BackendError::execution_failed(context.clone(), e.to_string()))?;

                count_out_of_scope(&tx, &table, &sql, &scope)?;

                let deleted = tx
                    .execute(&format!("DELETE FROM {} WHERE {}", table, scope.to_sql()), [])
                    .map_err(|e| BackendError::execution_failed(context.clone(), e.to_string()))?;

                let inserted = tx
                    .execute(&insert_by_name(&table, &sql), [])
                    .map_err(|e| BackendError::execution_failed(context.clone(), e.to_string()))?;

                tx.commit()
                    .map_err(|e| BackendError::execution_failed(context, e.to_string()))?;

                Ok((deleted, inserted))
            })
            .await?;

        debug!(deleted, inserted, "replaced scope in one transaction");

        Ok(ReplaceOutcome {
            deleted,
            inserted,
            transactional: true,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pagefunnel_backend::two_step_replace;
    use tempfile::TempDir;

    async fn seeded_backend() -> DuckDbBackend {
        let backend = DuckDbBackend::in_memory().unwrap();
        backend.ensure_schema("loyalty").await.unwrap();
        backend
            .execute_statement(
                "CREATE TABLE loyalty.funnel (COMPANY_CODE SMALLINT NOT NULL, Hash_ID VARCHAR, DP_DATA_DT DATE)",
            )
            .await
            .unwrap();
        backend
            .execute_statement(
                r#"
                INSERT INTO loyalty.funnel VALUES
                    (11, 'a', DATE '2022-12-31'),
                    (11, 'b', DATE '2022-12-01'),
                    (12, 'c', DATE '2022-12-31'),
                    (11, 'd', DATE '2022-11-30')
            "#,
            )
            .await
            .unwrap();
        backend
    }

    fn table() -> TableRef {
        TableRef::new("loyalty", "funnel")
    }

    fn scope() -> ScopePredicate {
        ScopePredicate::new(11, NaiveDate::from_ymd_opt(2022, 12, 31).unwrap())
    }

    const IN_SCOPE: &str =
        "SELECT CAST(11 AS SMALLINT) AS COMPANY_CODE, 'z' AS Hash_ID, DATE '2022-12-31' AS DP_DATA_DT";

    const OUT_OF_SCOPE: &str = "SELECT CAST(11 AS SMALLINT) AS COMPANY_CODE, 'z' AS Hash_ID, DATE '2022-12-31' AS DP_DATA_DT \
         UNION ALL SELECT CAST(12 AS SMALLINT), 'y', DATE '2022-12-31'";

    #[tokio::test]
    async fn test_backend_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.duckdb");

        let _backend = DuckDbBackend::new(&db_path).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_table_exists() {
        let backend = seeded_backend().await;

        assert!(backend.table_exists(&table()).await.unwrap());
        assert!(backend
            .table_exists(&TableRef::new("LOYALTY", "FUNNEL"))
            .await
            .unwrap());
        assert!(!backend
            .table_exists(&TableRef::new("loyalty", "missing"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_row_count_of_missing_table() {
        let backend = DuckDbBackend::in_memory().unwrap();

        let err = backend
            .get_row_count(&TableRef::new("main", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_stage_query() {
        let backend = DuckDbBackend::in_memory().unwrap();

        let staged = backend
            .stage_query("stage", "SELECT 1 AS id UNION ALL SELECT 2")
            .await
            .unwrap();

        assert_eq!(staged, TableRef::temp("stage"));
        assert_eq!(backend.get_row_count(&staged).await.unwrap(), 2);

        backend.drop_table_if_exists(&staged).await.unwrap();
        assert!(backend.get_row_count(&staged).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_where_only_touches_scope() {
        let backend = seeded_backend().await;

        let deleted = backend.delete_where(&table(), &scope()).await.unwrap();
        assert_eq!(deleted, 2);

        let batches = backend
            .execute_sql("SELECT Hash_ID FROM loyalty.funnel ORDER BY Hash_ID")
            .await
            .unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn test_insert_guarded_rejects_out_of_scope_rows() {
        let backend = seeded_backend().await;

        let err = backend
            .insert_guarded(&table(), OUT_OF_SCOPE, &scope())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::ScopeViolation { rejected: 1, .. }));
        assert_eq!(backend.get_row_count(&table()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_insert_guarded_rejects_null_scope_columns() {
        let backend = seeded_backend().await;

        let sql = "SELECT CAST(11 AS SMALLINT) AS COMPANY_CODE, 'n' AS Hash_ID, CAST(NULL AS DATE) AS DP_DATA_DT";
        let err = backend
            .insert_guarded(&table(), sql, &scope())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::ScopeViolation { .. }));
    }

    #[tokio::test]
    async fn test_transactional_replace() {
        let backend = seeded_backend().await;

        let outcome = backend
            .replace_partition(&table(), IN_SCOPE, &scope())
            .await
            .unwrap();

        assert!(outcome.transactional);
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(backend.get_row_count(&table()).await.unwrap(), 3);

        // Replaying the same replace converges on the same slice
        let again = backend
            .replace_partition(&table(), IN_SCOPE, &scope())
            .await
            .unwrap();
        assert_eq!(again.deleted, 1);
        assert_eq!(backend.get_row_count(&table()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_inserts_match_columns_by_name() {
        let backend = seeded_backend().await;
        let reordered = "SELECT DATE '2022-12-31' AS DP_DATA_DT, 'z' AS Hash_ID, CAST(11 AS SMALLINT) AS COMPANY_CODE";
        let landed = "SELECT COUNT(*) AS n FROM loyalty.funnel \
             WHERE COMPANY_CODE = 11 AND Hash_ID = 'z' AND DP_DATA_DT = DATE '2022-12-31'";

        backend
            .replace_partition(&table(), reordered, &scope())
            .await
            .unwrap();
        let batches = backend.execute_sql(landed).await.unwrap();
        let count = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .unwrap()
            .value(0);
        assert_eq!(count, 1);

        backend.delete_where(&table(), &scope()).await.unwrap();
        let inserted = backend
            .insert_guarded(&table(), reordered, &scope())
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(backend.get_row_count(&table()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_transactional_replace_rolls_back_on_violation() {
        let backend = seeded_backend().await;

        let err = backend
            .replace_partition(&table(), OUT_OF_SCOPE, &scope())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::ScopeViolation { .. }));
        // Old slice untouched
        assert_eq!(backend.get_row_count(&table()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_two_step_replace_leaves_scope_empty_on_failed_insert() {
        let backend = seeded_backend().await;

        let err = two_step_replace(&backend, &table(), OUT_OF_SCOPE, &scope())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::PartialReplace { deleted: 2, .. }));
        assert_eq!(backend.get_row_count(&table()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_optimize_table() {
        let temp_dir = TempDir::new().unwrap();
        let backend = DuckDbBackend::new(&temp_dir.path().join("opt.duckdb"))
            .await
            .unwrap();
        backend
            .execute_statement("CREATE TABLE main.t AS SELECT 1 AS id")
            .await
            .unwrap();

        backend
            .optimize_table(&TableRef::new("main", "t"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_capabilities() {
        let backend = DuckDbBackend::in_memory().unwrap();

        let caps = backend.capabilities();
        assert_eq!(caps.name, "DuckDB");
        assert!(caps.transactional_replace);
        assert!(caps.guarded_insert);
    }
}
