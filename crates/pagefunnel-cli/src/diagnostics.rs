//! Read-back checks over one scope of the target table.

use crate::errors::PipelineError;
use crate::rows::{rows_from_batches, PageFunnelRow};
use pagefunnel_backend::{Backend, ScopePredicate, TableRef};
use std::collections::HashMap;

/// Findings for one scope. A clean scope has no duplicates, NULLs or
/// negative counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeReport {
    pub rows: usize,
    /// (company code, subject, month) keys that appear more than once
    pub duplicate_keys: usize,
    /// Rows with at least one NULL counter
    pub null_counters: usize,
    /// Rows with at least one negative counter
    pub negative_counters: usize,
}

impl ScopeReport {
    pub fn from_rows(rows: &[PageFunnelRow]) -> Self {
        let mut keys: HashMap<_, usize> = HashMap::new();
        for row in rows {
            *keys.entry(row.key()).or_default() += 1;
        }

        Self {
            rows: rows.len(),
            duplicate_keys: keys.values().filter(|&&n| n > 1).count(),
            null_counters: rows
                .iter()
                .filter(|r| r.counters.iter().any(Option::is_none))
                .count(),
            negative_counters: rows
                .iter()
                .filter(|r| r.counters.iter().flatten().any(|&v| v < 0))
                .count(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.duplicate_keys == 0 && self.null_counters == 0 && self.negative_counters == 0
    }
}

/// All rows of `table` inside the scope, ordered by subject and month.
pub async fn read_scope(
    backend: &dyn Backend,
    table: &TableRef,
    scope: &ScopePredicate,
) -> Result<Vec<PageFunnelRow>, PipelineError> {
    let sql = format!(
        r#"SELECT * FROM {} WHERE {} ORDER BY Hash_ID, "month""#,
        table,
        scope.to_sql()
    );

    let batches = backend
        .execute_sql(&sql)
        .await
        .map_err(|e| PipelineError::ScopeReadFailed {
            table: table.to_string(),
            scope: scope.to_string(),
            source: e,
        })?;

    rows_from_batches(&batches).map_err(|e| PipelineError::RowDecode {
        table: table.to_string(),
        source: e,
    })
}

pub async fn check_scope(
    backend: &dyn Backend,
    table: &TableRef,
    scope: &ScopePredicate,
) -> Result<ScopeReport, PipelineError> {
    let rows = read_scope(backend, table, scope).await?;
    let report = ScopeReport::from_rows(&rows);

    tracing::info!(
        table = %table,
        scope = %scope,
        rows = report.rows,
        duplicate_keys = report.duplicate_keys,
        null_counters = report.null_counters,
        negative_counters = report.negative_counters,
        "Checked scope"
    );

    Ok(report)
}
