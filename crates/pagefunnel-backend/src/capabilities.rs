//! Backend capabilities.

/// Capabilities of a backend.
///
/// Used by the pipeline to decide between a single transactional replace and
/// the two-step delete + guarded insert.
#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    /// Human-readable engine name
    pub name: &'static str,

    /// Delete and insert can run inside one transaction
    pub transactional_replace: bool,

    /// Rejects an insert when any row falls outside a predicate
    pub guarded_insert: bool,

    /// Has a storage maintenance operation (compaction, checkpoint)
    pub maintenance: bool,
}

impl BackendCapabilities {
    /// Capabilities for DuckDB
    pub fn duckdb() -> Self {
        Self {
            name: "DuckDB",
            transactional_replace: true,
            guarded_insert: true,
            maintenance: true,
        }
    }
}
