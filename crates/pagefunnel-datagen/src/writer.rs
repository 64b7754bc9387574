//! DuckDB bulk writer using the Appender API.

use crate::journey::ClickEvent;
use anyhow::{Context, Result};
use duckdb::{params, Connection};
use std::path::Path;

/// Where and under which column names source events are stored.
#[derive(Debug, Clone)]
pub struct EventTableLayout {
    pub schema: String,
    pub table: String,
    pub timestamp_column: String,
    pub subject_column: String,
    pub page_column: String,
    pub country_column: String,
}

impl Default for EventTableLayout {
    fn default() -> Self {
        Self {
            schema: "adobe_analytic".to_string(),
            table: "webapp_event".to_string(),
            timestamp_column: "date_time".to_string(),
            subject_column: "post_evar1".to_string(),
            page_column: "post_evar2".to_string(),
            country_column: "country".to_string(),
        }
    }
}

/// Append events to the source table, creating schema and table if needed.
///
/// Existing rows are kept so several months or countries can be seeded into
/// the same table. Returns the number of rows appended.
pub fn write_events_to_duckdb<I>(db_path: &Path, layout: &EventTableLayout, events: I) -> Result<usize>
where
    I: IntoIterator<Item = ClickEvent>,
{
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open DuckDB database: {:?}", db_path))?;

    conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", layout.schema), [])
        .with_context(|| format!("Failed to create schema: {}", layout.schema))?;

    let create_sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.{} (
            {} TIMESTAMP NOT NULL,
            {} VARCHAR,
            {} VARCHAR,
            {} VARCHAR
        )
        "#,
        layout.schema,
        layout.table,
        layout.timestamp_column,
        layout.subject_column,
        layout.page_column,
        layout.country_column
    );

    conn.execute(&create_sql, [])
        .with_context(|| format!("Failed to create table: {}.{}", layout.schema, layout.table))?;

    let mut appender = conn
        .appender_to_db(&layout.table, &layout.schema)
        .with_context(|| format!("Failed to create appender for table: {}", layout.table))?;

    let mut count = 0;
    for event in events {
        appender
            .append_row(params![
                event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                event.subject_id,
                event.page.as_str(),
                event.country,
            ])
            .with_context(|| format!("Failed to append row {}", count))?;
        count += 1;
    }

    appender.flush().context("Failed to flush appender")?;

    Ok(count)
}
