//! Renders the page funnel query and target DDL.

use crate::config::SourceColumns;
use crate::counters::{CounterSpec, COUNTERS};
use crate::params::RunContext;
use pagefunnel_backend::{ScopePredicate, TableRef};

/// SQL statements for one run.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    /// Read-only query producing the run's PageFunnelRow set
    pub derive_sql: String,
    /// CREATE TABLE IF NOT EXISTS for the target
    pub target_ddl: String,
    pub scope: ScopePredicate,
}

/// Quote a string as a SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn counter_expr(counter: &CounterSpec) -> String {
    let condition = match counter.previous_page {
        Some(previous) => format!(
            "previous_page_name = {} AND current_page_name = {}",
            quote_literal(previous),
            quote_literal(counter.current_page)
        ),
        None => format!("current_page_name = {}", quote_literal(counter.current_page)),
    };

    // count() over CASE yields 0, not NULL, when nothing matches
    format!(
        "count(CASE WHEN {} THEN Hash_ID END) AS {}",
        condition, counter.name
    )
}

/// Renders the funnel query and target DDL from a resolved run context.
pub struct SqlCompiler {
    columns: SourceColumns,
}

impl SqlCompiler {
    pub fn new(columns: SourceColumns) -> Self {
        Self { columns }
    }

    pub fn compile(&self, ctx: &RunContext) -> CompiledJob {
        CompiledJob {
            derive_sql: self.derive_sql(ctx),
            target_ddl: target_ddl(&ctx.target),
            scope: ctx.scope(),
        }
    }

    /// Per subject: previous page via lag over time order, then one
    /// conditional count per counter, grouped by subject and month.
    ///
    /// Events tied on timestamp are ordered by page name so reruns see the
    /// same lag sequence. Events without a subject are dropped before the lag, so
    /// they never become anyone's previous page.
    pub fn derive_sql(&self, ctx: &RunContext) -> String {
        let c = &self.columns;

        let counters = COUNTERS
            .iter()
            .map(|counter| format!("    ,{}", counter_expr(counter)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"WITH visit_pagename_prep AS (
    SELECT
        {ts} AS date_time
        ,left(CAST({ts} AS VARCHAR), 7) AS month_key
        ,{subject} AS Hash_ID
        ,{page} AS current_page_name
        ,lag({page}) OVER (PARTITION BY {subject} ORDER BY {ts} ASC, {page} ASC) AS previous_page_name
    FROM {source}
    WHERE left(CAST({ts} AS VARCHAR), 7) = {month}
      AND {country_col} = {country}
      AND {subject} IS NOT NULL
)
SELECT
    CAST({company_code} AS SMALLINT) AS COMPANY_CODE
    ,Hash_ID
    ,month_key AS "month"
{counters}
    ,CAST({data_date} AS DATE) AS DP_DATA_DT
    ,CAST({load_ts} AS TIMESTAMP) AS DP_LOAD_TS
FROM visit_pagename_prep
GROUP BY Hash_ID, month_key"#,
            ts = c.timestamp,
            subject = c.subject,
            page = c.page,
            country_col = c.country,
            source = ctx.source,
            month = quote_literal(&ctx.reporting_month()),
            country = quote_literal(&ctx.country),
            company_code = ctx.company_code,
            counters = counters,
            data_date = quote_literal(&ctx.data_date.format("%Y-%m-%d").to_string()),
            load_ts = quote_literal(&ctx.load_ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        )
    }
}

/// DDL of the target table. DuckDB has no partition clause; the table is
/// logically partitioned by (COMPANY_CODE, DP_DATA_DT) through the scope
/// predicate alone.
pub fn target_ddl(target: &TableRef) -> String {
    let counters = COUNTERS
        .iter()
        .map(|counter| format!("    ,{} BIGINT", counter.name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"CREATE TABLE IF NOT EXISTS {} (
    COMPANY_CODE SMALLINT NOT NULL
    ,Hash_ID VARCHAR
    ,"month" VARCHAR
{}
    ,DP_DATA_DT DATE
    ,DP_LOAD_TS TIMESTAMP
)"#,
        target, counters
    )
}
