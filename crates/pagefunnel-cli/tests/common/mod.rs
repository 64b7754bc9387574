//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use pagefunnel_backend::Backend;
use pagefunnel_backend_duckdb::DuckDbBackend;
use pagefunnel_cli::{
    read_scope, CompiledJob, Config, PageFunnelRow, ParamError, RunContext, RunParams,
    SqlCompiler,
};

/// One source event: timestamp, subject, page, country.
pub type Event<'a> = (&'a str, &'a str, &'a str, &'a str);

pub fn config() -> Config {
    let mut config = Config::default();
    config.companies.insert("my".to_string(), 12);
    config
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn params(country: &str, company_code: i16, data_date: NaiveDate) -> RunParams {
    RunParams {
        country: country.to_string(),
        company_code,
        period: data_date.month().to_string(),
        year: data_date.year().to_string(),
        data_date: Some(data_date),
        target_db: None,
        target_table: None,
    }
}

/// Resolve and compile with a fixed clock.
pub fn compile(params: &RunParams) -> Result<(RunContext, CompiledJob), ParamError> {
    let config = config();
    let target = config.target("dev").unwrap().clone();
    let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();

    let ctx = RunContext::resolve(params, &config, &target, now)?;
    let job = SqlCompiler::new(config.source.columns.clone()).compile(&ctx);
    Ok((ctx, job))
}

pub async fn create_source(backend: &dyn Backend) {
    backend
        .execute_statement("CREATE SCHEMA IF NOT EXISTS adobe_analytic")
        .await
        .unwrap();
    backend
        .execute_statement(
            "CREATE TABLE IF NOT EXISTS adobe_analytic.webapp_event (
                date_time TIMESTAMP, post_evar1 VARCHAR, post_evar2 VARCHAR, country VARCHAR)",
        )
        .await
        .unwrap();
}

pub async fn insert_events(backend: &dyn Backend, events: &[Event<'_>]) {
    create_source(backend).await;
    if events.is_empty() {
        return;
    }

    let values = events
        .iter()
        .map(|(ts, subject, page, country)| {
            format!("(TIMESTAMP '{}', '{}', '{}', '{}')", ts, subject, page, country)
        })
        .collect::<Vec<_>>()
        .join(",\n");

    backend
        .execute_statement(&format!(
            "INSERT INTO adobe_analytic.webapp_event VALUES {}",
            values
        ))
        .await
        .unwrap();
}

pub fn in_memory() -> DuckDbBackend {
    DuckDbBackend::in_memory().unwrap()
}

pub async fn scope_rows(backend: &dyn Backend, ctx: &RunContext) -> Vec<PageFunnelRow> {
    read_scope(backend, &ctx.target, &ctx.scope()).await.unwrap()
}
