//! Runs one page funnel job against a backend.

use crate::compiler::CompiledJob;
use crate::config::ReplaceMode;
use crate::counters::placeholder_groups;
use crate::errors::PipelineError;
use crate::params::RunContext;
use pagefunnel_backend::{two_step_replace, Backend, BackendError, ReplaceOutcome, ScopePredicate};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Temp table holding the derived rows between derivation and the write.
pub const STAGE_TABLE: &str = "pagefunnel_stage";

/// Result of one successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub scope: ScopePredicate,
    pub derived_rows: usize,
    pub outcome: ReplaceOutcome,
    /// False when maintenance was skipped or failed
    pub maintained: bool,
    pub duration: Duration,
}

/// Fail before any write if the source table is missing.
pub async fn validate_source(backend: &dyn Backend, ctx: &RunContext) -> Result<(), PipelineError> {
    let exists = backend
        .table_exists(&ctx.source)
        .await
        .map_err(|e| PipelineError::SourceCheckFailed {
            table: ctx.source.to_string(),
            source: e,
        })?;

    if !exists {
        return Err(PipelineError::SourceTableNotFound {
            table: ctx.source.to_string(),
        });
    }

    Ok(())
}

/// Create the target schema and table on first run.
pub async fn prepare_target(
    backend: &dyn Backend,
    ctx: &RunContext,
    job: &CompiledJob,
) -> Result<(), PipelineError> {
    let setup_failed = |e: BackendError| PipelineError::TargetSetupFailed {
        table: ctx.target.to_string(),
        source: e,
    };

    backend
        .ensure_schema(&ctx.target.schema)
        .await
        .map_err(setup_failed)?;
    backend
        .execute_statement(&job.target_ddl)
        .await
        .map_err(setup_failed)?;

    Ok(())
}

/// Derive, replace the scope, then maintain the target.
///
/// Derived rows are staged first, so a failing source query aborts before
/// anything is deleted.
pub async fn run_job(
    backend: &dyn Backend,
    ctx: &RunContext,
    job: &CompiledJob,
    mode: ReplaceMode,
) -> Result<RunReport, PipelineError> {
    let start = Instant::now();

    for group in placeholder_groups() {
        debug!(counters = %group.join(", "), "Counters share one predicate and carry equal values");
    }

    validate_source(backend, ctx).await?;
    prepare_target(backend, ctx, job).await?;

    let derivation_failed = |e: BackendError| PipelineError::DerivationFailed {
        sql: job.derive_sql.clone(),
        source: e,
    };

    let staged = backend
        .stage_query(STAGE_TABLE, &job.derive_sql)
        .await
        .map_err(derivation_failed)?;

    let replaced = match backend.get_row_count(&staged).await {
        Ok(derived_rows) => {
            info!(
                source = %ctx.source,
                month = %ctx.reporting_month(),
                rows = derived_rows,
                "Derived page funnel rows"
            );
            let insert_sql = format!("SELECT * FROM {}", staged);
            replace(backend, ctx, &insert_sql, &job.scope, mode)
                .await
                .map(|outcome| (derived_rows, outcome))
        }
        Err(e) => Err(derivation_failed(e)),
    };

    // The stage is dropped whether or not the write went through
    if let Err(e) = backend.drop_table_if_exists(&staged).await {
        warn!(table = %staged, error = %e, "Failed to drop stage table");
    }

    let (derived_rows, outcome) = replaced?;

    info!(
        table = %ctx.target,
        scope = %job.scope,
        deleted = outcome.deleted,
        inserted = outcome.inserted,
        transactional = outcome.transactional,
        "Replaced scope"
    );

    let maintained = maintain(backend, ctx).await;

    Ok(RunReport {
        scope: job.scope.clone(),
        derived_rows,
        outcome,
        maintained,
        duration: start.elapsed(),
    })
}

async fn replace(
    backend: &dyn Backend,
    ctx: &RunContext,
    insert_sql: &str,
    scope: &ScopePredicate,
    mode: ReplaceMode,
) -> Result<ReplaceOutcome, PipelineError> {
    let table = ctx.target.to_string();
    let caps = backend.capabilities();

    if mode == ReplaceMode::Auto && caps.transactional_replace {
        return backend
            .replace_partition(&ctx.target, insert_sql, scope)
            .await
            .map_err(|e| PipelineError::ReplaceFailed {
                table,
                scope: scope.to_string(),
                source: e,
            });
    }

    // Without the guard a stray row could land after the delete
    if !caps.guarded_insert {
        return Err(PipelineError::UnguardedBackend {
            backend: caps.name,
            table,
            scope: scope.to_string(),
        });
    }

    two_step_replace(backend, &ctx.target, insert_sql, scope)
        .await
        .map_err(|e| match e {
            BackendError::PartialReplace {
                deleted, source, ..
            } => PipelineError::InsertFailed {
                table,
                scope: scope.to_string(),
                deleted,
                source: *source,
            },
            other => PipelineError::DeleteFailed {
                table,
                scope: scope.to_string(),
                source: other,
            },
        })
}

/// Best effort: a failure is logged and the run still succeeds.
async fn maintain(backend: &dyn Backend, ctx: &RunContext) -> bool {
    if !backend.capabilities().maintenance {
        return false;
    }

    match backend.optimize_table(&ctx.target).await {
        Ok(()) => true,
        Err(e) => {
            warn!(table = %ctx.target, error = %e, "Storage maintenance failed");
            false
        }
    }
}
