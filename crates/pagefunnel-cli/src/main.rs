use anyhow::{Context, Result};
use arrow::util::pretty;
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use pagefunnel_backend::Backend;
use pagefunnel_backend_duckdb::DuckDbBackend;
use pagefunnel_cli::{
    check_scope, executor, init_tracing, placeholder_groups, BackendType, Config, RunContext,
    RunParams, SqlCompiler, Target, TracingConfig,
};
use pagefunnel_datagen::{write_events_to_duckdb, EventTableLayout, JourneyConfig, JourneyGenerator};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pagefunnel")]
#[command(about = "Monthly page funnel metrics from clickstream events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive page funnel metrics and replace the run's scope in the target table
    Run(RunArgs),
    /// Check one scope of the target table for duplicates and bad counters
    Check(CheckArgs),
    /// Write deterministic synthetic clickstream events to the source table
    Seed(SeedArgs),
}

#[derive(Args)]
struct ProjectArgs {
    /// Path to the project root (pagefunnel.yml is searched upwards from here)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// DuckDB database file path
    #[arg(long)]
    database: Option<PathBuf>,

    /// Target environment from pagefunnel.yml
    #[arg(long, default_value = "dev")]
    target: String,
}

#[derive(Args)]
struct ScopeArgs {
    /// Country of the events to read, mapped to a company code
    #[arg(long)]
    country: String,

    /// Company code; must match the code mapped to the country
    #[arg(long)]
    company_code: i16,

    /// Target database (schema) override
    #[arg(long)]
    target_db: Option<String>,

    /// Target table override
    #[arg(long)]
    target_table: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[command(flatten)]
    scope: ScopeArgs,

    /// Reporting month, 1-12
    #[arg(long)]
    period: String,

    /// Reporting year, four digits
    #[arg(long)]
    year: String,

    /// Data date stamped on every row [default: yesterday in the reporting locale]
    #[arg(long)]
    data_date: Option<NaiveDate>,

    /// Display the written scope after execution
    #[arg(long)]
    show_results: bool,

    /// Show compiled SQL
    #[arg(long, short)]
    verbose: bool,

    /// Resolve parameters and compile without executing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[command(flatten)]
    scope: ScopeArgs,

    /// Data date whose month selects the scope
    #[arg(long)]
    data_date: NaiveDate,
}

#[derive(Args)]
struct SeedArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Country written on every event
    #[arg(long, default_value = "th")]
    country: String,

    /// Month to generate, 1-12
    #[arg(long)]
    period: u32,

    /// Year to generate
    #[arg(long)]
    year: i32,

    /// Number of subjects
    #[arg(long, default_value_t = 1000)]
    subjects: usize,

    /// Maximum events per subject
    #[arg(long, default_value_t = 20)]
    max_events: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match &cli.command {
        Commands::Run(args) if args.verbose => "debug",
        _ => "info",
    };
    init_tracing(&TracingConfig::from_env(default_filter));

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(args) => check(args).await,
        Commands::Seed(args) => seed(args).await,
    }
}

/// Load configuration and select the target.
fn load_project(args: &ProjectArgs) -> Result<(Config, PathBuf, Target)> {
    let (config, config_path) = Config::discover(&args.project_dir)
        .with_context(|| "Failed to load pagefunnel.yml configuration")?;

    let project_dir = match &config_path {
        Some(path) => {
            println!("Configuration: {}", path.display());
            path.parent().unwrap_or(args.project_dir.as_path()).to_path_buf()
        }
        None => {
            println!("Configuration: built-in defaults (no pagefunnel.yml found)");
            args.project_dir.clone()
        }
    };

    let target = config.target(&args.target)?.clone();
    Ok((config, project_dir, target))
}

fn database_path(args: &ProjectArgs, project_dir: &Path, target: &Target) -> Result<PathBuf> {
    match target.backend_type()? {
        BackendType::DuckDB => {
            if let Some(path) = &args.database {
                return Ok(path.clone());
            }
            let database = target
                .database
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("DuckDB target requires 'database' field"))?;
            Ok(project_dir.join(database))
        }
    }
}

async fn open_backend(db_path: &Path) -> Result<Box<dyn Backend>> {
    println!("Backend: DuckDB");
    println!("Database: {}", db_path.display());

    let backend = DuckDbBackend::new(db_path)
        .await
        .with_context(|| format!("Failed to initialize DuckDB at {:?}", db_path))?;
    Ok(Box::new(backend))
}

async fn run(args: RunArgs) -> Result<()> {
    // 1. Configuration
    let (config, project_dir, target) = load_project(&args.project)?;
    println!("Project: {} (version {})", config.name, config.version);

    // 2. Resolve parameters; fails before anything is read or written
    let params = RunParams {
        country: args.scope.country,
        company_code: args.scope.company_code,
        period: args.period,
        year: args.year,
        data_date: args.data_date,
        target_db: args.scope.target_db,
        target_table: args.scope.target_table,
    };
    let ctx = RunContext::resolve(&params, &config, &target, Utc::now())?;

    println!(
        "\nCountry {} -> company code {}, month {}, data date {}",
        ctx.country,
        ctx.company_code,
        ctx.reporting_month(),
        ctx.data_date
    );
    println!("Source: {}", ctx.source);
    println!("Target: {} [{}]", ctx.target, ctx.scope());

    // 3. Compile
    let job = SqlCompiler::new(config.source.columns.clone()).compile(&ctx);

    if args.verbose {
        println!("\n  Compiled SQL:");
        println!("  {}", "─".repeat(58));
        for line in job.derive_sql.lines() {
            println!("  {}", line);
        }
        println!("  {}", "─".repeat(58));

        for group in placeholder_groups() {
            println!("  Identical counters: {}", group.join(", "));
        }
    }

    if args.dry_run {
        println!("\n[DRY RUN] Skipping execution");
        return Ok(());
    }

    // 4. Execute
    let db_path = database_path(&args.project, &project_dir, &target)?;
    let backend = open_backend(&db_path).await?;

    println!("\n{}", "=".repeat(60));
    println!("Running page funnel...");
    println!("{}", "=".repeat(60));

    let report = executor::run_job(backend.as_ref(), &ctx, &job, config.replace_mode).await?;

    println!(
        "  ✓ {} ({} derived, {} deleted, {} inserted, {})",
        ctx.target,
        report.derived_rows,
        report.outcome.deleted,
        report.outcome.inserted,
        if report.outcome.transactional {
            "one transaction"
        } else {
            "delete + insert"
        }
    );
    if !report.maintained {
        println!("  ! storage maintenance did not run");
    }

    // 5. Preview
    if args.show_results {
        let sql = format!(
            r#"SELECT * FROM {} WHERE {} ORDER BY Hash_ID LIMIT 20"#,
            ctx.target,
            report.scope.to_sql()
        );
        let batches = backend
            .execute_sql(&sql)
            .await
            .with_context(|| "Failed to read back the written scope")?;

        println!("\n  Preview:");
        pretty::print_batches(&batches).with_context(|| "Failed to print result preview")?;
        println!();
    }

    println!("  Total time: {:?}", report.duration);

    Ok(())
}

async fn check(args: CheckArgs) -> Result<()> {
    let (config, project_dir, target) = load_project(&args.project)?;

    let params = RunParams {
        country: args.scope.country,
        company_code: args.scope.company_code,
        period: args.data_date.month().to_string(),
        year: format!("{:04}", args.data_date.year()),
        data_date: Some(args.data_date),
        target_db: args.scope.target_db,
        target_table: args.scope.target_table,
    };
    let ctx = RunContext::resolve(&params, &config, &target, Utc::now())?;

    let db_path = database_path(&args.project, &project_dir, &target)?;
    let backend = open_backend(&db_path).await?;

    let scope = ctx.scope();
    let report = check_scope(backend.as_ref(), &ctx.target, &scope).await?;

    println!("\nScope [{}] of {}", scope, ctx.target);
    println!("  rows:              {}", report.rows);
    println!("  duplicate keys:    {}", report.duplicate_keys);
    println!("  NULL counters:     {}", report.null_counters);
    println!("  negative counters: {}", report.negative_counters);

    if !report.is_clean() {
        anyhow::bail!("Scope [{}] of {} failed checks", scope, ctx.target);
    }

    println!("  ✓ clean");
    Ok(())
}

async fn seed(args: SeedArgs) -> Result<()> {
    let (config, project_dir, target) = load_project(&args.project)?;
    let db_path = database_path(&args.project, &project_dir, &target)?;

    let generator = JourneyGenerator::new(JourneyConfig {
        seed: args.seed,
        year: args.year,
        month: args.period,
        country: args.country,
        subjects: args.subjects,
        max_events_per_subject: args.max_events,
        ..JourneyConfig::default()
    })?;

    let columns = &config.source.columns;
    let layout = EventTableLayout {
        schema: config.source.schema.clone(),
        table: config.source.table.clone(),
        timestamp_column: columns.timestamp.clone(),
        subject_column: columns.subject.clone(),
        page_column: columns.page.clone(),
        country_column: columns.country.clone(),
    };

    println!("Database: {}", db_path.display());
    println!("Source: {}.{}", layout.schema, layout.table);

    let written = tokio::task::spawn_blocking(move || {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        write_events_to_duckdb(&db_path, &layout, generator.generate())
    })
    .await??;

    println!("  ✓ Wrote {} events", written);
    Ok(())
}
