pub mod compiler;
pub mod config;
pub mod counters;
pub mod diagnostics;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod params;
pub mod rows;

pub use compiler::{CompiledJob, SqlCompiler};
pub use config::{find_project_root, BackendType, Config, ReplaceMode, SourceColumns, Target};
pub use counters::{placeholder_groups, CounterSpec, COUNTERS};
pub use diagnostics::{check_scope, read_scope, ScopeReport};
pub use errors::{CliError, PipelineError};
pub use executor::{run_job, RunReport};
pub use logging::{init_tracing, TracingConfig};
pub use params::{ParamError, RunContext, RunParams};
pub use rows::{rows_from_batches, PageFunnelRow, RowDecodeError};
