pub mod analysis;
pub mod artifacts;
pub mod config;
pub mod env;
pub mod errors;
pub mod fetch;
pub mod github;
pub mod logging;
pub mod runtime;
pub mod staging;
pub mod types;

use analysis::annotate_log;
use clap::{error::ErrorKind, Parser};
use config::{load_config, resolve_credentials, resolve_repo, CliOverrides};
use env::{env_to_map, merge_env_file};
use errors::RunsiftError;
use fetch::{run_fetch, FetchOptions};
use github::GithubClient;
use logging::{append_run_log, init_run_log, JsonlLogger};
use runtime::ProductionRuntime;
use serde_json::json;
use std::path::PathBuf;

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Clone, Parser)]
#[command(name = "runsift", version)]
#[command(about = "Fetch GitHub Actions logs for failed runs and summarize why they failed")]
pub struct Cli {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// File with KEY=VALUE lines (default: .env in the working directory)
    #[arg(long)]
    pub env_file: Option<PathBuf>,
    /// Branch to check (default: main)
    #[arg(long)]
    pub branch: Option<String>,
    /// Specific workflow run ID to fetch
    #[arg(long)]
    pub run_id: Option<u64>,
    /// Fetch all failed runs, not just the latest push
    #[arg(long, default_value_t = false)]
    pub all_failed: bool,
    /// Number of runs to list (default: 3)
    #[arg(long)]
    pub per_page: Option<u32>,
    /// Skip showing the log preview
    #[arg(long, default_value_t = false)]
    pub no_preview: bool,
    /// Keep existing logs instead of cleaning the log directory
    #[arg(long, default_value_t = false)]
    pub keep_old_logs: bool,
    /// Fetch logs for successful jobs as well
    #[arg(long, default_value_t = false)]
    pub all_jobs: bool,
    /// Directory for saved logs and artifacts
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Summarize a local log file and print it; no network access
    #[arg(long)]
    pub analyze_file: Option<PathBuf>,
}

pub fn run() -> Result<i32, RunsiftError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| RunsiftError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new()?;
    run_with_runtime(&args, &env, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &[(std::ffi::OsString, std::ffi::OsString)],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, RunsiftError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(RunsiftError::Cli(error.to_string())),
        },
    };

    if let Some(path) = &cli.analyze_file {
        let log = runtime.file_system.read_to_string(&cwd.join(path))?;
        runtime.terminal.write_line(&annotate_log(&log))?;
        return Ok(0);
    }

    let mut env_map = env_to_map(env);
    let env_file = cwd.join(
        cli.env_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE)),
    );
    merge_env_file(&mut env_map, &env_file, runtime.file_system.as_ref())?;

    let overrides = CliOverrides {
        config_path: cli.config.as_ref().map(|path| cwd.join(path)),
        branch: cli.branch.clone(),
        per_page: cli.per_page,
        log_dir: cli.log_dir.clone(),
        keep_old_logs: cli.keep_old_logs,
        no_preview: cli.no_preview,
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref(), &env_map)?;
    if cfg.logging.enabled {
        init_run_log(JsonlLogger::new(&cfg.logging.path));
    }

    let credentials = resolve_credentials(&env_map)?;
    let repo = resolve_repo(&cfg)?;
    let client = GithubClient::new(
        runtime.http.as_ref(),
        runtime.clock.as_ref(),
        &cfg,
        repo,
        &credentials,
    );
    let options = FetchOptions {
        run_id: cli.run_id,
        all_failed: cli.all_failed,
        all_jobs: cli.all_jobs,
    };
    let report = run_fetch(runtime, &cfg, &client, &options)?;
    append_run_log(
        "info",
        "cli.completed",
        json!({
            "logs_saved": report.logs_saved,
            "runs_processed": report.runs_processed
        }),
    );
    Ok(0)
}
