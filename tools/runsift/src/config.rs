use crate::env::{lookup, EnvMap, LOG_DIR_VAR, OWNER_VAR, REPO_VAR, TOKEN_VAR};
use crate::errors::RunsiftError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub branch: Option<String>,
    pub per_page: Option<u32>,
    pub log_dir: Option<PathBuf>,
    pub keep_old_logs: bool,
    pub no_preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub github: GithubConfig,
    pub output: OutputConfig,
    pub fetch: FetchConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GithubConfig {
    pub api_base: String,
    pub web_base: String,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub log_dir: PathBuf,
    pub keep_old_logs: bool,
    pub preview: bool,
    pub preview_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchConfig {
    pub branch: String,
    pub per_page: u32,
    pub all_failed_min_per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_redirects: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github: GithubConfig {
                api_base: "https://api.github.com".to_string(),
                web_base: "https://github.com".to_string(),
                owner: None,
                repo: None,
                user_agent: concat!("runsift/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            output: OutputConfig {
                log_dir: PathBuf::from("github_action_logs"),
                keep_old_logs: false,
                preview: true,
                preview_lines: 50,
            },
            fetch: FetchConfig {
                branch: "main".to_string(),
                per_page: 3,
                all_failed_min_per_page: 10,
            },
            http: HttpConfig {
                timeout_seconds: 30,
                max_retries: 3,
                retry_backoff_ms: 500,
                max_redirects: 5,
            },
            logging: LoggingConfig {
                enabled: true,
                path: PathBuf::from(".runsift/run.jsonl"),
            },
        }
    }
}

impl FetchConfig {
    /// Page size for the run listing; `--all-failed` looks further back.
    pub fn effective_per_page(&self, all_failed: bool) -> u32 {
        if all_failed {
            self.per_page.max(self.all_failed_min_per_page)
        } else {
            self.per_page
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    github: Option<PartialGithubConfig>,
    output: Option<PartialOutputConfig>,
    fetch: Option<PartialFetchConfig>,
    http: Option<PartialHttpConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialGithubConfig {
    api_base: Option<String>,
    web_base: Option<String>,
    owner: Option<String>,
    repo: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialOutputConfig {
    log_dir: Option<PathBuf>,
    keep_old_logs: Option<bool>,
    preview: Option<bool>,
    preview_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFetchConfig {
    branch: Option<String>,
    per_page: Option<u32>,
    all_failed_min_per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHttpConfig {
    timeout_seconds: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_redirects: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
    env: &EnvMap,
) -> Result<AppConfig, RunsiftError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| RunsiftError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_env(&mut cfg, env);
    apply_cli_overrides(&mut cfg, overrides);

    cfg.output.log_dir = absolutize_path(process_cwd, &cfg.output.log_dir);
    cfg.logging.path = absolutize_path(process_cwd, &cfg.logging.path);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(github) = partial.github {
        if let Some(value) = github.api_base {
            cfg.github.api_base = value;
        }
        if let Some(value) = github.web_base {
            cfg.github.web_base = value;
        }
        if let Some(value) = github.owner {
            cfg.github.owner = Some(value);
        }
        if let Some(value) = github.repo {
            cfg.github.repo = Some(value);
        }
        if let Some(value) = github.user_agent {
            cfg.github.user_agent = value;
        }
    }

    if let Some(output) = partial.output {
        if let Some(value) = output.log_dir {
            cfg.output.log_dir = value;
        }
        if let Some(value) = output.keep_old_logs {
            cfg.output.keep_old_logs = value;
        }
        if let Some(value) = output.preview {
            cfg.output.preview = value;
        }
        if let Some(value) = output.preview_lines {
            cfg.output.preview_lines = value;
        }
    }

    if let Some(fetch) = partial.fetch {
        if let Some(value) = fetch.branch {
            cfg.fetch.branch = value;
        }
        if let Some(value) = fetch.per_page {
            cfg.fetch.per_page = value;
        }
        if let Some(value) = fetch.all_failed_min_per_page {
            cfg.fetch.all_failed_min_per_page = value;
        }
    }

    if let Some(http) = partial.http {
        if let Some(value) = http.timeout_seconds {
            cfg.http.timeout_seconds = value;
        }
        if let Some(value) = http.max_retries {
            cfg.http.max_retries = value;
        }
        if let Some(value) = http.retry_backoff_ms {
            cfg.http.retry_backoff_ms = value;
        }
        if let Some(value) = http.max_redirects {
            cfg.http.max_redirects = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.enabled {
            cfg.logging.enabled = value;
        }
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
    }
}

fn apply_env(cfg: &mut AppConfig, env: &EnvMap) {
    if let Some(owner) = lookup(env, OWNER_VAR) {
        cfg.github.owner = Some(owner.to_string());
    }
    if let Some(repo) = lookup(env, REPO_VAR) {
        cfg.github.repo = Some(repo.to_string());
    }
    if let Some(log_dir) = lookup(env, LOG_DIR_VAR) {
        cfg.output.log_dir = PathBuf::from(log_dir);
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(branch) = &overrides.branch {
        cfg.fetch.branch = branch.clone();
    }
    if let Some(per_page) = overrides.per_page {
        cfg.fetch.per_page = per_page;
    }
    if let Some(log_dir) = &overrides.log_dir {
        cfg.output.log_dir = log_dir.clone();
    }
    if overrides.keep_old_logs {
        cfg.output.keep_old_logs = true;
    }
    if overrides.no_preview {
        cfg.output.preview = false;
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), RunsiftError> {
    if cfg.github.api_base.trim().is_empty() {
        return Err(RunsiftError::InvalidConfig(
            "github.api_base must not be empty".to_string(),
        ));
    }
    if !(1..=100).contains(&cfg.fetch.per_page) {
        return Err(RunsiftError::InvalidConfig(
            "fetch.per_page must be between 1 and 100".to_string(),
        ));
    }
    if cfg.output.preview_lines == 0 {
        return Err(RunsiftError::InvalidConfig(
            "output.preview_lines must be greater than zero".to_string(),
        ));
    }
    if cfg.http.max_redirects == 0 {
        return Err(RunsiftError::InvalidConfig(
            "http.max_redirects must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Owner and repository the API calls target; both are required to fetch.
pub fn resolve_repo(cfg: &AppConfig) -> Result<RepoRef, RunsiftError> {
    let owner = cfg
        .github
        .owner
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let repo = cfg
        .github
        .repo
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match (owner, repo) {
        (Some(owner), Some(repo)) => Ok(RepoRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
        }),
        _ => Err(RunsiftError::InvalidConfig(
            "repository owner and name are required: set OWNER and REPO or github.owner/github.repo"
                .to_string(),
        )),
    }
}

/// The API token only ever comes from the environment or the `.env` file.
pub fn resolve_credentials(env: &EnvMap) -> Result<Credentials, RunsiftError> {
    lookup(env, TOKEN_VAR)
        .map(|token| Credentials {
            token: token.to_string(),
        })
        .ok_or_else(|| {
            RunsiftError::InvalidConfig(format!(
                "{TOKEN_VAR} not found in environment variables or .env file; \
                 create a .env file or export {TOKEN_VAR}"
            ))
        })
}
