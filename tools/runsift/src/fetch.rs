use crate::artifacts::{download_artifact, ArtifactOutcome};
use crate::config::AppConfig;
use crate::errors::RunsiftError;
use crate::github::{GithubClient, JobLogs};
use crate::logging::append_run_log;
use crate::runtime::{FileSystem, ProductionRuntime, Terminal};
use crate::staging::{clear_output_dir, write_annotated_log};
use crate::types::{group_thousands, Artifact, Conclusion, Job, WorkflowRun};
use serde::Serialize;
use serde_json::json;

const RULE_WIDTH: usize = 80;
const PREVIEW_RULE_WIDTH: usize = 76;
const TOKEN_SETTINGS_URL: &str = "https://github.com/settings/tokens";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub run_id: Option<u64>,
    pub all_failed: bool,
    pub all_jobs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub runs_listed: usize,
    pub runs_processed: usize,
    pub job_listing_errors: usize,
    pub logs_saved: usize,
    pub logs_with_failures: usize,
    pub logs_unavailable: usize,
    pub log_errors: usize,
    pub artifacts_extracted: usize,
    pub artifacts_expired: usize,
    pub artifacts_failed: usize,
    pub cleanup_warnings: usize,
}

/// Failed runs that belong to the newest failing push, i.e. share the head
/// commit of the first failed run in listing order.
pub fn latest_push_failures(runs: &[WorkflowRun]) -> Vec<WorkflowRun> {
    let failed = runs
        .iter()
        .filter(|run| run.conclusion() == Conclusion::Failure)
        .collect::<Vec<_>>();
    let Some(latest) = failed.first() else {
        return Vec::new();
    };
    failed
        .iter()
        .filter(|run| run.head_sha == latest.head_sha)
        .map(|run| (*run).clone())
        .collect()
}

/// Whether a job's log is downloaded: failed jobs always, successful ones
/// only with `--all-jobs`.
pub fn wants_job_logs(job: &Job, all_jobs: bool) -> bool {
    match job.conclusion() {
        Conclusion::Failure => true,
        Conclusion::Success => all_jobs,
        Conclusion::Other => false,
    }
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

pub fn run_fetch(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    client: &GithubClient<'_>,
    options: &FetchOptions,
) -> Result<FetchReport, RunsiftError> {
    let term = runtime.terminal.as_ref();
    let fs = runtime.file_system.as_ref();
    let mut report = FetchReport::default();
    let branch = cfg.fetch.branch.as_str();
    let per_page = cfg.fetch.effective_per_page(options.all_failed);
    append_run_log(
        "info",
        "fetch.started",
        json!({
            "owner": client.repo().owner,
            "repo": client.repo().repo,
            "branch": branch,
            "per_page": per_page,
            "run_id": options.run_id,
            "all_failed": options.all_failed,
            "all_jobs": options.all_jobs
        }),
    );

    if !cfg.output.keep_old_logs {
        term.write_line("Cleaning up old logs...")?;
        let warnings = clear_output_dir(fs, &cfg.output.log_dir)?;
        for warning in &warnings {
            term.write_line(&format!("   [WARN] {warning}"))?;
        }
        report.cleanup_warnings = warnings.len();
        term.write_line("Ready to fetch new logs.\n")?;
    }

    term.write_line(&format!("Fetching workflow runs for branch: {branch}"))?;
    term.write_line(&"=".repeat(RULE_WIDTH))?;
    let runs = client.list_runs(branch, per_page)?;
    report.runs_listed = runs.workflow_runs.len();
    append_run_log(
        "info",
        "fetch.runs.listed",
        json!({
            "total_count": runs.total_count,
            "listed": runs.workflow_runs.len()
        }),
    );
    term.write_line(&format!("\nFound {} total runs", runs.total_count))?;
    term.write_line(&format!("Showing {} runs:\n", runs.workflow_runs.len()))?;
    for run in &runs.workflow_runs {
        term.write_line(&format!(
            "{} Run #{}: {} - {} ({})",
            run.conclusion().icon(),
            run.id,
            or_dash(&run.name),
            or_dash(&run.conclusion),
            or_dash(&run.status)
        ))?;
        term.write_line(&format!(
            "   Branch: {}, Commit: {}",
            or_dash(&run.head_branch),
            run.short_sha()
        ))?;
        term.write_line(&format!("   URL: {}", run.html_url))?;
        term.write_line("")?;
    }

    let selected = if let Some(run_id) = options.run_id {
        match runs.workflow_runs.iter().find(|run| run.id == run_id) {
            Some(run) => vec![run.clone()],
            None => match client.get_run(run_id) {
                Ok(run) => vec![run],
                Err(err) => {
                    append_run_log(
                        "error",
                        "fetch.run.lookup_failed",
                        json!({
                            "run_id": run_id,
                            "error": err.to_string()
                        }),
                    );
                    term.write_line(&format!("\n[ERROR] Could not fetch run {run_id}: {err}"))?;
                    return Err(err);
                }
            },
        }
    } else if options.all_failed {
        runs.workflow_runs
            .iter()
            .filter(|run| run.conclusion() == Conclusion::Failure)
            .cloned()
            .collect()
    } else {
        let latest = latest_push_failures(&runs.workflow_runs);
        if let Some(first) = latest.first() {
            term.write_line(&format!(
                "\n[INFO] Found {} failed workflow(s) from latest push (commit: {})",
                latest.len(),
                first.short_sha()
            ))?;
        }
        latest
    };

    for run in &selected {
        process_run(term, fs, cfg, client, options, run, &mut report)?;
        report.runs_processed += 1;
    }

    append_run_log("info", "fetch.completed", json!(report));
    Ok(report)
}

fn process_run(
    term: &dyn Terminal,
    fs: &dyn FileSystem,
    cfg: &AppConfig,
    client: &GithubClient<'_>,
    options: &FetchOptions,
    run: &WorkflowRun,
    report: &mut FetchReport,
) -> Result<(), RunsiftError> {
    let heavy = "=".repeat(RULE_WIDTH);
    term.write_line(&format!("\n{heavy}"))?;
    term.write_line(&format!("Fetching details for run ID: {}", run.id))?;
    term.write_line(&heavy)?;
    term.write_line(&format!("\nWorkflow: {}", or_dash(&run.name)))?;
    term.write_line(&format!("Status: {}", or_dash(&run.status)))?;
    term.write_line(&format!("Conclusion: {}", or_dash(&run.conclusion)))?;
    term.write_line(&format!("Branch: {}", or_dash(&run.head_branch)))?;
    term.write_line(&format!("Commit: {}", run.head_sha))?;
    term.write_line(&format!("URL: {}", run.html_url))?;

    match client.list_jobs(run.id) {
        Ok(jobs) => {
            term.write_line(&format!("\n{heavy}"))?;
            term.write_line(&format!("Jobs in this run ({}):", jobs.jobs.len()))?;
            term.write_line(&heavy)?;
            for job in &jobs.jobs {
                term.write_line(&format!(
                    "\n{} Job #{}: {}",
                    job.conclusion().icon(),
                    job.id,
                    job.name
                ))?;
                term.write_line(&format!(
                    "   Status: {}, Conclusion: {}",
                    or_dash(&job.status),
                    or_dash(&job.conclusion)
                ))?;
                term.write_line(&format!("   Started: {}", or_dash(&job.started_at)))?;
                term.write_line(&format!("   Completed: {}", or_dash(&job.completed_at)))?;
                term.write_line(&format!("   URL: {}", or_dash(&job.html_url)))?;
                if wants_job_logs(job, options.all_jobs) {
                    save_job_logs(term, fs, cfg, client, run.id, job, report)?;
                }
            }
        }
        Err(err) => {
            report.job_listing_errors += 1;
            append_run_log(
                "error",
                "fetch.jobs.list_failed",
                json!({
                    "run_id": run.id,
                    "error": err.to_string()
                }),
            );
            term.write_line(&format!(
                "\n[ERROR] Could not list jobs for run {}: {err}",
                run.id
            ))?;
        }
    }

    term.write_line(&format!("\n{heavy}"))?;
    term.write_line("Checking for artifacts...")?;
    term.write_line(&heavy)?;
    let artifacts = client.list_artifacts(run.id).unwrap_or_else(|err| {
        append_run_log(
            "warn",
            "fetch.artifacts.list_failed",
            json!({
                "run_id": run.id,
                "error": err.to_string()
            }),
        );
        None
    });
    match artifacts {
        Some(list) if !list.artifacts.is_empty() => {
            term.write_line(&format!("\nFound {} artifact(s):", list.artifacts.len()))?;
            for artifact in &list.artifacts {
                fetch_artifact(term, fs, cfg, client, run.id, artifact, report)?;
            }
        }
        Some(_) => {
            term.write_line("\n   [INFO] No artifacts found for this run")?;
            term.write_line(
                "   [INFO] This is normal if the run failed before artifacts were uploaded",
            )?;
        }
        None => {
            term.write_line("\n   [INFO] No artifacts available for this run")?;
            term.write_line(
                "   [INFO] This is normal if the run failed early or didn't produce artifacts",
            )?;
        }
    }
    Ok(())
}

fn save_job_logs(
    term: &dyn Terminal,
    fs: &dyn FileSystem,
    cfg: &AppConfig,
    client: &GithubClient<'_>,
    run_id: u64,
    job: &Job,
    report: &mut FetchReport,
) -> Result<(), RunsiftError> {
    term.write_line(&format!("\n   Fetching logs for failed job {}...", job.id))?;
    let logs = match client.job_logs(job.id) {
        Ok(JobLogs::Text(logs)) => logs,
        Ok(JobLogs::Unavailable { status, detail }) => {
            report.logs_unavailable += 1;
            term.write_line(&format!("   [DEBUG] HTTP {status} - {detail}"))?;
            term.write_line("   [WARN] Could not fetch logs. Possible reasons:")?;
            term.write_line(
                "          - PAT needs 'Actions: Read' repository permission (fine-grained PAT)",
            )?;
            term.write_line("          - PAT needs 'actions:read' scope (classic PAT)")?;
            term.write_line("          - Logs may have expired (retained for 90 days)")?;
            term.write_line("          - Repository access may be restricted")?;
            term.write_line(&format!(
                "   [INFO] View logs directly at: {}",
                client.job_web_url(run_id, job.id)
            ))?;
            term.write_line(&format!(
                "   [INFO] Verify PAT permissions at: {TOKEN_SETTINGS_URL}"
            ))?;
            return Ok(());
        }
        Err(err) => {
            report.log_errors += 1;
            term.write_line(&format!("   [ERROR] Error fetching logs: {err}"))?;
            return Ok(());
        }
    };

    let saved = match write_annotated_log(fs, &cfg.output.log_dir, job.id, &job.name, &logs) {
        Ok(saved) => saved,
        Err(err) => {
            report.log_errors += 1;
            term.write_line(&format!("   [ERROR] Error saving logs: {err}"))?;
            return Ok(());
        }
    };
    report.logs_saved += 1;
    if saved.has_failures {
        report.logs_with_failures += 1;
    }
    append_run_log(
        "info",
        "fetch.job.log_saved",
        json!({
            "run_id": run_id,
            "job_id": job.id,
            "path": saved.path.display().to_string(),
            "bytes": logs.len(),
            "has_failures": saved.has_failures
        }),
    );
    term.write_line(&format!("   [OK] Logs saved to: {}", saved.path.display()))?;
    term.write_line("   [INFO] Error summary added at the top of the log file")?;

    if cfg.output.preview {
        let lines = logs.split('\n').collect::<Vec<_>>();
        let tail = &lines[lines.len().saturating_sub(cfg.output.preview_lines)..];
        term.write_line(&format!(
            "   Last {} lines of logs:",
            cfg.output.preview_lines
        ))?;
        term.write_line(&format!("   {}", "-".repeat(PREVIEW_RULE_WIDTH)))?;
        for line in tail.iter().filter(|line| !line.trim().is_empty()) {
            term.write_line(&format!("   {line}"))?;
        }
    }
    Ok(())
}

fn fetch_artifact(
    term: &dyn Terminal,
    fs: &dyn FileSystem,
    cfg: &AppConfig,
    client: &GithubClient<'_>,
    run_id: u64,
    artifact: &Artifact,
    report: &mut FetchReport,
) -> Result<(), RunsiftError> {
    term.write_line(&format!("\n   • {}", artifact.name))?;
    term.write_line(&format!(
        "     Size: {} bytes",
        group_thousands(artifact.size_in_bytes)
    ))?;
    term.write_line(&format!("     Expired: {}", artifact.expired))?;
    term.write_line(&format!("     Created: {}", or_dash(&artifact.created_at)))?;
    if artifact.expired {
        report.artifacts_expired += 1;
        term.write_line("     [INFO] Artifact has expired (retained for 90 days)")?;
        return Ok(());
    }

    term.write_line(&format!("   Downloading artifact '{}'...", artifact.name))?;
    match download_artifact(client, fs, &cfg.output.log_dir, run_id, artifact) {
        ArtifactOutcome::Extracted { dir, files } => {
            report.artifacts_extracted += 1;
            term.write_line(&format!("   [OK] Artifact extracted to: {}", dir.display()))?;
            term.write_line(&format!("   [INFO] Extracted files: {}", files.join(", ")))?;
        }
        ArtifactOutcome::Expired => {
            report.artifacts_expired += 1;
            term.write_line(
                "   [INFO] Artifact has expired (artifacts are retained for 90 days)",
            )?;
        }
        ArtifactOutcome::Failed(reason) => {
            report.artifacts_failed += 1;
            term.write_line(&format!("   [WARN] Error downloading artifact: {reason}"))?;
        }
    }
    Ok(())
}
