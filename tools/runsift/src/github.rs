use crate::config::{AppConfig, Credentials, RepoRef};
use crate::errors::RunsiftError;
use crate::logging::append_run_log;
use crate::runtime::{Clock, HttpRequest, HttpResponse, HttpTransport};
use crate::types::{ArtifactList, JobList, RunList, WorkflowRun};
use flate2::read::GzDecoder;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io::Read;

const ACCEPT: &str = "application/vnd.github.v3+json";
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";
const ERROR_BODY_CHARS: usize = 200;
const TRUSTED_HOSTS: [&str; 2] = ["github.com", "api.github.com"];

/// Outcome of a job log download. The API answers 401/403/404 when the token
/// lacks `actions:read` or the logs have aged out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLogs {
    Text(String),
    Unavailable { status: u16, detail: String },
}

pub struct GithubClient<'a> {
    http: &'a dyn HttpTransport,
    clock: &'a dyn Clock,
    config: &'a AppConfig,
    repo: RepoRef,
    token: String,
}

impl<'a> GithubClient<'a> {
    pub fn new(
        http: &'a dyn HttpTransport,
        clock: &'a dyn Clock,
        config: &'a AppConfig,
        repo: RepoRef,
        credentials: &Credentials,
    ) -> Self {
        Self {
            http,
            clock,
            config,
            repo,
            token: credentials.token.clone(),
        }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn list_runs(&self, branch: &str, per_page: u32) -> Result<RunList, RunsiftError> {
        let url = self.repo_url(
            "actions/runs",
            &[("per_page", per_page.to_string()), ("branch", branch.to_string())],
        )?;
        self.get_json(&url)
    }

    pub fn get_run(&self, run_id: u64) -> Result<WorkflowRun, RunsiftError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}"), &[])?;
        self.get_json(&url)
    }

    pub fn list_jobs(&self, run_id: u64) -> Result<JobList, RunsiftError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}/jobs"), &[])?;
        self.get_json(&url)
    }

    pub fn job_logs(&self, job_id: u64) -> Result<JobLogs, RunsiftError> {
        let url = self.repo_url(&format!("actions/jobs/{job_id}/logs"), &[])?;
        match self.get(&url) {
            Ok(response) => Ok(JobLogs::Text(decode_text(&response)?)),
            Err(RunsiftError::Http { status, message }) if matches!(status, 401 | 403 | 404) => {
                append_run_log(
                    "warn",
                    "github.job_logs.unavailable",
                    json!({
                        "job_id": job_id,
                        "status": status,
                        "detail": message
                    }),
                );
                Ok(JobLogs::Unavailable {
                    status,
                    detail: message,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// `None` when the API refuses the listing.
    pub fn list_artifacts(&self, run_id: u64) -> Result<Option<ArtifactList>, RunsiftError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}/artifacts"), &[])?;
        match self.get_json(&url) {
            Ok(list) => Ok(Some(list)),
            Err(RunsiftError::Http { status, .. }) => {
                append_run_log(
                    "warn",
                    "github.artifacts.unavailable",
                    json!({
                        "run_id": run_id,
                        "status": status
                    }),
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn download_artifact(&self, artifact_id: u64) -> Result<Vec<u8>, RunsiftError> {
        let url = self.repo_url(&format!("actions/artifacts/{artifact_id}/zip"), &[])?;
        let response = self.get(&url)?;
        decode_bytes(&response)
    }

    /// Browser link for a job, used when its logs cannot be downloaded.
    pub fn job_web_url(&self, run_id: u64, job_id: u64) -> String {
        format!(
            "{}/{}/{}/actions/runs/{run_id}/job/{job_id}",
            self.config.github.web_base.trim_end_matches('/'),
            self.repo.owner,
            self.repo.repo
        )
    }

    fn repo_url(&self, path: &str, query: &[(&str, String)]) -> Result<String, RunsiftError> {
        let raw = format!(
            "{}/repos/{}/{}/{path}",
            self.config.github.api_base.trim_end_matches('/'),
            self.repo.owner,
            self.repo.repo
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| RunsiftError::InvalidConfig(format!("bad api url {raw}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RunsiftError> {
        let response = self.get(url)?;
        let body = decode_bytes(&response)?;
        serde_json::from_slice(strip_bom(&body))
            .map_err(|e| RunsiftError::Decode(format!("invalid json from {url}: {e}")))
    }

    fn get(&self, url: &str) -> Result<HttpResponse, RunsiftError> {
        let max_retries = self.config.http.max_retries;
        let mut attempt = 0;
        loop {
            match self.follow_redirects(url) {
                Err(err) if err.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    let delay = self.config.http.backoff(attempt);
                    append_run_log(
                        "warn",
                        "github.request.retrying",
                        json!({
                            "url": url,
                            "attempt": attempt,
                            "delay_ms": delay.as_millis() as u64,
                            "error": err.to_string()
                        }),
                    );
                    self.clock.sleep_until(self.clock.now() + delay)?;
                }
                result => return result,
            }
        }
    }

    fn follow_redirects(&self, url: &str) -> Result<HttpResponse, RunsiftError> {
        let mut current = url.to_string();
        let mut hops = 0;
        loop {
            let authorized = hops == 0 || self.is_trusted(&current);
            append_run_log(
                "debug",
                "github.request.started",
                json!({
                    "url": redact_query(&current),
                    "hop": hops,
                    "authorized": authorized
                }),
            );
            let response = self.http.get(&self.request(&current, authorized))?;
            if response.is_success() {
                return Ok(response);
            }
            if !response.is_redirect() {
                return Err(RunsiftError::Http {
                    status: response.status,
                    message: error_message(&response),
                });
            }
            let location = response.header("location").ok_or_else(|| RunsiftError::Http {
                status: response.status,
                message: "redirect without a Location header".to_string(),
            })?;
            hops += 1;
            if hops > self.config.http.max_redirects {
                return Err(RunsiftError::Http {
                    status: response.status,
                    message: format!("too many redirects fetching {url}"),
                });
            }
            current = Url::parse(&current)
                .and_then(|base| base.join(location))
                .map_err(|e| RunsiftError::Transport(format!("bad redirect target: {e}")))?
                .to_string();
        }
    }

    fn request(&self, url: &str, authorized: bool) -> HttpRequest {
        let mut headers = vec![(
            "User-Agent".to_string(),
            self.config.github.user_agent.clone(),
        )];
        // Redirect targets off GitHub carry their own signed query string.
        if authorized {
            headers.push(("Authorization".to_string(), format!("Bearer {}", self.token)));
            headers.push(("Accept".to_string(), ACCEPT.to_string()));
        }
        HttpRequest {
            url: url.to_string(),
            headers,
            timeout: self.config.http.timeout(),
        }
    }

    fn is_trusted(&self, url: &str) -> bool {
        let Ok(target) = Url::parse(url) else {
            return false;
        };
        let Some(host) = target.host_str() else {
            return false;
        };
        let api_host = Url::parse(&self.config.github.api_base)
            .ok()
            .and_then(|api| api.host_str().map(str::to_string));
        api_host.as_deref() == Some(host) || TRUSTED_HOSTS.contains(&host)
    }
}

fn redact_query(url: &str) -> String {
    url.split_once('?')
        .map(|(base, _)| base.to_string())
        .unwrap_or_else(|| url.to_string())
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Body bytes with any gzip content encoding removed.
pub fn decode_bytes(response: &HttpResponse) -> Result<Vec<u8>, RunsiftError> {
    let gzipped = response
        .header("content-encoding")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return Ok(response.body.clone());
    }
    let mut decoded = Vec::new();
    GzDecoder::new(response.body.as_slice())
        .read_to_end(&mut decoded)
        .map_err(|e| RunsiftError::Decode(format!("gzip body: {e}")))?;
    Ok(decoded)
}

/// Log text: decompressed, BOM removed, invalid UTF-8 replaced.
pub fn decode_text(response: &HttpResponse) -> Result<String, RunsiftError> {
    let bytes = decode_bytes(response)?;
    Ok(String::from_utf8_lossy(strip_bom(&bytes)).into_owned())
}

fn error_message(response: &HttpResponse) -> String {
    let reason = reqwest::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unexpected status");
    let body = String::from_utf8_lossy(&response.body);
    let snippet: String = body.chars().take(ERROR_BODY_CHARS).collect();
    if matches!(response.status, 401 | 403) {
        let api_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| value.get("message")?.as_str().map(str::to_string));
        return match api_message {
            Some(message) => format!("{reason}: {message}"),
            None if snippet.is_empty() => reason.to_string(),
            None => format!("{reason}: {snippet}"),
        };
    }
    format!("{reason}. Response: {snippet}")
}

#[cfg(test)]
mod tests {
    use super::{decode_text, GithubClient, JobLogs};
    use crate::config::{AppConfig, Credentials, RepoRef};
    use crate::errors::RunsiftError;
    use crate::runtime::{FakeClock, FakeHttpTransport, HttpResponse};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn repo() -> RepoRef {
        RepoRef {
            owner: "octo".to_string(),
            repo: "widgets".to_string(),
        }
    }

    fn creds() -> Credentials {
        Credentials {
            token: "ghp_test".to_string(),
        }
    }

    #[test]
    fn list_runs_sends_auth_headers_and_query() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        http.push_json(
            200,
            r#"{"total_count": 1, "workflow_runs": [{"id": 9, "name": "ci", "head_sha": "abc1234def", "conclusion": "failure"}]}"#,
        );
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());

        let runs = client.list_runs("release/1.33.0", 3).expect("runs");
        assert_eq!(runs.workflow_runs[0].id, 9);

        let request = &http.requests()[0];
        assert_eq!(
            request.url,
            "https://api.github.com/repos/octo/widgets/actions/runs?per_page=3&branch=release%2F1.33.0"
        );
        assert_eq!(request.header("authorization"), Some("Bearer ghp_test"));
        assert_eq!(request.header("accept"), Some("application/vnd.github.v3+json"));
    }

    #[test]
    fn redirect_to_blob_storage_drops_credentials() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        http.push_redirect("https://pipelines.blob.core.windows.net/logs/1.txt?sig=abc");
        http.push_text(200, "\u{feff}line one\nline two");
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());

        let logs = client.job_logs(42).expect("logs");
        assert_eq!(logs, JobLogs::Text("line one\nline two".to_string()));

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].header("authorization").is_some());
        assert_eq!(requests[1].header("authorization"), None);
        assert!(requests[1].url.contains("sig=abc"));
    }

    #[test]
    fn redirect_loops_are_bounded() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let mut cfg = AppConfig::default();
        cfg.http.max_redirects = 2;
        for _ in 0..3 {
            http.push_redirect("https://api.github.com/loop");
        }
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());

        let err = client.get_run(1).expect_err("loop");
        assert_eq!(err.http_status(), Some(302));
        assert_eq!(http.pending(), 0);
    }

    #[test]
    fn forbidden_logs_are_reported_as_unavailable() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        http.push_json(403, r#"{"message": "Resource not accessible by personal access token"}"#);
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());

        match client.job_logs(7).expect("logs") {
            JobLogs::Unavailable { status, detail } => {
                assert_eq!(status, 403);
                assert_eq!(detail, "Forbidden: Resource not accessible by personal access token");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_errors_retry_with_backoff() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        http.push_text(502, "bad gateway");
        http.push_response(Err(RunsiftError::Transport("connection reset".to_string())));
        http.push_json(200, r#"{"total_count": 0, "jobs": []}"#);
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());

        let jobs = client.list_jobs(5).expect("jobs");
        assert!(jobs.jobs.is_empty());
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        let first = sleeps[0]
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .expect("elapsed");
        assert_eq!(first.as_millis(), 500);
    }

    #[test]
    fn client_errors_do_not_retry_and_quote_the_body() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        http.push_text(422, "unprocessable branch");
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());

        let err = client.list_runs("main", 3).expect_err("422");
        assert_eq!(err.http_status(), Some(422));
        assert!(err.to_string().contains("Response: unprocessable branch"));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn artifact_listing_errors_become_none() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        http.push_json(404, r#"{"message": "Not Found"}"#);
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());
        assert_eq!(client.list_artifacts(3).expect("artifacts"), None);
    }

    #[test]
    fn gzip_bodies_are_decompressed() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"##[error]boom").expect("write");
        let body = encoder.finish().expect("finish");
        let response = HttpResponse {
            status: 200,
            headers: vec![("Content-Encoding".to_string(), "gzip".to_string())],
            body,
        };
        assert_eq!(decode_text(&response).expect("text"), "##[error]boom");
    }

    #[test]
    fn web_url_points_at_the_job() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        let client = GithubClient::new(&http, &clock, &cfg, repo(), &creds());
        assert_eq!(
            client.job_web_url(11, 22),
            "https://github.com/octo/widgets/actions/runs/11/job/22"
        );
    }
}
