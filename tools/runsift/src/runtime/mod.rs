use crate::errors::RunsiftError;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RunsiftError>;
}

/// Issues one GET. Implementations must not follow redirects on their own.
pub trait HttpTransport: Send + Sync {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, RunsiftError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, RunsiftError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RunsiftError>;
    fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<(), RunsiftError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), RunsiftError>;
    fn remove_file(&self, path: &Path) -> Result<(), RunsiftError>;
    fn remove_dir_all(&self, path: &Path) -> Result<(), RunsiftError>;
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, RunsiftError>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), RunsiftError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RunsiftError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RunsiftError> {
        std::fs::read_to_string(path).map_err(|e| RunsiftError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RunsiftError> {
        std::fs::write(path, contents).map_err(|e| RunsiftError::Io(e.to_string()))
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<(), RunsiftError> {
        std::fs::write(path, contents).map_err(|e| RunsiftError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RunsiftError> {
        std::fs::create_dir_all(path).map_err(|e| RunsiftError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), RunsiftError> {
        std::fs::remove_file(path).map_err(|e| RunsiftError::Io(e.to_string()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), RunsiftError> {
        std::fs::remove_dir_all(path).map_err(|e| RunsiftError::Io(e.to_string()))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, RunsiftError> {
        let mut entries = std::fs::read_dir(path)
            .map_err(|e| RunsiftError::Io(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

pub struct ProductionHttpTransport {
    client: reqwest::blocking::Client,
}

impl ProductionHttpTransport {
    pub fn new() -> Result<Self, RunsiftError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RunsiftError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ProductionHttpTransport {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, RunsiftError> {
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                RunsiftError::Transport(format!(
                    "request timed out after {}s",
                    request.timeout.as_secs()
                ))
            } else {
                RunsiftError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| RunsiftError::Transport(e.to_string()))?
            .to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), RunsiftError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| RunsiftError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub http: Arc<dyn HttpTransport>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Result<Self, RunsiftError> {
        Ok(Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            http: Arc::new(ProductionHttpTransport::new()?),
            terminal: Arc::new(ProductionTerminal),
        })
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), RunsiftError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

/// In-memory filesystem; directories are tracked explicitly.
#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
    locked: Arc<Mutex<BTreeSet<PathBuf>>>,
    fail_next: Arc<Mutex<Option<RunsiftError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into().into_bytes());
        fs
    }

    pub fn set_fail_next(&self, error: RunsiftError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    /// Removal of `path` fails until the fake is dropped.
    pub fn lock_path(&self, path: impl Into<PathBuf>) {
        self.locked.lock().expect("locked lock").insert(path.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut paths = self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    fn maybe_fail(&self) -> Result<(), RunsiftError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }

    fn check_unlocked(&self, path: &Path) -> Result<(), RunsiftError> {
        if self.locked.lock().expect("locked lock").contains(path) {
            return Err(RunsiftError::Io(format!(
                "permission denied: {}",
                path.display()
            )));
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RunsiftError> {
        self.maybe_fail()?;
        let bytes = self
            .files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| RunsiftError::Io(format!("missing file {}", path.display())))?;
        String::from_utf8(bytes).map_err(|e| RunsiftError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RunsiftError> {
        self.write_bytes(path, contents.as_bytes())
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<(), RunsiftError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RunsiftError> {
        self.maybe_fail()?;
        let mut dirs = self.dirs.lock().expect("dirs lock");
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), RunsiftError> {
        self.maybe_fail()?;
        self.check_unlocked(path)?;
        self.files.lock().expect("files lock").remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), RunsiftError> {
        self.maybe_fail()?;
        self.check_unlocked(path)?;
        self.files
            .lock()
            .expect("files lock")
            .retain(|file, _| !file.starts_with(path));
        self.dirs
            .lock()
            .expect("dirs lock")
            .retain(|dir| !dir.starts_with(path));
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, RunsiftError> {
        self.maybe_fail()?;
        let mut entries = BTreeSet::new();
        for file in self.files.lock().expect("files lock").keys() {
            if file.parent() == Some(path) {
                entries.insert(file.clone());
            }
        }
        for dir in self.dirs.lock().expect("dirs lock").iter() {
            if dir.parent() == Some(path) {
                entries.insert(dir.clone());
            }
        }
        Ok(entries.into_iter().collect())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.lock().expect("dirs lock").contains(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn output(&self) -> String {
        self.written_lines().join("\n")
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), RunsiftError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

/// Replays queued responses in order and records every request it saw.
#[derive(Default, Clone)]
pub struct FakeHttpTransport {
    responses: Arc<Mutex<Vec<Result<HttpResponse, RunsiftError>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl FakeHttpTransport {
    pub fn push_response(&self, response: Result<HttpResponse, RunsiftError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push(response);
    }

    pub fn push_json(&self, status: u16, body: &str) {
        self.push_response(Ok(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json; charset=utf-8".to_string())],
            body: body.as_bytes().to_vec(),
        }));
    }

    pub fn push_text(&self, status: u16, body: &str) {
        self.push_response(Ok(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
        }));
    }

    pub fn push_redirect(&self, location: &str) {
        self.push_response(Ok(HttpResponse {
            status: 302,
            headers: vec![("location".to_string(), location.to_string())],
            body: Vec::new(),
        }));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn pending(&self) -> usize {
        self.responses.lock().expect("responses lock").len()
    }
}

impl HttpTransport for FakeHttpTransport {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, RunsiftError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(RunsiftError::Transport(format!(
                "no fake response queued for {}",
                request.url
            )));
        }
        responses.remove(0)
    }
}
