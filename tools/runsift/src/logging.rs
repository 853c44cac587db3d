use crate::errors::RunsiftError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

static RUN_LOG: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RunsiftError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| RunsiftError::Io(e.to_string()))?;
        }
        self.rotate_if_full()?;
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| RunsiftError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RunsiftError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RunsiftError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| RunsiftError::Io(e.to_string()))?;
        Ok(())
    }

    /// Path the previous generation is moved to once the log fills up.
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate_if_full(&self) -> Result<(), RunsiftError> {
        let Ok(meta) = fs::metadata(&self.path) else {
            return Ok(());
        };
        if meta.len() < self.max_file_bytes {
            return Ok(());
        }
        fs::rename(&self.path, self.rotated_path()).map_err(|e| RunsiftError::Io(e.to_string()))
    }
}

/// Installs the process-wide run log. Until this is called `append_run_log`
/// discards events.
pub fn init_run_log(logger: JsonlLogger) {
    let slot = RUN_LOG.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(logger);
    }
}

pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Some(slot) = RUN_LOG.get() else {
        return;
    };
    let Ok(guard) = slot.lock() else {
        return;
    };
    if let Some(logger) = guard.as_ref() {
        // Write failures are dropped.
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
