use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunsiftError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("artifact error: {0}")]
    Artifact(String),
}

impl RunsiftError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Failures worth another attempt: dropped connections and overloaded servers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunsiftError;

    #[test]
    fn transient_classification_covers_throttling_and_gateway_errors() {
        assert!(RunsiftError::Transport("reset".to_string()).is_transient());
        for status in [429, 500, 502, 503, 504] {
            let err = RunsiftError::Http {
                status,
                message: String::new(),
            };
            assert!(err.is_transient(), "{status} should retry");
        }
        for status in [401, 403, 404, 410] {
            let err = RunsiftError::Http {
                status,
                message: String::new(),
            };
            assert!(!err.is_transient(), "{status} should not retry");
        }
        assert!(!RunsiftError::Io("disk".to_string()).is_transient());
    }

    #[test]
    fn http_error_display_carries_status() {
        let err = RunsiftError::Http {
            status: 403,
            message: "Forbidden: Resource not accessible".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 403: Forbidden: Resource not accessible");
        assert_eq!(err.http_status(), Some(403));
    }
}
