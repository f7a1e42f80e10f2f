//! Error taxonomy for external source calls
//!
//! - `Transient`: connection reset, timeout, 429, 5xx. Retried with backoff;
//!   on exhaustion the batch is recorded as attempted-but-unresolved.
//! - `Permanent`: no match, unknown id, other 4xx. A confirmed negative
//!   finding, never retried.
//! - `Malformed`: the source answered but the body is unusable. Aborts only
//!   the current batch.
//! - `Unsupported`: the source lacks the requested capability.

/// Error from one call to an external bibliographic source.
#[derive(Debug, Clone)]
pub enum SourceError {
    Transient {
        status: Option<u16>,
        message: String,
    },
    Permanent {
        status: Option<u16>,
        message: String,
    },
    Malformed(String),
    Unsupported(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient {
                status: Some(s),
                message,
            } => write!(f, "transient HTTP {s}: {message}"),
            Self::Transient {
                status: None,
                message,
            } => write!(f, "transient network error: {message}"),
            Self::Permanent {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Permanent {
                status: None,
                message,
            } => write!(f, "not found: {message}"),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if matches!(status, 408 | 429 | 500..=599) {
            Self::Transient {
                status: Some(status),
                message,
            }
        } else {
            Self::Permanent {
                status: Some(status),
                message,
            }
        }
    }

    /// Classify a reqwest error. URLs are stripped so API keys in query
    /// strings never reach the logs.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let message = message_without_url(e);
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), message);
        }
        if e.is_decode() {
            Self::Malformed(message)
        } else {
            // connect, timeout, body and request errors all mean the exchange broke
            Self::Transient {
                status: None,
                message,
            }
        }
    }

    pub fn timeout(what: &str) -> Self {
        Self::Transient {
            status: None,
            message: format!("{what} timed out"),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Render a reqwest error without its URL.
fn message_without_url(e: &reqwest::Error) -> String {
    let msg = e.to_string();
    match e.url() {
        Some(url) => msg.replace(url.as_str(), "<url>"),
        None => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_transient() {
        assert!(SourceError::from_status(429, "slow down").is_retryable());
    }

    #[test]
    fn status_503_transient() {
        assert!(SourceError::from_status(503, "unavailable").is_retryable());
    }

    #[test]
    fn status_404_permanent() {
        let err = SourceError::from_status(404, "no paper");
        assert!(!err.is_retryable());
        assert!(err.is_permanent());
    }

    #[test]
    fn status_400_permanent() {
        assert!(SourceError::from_status(400, "bad id").is_permanent());
    }

    #[test]
    fn malformed_not_retryable() {
        let err = SourceError::Malformed("expected array".into());
        assert!(!err.is_retryable());
        assert!(!err.is_permanent());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(SourceError::timeout("request").is_retryable());
    }

    #[test]
    fn display_variants() {
        assert_eq!(
            SourceError::from_status(502, "bad gateway").to_string(),
            "transient HTTP 502: bad gateway"
        );
        assert_eq!(
            SourceError::not_found("no match").to_string(),
            "not found: no match"
        );
        assert!(SourceError::Malformed("x".into()).to_string().contains("malformed"));
    }
}
