//! Shared HTTP client and runtime for JSON source APIs.
//!
//! Uses async reqwest internally with `tokio::time::timeout` on every request,
//! but presents a sync interface so rayon workers can call it directly.

use std::sync::LazyLock;
use std::time::Duration;

use serde_json::Value;

use crate::error::SourceError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default hard timeout for one request including the body
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Error bodies are truncated to this many characters in messages
const ERROR_BODY_LIMIT: usize = 200;

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .user_agent(concat!("paperlink/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Send a request and parse the JSON body, blocking the calling thread.
///
/// The whole exchange (headers and body) must finish within `timeout`.
/// Status codes are classified via [`SourceError::from_status`]; an
/// unparseable body is `Malformed`.
pub fn send_json(request: reqwest::RequestBuilder, timeout: Duration) -> Result<Value, SourceError> {
    SHARED_RUNTIME.handle().block_on(async {
        let exchange = async {
            let response = request.send().await.map_err(|e| SourceError::from_reqwest(&e))?;
            let status = response.status();
            let body = response.text().await.map_err(|e| SourceError::from_reqwest(&e))?;
            Ok::<_, SourceError>((status, body))
        };

        let (status, body) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| SourceError::timeout("request"))??;

        if !status.is_success() {
            return Err(SourceError::from_status(status.as_u16(), truncate(&body)));
        }
        parse_json_body(&body)
    })
}

/// Parse a response body, mapping failures to `Malformed`.
pub fn parse_json_body(body: &str) -> Result<Value, SourceError> {
    serde_json::from_str(body)
        .map_err(|e| SourceError::Malformed(format!("{e} (body: {})", truncate(body))))
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_body() {
        let v = parse_json_body(r#"{"data": [1, 2]}"#).unwrap();
        assert_eq!(v["data"][1], 2);
    }

    #[test]
    fn parse_invalid_body_is_malformed() {
        let err = parse_json_body("<html>gateway</html>").unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn truncate_long_bodies() {
        let long = "x".repeat(500);
        let t = truncate(&long);
        assert_eq!(t.len(), ERROR_BODY_LIMIT + 3);
        assert_eq!(truncate("short"), "short");
    }
}
