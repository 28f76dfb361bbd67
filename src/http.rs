//! Shared HTTP transport with safe logging.
//!
//! Every outbound call in the crate goes through [`send`] (or [`send_streaming`]
//! when the body should be consumed incrementally). Both treat any non-2xx
//! status as an error and keep the response body as diagnostic context.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all outbound requests.
const CLIENT_USER_AGENT: &str = concat!("bulk-modifier/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Error bodies longer than this are truncated before they are stored.
const MAX_ERROR_BODY_BYTES: usize = 2048;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "client_secret",
    "key",
    "token",
    "sid",
    "session",
    "authorization",
    "password",
];

// ─────────────────────────────────────────────────────────────────────────────
// HttpResponse
// ─────────────────────────────────────────────────────────────────────────────

/// A successful (2xx) response with its body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserializes the body as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::DataFormat(format!("Unexpected JSON response: {}", e)))
    }
}

/// Remote API error response format (Salesforce returns a list of these).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireApiError {
    error_code: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Issues one request and returns headers plus the complete body.
///
/// # Errors
///
/// - `AppError::ConnectionFailed` - the request never produced a response
/// - `AppError::RateLimited` - HTTP 429 or `REQUEST_LIMIT_EXCEEDED`
/// - `AppError::RemoteApi` - any other non-2xx status
///
/// # Security
///
/// - Never logs headers or bodies
/// - Sanitizes URLs before logging
/// - Error messages never contain raw URLs or tokens
pub async fn send(
    tag: &str,
    request: RequestBuilder,
) -> Result<HttpResponse, AppError> {
    let response = send_streaming(tag, request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| AppError::ConnectionFailed(format!("Error reading response body: {}", e)))?
        .to_vec();

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Like [`send`], but hands back the live response so the caller can stream the body.
pub async fn send_streaming(
    tag: &str,
    request: RequestBuilder,
) -> Result<reqwest::Response, AppError> {
    let (client, request) = request.build_split();
    let request =
        request.map_err(|e| AppError::Internal(format!("Failed to build request: {}", e)))?;
    let method = request.method().clone();
    let sanitized_url = sanitize_url_for_logs(request.url());

    let start = Instant::now();
    let result = client.execute(request).await;
    let duration_ms = start.elapsed().as_millis();

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            info!(
                "[{}] {} {} FAILED {}ms",
                tag, method, sanitized_url, duration_ms
            );
            let reason = if e.is_timeout() {
                "request timed out"
            } else if e.is_connect() {
                "could not connect"
            } else {
                "transport error"
            };
            return Err(AppError::ConnectionFailed(format!(
                "{} {}: {}",
                method, sanitized_url, reason
            )));
        }
    };

    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    info!(
        "[{}] {} {} {} {}ms {}",
        tag,
        method,
        sanitized_url,
        status.as_u16(),
        duration_ms,
        request_id
    );

    if !status.is_success() {
        return Err(parse_error_response(response).await);
    }

    Ok(response)
}

/// Maps a non-2xx response to the matching `AppError`.
///
/// The body, truncated to `MAX_ERROR_BODY_BYTES`, is carried on the error
/// unchanged. An empty body is replaced by the status reason.
pub(crate) async fn parse_error_response(response: reqwest::Response) -> AppError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    let raw = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    let limit_exceeded = serde_json::from_str::<Vec<WireApiError>>(&raw)
        .map(|errors| errors.iter().any(|e| e.error_code == "REQUEST_LIMIT_EXCEEDED"))
        .unwrap_or(false);

    let body = if raw.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        truncate(raw, MAX_ERROR_BODY_BYTES)
    };

    if status == StatusCode::TOO_MANY_REQUESTS || limit_exceeded {
        return AppError::RateLimited {
            retry_after_secs: retry_after,
            body,
        };
    }

    AppError::RemoteApi {
        status: status.as_u16(),
        body,
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging.
///
/// Keeps the path and query; sensitive query values become `***`. The result
/// never contains the scheme, host, or fragment.
/// Example: `/api/generate.csv?key=***&count=1000`
pub fn sanitize_url_for_logs(url: &Url) -> String {
    let path = url.path();
    let query_pairs: Vec<_> = url.query_pairs().collect();
    if query_pairs.is_empty() {
        return path.to_string();
    }

    let redacted_pairs: Vec<String> = query_pairs
        .into_iter()
        .map(|(key, value)| {
            if is_sensitive_param(&key) {
                format!("{}=***", key)
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect();

    format!("{}?{}", path, redacted_pairs.join("&"))
}

/// Builds the configured HTTP client.
pub fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
