//! Mockaroo generate API client.
//!
//! # Security
//!
//! - The API key travels as a query parameter; logged URLs redact it
//! - Generated data is never logged

use std::path::Path;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::schema::FieldSpec;
use crate::config::MockarooConfig;
use crate::error::AppError;
use crate::http::{self, build_http_client};

/// Log tag for every Mockaroo call.
const GEN_TAG: &str = "GEN";

/// Client for `POST /api/generate.csv`.
#[derive(Clone)]
pub struct MockarooClient {
    http: reqwest::Client,
    base_url: Url,
    key: SecretString,
}

impl std::fmt::Debug for MockarooClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockarooClient")
            .field("base_url", &self.base_url.as_str())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MockarooClient {
    /// # Errors
    ///
    /// - `AppError::Config` - missing key or unparseable base URL
    /// - `AppError::Internal` - the HTTP client fails to initialize
    pub fn new(config: &MockarooConfig) -> Result<Self, AppError> {
        Self::with_http(build_http_client()?, config)
    }

    pub fn with_http(http: reqwest::Client, config: &MockarooConfig) -> Result<Self, AppError> {
        if config.key.expose_secret().is_empty() {
            return Err(AppError::Config("MOCKAROO_KEY is not set".to_string()));
        }

        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|_| AppError::Config("Invalid Mockaroo base URL".to_string()))?;

        Ok(Self {
            http,
            base_url,
            key: config.key.clone(),
        })
    }

    fn generate_url(&self, count: usize, include_header: bool) -> Result<Url, AppError> {
        let mut url = self
            .base_url
            .join("/api/generate.csv")
            .map_err(|e| AppError::Internal(format!("Invalid generate URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("key", self.key.expose_secret())
            .append_pair("count", &count.to_string())
            .append_pair("include_header", if include_header { "true" } else { "false" });
        Ok(url)
    }

    /// Generates `count` rows and streams the CSV response into `path`.
    ///
    /// The response bytes are written unchanged. Returns the number of bytes written.
    pub async fn generate_to_file(
        &self,
        schema: &[FieldSpec],
        count: usize,
        include_header: bool,
        path: &Path,
    ) -> Result<u64, AppError> {
        let payload = serde_json::to_vec(schema)
            .map_err(|e| AppError::Internal(format!("Failed to serialize schema: {}", e)))?;

        let request = self
            .http
            .post(self.generate_url(count, include_header)?)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(payload);

        let response = http::send_streaming(GEN_TAG, request).await?;

        let mut file = File::create(path)
            .await
            .map_err(|e| AppError::Io(format!("Failed to create {}: {}", path.display(), e)))?;

        let mut stream = response.bytes_stream();
        let mut total_bytes = 0u64;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                AppError::ConnectionFailed(format!("Error reading response stream: {}", e))
            })?;
            file.write_all(&chunk).await?;
            total_bytes += chunk.len() as u64;
        }

        file.flush().await?;

        debug!(
            "[GEN] Wrote {} rows ({} bytes) to {}",
            count,
            total_bytes,
            path.display()
        );
        Ok(total_bytes)
    }
}
