//! Salesforce session and authenticated request plumbing.

use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use crate::error::AppError;
use crate::http::{self, build_http_client, HttpResponse};

/// Log tag for every Salesforce call.
const SFDC_TAG: &str = "SFDC";

// ─────────────────────────────────────────────────────────────────────────────
// RemoteSession
// ─────────────────────────────────────────────────────────────────────────────

/// An authenticated Salesforce session.
///
/// Created once per run and never mutated afterwards. The access token is
/// wrapped in `SecretString` so it cannot leak through `Debug` or logging.
#[derive(Clone)]
pub struct RemoteSession {
    /// Instance URL (e.g., "https://na1.salesforce.com").
    instance_url: Url,
    /// Bearer credential for every API call.
    access_token: SecretString,
    /// API version without the `v` prefix (e.g., "52.0").
    api_version: String,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("instance_url", &self.instance_url.as_str())
            .field("access_token", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl RemoteSession {
    /// Creates a session from an instance URL and a bearer token.
    ///
    /// # Errors
    ///
    /// - `AppError::NotAuthenticated` - empty token
    /// - `AppError::Config` - instance URL does not parse
    pub fn new(
        instance_url: &str,
        access_token: SecretString,
        api_version: &str,
    ) -> Result<Self, AppError> {
        if access_token.expose_secret().is_empty() {
            return Err(AppError::NotAuthenticated);
        }

        let instance_url = Url::parse(instance_url.trim_end_matches('/'))
            .map_err(|_| AppError::Config("Invalid Salesforce instance URL".to_string()))?;

        Ok(Self {
            instance_url,
            access_token,
            api_version: api_version.trim_start_matches('v').to_string(),
        })
    }

    /// Returns the instance URL.
    pub fn instance_url(&self) -> &Url {
        &self.instance_url
    }

    /// Returns the API version without the `v` prefix.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Returns `/services/data/v{version}/{suffix}`.
    pub fn data_path(&self, suffix: &str) -> String {
        format!(
            "/services/data/v{}/{}",
            self.api_version,
            suffix.trim_start_matches('/')
        )
    }

    fn bearer(&self) -> &str {
        self.access_token.expose_secret()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client bound to one [`RemoteSession`].
///
/// Cheap to clone: the underlying `reqwest::Client` and the session are shared.
#[derive(Clone)]
pub struct SalesforceClient {
    /// The underlying HTTP client.
    http: reqwest::Client,
    /// Session shared by every clone.
    session: Arc<RemoteSession>,
}

impl SalesforceClient {
    /// Creates a client for the given session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(session: RemoteSession) -> Result<Self, AppError> {
        Ok(Self::with_http(build_http_client()?, session))
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    pub fn with_http(http: reqwest::Client, session: RemoteSession) -> Self {
        Self {
            http,
            session: Arc::new(session),
        }
    }

    /// Joins a path onto the instance URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the URL cannot be built.
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        self.session
            .instance_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Builds `{instance}/services/data/v{version}/{suffix}`.
    pub fn data_url(&self, suffix: &str) -> Result<Url, AppError> {
        self.build_url(&self.session.data_path(suffix))
    }

    /// Starts an authenticated request. Callers add a body and pass it to [`send`](Self::send).
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(self.session.bearer())
            .header(ACCEPT, "application/json")
    }

    /// Sends a request and returns headers plus the full body.
    pub async fn send(&self, request: RequestBuilder) -> Result<HttpResponse, AppError> {
        http::send(SFDC_TAG, request).await
    }

    /// Sends a request and returns the live response for streaming.
    pub async fn send_streaming(
        &self,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, AppError> {
        http::send_streaming(SFDC_TAG, request).await
    }

    /// Authenticated GET.
    pub async fn get(&self, url: Url) -> Result<HttpResponse, AppError> {
        self.send(self.request(Method::GET, url)).await
    }

    /// Authenticated request with a JSON body (`application/json; charset=UTF-8`).
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<HttpResponse, AppError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| AppError::Internal(format!("Failed to serialize request: {}", e)))?;

        let request = self
            .request(method, url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .body(payload);

        self.send(request).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(url: &str) -> RemoteSession {
        RemoteSession::new(url, SecretString::from("test_token".to_string()), "52.0").unwrap()
    }

    #[test]
    fn session_debug_redacts_token() {
        let session = RemoteSession::new(
            "https://na1.salesforce.com",
            SecretString::from("super_secret_token_12345".to_string()),
            "v52.0",
        )
        .unwrap();

        let debug_output = format!("{:?}", session);

        assert!(debug_output.contains("na1.salesforce.com"));
        assert!(debug_output.contains("52.0"));
        assert!(!debug_output.contains("super_secret_token_12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn session_requires_token_and_valid_url() {
        let empty = RemoteSession::new(
            "https://na1.salesforce.com",
            SecretString::from(String::new()),
            "52.0",
        );
        assert!(matches!(empty, Err(AppError::NotAuthenticated)));

        let bad_url = RemoteSession::new(
            "not a url",
            SecretString::from("token".to_string()),
            "52.0",
        );
        assert!(matches!(bad_url, Err(AppError::Config(_))));
    }

    #[test]
    fn data_path_strips_version_prefix_and_slashes() {
        let session = RemoteSession::new(
            "https://na1.salesforce.com/",
            SecretString::from("token".to_string()),
            "v58.0",
        )
        .unwrap();

        assert_eq!(session.api_version(), "58.0");
        assert_eq!(
            session.data_path("/jobs/query"),
            "/services/data/v58.0/jobs/query"
        );
    }

    #[test]
    fn data_url_joins_instance() {
        let client = SalesforceClient::new(session("https://na1.salesforce.com")).unwrap();

        let url = client.data_url("jobs/ingest/750xx/").unwrap();

        assert_eq!(
            url.as_str(),
            "https://na1.salesforce.com/services/data/v52.0/jobs/ingest/750xx/"
        );
    }

    #[tokio::test]
    async fn requests_carry_bearer_and_json_headers() {
        let server = MockServer::start().await;
        let client = SalesforceClient::new(session(&server.uri())).unwrap();

        Mock::given(method("PATCH"))
            .and(path("/services/data/v52.0/jobs/ingest/750xx/"))
            .and(header("Authorization", "Bearer test_token"))
            .and(header("Accept", "application/json"))
            .and(header("Content-Type", "application/json; charset=UTF-8"))
            .and(body_json(serde_json::json!({ "state": "UploadComplete" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let url = client.data_url("jobs/ingest/750xx/").unwrap();
        let result = client
            .send_json(Method::PATCH, url, &serde_json::json!({ "state": "UploadComplete" }))
            .await;

        assert!(result.is_ok());
    }
}
