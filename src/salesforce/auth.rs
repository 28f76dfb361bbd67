//! Session acquisition for Salesforce.
//!
//! A run authenticates exactly once. Either a pre-issued token is supplied
//! (`SF_ACCESS_TOKEN` + `SF_INSTANCE_URL`) or the OAuth username/password
//! grant is exchanged against the configured login host.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};

use crate::config::SalesforceConfig;
use crate::error::AppError;
use crate::salesforce::client::RemoteSession;

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    /// The issued access token.
    pub access_token: String,
    /// The instance URL the session is bound to.
    pub instance_url: String,
    /// Token type (usually "Bearer").
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Login
// ─────────────────────────────────────────────────────────────────────────────

/// Establishes the session for this run.
///
/// # Errors
///
/// - `AppError::Config` - neither a preset session nor username + client id are configured
/// - `AppError::LoginFailed` - the token endpoint rejected the credentials
/// - `AppError::ConnectionFailed` - the login host could not be reached
///
/// # Security
///
/// Never logs the password, the security token or the issued access token.
pub async fn login(
    http: &reqwest::Client,
    config: &SalesforceConfig,
) -> Result<RemoteSession, AppError> {
    if let (Some(token), Some(instance_url)) = (&config.access_token, &config.instance_url) {
        info!("[SFDC] Using preset session");
        return RemoteSession::new(instance_url, token.clone(), &config.api_version);
    }

    if config.username.is_empty() {
        return Err(AppError::Config("SF_USER is not set".to_string()));
    }
    let client_id = config
        .client_id
        .as_deref()
        .ok_or_else(|| {
            AppError::Config(
                "SF_CLIENT_ID is not set; logging in as SF_USER needs the consumer key \
                 of a connected app. A preset session with SF_INSTANCE_URL skips login."
                    .to_string(),
            )
        })?;

    let token = password_grant(http, config, client_id).await?;
    RemoteSession::new(
        &token.instance_url,
        SecretString::from(token.access_token),
        &config.api_version,
    )
}

async fn password_grant(
    http: &reqwest::Client,
    config: &SalesforceConfig,
    client_id: &str,
) -> Result<AccessTokenResponse, AppError> {
    let token_url = format!("{}/services/oauth2/token", config.login_url);

    info!("[SFDC] Logging in as configured user...");

    // The security token is appended to the password.
    let password = SecretString::from(format!(
        "{}{}",
        config.password.expose_secret(),
        config.security_token.expose_secret()
    ));
    let client_secret = config
        .client_secret
        .as_ref()
        .map(|s| s.expose_secret())
        .unwrap_or_default();

    let params = [
        ("grant_type", "password"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("username", config.username.as_str()),
        ("password", password.expose_secret()),
    ];

    let response = http
        .post(&token_url)
        .form(&params)
        .send()
        .await
        .map_err(|_| {
            error!("[SFDC] Login request failed");
            AppError::ConnectionFailed("Failed to connect to the login host".to_string())
        })?;

    let status = response.status();

    if status.is_success() {
        let token_response: AccessTokenResponse = response.json().await.map_err(|_| {
            error!("[SFDC] Failed to parse login response");
            AppError::Internal("Invalid login response".to_string())
        })?;

        info!("[SFDC] Login successful");
        Ok(token_response)
    } else if status == reqwest::StatusCode::BAD_REQUEST
        || status == reqwest::StatusCode::UNAUTHORIZED
    {
        error!("[SFDC] Login rejected: {}", status);
        Err(AppError::LoginFailed(
            "Salesforce rejected the username/password grant".to_string(),
        ))
    } else {
        error!("[SFDC] Login failed with status: {}", status);
        Err(AppError::RemoteApi {
            status: status.as_u16(),
            body: "Login failed".to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
