//! Runtime configuration read from the process environment.
//!
//! Values come from environment variables, optionally seeded from a `.env`
//! file by [`load_dotenv`]. Numeric values that fail to parse fall back to
//! their defaults; missing credentials are only reported when a session is
//! actually created.
//!
//! A session comes from one of two sources:
//!
//! - `SF_ACCESS_TOKEN` + `SF_INSTANCE_URL`: a pre-issued session, no login
//! - `SF_USER`, `SF_PASS`, `SF_TOKEN` and `SF_CLIENT_ID` (plus
//!   `SF_CLIENT_SECRET` when the connected app has one): an OAuth
//!   username/password grant against `SF_ENDPOINT`
//!
//! The password grant has no default client id, so `SF_USER`/`SF_PASS`/
//! `SF_TOKEN` alone are not enough.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, warn};

use crate::salesforce::poll::PollPolicy;
use crate::scheduler::FailurePolicy;

/// Default Salesforce API version.
pub const DEFAULT_API_VERSION: &str = "52.0";

/// Default login host for the username/password flow.
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

/// Default Mockaroo API host.
pub const DEFAULT_MOCKAROO_URL: &str = "https://api.mockaroo.com";

/// Mockaroo returns at most this many rows per call on the plans we target.
pub const DEFAULT_GENERATION_BATCH_SIZE: usize = 1000;

/// Batches allowed in flight against Mockaroo at once.
pub const DEFAULT_GENERATION_MAX_IN_FLIGHT: usize = 4;

const DEFAULT_QUERY_POLL_SECS: u64 = 10;
const DEFAULT_INGEST_POLL_SECS: u64 = 30;
const DEFAULT_POLL_DEADLINE_SECS: u64 = 60 * 60;

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Salesforce connection settings.
#[derive(Clone)]
pub struct SalesforceConfig {
    pub username: String,
    pub password: SecretString,
    pub security_token: SecretString,
    /// Login host, e.g. `https://test.salesforce.com`.
    pub login_url: String,
    /// Consumer key of the connected app. Required by the password grant.
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    /// Pre-issued session. When set together with `instance_url`, login is skipped.
    pub access_token: Option<SecretString>,
    pub instance_url: Option<String>,
    /// Version without the leading `v`, e.g. `52.0`.
    pub api_version: String,
    /// Queries run by `update`.
    pub queries: Vec<String>,
}

impl std::fmt::Debug for SalesforceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("security_token", &"[REDACTED]")
            .field("login_url", &self.login_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .field("queries", &self.queries.len())
            .finish()
    }
}

/// Mockaroo settings.
#[derive(Clone)]
pub struct MockarooConfig {
    pub key: SecretString,
    pub base_url: String,
}

impl std::fmt::Debug for MockarooConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockarooConfig")
            .field("key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub salesforce: SalesforceConfig,
    pub mockaroo: MockarooConfig,
    /// Directory holding query output, fragments, merged files and failures.
    pub data_dir: PathBuf,
    pub query_poll: PollPolicy,
    pub ingest_poll: PollPolicy,
    pub generation_batch_size: usize,
    pub generation_max_in_flight: usize,
    /// Write the literal `null` instead of random values in `update`.
    pub modify_with_null: bool,
    /// What happens to sibling queries in `update` when one fails.
    pub query_failure_policy: FailurePolicy,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_attempts = parse_or(&get, "POLL_MAX_ATTEMPTS", 0u32);
        let max_attempts = (max_attempts > 0).then_some(max_attempts);
        let deadline = parse_or(&get, "POLL_DEADLINE_SECS", DEFAULT_POLL_DEADLINE_SECS);
        let deadline = (deadline > 0).then(|| Duration::from_secs(deadline));

        let query_poll = PollPolicy {
            interval: Duration::from_secs(parse_or(&get, "QUERY_POLL_SECS", DEFAULT_QUERY_POLL_SECS)),
            max_attempts,
            deadline,
        };
        let ingest_poll = PollPolicy {
            interval: Duration::from_secs(parse_or(&get, "INGEST_POLL_SECS", DEFAULT_INGEST_POLL_SECS)),
            max_attempts,
            deadline,
        };

        let api_version = get("SF_API_VERSION")
            .map(|v| v.trim_start_matches('v').to_string())
            .filter(|v| v.parse::<f32>().is_ok())
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let login_url = get("SF_ENDPOINT")
            .map(|host| normalize_login_url(&host))
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string());

        let queries = get("QUERIES")
            .map(|q| {
                q.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let data_dir = get("MOCKAROO_DATA_DIR")
            .or_else(|| get("DATA_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("bulk-modifier"));

        let cancel_on_failure = parse_bool_or(&get, "CANCEL_ON_FAILURE", false);

        let config = Self {
            salesforce: SalesforceConfig {
                username: get("SF_USER").unwrap_or_default(),
                password: SecretString::from(get("SF_PASS").unwrap_or_default()),
                security_token: SecretString::from(get("SF_TOKEN").unwrap_or_default()),
                login_url,
                client_id: get("SF_CLIENT_ID"),
                client_secret: get("SF_CLIENT_SECRET").map(SecretString::from),
                access_token: get("SF_ACCESS_TOKEN").map(SecretString::from),
                instance_url: get("SF_INSTANCE_URL"),
                api_version,
                queries,
            },
            mockaroo: MockarooConfig {
                key: SecretString::from(get("MOCKAROO_KEY").unwrap_or_default()),
                base_url: get("MOCKAROO_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_MOCKAROO_URL.to_string()),
            },
            data_dir,
            query_poll,
            ingest_poll,
            generation_batch_size: parse_or(&get, "GENERATION_BATCH_SIZE", DEFAULT_GENERATION_BATCH_SIZE)
                .max(1),
            generation_max_in_flight: parse_or(
                &get,
                "GENERATION_MAX_IN_FLIGHT",
                DEFAULT_GENERATION_MAX_IN_FLIGHT,
            )
            .max(1),
            modify_with_null: parse_bool_or(&get, "MODIFY_WITH_NULL", false),
            query_failure_policy: if cancel_on_failure {
                FailurePolicy::CancelSiblings
            } else {
                FailurePolicy::RunToCompletion
            },
        };

        debug!("[CONFIG] {:?}", config);
        config
    }
}

/// Loads `.env` from the working directory if one exists.
///
/// Variables already present in the environment win over file values.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("[CONFIG] Loaded {}", path.display()),
        Err(e) if e.not_found() => debug!("[CONFIG] No .env file found"),
        Err(e) => warn!("[CONFIG] Ignoring unreadable .env file: {}", e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("[CONFIG] {} has an invalid value, using the default", key);
            default
        }),
        None => default,
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> bool
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "t" | "true" | "yes") => true,
        Some(v) if matches!(v.as_str(), "0" | "f" | "false" | "no") => false,
        _ => default,
    }
}

/// Accepts a bare host (`test.salesforce.com`) or a full URL.
fn normalize_login_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
