use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for operator output.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "access_token",
    "client_secret",
    "password",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Operator-facing rendering of an error.
#[derive(Debug, Clone)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth / config ─────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ── Remote API ────────────────────────────────────────────────────────────
    /// Non-2xx response. The body is kept as diagnostic context.
    #[error("Remote API returned {status}: {body}")]
    RemoteApi { status: u16, body: String },

    #[error("Rate limited: {body}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        body: String,
    },

    // ── Bulk jobs ─────────────────────────────────────────────────────────────
    #[error("Bulk job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Bulk job {job_id} was aborted")]
    JobAborted { job_id: String },

    #[error("Bulk job {job_id} did not finish after {attempts} status checks ({waited_secs}s)")]
    Timeout {
        job_id: String,
        attempts: u32,
        waited_secs: u64,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Data ──────────────────────────────────────────────────────────────────
    #[error("Unexpected data format: {0}")]
    DataFormat(String),

    #[error("File error: {0}")]
    Io(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a presentation suitable for terminal output.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Auth / config ─────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "No Salesforce session is available for this run.".into(),
                action: Some("Set the SF_* login variables and log in again".into()),
            },

            AppError::LoginFailed(msg) => ErrorPresentation {
                title: "Login Failed".into(),
                message: sanitize_message(msg, "Salesforce rejected the login request."),
                action: Some("Check the credentials and log in again".into()),
            },

            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is incomplete."),
                action: Some("Check the environment variables and .env file".into()),
            },

            // ── Remote API ────────────────────────────────────────────────────
            AppError::RemoteApi { status, body } => ErrorPresentation {
                title: format!("Remote Error (HTTP {})", status),
                message: sanitize_message(body, "The remote service returned an error."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs, body } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!(
                        "The remote service is limiting requests: {}. {}",
                        sanitize_message(body, "no details"),
                        wait_msg
                    ),
                    action: Some("Wait and retry".into()),
                }
            }

            // ── Bulk jobs ─────────────────────────────────────────────────────
            AppError::JobFailed { job_id: _, message } => ErrorPresentation {
                title: "Bulk Job Failed".into(),
                message: sanitize_message(message, "The bulk operation failed."),
                action: Some("Review the error and try again".into()),
            },

            AppError::JobAborted { .. } => ErrorPresentation {
                title: "Bulk Job Aborted".into(),
                message: "The bulk job was aborted before it completed.".into(),
                action: Some("Start a fresh run".into()),
            },

            AppError::Timeout {
                attempts,
                waited_secs,
                ..
            } => ErrorPresentation {
                title: "Bulk Job Timed Out".into(),
                message: format!(
                    "The job was still running after {} status checks over {} seconds.",
                    attempts, waited_secs
                ),
                action: Some("Raise POLL_MAX_ATTEMPTS or POLL_DEADLINE_SECS and retry".into()),
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled after a sibling task failed.".into(),
                action: None,
            },

            // ── Data ──────────────────────────────────────────────────────────
            AppError::DataFormat(msg) => ErrorPresentation {
                title: "Unexpected Data".into(),
                message: format!("The response could not be read: {}", msg),
                action: Some("Check the query projection and the generation schema".into()),
            },

            AppError::Io(msg) => ErrorPresentation {
                title: "File Error".into(),
                message: msg.clone(),
                action: Some("Check the data directory exists and is writable".into()),
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the remote service. Please check your internet connection.".into(),
                action: Some("Check network and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::DataFormat(format!("CSV: {}", e))
    }
}
