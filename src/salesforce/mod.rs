//! Salesforce API interaction layer.
//!
//! - **Session handling** via [`auth::login`] and [`client::RemoteSession`]
//! - **Single transport** ([`client::SalesforceClient`]) that maps non-2xx responses to errors
//! - **Bulk API 2.0** query and ingest job state machines
//! - **Safe logging** that never leaks tokens, SOQL text, or CSV contents

use serde::{Deserialize, Serialize};

pub mod auth;
pub mod bulk_ingest_v2;
pub mod bulk_query_v2;
pub mod client;
pub mod describe;
pub mod poll;

pub use auth::login;
pub use bulk_ingest_v2::{BulkIngestV2Client, IngestReport};
pub use bulk_query_v2::{BulkQueryV2Client, QueryJob, QueryTable};
pub use client::{RemoteSession, SalesforceClient};
pub use describe::{FieldMeta, ObjectMeta};
pub use poll::PollPolicy;

/// Lifecycle state shared by Bulk API 2.0 query and ingest jobs.
///
/// The server reports newly created jobs as `Open`. Values this crate does not
/// know about deserialize to `Unknown` so a new server release cannot break polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkJobState {
    Open,
    UploadComplete,
    InProgress,
    JobComplete,
    Failed,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl BulkJobState {
    /// True once the server will not move the job any further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BulkJobState::JobComplete | BulkJobState::Failed | BulkJobState::Aborted
        )
    }
}

/// Redacts a job ID for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_deserialization() {
        let test_cases = [
            (r#""Open""#, BulkJobState::Open),
            (r#""UploadComplete""#, BulkJobState::UploadComplete),
            (r#""InProgress""#, BulkJobState::InProgress),
            (r#""JobComplete""#, BulkJobState::JobComplete),
            (r#""Aborted""#, BulkJobState::Aborted),
            (r#""Failed""#, BulkJobState::Failed),
            (r#""SomeNewState""#, BulkJobState::Unknown),
        ];

        for (json, expected) in test_cases {
            let result: BulkJobState = serde_json::from_str(json).unwrap();
            assert_eq!(result, expected, "Failed for input: {}", json);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(BulkJobState::JobComplete.is_terminal());
        assert!(BulkJobState::Failed.is_terminal());
        assert!(BulkJobState::Aborted.is_terminal());
        assert!(!BulkJobState::Open.is_terminal());
        assert!(!BulkJobState::UploadComplete.is_terminal());
        assert!(!BulkJobState::InProgress.is_terminal());
        assert!(!BulkJobState::Unknown.is_terminal());
    }

    #[test]
    fn test_redact_id_long() {
        assert_eq!(redact_id("750xx000000001ABC"), "750xx000...");
    }

    #[test]
    fn test_redact_id_short() {
        assert_eq!(redact_id("short"), "short");
        assert_eq!(redact_id("12345678"), "12345678");
    }
}
