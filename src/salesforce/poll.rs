//! Bounded polling of Bulk API job status.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::AppError;
use crate::salesforce::{redact_id, BulkJobState};

/// How often and for how long to poll a job.
///
/// `None` bounds are unbounded; at least one bound should normally be set so a
/// stuck job cannot hang the run forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between two status fetches.
    pub interval: Duration,
    /// Maximum number of status fetches.
    pub max_attempts: Option<u32>,
    /// Maximum total time spent waiting.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    /// Polls every `interval` with no bounds.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Anything the status endpoint returns.
pub trait JobStatus {
    fn state(&self) -> BulkJobState;

    /// Server-supplied reason for a `Failed` job.
    fn error_message(&self) -> Option<&str>;

    fn records_processed(&self) -> Option<i64> {
        None
    }
}

/// Fetches job status until it reaches `JobComplete`.
///
/// The first fetch happens immediately. After every non-complete fetch the
/// bounds are checked and, if there is budget left, the task sleeps for one
/// interval before fetching again.
///
/// # Errors
///
/// - `AppError::JobFailed` - the job reached `Failed`
/// - `AppError::JobAborted` - the job reached `Aborted`
/// - `AppError::Timeout` - a bound was exhausted before completion
/// - any error returned by `fetch`
pub async fn poll_until_complete<S, F, Fut>(
    job_id: &str,
    policy: &PollPolicy,
    mut fetch: F,
) -> Result<S, AppError>
where
    S: JobStatus,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, AppError>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        let status = fetch().await?;
        attempts += 1;

        match status.state() {
            BulkJobState::JobComplete => {
                info!(
                    "[BULK] Job {} complete after {} checks",
                    redact_id(job_id),
                    attempts
                );
                return Ok(status);
            }
            BulkJobState::Failed => {
                return Err(AppError::JobFailed {
                    job_id: job_id.to_string(),
                    message: status
                        .error_message()
                        .unwrap_or("no error message returned")
                        .to_string(),
                });
            }
            BulkJobState::Aborted => {
                return Err(AppError::JobAborted {
                    job_id: job_id.to_string(),
                });
            }
            state => {
                debug!(
                    "[BULK] Job {} is {:?} ({} records processed)",
                    redact_id(job_id),
                    state,
                    status.records_processed().unwrap_or(0)
                );
            }
        }

        let elapsed = start.elapsed();
        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
        let past_deadline = policy
            .deadline
            .is_some_and(|deadline| elapsed + policy.interval > deadline);

        if out_of_attempts || past_deadline {
            return Err(AppError::Timeout {
                job_id: job_id.to_string(),
                attempts,
                waited_secs: elapsed.as_secs(),
            });
        }

        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct FakeStatus {
        state: BulkJobState,
        message: Option<String>,
    }

    impl JobStatus for FakeStatus {
        fn state(&self) -> BulkJobState {
            self.state
        }

        fn error_message(&self) -> Option<&str> {
            self.message.as_deref()
        }
    }

    fn status(state: BulkJobState) -> FakeStatus {
        FakeStatus {
            state,
            message: None,
        }
    }

    /// Returns a fetch closure that replays `states`, repeating the last one,
    /// plus a shared fetch counter.
    fn script(
        states: Vec<FakeStatus>,
    ) -> (
        impl FnMut() -> std::future::Ready<Result<FakeStatus, AppError>>,
        Arc<Mutex<u32>>,
    ) {
        let queue = Arc::new(Mutex::new(VecDeque::from(states)));
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();

        let fetch = move || {
            *counter.lock().unwrap() += 1;
            let mut queue = queue.lock().unwrap();
            let next = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            std::future::ready(Ok(next))
        };

        (fetch, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_three_fetches_and_two_sleeps() {
        let (fetch, calls) = script(vec![
            status(BulkJobState::InProgress),
            status(BulkJobState::InProgress),
            status(BulkJobState::JobComplete),
        ]);
        let policy = PollPolicy::every(Duration::from_secs(10));
        let start = Instant::now();

        let result = poll_until_complete("750xx000000001", &policy, fetch).await;

        assert_eq!(result.unwrap().state, BulkJobState::JobComplete);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn already_complete_does_not_sleep() {
        let (fetch, calls) = script(vec![status(BulkJobState::JobComplete)]);
        let policy = PollPolicy::every(Duration::from_secs(30));
        let start = Instant::now();

        poll_until_complete("750", &policy, fetch).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn max_attempts_bounds_fetches() {
        let (fetch, calls) = script(vec![status(BulkJobState::InProgress)]);
        let policy = PollPolicy::every(Duration::from_secs(10)).with_max_attempts(3);

        let result = poll_until_complete("750", &policy, fetch).await;

        match result {
            Err(AppError::Timeout {
                attempts,
                waited_secs,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(waited_secs, 20);
            }
            other => panic!("Expected Timeout, got: {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_before_oversleeping() {
        let (fetch, calls) = script(vec![status(BulkJobState::UploadComplete)]);
        let policy = PollPolicy::every(Duration::from_secs(30)).with_deadline(Duration::from_secs(100));

        let result = poll_until_complete("750", &policy, fetch).await;

        // Fetches at 0s, 30s, 60s, 90s; a fifth would land past 100s.
        match result {
            Err(AppError::Timeout {
                attempts,
                waited_secs,
                ..
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(waited_secs, 90);
            }
            other => panic!("Expected Timeout, got: {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_carries_server_message() {
        let (fetch, _) = script(vec![
            status(BulkJobState::InProgress),
            FakeStatus {
                state: BulkJobState::Failed,
                message: Some("INVALID_FIELD: Foo__c".to_string()),
            },
        ]);
        let policy = PollPolicy::every(Duration::from_secs(1));

        match poll_until_complete("750xx", &policy, fetch).await {
            Err(AppError::JobFailed { job_id, message }) => {
                assert_eq!(job_id, "750xx");
                assert_eq!(message, "INVALID_FIELD: Foo__c");
            }
            other => panic!("Expected JobFailed, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_job_is_distinct_from_failure() {
        let (fetch, _) = script(vec![status(BulkJobState::Aborted)]);
        let policy = PollPolicy::every(Duration::from_secs(1));

        let result = poll_until_complete("750", &policy, fetch).await;

        assert!(matches!(result, Err(AppError::JobAborted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_propagate() {
        let policy = PollPolicy::every(Duration::from_secs(1));

        let result: Result<FakeStatus, _> = poll_until_complete("750", &policy, || async {
            Err(AppError::RemoteApi {
                status: 404,
                body: "not found".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(AppError::RemoteApi { status: 404, .. })));
    }
}
