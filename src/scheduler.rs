//! Bounded concurrency for fan-out work.
//!
//! [`WorkScheduler`] caps how many units run at once (generation batches,
//! update-mode queries). [`run_all`] spawns every unit on a `JoinSet`, waits
//! for all of them and applies a [`FailurePolicy`] when one fails.
//!
//! ```ignore
//! let scheduler = WorkScheduler::new(4);
//! let results = run_all(&scheduler, FailurePolicy::CancelSiblings, tasks).await;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// WorkScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Limits the number of units of work running concurrently.
///
/// Permits are released when dropped, so a slot is always freed even if the
/// holder returns early.
#[derive(Clone)]
pub struct WorkScheduler {
    sem: Arc<Semaphore>,
}

impl WorkScheduler {
    /// Creates a scheduler with `max_concurrent` slots (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Acquires a permit, waiting if all slots are in use.
    pub async fn acquire(&self) -> Result<WorkPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Cancelled)?;

        Ok(WorkPermit { _permit: permit })
    }
}

/// One held slot. Released on drop.
pub struct WorkPermit {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Fan-out
// ─────────────────────────────────────────────────────────────────────────────

/// What happens to sibling units when one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Cancel everything still waiting or running; they report `Cancelled`.
    CancelSiblings,
    /// Let every other unit finish and report its own result.
    RunToCompletion,
}

/// Runs every task under `scheduler` and returns their results in input order.
///
/// A task is not polled until it holds a slot. On cancellation it is dropped
/// at its next await point and reports `AppError::Cancelled`. A panicking
/// task is reported as `AppError::Internal`.
pub async fn run_all<T, Fut>(
    scheduler: &WorkScheduler,
    policy: FailurePolicy,
    tasks: impl IntoIterator<Item = Fut>,
) -> Vec<Result<T, AppError>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let mut join_set: JoinSet<(usize, Result<T, AppError>)> = JoinSet::new();
    let mut total = 0usize;

    for (index, work) in tasks.into_iter().enumerate() {
        total += 1;
        let scheduler = scheduler.clone();
        let token = cancel.clone();

        join_set.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(AppError::Cancelled),
                result = async {
                    let _permit = scheduler.acquire().await?;
                    work.await
                } => result,
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<T, AppError>>> = (0..total).map(|_| None).collect();

    while let Some(joined) = join_set.join_next().await {
        let (index, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!("[SCHED] Task join error: {}", e);
                cancel_if(policy, &cancel);
                continue;
            }
        };

        if let Err(e) = &result {
            if !matches!(e, AppError::Cancelled) {
                debug!("[SCHED] Unit {} failed: {}", index, e);
                cancel_if(policy, &cancel);
            }
        }
        results[index] = Some(result);
    }

    results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| Err(AppError::Internal("Task panicked".to_string()))))
        .collect()
}

fn cancel_if(policy: FailurePolicy, cancel: &CancellationToken) {
    if policy == FailurePolicy::CancelSiblings && !cancel.is_cancelled() {
        warn!("[SCHED] Cancelling remaining units");
        cancel.cancel();
    }
}

/// Unwraps every result, or returns the first failure.
///
/// A real error wins over `Cancelled`, so the unit that triggered
/// cancellation is the one reported.
pub fn collect_results<T>(results: Vec<Result<T, AppError>>) -> Result<Vec<T>, AppError> {
    let mut values = Vec::with_capacity(results.len());
    let mut cancelled = false;
    let mut failure = None;

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(AppError::Cancelled) => cancelled = true,
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None if cancelled => Err(AppError::Cancelled),
        None => Ok(values),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_zero_is_clamped_to_one_slot() {
        let scheduler = WorkScheduler::new(0);
        let _held = timeout(Duration::from_millis(100), scheduler.acquire())
            .await
            .expect("one slot should be available")
            .unwrap();

        assert!(timeout(Duration::from_millis(20), scheduler.acquire()).await.is_err());
    }

    #[tokio::test]
    async fn test_acquire_blocks_when_full() {
        let scheduler = WorkScheduler::new(1);
        let permit1 = scheduler.acquire().await.unwrap();

        let scheduler_clone = scheduler.clone();
        let handle = tokio::spawn(async move { scheduler_clone.acquire().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "Acquire should still be blocked");

        drop(permit1);

        let result = timeout(Duration::from_millis(100), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_all_preserves_input_order() {
        let scheduler = WorkScheduler::new(3);
        let tasks = (0..6u64).map(|i| {
            async move {
                // Later tasks finish first.
                tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                Ok::<_, AppError>(i)
            }
        });

        let results = run_all(&scheduler, FailurePolicy::RunToCompletion, tasks).await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_run_all_never_exceeds_slots() {
        let scheduler = WorkScheduler::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, AppError>(())
            }
        });

        let results = run_all(&scheduler, FailurePolicy::RunToCompletion, tasks).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_siblings_stops_slow_units() {
        let scheduler = WorkScheduler::new(4);
        let tasks = (0..3u64).map(|i| {
            async move {
                if i == 1 {
                    return Err(AppError::DataFormat("bad batch".to_string()));
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(i)
            }
        });

        let results = timeout(
            Duration::from_secs(5),
            run_all(&scheduler, FailurePolicy::CancelSiblings, tasks),
        )
        .await
        .expect("siblings should have been cancelled");

        assert!(matches!(results[0], Err(AppError::Cancelled)));
        assert!(matches!(results[1], Err(AppError::DataFormat(_))));
        assert!(matches!(results[2], Err(AppError::Cancelled)));
        assert!(matches!(collect_results(results), Err(AppError::DataFormat(_))));
    }

    #[tokio::test]
    async fn test_run_to_completion_keeps_sibling_results() {
        let scheduler = WorkScheduler::new(4);
        let tasks = (0..3u64).map(|i| {
            async move {
                if i == 0 {
                    return Err(AppError::RemoteApi {
                        status: 400,
                        body: "bad query".to_string(),
                    });
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(i)
            }
        });

        let results = run_all(&scheduler, FailurePolicy::RunToCompletion, tasks).await;

        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap(), &1);
        assert_eq!(results[2].as_ref().unwrap(), &2);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_internal_error() {
        let scheduler = WorkScheduler::new(2);
        let tasks = (0..2u64).map(|i| {
            async move {
                if i == 0 {
                    panic!("boom");
                }
                Ok::<_, AppError>(i)
            }
        });

        let results = run_all(&scheduler, FailurePolicy::RunToCompletion, tasks).await;

        assert!(matches!(results[0], Err(AppError::Internal(_))));
        assert_eq!(results[1].as_ref().unwrap(), &1);
    }

    #[test]
    fn test_collect_results_prefers_real_error() {
        let results: Vec<Result<u8, AppError>> = vec![
            Err(AppError::Cancelled),
            Ok(1),
            Err(AppError::Io("disk full".to_string())),
        ];
        assert!(matches!(collect_results(results), Err(AppError::Io(_))));

        let only_cancelled: Vec<Result<u8, AppError>> = vec![Ok(1), Err(AppError::Cancelled)];
        assert!(matches!(collect_results(only_cancelled), Err(AppError::Cancelled)));

        let all_ok: Vec<Result<u8, AppError>> = vec![Ok(1), Ok(2)];
        assert_eq!(collect_results(all_ok).unwrap(), vec![1, 2]);
    }
}
