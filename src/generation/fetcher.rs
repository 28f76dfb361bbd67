//! Batched generation.
//!
//! Mockaroo caps the rows returned per call, so a request for N records is
//! split into full batches plus one remainder batch. Batches run concurrently
//! under a [`WorkScheduler`]; each writes its own fragment file. When every
//! batch has succeeded the fragments are merged in ascending batch order into
//! `{data_dir}/{Object}.csv`. Any failure cancels the remaining batches and
//! removes every fragment.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use super::client::MockarooClient;
use super::schema::FieldSpec;
use crate::error::AppError;
use crate::scheduler::{collect_results, run_all, FailurePolicy, WorkScheduler};
use crate::streaming::{merge_fragments, remove_files};

// ─────────────────────────────────────────────────────────────────────────────
// Batch planning
// ─────────────────────────────────────────────────────────────────────────────

/// One bounded request to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationBatch {
    /// 1-based ordinal; fragments merge in ascending order.
    pub index: usize,
    pub count: usize,
    /// Only the first batch asks for a header line.
    pub include_header: bool,
    pub fragment: PathBuf,
}

/// The batches needed to generate a number of records.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    batches: Vec<GenerationBatch>,
}

impl BatchPlan {
    /// Splits `total` records into batches of at most `ceiling`.
    ///
    /// `total / ceiling` full batches are followed by one remainder batch
    /// when `total % ceiling != 0`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `total` or `ceiling` is zero.
    pub fn new(object: &str, total: usize, ceiling: usize, data_dir: &Path) -> Result<Self, AppError> {
        if total == 0 {
            return Err(AppError::Config(
                "Record count must be greater than zero".to_string(),
            ));
        }
        if ceiling == 0 {
            return Err(AppError::Config(
                "Generation batch size must be greater than zero".to_string(),
            ));
        }

        let full = total / ceiling;
        let remainder = total % ceiling;

        let counts = std::iter::repeat(ceiling)
            .take(full)
            .chain((remainder > 0).then_some(remainder));

        let batches = counts
            .enumerate()
            .map(|(i, count)| {
                let index = i + 1;
                GenerationBatch {
                    index,
                    count,
                    include_header: index == 1,
                    fragment: data_dir.join(format!("{}-{}.csv", object, index)),
                }
            })
            .collect();

        Ok(Self { batches })
    }

    pub fn batches(&self) -> &[GenerationBatch] {
        &self.batches
    }

    /// Fragment paths in merge order.
    pub fn fragments(&self) -> Vec<PathBuf> {
        self.batches.iter().map(|b| b.fragment.clone()).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchSource Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Produces the rows of one batch into its fragment file.
///
/// Implemented by [`MockarooClient`]; tests provide fakes that write fixtures.
pub trait BatchSource: Send + Sync {
    fn fetch_batch<'a>(
        &'a self,
        schema: &'a [FieldSpec],
        batch: &'a GenerationBatch,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>>;
}

impl BatchSource for MockarooClient {
    fn fetch_batch<'a>(
        &'a self,
        schema: &'a [FieldSpec],
        batch: &'a GenerationBatch,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>> {
        Box::pin(self.generate_to_file(schema, batch.count, batch.include_header, &batch.fragment))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchedFetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Runs a [`BatchPlan`] against a [`BatchSource`] and merges the result.
pub struct BatchedFetcher<S> {
    source: Arc<S>,
    scheduler: WorkScheduler,
    batch_size: usize,
}

impl<S: BatchSource + 'static> BatchedFetcher<S> {
    /// `max_in_flight` bounds concurrent batches; `batch_size` is the per-call ceiling.
    pub fn new(source: S, max_in_flight: usize, batch_size: usize) -> Self {
        Self {
            source: Arc::new(source),
            scheduler: WorkScheduler::new(max_in_flight),
            batch_size,
        }
    }

    /// Generates `count` records of `object` and returns the merged file path.
    ///
    /// # Errors
    ///
    /// Returns the first batch failure. No merged file is produced and all
    /// fragments are removed in that case.
    pub async fn fetch(
        &self,
        object: &str,
        count: usize,
        schema: Vec<FieldSpec>,
        data_dir: &Path,
    ) -> Result<PathBuf, AppError> {
        let plan = BatchPlan::new(object, count, self.batch_size, data_dir)?;
        tokio::fs::create_dir_all(data_dir).await?;

        info!(
            "[GEN] Generating {} {} records in {} batches",
            count,
            object,
            plan.batches().len()
        );

        let schema = Arc::new(schema);
        let tasks = plan.batches().iter().cloned().map(|batch| {
            let source = self.source.clone();
            let schema = schema.clone();
            async move {
                info!(
                    "[GEN] Batch {}: {} records (header: {})",
                    batch.index, batch.count, batch.include_header
                );
                source.fetch_batch(&schema, &batch).await
            }
        });

        let results = run_all(&self.scheduler, FailurePolicy::CancelSiblings, tasks).await;

        let fragments = plan.fragments();
        if let Err(e) = collect_results(results) {
            remove_files(&fragments).await;
            return Err(e);
        }

        let output = data_dir.join(format!("{}.csv", object));
        merge_fragments(&fragments, &output).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
