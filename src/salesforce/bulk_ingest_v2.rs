//! Salesforce Bulk API v2 ingest (upsert) jobs.
//!
//! An upsert goes through create -> upload -> close -> poll, and the
//! [`IngestJob`] typestate only exposes each step once the previous one has
//! succeeded. Failed rows are downloaded next to the other run artifacts.
//!
//! # Security
//!
//! - CSV contents are never logged
//! - Auth headers and tokens are never logged

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::error::AppError;
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::poll::{poll_until_complete, JobStatus, PollPolicy};
use crate::salesforce::{redact_id, BulkJobState};

/// Upserts always match on the record id.
const EXTERNAL_ID_FIELD: &str = "Id";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Information about a Bulk API v2 ingest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkIngestJobInfo {
    /// Unique identifier for the job.
    pub id: String,
    /// Current state of the job.
    pub state: BulkJobState,
    #[serde(default)]
    pub object: Option<String>,
    /// Relative upload URL, present on the creation response.
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default, rename = "numberRecordsProcessed")]
    pub processed_records: Option<i64>,
    #[serde(default, rename = "numberRecordsFailed")]
    pub failed_records: Option<i64>,
    /// Error message if job failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobStatus for BulkIngestJobInfo {
    fn state(&self) -> BulkJobState {
        self.state
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn records_processed(&self) -> Option<i64> {
        self.processed_records
    }
}

/// Outcome of a completed ingest job.
///
/// A job with failed rows still counts as complete; the rows are saved to
/// `failed_results_path` for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub job_id: String,
    pub object: String,
    pub records_processed: i64,
    pub records_failed: i64,
    pub failed_results_path: Option<PathBuf>,
}

impl IngestReport {
    pub fn has_failures(&self) -> bool {
        self.records_failed > 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for creating an upsert job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIngestJobRequest<'a> {
    object: &'a str,
    external_id_field_name: &'static str,
    content_type: &'static str,
    operation: &'static str,
}

/// Request body for changing job state (close or abort).
#[derive(Debug, Serialize)]
struct UpdateJobStateRequest {
    state: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkIngestV2Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for Salesforce Bulk API v2 ingest operations.
#[derive(Clone)]
pub struct BulkIngestV2Client {
    client: SalesforceClient,
}

impl BulkIngestV2Client {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    /// Creates an upsert job matching on `Id`.
    ///
    /// `PersonAccount` is loaded through the `Account` object.
    pub async fn create_ingest_job(&self, object: &str) -> Result<BulkIngestJobInfo, AppError> {
        let object = ingest_object_name(object);
        let url = self.client.data_url("jobs/ingest/")?;

        let request_body = CreateIngestJobRequest {
            object,
            external_id_field_name: EXTERNAL_ID_FIELD,
            content_type: "CSV",
            operation: "upsert",
        };

        let response = self
            .client
            .send_json(Method::POST, url, &request_body)
            .await?;
        let job_info: BulkIngestJobInfo = response.json()?;

        info!(
            "[BULK-INGEST] Created upsert job {} for {}",
            redact_id(&job_info.id),
            object
        );
        Ok(job_info)
    }

    /// Streams a CSV file to the job's upload URL.
    ///
    /// The file is never held in memory as a whole.
    pub async fn upload_job_data(
        &self,
        job_id: &str,
        content_url: &str,
        csv_path: &Path,
    ) -> Result<(), AppError> {
        let url = self.client.build_url(content_url)?;

        let file = File::open(csv_path).await.map_err(|e| {
            AppError::Io(format!("Failed to open {}: {}", csv_path.display(), e))
        })?;
        let file_size = file.metadata().await?.len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        info!(
            "[BULK-INGEST] Uploading {} bytes to job {}",
            file_size,
            redact_id(job_id)
        );

        let request = self
            .client
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, "text/csv")
            .body(body);
        self.client.send(request).await?;

        Ok(())
    }

    /// Marks the upload complete so Salesforce starts processing.
    pub async fn close_job(&self, job_id: &str) -> Result<(), AppError> {
        self.set_job_state(job_id, "UploadComplete").await
    }

    /// Aborts a job (best-effort).
    pub async fn abort_job(&self, job_id: &str) -> Result<(), AppError> {
        self.set_job_state(job_id, "Aborted").await
    }

    async fn set_job_state(&self, job_id: &str, state: &'static str) -> Result<(), AppError> {
        let url = self.client.data_url(&format!("jobs/ingest/{}/", job_id))?;

        info!("[BULK-INGEST] Job {} -> {}", redact_id(job_id), state);

        self.client
            .send_json(Method::PATCH, url, &UpdateJobStateRequest { state })
            .await?;
        Ok(())
    }

    /// Gets the current status of an ingest job.
    pub async fn get_job_status(&self, job_id: &str) -> Result<BulkIngestJobInfo, AppError> {
        let url = self.client.data_url(&format!("jobs/ingest/{}/", job_id))?;
        self.client.get(url).await?.json()
    }

    /// Downloads the failed-records CSV to `output_path` atomically.
    ///
    /// Returns the number of bytes written.
    pub async fn get_failure_results(
        &self,
        job_id: &str,
        output_path: &Path,
    ) -> Result<u64, AppError> {
        let url = self
            .client
            .data_url(&format!("jobs/ingest/{}/failedResults/", job_id))?;
        let response = self
            .client
            .send_streaming(self.client.request(Method::GET, url))
            .await?;

        let parent_dir = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent_dir).await?;

        // Temp file in the same directory so the final rename stays atomic.
        let temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| AppError::Io(format!("Failed to create temp file: {}", e)))?;
        let mut async_file = File::from_std(temp_file.reopen()?);

        let mut stream = response.bytes_stream();
        let mut total_bytes = 0u64;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                AppError::ConnectionFailed(format!("Error reading response stream: {}", e))
            })?;
            async_file.write_all(&chunk).await?;
            total_bytes += chunk.len() as u64;
        }

        async_file.flush().await?;
        async_file.sync_all().await?;
        drop(async_file);

        temp_file.persist(output_path).map_err(|e| {
            AppError::Io(format!("Failed to persist {}: {}", output_path.display(), e.error))
        })?;

        info!(
            "[BULK-INGEST] Failed results for job {} saved ({} bytes)",
            redact_id(job_id),
            total_bytes
        );
        Ok(total_bytes)
    }

    /// Runs a complete upsert of `csv_path` into `object`.
    ///
    /// Failed rows, if any, are written to `{failures_dir}/{Object}-{job id}-unsuccessful.csv`.
    pub async fn upsert_csv(
        &self,
        object: &str,
        csv_path: &Path,
        policy: &PollPolicy,
        failures_dir: &Path,
    ) -> Result<IngestReport, AppError> {
        IngestJob::create(self.clone(), object)
            .await?
            .upload(csv_path)
            .await?
            .close()
            .await?
            .wait(policy, failures_dir)
            .await
    }
}

/// Maps pseudo-objects onto the sObject the ingest API accepts.
pub fn ingest_object_name(object: &str) -> &str {
    if object.eq_ignore_ascii_case("personaccount") {
        "Account"
    } else {
        object
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IngestJob typestate
// ─────────────────────────────────────────────────────────────────────────────

/// Job created, waiting for data.
#[derive(Debug)]
pub struct Open;
/// Data uploaded, not yet closed.
#[derive(Debug)]
pub struct Uploaded;
/// Closed; the server is processing.
#[derive(Debug)]
pub struct Closed;

/// One upsert job, advanced strictly in order.
pub struct IngestJob<S> {
    client: BulkIngestV2Client,
    id: String,
    object: String,
    content_url: String,
    _state: PhantomData<S>,
}

impl<S> IngestJob<S> {
    fn advance<T>(self) -> IngestJob<T> {
        IngestJob {
            client: self.client,
            id: self.id,
            object: self.object,
            content_url: self.content_url,
            _state: PhantomData,
        }
    }
}

impl IngestJob<Open> {
    /// Creates the server-side job.
    pub async fn create(client: BulkIngestV2Client, object: &str) -> Result<Self, AppError> {
        let info = client.create_ingest_job(object).await?;
        let content_url = info.content_url.clone().ok_or_else(|| {
            AppError::DataFormat("Ingest job response has no contentUrl".to_string())
        })?;

        Ok(Self {
            client,
            object: info
                .object
                .clone()
                .unwrap_or_else(|| ingest_object_name(object).to_string()),
            id: info.id,
            content_url,
            _state: PhantomData,
        })
    }

    pub async fn upload(self, csv_path: &Path) -> Result<IngestJob<Uploaded>, AppError> {
        self.client
            .upload_job_data(&self.id, &self.content_url, csv_path)
            .await?;
        Ok(self.advance())
    }
}

impl IngestJob<Uploaded> {
    pub async fn close(self) -> Result<IngestJob<Closed>, AppError> {
        self.client.close_job(&self.id).await?;
        Ok(self.advance())
    }
}

impl IngestJob<Closed> {
    /// Polls until completion and collects failed rows.
    ///
    /// A timed out job is aborted before the timeout is returned.
    pub async fn wait(
        self,
        policy: &PollPolicy,
        failures_dir: &Path,
    ) -> Result<IngestReport, AppError> {
        let info = match poll_until_complete(&self.id, policy, || {
            self.client.get_job_status(&self.id)
        })
        .await
        {
            Ok(info) => info,
            Err(e @ AppError::Timeout { .. }) => {
                if let Err(abort_err) = self.client.abort_job(&self.id).await {
                    warn!(
                        "[BULK-INGEST] Failed to abort timed out job {}: {}",
                        redact_id(&self.id),
                        abort_err
                    );
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let records_processed = info.processed_records.unwrap_or(0);
        let records_failed = info.failed_records.unwrap_or(0);

        info!(
            "[BULK-INGEST] Job {} on {} complete: {} processed, {} failed",
            redact_id(&self.id),
            self.object,
            records_processed,
            records_failed
        );

        let failed_results_path = if records_failed > 0 {
            let path = failures_dir.join(format!("{}-{}-unsuccessful.csv", self.object, self.id));
            self.client.get_failure_results(&self.id, &path).await?;
            warn!(
                "[BULK-INGEST] {} records failed; see {}",
                records_failed,
                path.display()
            );
            Some(path)
        } else {
            None
        };

        Ok(IngestReport {
            job_id: self.id,
            object: self.object,
            records_processed,
            records_failed,
            failed_results_path,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
