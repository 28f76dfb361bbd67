//! Services shared by every command of one run.

use std::path::Path;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::http::build_http_client;
use crate::id_cache::{BulkIdSource, IdCache};
use crate::salesforce::{login, BulkIngestV2Client, BulkQueryV2Client, IngestReport, SalesforceClient};

// ─────────────────────────────────────────────────────────────────────────────
// Run Context
// ─────────────────────────────────────────────────────────────────────────────

/// One authenticated session plus the id cache every worker shares.
pub struct RunContext {
    pub config: Config,
    pub client: SalesforceClient,
    /// Filled lazily through Bulk Query jobs on this session.
    pub ids: IdCache<BulkIdSource>,
}

impl RunContext {
    /// Logs in with the configured credentials.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` - credentials are missing
    /// - `AppError::LoginFailed` - the token endpoint rejected them
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        let http = build_http_client()?;
        let session = login(&http, &config.salesforce).await?;
        Ok(Self::with_client(config, SalesforceClient::with_http(http, session)))
    }

    /// Builds a context around an existing session.
    pub fn with_client(config: Config, client: SalesforceClient) -> Self {
        let ids = IdCache::new(BulkIdSource::new(
            BulkQueryV2Client::new(client.clone()),
            config.query_poll,
        ));
        Self {
            config,
            client,
            ids,
        }
    }

    pub fn query_client(&self) -> BulkQueryV2Client {
        BulkQueryV2Client::new(self.client.clone())
    }

    pub fn ingest_client(&self) -> BulkIngestV2Client {
        BulkIngestV2Client::new(self.client.clone())
    }

    /// Upserts `csv_path` into `object`, writing failed rows under the data directory.
    ///
    /// Rejected rows are reported, not raised.
    pub async fn upsert(&self, object: &str, csv_path: &Path) -> Result<IngestReport, AppError> {
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let report = self
            .ingest_client()
            .upsert_csv(object, csv_path, &self.config.ingest_poll, &self.config.data_dir)
            .await?;

        match &report.failed_results_path {
            Some(path) if report.has_failures() => warn!(
                "[BULK-INGEST] {}: {} of {} records failed, see {}",
                report.object,
                report.records_failed,
                report.records_processed,
                path.display()
            ),
            _ => info!(
                "[BULK-INGEST] {}: {} records processed",
                report.object, report.records_processed
            ),
        }
        Ok(report)
    }
}
