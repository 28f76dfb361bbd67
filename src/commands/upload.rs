//! `upload` mode: upsert a CSV file that already exists.

use std::path::Path;

use tracing::info;

use crate::error::AppError;
use crate::salesforce::IngestReport;
use crate::state::RunContext;

/// Upserts `file` into `object` unchanged.
///
/// # Errors
///
/// - `AppError::Io` - the file does not exist or cannot be read
/// - any ingest failure
pub async fn run_upload(ctx: &RunContext, object: &str, file: &Path) -> Result<IngestReport, AppError> {
    if !tokio::fs::try_exists(file).await.unwrap_or(false) {
        return Err(AppError::Io(format!("{} does not exist", file.display())));
    }

    info!("[UPLOAD] Upserting {} into {}", file.display(), object);
    ctx.upsert(object, file).await
}
