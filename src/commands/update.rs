//! `update` mode: query, rewrite, upsert.
//!
//! Every configured query runs as its own unit of work. Unit `n` downloads
//! the query result with describe metadata, writes `{Object}-{n}-query.csv`,
//! rewrites the updateable columns, writes `{Object}-{n}-query-modified.csv`
//! and, unless `query_only` is set, upserts the modified file.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::AppError;
use crate::modify::{modify_table, ModifySummary};
use crate::salesforce::{IngestReport, QueryJob, QueryTable};
use crate::scheduler::{collect_results, run_all, WorkScheduler};
use crate::state::RunContext;

/// Flags for `update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Stop after writing the modified file.
    pub query_only: bool,
}

/// What one query produced.
#[derive(Debug)]
pub struct QueryOutcome {
    pub object: String,
    pub rows: usize,
    pub query_file: PathBuf,
    pub modified_file: PathBuf,
    pub modify: ModifySummary,
    /// `None` when the run was query-only.
    pub ingest: Option<IngestReport>,
}

/// Runs every configured query concurrently.
///
/// Sibling queries keep running or are cancelled on the first failure
/// depending on `Config::query_failure_policy`. Outcomes come back in
/// query order.
///
/// # Errors
///
/// - `AppError::Config` - no queries are configured
/// - the first query failure otherwise (every failure is logged)
pub async fn run_update(
    ctx: Arc<RunContext>,
    options: UpdateOptions,
) -> Result<Vec<QueryOutcome>, AppError> {
    let queries = ctx.config.salesforce.queries.clone();
    if queries.is_empty() {
        return Err(AppError::Config("QUERIES is not set".to_string()));
    }

    tokio::fs::create_dir_all(&ctx.config.data_dir).await?;
    info!("[UPDATE] Running {} queries", queries.len());

    let scheduler = WorkScheduler::new(queries.len());
    let tasks = queries.into_iter().enumerate().map(|(index, soql)| {
        let ctx = ctx.clone();
        async move { process_query(&ctx, index + 1, &soql, options).await }
    });

    let results = run_all(&scheduler, ctx.config.query_failure_policy, tasks).await;

    for (index, result) in results.iter().enumerate() {
        match result {
            Ok(outcome) => info!(
                "[UPDATE] Query {} ({}) finished with {} rows",
                index + 1,
                outcome.object,
                outcome.rows
            ),
            Err(AppError::Cancelled) => info!("[UPDATE] Query {} was cancelled", index + 1),
            Err(e) => error!("[UPDATE] Query {} failed: {}", index + 1, e),
        }
    }

    collect_results(results)
}

async fn process_query(
    ctx: &RunContext,
    ordinal: usize,
    soql: &str,
    options: UpdateOptions,
) -> Result<QueryOutcome, AppError> {
    info!("[UPDATE] Query {} started", ordinal);

    let job = ctx
        .query_client()
        .run_query(soql, &ctx.config.query_poll, true)
        .await?;
    let data_dir = &ctx.config.data_dir;
    let query_path = data_dir.join(job.file_name(ordinal));
    let modified_path = data_dir.join(job.modified_file_name(ordinal));
    let QueryJob {
        object,
        table,
        metadata,
        ..
    } = job;

    let (mut table, query_file) = write_table(table, query_path).await?;

    let meta = metadata
        .ok_or_else(|| AppError::Internal(format!("No describe metadata for {}", object)))?;
    let modify = modify_table(&mut table, &meta, &ctx.ids, ctx.config.modify_with_null).await?;

    let (table, modified_file) = write_table(table, modified_path).await?;

    let ingest = if options.query_only {
        info!("[UPDATE] Query only, not upserting {}", object);
        None
    } else {
        Some(ctx.upsert(&object, &modified_file).await?)
    };

    Ok(QueryOutcome {
        rows: table.len(),
        object,
        query_file,
        modified_file,
        modify,
        ingest,
    })
}

/// Writes `table` on the blocking pool and hands it back with the written path.
async fn write_table(table: QueryTable, path: PathBuf) -> Result<(QueryTable, PathBuf), AppError> {
    tokio::task::spawn_blocking(move || {
        let written = table.write_csv(&path)?;
        Ok::<_, AppError>((table, written))
    })
    .await
    .map_err(|e| AppError::Internal(format!("CSV write task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{context, forbid_ingest, mount_describe, mount_ingest, mount_query, API};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT_QUERY: &str = "SELECT Id, Name FROM Account";

    fn account_fields() -> serde_json::Value {
        serde_json::json!([
            { "name": "Id", "type": "id", "updateable": false },
            { "name": "Name", "type": "string", "updateable": true, "length": 40 }
        ])
    }

    fn read_rows(path: &std::path::Path) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[tokio::test]
    async fn missing_queries_is_config_error() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context(&server, dir.path(), &[]));

        let result = run_update(ctx, UpdateOptions::default()).await;

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn query_only_writes_both_files_without_upserting() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context(&server, dir.path(), &[("QUERIES", ACCOUNT_QUERY)]));

        mount_query(&server, "750Q1", ACCOUNT_QUERY, "Account", "Id,Name\n001xx1,Acme\n001xx2,Globex\n").await;
        mount_describe(&server, "Account", account_fields()).await;
        forbid_ingest(&server).await;

        let outcomes = run_update(ctx, UpdateOptions { query_only: true }).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.rows, 2);
        assert!(outcome.ingest.is_none());
        assert_eq!(outcome.modify.modified, vec!["Name"]);
        assert_eq!(outcome.query_file, dir.path().join("Account-1-query.csv"));
        assert_eq!(outcome.modified_file, dir.path().join("Account-1-query-modified.csv"));

        assert_eq!(
            read_rows(&outcome.query_file),
            vec![vec!["001xx1", "Acme"], vec!["001xx2", "Globex"]]
        );
        let modified = read_rows(&outcome.modified_file);
        assert_eq!(modified.len(), 2);
        assert_eq!(modified[0][0], "001xx1");
        assert_eq!(modified[1][0], "001xx2");
        assert!(modified.iter().all(|row| row[1].len() <= 40 && !row[1].is_empty()));
    }

    #[tokio::test]
    async fn modified_file_is_upserted() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context(
            &server,
            dir.path(),
            &[("QUERIES", ACCOUNT_QUERY), ("MODIFY_WITH_NULL", "true")],
        ));

        mount_query(&server, "750Q1", ACCOUNT_QUERY, "Account", "Id,Name\n001xx1,Acme\n").await;
        mount_describe(&server, "Account", account_fields()).await;
        mount_ingest(&server, "750I1", "Account", 1).await;

        let outcomes = run_update(ctx, UpdateOptions::default()).await.unwrap();

        let report = outcomes[0].ingest.as_ref().unwrap();
        assert_eq!(report.job_id, "750I1");
        assert_eq!(report.records_processed, 1);
        assert_eq!(read_rows(&outcomes[0].modified_file), vec![vec!["001xx1", "null"]]);
    }

    #[tokio::test]
    async fn failing_query_does_not_stop_siblings_by_default() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let contact_query = "SELECT Id, LastName FROM Contact";
        let queries = format!("{};{}", ACCOUNT_QUERY, contact_query);
        let ctx = Arc::new(context(&server, dir.path(), &[("QUERIES", queries.as_str())]));

        mount_query(&server, "750Q1", ACCOUNT_QUERY, "Account", "Id,Name\n001xx1,Acme\n").await;
        mount_describe(&server, "Account", account_fields()).await;
        mount_query(&server, "750Q2", contact_query, "Contact", "Id,LastName\n003xx1,Smith\n").await;
        Mock::given(method("GET"))
            .and(path(format!("{}/sobjects/Contact/describe", API)))
            .respond_with(ResponseTemplate::new(403).set_body_string("INSUFFICIENT_ACCESS"))
            .mount(&server)
            .await;

        let result = run_update(ctx, UpdateOptions { query_only: true }).await;

        assert!(matches!(result, Err(AppError::RemoteApi { status: 403, .. })));
        assert!(dir.path().join("Account-1-query-modified.csv").exists());
        assert!(!dir.path().join("Contact-2-query.csv").exists());
    }

    #[tokio::test]
    async fn queries_on_the_same_object_keep_separate_files() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let first = "SELECT Id, Name FROM Account WHERE Name = 'A'";
        let second = "SELECT Id, Name FROM Account WHERE Name = 'B'";
        let queries = format!("{};{}", first, second);
        let ctx = Arc::new(context(&server, dir.path(), &[("QUERIES", queries.as_str())]));

        mount_query(&server, "750Q1", first, "Account", "Id,Name\n001xxA,Alpha\n").await;
        mount_query(&server, "750Q2", second, "Account", "Id,Name\n001xxB,Beta\n").await;
        mount_describe(&server, "Account", account_fields()).await;
        forbid_ingest(&server).await;

        let outcomes = run_update(ctx, UpdateOptions { query_only: true }).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_ne!(outcomes[0].query_file, outcomes[1].query_file);
        assert_ne!(outcomes[0].modified_file, outcomes[1].modified_file);

        assert_eq!(read_rows(&outcomes[0].query_file), vec![vec!["001xxA", "Alpha"]]);
        assert_eq!(read_rows(&outcomes[1].query_file), vec![vec!["001xxB", "Beta"]]);

        let first_ids: Vec<String> = read_rows(&outcomes[0].modified_file)
            .into_iter()
            .map(|row| row[0].clone())
            .collect();
        let second_ids: Vec<String> = read_rows(&outcomes[1].modified_file)
            .into_iter()
            .map(|row| row[0].clone())
            .collect();
        assert_eq!(first_ids, vec!["001xxA"]);
        assert_eq!(second_ids, vec!["001xxB"]);
    }
}
