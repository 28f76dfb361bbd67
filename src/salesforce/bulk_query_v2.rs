//! Salesforce Bulk API v2 query jobs.
//!
//! A query job is created from SOQL, polled until `JobComplete`, and its CSV
//! result pages are pulled into an in-memory [`QueryTable`] following the
//! `Sforce-Locator` cursor.
//!
//! # Security
//!
//! - Raw SOQL queries are never logged
//! - Auth headers and tokens are never logged
//! - Only HTTP method, path, and status codes are logged

use std::path::{Path, PathBuf};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::salesforce::client::SalesforceClient;
use crate::salesforce::describe::ObjectMeta;
use crate::salesforce::poll::{poll_until_complete, JobStatus, PollPolicy};
use crate::salesforce::{redact_id, BulkJobState};
use crate::streaming::write_csv_file;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Header name for the locator used in result pagination.
const SFORCE_LOCATOR_HEADER: &str = "Sforce-Locator";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Information about a Bulk API v2 query job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkQueryJobInfo {
    /// Unique identifier for the job.
    pub id: String,
    /// Current state of the job.
    pub state: BulkJobState,
    /// sObject the query targets.
    #[serde(default)]
    pub object: Option<String>,
    /// Number of records processed so far.
    #[serde(default, alias = "numberOfRecordsProcessed")]
    pub number_records_processed: Option<i64>,
    /// Error message if job failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobStatus for BulkQueryJobInfo {
    fn state(&self) -> BulkJobState {
        self.state
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn records_processed(&self) -> Option<i64> {
        self.number_records_processed
    }
}

/// Query results held in memory.
///
/// The header comes from the first page only; data rows keep page-arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl QueryTable {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Vec<String>] {
        &mut self.rows
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    /// Parses one CSV results page and appends its data rows.
    ///
    /// Every page starts with a header line; only the first one is kept.
    /// Returns the number of data rows appended.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DataFormat` for malformed CSV.
    pub fn push_page(&mut self, page: &[u8]) -> Result<usize, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(page);

        let page_header = reader.headers()?.clone();
        if self.header.is_empty() {
            self.header = page_header.iter().map(String::from).collect();
        }

        let mut appended = 0usize;
        for record in reader.records() {
            let record = record?;
            self.rows.push(record.iter().map(String::from).collect());
            appended += 1;
        }

        Ok(appended)
    }

    /// Writes header and rows to `path` atomically.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<PathBuf, AppError> {
        write_csv_file(path, &self.header, &self.rows)
    }
}

/// A completed query job with its materialized results.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub info: BulkQueryJobInfo,
    /// sObject name, from the job descriptor or the query text.
    pub object: String,
    pub table: QueryTable,
    /// Describe metadata for `object`, when requested.
    pub metadata: Option<ObjectMeta>,
}

impl QueryJob {
    /// File the raw results of query number `ordinal` are written to.
    ///
    /// The ordinal keeps two queries on the same object apart.
    pub fn file_name(&self, ordinal: usize) -> String {
        format!("{}-{}-query.csv", self.object, ordinal)
    }

    /// File the rewritten results of query number `ordinal` are written to.
    pub fn modified_file_name(&self, ordinal: usize) -> String {
        format!("{}-{}-query-modified.csv", self.object, ordinal)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for creating a bulk query job.
#[derive(Debug, Serialize)]
struct CreateQueryJobRequest<'a> {
    operation: &'static str,
    query: &'a str,
}

/// Request body for aborting a bulk query job.
#[derive(Debug, Serialize)]
struct AbortJobRequest {
    state: &'static str,
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkQueryV2Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for Salesforce Bulk API v2 query operations.
#[derive(Clone)]
pub struct BulkQueryV2Client {
    client: SalesforceClient,
}

impl BulkQueryV2Client {
    pub fn new(client: SalesforceClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SalesforceClient {
        &self.client
    }

    /// Creates a new bulk query job.
    ///
    /// # Errors
    ///
    /// - `AppError::RemoteApi` - API error (e.g. malformed query)
    /// - `AppError::RateLimited` - Rate limit exceeded
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn create_query_job(&self, soql: &str) -> Result<BulkQueryJobInfo, AppError> {
        let url = self.client.data_url("jobs/query")?;

        let request_body = CreateQueryJobRequest {
            operation: "query",
            query: soql,
        };

        let response = self
            .client
            .send_json(Method::POST, url, &request_body)
            .await?;
        let job_info: BulkQueryJobInfo = response.json()?;

        info!("[BULK] Created query job {}", redact_id(&job_info.id));
        Ok(job_info)
    }

    /// Gets the current status of a bulk query job.
    pub async fn get_query_job_status(&self, job_id: &str) -> Result<BulkQueryJobInfo, AppError> {
        let url = self.client.data_url(&format!("jobs/query/{}/", job_id))?;
        self.client.get(url).await?.json()
    }

    /// Downloads every results page of a completed job.
    ///
    /// Pagination continues while the `Sforce-Locator` header carries a value
    /// other than the literal `null`. A missing or empty header also ends it.
    pub async fn fetch_results(&self, job_id: &str) -> Result<QueryTable, AppError> {
        let mut table = QueryTable::default();
        let mut locator: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let (page, next_locator) = self.fetch_result_page(job_id, locator.as_deref()).await?;
            let appended = table.push_page(&page)?;
            pages += 1;

            info!(
                "[BULK] Results page {} for job {} ({} rows)",
                pages,
                redact_id(job_id),
                appended
            );

            match next_locator {
                Some(loc) if loc != "null" && !loc.is_empty() => locator = Some(loc),
                _ => break,
            }
        }

        info!(
            "[BULK] Download complete for job {}: {} rows in {} pages",
            redact_id(job_id),
            table.len(),
            pages
        );
        Ok(table)
    }

    /// Downloads a single page. Returns the body and the next locator, if any.
    async fn fetch_result_page(
        &self,
        job_id: &str,
        locator: Option<&str>,
    ) -> Result<(Vec<u8>, Option<String>), AppError> {
        let mut url = self
            .client
            .data_url(&format!("jobs/query/{}/results", job_id))?;
        if let Some(loc) = locator {
            url.query_pairs_mut().append_pair("locator", loc);
        }

        let response = self.client.get(url).await?;
        let next_locator = response.header(SFORCE_LOCATOR_HEADER).map(String::from);

        Ok((response.body, next_locator))
    }

    /// Aborts a bulk query job (best-effort).
    pub async fn abort_query_job(&self, job_id: &str) -> Result<(), AppError> {
        let url = self.client.data_url(&format!("jobs/query/{}", job_id))?;

        info!("[BULK] Aborting query job {}", redact_id(job_id));

        self.client
            .send_json(Method::PATCH, url, &AbortJobRequest { state: "Aborted" })
            .await?;
        Ok(())
    }

    /// Runs a query end to end: create, poll, download, optionally describe.
    ///
    /// A job whose poll times out is aborted before the timeout is returned.
    pub async fn run_query(
        &self,
        soql: &str,
        policy: &PollPolicy,
        describe: bool,
    ) -> Result<QueryJob, AppError> {
        let created = self.create_query_job(soql).await?;
        let job_id = created.id.clone();

        let object = created
            .object
            .clone()
            .filter(|o| !o.is_empty())
            .or_else(|| object_from_query(soql))
            .ok_or_else(|| {
                AppError::DataFormat("Cannot determine the queried object".to_string())
            })?;

        let metadata = if describe {
            Some(self.client.describe_object(&object).await?)
        } else {
            None
        };

        let info = match poll_until_complete(&job_id, policy, || self.get_query_job_status(&job_id))
            .await
        {
            Ok(info) => info,
            Err(e @ AppError::Timeout { .. }) => {
                if let Err(abort_err) = self.abort_query_job(&job_id).await {
                    warn!(
                        "[BULK] Failed to abort timed out job {}: {}",
                        redact_id(&job_id),
                        abort_err
                    );
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let table = self.fetch_results(&job_id).await?;

        Ok(QueryJob {
            info,
            object,
            table,
            metadata,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the token following `FROM` in a SOQL statement.
pub fn object_from_query(soql: &str) -> Option<String> {
    let mut tokens = soql.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("from") {
            return tokens
                .next()
                .map(|t| t.trim_end_matches([';', ')']).to_string())
                .filter(|t| !t.is_empty());
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salesforce::client::RemoteSession;
    use secrecy::SecretString;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JOB: &str = "750xx000000001ABC";

    fn create_test_client(mock_url: &str) -> BulkQueryV2Client {
        let session =
            RemoteSession::new(mock_url, SecretString::from("test_token".to_string()), "52.0")
                .unwrap();
        BulkQueryV2Client::new(SalesforceClient::new(session).unwrap())
    }

    fn results_path() -> String {
        format!("/services/data/v52.0/jobs/query/{}/results", JOB)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job Creation Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_query_job_sends_correct_body() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let expected_request = serde_json::json!({
            "operation": "query",
            "query": "SELECT Id, Name FROM Account"
        });

        Mock::given(method("POST"))
            .and(path("/services/data/v52.0/jobs/query"))
            .and(header("Authorization", "Bearer test_token"))
            .and(body_json(&expected_request))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": JOB,
                "state": "UploadComplete",
                "object": "Account"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let info = client
            .create_query_job("SELECT Id, Name FROM Account")
            .await
            .unwrap();

        assert_eq!(info.id, JOB);
        assert_eq!(info.object.as_deref(), Some("Account"));
    }

    #[tokio::test]
    async fn test_malformed_query_is_remote_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/services/data/v52.0/jobs/query"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!([{
                "errorCode": "MALFORMED_QUERY",
                "message": "unexpected token: SELECT"
            }])))
            .mount(&mock_server)
            .await;

        match client.create_query_job("SELECT").await.unwrap_err() {
            AppError::RemoteApi { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("MALFORMED_QUERY"));
            }
            e => panic!("Expected RemoteApi, got: {:?}", e),
        }
    }

    #[test]
    fn test_job_info_accepts_both_processed_spellings() {
        let info: BulkQueryJobInfo = serde_json::from_str(
            r#"{"id":"750","state":"InProgress","numberRecordsProcessed":1000}"#,
        )
        .unwrap();
        assert_eq!(info.number_records_processed, Some(1000));

        let info: BulkQueryJobInfo = serde_json::from_str(
            r#"{"id":"750","state":"InProgress","numberOfRecordsProcessed":42,"errorMessage":null}"#,
        )
        .unwrap();
        assert_eq!(info.number_records_processed, Some(42));
        assert!(info.error_message.is_none());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // QueryTable Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_push_page_keeps_first_header_only() {
        let mut table = QueryTable::default();

        assert_eq!(table.push_page(b"Id,Name\n001,A\n002,B\n").unwrap(), 2);
        assert_eq!(table.push_page(b"Id,Name\n003,C\n").unwrap(), 1);

        assert_eq!(table.header(), ["Id", "Name"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[2], vec!["003", "C"]);
    }

    #[test]
    fn test_push_page_header_only_page_adds_nothing() {
        let mut table = QueryTable::default();
        assert_eq!(table.push_page(b"Id\n").unwrap(), 0);
        assert_eq!(table.header(), ["Id"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_push_page_ragged_row_is_data_format() {
        let mut table = QueryTable::default();
        let result = table.push_page(b"Id,Name\n001\n");
        assert!(matches!(result, Err(AppError::DataFormat(_))));
    }

    #[test]
    fn test_column_index_is_case_insensitive() {
        let table = QueryTable::new(vec!["Id".into(), "OwnerId".into()], Vec::new());
        assert_eq!(table.column_index("ownerid"), Some(1));
        assert_eq!(table.column_index("Name"), None);
    }

    #[test]
    fn test_write_csv_round_trips_quoted_values() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = QueryTable::default();
        table
            .push_page(b"Id,Description\n001,\"line one\nline two\"\n")
            .unwrap();

        let path = table.write_csv(temp_dir.path().join("Account-query.csv")).unwrap();

        let mut reread = QueryTable::default();
        reread.push_page(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(reread, table);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pagination Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_fetch_results_single_page() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path(results_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/csv")
                    .insert_header("Sforce-Locator", "null")
                    .set_body_string("Id,Name\n001xx1,Account1\n001xx2,Account2"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let table = client.fetch_results(JOB).await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1], vec!["001xx2", "Account2"]);
    }

    #[tokio::test]
    async fn test_fetch_results_with_pagination() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        // Page 2 only matches with a locator; page 1 answers once.
        Mock::given(method("GET"))
            .and(path(results_path()))
            .and(query_param("locator", "locator123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Sforce-Locator", "null")
                    .set_body_string("A,B\n3,4\n5,6\n"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(results_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Sforce-Locator", "locator123")
                    .set_body_string("A,B\n1,2\n"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        let table = client.fetch_results(JOB).await.unwrap();

        // Three page lines minus one header per page.
        assert_eq!(table.header(), ["A", "B"]);
        assert_eq!(
            table.rows(),
            [vec!["1", "2"], vec!["3", "4"], vec!["5", "6"]]
        );
    }

    #[tokio::test]
    async fn test_missing_locator_header_ends_pagination() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path(results_path()))
            .respond_with(ResponseTemplate::new(200).set_body_string("Id\n001\n"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let table = client.fetch_results(JOB).await.unwrap();
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_results_error_propagates() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path(results_path()))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let result = client.fetch_results(JOB).await;
        assert!(matches!(result, Err(AppError::RemoteApi { status: 500, .. })));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // End-to-end Tests
    // ─────────────────────────────────────────────────────────────────────────

    async fn mount_create(server: &MockServer, object: Option<&str>) {
        let mut body = serde_json::json!({ "id": JOB, "state": "UploadComplete" });
        if let Some(object) = object {
            body["object"] = serde_json::json!(object);
        }
        Mock::given(method("POST"))
            .and(path("/services/data/v52.0/jobs/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_run_query_polls_then_downloads() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        mount_create(&mock_server, Some("Contact")).await;

        // Mocks match in mount order: one InProgress, then JobComplete.
        Mock::given(method("GET"))
            .and(path(format!("/services/data/v52.0/jobs/query/{}/", JOB)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": JOB, "state": "InProgress"
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/services/data/v52.0/jobs/query/{}/", JOB)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": JOB, "state": "JobComplete", "numberRecordsProcessed": 2
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(results_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Sforce-Locator", "null")
                    .set_body_string("Id,LastName\n003xx1,Smith\n003xx2,Jones\n"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let policy = PollPolicy::every(Duration::from_millis(10)).with_max_attempts(5);
        let job = client
            .run_query("select Id, LastName from Contact", &policy, false)
            .await
            .unwrap();

        assert_eq!(job.object, "Contact");
        assert_eq!(job.file_name(3), "Contact-3-query.csv");
        assert_eq!(job.modified_file_name(3), "Contact-3-query-modified.csv");
        assert_eq!(job.info.state, BulkJobState::JobComplete);
        assert_eq!(job.table.len(), 2);
        assert!(job.metadata.is_none());
    }

    #[tokio::test]
    async fn test_run_query_describes_object_from_query_text() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        mount_create(&mock_server, None).await;

        Mock::given(method("GET"))
            .and(path("/services/data/v52.0/sobjects/Lead/describe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Lead",
                "fields": [{ "name": "Id", "type": "id" }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/services/data/v52.0/jobs/query/{}/", JOB)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": JOB, "state": "JobComplete"
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(results_path()))
            .respond_with(ResponseTemplate::new(200).set_body_string("Id\n00Qxx1\n"))
            .mount(&mock_server)
            .await;

        let policy = PollPolicy::every(Duration::from_millis(10));
        let job = client
            .run_query("SELECT Id FROM Lead", &policy, true)
            .await
            .unwrap();

        assert_eq!(job.object, "Lead");
        assert_eq!(job.metadata.map(|m| m.fields.len()), Some(1));
    }

    #[tokio::test]
    async fn test_run_query_timeout_aborts_job() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        mount_create(&mock_server, Some("Account")).await;

        Mock::given(method("GET"))
            .and(path(format!("/services/data/v52.0/jobs/query/{}/", JOB)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": JOB, "state": "InProgress"
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(format!("/services/data/v52.0/jobs/query/{}", JOB)))
            .and(body_json(serde_json::json!({ "state": "Aborted" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": JOB, "state": "Aborted"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let policy = PollPolicy::every(Duration::from_millis(10)).with_max_attempts(2);
        let result = client
            .run_query("select id from Account", &policy, false)
            .await;

        assert!(matches!(result, Err(AppError::Timeout { attempts: 2, .. })));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helper Function Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_object_from_query() {
        assert_eq!(
            object_from_query("select id, name from Account where name != null").as_deref(),
            Some("Account")
        );
        assert_eq!(object_from_query("SELECT Id FROM Lead;").as_deref(), Some("Lead"));
        assert_eq!(object_from_query("select id"), None);
    }
}
