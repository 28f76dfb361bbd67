//! Memoized record ids per object.
//!
//! `update` and `create` both need "every existing id of object X" to fill
//! reference fields. The first caller for an object runs a bulk query; every
//! other caller, concurrent or later, gets the same `Arc` without touching the
//! network. Lookups for different objects proceed in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::error::AppError;
use crate::salesforce::bulk_query_v2::{BulkQueryV2Client, QueryTable};
use crate::salesforce::poll::PollPolicy;

/// Shared list of ids for one object.
pub type IdList = Arc<Vec<String>>;

// ─────────────────────────────────────────────────────────────────────────────
// IdSource Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches every id of an object.
///
/// Implemented by [`BulkIdSource`] for real runs; tests provide a counting fake.
pub trait IdSource: Send + Sync {
    fn fetch_ids<'a>(
        &'a self,
        object: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, AppError>> + Send + 'a>>;
}

/// [`IdSource`] backed by a Bulk API 2.0 query job.
#[derive(Clone)]
pub struct BulkIdSource {
    client: BulkQueryV2Client,
    policy: PollPolicy,
}

impl BulkIdSource {
    pub fn new(client: BulkQueryV2Client, policy: PollPolicy) -> Self {
        Self { client, policy }
    }
}

impl IdSource for BulkIdSource {
    fn fetch_ids<'a>(
        &'a self,
        object: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let soql = id_query(object);
            let job = self.client.run_query(&soql, &self.policy, false).await?;
            single_column(&job.table)
        })
    }
}

/// Builds the id query for an object. Users are limited to active standard users.
pub fn id_query(object: &str) -> String {
    let mut soql = format!("select id from {}", object);
    if object.eq_ignore_ascii_case("user") {
        soql.push_str(" where isActive = true and userType = 'Standard'");
    }
    soql
}

/// Extracts the only column of a query table.
fn single_column(table: &QueryTable) -> Result<Vec<String>, AppError> {
    if table.header().len() > 1 {
        return Err(AppError::DataFormat(format!(
            "Expected a single id column, got {}",
            table.header().len()
        )));
    }

    table
        .rows()
        .iter()
        .map(|row| match row.as_slice() {
            [id] => Ok(id.clone()),
            _ => Err(AppError::DataFormat(format!(
                "Expected a single id column, got {}",
                row.len()
            ))),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// IdCache
// ─────────────────────────────────────────────────────────────────────────────

/// Concurrency-safe, lazily filled map of object name to ids.
///
/// Keys are case-insensitive. A failed fetch is not cached: the next caller
/// for that object tries again.
pub struct IdCache<S> {
    source: S,
    entries: Mutex<HashMap<String, Arc<OnceCell<IdList>>>>,
}

impl<S: IdSource> IdCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns every id of `object`, fetching them on first use.
    pub async fn resolve(&self, object: &str) -> Result<IdList, AppError> {
        let key = object.to_ascii_lowercase();

        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.clone()).or_default().clone()
        };

        if let Some(ids) = cell.get() {
            debug!("[IDCACHE] Hit for {}", key);
            return Ok(ids.clone());
        }

        let ids = cell
            .get_or_try_init(|| async {
                info!("[IDCACHE] Fetching ids for {}", object);
                let ids = self.source.fetch_ids(object).await?;
                info!("[IDCACHE] Cached {} ids for {}", ids.len(), object);
                Ok::<_, AppError>(Arc::new(ids))
            })
            .await?;

        Ok(ids.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
