//! `create` mode: describe, generate, link, upsert.

use std::path::PathBuf;

use futures_util::future::try_join_all;
use tracing::{debug, info};

use crate::error::AppError;
use crate::generation::{BatchedFetcher, FieldSpec, MockarooClient, SchemaBuilder};
use crate::modify::reference_target;
use crate::salesforce::bulk_ingest_v2::ingest_object_name;
use crate::salesforce::{IngestReport, ObjectMeta};
use crate::state::RunContext;
use crate::streaming::update_column;

/// Flags for `create`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub object: String,
    pub count: usize,
    /// Fill every relationship column instead of only `OwnerId`.
    pub references: bool,
    /// Stop after the generated file is complete.
    pub fetch_only: bool,
    /// Target of `WhoId` on tasks and events.
    pub who: Option<String>,
    /// Target of `WhatId` on tasks and events.
    pub what: Option<String>,
    pub person_accounts: bool,
}

/// A generated column that is filled with ids of another object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceColumn {
    pub column: String,
    pub target: String,
}

impl ReferenceColumn {
    fn new(column: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub object: String,
    pub data_file: PathBuf,
    pub records: usize,
    pub references: Vec<ReferenceColumn>,
    /// `None` when the run was fetch-only.
    pub ingest: Option<IngestReport>,
}

/// Generates `options.count` records and upserts them.
///
/// # Errors
///
/// - `AppError::Config` - zero count, missing Mockaroo key, or an object
///   without generatable fields
/// - any describe, generation, id lookup or ingest failure
pub async fn run_create(ctx: &RunContext, options: &CreateOptions) -> Result<CreateOutcome, AppError> {
    if options.count == 0 {
        return Err(AppError::Config("--count must be greater than zero".to_string()));
    }
    let mockaroo = MockarooClient::new(&ctx.config.mockaroo)?;

    let is_person_account = ingest_object_name(&options.object) != options.object;
    let meta = ctx
        .client
        .describe_object(ingest_object_name(&options.object))
        .await?;

    let schema = SchemaBuilder::for_today()
        .with_person_accounts(options.person_accounts || is_person_account)
        .build(&meta);
    if schema.is_empty() {
        return Err(AppError::Config(format!(
            "{} has no fields that can be generated",
            options.object
        )));
    }

    let references = if options.references {
        reference_columns(&meta, &schema, options)
    } else {
        vec![ReferenceColumn::new("OwnerId", "User")]
    };

    let fetcher = BatchedFetcher::new(
        mockaroo,
        ctx.config.generation_max_in_flight,
        ctx.config.generation_batch_size,
    );
    let data_file = fetcher
        .fetch(&options.object, options.count, schema, &ctx.config.data_dir)
        .await?;
    info!("[GEN] {} records written to {}", options.count, data_file.display());

    let id_lists = try_join_all(references.iter().map(|r| ctx.ids.resolve(&r.target))).await?;

    for (reference, ids) in references.iter().zip(id_lists) {
        let path = data_file.clone();
        let column = reference.column.clone();
        tokio::task::spawn_blocking(move || update_column(&path, &column, &ids))
            .await
            .map_err(|e| AppError::Internal(format!("Column rewrite task failed: {}", e)))??;
    }

    let ingest = if options.fetch_only {
        info!("[GEN] Fetch only, not upserting {}", options.object);
        None
    } else {
        Some(ctx.upsert(&options.object, &data_file).await?)
    };

    Ok(CreateOutcome {
        object: options.object.clone(),
        data_file,
        records: options.count,
        references,
        ingest,
    })
}

/// Relationship columns of `schema` and the object each draws ids from.
///
/// Task and event `WhoId`/`WhatId` are polymorphic; `--who` and `--what`
/// pick their target, otherwise the first referenced object is used.
pub fn reference_columns(
    meta: &ObjectMeta,
    schema: &[FieldSpec],
    options: &CreateOptions,
) -> Vec<ReferenceColumn> {
    let is_activity = ["Task", "Event"]
        .iter()
        .any(|o| meta.name.eq_ignore_ascii_case(o));

    schema
        .iter()
        .filter_map(|spec| meta.field(&spec.name))
        .filter(|field| field.relationship_name.is_some())
        .filter_map(|field| {
            let chosen = match field.name.as_str() {
                "WhoId" if is_activity => options.who.as_deref(),
                "WhatId" if is_activity => options.what.as_deref(),
                _ => None,
            };
            let target = chosen.or_else(|| reference_target(field))?;
            debug!("[GEN] {} takes ids from {}", field.name, target);
            Some(ReferenceColumn::new(&field.name, target))
        })
        .collect()
}
