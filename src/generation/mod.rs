//! Synthetic record generation through Mockaroo.
//!
//! - [`schema`] maps describe metadata to Mockaroo field specifications
//! - [`client`] calls the generate API
//! - [`fetcher`] splits large requests into batches and merges the fragments

pub mod client;
pub mod fetcher;
pub mod schema;

pub use client::MockarooClient;
pub use fetcher::{BatchPlan, BatchSource, BatchedFetcher, GenerationBatch};
pub use schema::{should_generate, FieldKind, FieldSpec, SchemaBuilder};
