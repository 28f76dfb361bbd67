//! Bulk record generation and modification for Salesforce.
//!
//! Records are read through Bulk API 2.0 query jobs, generated through
//! Mockaroo, and written back through Bulk API 2.0 upsert jobs.

pub mod commands;
pub mod config;
pub mod error;
pub mod generation;
pub mod http;
pub mod id_cache;
pub mod modify;
pub mod salesforce;
pub mod scheduler;
pub mod state;
pub mod streaming;

pub use config::Config;
pub use error::AppError;
pub use state::RunContext;
