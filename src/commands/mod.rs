//! The three run modes exposed by the binary.
//!
//! - `update` re-queries existing records, rewrites their values and upserts them back
//! - `create` generates new records through Mockaroo and upserts them
//! - `upload` upserts an existing CSV file

pub mod create;
pub mod update;
pub mod upload;

pub use create::{run_create, CreateOptions, CreateOutcome};
pub use update::{run_update, QueryOutcome, UpdateOptions};
pub use upload::run_upload;
