//! File helpers for query output and generated data.
//!
//! Atomic CSV writing with automatic cleanup on failure, fragment merging
//! for batched generation, and column rewriting for reference fields.

mod atomic_writer;
mod columns;
mod fragment_merger;

pub use atomic_writer::{write_csv_file, AtomicCsvWriter};
pub use columns::update_column;
pub use fragment_merger::{merge_fragments, remove_files};
