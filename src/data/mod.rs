//! Result storage.
pub mod storage;

pub use storage::{unique_filename, CsvSink, DATA_COLUMNS};
