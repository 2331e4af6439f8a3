// 特定の警告を無効化
#![allow(clippy::needless_return)]
#![allow(clippy::redundant_closure)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::len_without_is_empty)]

pub mod config;
pub mod error;
pub mod metrics;

#[cfg(feature = "parquet")]
pub mod dataset;

// Re-export commonly used types
pub use config::{ParquetCompression, ReadConfig, WriteMode, WriteOptions};
pub use error::{Error, Result};
pub use metrics::{Evaluator, MetricMode, MetricOutput, MultiOutput};

#[cfg(feature = "parquet")]
pub use dataset::{
    read_parquet, write_parquet, DataLoader, ParquetDataset, ParquetIterableDataset, Record,
    RecordStream, Schema, SchemaField, Shards, Value,
};

// Export version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
