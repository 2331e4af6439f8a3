//! Packaging of training datasets as chunked Parquet directories
//!
//! A dataset directory looks like:
//!
//! ```text
//! <path>/_orca_metadata          schema (JSON)
//! <path>/chunk=0/part-00000.parquet
//! <path>/chunk=0/_SUCCESS
//! <path>/chunk=1/...
//! ```
//!
//! Records are written with [`ParquetDataset::write`] or one of the format
//! converters, and read back as rows, in-memory [`Shards`], a lazy
//! [`RecordStream`] or batches from a [`DataLoader`].

pub mod codec;
pub mod formats;
pub mod reader;
pub mod schema;
pub mod shards;
pub mod value;
pub mod writer;

pub use formats::{
    read_parquet, write_from_directory, write_mnist, write_parquet, write_voc, FormatArgs,
    ParquetRead, ReadArgs, WriteFormat, VOC_CLASSES,
};
pub use reader::{
    chunk_dirs, load_schema, part_files, DataLoader, ParquetIterableDataset, RecordStream,
    Transform,
};
pub use schema::{decode_schema, encode_schema, DType, FeatureType, Schema, SchemaField, METADATA_FILE};
pub use shards::{Batch, BatchColumn, Shards};
pub use value::{Record, Tensor, Value};
pub use writer::{ParquetDataset, WriteSummary};
