//! Writing records as a directory of chunked Parquet files

use std::fs::{self, File};
use std::path::Path;

use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;

use super::codec::encode_batch;
use super::reader::part_files;
use super::schema::{encode_schema, Schema, METADATA_FILE};
use super::value::Record;
use crate::config::{ParquetCompression, WriteMode, WriteOptions};
use crate::error::{Error, Result};

/// Marker file written into a chunk directory once all parts are complete
pub const SUCCESS_FILE: &str = "_SUCCESS";

/// Entry point for writing and reading packaged datasets
pub struct ParquetDataset;

/// Outcome of [`ParquetDataset::write`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Number of chunks produced from the input
    pub chunks: usize,
    /// Number of records written to disk
    pub records: usize,
    /// Chunks left untouched because they already existed in `ignore` mode
    pub skipped_chunks: usize,
}

/// Name of the directory holding chunk `index`
pub fn chunk_dir_name(index: usize) -> String {
    format!("chunk={}", index)
}

fn part_file_name(index: usize) -> String {
    format!("part-{:05}.parquet", index)
}

fn write_part(
    path: &Path,
    records: &[Record],
    schema: &Schema,
    compression: ParquetCompression,
) -> Result<()> {
    let batch = encode_batch(schema, records)?;
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(compression.into())
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    log::debug!("wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Writes one chunk, returning `false` if it was skipped
fn write_chunk(
    dir: &Path,
    records: &[Record],
    schema: &Schema,
    options: &WriteOptions,
) -> Result<bool> {
    let first_part = if dir.exists() {
        match options.write_mode {
            WriteMode::Overwrite => {
                fs::remove_dir_all(dir)?;
                0
            }
            WriteMode::Append => part_files(dir)?.len(),
            WriteMode::ErrorIfExists => {
                return Err(Error::InvalidOperation(format!(
                    "path {} already exists.",
                    dir.display()
                )))
            }
            WriteMode::Ignore => {
                log::info!("{} already exists, skipping chunk", dir.display());
                return Ok(false);
            }
        }
    } else {
        0
    };
    fs::create_dir_all(dir)?;

    let partitions = options.partitions();
    let per_part = (records.len() + partitions - 1) / partitions;

    records
        .par_chunks(per_part.max(1))
        .enumerate()
        .map(|(i, part)| {
            write_part(
                &dir.join(part_file_name(first_part + i)),
                part,
                schema,
                options.compression,
            )
        })
        .collect::<Result<Vec<()>>>()?;

    fs::write(dir.join(SUCCESS_FILE), b"")?;
    Ok(true)
}

impl ParquetDataset {
    /// Writes every record to `path` as chunked Parquet files
    ///
    /// Records are grouped into chunks of `options.block_size`; chunk `i` is
    /// stored under `<path>/chunk=<i>/` as up to `options.partitions()` part
    /// files encoded in parallel. The schema is stored in
    /// `<path>/_orca_metadata` once all chunks are written.
    ///
    /// # Arguments
    /// * `path` - Output directory
    /// * `records` - Records keyed by field name; keys outside `schema` are ignored
    /// * `schema` - Encoding of each field
    /// * `options` - Chunk size, write mode, partitioning and compression
    pub fn write<I>(
        path: impl AsRef<Path>,
        records: I,
        schema: &Schema,
        options: &WriteOptions,
    ) -> Result<WriteSummary>
    where
        I: IntoIterator<Item = Record>,
    {
        options.validate()?;
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let mut summary = WriteSummary::default();
        let mut records = records.into_iter();

        loop {
            let chunk: Vec<Record> = records.by_ref().take(options.block_size).collect();
            if chunk.is_empty() {
                break;
            }

            let chunk_path = path.join(chunk_dir_name(summary.chunks));
            if write_chunk(&chunk_path, &chunk, schema, options)? {
                summary.records += chunk.len();
            } else {
                summary.skipped_chunks += 1;
            }
            summary.chunks += 1;
        }

        fs::write(path.join(METADATA_FILE), encode_schema(schema)?)?;

        log::info!(
            "wrote {} records in {} chunks to {}",
            summary.records,
            summary.chunks,
            path.display()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::schema::{DType, SchemaField};
    use crate::dataset::value::Value;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert("id".to_string(), SchemaField::scalar(DType::Int64));
        schema
    }

    fn records(n: i64) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut record = Record::new();
                record.insert("id".to_string(), Value::Int64(i));
                record
            })
            .collect()
    }

    #[test]
    fn test_chunk_layout() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteOptions::new()
            .with_block_size(4)
            .with_num_partitions(2);

        let summary = ParquetDataset::write(dir.path(), records(10), &schema(), &options).unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                chunks: 3,
                records: 10,
                skipped_chunks: 0
            }
        );

        for i in 0..3 {
            let chunk = dir.path().join(chunk_dir_name(i));
            assert!(chunk.join(SUCCESS_FILE).exists());
            assert!(!part_files(&chunk).unwrap().is_empty());
        }
        // 4 records over 2 partitions, the last chunk holds 2 records
        assert_eq!(part_files(&dir.path().join("chunk=0")).unwrap().len(), 2);
        assert!(dir.path().join(METADATA_FILE).exists());
    }

    #[test]
    fn test_empty_input_writes_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let summary =
            ParquetDataset::write(dir.path(), Vec::new(), &schema(), &WriteOptions::new())
                .unwrap();
        assert_eq!(summary.chunks, 0);
        assert!(dir.path().join(METADATA_FILE).exists());
        assert!(!dir.path().join("chunk=0").exists());
    }

    #[test]
    fn test_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriteOptions::new().with_block_size(0);
        assert!(ParquetDataset::write(dir.path(), records(1), &schema(), &options).is_err());
    }
}
