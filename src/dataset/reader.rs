//! Reading packaged datasets back as rows, shards, streams and batches

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;

use super::codec::decode_batch;
use super::schema::{decode_schema, DType, Schema, METADATA_FILE};
use super::shards::{Batch, Shards};
use super::value::{Record, Tensor, Value};
use super::writer::ParquetDataset;
use crate::config::ReadConfig;
use crate::error::{Error, Result};

/// Post-decode transform applied to every record
pub type Transform = Arc<dyn Fn(Record) -> Result<Record> + Send + Sync>;

/// Reads the schema stored next to the chunk directories
pub fn load_schema(path: impl AsRef<Path>) -> Result<Schema> {
    let text = fs::read_to_string(path.as_ref().join(METADATA_FILE))?;
    decode_schema(&text)
}

fn chunk_index(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix("chunk=")?
        .parse()
        .ok()
}

/// Lists the `chunk=<i>` directories of a dataset, ordered by `i`
pub fn chunk_dirs(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut chunks: Vec<(usize, PathBuf)> = Vec::new();
    for entry in fs::read_dir(path.as_ref())? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match chunk_index(&path) {
            Some(index) => chunks.push((index, path)),
            None => log::debug!("skipping {}", path.display()),
        }
    }
    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks.into_iter().map(|(_, path)| path).collect())
}

/// Lists the Parquet part files of a chunk directory, ordered by name
pub fn part_files(chunk_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in fs::read_dir(chunk_dir.as_ref())? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.') || n.starts_with('_'));
        if path.is_file() && !hidden && path.extension().map_or(false, |e| e == "parquet") {
            parts.push(path);
        }
    }
    parts.sort();
    Ok(parts)
}

fn read_part(path: &Path, schema: &Schema) -> Result<Vec<Record>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        records.extend(decode_batch(schema, &batch?)?);
    }
    Ok(records)
}

fn read_chunk(chunk_dir: &Path, schema: &Schema) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for part in part_files(chunk_dir)? {
        records.extend(read_part(&part, schema)?);
    }
    Ok(records)
}

impl ParquetDataset {
    /// Reads every part file as one partition of records
    ///
    /// Partitions follow chunk order, then part file order within a chunk.
    pub fn read_as_dict_rows(path: impl AsRef<Path>) -> Result<(Vec<Vec<Record>>, Schema)> {
        let path = path.as_ref();
        let schema = load_schema(path)?;

        let mut parts = Vec::new();
        for chunk in chunk_dirs(path)? {
            parts.extend(part_files(&chunk)?);
        }

        let partitions = parts
            .par_iter()
            .map(|part| read_part(part, &schema))
            .collect::<Result<Vec<Vec<Record>>>>()?;

        log::debug!(
            "read {} partitions from {}",
            partitions.len(),
            path.display()
        );
        Ok((partitions, schema))
    }

    /// Reads every partition and merges its records into a [`Batch`]
    pub fn read_as_shards(path: impl AsRef<Path>) -> Result<Shards> {
        let (partitions, _) = Self::read_as_dict_rows(path)?;
        let batches = partitions
            .par_iter()
            .filter(|records| !records.is_empty())
            .map(|records| Batch::collate(records))
            .collect::<Result<Vec<Batch>>>()?;
        Ok(Shards::new(batches))
    }

    /// Lazily reads records chunk by chunk, projected onto `output_types`
    ///
    /// # Arguments
    /// * `output_types` - Fields to keep and the dtype each is cast to
    /// * `output_shapes` - Optional expected shape per field; `None` entries
    ///   match any size
    pub fn read_as_stream(
        path: impl AsRef<Path>,
        output_types: BTreeMap<String, DType>,
        output_shapes: Option<BTreeMap<String, Vec<Option<usize>>>>,
    ) -> Result<RecordStream> {
        let path = path.as_ref();
        let schema = load_schema(path)?;

        for name in output_types.keys() {
            if !schema.contains_key(name) {
                return Err(Error::SchemaMismatch(format!(
                    "field '{}' is not part of the dataset at {}",
                    name,
                    path.display()
                )));
            }
        }

        Ok(RecordStream {
            schema,
            chunks: chunk_dirs(path)?.into_iter(),
            current: Vec::new().into_iter(),
            output_types,
            output_shapes,
            failed: false,
        })
    }
}

/// Iterator over the records of a dataset, decoding one chunk at a time
pub struct RecordStream {
    schema: Schema,
    chunks: std::vec::IntoIter<PathBuf>,
    current: std::vec::IntoIter<Record>,
    output_types: BTreeMap<String, DType>,
    output_shapes: Option<BTreeMap<String, Vec<Option<usize>>>>,
    failed: bool,
}

fn value_shape(value: &Value) -> Vec<usize> {
    match value {
        Value::Tensor(t) => t.shape().to_vec(),
        Value::Bytes(b) => vec![b.len()],
        _ => Vec::new(),
    }
}

impl RecordStream {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn project(&self, mut record: Record) -> Result<Record> {
        let mut projected = Record::new();

        for (name, &dtype) in &self.output_types {
            let value = record.remove(name).ok_or_else(|| {
                Error::SchemaMismatch(format!("record is missing field '{}'", name))
            })?;

            let value = match value {
                Value::Bytes(bytes) => match dtype {
                    DType::String => Value::Bytes(bytes),
                    DType::UInt8 => {
                        let len = bytes.len();
                        Value::Tensor(Tensor::UInt8(
                            ndarray::Array::from_shape_vec(ndarray::IxDyn(&[len]), bytes)?,
                        ))
                    }
                    other => {
                        return Err(Error::InvalidValue(format!(
                            "field '{}' holds bytes and cannot be read as {}",
                            name, other
                        )))
                    }
                },
                other => other.cast(dtype)?,
            };

            if let Some(expected) = self.output_shapes.as_ref().and_then(|s| s.get(name)) {
                let actual = value_shape(&value);
                let matches = actual.len() == expected.len()
                    && actual
                        .iter()
                        .zip(expected)
                        .all(|(a, e)| e.map_or(true, |e| e == *a));
                if !matches {
                    return Err(Error::DimensionMismatch(format!(
                        "field '{}' has shape {:?}, expected {:?}",
                        name, actual, expected
                    )));
                }
            }

            projected.insert(name.clone(), value);
        }

        Ok(projected)
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(record) = self.current.next() {
                let projected = self.project(record);
                self.failed = projected.is_err();
                return Some(projected);
            }

            let chunk = self.chunks.next()?;
            match read_chunk(&chunk, &self.schema) {
                Ok(records) => self.current = records.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Chunks kept by shard `rank` out of `num_shards`
fn select_shard(chunks: Vec<PathBuf>, config: &ReadConfig) -> Result<Vec<PathBuf>> {
    let (num_shards, rank) = match (config.num_shards, config.rank) {
        (Some(num_shards), Some(rank)) => (num_shards, rank),
        _ => return Ok(chunks),
    };

    if num_shards == 0 || num_shards > chunks.len() {
        return Err(Error::InvalidInput(format!(
            "num_shards should be not larger than partitions. but got num_shards {} with partitions {}.",
            num_shards,
            chunks.len()
        )));
    }
    if rank >= num_shards {
        return Err(Error::InvalidInput(format!(
            "shard index should be included in [0,num_shard), but got rank {} with num_shard {}.",
            rank, num_shards
        )));
    }

    Ok(chunks
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % num_shards == rank)
        .map(|(_, chunk)| chunk)
        .collect())
}

/// Records of one shard of a dataset, iterated with an optional transform
///
/// The selected chunks are decoded up front; workers created with
/// [`split_for_worker`](Self::split_for_worker) share the decoded records.
#[derive(Clone)]
pub struct ParquetIterableDataset {
    records: Arc<Vec<Record>>,
    start: usize,
    cur: usize,
    end: usize,
    transform: Option<Transform>,
}

impl ParquetIterableDataset {
    pub fn new(
        path: impl AsRef<Path>,
        config: &ReadConfig,
        transform: Option<Transform>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let schema = load_schema(path)?;
        let chunks = select_shard(chunk_dirs(path)?, config)?;

        let records: Vec<Record> = chunks
            .par_iter()
            .map(|chunk| read_chunk(chunk, &schema))
            .collect::<Result<Vec<Vec<Record>>>>()?
            .into_iter()
            .flatten()
            .collect();

        log::debug!(
            "loaded {} records from {} chunks of {}",
            records.len(),
            chunks.len(),
            path.display()
        );

        let end = records.len();
        Ok(Self {
            records: Arc::new(records),
            start: 0,
            cur: 0,
            end,
            transform,
        })
    }

    /// Number of records not yet iterated
    pub fn len(&self) -> usize {
        self.end - self.cur
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restricts a copy of this dataset to the range read by one worker
    pub fn split_for_worker(&self, worker_id: usize, num_workers: usize) -> Result<Self> {
        if num_workers == 0 || worker_id >= num_workers {
            return Err(Error::InvalidInput(format!(
                "worker id {} is out of range for {} workers",
                worker_id, num_workers
            )));
        }

        let per_worker = (self.end - self.start + num_workers - 1) / num_workers;
        let start = (self.start + worker_id * per_worker).min(self.end);
        let end = (start + per_worker).min(self.end);

        Ok(Self {
            records: Arc::clone(&self.records),
            start,
            cur: start,
            end,
            transform: self.transform.clone(),
        })
    }
}

impl Iterator for ParquetIterableDataset {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }
        let record = self.records[self.cur].clone();
        self.cur += 1;
        Some(match &self.transform {
            Some(transform) => transform(record),
            None => Ok(record),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

/// Groups the records of a [`ParquetIterableDataset`] into batches
///
/// With workers, each worker reads its own contiguous range and batches are
/// taken from the workers in turn. A transform error raised part way through
/// a batch is returned after the records collected before it.
pub struct DataLoader {
    workers: Vec<ParquetIterableDataset>,
    batch_size: usize,
    next_worker: usize,
    pending_error: Option<Error>,
}

impl DataLoader {
    pub fn new(
        dataset: ParquetIterableDataset,
        batch_size: usize,
        num_workers: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch_size should be a positive number".to_string(),
            ));
        }

        let workers = if num_workers == 0 {
            vec![dataset]
        } else {
            (0..num_workers)
                .map(|id| dataset.split_for_worker(id, num_workers))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            workers,
            batch_size,
            next_worker: 0,
            pending_error: None,
        })
    }

    /// Opens the dataset at `path` using the shard, worker and batch settings of `config`
    pub fn from_path(
        path: impl AsRef<Path>,
        config: &ReadConfig,
        transform: Option<Transform>,
    ) -> Result<Self> {
        let dataset = ParquetIterableDataset::new(path, config, transform)?;
        Self::new(dataset, config.batch_size, config.num_workers)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl Iterator for DataLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }

        let num_workers = self.workers.len();
        for _ in 0..num_workers {
            let worker = &mut self.workers[self.next_worker];
            self.next_worker = (self.next_worker + 1) % num_workers;

            let mut records = Vec::with_capacity(self.batch_size);
            for record in worker.by_ref().take(self.batch_size) {
                match record {
                    Ok(record) => records.push(record),
                    Err(e) if records.is_empty() => return Some(Err(e)),
                    Err(e) => {
                        self.pending_error = Some(e);
                        break;
                    }
                }
            }
            if !records.is_empty() {
                return Some(Batch::collate(&records));
            }
        }
        None
    }
}
