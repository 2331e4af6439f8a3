//! Collated record batches and in-memory partition collections

use std::collections::BTreeMap;

use rayon::prelude::*;

use super::value::{Record, Tensor, Value};
use crate::error::{Error, Result};

/// One collated column of a [`Batch`]
#[derive(Debug, Clone, PartialEq)]
pub enum BatchColumn {
    /// Scalars or tensors stacked along a new leading axis
    Tensor(Tensor),
    Strings(Vec<String>),
    /// Opaque blobs such as encoded images, one per record
    Blobs(Vec<Vec<u8>>),
}

impl BatchColumn {
    /// Number of records in the column
    pub fn len(&self) -> usize {
        match self {
            BatchColumn::Tensor(t) => t.shape().first().copied().unwrap_or(0),
            BatchColumn::Strings(v) => v.len(),
            BatchColumn::Blobs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            BatchColumn::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            BatchColumn::Strings(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blobs(&self) -> Option<&[Vec<u8>]> {
        match self {
            BatchColumn::Blobs(v) => Some(v),
            _ => None,
        }
    }
}

/// Records merged column-wise
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    columns: BTreeMap<String, BatchColumn>,
    len: usize,
}

fn collate_column(name: &str, values: Vec<&Value>) -> Result<BatchColumn> {
    let kind_error = |value: &Value| {
        Error::SchemaMismatch(format!(
            "field '{}' mixes {} values with {} values",
            name,
            values[0].kind(),
            value.kind()
        ))
    };

    match values[0] {
        Value::Str(_) => values
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| kind_error(*v)))
            .collect::<Result<Vec<String>>>()
            .map(BatchColumn::Strings),
        Value::Bytes(_) => values
            .iter()
            .map(|v| v.as_bytes().map(<[u8]>::to_vec).ok_or_else(|| kind_error(*v)))
            .collect::<Result<Vec<Vec<u8>>>>()
            .map(BatchColumn::Blobs),
        Value::ImagePath(_) => Err(Error::SchemaMismatch(format!(
            "field '{}' holds image paths; only loaded images can be collated",
            name
        ))),
        _ => {
            let tensors = values
                .iter()
                .map(|v| v.to_tensor().ok_or_else(|| kind_error(*v)))
                .collect::<Result<Vec<Tensor>>>()?;
            let stacked = Tensor::stack(&tensors).map_err(|e| {
                Error::SchemaMismatch(format!("cannot stack field '{}': {}", name, e))
            })?;
            Ok(BatchColumn::Tensor(stacked))
        }
    }
}

impl Batch {
    /// Merges records into one column per key
    ///
    /// Every record must have the same keys with values of the same kind.
    /// Numeric scalars and tensors are stacked along a new leading axis, so
    /// tensor shapes must agree.
    pub fn collate(records: &[Record]) -> Result<Self> {
        let first = match records.first() {
            Some(first) => first,
            None => return Ok(Self::default()),
        };

        for record in &records[1..] {
            if record.len() != first.len() || !first.keys().all(|k| record.contains_key(k)) {
                return Err(Error::SchemaMismatch(format!(
                    "records have different fields: {:?} and {:?}",
                    first.keys().collect::<Vec<_>>(),
                    record.keys().collect::<Vec<_>>()
                )));
            }
        }

        let mut columns = BTreeMap::new();
        for name in first.keys() {
            let values: Vec<&Value> = records.iter().map(|r| &r[name]).collect();
            columns.insert(name.clone(), collate_column(name, values)?);
        }

        Ok(Self {
            columns,
            len: records.len(),
        })
    }

    /// Number of records merged into the batch
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column(&self, name: &str) -> Option<&BatchColumn> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> &BTreeMap<String, BatchColumn> {
        &self.columns
    }

    pub fn into_columns(self) -> BTreeMap<String, BatchColumn> {
        self.columns
    }

    /// Replaces or adds a column; its length must match the batch
    pub fn insert_column(&mut self, name: impl Into<String>, column: BatchColumn) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.len {
            return Err(Error::DimensionMismatch(format!(
                "column of length {} does not match batch of length {}",
                column.len(),
                self.len
            )));
        }
        self.len = column.len();
        self.columns.insert(name.into(), column);
        Ok(())
    }
}

/// A dataset held in memory as one [`Batch`] per partition
#[derive(Debug, Clone, Default)]
pub struct Shards {
    partitions: Vec<Batch>,
}

impl Shards {
    pub fn new(partitions: Vec<Batch>) -> Self {
        Self { partitions }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of records over all partitions
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Batch::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partitions(&self) -> &[Batch] {
        &self.partitions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Batch> {
        self.partitions.iter()
    }

    /// Takes ownership of all partitions
    pub fn collect(self) -> Vec<Batch> {
        self.partitions
    }

    /// Applies `f` to every partition in parallel
    pub fn transform_shard<F>(self, f: F) -> Result<Shards>
    where
        F: Fn(Batch) -> Result<Batch> + Send + Sync,
    {
        let partitions = self
            .partitions
            .into_par_iter()
            .map(f)
            .collect::<Result<Vec<Batch>>>()?;
        Ok(Shards { partitions })
    }
}

impl IntoIterator for Shards {
    type Item = Batch;
    type IntoIter = std::vec::IntoIter<Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_iter()
    }
}

impl<'a> IntoIterator for &'a Shards {
    type Item = &'a Batch;
    type IntoIter = std::slice::Iter<'a, Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn record(i: i32) -> Record {
        let mut record = Record::new();
        record.insert("id".to_string(), Value::from(format!("r{}", i)));
        record.insert("y".to_string(), Value::Int32(i));
        record.insert("x".to_string(), Value::from(Tensor::from(array![i as f32, 0.5])));
        record.insert("img".to_string(), Value::Bytes(vec![i as u8]));
        record
    }

    #[test]
    fn test_collate() {
        let records: Vec<Record> = (0..3).map(record).collect();
        let batch = Batch::collate(&records).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.column("y").unwrap().as_tensor().unwrap(),
            &Tensor::from(array![0, 1, 2])
        );
        assert_eq!(
            batch.column("x").unwrap().as_tensor().unwrap().shape(),
            &[3, 2]
        );
        assert_eq!(
            batch.column("id").unwrap().as_strings().unwrap(),
            &["r0".to_string(), "r1".to_string(), "r2".to_string()]
        );
        assert_eq!(batch.column("img").unwrap().as_blobs().unwrap()[2], vec![2]);
    }

    #[test]
    fn test_collate_mismatched_records() {
        let mut other = record(1);
        other.remove("img");
        assert!(matches!(
            Batch::collate(&[record(0), other]),
            Err(Error::SchemaMismatch(_))
        ));

        let mut other = record(1);
        other.insert("id".to_string(), Value::Int32(1));
        assert!(Batch::collate(&[record(0), other]).is_err());

        let mut other = record(1);
        other.insert("x".to_string(), Value::from(Tensor::from(array![1.0_f32])));
        assert!(Batch::collate(&[record(0), other]).is_err());
    }

    #[test]
    fn test_collate_empty() {
        let batch = Batch::collate(&[]).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.column_names().count(), 0);
    }

    #[test]
    fn test_shards_transform() {
        let shards = Shards::new(vec![
            Batch::collate(&[record(0), record(1)]).unwrap(),
            Batch::collate(&[record(2)]).unwrap(),
        ]);
        assert_eq!(shards.num_partitions(), 2);
        assert_eq!(shards.len(), 3);

        let doubled = shards
            .transform_shard(|mut batch| {
                let y = batch.column("y").unwrap().as_tensor().unwrap().cast(
                    crate::dataset::schema::DType::Float64,
                )?;
                let y = match y {
                    Tensor::Float64(a) => Tensor::Float64(a * 2.0),
                    other => other,
                };
                batch.insert_column("y2", BatchColumn::Tensor(y))?;
                Ok(batch)
            })
            .unwrap();

        let batches = doubled.collect();
        assert_eq!(
            batches[0].column("y2").unwrap().as_tensor().unwrap(),
            &Tensor::from(array![0.0, 2.0])
        );
        assert_eq!(
            batches[1].column("y2").unwrap().as_tensor().unwrap(),
            &Tensor::from(array![4.0])
        );
    }

    #[test]
    fn test_insert_column_length_checked() {
        let mut batch = Batch::collate(&[record(0), record(1)]).unwrap();
        let err = batch.insert_column("z", BatchColumn::Strings(vec!["a".to_string()]));
        assert!(err.is_err());
    }
}
