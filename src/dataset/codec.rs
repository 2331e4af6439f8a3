//! Conversion between records and Arrow record batches, driven by a [`Schema`]

use std::fs;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray, UInt8Array,
};
use arrow::record_batch::RecordBatch;

use super::schema::{arrow_schema, DType, FeatureType, Schema, SchemaField};
use super::value::{Record, Tensor, Value};
use crate::error::{Error, Result};

fn field_value<'a>(record: &'a Record, name: &str) -> Result<&'a Value> {
    record
        .get(name)
        .ok_or_else(|| Error::SchemaMismatch(format!("record is missing field '{}'", name)))
}

fn mismatch(name: &str, field: &SchemaField, value: &Value) -> Error {
    Error::SchemaMismatch(format!(
        "field '{}' expects {:?} of {}, got a {} value",
        name,
        field.feature_type,
        field.dtype,
        value.kind()
    ))
}

macro_rules! scalar_column {
    ($records:expr, $name:expr, $field:expr, $variant:ident, $array:ty) => {{
        let values = $records
            .iter()
            .map(|record| {
                let value = field_value(record, $name)?;
                match value.cast(DType::$variant) {
                    Ok(Value::$variant(v)) => Ok(v),
                    _ => Err(mismatch($name, $field, value)),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Arc::new(<$array>::from(values)) as ArrayRef
    }};
}

fn encode_scalars(records: &[Record], name: &str, field: &SchemaField) -> Result<ArrayRef> {
    Ok(match field.dtype {
        DType::String => {
            let values = records
                .iter()
                .map(|record| {
                    let value = field_value(record, name)?;
                    value
                        .as_str()
                        .map(str::to_string)
                        .ok_or_else(|| mismatch(name, field, value))
                })
                .collect::<Result<Vec<String>>>()?;
            Arc::new(StringArray::from(values)) as ArrayRef
        }
        DType::Bool => {
            let values = records
                .iter()
                .map(|record| match field_value(record, name)? {
                    Value::Bool(v) => Ok(*v),
                    other => Err(mismatch(name, field, other)),
                })
                .collect::<Result<Vec<bool>>>()?;
            Arc::new(BooleanArray::from(values)) as ArrayRef
        }
        DType::UInt8 => scalar_column!(records, name, field, UInt8, UInt8Array),
        DType::Int32 => scalar_column!(records, name, field, Int32, Int32Array),
        DType::Int64 => scalar_column!(records, name, field, Int64, Int64Array),
        DType::Float32 => scalar_column!(records, name, field, Float32, Float32Array),
        DType::Float64 => scalar_column!(records, name, field, Float64, Float64Array),
    })
}

fn encode_tensor(name: &str, field: &SchemaField, value: &Value) -> Result<Vec<u8>> {
    let tensor = match value {
        Value::Tensor(t) if t.dtype() == field.dtype => t,
        other => return Err(mismatch(name, field, other)),
    };
    field.resolve_shape(tensor.len())?;
    Ok(tensor.to_le_bytes())
}

fn encode_image(name: &str, field: &SchemaField, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::ImagePath(path) => Ok(fs::read(path)?),
        Value::Str(path) => Ok(fs::read(path)?),
        Value::Bytes(bytes) => Ok(bytes.clone()),
        other => Err(mismatch(name, field, other)),
    }
}

/// Converts records into one Arrow batch with a column per schema field
///
/// Keys that are not part of the schema are ignored.
pub fn encode_batch(schema: &Schema, records: &[Record]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());

    for (name, field) in schema {
        let column = match field.feature_type {
            FeatureType::Scalar => encode_scalars(records, name, field)?,
            FeatureType::NdArray | FeatureType::Image => {
                let blobs = records
                    .iter()
                    .map(|record| {
                        let value = field_value(record, name)?;
                        if field.feature_type == FeatureType::NdArray {
                            encode_tensor(name, field, value)
                        } else {
                            encode_image(name, field, value)
                        }
                    })
                    .collect::<Result<Vec<Vec<u8>>>>()?;
                Arc::new(BinaryArray::from_iter_values(blobs.iter())) as ArrayRef
            }
        };
        columns.push(column);
    }

    Ok(RecordBatch::try_new(
        Arc::new(arrow_schema(schema)),
        columns,
    )?)
}

fn downcast<'a, T: 'static>(column: &'a ArrayRef, name: &str) -> Result<&'a T> {
    column.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::SchemaMismatch(format!(
            "column '{}' has unexpected type {}",
            name,
            column.data_type()
        ))
    })
}

macro_rules! decode_primitive {
    ($column:expr, $name:expr, $array:ty, $variant:ident) => {{
        let array = downcast::<$array>($column, $name)?;
        (0..array.len())
            .map(|i| Value::$variant(array.value(i).into()))
            .collect::<Vec<Value>>()
    }};
}

fn decode_column(column: &ArrayRef, name: &str, field: &SchemaField) -> Result<Vec<Value>> {
    if column.null_count() > 0 {
        return Err(Error::Format(format!(
            "column '{}' contains null values",
            name
        )));
    }

    Ok(match field.feature_type {
        FeatureType::Scalar => match field.dtype {
            DType::String => {
                let array = downcast::<StringArray>(column, name)?;
                (0..array.len())
                    .map(|i| Value::Str(array.value(i).to_string()))
                    .collect()
            }
            DType::Bool => decode_primitive!(column, name, BooleanArray, Bool),
            DType::UInt8 => decode_primitive!(column, name, UInt8Array, UInt8),
            DType::Int32 => decode_primitive!(column, name, Int32Array, Int32),
            DType::Int64 => decode_primitive!(column, name, Int64Array, Int64),
            DType::Float32 => decode_primitive!(column, name, Float32Array, Float32),
            DType::Float64 => decode_primitive!(column, name, Float64Array, Float64),
        },
        FeatureType::NdArray => {
            let array = downcast::<BinaryArray>(column, name)?;
            let item_size = field.dtype.item_size().ok_or_else(|| {
                Error::SchemaMismatch(format!("field '{}' cannot hold string arrays", name))
            })?;
            (0..array.len())
                .map(|i| {
                    let bytes = array.value(i);
                    let shape = field.resolve_shape(bytes.len() / item_size)?;
                    Ok(Value::Tensor(Tensor::from_le_bytes(
                        field.dtype,
                        bytes,
                        &shape,
                    )?))
                })
                .collect::<Result<Vec<Value>>>()?
        }
        FeatureType::Image => {
            let array = downcast::<BinaryArray>(column, name)?;
            (0..array.len())
                .map(|i| Value::Bytes(array.value(i).to_vec()))
                .collect()
        }
    })
}

/// Converts an Arrow batch back into records
///
/// Columns without a schema entry are ignored.
pub fn decode_batch(schema: &Schema, batch: &RecordBatch) -> Result<Vec<Record>> {
    let mut records: Vec<Record> = vec![Record::new(); batch.num_rows()];

    for (name, field) in schema {
        let column = batch.column_by_name(name).ok_or_else(|| {
            Error::SchemaMismatch(format!("column '{}' not found in the data file", name))
        })?;
        let values = decode_column(column, name, field)?;
        for (record, value) in records.iter_mut().zip(values) {
            record.insert(name.clone(), value);
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert("id".to_string(), SchemaField::scalar(DType::String));
        schema.insert("score".to_string(), SchemaField::scalar(DType::Float64));
        schema.insert(
            "x".to_string(),
            SchemaField::ndarray(DType::Int32, vec![2]),
        );
        schema.insert("img".to_string(), SchemaField::image());
        schema
    }

    fn record(i: i32) -> Record {
        let mut record = Record::new();
        record.insert("id".to_string(), Value::from(format!("r{}", i)));
        record.insert("score".to_string(), Value::Int32(i));
        record.insert("x".to_string(), Value::from(Tensor::from(array![i, -i])));
        record.insert("img".to_string(), Value::Bytes(vec![i as u8; 3]));
        record.insert("extra".to_string(), Value::Bool(true));
        record
    }

    #[test]
    fn test_batch_round_trip() {
        let records: Vec<Record> = (0..3).map(record).collect();
        let batch = encode_batch(&schema(), &records).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 4);

        let decoded = decode_batch(&schema(), &batch).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2]["id"], Value::from("r2"));
        // Int32 input is stored as the declared Float64
        assert_eq!(decoded[2]["score"], Value::Float64(2.0));
        assert_eq!(
            decoded[2]["x"],
            Value::Tensor(Tensor::from(array![2, -2]))
        );
        assert_eq!(decoded[2]["img"], Value::Bytes(vec![2, 2, 2]));
        assert!(!decoded[2].contains_key("extra"));
    }

    #[test]
    fn test_missing_field() {
        let mut rec = record(1);
        rec.remove("x");
        let err = encode_batch(&schema(), &[rec]).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn test_tensor_dtype_and_shape_checked() {
        let mut rec = record(1);
        rec.insert(
            "x".to_string(),
            Value::from(Tensor::from(array![1.0_f32, 2.0])),
        );
        assert!(encode_batch(&schema(), &[rec]).is_err());

        let mut rec = record(1);
        rec.insert("x".to_string(), Value::from(Tensor::from(array![1, 2, 3])));
        assert!(encode_batch(&schema(), &[rec]).is_err());
    }

    #[test]
    fn test_wrong_scalar_kind() {
        let mut rec = record(1);
        rec.insert("id".to_string(), Value::Int32(1));
        assert!(encode_batch(&schema(), &[rec]).is_err());
    }
}
