//! Dataset schema: how each named field is encoded into a Parquet column

use std::collections::BTreeMap;
use std::fmt;

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name of the schema descriptor stored next to the chunk directories
pub const METADATA_FILE: &str = "_orca_metadata";

/// Encoding strategy of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// A single number, boolean or string mapped onto a native column type
    Scalar,
    /// An n-dimensional array stored as its raw element bytes
    NdArray,
    /// An image file stored as its raw file contents
    Image,
}

/// Element type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    String,
    Bool,
    UInt8,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Size in bytes of one element inside an encoded array
    pub fn item_size(&self) -> Option<usize> {
        match self {
            DType::String => None,
            DType::Bool | DType::UInt8 => Some(1),
            DType::Int32 | DType::Float32 => Some(4),
            DType::Int64 | DType::Float64 => Some(8),
        }
    }

    /// Arrow column type of a scalar of this dtype
    pub fn arrow_type(&self) -> DataType {
        match self {
            DType::String => DataType::Utf8,
            DType::Bool => DataType::Boolean,
            DType::UInt8 => DataType::UInt8,
            DType::Int32 => DataType::Int32,
            DType::Int64 => DataType::Int64,
            DType::Float32 => DataType::Float32,
            DType::Float64 => DataType::Float64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::String => "string",
            DType::Bool => "bool",
            DType::UInt8 => "uint8",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Declared name-independent description of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub feature_type: FeatureType,
    pub dtype: DType,
    /// Shape of one value; a single `-1` marks a dimension inferred on decode
    pub shape: Vec<i64>,
}

impl SchemaField {
    pub fn new(feature_type: FeatureType, dtype: DType, shape: Vec<i64>) -> Self {
        Self {
            feature_type,
            dtype,
            shape,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(FeatureType::Scalar, dtype, Vec::new())
    }

    pub fn ndarray(dtype: DType, shape: Vec<i64>) -> Self {
        Self::new(FeatureType::NdArray, dtype, shape)
    }

    /// Image fields keep the raw file bytes, so the dtype only documents the
    /// intended decoded type
    pub fn image() -> Self {
        Self::new(FeatureType::Image, DType::Float32, Vec::new())
    }

    /// Arrow column type holding this field
    pub fn arrow_type(&self) -> DataType {
        match self.feature_type {
            FeatureType::Scalar => self.dtype.arrow_type(),
            FeatureType::NdArray | FeatureType::Image => DataType::Binary,
        }
    }

    /// Resolves the declared shape for an array holding `num_elements` elements
    pub fn resolve_shape(&self, num_elements: usize) -> Result<Vec<usize>> {
        let inferred = self.shape.iter().filter(|&&d| d == -1).count();
        if inferred > 1 || self.shape.iter().any(|&d| d < -1) {
            return Err(Error::SchemaMismatch(format!(
                "invalid shape {:?}: only a single -1 dimension is allowed",
                self.shape
            )));
        }

        let known: usize = self
            .shape
            .iter()
            .filter(|&&d| d != -1)
            .map(|&d| d as usize)
            .product();

        let resolved: Vec<usize> = if inferred == 0 {
            self.shape.iter().map(|&d| d as usize).collect()
        } else {
            if known == 0 || num_elements % known != 0 {
                return Err(Error::SchemaMismatch(format!(
                    "cannot reshape array of size {} into shape {:?}",
                    num_elements, self.shape
                )));
            }
            self.shape
                .iter()
                .map(|&d| if d == -1 { num_elements / known } else { d as usize })
                .collect()
        };

        if resolved.iter().product::<usize>() != num_elements {
            return Err(Error::SchemaMismatch(format!(
                "cannot reshape array of size {} into shape {:?}",
                num_elements, self.shape
            )));
        }
        Ok(resolved)
    }
}

/// Field name to field description, ordered by name
pub type Schema = BTreeMap<String, SchemaField>;

/// Serializes a schema into the text stored in the metadata file
pub fn encode_schema(schema: &Schema) -> Result<String> {
    Ok(serde_json::to_string(schema)?)
}

/// Parses the text of a metadata file
pub fn decode_schema(text: &str) -> Result<Schema> {
    Ok(serde_json::from_str(text.trim())?)
}

/// Arrow schema of the rows written for `schema`
pub fn arrow_schema(schema: &Schema) -> ArrowSchema {
    let fields: Vec<Field> = schema
        .iter()
        .map(|(name, field)| Field::new(name.as_str(), field.arrow_type(), false))
        .collect();
    ArrowSchema::new(fields)
}
