//! Record values: scalars, typed n-dimensional tensors and byte blobs

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;

use ndarray::{arr0, Array, ArrayD, Axis, Dimension, IxDyn};
use num_traits::{NumCast, ToPrimitive};

use super::schema::DType;
use crate::error::{Error, Result};

/// One record: field name to value
pub type Record = BTreeMap<String, Value>;

/// Element types that can live inside a [`Tensor`]
pub trait Element: Copy + PartialEq + Debug + Send + Sync + 'static {
    const DTYPE: DType;

    /// Appends the little-endian encoding of `self`
    fn write_le(&self, out: &mut Vec<u8>);

    /// Decodes one element from exactly `size_of::<Self>()` bytes
    fn read_le(bytes: &[u8]) -> Self;
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

macro_rules! impl_numeric_element {
    ($($t:ty => $dtype:ident),*) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;

                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_numeric_element!(u8 => UInt8, i32 => Int32, i64 => Int64, f32 => Float32, f64 => Float64);

/// A typed n-dimensional array
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Bool(ArrayD<bool>),
    UInt8(ArrayD<u8>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

macro_rules! with_array {
    ($tensor:expr, $a:ident => $body:expr) => {
        match $tensor {
            Tensor::Bool($a) => $body,
            Tensor::UInt8($a) => $body,
            Tensor::Int32($a) => $body,
            Tensor::Int64($a) => $body,
            Tensor::Float32($a) => $body,
            Tensor::Float64($a) => $body,
        }
    };
}

macro_rules! impl_tensor_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl<D: Dimension> From<Array<$t, D>> for Tensor {
                fn from(array: Array<$t, D>) -> Self {
                    Tensor::$variant(array.into_dyn())
                }
            }
        )*
    };
}

impl_tensor_from!(bool => Bool, u8 => UInt8, i32 => Int32, i64 => Int64, f32 => Float32, f64 => Float64);

fn encode_elements<T: Element>(array: &ArrayD<T>) -> Vec<u8> {
    let mut out = Vec::with_capacity(array.len() * std::mem::size_of::<T>());
    for v in array.iter() {
        v.write_le(&mut out);
    }
    out
}

fn decode_elements<T: Element>(bytes: &[u8], shape: &[usize]) -> Result<ArrayD<T>> {
    let values: Vec<T> = bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(T::read_le)
        .collect();
    Ok(Array::from_shape_vec(IxDyn(shape), values)?)
}

fn cast_array<S, T>(array: &ArrayD<S>) -> Result<ArrayD<T>>
where
    S: ToPrimitive + Copy + Debug,
    T: NumCast,
{
    let values = array
        .iter()
        .map(|&v| {
            T::from(v).ok_or_else(|| {
                Error::InvalidValue(format!("value {:?} is out of range for the target dtype", v))
            })
        })
        .collect::<Result<Vec<T>>>()?;
    Ok(Array::from_shape_vec(array.raw_dim(), values)?)
}

macro_rules! cast_numeric {
    ($array:expr, $dtype:expr) => {
        match $dtype {
            DType::UInt8 => Ok(Tensor::UInt8(cast_array($array)?)),
            DType::Int32 => Ok(Tensor::Int32(cast_array($array)?)),
            DType::Int64 => Ok(Tensor::Int64(cast_array($array)?)),
            DType::Float32 => Ok(Tensor::Float32(cast_array($array)?)),
            DType::Float64 => Ok(Tensor::Float64(cast_array($array)?)),
            other => Err(Error::InvalidValue(format!(
                "cannot cast a numeric tensor to {}",
                other
            ))),
        }
    };
}

macro_rules! stack_variant {
    ($items:expr, $variant:ident) => {{
        let views = $items
            .iter()
            .map(|t| match t {
                Tensor::$variant(a) => Ok(a.view()),
                other => Err(Error::SchemaMismatch(format!(
                    "cannot stack {} with {}",
                    DType::$variant,
                    other.dtype()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Tensor::$variant(ndarray::stack(Axis(0), &views)?)
    }};
}

impl Tensor {
    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Bool(_) => DType::Bool,
            Tensor::UInt8(_) => DType::UInt8,
            Tensor::Int32(_) => DType::Int32,
            Tensor::Int64(_) => DType::Int64,
            Tensor::Float32(_) => DType::Float32,
            Tensor::Float64(_) => DType::Float64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in row-major order as little-endian bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        with_array!(self, a => encode_elements(a))
    }

    /// Rebuilds a tensor of `dtype` and `shape` from its little-endian bytes
    pub fn from_le_bytes(dtype: DType, bytes: &[u8], shape: &[usize]) -> Result<Self> {
        let item_size = dtype.item_size().ok_or_else(|| {
            Error::SchemaMismatch("string arrays cannot be encoded as raw bytes".to_string())
        })?;
        let expected = shape.iter().product::<usize>() * item_size;
        if bytes.len() != expected {
            return Err(Error::Format(format!(
                "buffer of {} bytes does not hold a {} array of shape {:?}",
                bytes.len(),
                dtype,
                shape
            )));
        }
        Ok(match dtype {
            DType::Bool => Tensor::Bool(decode_elements(bytes, shape)?),
            DType::UInt8 => Tensor::UInt8(decode_elements(bytes, shape)?),
            DType::Int32 => Tensor::Int32(decode_elements(bytes, shape)?),
            DType::Int64 => Tensor::Int64(decode_elements(bytes, shape)?),
            DType::Float32 => Tensor::Float32(decode_elements(bytes, shape)?),
            DType::Float64 => Tensor::Float64(decode_elements(bytes, shape)?),
            DType::String => {
                return Err(Error::SchemaMismatch(
                    "string arrays cannot be encoded as raw bytes".to_string(),
                ))
            }
        })
    }

    /// Converts every element to `dtype`
    pub fn cast(&self, dtype: DType) -> Result<Self> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        match self {
            Tensor::Bool(_) => Err(Error::InvalidValue(format!(
                "cannot cast a bool tensor to {}",
                dtype
            ))),
            Tensor::UInt8(a) => cast_numeric!(a, dtype),
            Tensor::Int32(a) => cast_numeric!(a, dtype),
            Tensor::Int64(a) => cast_numeric!(a, dtype),
            Tensor::Float32(a) => cast_numeric!(a, dtype),
            Tensor::Float64(a) => cast_numeric!(a, dtype),
        }
    }

    /// Stacks tensors of one dtype and shape along a new leading axis
    pub fn stack(items: &[Tensor]) -> Result<Self> {
        let first = items.first().ok_or_else(|| {
            Error::InvalidOperation("cannot stack an empty list of tensors".to_string())
        })?;
        Ok(match first {
            Tensor::Bool(_) => stack_variant!(items, Bool),
            Tensor::UInt8(_) => stack_variant!(items, UInt8),
            Tensor::Int32(_) => stack_variant!(items, Int32),
            Tensor::Int64(_) => stack_variant!(items, Int64),
            Tensor::Float32(_) => stack_variant!(items, Float32),
            Tensor::Float64(_) => stack_variant!(items, Float64),
        })
    }

    /// All elements converted to `f64`, in row-major order
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Tensor::Bool(a) => a.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect(),
            Tensor::UInt8(a) => a.iter().map(|&v| v as f64).collect(),
            Tensor::Int32(a) => a.iter().map(|&v| v as f64).collect(),
            Tensor::Int64(a) => a.iter().map(|&v| v as f64).collect(),
            Tensor::Float32(a) => a.iter().map(|&v| v as f64).collect(),
            Tensor::Float64(a) => a.iter().copied().collect(),
        }
    }
}

/// A field value inside a [`Record`]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    UInt8(u8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Tensor(Tensor),
    /// Path of an image file whose bytes are stored on write
    ImagePath(PathBuf),
    /// Opaque bytes, e.g. the contents of an image file
    Bytes(Vec<u8>),
}

macro_rules! impl_value_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from!(
    String => Str,
    bool => Bool,
    u8 => UInt8,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    Tensor => Tensor,
    PathBuf => ImagePath,
    Vec<u8> => Bytes
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

fn cast_scalar<S: ToPrimitive + Copy + Debug>(v: S, dtype: DType) -> Result<Value> {
    let out_of_range =
        || Error::InvalidValue(format!("value {:?} is out of range for {}", v, dtype));
    match dtype {
        DType::UInt8 => Ok(Value::UInt8(NumCast::from(v).ok_or_else(out_of_range)?)),
        DType::Int32 => Ok(Value::Int32(NumCast::from(v).ok_or_else(out_of_range)?)),
        DType::Int64 => Ok(Value::Int64(NumCast::from(v).ok_or_else(out_of_range)?)),
        DType::Float32 => Ok(Value::Float32(NumCast::from(v).ok_or_else(out_of_range)?)),
        DType::Float64 => Ok(Value::Float64(NumCast::from(v).ok_or_else(out_of_range)?)),
        other => Err(Error::InvalidValue(format!(
            "cannot cast a numeric value to {}",
            other
        ))),
    }
}

impl Value {
    /// Element dtype of scalar and tensor values
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Value::Str(_) => Some(DType::String),
            Value::Bool(_) => Some(DType::Bool),
            Value::UInt8(_) => Some(DType::UInt8),
            Value::Int32(_) => Some(DType::Int32),
            Value::Int64(_) => Some(DType::Int64),
            Value::Float32(_) => Some(DType::Float32),
            Value::Float64(_) => Some(DType::Float64),
            Value::Tensor(t) => Some(t.dtype()),
            Value::ImagePath(_) | Value::Bytes(_) => None,
        }
    }

    /// Short name of the value kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::UInt8(_) => "uint8",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Tensor(_) => "tensor",
            Value::ImagePath(_) => "image path",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Converts a scalar or tensor to `dtype`
    ///
    /// Strings, booleans and blobs only convert to their own type.
    pub fn cast(&self, dtype: DType) -> Result<Value> {
        if self.dtype() == Some(dtype) {
            return Ok(self.clone());
        }
        match self {
            Value::UInt8(v) => cast_scalar(*v, dtype),
            Value::Int32(v) => cast_scalar(*v, dtype),
            Value::Int64(v) => cast_scalar(*v, dtype),
            Value::Float32(v) => cast_scalar(*v, dtype),
            Value::Float64(v) => cast_scalar(*v, dtype),
            Value::Tensor(t) => Ok(Value::Tensor(t.cast(dtype)?)),
            other => Err(Error::InvalidValue(format!(
                "cannot cast a {} value to {}",
                other.kind(),
                dtype
            ))),
        }
    }

    /// Wraps a scalar into a zero-dimensional tensor
    pub fn to_tensor(&self) -> Option<Tensor> {
        match self {
            Value::Bool(v) => Some(Tensor::Bool(arr0(*v).into_dyn())),
            Value::UInt8(v) => Some(Tensor::UInt8(arr0(*v).into_dyn())),
            Value::Int32(v) => Some(Tensor::Int32(arr0(*v).into_dyn())),
            Value::Int64(v) => Some(Tensor::Int64(arr0(*v).into_dyn())),
            Value::Float32(v) => Some(Tensor::Float32(arr0(*v).into_dyn())),
            Value::Float64(v) => Some(Tensor::Float64(arr0(*v).into_dyn())),
            Value::Tensor(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}
