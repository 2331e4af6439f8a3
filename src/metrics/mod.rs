//! 機械学習の評価指標モジュール
//!
//! 回帰や分類モデルの予測値を評価する指標を提供します。
//! Every metric takes a ground-truth array and a prediction array whose first
//! axis is the sample axis; the remaining axes are flattened into outputs.

pub mod classification;
pub mod regression;

use std::fmt;
use std::str::FromStr;

use ndarray::{Array, Array1, Array2, ArrayBase, ArrayD, Axis, Data, Dimension, IxDyn};
use num_traits::ToPrimitive;

use crate::error::{Error, Result};

pub use classification::accuracy;
pub use regression::{mae, mape, mdape, me, mpe, mse, msle, mspe, r2, rmse, smape, smdape};

/// ゼロ除算を避けるための微小値
pub const EPSILON: f64 = 1e-10;

const ALLOWED_MULTIOUTPUT: [&str; 3] = ["raw_values", "uniform_average", "variance_weighted"];

/// Reduction applied across outputs when a target has more than one output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiOutput {
    /// One value per output, shaped like the target's trailing axes
    RawValues,
    /// Mean of the per-output values
    UniformAverage,
    /// Per-output values weighted by the variance of the ground truth
    VarianceWeighted,
}

impl Default for MultiOutput {
    fn default() -> Self {
        MultiOutput::RawValues
    }
}

impl FromStr for MultiOutput {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw_values" => Ok(MultiOutput::RawValues),
            "uniform_average" => Ok(MultiOutput::UniformAverage),
            "variance_weighted" => Ok(MultiOutput::VarianceWeighted),
            other => Err(Error::InvalidInput(format!(
                "Allowed 'multioutput' string values are {:?}. You provided multioutput={:?}",
                ALLOWED_MULTIOUTPUT, other
            ))),
        }
    }
}

impl fmt::Display for MultiOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MultiOutput::RawValues => "raw_values",
            MultiOutput::UniformAverage => "uniform_average",
            MultiOutput::VarianceWeighted => "variance_weighted",
        };
        f.write_str(name)
    }
}

/// Result of a metric: a single score or one score per output
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutput {
    Scalar(f64),
    Values(ArrayD<f64>),
}

impl MetricOutput {
    /// Returns the scalar score, if this is a reduced result
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricOutput::Scalar(v) => Some(*v),
            MetricOutput::Values(_) => None,
        }
    }

    /// Returns the per-output scores, if this is a raw result
    pub fn as_values(&self) -> Option<&ArrayD<f64>> {
        match self {
            MetricOutput::Scalar(_) => None,
            MetricOutput::Values(values) => Some(values),
        }
    }

    /// Applies `f` to every score
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            MetricOutput::Scalar(v) => MetricOutput::Scalar(f(v)),
            MetricOutput::Values(values) => MetricOutput::Values(values.mapv(f)),
        }
    }
}

/// 評価指標に渡せる配列ライクな入力
///
/// Implemented for numeric slices, `Vec`s, fixed-size arrays, rectangular
/// nested `Vec`s and `ndarray` arrays of any dimension.
pub trait AsTargets {
    /// Converts the input into an owned `f64` array in row-major order
    fn to_targets(&self) -> Result<ArrayD<f64>>;
}

fn to_f64<T: ToPrimitive>(value: &T) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| Error::InvalidValue("value cannot be represented as f64".to_string()))
}

fn from_flat<T: ToPrimitive>(values: &[T]) -> Result<ArrayD<f64>> {
    let data = values.iter().map(to_f64).collect::<Result<Vec<f64>>>()?;
    Ok(Array::from_shape_vec(IxDyn(&[data.len()]), data)?)
}

fn from_nested<T: ToPrimitive>(rows: &[Vec<T>]) -> Result<ArrayD<f64>> {
    let width = rows.first().map(|row| row.len()).unwrap_or(0);
    if rows.iter().any(|row| row.len() != width) {
        return Err(Error::InvalidInput(
            "Expected array-like input. Nested sequences must be rectangular".to_string(),
        ));
    }
    let data = rows
        .iter()
        .flat_map(|row| row.iter())
        .map(to_f64)
        .collect::<Result<Vec<f64>>>()?;
    Ok(Array::from_shape_vec(IxDyn(&[rows.len(), width]), data)?)
}

macro_rules! impl_as_targets {
    ($($t:ty),*) => {
        $(
            impl AsTargets for [$t] {
                fn to_targets(&self) -> Result<ArrayD<f64>> {
                    from_flat(self)
                }
            }

            impl AsTargets for Vec<$t> {
                fn to_targets(&self) -> Result<ArrayD<f64>> {
                    from_flat(self)
                }
            }

            impl<const N: usize> AsTargets for [$t; N] {
                fn to_targets(&self) -> Result<ArrayD<f64>> {
                    from_flat(self)
                }
            }

            impl AsTargets for [Vec<$t>] {
                fn to_targets(&self) -> Result<ArrayD<f64>> {
                    from_nested(self)
                }
            }

            impl AsTargets for Vec<Vec<$t>> {
                fn to_targets(&self) -> Result<ArrayD<f64>> {
                    from_nested(self)
                }
            }
        )*
    };
}

impl_as_targets!(f64, f32, i64, i32, u32, u8);

impl<S, D> AsTargets for ArrayBase<S, D>
where
    S: Data,
    S::Elem: ToPrimitive,
    D: Dimension,
{
    fn to_targets(&self) -> Result<ArrayD<f64>> {
        let data = self.iter().map(to_f64).collect::<Result<Vec<f64>>>()?;
        Ok(Array::from_shape_vec(IxDyn(self.shape()), data)?)
    }
}

/// Inputs after validation: two `(n_samples, n_outputs)` matrices plus the
/// trailing shape of the ground truth
#[derive(Debug, Clone)]
pub(crate) struct Standardized {
    pub y_true: Array2<f64>,
    pub y_pred: Array2<f64>,
    pub original_shape: Vec<usize>,
}

fn to_matrix(array: ArrayD<f64>) -> Result<Array2<f64>> {
    if array.ndim() == 0 {
        return Err(Error::InvalidInput(
            "Expected array-like input with a sample axis".to_string(),
        ));
    }
    let n_samples = array.shape()[0];
    if n_samples == 0 {
        return Err(Error::InvalidInput("The input is empty.".to_string()));
    }
    let n_outputs = array.len() / n_samples;
    Ok(array.into_shape((n_samples, n_outputs))?)
}

/// 入力の検証と2次元への変換
pub(crate) fn standardize_input<A, B>(y_true: &A, y_pred: &B) -> Result<Standardized>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let y_true = y_true.to_targets()?;
    let y_pred = y_pred.to_targets()?;

    let original_shape = y_true.shape().get(1..).map(|s| s.to_vec()).unwrap_or_default();

    let y_true = to_matrix(y_true)?;
    let y_pred = to_matrix(y_pred)?;

    if y_true.nrows() != y_pred.nrows() {
        return Err(Error::DimensionMismatch(format!(
            "y_true and y_pred have different number of samples ({}!={})",
            y_true.nrows(),
            y_pred.nrows()
        )));
    }
    if y_true.ncols() != y_pred.ncols() {
        return Err(Error::DimensionMismatch(format!(
            "y_true and y_pred have different number of output ({}!={})",
            y_true.ncols(),
            y_pred.ncols()
        )));
    }

    Ok(Standardized {
        y_true,
        y_pred,
        original_shape,
    })
}

impl Standardized {
    /// Applies `f` to each pair of matching output columns
    pub fn per_output<F>(&self, f: F) -> Array1<f64>
    where
        F: Fn(&[f64], &[f64]) -> f64,
    {
        self.y_true
            .axis_iter(Axis(1))
            .zip(self.y_pred.axis_iter(Axis(1)))
            .map(|(t, p)| {
                let t: Vec<f64> = t.iter().copied().collect();
                let p: Vec<f64> = p.iter().copied().collect();
                f(&t, &p)
            })
            .collect()
    }

    /// Reduces per-output values according to `multioutput`
    ///
    /// `VarianceWeighted` averages uniformly here; only `r2` weights its
    /// outputs, by their total sum of squares.
    pub fn reduce(&self, errors: Array1<f64>, multioutput: MultiOutput) -> Result<MetricOutput> {
        match multioutput {
            MultiOutput::RawValues => Ok(MetricOutput::Values(
                errors.into_shape(IxDyn(&self.original_shape))?,
            )),
            MultiOutput::UniformAverage | MultiOutput::VarianceWeighted => {
                Ok(MetricOutput::Scalar(mean(&errors)))
            }
        }
    }
}

pub(crate) fn mean(values: &Array1<f64>) -> f64 {
    values.mean().unwrap_or(f64::NAN)
}

/// Whether a metric is better when larger or when smaller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricMode {
    Min,
    Max,
}

impl fmt::Display for MetricMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricMode::Min => f.write_str("min"),
            MetricMode::Max => f.write_str("max"),
        }
    }
}

type MetricFn = fn(&ArrayD<f64>, &ArrayD<f64>, MultiOutput) -> Result<MetricOutput>;

const METRICS: &[(&str, MetricFn)] = &[
    // Absolute
    ("me", regression::me),
    ("mae", regression::mae),
    ("mse", regression::mse),
    ("rmse", regression::rmse),
    ("msle", regression::msle),
    ("r2", regression::r2),
    // Relative
    ("mpe", regression::mpe),
    ("mape", regression::mape),
    ("mspe", regression::mspe),
    ("smape", regression::smape),
    ("mdape", regression::mdape),
    ("smdape", regression::smdape),
    ("accuracy", classification::accuracy),
];

const MAX_MODE_METRICS: [&str; 2] = ["r2", "accuracy"];

/// 指標名から評価関数を引くための評価器
pub struct Evaluator;

impl Evaluator {
    /// Evaluates the metric named `metric`
    pub fn evaluate<A, B>(
        metric: &str,
        y_true: &A,
        y_pred: &B,
        multioutput: MultiOutput,
    ) -> Result<MetricOutput>
    where
        A: AsTargets + ?Sized,
        B: AsTargets + ?Sized,
    {
        let func = Self::lookup(metric)?;
        func(&y_true.to_targets()?, &y_pred.to_targets()?, multioutput)
    }

    /// Fails if `metric` is empty or not a known metric name
    pub fn check_metric(metric: &str) -> Result<()> {
        Self::lookup(metric).map(|_| ())
    }

    /// `Max` for score-style metrics, `Min` for error metrics
    pub fn metric_mode(metric: &str) -> Result<MetricMode> {
        Self::check_metric(metric)?;
        if MAX_MODE_METRICS.contains(&metric) {
            Ok(MetricMode::Max)
        } else {
            Ok(MetricMode::Min)
        }
    }

    /// Names of all supported metrics
    pub fn metric_names() -> impl Iterator<Item = &'static str> {
        METRICS.iter().map(|(name, _)| *name)
    }

    fn lookup(metric: &str) -> Result<MetricFn> {
        if metric.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Got invalid metric name of {:?}!",
                metric
            )));
        }
        METRICS
            .iter()
            .find(|(name, _)| *name == metric)
            .map(|(_, func)| *func)
            .ok_or_else(|| Error::InvalidInput(format!("metric {} is not supported", metric)))
    }
}
