//! 分類モデル評価のためのメトリクス

use ndarray::{Array, ArrayD, Axis, IxDyn};

use super::{AsTargets, MetricOutput, MultiOutput};
use crate::error::{Error, Result};

/// 長さ1の軸を取り除く
fn squeeze(array: ArrayD<f64>) -> Result<ArrayD<f64>> {
    let shape: Vec<usize> = array.shape().iter().copied().filter(|&d| d != 1).collect();
    let squeezed = array.into_shape(IxDyn(&shape))?;
    if squeezed.ndim() == 0 {
        let len = squeezed.len();
        return Ok(squeezed.into_shape(IxDyn(&[len]))?);
    }
    Ok(squeezed)
}

/// 確率として与えられた予測値をラベルに変換
fn to_labels(y_pred: ArrayD<f64>) -> Result<ArrayD<f64>> {
    if y_pred.iter().all(|&v| v == v.trunc()) {
        return Ok(y_pred);
    }
    match y_pred.ndim() {
        1 => Ok(y_pred.mapv(|p| if p > 0.5 { 1.0 } else { 0.0 })),
        2 => {
            let labels: Vec<f64> = y_pred
                .axis_iter(Axis(0))
                .map(|row| {
                    let mut best = 0;
                    let mut best_value = f64::NEG_INFINITY;
                    for (i, &v) in row.iter().enumerate() {
                        if v > best_value {
                            best = i;
                            best_value = v;
                        }
                    }
                    best as f64
                })
                .collect();
            Ok(Array::from_shape_vec(IxDyn(&[labels.len()]), labels)?)
        }
        n => Err(Error::InvalidInput(format!(
            "probability predictions must be 1 or 2 dimensional, got {} dimensions",
            n
        ))),
    }
}

/// 正解率（Accuracy）を計算
///
/// Predictions that are not all integral are treated as probabilities: a
/// 1-D array is thresholded at 0.5, a 2-D array takes the argmax of each row.
/// `multioutput` has no effect.
///
/// # Returns
/// * `Result<MetricOutput>` - 正解率（0.0〜1.0）
pub fn accuracy<A, B>(y_true: &A, y_pred: &B, _multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let y_true = squeeze(y_true.to_targets()?)?;
    let y_pred = to_labels(squeeze(y_pred.to_targets()?)?)?;

    if y_true.is_empty() {
        return Err(Error::InvalidOperation(
            "Cannot compute accuracy of empty data".to_string(),
        ));
    }
    if y_true.shape() != y_pred.shape() {
        return Err(Error::DimensionMismatch(format!(
            "y_true and y_pred have different shapes ({:?}!={:?})",
            y_true.shape(),
            y_pred.shape()
        )));
    }

    let total = y_true.len_of(Axis(0));
    let correct = y_true
        .axis_iter(Axis(0))
        .zip(y_pred.axis_iter(Axis(0)))
        .filter(|(t, p)| t == p)
        .count();

    Ok(MetricOutput::Scalar(correct as f64 / total as f64))
}
