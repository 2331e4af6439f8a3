//! 回帰モデル評価のためのメトリクス

use ndarray::Array1;

use super::{mean, standardize_input, AsTargets, MetricOutput, MultiOutput, EPSILON};
use crate::error::{Error, Result};

fn column_mean(t: &[f64], p: &[f64], f: impl Fn(f64, f64) -> f64) -> f64 {
    t.iter().zip(p.iter()).map(|(&t, &p)| f(t, p)).sum::<f64>() / t.len() as f64
}

fn column_median(t: &[f64], p: &[f64], f: impl Fn(f64, f64) -> f64) -> f64 {
    let mut values: Vec<f64> = t.iter().zip(p.iter()).map(|(&t, &p)| f(t, p)).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn absolute_percentage(t: f64, p: f64) -> f64 {
    100.0 * ((t - p) / (t + EPSILON)).abs()
}

fn symmetric_percentage(t: f64, p: f64) -> f64 {
    100.0 * (t - p).abs() / (t.abs() + p.abs() + EPSILON)
}

/// 平均誤差（Mean Error; ME）を計算
///
/// # Arguments
/// * `y_true` - 真の値 `(n_samples, *)`
/// * `y_pred` - 予測値 `(n_samples, *)`
/// * `multioutput` - 出力が複数ある場合の集約方法
pub fn me<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_mean(t, p, |t, p| t - p));
    input.reduce(errors, multioutput)
}

/// 平均絶対誤差（Mean Absolute Error; MAE）を計算
///
/// # Arguments
/// * `y_true` - 真の値 `(n_samples, *)`
/// * `y_pred` - 予測値 `(n_samples, *)`
/// * `multioutput` - 出力が複数ある場合の集約方法
///
/// # Returns
/// * `Result<MetricOutput>` - 平均絶対誤差（0が最良）
pub fn mae<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_mean(t, p, |t, p| (t - p).abs()));
    input.reduce(errors, multioutput)
}

/// 平均二乗誤差（Mean Squared Error; MSE）を計算
///
/// # Arguments
/// * `y_true` - 真の値 `(n_samples, *)`
/// * `y_pred` - 予測値 `(n_samples, *)`
/// * `multioutput` - 出力が複数ある場合の集約方法
///
/// # Returns
/// * `Result<MetricOutput>` - 平均二乗誤差（0が最良）
pub fn mse<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| {
        column_mean(t, p, |t, p| {
            let error = t - p;
            error * error
        })
    });
    input.reduce(errors, multioutput)
}

/// 平均二乗誤差の平方根（Root Mean Squared Error; RMSE）を計算
///
/// The square root is taken after the multioutput reduction, so the result is
/// always `sqrt(mse(y_true, y_pred, multioutput))`.
pub fn rmse<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    Ok(mse(y_true, y_pred, multioutput)?.map(f64::sqrt))
}

/// 平均二乗対数誤差（Mean Squared Log Error; MSLE）を計算
///
/// Targets must be non-negative.
pub fn msle<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    if input.y_true.iter().chain(input.y_pred.iter()).any(|&v| v < 0.0) {
        return Err(Error::InvalidValue(
            "Mean Squared Logarithmic Error cannot be used when targets contain negative values."
                .to_string(),
        ));
    }
    let errors = input.per_output(|t, p| {
        column_mean(t, p, |t, p| {
            let error = t.ln_1p() - p.ln_1p();
            error * error
        })
    });
    input.reduce(errors, multioutput)
}

/// 決定係数（R^2 score）を計算
///
/// # Returns
/// * `Result<MetricOutput>` - 決定係数（1が最高、悪化すると負の値になり得る）
pub fn r2<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;

    if input.y_true.nrows() < 2 {
        log::warn!("R^2 score is not well-defined with less than two samples.");
        let nan = Array1::from_elem(input.y_true.ncols(), f64::NAN);
        return match multioutput {
            MultiOutput::RawValues => input.reduce(nan, multioutput),
            _ => Ok(MetricOutput::Scalar(f64::NAN)),
        };
    }

    // 残差平方和（residual sum of squares）
    let ss_res = input.per_output(|t, p| {
        t.iter()
            .zip(p.iter())
            .map(|(&t, &p)| (t - p) * (t - p))
            .sum::<f64>()
    });
    // 全変動（total sum of squares）
    let ss_tot = input.per_output(|t, _| {
        let y_mean = t.iter().sum::<f64>() / t.len() as f64;
        t.iter().map(|&v| (v - y_mean) * (v - y_mean)).sum::<f64>()
    });

    let scores: Array1<f64> = ss_res
        .iter()
        .zip(ss_tot.iter())
        .map(|(&res, &tot)| {
            if res == 0.0 {
                // 完全な予測
                1.0
            } else if tot == 0.0 {
                // 定数の真の値に対して誤差がある場合
                0.0
            } else {
                1.0 - res / tot
            }
        })
        .collect();

    match multioutput {
        MultiOutput::RawValues => input.reduce(scores, multioutput),
        MultiOutput::UniformAverage => Ok(MetricOutput::Scalar(mean(&scores))),
        MultiOutput::VarianceWeighted => {
            let total = ss_tot.sum();
            if total == 0.0 {
                if ss_res.iter().all(|&res| res == 0.0) {
                    Ok(MetricOutput::Scalar(1.0))
                } else {
                    Ok(MetricOutput::Scalar(0.0))
                }
            } else {
                Ok(MetricOutput::Scalar((&scores * &ss_tot).sum() / total))
            }
        }
    }
}

/// 平均パーセント誤差（Mean Percentage Error; MPE）を計算
pub fn mpe<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_mean(t, p, |t, p| 100.0 * (t - p) / (t + EPSILON)));
    input.reduce(errors, multioutput)
}

/// 平均絶対パーセント誤差（Mean Absolute Percentage Error; MAPE）を計算
pub fn mape<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_mean(t, p, absolute_percentage));
    input.reduce(errors, multioutput)
}

/// 平均二乗パーセント誤差（MSPE）を計算
///
/// Computed as the mean of squared differences, `E[(y_true - y_pred)^2]`.
pub fn mspe<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_mean(t, p, |t, p| (t - p).powi(2)));
    input.reduce(errors, multioutput)
}

/// 対称平均絶対パーセント誤差（sMAPE）を計算
pub fn smape<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_mean(t, p, symmetric_percentage));
    input.reduce(errors, multioutput)
}

/// 絶対パーセント誤差の中央値（MDAPE）を計算
pub fn mdape<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_median(t, p, absolute_percentage));
    input.reduce(errors, multioutput)
}

/// 対称絶対パーセント誤差の中央値（sMDAPE）を計算
pub fn smdape<A, B>(y_true: &A, y_pred: &B, multioutput: MultiOutput) -> Result<MetricOutput>
where
    A: AsTargets + ?Sized,
    B: AsTargets + ?Sized,
{
    let input = standardize_input(y_true, y_pred)?;
    let errors = input.per_output(|t, p| column_median(t, p, symmetric_percentage));
    input.reduce(errors, multioutput)
}
