//! Classification accuracy variants and whole-dataset statistics.

use std::collections::BTreeMap;

use burn::tensor::{backend::Backend, Tensor};
use burn_extra_ops::TensorExtraOps;
use tracing::{debug, warn};

use super::{
    generic::ConfusionMatrix,
    utils::{average_ranks, mean, ChannelData},
    MetricValue,
};
use crate::{
    config::{Average, EvaluationConfig, ProblemType},
    error::{MedEvalError, MedEvalResult},
};

/// Named statistics of a whole dataset, in key order.
pub type OverallStats = BTreeMap<String, MetricValue>;

/// Class decisions of `output`: argmax over the channel axis for classification
/// problems, the raw values otherwise.
fn predicted_values<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<Vec<f64>> {
    if config.problem_type() == ProblemType::Classification {
        let data = ChannelData::from_tensor(output)?;
        Ok(data.argmax().into_iter().map(|c| c as f64).collect())
    } else {
        Ok(output.into_f32_vec().into_iter().map(f64::from).collect())
    }
}

fn label_values<B: Backend, const D: usize>(label: Tensor<B, D>) -> Vec<f64> {
    label.into_f32_vec().into_iter().map(f64::from).collect()
}

fn check_lengths(predicted: &[f64], target: &[f64]) -> MedEvalResult<()> {
    if predicted.len() != target.len() {
        return Err(MedEvalError::shape(
            format!("{} labels", predicted.len()),
            target.len(),
        ));
    }
    if target.is_empty() {
        return Err(MedEvalError::InvalidTensorValues {
            reason: "no samples to evaluate".to_string(),
        });
    }
    Ok(())
}

/// Fraction of samples whose decision equals the label.
///
/// # Arguments
/// * `output` - Class scores `[N, C]` for classification problems, otherwise
///   predicted values with one value per label
/// * `label` - Class indices, one per sample
pub fn classification_accuracy<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    let predicted = predicted_values(output, config)?;
    let target = label_values(label);
    check_lengths(&predicted, &target)?;

    let matches = predicted
        .iter()
        .zip(&target)
        .filter(|(p, t)| p == t)
        .count();
    Ok(matches as f64 / target.len() as f64)
}

/// Mean recall over the classes present in `target`.
pub fn balanced_accuracy(predicted: &[i64], target: &[i64]) -> f64 {
    let mut per_class: BTreeMap<i64, (u64, u64)> = BTreeMap::new();
    for (&p, &t) in predicted.iter().zip(target) {
        let entry = per_class.entry(t).or_default();
        entry.1 += 1;
        if p == t {
            entry.0 += 1;
        }
    }

    let recalls = per_class
        .values()
        .map(|&(correct, total)| correct as f64 / total as f64)
        .collect::<Vec<_>>();
    mean(&recalls)
}

/// Balanced accuracy of an output / label pair.
pub fn balanced_acc_score<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    let predicted = predicted_values(output, config)?;
    let target = label_values(label);
    check_lengths(&predicted, &target)?;

    let round = |values: &[f64]| values.iter().map(|v| v.round() as i64).collect::<Vec<_>>();
    Ok(balanced_accuracy(&round(&predicted), &round(&target)))
}

/// Per-class agreement of one-hot decisions, averaged over the batch.
///
/// For classification problems every class scores the fraction of samples where
/// "predicted as this class" equals "labelled as this class". Other problem types
/// fall back to [`balanced_acc_score`].
pub fn per_label_accuracy<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<MetricValue> {
    if config.problem_type() != ProblemType::Classification {
        return Ok(MetricValue::Scalar(balanced_acc_score(output, label, config)?));
    }

    let data = ChannelData::from_tensor(output)?;
    let num_classes = match config.num_classes() {
        0 => {
            warn!(
                channels = data.channels(),
                "no class list configured, taking the class count from the output channels"
            );
            data.channels()
        }
        n => n,
    };
    let predicted = data.argmax();
    let target = label_values(label);
    if predicted.len() != target.len() {
        return Err(MedEvalError::shape(
            format!("{} labels", predicted.len()),
            target.len(),
        ));
    }

    let samples = predicted.len().max(1) as f64;
    let scores = (0..num_classes as i64)
        .map(|class| {
            let agreeing = predicted
                .iter()
                .zip(&target)
                .filter(|(&p, &t)| (p == class) == (t.round() as i64 == class))
                .count();
            agreeing as f64 / samples
        })
        .collect();

    Ok(MetricValue::PerLabel(scores))
}

/// Macro one-vs-rest area under the ROC curve of hard class decisions.
///
/// Classes without both positive and negative targets are skipped; when no class
/// qualifies the score is 0.5.
pub fn macro_auroc(predicted: &[i64], target: &[i64], num_classes: usize) -> f64 {
    let scores = (0..num_classes as i64)
        .filter_map(|class| {
            let scores = predicted
                .iter()
                .map(|&p| if p == class { 1.0 } else { 0.0 })
                .collect::<Vec<_>>();
            let positives = target.iter().filter(|&&t| t == class).count();
            let negatives = target.len() - positives;
            if positives == 0 || negatives == 0 {
                return None;
            }

            // Mann-Whitney U from average ranks
            let ranks = average_ranks(&scores);
            let positive_rank_sum = ranks
                .iter()
                .zip(target)
                .filter(|(_, &t)| t == class)
                .map(|(rank, _)| rank)
                .sum::<f64>();
            let p = positives as f64;
            let u = positive_rank_sum - p * (p + 1.0) / 2.0;
            Some(u / (p * negatives as f64))
        })
        .collect::<Vec<_>>();

    if scores.is_empty() {
        0.5
    } else {
        mean(&scores)
    }
}

/// Whole-dataset statistics of predictions against ground truth.
///
/// Classification problems report `accuracy`, `precision`, `recall`, `f1` and
/// `specificity` for every averaging mode (suffixes `_global`, `_per_class`,
/// `_per_class_average`, `_per_class_weighted`), `balanced_accuracy` and `aucroc`.
/// Regression problems report `cosinesimilarity`, `mse`, `mae`, `msle`, `pearson` and
/// `spearman`.
///
/// # Errors
///
/// Returns an error for empty or mismatched inputs, or for problem types other than
/// classification and regression.
pub fn overall_stats(
    predictions: &[f64],
    ground_truth: &[f64],
    config: &EvaluationConfig,
) -> MedEvalResult<OverallStats> {
    check_lengths(predictions, ground_truth)?;
    let problem_type = config.problem_type();
    debug!(samples = predictions.len(), %problem_type, "computing overall statistics");

    match problem_type {
        ProblemType::Classification => classification_stats(predictions, ground_truth, config),
        ProblemType::Regression => Ok(regression_stats(predictions, ground_truth)),
        other => Err(MedEvalError::MetricNotApplicable {
            metric: "overall_stats".to_string(),
            problem_type: other.to_string(),
        }),
    }
}

fn classification_stats(
    predictions: &[f64],
    ground_truth: &[f64],
    config: &EvaluationConfig,
) -> MedEvalResult<OverallStats> {
    let predicted = predictions.iter().map(|v| v.round() as i64).collect::<Vec<_>>();
    let target = ground_truth.iter().map(|v| v.round() as i64).collect::<Vec<_>>();

    let num_classes = match config.num_classes() {
        0 => {
            let inferred = predicted
                .iter()
                .chain(&target)
                .copied()
                .max()
                .map_or(0, |max| (max + 1).max(0) as usize);
            warn!(
                classes = inferred,
                "no class list configured, taking the class count from the largest label"
            );
            inferred
        }
        n => n,
    };
    let matrix = ConfusionMatrix::new(&predicted, &target, num_classes)?;

    let mut stats = OverallStats::new();
    let scores: [(&str, fn(&ConfusionMatrix, Average) -> MetricValue); 5] = [
        ("accuracy", ConfusionMatrix::accuracy),
        ("precision", ConfusionMatrix::precision),
        ("recall", ConfusionMatrix::recall),
        ("f1", ConfusionMatrix::f1),
        ("specificity", ConfusionMatrix::specificity),
    ];
    for (name, score) in scores {
        for average in Average::ALL {
            stats.insert(
                format!("{name}_{}", average.report_suffix()),
                score(&matrix, average),
            );
        }
    }

    stats.insert(
        "balanced_accuracy".to_string(),
        MetricValue::Scalar(balanced_accuracy(&predicted, &target)),
    );
    stats.insert(
        "aucroc".to_string(),
        MetricValue::Scalar(macro_auroc(&predicted, &target, num_classes)),
    );

    Ok(stats)
}

fn regression_stats(predictions: &[f64], ground_truth: &[f64]) -> OverallStats {
    let n = predictions.len() as f64;
    let pairs = || predictions.iter().zip(ground_truth);

    let dot = pairs().map(|(p, t)| p * t).sum::<f64>();
    let norm = |values: &[f64]| values.iter().map(|v| v * v).sum::<f64>().sqrt();
    let cosine = safe_ratio(dot, norm(predictions) * norm(ground_truth));

    let mse = pairs().map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n;
    let mae = pairs().map(|(p, t)| (p - t).abs()).sum::<f64>() / n;
    let msle = pairs()
        .map(|(p, t)| (p.ln_1p() - t.ln_1p()).powi(2))
        .sum::<f64>()
        / n;

    let pearson = pearson(predictions, ground_truth);
    let spearman = pearson_ranks(predictions, ground_truth);

    [
        ("cosinesimilarity", cosine),
        ("mse", mse),
        ("mae", mae),
        ("msle", msle),
        ("pearson", pearson),
        ("spearman", spearman),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), MetricValue::Scalar(value)))
    .collect()
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Pearson correlation coefficient; 0 when either input is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let mean_x = mean(x);
    let mean_y = mean(y);
    let (mut covariance, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        covariance += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    safe_ratio(covariance, (var_x * var_y).sqrt())
}

fn pearson_ranks(x: &[f64], y: &[f64]) -> f64 {
    pearson(&average_ranks(x), &average_ranks(y))
}
