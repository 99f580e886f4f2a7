//! Confusion-matrix metrics with configurable averaging.
//!
//! Outputs with several channels are argmaxed over the channel axis; single-channel
//! outputs and labels are read as class indices.

use burn::tensor::{backend::Backend, Tensor};
use tracing::warn;

use super::{
    utils::{mean, ChannelData},
    MetricValue,
};
use crate::{
    config::{Average, EvaluationConfig},
    error::{MedEvalError, MedEvalResult},
};

/// Multi-class confusion matrix; rows are targets, columns are predictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<u64>>,
}

/// Per-class confusion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ClassCounts {
    tp: f64,
    fp: f64,
    fn_: f64,
    tn: f64,
}

impl ConfusionMatrix {
    /// Builds the matrix from class decisions.
    ///
    /// # Errors
    ///
    /// Returns an error when the slices differ in length or hold a class outside
    /// `[0, num_classes)`.
    pub fn new(predicted: &[i64], target: &[i64], num_classes: usize) -> MedEvalResult<Self> {
        if predicted.len() != target.len() {
            return Err(MedEvalError::shape(
                format!("{} class decisions", target.len()),
                predicted.len(),
            ));
        }

        let mut counts = vec![vec![0; num_classes]; num_classes];
        for (&p, &t) in predicted.iter().zip(target) {
            let in_range = |c: i64| c >= 0 && (c as usize) < num_classes;
            if !in_range(p) || !in_range(t) {
                return Err(MedEvalError::InvalidTensorValues {
                    reason: format!(
                        "class pair ({p}, {t}) outside [0, {num_classes})"
                    ),
                });
            }
            counts[t as usize][p as usize] += 1;
        }

        Ok(Self { counts })
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    fn class_counts(&self, class: usize) -> ClassCounts {
        let tp = self.counts[class][class];
        let row = self.counts[class].iter().sum::<u64>();
        let column = self.counts.iter().map(|row| row[class]).sum::<u64>();
        let fp = column - tp;
        let fn_ = row - tp;
        ClassCounts {
            tp: tp as f64,
            fp: fp as f64,
            fn_: fn_ as f64,
            tn: (self.total() - tp - fp - fn_) as f64,
        }
    }

    /// Number of target samples of `class`.
    pub fn support(&self, class: usize) -> u64 {
        self.counts[class].iter().sum()
    }

    fn score(&self, average: Average, per_class: fn(ClassCounts) -> f64) -> MetricValue {
        let classes = 0..self.num_classes();
        match average {
            Average::Micro => {
                let pooled = classes.fold(ClassCounts::default(), |acc, class| {
                    let counts = self.class_counts(class);
                    ClassCounts {
                        tp: acc.tp + counts.tp,
                        fp: acc.fp + counts.fp,
                        fn_: acc.fn_ + counts.fn_,
                        tn: acc.tn + counts.tn,
                    }
                });
                MetricValue::Scalar(per_class(pooled))
            }
            Average::None => MetricValue::PerLabel(
                classes.map(|class| per_class(self.class_counts(class))).collect(),
            ),
            Average::Macro => MetricValue::Scalar(mean(
                &classes
                    .map(|class| per_class(self.class_counts(class)))
                    .collect::<Vec<_>>(),
            )),
            Average::Weighted => {
                let total = self.total() as f64;
                if total == 0.0 {
                    return MetricValue::Scalar(0.0);
                }
                MetricValue::Scalar(
                    classes
                        .map(|class| {
                            per_class(self.class_counts(class)) * self.support(class) as f64
                        })
                        .sum::<f64>()
                        / total,
                )
            }
        }
    }

    /// `TP / (TP + FP)`
    pub fn precision(&self, average: Average) -> MetricValue {
        self.score(average, |c| safe_divide(c.tp, c.tp + c.fp))
    }

    /// `TP / (TP + FN)`
    pub fn recall(&self, average: Average) -> MetricValue {
        self.score(average, |c| safe_divide(c.tp, c.tp + c.fn_))
    }

    /// `2 TP / (2 TP + FP + FN)`
    pub fn f1(&self, average: Average) -> MetricValue {
        self.score(average, |c| safe_divide(2.0 * c.tp, 2.0 * c.tp + c.fp + c.fn_))
    }

    /// `TP / (TP + FP + FN)`
    pub fn iou(&self, average: Average) -> MetricValue {
        self.score(average, |c| safe_divide(c.tp, c.tp + c.fp + c.fn_))
    }

    /// Multi-class accuracy: the fraction of each class's targets predicted
    /// correctly. Its micro average is the overall fraction of correct decisions.
    pub fn accuracy(&self, average: Average) -> MetricValue {
        self.score(average, |c| safe_divide(c.tp, c.tp + c.fn_))
    }

    /// `TN / (TN + FP)`
    pub fn specificity(&self, average: Average) -> MetricValue {
        self.score(average, |c| safe_divide(c.tn, c.tn + c.fp))
    }
}

fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Builds the confusion matrix of an output / label pair.
///
/// The class count is the configured class list length, or the number of output
/// channels when the class list is empty.
pub fn confusion_matrix<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<ConfusionMatrix> {
    let prediction = ChannelData::from_tensor(output)?;
    let target = ChannelData::from_tensor(label)?;

    let num_classes = match config.num_classes() {
        0 => {
            warn!(
                channels = prediction.channels(),
                "no class list configured, taking the class count from the output channels"
            );
            prediction.channels()
        }
        n => n,
    };
    ConfusionMatrix::new(&prediction.class_indices(), &target.class_indices(), num_classes)
}

/// Recall with the configured averaging.
pub fn recall_score<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<MetricValue> {
    Ok(confusion_matrix(output, label, config)?.recall(config.metrics.average))
}

/// Precision with the configured averaging.
pub fn precision_score<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<MetricValue> {
    Ok(confusion_matrix(output, label, config)?.precision(config.metrics.average))
}

/// Intersection over union with the configured averaging.
pub fn iou_score<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<MetricValue> {
    Ok(confusion_matrix(output, label, config)?.iou(config.metrics.average))
}

/// F1 score with the configured averaging.
pub fn f1_score<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<MetricValue> {
    Ok(confusion_matrix(output, label, config)?.f1(config.metrics.average))
}

/// Accuracy with the configured averaging.
pub fn accuracy<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<MetricValue> {
    Ok(confusion_matrix(output, label, config)?.accuracy(config.metrics.average))
}
