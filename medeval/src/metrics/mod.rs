//! Metrics for medical image segmentation, classification, regression and synthesis.
//!
//! This module implements the overlap and surface-distance segmentation metrics, the
//! confusion-matrix metrics, whole-dataset classification / regression statistics and
//! the image synthesis metrics. [`MetricKind`] maps the metric names used in
//! configuration files to their implementations.

pub mod classification;
pub mod generic;
pub mod segmentation;
pub mod surface;
pub mod synthesis;
pub mod utils;

use std::{fmt, str::FromStr};

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use serde::Serialize;

pub use classification::{
    balanced_acc_score, balanced_accuracy, classification_accuracy, overall_stats,
    per_label_accuracy, OverallStats,
};
pub use generic::{accuracy, f1_score, iou_score, precision_score, recall_score, ConfusionMatrix};
pub use segmentation::{
    hd100, hd100_per_label, hd95, hd95_per_label, jaccard, multi_class_dice,
    multi_class_dice_per_label, nsd, nsd_per_label, sensitivity_specificity,
};
pub use surface::{surface_distances, SurfaceDistances};
pub use synthesis::{
    mean_absolute_error, mean_squared_error, mean_squared_log_error, ncc_max, ncc_mean, ncc_min,
    ncc_statistics, ncc_std, peak_signal_noise_ratio, root_mean_squared_error,
    structural_similarity_index, NccStatistics,
};
pub use utils::ChannelData;

use crate::{
    config::{EvaluationConfig, ProblemType},
    error::{MedEvalError, MedEvalResult},
    losses::{encode_target, CrossEntropyLossConfig, MseLossConfig},
};

/// Result of a metric: one number, or one number per class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    PerLabel(Vec<f64>),
}

impl MetricValue {
    /// The scalar value, or the mean of the per-label values.
    pub fn mean(&self) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::PerLabel(values) => utils::mean(values),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(values: Vec<f64>) -> Self {
        Self::PerLabel(values)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value:.5}"),
            Self::PerLabel(values) => {
                let parts = values.iter().map(|v| format!("{v:.5}")).collect::<Vec<_>>();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// A metric selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Dice,
    DicePerLabel,
    Accuracy,
    Mse,
    Hd95,
    Hd95PerLabel,
    Hd100,
    Hd100PerLabel,
    Cel,
    F1,
    ClassificationAccuracy,
    Precision,
    Recall,
    Iou,
    BalancedAccuracy,
    PerLabelOneHotAccuracy,
    Nsd,
    NsdPerLabel,
    Jaccard,
    Sensitivity,
    Specificity,
    Ssim,
    Psnr,
    Mae,
    NccMean,
}

impl MetricKind {
    /// Every metric name with the metric it selects; several names are aliases.
    pub const TABLE: [(&'static str, Self); 29] = [
        ("dice", Self::Dice),
        ("dice_per_label", Self::DicePerLabel),
        ("accuracy", Self::Accuracy),
        ("mse", Self::Mse),
        ("hd95", Self::Hd95),
        ("hd95_per_label", Self::Hd95PerLabel),
        ("hausdorff95", Self::Hd95),
        ("hd100", Self::Hd100),
        ("hd100_per_label", Self::Hd100PerLabel),
        ("hausdorff", Self::Hd100),
        ("hausdorff100", Self::Hd100),
        ("cel", Self::Cel),
        ("f1_score", Self::F1),
        ("f1", Self::F1),
        ("classification_accuracy", Self::ClassificationAccuracy),
        ("precision", Self::Precision),
        ("recall", Self::Recall),
        ("iou", Self::Iou),
        ("balanced_accuracy", Self::BalancedAccuracy),
        ("per_label_one_hot_accuracy", Self::PerLabelOneHotAccuracy),
        ("nsd", Self::Nsd),
        ("nsd_per_label", Self::NsdPerLabel),
        ("jaccard", Self::Jaccard),
        ("sensitivity", Self::Sensitivity),
        ("specificity", Self::Specificity),
        ("ssim", Self::Ssim),
        ("psnr", Self::Psnr),
        ("mae", Self::Mae),
        ("ncc_mean", Self::NccMean),
    ];

    /// Canonical name (the first table entry of this metric).
    pub fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, kind)| kind == self)
            .map_or("unknown", |(name, _)| *name)
    }

    /// Whether the metric needs one-hot `[N, C, spatial...]` inputs.
    const fn is_segmentation(&self) -> bool {
        matches!(
            self,
            Self::Dice
                | Self::DicePerLabel
                | Self::Hd95
                | Self::Hd95PerLabel
                | Self::Hd100
                | Self::Hd100PerLabel
                | Self::Nsd
                | Self::NsdPerLabel
                | Self::Jaccard
                | Self::Sensitivity
                | Self::Specificity
        )
    }

    /// Evaluates the metric of `output` against `label`.
    ///
    /// Segmentation metrics one-hot encode a `[N, 1, ...]` label map with the
    /// configured class list when the output has several channels. Synthesis metrics
    /// treat `label` as the reference image.
    ///
    /// # Errors
    ///
    /// Returns an error for mismatched shapes or invalid values, and
    /// [`MedEvalError::MetricNotApplicable`] when a segmentation metric receives
    /// inputs without spatial axes.
    pub fn evaluate<B: Backend, const D: usize>(
        &self,
        output: Tensor<B, D>,
        label: Tensor<B, D>,
        config: &EvaluationConfig,
    ) -> MedEvalResult<MetricValue> {
        let label = if self.is_segmentation() {
            if D < 3 {
                return Err(MedEvalError::MetricNotApplicable {
                    metric: self.name().to_string(),
                    problem_type: format!("{}D inputs", D),
                });
            }
            encode_target(&output, label, &config.model.class_list)?
        } else {
            label
        };

        let options = &config.metrics;
        let value: MetricValue = match self {
            Self::Dice => multi_class_dice(output, label, config)?.into(),
            Self::DicePerLabel => multi_class_dice_per_label(output, label, config)?.into(),
            Self::Accuracy => accuracy(output, label, config)?,
            Self::Mse => MseLossConfig::new()
                .with_reduction(config.loss.reduction)
                .with_scaling_factor(config.loss.scaling_factor)
                .init()
                .forward_per_channel(output, label)?
                .mean()
                .into_scalar()
                .elem::<f64>()
                .into(),
            Self::Hd95 => hd95(output, label, config)?.into(),
            Self::Hd95PerLabel => hd95_per_label(output, label, config)?.into(),
            Self::Hd100 => hd100(output, label, config)?.into(),
            Self::Hd100PerLabel => hd100_per_label(output, label, config)?.into(),
            Self::Cel => CrossEntropyLossConfig::new()
                .with_weights(config.weights.clone())
                .init()
                .forward(output, label)?
                .into_scalar()
                .elem::<f64>()
                .into(),
            Self::F1 => f1_score(output, label, config)?,
            Self::ClassificationAccuracy => classification_accuracy(output, label, config)?.into(),
            Self::Precision => precision_score(output, label, config)?,
            Self::Recall => recall_score(output, label, config)?,
            Self::Iou => iou_score(output, label, config)?,
            Self::BalancedAccuracy => balanced_acc_score(output, label, config)?.into(),
            Self::PerLabelOneHotAccuracy => per_label_accuracy(output, label, config)?,
            Self::Nsd => nsd(output, label, config)?.into(),
            Self::NsdPerLabel => nsd_per_label(output, label, config)?.into(),
            Self::Jaccard => jaccard(output, label, config)?.into(),
            Self::Sensitivity => sensitivity_specificity(output, label, config)?.0.into(),
            Self::Specificity => sensitivity_specificity(output, label, config)?.1.into(),
            Self::Ssim => structural_similarity_index(label, output, None, options)?.into(),
            Self::Psnr => peak_signal_noise_ratio(label, output, None)?.into(),
            Self::Mae => mean_absolute_error(label, output)?.into(),
            Self::NccMean => ncc_mean(label, output, options.ncc_radius)?.into(),
        };

        Ok(value)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = MedEvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Self::TABLE
            .iter()
            .find(|(name, _)| *name == lowered)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| MedEvalError::UnsupportedMetric { name: s.to_string() })
    }
}

/// Default metrics reported for a problem type.
pub fn metrics_for(problem_type: ProblemType) -> Vec<MetricKind> {
    match problem_type {
        ProblemType::Segmentation => vec![
            MetricKind::Dice,
            MetricKind::DicePerLabel,
            MetricKind::Hd95,
            MetricKind::Hd100,
            MetricKind::Nsd,
            MetricKind::Jaccard,
            MetricKind::Sensitivity,
            MetricKind::Specificity,
        ],
        ProblemType::Classification => vec![
            MetricKind::ClassificationAccuracy,
            MetricKind::BalancedAccuracy,
            MetricKind::Accuracy,
            MetricKind::Precision,
            MetricKind::Recall,
            MetricKind::F1,
            MetricKind::PerLabelOneHotAccuracy,
        ],
        ProblemType::Regression => vec![MetricKind::Mse, MetricKind::Mae],
        ProblemType::Synthesis => vec![
            MetricKind::Ssim,
            MetricKind::Psnr,
            MetricKind::Mse,
            MetricKind::Mae,
            MetricKind::NccMean,
        ],
    }
}
