//! Core configuration structures for evaluation.
//!
//! This module contains the configuration structures that describe the model whose
//! outputs are evaluated, together with the options of the losses and metrics.

use std::{fmt, path::Path, str::FromStr};

use burn::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::enums::{Average, ProblemType, Reduction};
use crate::error::{MedEvalError, MedEvalResult};

/// One entry of a model class list.
///
/// A class is either a single label value or a combination of label values written
/// as `"1||2"`, which merges several labels of the label map into one output channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClassLabel {
    /// A single label value.
    Single(i64),
    /// Several label values treated as one class.
    Combined(Vec<i64>),
}

impl ClassLabel {
    /// Label values that belong to this class.
    pub fn values(&self) -> &[i64] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Combined(values) => values,
        }
    }
}

impl AsRef<[i64]> for ClassLabel {
    fn as_ref(&self) -> &[i64] {
        self.values()
    }
}

impl From<i64> for ClassLabel {
    fn from(value: i64) -> Self {
        Self::Single(value)
    }
}

impl FromStr for ClassLabel {
    type Err = MedEvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split("||")
            .map(|part| {
                part.trim().parse::<i64>().map_err(|_| {
                    MedEvalError::config(format!("Invalid class label {s:?} in class list"))
                })
            })
            .collect::<MedEvalResult<Vec<_>>>()?;

        match values.as_slice() {
            [single] => Ok(Self::Single(*single)),
            _ => Ok(Self::Combined(values)),
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .values()
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>();
        f.write_str(&parts.join("||"))
    }
}

impl Serialize for ClassLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Single(value) => serializer.serialize_i64(*value),
            Self::Combined(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ClassLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLabel {
            Int(i64),
            Text(String),
        }

        match RawLabel::deserialize(deserializer)? {
            RawLabel::Int(value) => Ok(Self::Single(value)),
            RawLabel::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Architectures that produce synthesized images.
const SYNTHESIS_ARCHITECTURES: [&str; 2] = ["dcgan", "sdnet"];

/// Architecture name prefixes of per-sample classifiers.
const CLASSIFICATION_ARCHITECTURES: [&str; 7] = [
    "resnet",
    "densenet",
    "vgg",
    "efficientnet",
    "imagenet_",
    "inceptionnet",
    "brain_age",
];

/// Description of the model whose outputs are evaluated.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Architecture name, used to infer the problem type.
    #[config(default = "String::from(\"unet\")")]
    pub architecture: String,
    /// Final activation of the network (`softmax`, `sigmoid`, `none`, ...).
    #[config(default = "String::from(\"softmax\")")]
    pub final_layer: String,
    /// Classes predicted by the model, in output-channel order.
    #[config(default = "Vec::new()")]
    pub class_list: Vec<ClassLabel>,
    /// Class index excluded from validation metrics.
    #[config(default = "None")]
    pub ignore_label_validation: Option<usize>,
    /// Spatial dimensionality of the model inputs.
    #[config(default = 3)]
    pub dimension: usize,
}

impl ModelConfig {
    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.class_list.len()
    }

    /// Infers the problem type from the architecture and final layer.
    pub fn infer_problem_type(&self) -> ProblemType {
        let final_layer = self.final_layer.to_ascii_lowercase();
        let architecture = self.architecture.to_ascii_lowercase();

        if matches!(final_layer.as_str(), "none" | "linear" | "regression") {
            ProblemType::Regression
        } else if SYNTHESIS_ARCHITECTURES.contains(&architecture.as_str())
            || architecture.contains("gan")
        {
            ProblemType::Synthesis
        } else if CLASSIFICATION_ARCHITECTURES
            .iter()
            .any(|prefix| architecture.starts_with(prefix))
        {
            ProblemType::Classification
        } else {
            ProblemType::Segmentation
        }
    }
}

/// Options shared by the loss functions.
#[derive(Config, Debug)]
pub struct LossOptions {
    /// Reduction of the element-wise L1 / MSE values.
    #[config(default = "Reduction::Mean")]
    pub reduction: Reduction,
    /// Factor the target is multiplied with before L1 / MSE.
    #[config(default = 1.0)]
    pub scaling_factor: f32,
    /// Focusing parameter of the focal loss.
    #[config(default = 2.0)]
    pub gamma: f32,
    /// Average (instead of sum) the focal loss over elements.
    #[config(default = true)]
    pub size_average: bool,
    /// Tversky weight of false positives.
    #[config(default = 0.5)]
    pub alpha: f32,
    /// Tversky weight of false negatives.
    #[config(default = 0.5)]
    pub beta: f32,
}

/// Options shared by the metrics.
#[derive(Config, Debug)]
pub struct MetricOptions {
    /// Averaging mode of precision / recall / F1 / IoU / accuracy.
    #[config(default = "Average::Weighted")]
    pub average: Average,
    /// Binarisation threshold for probabilistic outputs.
    #[config(default = 0.5)]
    pub threshold: f32,
    /// Surface distance tolerance (physical units) of the normalised surface Dice.
    #[config(default = 1.0)]
    pub nsd_tolerance: f64,
    /// Percentile of the robust Hausdorff distance.
    #[config(default = 95.0)]
    pub hausdorff_percentile: f64,
    /// Gaussian window size of SSIM.
    #[config(default = 11)]
    pub ssim_window_size: usize,
    /// Gaussian window standard deviation of SSIM.
    #[config(default = 1.5)]
    pub ssim_sigma: f32,
    /// Half-width of the local normalised cross-correlation window.
    #[config(default = 2)]
    pub ncc_radius: usize,
}

/// Complete evaluation configuration.
///
/// This is the parameter set every loss and metric receives. It is loaded from a JSON
/// file via [`EvaluationConfig::load_validated`] or built with the `with_*` builders.
#[derive(Config, Debug)]
pub struct EvaluationConfig {
    /// Model description.
    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,
    /// Loss options.
    #[config(default = "LossOptions::new()")]
    pub loss: LossOptions,
    /// Metric options.
    #[config(default = "MetricOptions::new()")]
    pub metrics: MetricOptions,
    /// Explicit problem type; inferred from the model when absent.
    #[config(default = "None")]
    pub problem_type: Option<ProblemType>,
    /// Per-class penalty weights.
    #[config(default = "None")]
    pub weights: Option<Vec<f32>>,
    /// Physical voxel spacing of the evaluated subject.
    #[config(default = "None")]
    pub subject_spacing: Option<Vec<f64>>,
}

impl EvaluationConfig {
    /// Loads a JSON configuration file and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// [`EvaluationConfig::validate`] rejects it.
    pub fn load_validated(path: impl AsRef<Path>) -> MedEvalResult<Self> {
        let path = path.as_ref();
        let config = Self::load(path).map_err(|err| MedEvalError::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: format!("{err:?}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved problem type.
    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
            .unwrap_or_else(|| self.model.infer_problem_type())
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Voxel spacing for `ndim` spatial axes; missing entries default to 1.
    pub fn spacing_for(&self, ndim: usize) -> Vec<f64> {
        let mut spacing = self.subject_spacing.clone().unwrap_or_default();
        spacing.resize(ndim, 1.0);
        spacing
    }

    /// Checks logical consistency of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MedEvalError::InvalidConfiguration`] describing the first violated rule.
    pub fn validate(&self) -> MedEvalResult<()> {
        let num_classes = self.num_classes();

        if let Some(weights) = &self.weights {
            if num_classes > 0 && weights.len() != num_classes {
                return Err(MedEvalError::config(format!(
                    "Number of classes {num_classes} does not match number of weights {}",
                    weights.len()
                )));
            }
        }

        if let Some(ignore) = self.model.ignore_label_validation {
            if num_classes > 0 && ignore >= num_classes {
                return Err(MedEvalError::config(format!(
                    "ignore_label_validation {ignore} is out of range for {num_classes} classes"
                )));
            }
        }

        check_tversky_parameters(self.loss.alpha, self.loss.beta)?;

        if !(0.0..=100.0).contains(&self.metrics.hausdorff_percentile) {
            return Err(MedEvalError::config(format!(
                "Hausdorff percentile must be within [0, 100], got {}",
                self.metrics.hausdorff_percentile
            )));
        }

        if self.metrics.nsd_tolerance < 0.0 {
            return Err(MedEvalError::config(format!(
                "NSD tolerance must be non-negative, got {}",
                self.metrics.nsd_tolerance
            )));
        }

        if self.metrics.ssim_window_size == 0 || self.metrics.ssim_window_size % 2 == 0 {
            return Err(MedEvalError::config(format!(
                "SSIM window size must be a positive odd number, got {}",
                self.metrics.ssim_window_size
            )));
        }

        if let Some(spacing) = &self.subject_spacing {
            if spacing.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
                return Err(MedEvalError::config(format!(
                    "Subject spacing must be positive, got {spacing:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Validates the Tversky false-positive / false-negative weights.
pub(crate) fn check_tversky_parameters(alpha: f32, beta: f32) -> MedEvalResult<()> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(MedEvalError::config(format!("Invalid alpha value: {alpha}")));
    }
    if !(0.0..=1.0).contains(&beta) {
        return Err(MedEvalError::config(format!("Invalid beta value: {beta}")));
    }
    if !(0.0..=1.0).contains(&(alpha + beta)) {
        return Err(MedEvalError::config(format!(
            "Invalid alpha and beta values: {alpha}, {beta}"
        )));
    }
    Ok(())
}
