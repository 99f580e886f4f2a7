//! Loss functions for medical image models.
//!
//! This module implements the overlap-based segmentation losses (Dice, Matthews
//! correlation, Tversky, focal) and the cross-entropy and regression losses, together
//! with [`LossFunction`], which maps loss names used in configuration files to their
//! implementations.

pub mod regression;
pub mod segmentation;

use std::{fmt, str::FromStr};

use burn::tensor::{backend::Backend, Tensor};
use burn_extra_ops::one_hot;

// Re-export loss functions and their configs
pub use regression::{
    binary_cross_entropy, binary_cross_entropy_with_logits, categorical_cross_entropy,
    BinaryLossKind, CrossEntropyLoss, CrossEntropyLossConfig, L1Loss, L1LossConfig, MseLoss,
    MseLossConfig,
};
pub use segmentation::{
    dice, generic_loss_calculator, kullback_leibler_divergence, mcc, tversky_loss, FocalLoss,
    FocalLossConfig, LossType, MultiClassDiceLoss, MultiClassDiceLossConfig, MultiClassMccLoss,
    MultiClassMccLossConfig, MultiClassTverskyLoss, MultiClassTverskyLossConfig,
};

use crate::{
    config::{ClassLabel, EvaluationConfig},
    error::{MedEvalError, MedEvalResult},
};

/// A loss selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossFunction {
    /// Multi-class Dice loss.
    Dice,
    /// Multi-class Dice loss in log form.
    DiceLog,
    /// Multi-class Matthews correlation loss.
    Mcc,
    /// Multi-class Matthews correlation loss in log form.
    MccLog,
    /// Multi-class Tversky loss.
    Tversky,
    /// Focal loss on logits.
    Focal,
    /// Softmax cross-entropy against class indices.
    Cel,
    /// Binary cross-entropy on probabilities.
    Ce,
    /// Binary cross-entropy on logits.
    CeLogits,
    /// Per-class binary cross-entropy on probabilities.
    Cce,
    /// Per-class binary cross-entropy on logits.
    CceLogits,
    /// Mean absolute error.
    L1,
    /// Mean squared error.
    Mse,
}

impl LossFunction {
    /// Every loss, in listing order.
    pub const ALL: [Self; 13] = [
        Self::Dice,
        Self::DiceLog,
        Self::Mcc,
        Self::MccLog,
        Self::Tversky,
        Self::Focal,
        Self::Cel,
        Self::Ce,
        Self::CeLogits,
        Self::Cce,
        Self::CceLogits,
        Self::L1,
        Self::Mse,
    ];

    /// Canonical configuration name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Dice => "dc",
            Self::DiceLog => "dc_log",
            Self::Mcc => "mcc",
            Self::MccLog => "mcc_log",
            Self::Tversky => "tversky",
            Self::Focal => "focal",
            Self::Cel => "cel",
            Self::Ce => "ce",
            Self::CeLogits => "ce_logits",
            Self::Cce => "cce",
            Self::CceLogits => "cce_logits",
            Self::L1 => "l1",
            Self::Mse => "mse",
        }
    }

    /// Computes the loss of `prediction` against `target`.
    ///
    /// Overlap losses and the focal loss expect one-hot targets `[N, C, ...]`; a label
    /// map `[N, 1, ...]` is one-hot encoded with the configured class list first.
    ///
    /// # Errors
    ///
    /// Returns an error when shapes, target values or configured weights do not fit
    /// the selected loss.
    pub fn compute<B: Backend, const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        target: Tensor<B, D>,
        config: &EvaluationConfig,
    ) -> MedEvalResult<Tensor<B, 1>> {
        let weights = config.weights.clone();
        let options = &config.loss;

        match self {
            Self::Dice | Self::DiceLog => {
                let target = encode_target(&prediction, target, &config.model.class_list)?;
                MultiClassDiceLossConfig::new()
                    .with_weights(weights)
                    .with_log(*self == Self::DiceLog)
                    .init()
                    .forward(prediction, target)
            }
            Self::Mcc | Self::MccLog => {
                let target = encode_target(&prediction, target, &config.model.class_list)?;
                MultiClassMccLossConfig::new()
                    .with_weights(weights)
                    .with_log(*self == Self::MccLog)
                    .init()
                    .forward(prediction, target)
            }
            Self::Tversky => {
                let target = encode_target(&prediction, target, &config.model.class_list)?;
                MultiClassTverskyLossConfig::new()
                    .with_alpha(options.alpha)
                    .with_beta(options.beta)
                    .with_weights(weights)
                    .init()?
                    .forward(prediction, target)
            }
            Self::Focal => {
                let target = encode_target(&prediction, target, &config.model.class_list)?;
                FocalLossConfig::new()
                    .with_gamma(options.gamma)
                    .with_size_average(options.size_average)
                    .with_weights(weights)
                    .init()
                    .forward(prediction, target)
            }
            Self::Cel => CrossEntropyLossConfig::new()
                .with_weights(weights)
                .init()
                .forward(prediction, target),
            Self::Ce => binary_cross_entropy(prediction, target),
            Self::CeLogits => binary_cross_entropy_with_logits(prediction, target),
            Self::Cce | Self::CceLogits => {
                let kind = if *self == Self::Cce {
                    BinaryLossKind::Probabilities
                } else {
                    BinaryLossKind::Logits
                };
                categorical_cross_entropy(
                    prediction,
                    target,
                    &config.model.class_list,
                    weights.as_deref(),
                    kind,
                )
            }
            Self::L1 => L1LossConfig::new()
                .with_reduction(options.reduction)
                .with_scaling_factor(options.scaling_factor)
                .init()
                .forward_per_channel(prediction, target),
            Self::Mse => MseLossConfig::new()
                .with_reduction(options.reduction)
                .with_scaling_factor(options.scaling_factor)
                .init()
                .forward_per_channel(prediction, target),
        }
    }
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossFunction {
    type Err = MedEvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dc" | "dice" => Ok(Self::Dice),
            "dc_log" | "dclog" => Ok(Self::DiceLog),
            "mcc" => Ok(Self::Mcc),
            "mcc_log" => Ok(Self::MccLog),
            "tversky" => Ok(Self::Tversky),
            "focal" => Ok(Self::Focal),
            "cel" => Ok(Self::Cel),
            "ce" => Ok(Self::Ce),
            "ce_logits" => Ok(Self::CeLogits),
            "cce" => Ok(Self::Cce),
            "cce_logits" => Ok(Self::CceLogits),
            "l1" => Ok(Self::L1),
            "mse" => Ok(Self::Mse),
            _ => Err(MedEvalError::UnsupportedLoss { name: s.to_string() }),
        }
    }
}

/// One-hot encodes a `[N, 1, ...]` label map when the prediction has several channels.
///
/// Any other target must already carry one channel per prediction channel.
pub(crate) fn encode_target<B: Backend, const D: usize>(
    prediction: &Tensor<B, D>,
    target: Tensor<B, D>,
    class_list: &[ClassLabel],
) -> MedEvalResult<Tensor<B, D>> {
    let num_channels = segmentation::channels(prediction)?;
    let target_channels = segmentation::channels(&target)?;
    if target_channels == 1 && num_channels > 1 {
        if class_list.len() != num_channels {
            return Err(MedEvalError::config(format!(
                "class list has {} entries but the prediction has {num_channels} channels",
                class_list.len()
            )));
        }
        return Ok(one_hot(target, class_list));
    }
    if target_channels != num_channels {
        return Err(MedEvalError::shape(
            format!("a label map or {num_channels} one-hot channels"),
            target.dims(),
        ));
    }
    Ok(target)
}

pub(crate) fn accumulate<B: Backend>(
    accumulated: Option<Tensor<B, 1>>,
    current: Tensor<B, 1>,
) -> Tensor<B, 1> {
    match accumulated {
        Some(total) => total + current,
        None => current,
    }
}

pub(crate) fn check_same_shape<B: Backend, const D: usize>(
    prediction: &Tensor<B, D>,
    target: &Tensor<B, D>,
) -> MedEvalResult<()> {
    if prediction.dims() != target.dims() {
        return Err(MedEvalError::shape(
            format!("{:?}", prediction.dims()),
            target.dims(),
        ));
    }
    Ok(())
}

pub(crate) fn check_class_count<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    num_class: usize,
) -> MedEvalResult<()> {
    let channels = segmentation::channels(tensor)?;
    if channels < num_class {
        return Err(MedEvalError::shape(
            format!("at least {num_class} class channels"),
            tensor.dims(),
        ));
    }
    Ok(())
}

/// Channel `class_index` of a `[N, C, ...]` tensor, flattened.
pub(crate) fn class_channel<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    class_index: usize,
) -> Tensor<B, 1> {
    tensor
        .clone()
        .narrow(1, class_index, 1)
        .flatten::<1>(0, D - 1)
}
