//! Cross-entropy and regression losses.

use burn::{
    module::Ignored,
    prelude::*,
    tensor::{activation, backend::Backend, ElementConversion, Int, Tensor},
};
use burn_extra_ops::TensorExtraOps;

use super::{accumulate, check_same_shape, class_channel, encode_target, segmentation::channels};
use crate::{
    config::{ClassLabel, Reduction},
    error::{MedEvalError, MedEvalResult},
};

/// Configuration for the softmax cross-entropy loss.
#[derive(Config, Debug)]
pub struct CrossEntropyLossConfig {
    /// Per-class weights; the count must equal the number of classes.
    #[config(default = "None")]
    pub weights: Option<Vec<f32>>,
}

/// Softmax cross-entropy against class indices (`CEL`).
#[derive(Module, Clone, Debug)]
pub struct CrossEntropyLoss {
    pub weights: Option<Vec<f32>>,
}

impl CrossEntropyLossConfig {
    /// Initialize a new cross-entropy loss with the given configuration.
    pub fn init(&self) -> CrossEntropyLoss {
        CrossEntropyLoss {
            weights: self.weights.clone(),
        }
    }
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        CrossEntropyLossConfig::new().init()
    }
}

impl CrossEntropyLoss {
    /// Calculate the loss of logits `[N, C, ...]` against a class index map
    /// `[N, 1, ...]`.
    ///
    /// The target's singleton channel is squeezed, so classification targets may be
    /// given as `[N, 1]`.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        let num_classes = channels(&logits)?;
        let logit_dims = logits.dims();
        let target_dims = target.dims();

        let mut expected = logit_dims;
        expected[1] = 1;
        if target_dims != expected {
            return Err(MedEvalError::shape(format!("{expected:?}"), target_dims));
        }
        if num_classes == 0 {
            return Err(MedEvalError::shape("at least one class channel", logit_dims));
        }

        let rows = logit_dims.iter().product::<usize>() / num_classes;
        let logits = logits.swap_dims(1, D - 1).reshape([rows, num_classes]);
        let targets = target.swap_dims(1, D - 1).reshape([rows]);

        self.forward_classes(logits, targets)
    }

    /// Calculate the loss of logits `[M, C]` against `M` class indices stored as
    /// floats.
    pub fn forward_classes<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        let [rows, num_classes] = logits.dims();
        if targets.dims() != [rows] {
            return Err(MedEvalError::shape(format!("[{rows}]"), targets.dims()));
        }

        let invalid = targets
            .clone()
            .into_f32_vec()
            .into_iter()
            .find(|&t| t < 0.0 || t.fract() != 0.0 || t as usize >= num_classes);
        if let Some(value) = invalid {
            return Err(MedEvalError::InvalidTensorValues {
                reason: format!("class index {value} outside [0, {num_classes})"),
            });
        }

        let device = logits.device();
        let targets: Tensor<B, 1, Int> = targets.int();
        let log_probs = activation::log_softmax(logits, 1);
        let nll = log_probs
            .gather(1, targets.clone().unsqueeze_dim::<2>(1))
            .reshape([rows])
            .neg();

        match &self.weights {
            Some(weights) => {
                if weights.len() != num_classes {
                    return Err(MedEvalError::config(format!(
                        "Number of classes {num_classes} does not match number of weights {}",
                        weights.len()
                    )));
                }
                let class_weights = Tensor::<B, 1>::from_floats(weights.as_slice(), &device);
                let sample_weights = class_weights.gather(0, targets);
                Ok((nll * sample_weights.clone()).sum() / sample_weights.sum())
            }
            None => Ok(nll.mean()),
        }
    }
}

/// Binary cross-entropy on probabilities (`CE`).
///
/// Logarithms are clamped at -100. Targets must be binary.
pub fn binary_cross_entropy<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    target: Tensor<B, D>,
) -> MedEvalResult<Tensor<B, 1>> {
    check_same_shape(&input, &target)?;
    check_binary(&target)?;

    let log_clamp_min = (-100.0_f32).elem::<B::FloatElem>();
    let input = input.flatten::<1>(0, D - 1);
    let target = target.flatten::<1>(0, D - 1);

    let log_input = input.clone().log().clamp_min(log_clamp_min);
    let log_one_minus_input = input.neg().add_scalar(1.0).log().clamp_min(log_clamp_min);

    // L = -(y * log(x) + (1 - y) * log(1 - x))
    let loss = (target.clone() * log_input
        + target.neg().add_scalar(1.0) * log_one_minus_input)
        .neg();
    Ok(loss.mean())
}

/// Binary cross-entropy on logits (`CE_Logits`).
///
/// Uses `max(x, 0) - x * y + ln(1 + exp(-|x|))`. Targets must be binary.
pub fn binary_cross_entropy_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    target: Tensor<B, D>,
) -> MedEvalResult<Tensor<B, 1>> {
    check_same_shape(&logits, &target)?;
    check_binary(&target)?;

    let x = logits.flatten::<1>(0, D - 1);
    let y = target.flatten::<1>(0, D - 1);

    let loss = x.clone().clamp_min(0.0) - x.clone() * y + x.abs().neg().exp().add_scalar(1.0).log();
    Ok(loss.mean())
}

/// Per-channel binary loss used by [`categorical_cross_entropy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryLossKind {
    /// [`binary_cross_entropy`] on probabilities.
    Probabilities,
    /// [`binary_cross_entropy_with_logits`].
    Logits,
}

/// Categorical cross-entropy built from per-class binary losses (`CCE_Generic`).
///
/// # Arguments
/// * `prediction` - Per-class outputs with shape `[N, C, ...]`
/// * `target` - Label map `[N, 1, ...]`, one-hot encoded with `class_list`, or an
///   already encoded `[N, C, ...]` tensor
/// * `class_list` - Classes in channel order
/// * `weights` - Per-class weights; without weights the class losses are averaged
/// * `kind` - Binary loss applied per channel
pub fn categorical_cross_entropy<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    target: Tensor<B, D>,
    class_list: &[ClassLabel],
    weights: Option<&[f32]>,
    kind: BinaryLossKind,
) -> MedEvalResult<Tensor<B, 1>> {
    let num_classes = channels(&prediction)?;
    let target = encode_target(&prediction, target, class_list)?;
    if let Some(weights) = weights {
        if weights.len() != num_classes {
            return Err(MedEvalError::config(format!(
                "Number of classes {num_classes} does not match number of weights {}",
                weights.len()
            )));
        }
    }

    let mut accumulated = None;
    for class_index in 0..num_classes {
        let pred = class_channel(&prediction, class_index);
        let gt = class_channel(&target, class_index);
        let mut current = match kind {
            BinaryLossKind::Probabilities => binary_cross_entropy(pred, gt)?,
            BinaryLossKind::Logits => binary_cross_entropy_with_logits(pred, gt)?,
        };
        if let Some(weights) = weights {
            current = current * weights[class_index];
        }
        accumulated = Some(accumulate(accumulated, current));
    }

    let accumulated =
        accumulated.unwrap_or_else(|| Tensor::zeros([1], &prediction.device()));
    Ok(match weights {
        Some(_) => accumulated,
        None => accumulated / num_classes.max(1) as f32,
    })
}

/// Configuration for the L1 loss.
#[derive(Config, Debug)]
pub struct L1LossConfig {
    #[config(default = "Reduction::Mean")]
    pub reduction: Reduction,
    /// Factor the target is multiplied with.
    #[config(default = 1.0)]
    pub scaling_factor: f32,
}

/// Mean absolute error loss (`L1`).
#[derive(Module, Clone, Debug)]
pub struct L1Loss {
    pub reduction: Ignored<Reduction>,
    pub scaling_factor: f32,
}

impl L1LossConfig {
    /// Initialize a new L1 loss with the given configuration.
    pub fn init(&self) -> L1Loss {
        L1Loss {
            reduction: Ignored(self.reduction),
            scaling_factor: self.scaling_factor,
        }
    }
}

impl L1Loss {
    /// Calculate `|pred - scaling_factor * target|` with the configured reduction.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        check_same_shape(&pred, &target)?;
        let error = (pred - target * self.scaling_factor).abs();
        Ok(reduce(error, *self.reduction))
    }

    /// Mean of the per-channel L1 losses (`L1_loss`).
    ///
    /// A single sample is scored over the whole tensor, and that score is still
    /// divided by the channel count.
    pub fn forward_per_channel<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        per_channel(pred, target, true, |p, t| self.forward(p, t))
    }
}

/// Configuration for the mean squared error loss.
#[derive(Config, Debug)]
pub struct MseLossConfig {
    #[config(default = "Reduction::Mean")]
    pub reduction: Reduction,
    /// Factor the target is multiplied with.
    #[config(default = 1.0)]
    pub scaling_factor: f32,
}

/// Mean squared error loss (`MSE`).
#[derive(Module, Clone, Debug)]
pub struct MseLoss {
    pub reduction: Ignored<Reduction>,
    pub scaling_factor: f32,
}

impl MseLossConfig {
    /// Initialize a new MSE loss with the given configuration.
    pub fn init(&self) -> MseLoss {
        MseLoss {
            reduction: Ignored(self.reduction),
            scaling_factor: self.scaling_factor,
        }
    }
}

impl MseLoss {
    /// Calculate `(pred - scaling_factor * target)^2` with the configured reduction.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        check_same_shape(&pred, &target)?;
        let error = (pred - target * self.scaling_factor).powf_scalar(2.0);
        Ok(reduce(error, *self.reduction))
    }

    /// MSE over the whole tensor for a single sample, otherwise the mean of the
    /// per-channel MSE losses (`MSE_loss`).
    pub fn forward_per_channel<B: Backend, const D: usize>(
        &self,
        pred: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        per_channel(pred, target, false, |p, t| self.forward(p, t))
    }
}

fn reduce<B: Backend, const D: usize>(values: Tensor<B, D>, reduction: Reduction) -> Tensor<B, 1> {
    match reduction {
        Reduction::None => values.flatten::<1>(0, D - 1),
        Reduction::Mean => values.mean(),
        Reduction::Sum => values.sum(),
    }
}

/// `normalise_single_sample` divides the whole-tensor loss of a single sample by
/// the channel count as well.
fn per_channel<B, const D: usize, F>(
    pred: Tensor<B, D>,
    target: Tensor<B, D>,
    normalise_single_sample: bool,
    loss: F,
) -> MedEvalResult<Tensor<B, 1>>
where
    B: Backend,
    F: Fn(Tensor<B, D>, Tensor<B, D>) -> MedEvalResult<Tensor<B, 1>>,
{
    check_same_shape(&pred, &target)?;
    if D < 2 {
        return loss(pred, target);
    }

    let num_channels = pred.dims()[1];
    if pred.dims()[0] == 1 {
        let whole = loss(pred, target)?;
        return Ok(match normalise_single_sample {
            true => whole / num_channels.max(1) as f32,
            false => whole,
        });
    }

    let mut accumulated = None;
    for channel in 0..num_channels {
        let current = loss(
            pred.clone().narrow(1, channel, 1),
            target.clone().narrow(1, channel, 1),
        )?;
        accumulated = Some(accumulate(accumulated, current));
    }

    let accumulated = accumulated.unwrap_or_else(|| Tensor::zeros([1], &pred.device()));
    Ok(accumulated / num_channels.max(1) as f32)
}

fn check_binary<B: Backend, const D: usize>(target: &Tensor<B, D>) -> MedEvalResult<()> {
    let non_binary = target
        .clone()
        .into_f32_vec()
        .into_iter()
        .find(|&value| value != 0.0 && value != 1.0);
    match non_binary {
        Some(value) => Err(MedEvalError::InvalidTensorValues {
            reason: format!("targets must be binary, found {value}"),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_cross_entropy_matches_manual_value() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[2.0, 0.0], [0.0, 0.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[0.0], [1.0]], &device);

        let loss = CrossEntropyLossConfig::new().init();
        let value = loss.forward(logits, target).unwrap().into_scalar();

        let first = -(2.0_f32.exp() / (2.0_f32.exp() + 1.0)).ln();
        let second = 2.0_f32.ln();
        assert!((value - (first + second) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_weights_normalise_by_target_weights() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [0.0, 0.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[0.0], [1.0]], &device);

        let loss = CrossEntropyLossConfig::new()
            .with_weights(Some(vec![1.0, 3.0]))
            .init();
        let value = loss.forward(logits.clone(), target.clone()).unwrap().into_scalar();
        // Every sample has loss ln(2); the weighted mean keeps it.
        assert!((value - 2.0_f32.ln()).abs() < 1e-5);

        let wrong = CrossEntropyLossConfig::new()
            .with_weights(Some(vec![1.0]))
            .init();
        assert!(wrong.forward(logits, target).is_err());
    }

    #[test]
    fn test_cross_entropy_segmentation_layout() {
        let device = Default::default();
        // [N=1, C=2, W=2]: pixel 0 favours class 0, pixel 1 favours class 1.
        let logits = Tensor::<TestBackend, 3>::from_floats([[[5.0, 0.0], [0.0, 5.0]]], &device);
        let good = Tensor::<TestBackend, 3>::from_floats([[[0.0, 1.0]]], &device);
        let bad = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0]]], &device);

        let loss = CrossEntropyLossConfig::new().init();
        let good = loss.forward(logits.clone(), good).unwrap().into_scalar();
        let bad = loss.forward(logits, bad).unwrap().into_scalar();
        assert!(good < 0.01);
        assert!(bad > 4.0);
    }

    #[test]
    fn test_cross_entropy_rejects_out_of_range_targets() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([1, 2], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[2.0]], &device);

        let loss = CrossEntropyLossConfig::new().init();
        assert!(matches!(
            loss.forward(logits, target),
            Err(MedEvalError::InvalidTensorValues { .. })
        ));
    }

    #[test]
    fn test_bce_basic_and_binary_check() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_floats([0.5, 0.5], &device);
        let target = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);

        let value = binary_cross_entropy(input.clone(), target).unwrap().into_scalar();
        assert!((value - 2.0_f32.ln()).abs() < 1e-5);

        let soft = Tensor::<TestBackend, 1>::from_floats([0.3, 1.0], &device);
        assert!(binary_cross_entropy(input, soft).is_err());
    }

    #[test]
    fn test_bce_clamps_log() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_floats([0.0], &device);
        let target = Tensor::<TestBackend, 1>::from_floats([1.0], &device);

        let value = binary_cross_entropy(input, target).unwrap().into_scalar();
        assert!((value - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_bce_with_logits_matches_sigmoid_bce() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[-2.0, 0.5], [3.0, -0.1]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0], [1.0, 1.0]], &device);

        let with_logits = binary_cross_entropy_with_logits(logits.clone(), target.clone())
            .unwrap()
            .into_scalar();
        let plain = binary_cross_entropy(activation::sigmoid(logits), target)
            .unwrap()
            .into_scalar();
        assert!((with_logits - plain).abs() < 1e-5);
    }

    #[test]
    fn test_categorical_cross_entropy_encodes_label_map() {
        let device = Default::default();
        let prediction = Tensor::<TestBackend, 3>::from_floats(
            [[[0.9, 0.1, 0.2], [0.1, 0.9, 0.8]]],
            &device,
        );
        let labels = Tensor::<TestBackend, 3>::from_floats([[[0.0, 1.0, 1.0]]], &device);
        let one_hot_target = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 0.0, 0.0], [0.0, 1.0, 1.0]]],
            &device,
        );
        let classes = [ClassLabel::Single(0), ClassLabel::Single(1)];

        let from_labels = categorical_cross_entropy(
            prediction.clone(),
            labels,
            &classes,
            None,
            BinaryLossKind::Probabilities,
        )
        .unwrap()
        .into_scalar();
        let from_one_hot = categorical_cross_entropy(
            prediction,
            one_hot_target,
            &classes,
            None,
            BinaryLossKind::Probabilities,
        )
        .unwrap()
        .into_scalar();

        assert!(from_labels > 0.0);
        assert!((from_labels - from_one_hot).abs() < 1e-6);
    }

    #[test]
    fn test_l1_and_mse_reductions() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[0.0, 2.0], [3.0, 2.0]], &device);

        let l1 = L1LossConfig::new().init();
        assert!((l1.forward(pred.clone(), target.clone()).unwrap().into_scalar() - 0.75).abs() < 1e-6);

        let mse_sum = MseLossConfig::new()
            .with_reduction(Reduction::Sum)
            .init();
        assert!((mse_sum.forward(pred.clone(), target.clone()).unwrap().into_scalar() - 5.0).abs() < 1e-6);

        let mse_none = MseLossConfig::new()
            .with_reduction(Reduction::None)
            .init();
        assert_eq!(mse_none.forward(pred, target).unwrap().dims(), [4]);
    }

    #[test]
    fn test_scaling_factor_scales_target() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 1>::from_floats([2.0, 4.0], &device);
        let target = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0], &device);

        let mse = MseLossConfig::new()
            .with_scaling_factor(2.0)
            .init();
        assert!(mse.forward(pred, target).unwrap().into_scalar().abs() < 1e-6);
    }

    #[test]
    fn test_per_channel_mse_averages_channels() {
        let device = Default::default();
        // Batch of two, channel 0 exact, channel 1 off by 2 everywhere.
        let pred = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 1.0], [2.0, 2.0]], [[1.0, 1.0], [2.0, 2.0]]],
            &device,
        );
        let target = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 1.0], [0.0, 0.0]], [[1.0, 1.0], [0.0, 0.0]]],
            &device,
        );

        let mse = MseLossConfig::new().init();
        let value = mse.forward_per_channel(pred, target).unwrap().into_scalar();
        assert!((value - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_per_channel_l1_single_sample_divides_by_channels() {
        let device = Default::default();
        // One sample, two channels: the whole-tensor L1 of 2.0 is split over both.
        let pred = Tensor::<TestBackend, 3>::from_floats([[[1.0, 1.0], [3.0, 3.0]]], &device);
        let target = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);

        let l1 = L1LossConfig::new().init();
        let value = l1
            .forward_per_channel(pred.clone(), target.clone())
            .unwrap()
            .into_scalar();
        assert!((value - 1.0).abs() < 1e-6);

        // MSE keeps the whole-tensor value for a single sample.
        let mse = MseLossConfig::new().init();
        let value = mse.forward_per_channel(pred, target).unwrap().into_scalar();
        assert!((value - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_categorical_cross_entropy_rejects_mismatched_target_channels() {
        let device = Default::default();
        let prediction = Tensor::<TestBackend, 3>::zeros([1, 3, 2], &device);
        let target = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);
        let classes = [
            ClassLabel::Single(0),
            ClassLabel::Single(1),
            ClassLabel::Single(2),
        ];

        let result = categorical_cross_entropy(
            prediction,
            target,
            &classes,
            None,
            BinaryLossKind::Logits,
        );
        assert!(matches!(result, Err(MedEvalError::InvalidTensorShape { .. })));
    }
}
