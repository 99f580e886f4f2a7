//! Overlap-based segmentation losses.
//!
//! All losses take predictions and one-hot targets of shape `[N, C, ...]` and return a
//! differentiable scalar tensor of shape `[1]`.

use burn::{
    module::Ignored,
    prelude::*,
    tensor::{activation, backend::Backend, Tensor},
};

use super::{accumulate, check_class_count, check_same_shape, class_channel};
use crate::{
    config::check_tversky_parameters,
    error::{MedEvalError, MedEvalResult},
};

/// Smallest positive normal `f32`, added to numerator and denominator of overlap
/// scores so that two empty masks score 1.
pub const SMOOTH: f32 = f32::MIN_POSITIVE;

/// Machine epsilon of `f32`.
pub const EPSILON: f32 = f32::EPSILON;

/// Dice score between two tensors, computed over all elements.
///
/// `dice = (2 * sum(p * t) + SMOOTH) / (sum(p) + sum(t) + SMOOTH)`
pub fn dice<B: Backend, const D: usize>(predicted: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
    let predicted = predicted.flatten::<1>(0, D - 1);
    let target = target.flatten::<1>(0, D - 1);

    let intersection = (predicted.clone() * target.clone()).sum();
    (intersection * 2.0 + SMOOTH) / (predicted.sum() + target.sum() + SMOOTH)
}

/// Matthews correlation coefficient between two (soft) binary tensors.
///
/// The confusion counts are soft sums, so the score is differentiable. An epsilon on
/// the denominator keeps degenerate inputs finite.
pub fn mcc<B: Backend, const D: usize>(predictions: Tensor<B, D>, targets: Tensor<B, D>) -> Tensor<B, 1> {
    let p = predictions.flatten::<1>(0, D - 1);
    let t = targets.flatten::<1>(0, D - 1);
    let not_p = p.clone().neg().add_scalar(1.0);
    let not_t = t.clone().neg().add_scalar(1.0);

    let tp = (p.clone() * t.clone()).sum();
    let tn = (not_p.clone() * not_t.clone()).sum();
    let fp = (p * not_t).sum();
    let fn_ = (not_p * t).sum();

    let numerator = tp.clone() * tn.clone() - fp.clone() * fn_.clone();
    let denominator = ((tp.clone() + fp.clone())
        * (tp + fn_.clone())
        * (tn.clone() + fp)
        * (tn + fn_))
        .sqrt()
        + EPSILON;

    numerator / denominator
}

/// How a per-class score is turned into a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossType {
    /// `1 - score`
    Plain,
    /// `-ln(score + EPSILON)`
    Log,
}

/// Accumulates a per-class overlap loss over the class channels.
///
/// # Arguments
/// * `predicted` - Predictions with shape `[N, C, ...]`
/// * `target` - One-hot targets with shape `[N, C, ...]`
/// * `num_class` - Number of classes (including the background class)
/// * `criterion` - Overlap score of one class channel
/// * `weights` - Per-class penalty weights
/// * `ignore_class` - Class excluded from the loss
/// * `loss_type` - Conversion from score to loss
///
/// # Returns
/// The weighted sum of the per-class losses when weights are given, otherwise their
/// sum divided by `num_class`.
pub fn generic_loss_calculator<B, const D: usize, F>(
    predicted: Tensor<B, D>,
    target: Tensor<B, D>,
    num_class: usize,
    criterion: F,
    weights: Option<&[f32]>,
    ignore_class: Option<usize>,
    loss_type: LossType,
) -> MedEvalResult<Tensor<B, 1>>
where
    B: Backend,
    F: Fn(Tensor<B, 1>, Tensor<B, 1>) -> Tensor<B, 1>,
{
    check_same_shape(&predicted, &target)?;
    check_class_count(&predicted, num_class)?;
    if let Some(weights) = weights {
        if weights.len() < num_class {
            return Err(MedEvalError::config(format!(
                "Expected {num_class} class weights, got {}",
                weights.len()
            )));
        }
    }

    let device = predicted.device();
    let mut accumulated_loss = None;

    for class_index in (0..num_class).filter(|&c| Some(c) != ignore_class) {
        let score = criterion(
            class_channel(&predicted, class_index),
            class_channel(&target, class_index),
        );

        let mut current_loss = match loss_type {
            LossType::Plain => score.neg().add_scalar(1.0),
            LossType::Log => score.add_scalar(EPSILON).log().neg(),
        };

        if let Some(weights) = weights {
            current_loss = current_loss * weights[class_index];
        }

        accumulated_loss = Some(accumulate(accumulated_loss, current_loss));
    }

    let accumulated_loss = accumulated_loss.unwrap_or_else(|| Tensor::zeros([1], &device));

    Ok(match weights {
        Some(_) => accumulated_loss,
        None => accumulated_loss / num_class.max(1) as f32,
    })
}

/// Configuration for the multi-class Dice loss.
#[derive(Config, Debug)]
pub struct MultiClassDiceLossConfig {
    /// Per-class penalty weights.
    #[config(default = "None")]
    pub weights: Option<Vec<f32>>,
    /// Use `-ln(dice)` instead of `1 - dice`.
    #[config(default = false)]
    pub log: bool,
}

/// Multi-class Dice loss (`MCD` / `MCD log`).
#[derive(Module, Clone, Debug)]
pub struct MultiClassDiceLoss {
    pub weights: Option<Vec<f32>>,
    pub loss_type: Ignored<LossType>,
}

impl MultiClassDiceLossConfig {
    /// Initialize a new multi-class Dice loss with the given configuration.
    pub fn init(&self) -> MultiClassDiceLoss {
        MultiClassDiceLoss {
            weights: self.weights.clone(),
            loss_type: Ignored(if self.log { LossType::Log } else { LossType::Plain }),
        }
    }
}

impl MultiClassDiceLoss {
    /// Calculate the loss over all channels of `predicted` (`[N, C, ...]`).
    pub fn forward<B: Backend, const D: usize>(
        &self,
        predicted: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        let num_class = channels(&predicted)?;
        generic_loss_calculator(
            predicted,
            target,
            num_class,
            dice,
            self.weights.as_deref(),
            None,
            *self.loss_type,
        )
    }
}

/// Configuration for the multi-class Matthews correlation loss.
#[derive(Config, Debug)]
pub struct MultiClassMccLossConfig {
    /// Per-class penalty weights.
    #[config(default = "None")]
    pub weights: Option<Vec<f32>>,
    /// Use `-ln(mcc)` instead of `1 - mcc`.
    #[config(default = false)]
    pub log: bool,
}

/// Multi-class Matthews correlation loss (`MCC` / `MCC log`).
#[derive(Module, Clone, Debug)]
pub struct MultiClassMccLoss {
    pub weights: Option<Vec<f32>>,
    pub loss_type: Ignored<LossType>,
}

impl MultiClassMccLossConfig {
    /// Initialize a new multi-class MCC loss with the given configuration.
    pub fn init(&self) -> MultiClassMccLoss {
        MultiClassMccLoss {
            weights: self.weights.clone(),
            loss_type: Ignored(if self.log { LossType::Log } else { LossType::Plain }),
        }
    }
}

impl MultiClassMccLoss {
    /// Calculate the loss over all channels of `predicted` (`[N, C, ...]`).
    pub fn forward<B: Backend, const D: usize>(
        &self,
        predicted: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        let num_class = channels(&predicted)?;
        generic_loss_calculator(
            predicted,
            target,
            num_class,
            mcc,
            self.weights.as_deref(),
            None,
            *self.loss_type,
        )
    }
}

/// Tversky loss of a single channel.
///
/// `1 - TP / (TP + alpha * FP + beta * FN)` with soft counts.
///
/// # Errors
///
/// Returns an error unless `0 <= alpha, beta, alpha + beta <= 1`.
pub fn tversky_loss<B: Backend, const D: usize>(
    predicted: Tensor<B, D>,
    target: Tensor<B, D>,
    alpha: f32,
    beta: f32,
) -> MedEvalResult<Tensor<B, 1>> {
    check_tversky_parameters(alpha, beta)?;
    check_same_shape(&predicted, &target)?;

    let predicted = predicted.flatten::<1>(0, D - 1);
    let target = target.flatten::<1>(0, D - 1);

    let true_positives = (predicted.clone() * target.clone()).sum();
    let false_positives = (target.clone().neg().add_scalar(1.0) * predicted.clone()).sum();
    let false_negatives = (target * predicted.neg().add_scalar(1.0)).sum();

    let denominator =
        true_positives.clone() + false_positives * alpha + false_negatives * beta;
    let score = (true_positives + SMOOTH) / (denominator + SMOOTH);

    Ok(score.neg().add_scalar(1.0))
}

/// Configuration for the multi-class Tversky loss.
#[derive(Config, Debug)]
pub struct MultiClassTverskyLossConfig {
    /// Weight of false positives.
    #[config(default = 0.5)]
    pub alpha: f32,
    /// Weight of false negatives.
    #[config(default = 0.5)]
    pub beta: f32,
    /// Per-class penalty weights.
    #[config(default = "None")]
    pub weights: Option<Vec<f32>>,
}

/// Multi-class Tversky loss (`MCT`).
#[derive(Module, Clone, Debug)]
pub struct MultiClassTverskyLoss {
    pub alpha: f32,
    pub beta: f32,
    pub weights: Option<Vec<f32>>,
}

impl MultiClassTverskyLossConfig {
    /// Initialize a new multi-class Tversky loss, validating alpha and beta.
    ///
    /// # Errors
    ///
    /// Returns an error unless `0 <= alpha, beta, alpha + beta <= 1`.
    pub fn init(&self) -> MedEvalResult<MultiClassTverskyLoss> {
        check_tversky_parameters(self.alpha, self.beta)?;
        Ok(MultiClassTverskyLoss {
            alpha: self.alpha,
            beta: self.beta,
            weights: self.weights.clone(),
        })
    }
}

impl MultiClassTverskyLoss {
    /// Calculate the loss over all channels of `predicted` (`[N, C, ...]`).
    ///
    /// Per-class losses are weighted and summed when weights are given, otherwise
    /// averaged.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        predicted: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        check_same_shape(&predicted, &target)?;
        let num_classes = channels(&predicted)?;
        if let Some(weights) = &self.weights {
            check_weight_count(weights, num_classes)?;
        }

        let mut accumulated = None;
        for class_index in 0..num_classes {
            let mut current = tversky_loss(
                class_channel(&predicted, class_index),
                class_channel(&target, class_index),
                self.alpha,
                self.beta,
            )?;
            if let Some(weights) = &self.weights {
                current = current * weights[class_index];
            }
            accumulated = Some(accumulate(accumulated, current));
        }

        let accumulated = accumulated.unwrap_or_else(|| Tensor::zeros([1], &predicted.device()));
        Ok(match self.weights {
            Some(_) => accumulated,
            None => accumulated / num_classes as f32,
        })
    }
}

/// Configuration for the focal loss.
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Focusing parameter; `0` reduces to cross-entropy.
    #[config(default = 2.0)]
    pub gamma: f32,
    /// Average over elements instead of summing.
    #[config(default = true)]
    pub size_average: bool,
    /// Per-class penalty weights.
    #[config(default = "None")]
    pub weights: Option<Vec<f32>>,
}

/// Multi-class focal loss.
///
/// For class `c` the element-wise cross-entropy is `logpt = -t_c * log_softmax(x)_c`,
/// `pt = exp(-logpt)` and the focal term is `(1 - pt)^gamma * logpt`. The per-class
/// terms are reduced (mean or sum), weighted and summed over the classes.
#[derive(Module, Clone, Debug)]
pub struct FocalLoss {
    pub gamma: f32,
    pub size_average: bool,
    pub weights: Option<Vec<f32>>,
}

impl FocalLossConfig {
    /// Initialize a new focal loss with the given configuration.
    pub fn init(&self) -> FocalLoss {
        FocalLoss {
            gamma: self.gamma,
            size_average: self.size_average,
            weights: self.weights.clone(),
        }
    }
}

impl FocalLoss {
    /// Calculate the focal loss.
    ///
    /// # Arguments
    /// * `logits` - Raw network outputs with shape `[N, C, ...]`
    /// * `target` - One-hot targets with shape `[N, C, ...]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> MedEvalResult<Tensor<B, 1>> {
        check_same_shape(&logits, &target)?;
        let num_classes = channels(&logits)?;
        if let Some(weights) = &self.weights {
            check_weight_count(weights, num_classes)?;
        }

        let log_probs = activation::log_softmax(logits, 1);
        let mut accumulated = None;

        for class_index in 0..num_classes {
            let logpt = (class_channel(&log_probs, class_index)
                * class_channel(&target, class_index))
            .neg();
            let pt = logpt.clone().neg().exp();
            let focal = pt.neg().add_scalar(1.0).powf_scalar(self.gamma) * logpt;

            let mut current = if self.size_average {
                focal.mean()
            } else {
                focal.sum()
            };
            if let Some(weights) = &self.weights {
                current = current * weights[class_index];
            }
            accumulated = Some(accumulate(accumulated, current));
        }

        Ok(accumulated.unwrap_or_else(|| Tensor::zeros([1], &target.device())))
    }
}

/// Kullback-Leibler divergence of `N(mu, exp(logvar))` from the standard normal.
///
/// The divergence is summed over the last dimension and averaged over the rest.
pub fn kullback_leibler_divergence<B: Backend, const D: usize>(
    mu: Tensor<B, D>,
    logvar: Tensor<B, D>,
) -> Tensor<B, 1> {
    let terms = logvar.clone().add_scalar(1.0) - mu.powf_scalar(2.0) - logvar.exp();
    (terms.sum_dim(D - 1) * -0.5).mean()
}

/// Number of class channels (`dims[1]`) of a `[N, C, ...]` tensor.
pub(crate) fn channels<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> MedEvalResult<usize> {
    if D < 2 {
        return Err(MedEvalError::shape("[N, C, ...]", tensor.dims()));
    }
    Ok(tensor.dims()[1])
}

fn check_weight_count(weights: &[f32], num_classes: usize) -> MedEvalResult<()> {
    if weights.len() != num_classes {
        return Err(MedEvalError::config(format!(
            "Number of classes {num_classes} does not match number of weights {}",
            weights.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArray, Autodiff};

    type TestBackend = NdArray<f32>;

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar()
    }

    #[test]
    fn test_dice_identical_and_disjoint() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0, 0.0, 0.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 1.0, 1.0]], &device);

        assert!((scalar(dice(a.clone(), a.clone())) - 1.0).abs() < 1e-6);
        assert!(scalar(dice(a, b)).abs() < 1e-6);
    }

    #[test]
    fn test_dice_empty_masks_score_one() {
        let device = Default::default();
        let empty = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        assert!((scalar(dice(empty.clone(), empty)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dice_partial_overlap() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 1>::from_floats([1.0, 1.0, 1.0, 0.0], &device);
        let b = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 0.0, 0.0], &device);
        // 2 * 1 / (3 + 1)
        assert!((scalar(dice(a, b)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mcc_perfect_and_inverse() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 1.0, 0.0], &device);
        let inverse = a.clone().neg().add_scalar(1.0);

        assert!((scalar(mcc(a.clone(), a.clone())) - 1.0).abs() < 1e-5);
        assert!((scalar(mcc(a, inverse)) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mcd_loss_weighted_and_unweighted() {
        let device = Default::default();
        // Class 0 perfect, class 1 disjoint.
        let pred = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 1.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]]],
            &device,
        );
        let target = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0]]],
            &device,
        );

        let loss = MultiClassDiceLossConfig::new().init();
        let value = scalar(loss.forward(pred.clone(), target.clone()).unwrap());
        assert!((value - 0.5).abs() < 1e-6);

        let weighted = MultiClassDiceLossConfig::new()
            .with_weights(Some(vec![0.25, 2.0]))
            .init();
        let value = scalar(weighted.forward(pred, target).unwrap());
        assert!((value - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_generic_loss_calculator_ignores_class() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0], [1.0, 0.0]]], &device);
        let target = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0], [0.0, 1.0]]], &device);

        let loss =
            generic_loss_calculator(pred, target, 2, dice, None, Some(1), LossType::Plain).unwrap();
        // Only class 0 (perfect) contributes; the sum is still divided by 2.
        assert!(scalar(loss).abs() < 1e-6);
    }

    #[test]
    fn test_log_dice_loss_is_positive() {
        let device = Default::default();
        let pred = Tensor::<TestBackend, 3>::from_floats([[[0.6, 0.4], [0.4, 0.6]]], &device);
        let target = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0], [0.0, 1.0]]], &device);

        let loss = MultiClassDiceLossConfig::new()
            .with_log(true)
            .init();
        let value = scalar(loss.forward(pred, target).unwrap());
        // dice = 0.6 for both classes
        assert!((value - (-(0.6_f32 + EPSILON).ln())).abs() < 1e-5);
    }

    #[test]
    fn test_tversky_parameter_validation() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0], &device);

        assert!(tversky_loss(a.clone(), a.clone(), 0.7, 0.7).is_err());
        assert!(tversky_loss(a.clone(), a.clone(), -0.1, 0.5).is_err());
        let loss = tversky_loss(a.clone(), a, 0.3, 0.7).unwrap();
        assert!(scalar(loss).abs() < 1e-6);

        assert!(MultiClassTverskyLossConfig::new()
            .with_alpha(1.5)
            .init()
            .is_err());
    }

    #[test]
    fn test_tversky_equals_dice_loss_at_half() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 1>::from_floats([1.0, 1.0, 1.0, 0.0], &device);
        let b = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 0.0, 0.0], &device);

        let tversky = scalar(tversky_loss(a.clone(), b.clone(), 0.5, 0.5).unwrap());
        let dice_loss = 1.0 - scalar(dice(a, b));
        assert!((tversky - dice_loss).abs() < 1e-6);
    }

    #[test]
    fn test_focal_loss_gamma_zero_is_cross_entropy() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::from_floats([[[2.0, 0.0], [0.0, 1.0]]], &device);
        let target = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0], [0.0, 1.0]]], &device);

        let loss = FocalLossConfig::new()
            .with_gamma(0.0)
            .with_size_average(false)
            .init();
        let value = scalar(loss.forward(logits, target).unwrap());

        let first = -(2.0_f32.exp() / (2.0_f32.exp() + 1.0)).ln();
        let second = -(1.0_f32.exp() / (1.0_f32.exp() + 1.0)).ln();
        assert!((value - (first + second)).abs() < 1e-5);
    }

    #[test]
    fn test_focal_loss_down_weights_easy_examples() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::from_floats([[[4.0, 4.0], [0.0, 0.0]]], &device);
        let target = Tensor::<TestBackend, 3>::from_floats([[[1.0, 1.0], [0.0, 0.0]]], &device);

        let ce = FocalLossConfig::new().with_gamma(0.0).init();
        let focal = FocalLossConfig::new().init();
        let ce = scalar(ce.forward(logits.clone(), target.clone()).unwrap());
        let focal = scalar(focal.forward(logits, target).unwrap());
        assert!(focal < ce);
    }

    #[test]
    fn test_kld_zero_for_standard_normal() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        assert!(scalar(kullback_leibler_divergence(mu, logvar)).abs() < 1e-7);

        let mu = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        // -0.5 * sum(1 + 0 - 1 - 1) over 2 latents = 1.0 per sample
        assert!((scalar(kullback_leibler_divergence(mu, logvar)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dice_loss_is_differentiable() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();

        let pred = Tensor::<AutodiffBackend, 3>::from_floats(
            [[[0.8, 0.2, 0.4], [0.2, 0.8, 0.6]]],
            &device,
        )
        .require_grad();
        let target = Tensor::<AutodiffBackend, 3>::from_floats(
            [[[1.0, 0.0, 0.0], [0.0, 1.0, 1.0]]],
            &device,
        );

        let loss = MultiClassDiceLossConfig::new()
            .init()
            .forward(pred.clone(), target)
            .unwrap();
        let grads = loss.backward();
        let grad = pred.grad(&grads).expect("prediction gradient");

        assert_eq!(grad.dims(), [1, 2, 3]);
        let values = grad.into_data().iter::<f32>().collect::<Vec<_>>();
        assert!(values.iter().any(|v| v.abs() > 0.0));
    }
}
