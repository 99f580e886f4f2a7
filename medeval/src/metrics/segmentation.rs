//! Segmentation metrics on one-hot `[N, C, ...]` tensors.
//!
//! Every metric is computed per class channel, skipping the configured
//! `ignore_label_validation` class, and averaged over the remaining classes.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use tracing::debug;

use super::{
    surface::{surface_distances, SurfaceDistances},
    utils::{check_same_layout, ChannelData},
};
use crate::{
    config::EvaluationConfig,
    error::{MedEvalError, MedEvalResult},
    losses::{dice, segmentation::channels},
};

/// Class channels evaluated for `config`.
fn evaluated_classes(num_classes: usize, config: &EvaluationConfig) -> Vec<usize> {
    (0..num_classes)
        .filter(|&class| Some(class) != config.model.ignore_label_validation)
        .collect()
}

fn average(values: &[f64]) -> f64 {
    super::utils::mean(values)
}

/// Dice score of every evaluated class, computed over the whole batch.
pub fn multi_class_dice_per_label<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<Vec<f64>> {
    crate::losses::check_same_shape(&output, &label)?;
    let num_classes = channels(&output)?;

    Ok(evaluated_classes(num_classes, config)
        .into_iter()
        .map(|class| {
            dice(
                output.clone().narrow(1, class, 1),
                label.clone().narrow(1, class, 1),
            )
            .into_scalar()
            .elem::<f64>()
        })
        .collect())
}

/// Mean Dice score over the evaluated classes.
pub fn multi_class_dice<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    Ok(average(&multi_class_dice_per_label(output, label, config)?))
}

/// Confusion counts of two binary masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinaryCounts {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_negatives: u64,
}

impl BinaryCounts {
    pub fn from_masks(prediction: &[bool], target: &[bool]) -> Self {
        let mut counts = Self::default();
        for (&p, &t) in prediction.iter().zip(target) {
            match (p, t) {
                (true, true) => counts.true_positives += 1,
                (true, false) => counts.false_positives += 1,
                (false, true) => counts.false_negatives += 1,
                (false, false) => counts.true_negatives += 1,
            }
        }
        counts
    }

    fn add(&mut self, other: Self) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.true_negatives += other.true_negatives;
    }

    /// `TP / (TP + FN)`; 1 when the class is absent from target and prediction.
    pub fn sensitivity(&self) -> f64 {
        if self.true_positives + self.false_negatives + self.false_positives == 0 {
            return 1.0;
        }
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// `TN / (TN + FP)`; 1 when no element is negative in the target.
    pub fn specificity(&self) -> f64 {
        if self.true_negatives + self.false_positives == 0 {
            return 1.0;
        }
        ratio(self.true_negatives, self.true_negatives + self.false_positives)
    }

    /// `TP / (TP + FP + FN)`; 1 when both masks are empty.
    pub fn jaccard(&self) -> f64 {
        let union = self.true_positives + self.false_positives + self.false_negatives;
        if union == 0 {
            return 1.0;
        }
        ratio(self.true_positives, union)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Binary counts of one class channel, pooled over the batch.
pub fn class_counts(
    prediction: &ChannelData,
    target: &ChannelData,
    class: usize,
    threshold: f32,
) -> BinaryCounts {
    let mut counts = BinaryCounts::default();
    for sample in 0..prediction.batch() {
        counts.add(BinaryCounts::from_masks(
            &prediction.mask(sample, class, threshold),
            &target.mask(sample, class, threshold),
        ));
    }
    counts
}

fn host_pair<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
) -> MedEvalResult<(ChannelData, ChannelData)> {
    let prediction = ChannelData::from_tensor(output)?;
    let target = ChannelData::from_tensor(label)?;
    check_same_layout(&prediction, &target)?;
    Ok((prediction, target))
}

/// Sensitivity and specificity averaged over the evaluated classes.
///
/// Outputs are binarised with the configured threshold.
pub fn sensitivity_specificity<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<(f64, f64)> {
    let (prediction, target) = host_pair(output, label)?;
    let threshold = config.metrics.threshold;

    let (sensitivities, specificities): (Vec<f64>, Vec<f64>) =
        evaluated_classes(prediction.channels(), config)
            .into_iter()
            .map(|class| {
                let counts = class_counts(&prediction, &target, class, threshold);
                (counts.sensitivity(), counts.specificity())
            })
            .unzip();

    Ok((average(&sensitivities), average(&specificities)))
}

/// Jaccard index averaged over the evaluated classes.
pub fn jaccard<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    let (prediction, target) = host_pair(output, label)?;
    let threshold = config.metrics.threshold;

    let scores = evaluated_classes(prediction.channels(), config)
        .into_iter()
        .map(|class| class_counts(&prediction, &target, class, threshold).jaccard())
        .collect::<Vec<_>>();

    Ok(average(&scores))
}

/// Surface distances of one class channel, averaged over the batch.
pub fn class_surface_distances(
    prediction: &ChannelData,
    target: &ChannelData,
    class: usize,
    config: &EvaluationConfig,
) -> MedEvalResult<SurfaceDistances> {
    let shape = prediction.spatial();
    if shape.is_empty() {
        return Err(MedEvalError::MetricNotApplicable {
            metric: "surface distance".to_string(),
            problem_type: "inputs without spatial axes".to_string(),
        });
    }

    let spacing = config.spacing_for(shape.len());
    let options = &config.metrics;
    let mut total = SurfaceDistances {
        nsd: 0.0,
        hd100: 0.0,
        hd95: 0.0,
    };

    for sample in 0..prediction.batch() {
        let distances = surface_distances(
            &prediction.mask(sample, class, options.threshold),
            &target.mask(sample, class, options.threshold),
            shape,
            &spacing,
            options.nsd_tolerance,
            options.hausdorff_percentile,
        );
        total.nsd += distances.nsd;
        total.hd100 += distances.hd100;
        total.hd95 += distances.hd95;
    }

    let batch = prediction.batch().max(1) as f64;
    Ok(SurfaceDistances {
        nsd: total.nsd / batch,
        hd100: total.hd100 / batch,
        hd95: total.hd95 / batch,
    })
}

/// Surface distances of every evaluated class.
pub fn all_surface_distances_per_label<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<Vec<SurfaceDistances>> {
    let (prediction, target) = host_pair(output, label)?;
    let classes = evaluated_classes(prediction.channels(), config);
    debug!(
        classes = classes.len(),
        spatial = ?prediction.spatial(),
        "computing surface distances"
    );

    classes
        .into_iter()
        .map(|class| class_surface_distances(&prediction, &target, class, config))
        .collect()
}

/// Surface distances averaged over the evaluated classes.
pub fn all_surface_distances<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<SurfaceDistances> {
    let per_label = all_surface_distances_per_label(output, label, config)?;
    let collect = |field: fn(&SurfaceDistances) -> f64| {
        average(&per_label.iter().map(field).collect::<Vec<_>>())
    };

    Ok(SurfaceDistances {
        nsd: collect(|d| d.nsd),
        hd100: collect(|d| d.hd100),
        hd95: collect(|d| d.hd95),
    })
}

/// Robust Hausdorff distance averaged over the evaluated classes.
pub fn hd95<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    Ok(all_surface_distances(output, label, config)?.hd95)
}

/// Robust Hausdorff distance of every evaluated class.
pub fn hd95_per_label<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<Vec<f64>> {
    Ok(all_surface_distances_per_label(output, label, config)?
        .iter()
        .map(|d| d.hd95)
        .collect())
}

/// Hausdorff distance averaged over the evaluated classes.
pub fn hd100<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    Ok(all_surface_distances(output, label, config)?.hd100)
}

/// Hausdorff distance of every evaluated class.
pub fn hd100_per_label<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<Vec<f64>> {
    Ok(all_surface_distances_per_label(output, label, config)?
        .iter()
        .map(|d| d.hd100)
        .collect())
}

/// Normalised surface Dice averaged over the evaluated classes.
pub fn nsd<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<f64> {
    Ok(all_surface_distances(output, label, config)?.nsd)
}

/// Normalised surface Dice of every evaluated class.
pub fn nsd_per_label<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    label: Tensor<B, D>,
    config: &EvaluationConfig,
) -> MedEvalResult<Vec<f64>> {
    Ok(all_surface_distances_per_label(output, label, config)?
        .iter()
        .map(|d| d.nsd)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// One-hot `[1, 2, 4, 4]` of a label map with a 2x2 foreground square at `offset`.
    fn square_one_hot(offset: usize) -> Tensor<TestBackend, 4> {
        let mut foreground = [[0.0_f32; 4]; 4];
        for row in foreground.iter_mut().skip(1).take(2) {
            for value in row.iter_mut().skip(offset).take(2) {
                *value = 1.0;
            }
        }
        let background = foreground.map(|row| row.map(|v| 1.0 - v));
        Tensor::from_floats([[background, foreground]], &Default::default())
    }

    #[test]
    fn test_dice_per_label_and_ignore() {
        let config = EvaluationConfig::new();
        let perfect = multi_class_dice_per_label(square_one_hot(0), square_one_hot(0), &config).unwrap();
        assert_eq!(perfect.len(), 2);
        assert!(perfect.iter().all(|&d| (d - 1.0).abs() < 1e-6));

        let config = EvaluationConfig::new()
            .with_model(ModelConfig::new().with_ignore_label_validation(Some(0)));
        let shifted = multi_class_dice_per_label(square_one_hot(0), square_one_hot(1), &config).unwrap();
        // foreground squares overlap in two of four voxels
        assert_eq!(shifted.len(), 1);
        assert!((shifted[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_binary_counts_scores() {
        let counts = BinaryCounts::from_masks(&[true, true, false, false], &[true, false, true, false]);
        assert_eq!(counts.true_positives, 1);
        assert_eq!(counts.true_negatives, 1);
        assert_eq!(counts.sensitivity(), 0.5);
        assert_eq!(counts.specificity(), 0.5);
        assert!((counts.jaccard() - 1.0 / 3.0).abs() < 1e-12);

        let absent = BinaryCounts::from_masks(&[false, false], &[false, false]);
        assert_eq!(absent.sensitivity(), 1.0);
        assert_eq!(absent.specificity(), 1.0);
        assert_eq!(absent.jaccard(), 1.0);
    }

    #[test]
    fn test_sensitivity_specificity_and_jaccard() {
        let config = EvaluationConfig::new()
            .with_model(ModelConfig::new().with_ignore_label_validation(Some(0)));
        let (sensitivity, specificity) =
            sensitivity_specificity(square_one_hot(1), square_one_hot(0), &config).unwrap();
        assert!((sensitivity - 0.5).abs() < 1e-12);
        // 12 background voxels in the target, 2 of them predicted
        assert!((specificity - 10.0 / 12.0).abs() < 1e-12);

        let score = jaccard(square_one_hot(1), square_one_hot(0), &config).unwrap();
        assert!((score - 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_specificity_of_class_covering_the_image() {
        let all_positive = BinaryCounts::from_masks(&[true; 4], &[true; 4]);
        assert_eq!(all_positive.sensitivity(), 1.0);
        assert_eq!(all_positive.specificity(), 1.0);

        // Empty foreground: the background channel covers every voxel.
        let device = Default::default();
        let background = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device);
        let foreground = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let one_hot = Tensor::cat(vec![background, foreground], 1);

        let (sensitivity, specificity) =
            sensitivity_specificity(one_hot.clone(), one_hot, &EvaluationConfig::new()).unwrap();
        assert_eq!(sensitivity, 1.0);
        assert_eq!(specificity, 1.0);
    }

    #[test]
    fn test_hausdorff_metrics() {
        let config = EvaluationConfig::new()
            .with_model(ModelConfig::new().with_ignore_label_validation(Some(0)));

        assert_eq!(hd100(square_one_hot(0), square_one_hot(0), &config).unwrap(), 0.0);
        assert_eq!(nsd(square_one_hot(0), square_one_hot(0), &config).unwrap(), 1.0);

        let shifted = hd100_per_label(square_one_hot(0), square_one_hot(2), &config).unwrap();
        assert_eq!(shifted.len(), 1);
        assert!((shifted[0] - 2.0).abs() < 1e-12);

        let robust = hd95(square_one_hot(0), square_one_hot(2), &config).unwrap();
        assert!(robust <= shifted[0] + 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let config = EvaluationConfig::new();
        let other = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 5], &Default::default());
        assert!(hd95(square_one_hot(0), other.clone(), &config).is_err());
        assert!(multi_class_dice(square_one_hot(0), other, &config).is_err());
    }
}
