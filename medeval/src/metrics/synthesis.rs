//! Image synthesis metrics: SSIM, intensity errors, PSNR and local normalised
//! cross-correlation.

use burn::tensor::{
    backend::Backend,
    module::{conv2d, conv3d},
    ops::ConvOptions,
    ElementConversion, Tensor,
};
use burn_extra_ops::{gaussian_kernel_1d, TensorExtraOps};
use serde::Serialize;

use super::utils::{mean, ChannelData};
use crate::{
    config::MetricOptions,
    error::{MedEvalError, MedEvalResult},
    losses::check_same_shape,
};

const K1: f32 = 0.01;
const K2: f32 = 0.03;

/// Largest odd window not exceeding `window_size` or any spatial extent.
fn fitted_window(window_size: usize, spatial: &[usize]) -> usize {
    let smallest = spatial.iter().copied().min().unwrap_or(1);
    let size = window_size.min(smallest).max(1);
    if size % 2 == 0 {
        size - 1
    } else {
        size
    }
}

/// Largest intensity range of the two images, or 1 for two constant images.
fn data_range<B: Backend, const D: usize>(target: &Tensor<B, D>, prediction: &Tensor<B, D>) -> f32 {
    let range = |t: &Tensor<B, D>| {
        let max = t.clone().max().into_scalar().elem::<f32>();
        let min = t.clone().min().into_scalar().elem::<f32>();
        max - min
    };
    let range = range(target).max(range(prediction));
    if range > 0.0 {
        range
    } else {
        1.0
    }
}

/// SSIM map from local statistics computed by `filter`.
fn ssim_map<B: Backend, const K: usize>(
    x: Tensor<B, K>,
    y: Tensor<B, K>,
    filter: impl Fn(Tensor<B, K>) -> Tensor<B, K>,
    range: f32,
) -> Tensor<B, K> {
    let c1 = (K1 * range).powi(2);
    let c2 = (K2 * range).powi(2);

    let mu_x = filter(x.clone());
    let mu_y = filter(y.clone());

    let mu_x_sq = mu_x.clone().powf_scalar(2.0);
    let mu_y_sq = mu_y.clone().powf_scalar(2.0);
    let mu_xy = mu_x * mu_y;

    let sigma_x_sq = filter(x.clone().powf_scalar(2.0)) - mu_x_sq.clone();
    let sigma_y_sq = filter(y.clone().powf_scalar(2.0)) - mu_y_sq.clone();
    let sigma_xy = filter(x * y) - mu_xy.clone();

    let numerator = (mu_xy * 2.0 + c1) * (sigma_xy * 2.0 + c2);
    let denominator = (mu_x_sq + mu_y_sq + c1) * (sigma_x_sq + sigma_y_sq + c2);
    numerator / denominator
}

/// Mean of `map` over the voxels selected by `mask`.
fn masked_mean(map: Vec<f32>, mask: Option<Vec<bool>>) -> MedEvalResult<f64> {
    let selected = match mask {
        Some(mask) => map
            .into_iter()
            .zip(mask)
            .filter_map(|(value, keep)| keep.then_some(f64::from(value)))
            .collect::<Vec<_>>(),
        None => map.into_iter().map(f64::from).collect(),
    };
    if selected.is_empty() {
        return Err(MedEvalError::InvalidTensorValues {
            reason: "SSIM mask selects no voxel of the valid region".to_string(),
        });
    }
    Ok(mean(&selected))
}

fn ssim_2d<B: Backend>(
    target: Tensor<B, 4>,
    prediction: Tensor<B, 4>,
    mask: Option<Tensor<B, 4>>,
    options: &MetricOptions,
) -> MedEvalResult<f64> {
    let [_, channels, height, width] = target.dims();
    let device = target.device();
    let size = fitted_window(options.ssim_window_size, &[height, width]);
    let pad = size / 2;

    let kernel = gaussian_kernel_1d(size, options.ssim_sigma);
    let kernel = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);
    let window = kernel
        .clone()
        .reshape([size, 1])
        .matmul(kernel.reshape([1, size]))
        .reshape([1, 1, size, size])
        .repeat(&[channels, 1, 1, 1]);

    // valid region only: no padding
    let conv_options = ConvOptions::new([1, 1], [0, 0], [1, 1], channels);
    let filter = |x: Tensor<B, 4>| conv2d(x, window.clone(), None, conv_options.clone());

    let range = data_range(&target, &prediction);
    let map = ssim_map(target, prediction, filter, range);

    let mask = mask.map(|mask| {
        mask.narrow(2, pad, height - 2 * pad)
            .narrow(3, pad, width - 2 * pad)
            .into_mask(0.5)
    });
    masked_mean(map.into_f32_vec(), mask)
}

fn ssim_3d<B: Backend>(
    target: Tensor<B, 5>,
    prediction: Tensor<B, 5>,
    mask: Option<Tensor<B, 5>>,
    options: &MetricOptions,
) -> MedEvalResult<f64> {
    let [_, channels, depth, height, width] = target.dims();
    let device = target.device();
    let size = fitted_window(options.ssim_window_size, &[depth, height, width]);
    let pad = size / 2;

    let kernel = gaussian_kernel_1d(size, options.ssim_sigma);
    let kernel = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);
    let plane = kernel
        .clone()
        .reshape([size, 1])
        .matmul(kernel.clone().reshape([1, size]));
    let window = plane
        .reshape([size * size, 1])
        .matmul(kernel.reshape([1, size]))
        .reshape([1, 1, size, size, size])
        .repeat(&[channels, 1, 1, 1, 1]);

    let conv_options = ConvOptions::new([1, 1, 1], [0, 0, 0], [1, 1, 1], channels);
    let filter = |x: Tensor<B, 5>| conv3d(x, window.clone(), None, conv_options.clone());

    let range = data_range(&target, &prediction);
    let map = ssim_map(target, prediction, filter, range);

    let mask = mask.map(|mask| {
        mask.narrow(2, pad, depth - 2 * pad)
            .narrow(3, pad, height - 2 * pad)
            .narrow(4, pad, width - 2 * pad)
            .into_mask(0.5)
    });
    masked_mean(map.into_f32_vec(), mask)
}

/// Structural similarity index between `target` and `prediction`.
///
/// Local statistics use a Gaussian window (size and sigma from `options`, shrunk
/// to the smallest spatial extent) over the valid region of the image. The data range
/// is the larger intensity range of the two inputs. When a mask (same shape as the
/// inputs) is given, the SSIM map is averaged over the voxels where it exceeds 0.5.
///
/// # Arguments
/// * `target`, `prediction` - Images `[N, C, H, W]` or `[N, C, D, H, W]`
/// * `mask` - Optional region of interest
///
/// # Errors
///
/// Returns an error for mismatched shapes, other ranks, or an empty mask.
pub fn structural_similarity_index<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    mask: Option<Tensor<B, D>>,
    options: &MetricOptions,
) -> MedEvalResult<f64> {
    check_same_shape(&target, &prediction)?;
    if let Some(mask) = &mask {
        check_same_shape(&target, mask)?;
    }

    let dims = target.dims();
    match D {
        4 => {
            let shape = [dims[0], dims[1], dims[2], dims[3]];
            ssim_2d(
                target.reshape(shape),
                prediction.reshape(shape),
                mask.map(|mask| mask.reshape(shape)),
                options,
            )
        }
        5 => {
            let shape = [dims[0], dims[1], dims[2], dims[3], dims[4]];
            ssim_3d(
                target.reshape(shape),
                prediction.reshape(shape),
                mask.map(|mask| mask.reshape(shape)),
                options,
            )
        }
        _ => Err(MedEvalError::shape(
            "[N, C, H, W] or [N, C, D, H, W]",
            dims,
        )),
    }
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Mean squared error.
pub fn mean_squared_error<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
) -> MedEvalResult<f64> {
    check_same_shape(&target, &prediction)?;
    Ok(scalar((target - prediction).powf_scalar(2.0).mean()))
}

/// Square root of the mean squared error.
pub fn root_mean_squared_error<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
) -> MedEvalResult<f64> {
    Ok(mean_squared_error(target, prediction)?.sqrt())
}

/// Mean absolute error.
pub fn mean_absolute_error<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
) -> MedEvalResult<f64> {
    check_same_shape(&target, &prediction)?;
    Ok(scalar((target - prediction).abs().mean()))
}

/// Mean squared error of `ln(1 + x)`.
pub fn mean_squared_log_error<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
) -> MedEvalResult<f64> {
    check_same_shape(&target, &prediction)?;
    let log_target = target.add_scalar(1.0).log();
    let log_prediction = prediction.add_scalar(1.0).log();
    Ok(scalar((log_target - log_prediction).powf_scalar(2.0).mean()))
}

/// Peak signal-to-noise ratio `10 * log10(range^2 / (mse + eps))`.
///
/// `data_range` defaults to the intensity range (max - min) of `target`.
pub fn peak_signal_noise_ratio<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    data_range: Option<f64>,
) -> MedEvalResult<f64> {
    let range = match data_range {
        Some(range) => range,
        None => scalar(target.clone().max()) - scalar(target.clone().min()),
    };
    let mse = mean_squared_error(target, prediction)?;
    Ok(psnr(range, mse))
}

/// `10 * log10(range^2 / (mse + eps))`
pub fn psnr(range: f64, mse: f64) -> f64 {
    10.0 * (range.powi(2) / (mse + f64::EPSILON)).log10()
}

/// Summary statistics of a local normalised cross-correlation map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NccStatistics {
    pub mean: f64,
    /// Sample standard deviation.
    pub std: f64,
    pub max: f64,
    pub min: f64,
}

/// Sum over a cubic window of half-width `radius`, clipped at the image border.
fn box_sum(values: &[f64], shape: &[usize], radius: usize) -> Vec<f64> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }

    let mut current = values.to_vec();
    for (&extent, &stride) in shape.iter().zip(&strides) {
        let mut next = vec![0.0; current.len()];
        let mut prefix = vec![0.0; extent + 1];

        for start in (0..current.len()).filter(|&i| (i / stride) % extent == 0) {
            for i in 0..extent {
                prefix[i + 1] = prefix[i] + current[start + i * stride];
            }
            for i in 0..extent {
                let lower = i.saturating_sub(radius);
                let upper = (i + radius + 1).min(extent);
                next[start + i * stride] = prefix[upper] - prefix[lower];
            }
        }
        current = next;
    }
    current
}

/// Local zero-normalised cross-correlation of two images of the same `shape`.
///
/// Windows where both images are flat correlate perfectly (1); windows where only
/// one image is flat do not correlate (0).
pub fn local_ncc_map(target: &[f32], prediction: &[f32], shape: &[usize], radius: usize) -> Vec<f64> {
    const FLAT: f64 = 1e-10;

    let t = target.iter().map(|&v| f64::from(v)).collect::<Vec<_>>();
    let p = prediction.iter().map(|&v| f64::from(v)).collect::<Vec<_>>();
    let product = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).collect::<Vec<_>>();

    let count = box_sum(&vec![1.0; t.len()], shape, radius);
    let sum_t = box_sum(&t, shape, radius);
    let sum_p = box_sum(&p, shape, radius);
    let sum_tt = box_sum(&product(&t, &t), shape, radius);
    let sum_pp = box_sum(&product(&p, &p), shape, radius);
    let sum_tp = box_sum(&product(&t, &p), shape, radius);

    (0..t.len())
        .map(|i| {
            let n = count[i];
            let covariance = sum_tp[i] - sum_t[i] * sum_p[i] / n;
            let var_t = (sum_tt[i] - sum_t[i] * sum_t[i] / n).max(0.0);
            let var_p = (sum_pp[i] - sum_p[i] * sum_p[i] / n).max(0.0);

            match (var_t <= FLAT, var_p <= FLAT) {
                (true, true) => 1.0,
                (true, false) | (false, true) => 0.0,
                (false, false) => (covariance / (var_t * var_p).sqrt()).clamp(-1.0, 1.0),
            }
        })
        .collect()
}

/// Statistics of the local NCC maps of every sample and channel.
///
/// # Arguments
/// * `target`, `prediction` - Images `[N, C, ...]`
/// * `radius` - Half-width of the correlation window
pub fn ncc_statistics<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    radius: usize,
) -> MedEvalResult<NccStatistics> {
    check_same_shape(&target, &prediction)?;
    let target = ChannelData::from_tensor(target)?;
    let prediction = ChannelData::from_tensor(prediction)?;

    let mut map = Vec::with_capacity(target.values().len());
    for sample in 0..target.batch() {
        for channel in 0..target.channels() {
            map.extend(local_ncc_map(
                target.channel(sample, channel),
                prediction.channel(sample, channel),
                target.spatial(),
                radius,
            ));
        }
    }

    if map.is_empty() {
        return Err(MedEvalError::InvalidTensorValues {
            reason: "empty image".to_string(),
        });
    }

    let average = mean(&map);
    let std = if map.len() > 1 {
        (map.iter().map(|v| (v - average).powi(2)).sum::<f64>() / (map.len() - 1) as f64).sqrt()
    } else {
        0.0
    };

    Ok(NccStatistics {
        mean: average,
        std,
        max: map.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        min: map.iter().copied().fold(f64::INFINITY, f64::min),
    })
}

/// Mean of the local NCC map.
pub fn ncc_mean<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    radius: usize,
) -> MedEvalResult<f64> {
    Ok(ncc_statistics(target, prediction, radius)?.mean)
}

/// Sample standard deviation of the local NCC map.
pub fn ncc_std<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    radius: usize,
) -> MedEvalResult<f64> {
    Ok(ncc_statistics(target, prediction, radius)?.std)
}

/// Maximum of the local NCC map.
pub fn ncc_max<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    radius: usize,
) -> MedEvalResult<f64> {
    Ok(ncc_statistics(target, prediction, radius)?.max)
}

/// Minimum of the local NCC map.
pub fn ncc_min<B: Backend, const D: usize>(
    target: Tensor<B, D>,
    prediction: Tensor<B, D>,
    radius: usize,
) -> MedEvalResult<f64> {
    Ok(ncc_statistics(target, prediction, radius)?.min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn gradient_image(height: usize, width: usize) -> Tensor<TestBackend, 4> {
        let values = (0..height * width)
            .map(|i| ((i / width) * 3 + (i % width) * 7 % 11) as f32)
            .collect::<Vec<_>>();
        Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &Default::default())
            .reshape([1, 1, height, width])
    }

    #[test]
    fn test_fitted_window() {
        assert_eq!(fitted_window(11, &[32, 32]), 11);
        assert_eq!(fitted_window(11, &[8, 32]), 7);
        assert_eq!(fitted_window(11, &[1, 5]), 1);
    }

    #[test]
    fn test_ssim_identical_images() {
        let image = gradient_image(16, 16);
        let value =
            structural_similarity_index(image.clone(), image, None, &MetricOptions::new()).unwrap();
        assert!((value - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_ssim_degrades_with_noise() {
        let image = gradient_image(16, 16);
        let noise = Tensor::<TestBackend, 1>::from_floats(
            (0..256)
                .map(|i| if i % 3 == 0 { 6.0 } else { -4.0 })
                .collect::<Vec<f32>>()
                .as_slice(),
            &Default::default(),
        )
        .reshape([1, 1, 16, 16]);

        let value = structural_similarity_index(
            image.clone(),
            image + noise,
            None,
            &MetricOptions::new(),
        )
        .unwrap();
        assert!(value < 0.99);
        assert!(value > -1.0);
    }

    #[test]
    fn test_ssim_3d_and_mask() {
        let device = Default::default();
        let volume = Tensor::<TestBackend, 5>::ones([1, 1, 6, 6, 6], &device);
        let options = MetricOptions::new().with_ssim_window_size(3);

        let value =
            structural_similarity_index(volume.clone(), volume.clone(), Some(volume.clone()), &options)
                .unwrap();
        assert!((value - 1.0).abs() < 1e-3);

        let empty_mask = Tensor::<TestBackend, 5>::zeros([1, 1, 6, 6, 6], &device);
        assert!(structural_similarity_index(volume.clone(), volume, Some(empty_mask), &options).is_err());
    }

    #[test]
    fn test_ssim_rejects_other_ranks() {
        let device = Default::default();
        let flat = Tensor::<TestBackend, 3>::ones([1, 1, 8], &device);
        assert!(structural_similarity_index(flat.clone(), flat, None, &MetricOptions::new()).is_err());
    }

    #[test]
    fn test_intensity_errors_and_psnr() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 2>::from_floats([[0.0, 2.0], [4.0, 2.0]], &device);
        let prediction = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [4.0, 0.0]], &device);

        let mse = mean_squared_error(target.clone(), prediction.clone()).unwrap();
        assert!((mse - 1.25).abs() < 1e-9);
        let rmse = root_mean_squared_error(target.clone(), prediction.clone()).unwrap();
        assert!((rmse - 1.25_f64.sqrt()).abs() < 1e-9);
        let mae = mean_absolute_error(target.clone(), prediction.clone()).unwrap();
        assert!((mae - 0.75).abs() < 1e-9);
        assert!(mean_squared_log_error(target.clone(), prediction.clone()).unwrap() > 0.0);

        let value = peak_signal_noise_ratio(target.clone(), prediction.clone(), None).unwrap();
        assert!((value - 10.0 * (16.0 / 1.25_f64).log10()).abs() < 1e-6);
        let value = peak_signal_noise_ratio(target, prediction, Some(1.0)).unwrap();
        assert!((value - 10.0 * (1.0 / 1.25_f64).log10()).abs() < 1e-6);
    }

    #[test]
    fn test_box_sum_clips_at_border() {
        let sums = box_sum(&[1.0; 6], &[2, 3], 1);
        assert_eq!(sums, vec![4.0, 6.0, 4.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_local_ncc_map() {
        let target: [f32; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];
        let scaled = target.map(|v| 2.0 * v + 1.0);
        let inverted = target.map(|v| -v);

        let map = local_ncc_map(&target, &scaled, &[5], 1);
        assert!(map.iter().all(|&v| (v - 1.0).abs() < 1e-9));

        let map = local_ncc_map(&target, &inverted, &[5], 1);
        assert!(map.iter().all(|&v| (v + 1.0).abs() < 1e-9));

        let flat = [3.0_f32; 5];
        let map = local_ncc_map(&flat, &flat, &[5], 1);
        assert!(map.iter().all(|&v| v == 1.0));
        let map = local_ncc_map(&flat, &target, &[5], 1);
        assert!(map.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_ncc_statistics() {
        let image = gradient_image(6, 6);
        let stats = ncc_statistics(image.clone(), image, 2).unwrap();
        assert!((stats.mean - 1.0).abs() < 1e-9);
        assert!(stats.std < 1e-9);
        assert!(stats.max <= 1.0 && stats.min >= stats.mean - 1e-9);
    }
}
