//! Gaussian smoothing windows.

/// Normalised 1D Gaussian window of `size` taps centred on the middle tap.
///
/// The weights sum to one. An even `size` is centred between the two middle taps.
pub fn gaussian_kernel_1d(size: usize, sigma: f32) -> Vec<f32> {
    if size == 0 {
        return Vec::new();
    }

    let center = (size as f32 - 1.0) / 2.0;
    let mut kernel = (0..size)
        .map(|i| {
            let x = i as f32 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect::<Vec<_>>();

    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }

    kernel
}
