//! Additional operations for the Burn deep learning framework
//!
//! This crate provides the label-map and binary-mask operations that medical image
//! evaluation needs but that are not available in the core Burn framework: one-hot
//! encoding against an explicit class list, Gaussian windows, face-connected erosion
//! and an exact Euclidean distance transform with anisotropic voxel spacing.
//!
//! Mask operations work on host memory in row-major order, described by a `shape`
//! slice, so they are independent of the tensor rank.

use burn::prelude::*;

mod distance;
mod morphology;
mod one_hot;
mod window;

// Convenient re-exports
pub use distance::distance_transform_edt;
pub use morphology::{binary_erosion, surface};
pub use one_hot::{one_hot, one_hot_labels};
pub use window::gaussian_kernel_1d;

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend, const D: usize> {
    /// One-hot encode a label map of shape `[N, 1, ...]` against `classes`.
    ///
    /// See [`one_hot`].
    fn one_hot_classes<L: AsRef<[i64]>>(self, classes: &[L]) -> Self;

    /// Copy the tensor to host memory as `f32` values in row-major order.
    fn into_f32_vec(self) -> Vec<f32>;

    /// Copy the tensor to host memory as a boolean mask (`value > threshold`).
    fn into_mask(self, threshold: f32) -> Vec<bool>;
}

impl<B: Backend, const D: usize> TensorExtraOps<B, D> for Tensor<B, D> {
    fn one_hot_classes<L: AsRef<[i64]>>(self, classes: &[L]) -> Self {
        one_hot(self, classes)
    }

    fn into_f32_vec(self) -> Vec<f32> {
        self.into_data().iter::<f32>().collect()
    }

    fn into_mask(self, threshold: f32) -> Vec<bool> {
        self.into_data()
            .iter::<f32>()
            .map(|value| value > threshold)
            .collect()
    }
}
