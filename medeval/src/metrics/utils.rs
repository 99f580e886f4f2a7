//! Host-side views of `[N, C, ...]` tensors shared by the metrics.
//!
//! Metrics that are not differentiable (surface distances, confusion matrices,
//! rank statistics) copy the tensor to host memory once and work on channel slices.

use burn::tensor::{backend::Backend, Tensor};
use burn_extra_ops::TensorExtraOps;

use crate::error::{MedEvalError, MedEvalResult};

/// Row-major copy of a `[N, C, spatial...]` tensor.
#[derive(Debug, Clone)]
pub struct ChannelData {
    values: Vec<f32>,
    batch: usize,
    channels: usize,
    spatial: Vec<usize>,
}

impl ChannelData {
    /// Copies `tensor` to host memory.
    ///
    /// # Errors
    ///
    /// Returns an error for tensors with fewer than two dimensions.
    pub fn from_tensor<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> MedEvalResult<Self> {
        if D < 2 {
            return Err(MedEvalError::shape("[N, C, ...]", tensor.dims()));
        }
        let dims = tensor.dims();
        Ok(Self {
            values: tensor.into_f32_vec(),
            batch: dims[0],
            channels: dims[1],
            spatial: dims[2..].to_vec(),
        })
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Extent of the spatial axes.
    pub fn spatial(&self) -> &[usize] {
        &self.spatial
    }

    /// Number of voxels of one channel of one sample.
    pub fn voxels(&self) -> usize {
        self.spatial.iter().product()
    }

    /// Values of channel `channel` of sample `sample`.
    pub fn channel(&self, sample: usize, channel: usize) -> &[f32] {
        let voxels = self.voxels();
        let start = (sample * self.channels + channel) * voxels;
        &self.values[start..start + voxels]
    }

    /// Binary mask (`value > threshold`) of one channel of one sample.
    pub fn mask(&self, sample: usize, channel: usize, threshold: f32) -> Vec<bool> {
        self.channel(sample, channel)
            .iter()
            .map(|&value| value > threshold)
            .collect()
    }

    /// Every value in row-major order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Per-voxel class decisions, sample after sample.
    ///
    /// Multi-channel data is argmaxed over the channel axis; single-channel data is
    /// read as a label map and rounded.
    pub fn class_indices(&self) -> Vec<i64> {
        if self.channels == 1 {
            return self.values.iter().map(|&v| v.round() as i64).collect();
        }
        self.argmax()
    }

    /// Index of the largest channel for every voxel, sample after sample.
    pub fn argmax(&self) -> Vec<i64> {
        let voxels = self.voxels();
        let mut classes = Vec::with_capacity(self.batch * voxels);

        for sample in 0..self.batch {
            for voxel in 0..voxels {
                let mut best = 0;
                let mut best_value = f32::NEG_INFINITY;
                for channel in 0..self.channels {
                    let value = self.channel(sample, channel)[voxel];
                    if value > best_value {
                        best = channel;
                        best_value = value;
                    }
                }
                classes.push(best as i64);
            }
        }

        classes
    }
}

/// Checks that two host views describe the same grid.
pub(crate) fn check_same_layout(prediction: &ChannelData, target: &ChannelData) -> MedEvalResult<()> {
    if prediction.batch != target.batch
        || prediction.channels != target.channels
        || prediction.spatial != target.spatial
    {
        return Err(MedEvalError::shape(
            format!(
                "{:?}",
                [&[prediction.batch, prediction.channels][..], &prediction.spatial].concat()
            ),
            [&[target.batch, target.channels][..], &target.spatial].concat(),
        ));
    }
    Ok(())
}

/// Percentile of `values` with linear interpolation between closest ranks.
///
/// Returns `0.0` for an empty slice.
pub fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = percentile.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Ranks starting at 1, ties receiving the average of their ranks.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order = (0..values.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // ranks start..end are tied; 1-based average
        let rank = (start + end + 1) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = rank;
        }
        start = end;
    }
    ranks
}
