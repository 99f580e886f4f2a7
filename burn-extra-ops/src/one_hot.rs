//! One-hot encoding of label maps against an explicit class list.

use burn::prelude::*;

/// One-hot encode a label map.
///
/// `labels` has shape `[N, 1, ...]` and holds integer label values stored as floats.
/// Channel `i` of the result is `1.0` wherever the label equals any of the values in
/// `classes[i]`, so a class entry with several values (a combined label such as
/// `1||2`) collects all of them into one channel.
///
/// # Returns
/// Float tensor of shape `[N, classes.len(), ...]`.
///
/// # Panics
/// In debug builds, when `labels` has more than one channel. Use [`one_hot_labels`]
/// for label maps without a channel axis.
pub fn one_hot<B: Backend, const D: usize, L: AsRef<[i64]>>(
    labels: Tensor<B, D>,
    classes: &[L],
) -> Tensor<B, D> {
    debug_assert!(D >= 2, "label maps need a batch and a channel dimension");
    debug_assert_eq!(labels.dims()[1], 1, "label maps have a single channel");

    let channels = classes
        .iter()
        .map(|values| {
            let mut channel = labels.zeros_like();
            for &value in values.as_ref() {
                channel = channel + labels.clone().equal_elem(value as f32).float();
            }
            // Overlapping values inside one combined class count once.
            channel.clamp_max(1.0)
        })
        .collect::<Vec<_>>();

    Tensor::cat(channels, 1)
}

/// One-hot encode a label map without a channel axis.
///
/// `labels` has shape `[N, ...]`; a channel axis is inserted at dimension 1 before
/// encoding, so `D2` must be `D + 1`.
///
/// # Returns
/// Float tensor of shape `[N, classes.len(), ...]`.
pub fn one_hot_labels<B: Backend, const D: usize, const D2: usize, L: AsRef<[i64]>>(
    labels: Tensor<B, D>,
    classes: &[L],
) -> Tensor<B, D2> {
    one_hot(labels.unsqueeze_dim::<D2>(1), classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_one_hot_single_labels() {
        let device = Default::default();
        let labels =
            Tensor::<TestBackend, 4>::from_floats([[[[0.0, 1.0], [2.0, 0.0]]]], &device);

        let encoded = one_hot(labels, &[vec![0_i64], vec![1], vec![2]]);
        assert_eq!(encoded.dims(), [1, 3, 2, 2]);

        let values = encoded.into_data().iter::<f32>().collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                1.0, 0.0, 0.0, 1.0, // class 0
                0.0, 1.0, 0.0, 0.0, // class 1
                0.0, 0.0, 1.0, 0.0, // class 2
            ]
        );
    }

    #[test]
    fn test_one_hot_combined_label() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3>::from_floats([[[0.0, 1.0, 2.0, 3.0]]], &device);

        let encoded = one_hot(labels, &[vec![0_i64], vec![1, 2]]);
        let values = encoded.into_data().iter::<f32>().collect::<Vec<_>>();
        assert_eq!(values, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_one_hot_labels_inserts_channel_axis() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3>::from_floats([[[0.0, 1.0], [1.0, 0.0]]], &device);

        let encoded: Tensor<TestBackend, 4> = one_hot_labels(labels, &[[0_i64], [1]]);
        assert_eq!(encoded.dims(), [1, 2, 2, 2]);

        let values = encoded.into_data().iter::<f32>().collect::<Vec<_>>();
        assert_eq!(values, vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
    }
}
