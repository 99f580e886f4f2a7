//! Binary morphology on row-major N-dimensional masks.
//!
//! These operations back the surface-distance metrics: the surface of a segmentation
//! is the set of foreground voxels removed by a single face-connected erosion.

/// Row-major strides for `shape`.
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Binary erosion with a face-connected (connectivity 1) structuring element.
///
/// Voxels outside the image count as background, so foreground voxels on the image
/// border are always eroded.
///
/// # Arguments
/// * `mask` - Binary mask in row-major order
/// * `shape` - Extent of each axis; its product must equal `mask.len()`
pub fn binary_erosion(mask: &[bool], shape: &[usize]) -> Vec<bool> {
    assert_eq!(
        mask.len(),
        shape.iter().product::<usize>(),
        "mask length does not match shape {shape:?}"
    );

    let strides = strides(shape);
    let mut eroded = vec![false; mask.len()];

    for (index, &value) in mask.iter().enumerate() {
        if !value {
            continue;
        }

        let mut keep = true;
        for (&extent, &stride) in shape.iter().zip(strides.iter()) {
            let coordinate = (index / stride) % extent;
            let has_before = coordinate > 0 && mask[index - stride];
            let has_after = coordinate + 1 < extent && mask[index + stride];
            if !(has_before && has_after) {
                keep = false;
                break;
            }
        }
        eroded[index] = keep;
    }

    eroded
}

/// Surface voxels of a binary mask: foreground voxels removed by [`binary_erosion`].
pub fn surface(mask: &[bool], shape: &[usize]) -> Vec<bool> {
    let eroded = binary_erosion(mask, shape);
    mask.iter()
        .zip(eroded.iter())
        .map(|(&inside, &interior)| inside && !interior)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(size: usize, from: usize, to: usize) -> Vec<bool> {
        let mut mask = vec![false; size * size];
        for y in from..to {
            for x in from..to {
                mask[y * size + x] = true;
            }
        }
        mask
    }

    #[test]
    fn strides_are_row_major() {
        assert_eq!(strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(strides(&[5]), vec![1]);
    }

    #[test]
    fn erosion_removes_one_layer() {
        // 3x3 block in a 5x5 image: only the centre survives.
        let mask = square_mask(5, 1, 4);
        let eroded = binary_erosion(&mask, &[5, 5]);

        let survivors = eroded.iter().filter(|&&v| v).count();
        assert_eq!(survivors, 1);
        assert!(eroded[2 * 5 + 2]);
    }

    #[test]
    fn erosion_treats_border_as_background() {
        let mask = vec![true; 9];
        let eroded = binary_erosion(&mask, &[3, 3]);
        assert_eq!(eroded.iter().filter(|&&v| v).count(), 1);
    }

    #[test]
    fn surface_is_ring() {
        let mask = square_mask(5, 1, 4);
        let ring = surface(&mask, &[5, 5]);

        assert_eq!(ring.iter().filter(|&&v| v).count(), 8);
        assert!(!ring[2 * 5 + 2]);
        assert!(ring[5 + 1]);
    }

    #[test]
    fn surface_of_single_voxel_is_itself() {
        let mut mask = vec![false; 27];
        mask[13] = true;
        let ring = surface(&mask, &[3, 3, 3]);
        assert_eq!(ring, mask);
    }
}
