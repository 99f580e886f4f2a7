//! Surface-distance metrics of a single pair of binary masks.

use burn_extra_ops::{distance_transform_edt, surface};

use super::utils::percentile;

/// Distances between the surfaces of a predicted and a reference mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceDistances {
    /// Normalised surface Dice: fraction of surface voxels within the tolerance.
    pub nsd: f64,
    /// Symmetric Hausdorff distance (maximum of both directed maxima).
    pub hd100: f64,
    /// Robust Hausdorff distance (maximum of both directed percentiles).
    pub hd95: f64,
}

/// Computes [`SurfaceDistances`] for one pair of masks.
///
/// # Arguments
/// * `prediction`, `target` - Binary masks in row-major order
/// * `shape` - Extent of each spatial axis
/// * `spacing` - Physical voxel size along each axis
/// * `tolerance` - NSD tolerance in physical units
/// * `hausdorff_percentile` - Percentile used for `hd95`
///
/// Two empty masks agree perfectly (distances 0, NSD 1). When exactly one mask is
/// empty the distances are the physical diagonal of the image and NSD is 0.
pub fn surface_distances(
    prediction: &[bool],
    target: &[bool],
    shape: &[usize],
    spacing: &[f64],
    tolerance: f64,
    hausdorff_percentile: f64,
) -> SurfaceDistances {
    let prediction_surface = surface(prediction, shape);
    let target_surface = surface(target, shape);

    let (Some(to_prediction), Some(to_target)) = (
        distance_transform_edt(&prediction_surface, shape, spacing),
        distance_transform_edt(&target_surface, shape, spacing),
    ) else {
        let prediction_empty = !prediction_surface.iter().any(|&v| v);
        let target_empty = !target_surface.iter().any(|&v| v);
        return if prediction_empty && target_empty {
            SurfaceDistances {
                nsd: 1.0,
                hd100: 0.0,
                hd95: 0.0,
            }
        } else {
            let diagonal = physical_diagonal(shape, spacing);
            SurfaceDistances {
                nsd: 0.0,
                hd100: diagonal,
                hd95: diagonal,
            }
        };
    };

    // target surface -> prediction surface, and the reverse
    let target_to_prediction = select(&to_prediction, &target_surface);
    let prediction_to_target = select(&to_target, &prediction_surface);

    let max_of = |values: &[f64]| values.iter().copied().fold(0.0, f64::max);
    let hd100 = max_of(&target_to_prediction).max(max_of(&prediction_to_target));
    let hd95 = percentile(&target_to_prediction, hausdorff_percentile)
        .max(percentile(&prediction_to_target, hausdorff_percentile));

    let within = target_to_prediction
        .iter()
        .chain(prediction_to_target.iter())
        .filter(|&&distance| distance <= tolerance)
        .count();
    let total = target_to_prediction.len() + prediction_to_target.len();

    SurfaceDistances {
        nsd: within as f64 / total as f64,
        hd100,
        hd95,
    }
}

/// Length of the image diagonal in physical units.
pub fn physical_diagonal(shape: &[usize], spacing: &[f64]) -> f64 {
    shape
        .iter()
        .zip(spacing)
        .map(|(&extent, &step)| (extent as f64 * step).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn select(distances: &[f64], surface: &[bool]) -> Vec<f64> {
    distances
        .iter()
        .zip(surface)
        .filter_map(|(&distance, &on_surface)| on_surface.then_some(distance))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: usize, x0: usize, y0: usize, side: usize) -> Vec<bool> {
        let mut mask = vec![false; size * size];
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                mask[y * size + x] = true;
            }
        }
        mask
    }

    #[test]
    fn test_identical_masks() {
        let mask = square(8, 2, 2, 3);
        let result = surface_distances(&mask, &mask, &[8, 8], &[1.0, 1.0], 1.0, 95.0);
        assert_eq!(result.hd100, 0.0);
        assert_eq!(result.hd95, 0.0);
        assert_eq!(result.nsd, 1.0);
    }

    #[test]
    fn test_shifted_masks() {
        let prediction = square(10, 2, 2, 3);
        let target = square(10, 4, 2, 3);
        let result = surface_distances(&prediction, &target, &[10, 10], &[1.0, 1.0], 1.0, 95.0);

        // Every surface voxel is at most two columns away from the other surface.
        assert!((result.hd100 - 2.0).abs() < 1e-12);
        assert!(result.hd95 <= result.hd100);
        assert!(result.nsd > 0.0 && result.nsd < 1.0);
    }

    #[test]
    fn test_spacing_scales_distances() {
        let prediction = square(10, 2, 2, 3);
        let target = square(10, 4, 2, 3);
        let result = surface_distances(&prediction, &target, &[10, 10], &[1.0, 0.5], 1.0, 95.0);
        // The shift is along the last axis, whose spacing is 0.5.
        assert!((result.hd100 - 1.0).abs() < 1e-12);
        assert_eq!(result.nsd, 1.0);
    }

    #[test]
    fn test_empty_masks() {
        let empty = vec![false; 16];
        let both = surface_distances(&empty, &empty, &[4, 4], &[1.0, 1.0], 1.0, 95.0);
        assert_eq!(both.nsd, 1.0);
        assert_eq!(both.hd100, 0.0);

        let mask = square(4, 1, 1, 2);
        let one = surface_distances(&mask, &empty, &[4, 4], &[2.0, 1.0], 1.0, 95.0);
        assert_eq!(one.nsd, 0.0);
        assert!((one.hd100 - physical_diagonal(&[4, 4], &[2.0, 1.0])).abs() < 1e-12);
        assert!((one.hd95 - 80.0_f64.sqrt()).abs() < 1e-12);
    }
}
