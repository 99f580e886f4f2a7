//! Loading of prediction and target images listed in the evaluation CSV.

use std::path::Path;

use image::{ColorType, DynamicImage};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use tracing::debug;

use crate::error::{MedEvalError, MedEvalResult};

/// An image in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedImage {
    /// Voxel values in row-major order.
    pub data: Vec<f32>,
    /// Extent of every axis.
    pub shape: Vec<usize>,
    /// Physical voxel size along every axis.
    pub spacing: Vec<f64>,
}

impl LoadedImage {
    /// Number of spatial axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Removes trailing axes of extent 1 (keeping at least one axis).
    fn squeeze_trailing(mut self) -> Self {
        while self.shape.len() > 1 && self.shape.last() == Some(&1) {
            self.shape.pop();
            self.spacing.pop();
        }
        self
    }
}

fn is_nifti(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

fn read_failed(path: &Path, reason: impl ToString) -> MedEvalError {
    MedEvalError::ImageReadFailed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Reads a NIfTI volume (`.nii`, `.nii.gz`) or a 2D image in any format supported by
/// the `image` crate.
///
/// NIfTI spacing comes from `pixdim`; 2D images are converted to a single intensity
/// channel without rescaling and get unit spacing.
///
/// # Errors
///
/// Returns [`MedEvalError::ImageReadFailed`] when the file cannot be opened or decoded.
pub fn read_image(path: impl AsRef<Path>) -> MedEvalResult<LoadedImage> {
    let path = path.as_ref();
    let image = if is_nifti(path) {
        read_nifti(path)?
    } else {
        read_raster(path)?
    }
    .squeeze_trailing();

    debug!(
        path = %path.display(),
        shape = ?image.shape,
        spacing = ?image.spacing,
        "loaded image"
    );
    Ok(image)
}

fn read_nifti(path: &Path) -> MedEvalResult<LoadedImage> {
    let object = ReaderOptions::new()
        .read_file(path)
        .map_err(|err| read_failed(path, err))?;
    let pixdim = object.header().pixdim;

    let volume = object
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|err| read_failed(path, err))?;

    let shape = volume.shape().to_vec();
    let spacing = (0..shape.len())
        .map(|axis| match pixdim.get(axis + 1) {
            Some(&size) if size > 0.0 => f64::from(size),
            _ => 1.0,
        })
        .collect();
    // logical iteration order, whatever the memory layout of the volume
    let data = volume.iter().copied().collect();

    Ok(LoadedImage {
        data,
        shape,
        spacing,
    })
}

fn read_raster(path: &Path) -> MedEvalResult<LoadedImage> {
    let image = image::open(path).map_err(|err| read_failed(path, err))?;
    let shape = vec![image.height() as usize, image.width() as usize];
    Ok(LoadedImage {
        data: intensities(image),
        shape,
        spacing: vec![1.0; 2],
    })
}

/// Grayscale values in the native range of the pixel type, so label maps keep their
/// class indices.
fn intensities(image: DynamicImage) -> Vec<f32> {
    match image.color() {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => image
            .into_luma16()
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect(),
        ColorType::Rgb32F | ColorType::Rgba32F => image.to_luma32f().into_raw(),
        _ => image
            .into_luma8()
            .into_raw()
            .into_iter()
            .map(f32::from)
            .collect(),
    }
}
