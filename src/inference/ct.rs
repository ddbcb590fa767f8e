use burn::prelude::*;
use std::path::PathBuf;

use super::metaimage::{write_metaimage, CtImage, IDENTITY_DIRECTION};
use crate::config::InferenceConfig;
use crate::data::XrayMetadata;
use crate::error::{Error, Result};
use crate::model::{XRayModel, XRayModelConfig};
use crate::progress::progress_bar;
use crate::training::load_epoch;
use crate::training::trainer::tensor_to_vec;

/// Linear attenuation coefficient of water, per cm.
pub const MU_WATER: f64 = 0.206;
/// Linear attenuation coefficient of air, per cm.
pub const MU_AIR: f64 = 0.0004;
/// Lowest value written to the CT volume.
pub const MIN_HU: f32 = -1024.0;

/// Voxel grid of the output volume, `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CtGeometry {
    pub size: [usize; 3],
    /// Voxel spacing in mm.
    pub spacing: [f64; 3],
}

impl CtGeometry {
    /// Grid implied by the projections: x mirrors the lateral detector axis.
    pub fn reference(metadata: &XrayMetadata) -> Self {
        let [width, height] = metadata.size;
        let [spacing_y, spacing_z] = metadata.spacing;
        CtGeometry {
            size: [width, width, height],
            spacing: [spacing_y, spacing_y, spacing_z],
        }
    }

    /// Physical extent in mm.
    pub fn extent(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.size[i] as f64 * self.spacing[i])
    }

    /// Output grid covering the reference extent.
    ///
    /// `voxel_spacing` wins over `image_size`; with neither, the reference grid
    /// is used unchanged.
    pub fn resolve(
        metadata: &XrayMetadata,
        image_size: Option<&[usize]>,
        voxel_spacing: Option<&[f64]>,
    ) -> Result<Self> {
        let reference = Self::reference(metadata);
        let extent = reference.extent();

        if let Some(spacing) = voxel_spacing {
            let spacing = to_array3("voxel_spacing", spacing)?;
            let size = [0, 1, 2].map(|i| ((extent[i] / spacing[i]).round() as usize).max(1));
            let geometry = CtGeometry { size, spacing };
            if geometry.num_voxels().is_none() {
                return Err(Error::invalid(
                    "voxel_spacing",
                    format!("too fine for a {:?} mm volume", extent),
                ));
            }
            return Ok(geometry);
        }
        if let Some(size) = image_size {
            let size = to_array3("image_size", size)?;
            if size.iter().any(|&n| n == 0) {
                return Err(Error::invalid("image_size", "entries must be positive"));
            }
            if voxel_count(size).is_none() {
                return Err(Error::invalid("image_size", "voxel count overflows"));
            }
            let spacing = [0, 1, 2].map(|i| extent[i] / size[i] as f64);
            return Ok(CtGeometry { size, spacing });
        }
        Ok(reference)
    }

    /// `None` when the voxel count does not fit in `usize`.
    pub fn num_voxels(&self) -> Option<usize> {
        voxel_count(self.size)
    }
}

fn voxel_count(size: [usize; 3]) -> Option<usize> {
    size.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

fn to_array3<T: Copy>(field: &str, values: &[T]) -> Result<[T; 3]> {
    match values {
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(Error::invalid(field, format!("expected 3 elements, got {}", values.len()))),
    }
}

/// Convert a predicted attenuation to Hounsfield units.
pub fn attenuation_to_hu(mu: f32, scaling_factor: Option<f64>) -> f32 {
    let mu = mu as f64 * scaling_factor.unwrap_or(1.0);
    let hu = 1000.0 * (mu - MU_WATER) / (MU_WATER - MU_AIR);
    (hu as f32).max(MIN_HU)
}

fn axis_coord(i: usize, n: usize) -> f32 {
    if n <= 1 {
        0.0
    } else {
        -1.0 + 2.0 * i as f32 / (n - 1) as f32
    }
}

/// Normalized coordinates of voxels `range`, x fastest then y then z.
fn grid_points(size: [usize; 3], range: std::ops::Range<usize>) -> Vec<f32> {
    let [nx, ny, nz] = size;
    let mut points = Vec::with_capacity(range.len() * 3);
    for idx in range {
        let x = idx % nx;
        let y = (idx / nx) % ny;
        let z = idx / (nx * ny);
        points.push(axis_coord(x, nx));
        points.push(axis_coord(y, ny));
        points.push(axis_coord(z, nz));
    }
    points
}

/// Evaluate `model` on the `size` grid spanning `[-1, 1]^3`, `chunk_size` voxels at a time.
///
/// Returns HU values, z-major with x fastest.
pub fn run_inference<B: Backend>(
    model: &XRayModel<B>,
    size: [usize; 3],
    chunk_size: usize,
    attenuation_scaling_factor: Option<f64>,
    device: &B::Device,
) -> Result<Vec<i16>> {
    if chunk_size == 0 {
        return Err(Error::invalid("chunk_size", "must be a positive integer"));
    }
    let total = voxel_count(size)
        .ok_or_else(|| Error::invalid("image_size", format!("{:?} voxels overflow", size)))?;
    let num_chunks = total.div_ceil(chunk_size);
    let progress = progress_bar(num_chunks, "generating");
    let mut voxels = Vec::with_capacity(total);

    for start in (0..total).step_by(chunk_size) {
        let end = (start + chunk_size).min(total);
        let points = grid_points(size, start..end);
        let input = Tensor::<B, 2>::from_data(TensorData::new(points, [end - start, 3]), device);

        let attenuation = tensor_to_vec(model.forward(input))?;
        voxels.extend(
            attenuation
                .into_iter()
                .map(|mu| attenuation_to_hu(mu, attenuation_scaling_factor) as i16),
        );
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(voxels)
}

/// Build the CT volume described by `config` and write it; returns the output path.
pub fn generate_ct<B: Backend>(config: &InferenceConfig, device: &B::Device) -> Result<PathBuf> {
    config.validate()?;

    let metadata = XrayMetadata::load(&config.xray_dir)?;
    let geometry = CtGeometry::resolve(
        &metadata,
        config.image_size.as_deref(),
        config.voxel_spacing.as_deref(),
    )?;

    let model: XRayModel<B> = XRayModelConfig::from_settings(&config.model).init(device);
    let (model, epoch) = load_epoch(
        model,
        &config.checkpoint.dir,
        config.model_type,
        config.checkpoint.epoch,
        device,
    )?;

    tracing::info!(
        "Generating {:?} volume ({} voxels, spacing {:?} mm) from {} model at epoch {}",
        geometry.size,
        geometry.num_voxels().unwrap_or(usize::MAX),
        geometry.spacing,
        config.model_type,
        epoch
    );

    let voxels = run_inference(
        &model,
        geometry.size,
        config.chunk_size,
        config.attenuation_scaling_factor,
        device,
    )?;

    let image = CtImage {
        size: geometry.size,
        spacing: geometry.spacing,
        origin: config
            .image_origin
            .as_deref()
            .map(|o| to_array3("image_origin", o))
            .transpose()?
            .unwrap_or([0.0; 3]),
        direction: match config.image_direction.as_deref() {
            Some(d) => d
                .try_into()
                .map_err(|_| Error::invalid("image_direction", "expected 9 elements"))?,
            None => IDENTITY_DIRECTION,
        },
        metadata: metadata.ct_meta.clone(),
        voxels,
    };

    let path = config.output_path();
    write_metaimage(&path, &image)?;
    tracing::info!("Wrote CT volume: {}", path.display());
    Ok(path)
}
