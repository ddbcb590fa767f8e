use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::projection::{read_projection, write_projection, Projection};
use crate::error::{Error, Result};

pub const METADATA_FILE: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    /// Path relative to the X-ray directory.
    pub file: PathBuf,
    /// Source rotation around the z axis, in radians.
    pub angle: f64,
}

/// Contents of `meta.json` in an X-ray directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayMetadata {
    /// Detector size as `[width, height]`; width is lateral (y), height axial (z).
    pub size: [usize; 2],
    /// Pixel spacing in mm as `[y, z]`.
    pub spacing: [f64; 2],
    pub projections: Vec<ProjectionEntry>,
    /// String metadata copied onto generated CT images.
    #[serde(default)]
    pub ct_meta: BTreeMap<String, String>,
}

impl XrayMetadata {
    pub fn load(xray_dir: &Path) -> Result<Self> {
        let path = xray_dir.join(METADATA_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::Dataset(format!("cannot read {}: {}", path.display(), e))
        })?;
        let metadata: XrayMetadata = serde_json::from_str(&content)?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn save(&self, xray_dir: &Path) -> Result<()> {
        fs::create_dir_all(xray_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(xray_dir.join(METADATA_FILE), content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.size.iter().any(|&n| n == 0) {
            return Err(Error::Dataset("meta.json size entries must be positive".into()));
        }
        if self.spacing.iter().any(|&s| !s.is_finite() || s <= 0.0) {
            return Err(Error::Dataset("meta.json spacing entries must be positive".into()));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.size[0]
    }

    pub fn height(&self) -> usize {
        self.size[1]
    }

    /// Physical width of an axial slice in centimetres (spacing is in mm).
    pub fn slice_size_cm(&self) -> f64 {
        self.size[0] as f64 * self.spacing[0] / 10.0
    }

    /// `[width, height]` as floats, the shape rays are normalized against.
    pub fn img_shape(&self) -> [f32; 2] {
        [self.size[0] as f32, self.size[1] as f32]
    }
}

/// A single detector pixel of a single projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSample {
    /// `[column, row]`
    pub pixel: [f32; 2],
    pub angle: f32,
    pub intensity: f32,
}

/// Every pixel of every projection in an X-ray directory.
#[derive(Debug, Clone)]
pub struct XrayDataset {
    pub metadata: XrayMetadata,
    pub samples: Vec<PixelSample>,
}

impl XrayDataset {
    pub fn load(xray_dir: &Path) -> Result<Self> {
        let metadata = XrayMetadata::load(xray_dir)?;
        if metadata.projections.is_empty() {
            return Err(Error::Dataset(format!(
                "no projections listed in {}",
                xray_dir.join(METADATA_FILE).display()
            )));
        }

        let projections = metadata
            .projections
            .iter()
            .map(|entry| {
                let projection = read_projection(&xray_dir.join(&entry.file))?;
                Ok((entry.angle, projection))
            })
            .collect::<Result<Vec<_>>>()?;

        let dataset = Self::from_projections(metadata, &projections)?;
        tracing::info!(
            "Loaded {} projections ({}x{}) with {} pixels from {}",
            projections.len(),
            dataset.metadata.width(),
            dataset.metadata.height(),
            dataset.len(),
            xray_dir.display()
        );
        Ok(dataset)
    }

    pub fn from_projections(
        metadata: XrayMetadata,
        projections: &[(f64, Projection)],
    ) -> Result<Self> {
        let (width, height) = (metadata.width(), metadata.height());
        let mut samples = Vec::with_capacity(projections.len() * width * height);

        for (angle, projection) in projections {
            if projection.width != width || projection.height != height {
                return Err(Error::Dataset(format!(
                    "projection is {}x{} but meta.json declares {}x{}",
                    projection.width, projection.height, width, height
                )));
            }
            for row in 0..height {
                for col in 0..width {
                    samples.push(PixelSample {
                        pixel: [col as f32, row as f32],
                        angle: *angle as f32,
                        intensity: projection.get(row, col),
                    });
                }
            }
        }

        Ok(XrayDataset { metadata, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Write an X-ray directory: `meta.json` plus one file per projection.
///
/// File names in `metadata.projections` are used as given; `projections`
/// must follow the same order.
pub fn write_xray_dir(
    xray_dir: &Path,
    metadata: &XrayMetadata,
    projections: &[Projection],
) -> Result<()> {
    if metadata.projections.len() != projections.len() {
        return Err(Error::Dataset(format!(
            "{} projection entries but {} projections",
            metadata.projections.len(),
            projections.len()
        )));
    }
    metadata.save(xray_dir)?;
    for (entry, projection) in metadata.projections.iter().zip(projections) {
        write_projection(&xray_dir.join(&entry.file), projection)?;
    }
    Ok(())
}
