use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::rays::SamplingFunction;

pub mod device;
pub use device::*;

/// Which of the two jointly trained networks a checkpoint or inference run refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Coarse,
    #[default]
    Fine,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Coarse => write!(f, "coarse"),
            ModelKind::Fine => write!(f, "fine"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub run_name: String,
    #[serde(default = "default_device")]
    pub device: String,
    pub data: DataSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub training: OptimSettings,
    #[serde(default)]
    pub scaling: ScalingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSettings {
    pub xray_dir: PathBuf,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default)]
    pub pin_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointSettings {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_checkpoint_interval")]
    pub interval: usize,
    #[serde(default)]
    pub resume_epoch: Option<usize>,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        CheckpointSettings {
            dir: default_checkpoint_dir(),
            interval: default_checkpoint_interval(),
            resume_epoch: None,
        }
    }
}

/// Architecture scalars shared by the training and inference documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSettings {
    #[serde(default = "default_n_layers")]
    pub n_layers: usize,
    #[serde(default = "default_layer_dim")]
    pub layer_dim: usize,
    /// Positional-encoding frequency count.
    #[serde(rename = "L", default = "default_num_frequencies")]
    pub num_frequencies: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings {
            n_layers: default_n_layers(),
            layer_dim: default_layer_dim(),
            num_frequencies: default_num_frequencies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimSettings {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_coarse_samples")]
    pub num_coarse_samples: usize,
    #[serde(default = "default_num_fine_samples")]
    pub num_fine_samples: usize,
    #[serde(default)]
    pub coarse_sampling_function: SamplingFunction,
    #[serde(default = "default_plateau_ratio")]
    pub plateau_ratio: Option<f64>,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub mixed_precision: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
}

impl Default for OptimSettings {
    fn default() -> Self {
        OptimSettings {
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            num_coarse_samples: default_num_coarse_samples(),
            num_fine_samples: default_num_fine_samples(),
            coarse_sampling_function: SamplingFunction::default(),
            plateau_ratio: default_plateau_ratio(),
            precision: Precision::F32,
            mixed_precision: false,
            seed: None,
            log_interval: default_log_interval(),
        }
    }
}

/// Intensity scaling constants applied to rendered transmittance as `ln(T + k) / s`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ScalingSettings {
    #[serde(default)]
    pub s: Option<f64>,
    #[serde(default)]
    pub k: Option<f64>,
}

impl ScalingSettings {
    /// Both constants, or nothing when either one is unset.
    pub fn pair(&self) -> Option<(f64, f64)> {
        match (self.s, self.k) {
            (Some(s), Some(k)) => Some((s, k)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub model_type: ModelKind,
    #[serde(default)]
    pub model: ModelSettings,
    pub checkpoint: InferenceCheckpoint,
    #[serde(default)]
    pub output: OutputSettings,
    pub xray_dir: PathBuf,
    #[serde(default)]
    pub image_size: Option<Vec<usize>>,
    #[serde(default)]
    pub voxel_spacing: Option<Vec<f64>>,
    #[serde(default)]
    pub image_origin: Option<Vec<f64>>,
    #[serde(default)]
    pub image_direction: Option<Vec<f64>>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub attenuation_scaling_factor: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceCheckpoint {
    pub dir: PathBuf,
    #[serde(default)]
    pub epoch: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_output_name")]
    pub name: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            dir: default_output_dir(),
            name: default_output_name(),
        }
    }
}

fn default_device() -> String {
    "cpu".to_string()
}
fn default_num_workers() -> usize {
    2
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}
fn default_checkpoint_interval() -> usize {
    10
}
fn default_n_layers() -> usize {
    8
}
fn default_layer_dim() -> usize {
    256
}
fn default_num_frequencies() -> usize {
    10
}
fn default_epochs() -> usize {
    100
}
fn default_learning_rate() -> f64 {
    5e-4
}
fn default_batch_size() -> usize {
    1024
}
fn default_num_coarse_samples() -> usize {
    64
}
fn default_num_fine_samples() -> usize {
    64
}
fn default_plateau_ratio() -> Option<f64> {
    Some(1.0)
}
fn default_log_interval() -> usize {
    100
}
fn default_chunk_size() -> usize {
    65536
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_output_name() -> String {
    "ct".to_string()
}

fn load_yaml<T: serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn save_yaml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let content = serde_yaml::to_string(value)?;
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(())
}

fn require_positive(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::invalid(field, "must be a positive integer"));
    }
    Ok(())
}

fn require_positive_float(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::invalid(field, format!("must be finite and positive, got {value}")));
    }
    Ok(())
}

fn require_len<T>(field: &str, values: &[T], len: usize) -> Result<()> {
    if values.len() != len {
        return Err(Error::invalid(
            field,
            format!("expected {len} elements, got {}", values.len()),
        ));
    }
    Ok(())
}

impl ModelSettings {
    pub fn validate(&self) -> Result<()> {
        require_positive("model.n_layers", self.n_layers)?;
        require_positive("model.layer_dim", self.layer_dim)?;
        Ok(())
    }
}

impl ScalingSettings {
    pub fn validate(&self) -> Result<()> {
        match (self.s, self.k) {
            (Some(s), Some(k)) => {
                if !s.is_finite() || s == 0.0 {
                    return Err(Error::invalid("scaling.s", "must be finite and non-zero"));
                }
                if !k.is_finite() {
                    return Err(Error::invalid("scaling.k", "must be finite"));
                }
                Ok(())
            }
            (None, None) => Ok(()),
            (Some(_), None) => Err(Error::invalid("scaling.k", "required when scaling.s is set")),
            (None, Some(_)) => Err(Error::invalid("scaling.s", "required when scaling.k is set")),
        }
    }
}

impl TrainingConfig {
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_yaml(path)
    }

    pub fn save_to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_yaml(self, path)
    }

    pub fn device_spec(&self) -> Result<DeviceSpec> {
        self.device.parse()
    }

    /// Compute precision with the mixed-precision flag applied.
    pub fn precision(&self) -> Precision {
        self.training
            .precision
            .effective(self.training.mixed_precision)
    }

    /// Directory holding this run's checkpoints.
    pub fn run_checkpoint_dir(&self) -> PathBuf {
        self.checkpoint.dir.join(&self.run_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.trim().is_empty() {
            return Err(Error::invalid("run_name", "must not be empty"));
        }
        self.device_spec()?;
        self.model.validate()?;
        self.scaling.validate()?;
        require_positive("checkpoint.interval", self.checkpoint.interval)?;

        let t = &self.training;
        require_positive("training.epochs", t.epochs)?;
        require_positive("training.batch_size", t.batch_size)?;
        require_positive("training.num_coarse_samples", t.num_coarse_samples)?;
        require_positive("training.log_interval", t.log_interval)?;
        require_positive_float("training.learning_rate", t.learning_rate)?;

        if let Some(ratio) = t.plateau_ratio {
            require_positive_float("training.plateau_ratio", ratio)?;
        }
        if t.coarse_sampling_function == SamplingFunction::PlateauCylinder
            && t.plateau_ratio.is_none()
        {
            return Err(Error::invalid(
                "training.plateau_ratio",
                "required by plateau_cylinder sampling",
            ));
        }

        if let Some(resume) = self.checkpoint.resume_epoch {
            if resume >= t.epochs {
                return Err(Error::invalid(
                    "checkpoint.resume_epoch",
                    format!("must be below training.epochs ({})", t.epochs),
                ));
            }
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        TrainingConfig {
            run_name: "ctnerf_run".to_string(),
            device: default_device(),
            data: DataSettings {
                xray_dir: PathBuf::from("data/xrays"),
                num_workers: default_num_workers(),
                pin_memory: false,
            },
            checkpoint: CheckpointSettings::default(),
            model: ModelSettings::default(),
            training: OptimSettings::default(),
            scaling: ScalingSettings::default(),
        }
    }
}

impl InferenceConfig {
    pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_yaml(path)
    }

    pub fn save_to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_yaml(self, path)
    }

    pub fn device_spec(&self) -> Result<DeviceSpec> {
        self.device.parse()
    }

    /// Output file path; `.mha` is appended when the name has no extension.
    pub fn output_path(&self) -> PathBuf {
        let path = self.output.dir.join(&self.output.name);
        if path.extension().is_some() {
            path
        } else {
            path.with_extension("mha")
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.device_spec()?;
        self.model.validate()?;
        require_positive("chunk_size", self.chunk_size)?;

        if self.output.name.trim().is_empty() {
            return Err(Error::invalid("output.name", "must not be empty"));
        }

        if let Some(size) = &self.image_size {
            require_len("image_size", size, 3)?;
            if size.iter().any(|&n| n == 0) {
                return Err(Error::invalid("image_size", "entries must be positive"));
            }
        }
        if let Some(spacing) = &self.voxel_spacing {
            require_len("voxel_spacing", spacing, 3)?;
            for &s in spacing {
                require_positive_float("voxel_spacing", s)?;
            }
        }
        if let Some(origin) = &self.image_origin {
            require_len("image_origin", origin, 3)?;
            if origin.iter().any(|v| !v.is_finite()) {
                return Err(Error::invalid("image_origin", "entries must be finite"));
            }
        }
        if let Some(direction) = &self.image_direction {
            require_len("image_direction", direction, 9)?;
            if direction.iter().any(|v| !v.is_finite()) {
                return Err(Error::invalid("image_direction", "entries must be finite"));
            }
        }
        if let Some(factor) = self.attenuation_scaling_factor {
            require_positive_float("attenuation_scaling_factor", factor)?;
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        InferenceConfig {
            device: default_device(),
            model_type: ModelKind::Fine,
            model: ModelSettings::default(),
            checkpoint: InferenceCheckpoint {
                dir: PathBuf::from("checkpoints/ctnerf_run"),
                epoch: None,
            },
            output: OutputSettings::default(),
            xray_dir: PathBuf::from("data/xrays"),
            image_size: None,
            voxel_spacing: None,
            image_origin: None,
            image_direction: None,
            chunk_size: default_chunk_size(),
            attenuation_scaling_factor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAINING_YAML: &str = r#"
run_name: chest
device: cuda:0
data:
  xray_dir: data/chest
  num_workers: 4
  pin_memory: true
checkpoint:
  dir: ckpt
  interval: 5
  resume_epoch: 20
model:
  n_layers: 6
  layer_dim: 128
  L: 8
training:
  epochs: 50
  learning_rate: 0.001
  batch_size: 512
  num_coarse_samples: 32
  num_fine_samples: 0
  coarse_sampling_function: plateau_cylinder_sampling
  plateau_ratio: 2.0
  precision: float32
  mixed_precision: true
scaling:
  s: 0.5
  k: 0.01
"#;

    const INFERENCE_YAML: &str = r#"
device: cpu
model_type: coarse
model:
  n_layers: 6
  layer_dim: 128
  L: 8
checkpoint:
  dir: ckpt/chest
  epoch: 50
output:
  dir: out
  name: chest_ct
xray_dir: data/chest
voxel_spacing: [0.8, 0.8, 1.5]
image_origin: [-100.0, -100.0, 0.0]
image_direction: [1, 0, 0, 0, 1, 0, 0, 0, 1]
chunk_size: 4096
attenuation_scaling_factor: 1.2
"#;

    #[test]
    fn parses_training_config() {
        let config: TrainingConfig = serde_yaml::from_str(TRAINING_YAML).unwrap();
        config.validate().unwrap();

        assert_eq!(config.run_name, "chest");
        assert_eq!(config.model.num_frequencies, 8);
        assert_eq!(
            config.training.coarse_sampling_function,
            SamplingFunction::PlateauCylinder
        );
        assert_eq!(config.checkpoint.resume_epoch, Some(20));
        assert_eq!(config.scaling.pair(), Some((0.5, 0.01)));
        assert_eq!(config.precision(), Precision::F16);
        assert_eq!(config.run_checkpoint_dir(), PathBuf::from("ckpt/chest"));
        assert_eq!(config.device_spec().unwrap().backend, BackendKind::CandleCuda);
    }

    #[test]
    fn training_defaults_fill_missing_sections() {
        let config: TrainingConfig =
            serde_yaml::from_str("run_name: r\ndata:\n  xray_dir: x\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.model, ModelSettings::default());
        assert_eq!(config.training.batch_size, 1024);
        assert_eq!(config.data.num_workers, 2);
        assert!(config.scaling.pair().is_none());
    }

    #[test]
    fn rejects_unknown_keys() {
        let yaml = "run_name: r\ndata:\n  xray_dir: x\nmodel:\n  n_layer: 3\n";
        assert!(serde_yaml::from_str::<TrainingConfig>(yaml).is_err());
    }

    #[test]
    fn rejects_non_positive_architecture() {
        let mut config = TrainingConfig::default_config();
        config.model.n_layers = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { ref field, .. }) if field == "model.n_layers"
        ));
    }

    #[test]
    fn rejects_half_specified_scaling() {
        let mut config = TrainingConfig::default_config();
        config.scaling.s = Some(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn plateau_sampling_requires_ratio() {
        let mut config = TrainingConfig::default_config();
        config.training.coarse_sampling_function = SamplingFunction::PlateauCylinder;
        config.training.plateau_ratio = None;
        assert!(config.validate().is_err());

        config.training.coarse_sampling_function = SamplingFunction::Uniform;
        config.validate().unwrap();
    }

    #[test]
    fn resume_epoch_must_precede_final_epoch() {
        let mut config = TrainingConfig::default_config();
        config.checkpoint.resume_epoch = Some(config.training.epochs);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_inference_config() {
        let config: InferenceConfig = serde_yaml::from_str(INFERENCE_YAML).unwrap();
        config.validate().unwrap();

        assert_eq!(config.model_type, ModelKind::Coarse);
        assert_eq!(config.checkpoint.epoch, Some(50));
        assert_eq!(config.output_path(), PathBuf::from("out/chest_ct.mha"));
        assert_eq!(config.voxel_spacing, Some(vec![0.8, 0.8, 1.5]));
        assert_eq!(config.image_direction.as_ref().map(Vec::len), Some(9));
    }

    #[test]
    fn voxel_spacing_must_be_three_positive_floats() {
        let mut config = InferenceConfig::default_config();
        config.voxel_spacing = Some(vec![1.0, 1.0]);
        assert!(config.validate().is_err());

        config.voxel_spacing = Some(vec![1.0, -1.0, 1.0]);
        assert!(config.validate().is_err());

        config.voxel_spacing = Some(vec![1.0, 1.0, 2.5]);
        config.validate().unwrap();
    }

    #[test]
    fn image_direction_needs_nine_entries() {
        let mut config = InferenceConfig::default_config();
        config.image_direction = Some(vec![1.0, 0.0, 0.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_name_keeps_explicit_extension() {
        let mut config = InferenceConfig::default_config();
        config.output.name = "volume.mhd".to_string();
        assert_eq!(config.output_path(), PathBuf::from("output/volume.mhd"));
    }

    #[test]
    fn yaml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/train.yaml");
        let config = TrainingConfig::default_config();
        config.save_to_yaml(&path).unwrap();

        let loaded = TrainingConfig::load_from_yaml(&path).unwrap();
        assert_eq!(loaded.run_name, config.run_name);
        assert_eq!(loaded.model, config.model);
    }
}
