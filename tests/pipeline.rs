use burn::backend::{Autodiff, NdArray};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ctnerf::config::{InferenceConfig, ModelKind, ModelSettings, TrainingConfig};
use ctnerf::data::{write_xray_dir, Projection, ProjectionEntry, XrayMetadata};
use ctnerf::inference::{generate_ct, read_metaimage};
use ctnerf::rays::SamplingFunction;
use ctnerf::training::{checkpoint_path, train};
use ctnerf::Error;

type Backend = NdArray<f32>;
type TrainBackend = Autodiff<Backend>;

const WIDTH: usize = 8;
const HEIGHT: usize = 4;

/// A water cylinder of radius 0.5 seen from `num_angles` directions.
fn write_phantom(dir: &Path, num_angles: usize) -> XrayMetadata {
    let metadata = XrayMetadata {
        size: [WIDTH, HEIGHT],
        spacing: [2.5, 2.5],
        projections: (0..num_angles)
            .map(|i| ProjectionEntry {
                file: PathBuf::from(format!("proj_{i:03}.bin")),
                angle: i as f64 * std::f64::consts::PI / num_angles as f64,
            })
            .collect(),
        ct_meta: BTreeMap::from([("PatientID".to_string(), "phantom".to_string())]),
    };

    let half_width_cm = metadata.slice_size_cm() / 2.0;
    let column: Vec<f32> = (0..WIDTH)
        .map(|col| {
            let u = (2 * col + 1) as f64 / WIDTH as f64 - 1.0;
            let chord = 2.0 * (0.25 - u * u).max(0.0).sqrt() * half_width_cm;
            (-0.206 * chord).exp() as f32
        })
        .collect();
    let values: Vec<f32> = (0..HEIGHT).flat_map(|_| column.iter().copied()).collect();
    let projection = Projection::new(HEIGHT, WIDTH, values).unwrap();

    let projections = vec![projection; num_angles];
    write_xray_dir(dir, &metadata, &projections).unwrap();
    metadata
}

fn tiny_model() -> ModelSettings {
    ModelSettings {
        n_layers: 2,
        layer_dim: 16,
        num_frequencies: 2,
    }
}

fn training_config(root: &Path) -> TrainingConfig {
    let mut config = TrainingConfig::default_config();
    config.run_name = "phantom".to_string();
    config.device = "cpu".to_string();
    config.data.xray_dir = root.join("xrays");
    config.data.num_workers = 0;
    config.checkpoint.dir = root.join("checkpoints");
    config.checkpoint.interval = 1;
    config.model = tiny_model();
    config.training.epochs = 1;
    config.training.learning_rate = 1e-3;
    config.training.batch_size = 32;
    config.training.num_coarse_samples = 8;
    config.training.num_fine_samples = 8;
    config.training.coarse_sampling_function = SamplingFunction::PlateauCylinder;
    config.training.seed = Some(7);
    config.training.log_interval = 1;
    config
}

fn inference_config(root: &Path, training: &TrainingConfig) -> InferenceConfig {
    let mut config = InferenceConfig::default_config();
    config.device = "cpu".to_string();
    config.model_type = ModelKind::Fine;
    config.model = tiny_model();
    config.checkpoint.dir = training.run_checkpoint_dir();
    config.checkpoint.epoch = None;
    config.output.dir = root.join("out");
    config.output.name = "phantom".to_string();
    config.xray_dir = training.data.xray_dir.clone();
    config.chunk_size = 50;
    config
}

#[test]
fn trains_then_reconstructs_phantom() {
    let root = tempfile::tempdir().unwrap();
    let training = training_config(root.path());
    write_phantom(&training.data.xray_dir, 4);

    let device = Default::default();
    let outcome = train::<TrainBackend>(&training, &device).unwrap();
    assert_eq!(outcome.final_epoch, 1);
    assert!(outcome.final_loss.is_finite());
    assert!(outcome.fine.is_some());

    let run_dir = training.run_checkpoint_dir();
    assert!(checkpoint_path(&run_dir, ModelKind::Coarse, 1).exists());
    assert!(checkpoint_path(&run_dir, ModelKind::Fine, 1).exists());
    assert!(run_dir.join("config.yaml").exists());

    let mut inference = inference_config(root.path(), &training);
    inference.image_size = Some(vec![6, 6, 4]);
    let path = generate_ct::<Backend>(&inference, &device).unwrap();
    assert_eq!(path, root.path().join("out/phantom.mha"));

    let (header, voxels) = read_metaimage(&path).unwrap();
    assert_eq!(header["DimSize"], "6 6 4");
    assert_eq!(header["ElementType"], "MET_SHORT");
    assert_eq!(header["PatientID"], "phantom");
    assert_eq!(voxels.len(), 6 * 6 * 4);
    assert!(voxels.iter().all(|&v| v >= -1024));
}

#[test]
fn coarse_model_reconstructs_at_requested_spacing() {
    let root = tempfile::tempdir().unwrap();
    let mut training = training_config(root.path());
    training.training.num_fine_samples = 0;
    training.training.coarse_sampling_function = SamplingFunction::Stratified;
    write_phantom(&training.data.xray_dir, 2);

    let device = Default::default();
    train::<TrainBackend>(&training, &device).unwrap();

    let mut inference = inference_config(root.path(), &training);
    inference.model_type = ModelKind::Coarse;
    inference.checkpoint.epoch = Some(1);
    // reference extent is 20 x 20 x 10 mm
    inference.voxel_spacing = Some(vec![5.0, 5.0, 5.0]);
    let path = generate_ct::<Backend>(&inference, &device).unwrap();

    let (header, voxels) = read_metaimage(&path).unwrap();
    assert_eq!(header["DimSize"], "4 4 2");
    assert_eq!(header["ElementSpacing"], "5 5 5");
    assert_eq!(voxels.len(), 32);

    // no fine model was trained for this run
    inference.model_type = ModelKind::Fine;
    inference.output.name = "missing".to_string();
    let err = generate_ct::<Backend>(&inference, &device).unwrap_err();
    assert!(matches!(err, Error::Checkpoint(_)));
}
