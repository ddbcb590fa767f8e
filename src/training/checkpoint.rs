use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ModelKind;
use crate::error::{Error, Result};
use crate::model::XRayModel;

pub type DefaultRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const CHECKPOINT_EXTENSION: &str = "mpk";

pub fn default_recorder() -> DefaultRecorder {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn checkpoint_stem(kind: ModelKind) -> String {
    format!("{}_epoch_", kind)
}

/// Path of the `kind` checkpoint for `epoch`, including the extension.
pub fn checkpoint_path(checkpoint_dir: &Path, kind: ModelKind, epoch: usize) -> PathBuf {
    checkpoint_dir
        .join(format!("{}{}", checkpoint_stem(kind), epoch))
        .with_extension(CHECKPOINT_EXTENSION)
}

pub fn save_checkpoint<B: Backend>(
    model: &XRayModel<B>,
    checkpoint_dir: &Path,
    kind: ModelKind,
    epoch: usize,
) -> Result<PathBuf> {
    fs::create_dir_all(checkpoint_dir)?;

    let path = checkpoint_path(checkpoint_dir, kind, epoch);
    model
        .clone()
        .save_file(path.with_extension(""), &default_recorder())?;

    tracing::info!("Saved {} checkpoint: {}", kind, path.display());
    Ok(path)
}

pub fn load_checkpoint<B: Backend>(
    model: XRayModel<B>,
    checkpoint_path: &Path,
    device: &B::Device,
) -> Result<XRayModel<B>> {
    if !checkpoint_path.exists() {
        return Err(Error::Checkpoint(format!(
            "checkpoint not found: {}",
            checkpoint_path.display()
        )));
    }
    let path_without_ext = checkpoint_path.with_extension("");
    Ok(model.load_file(path_without_ext, &default_recorder(), device)?)
}

/// Load the `kind` checkpoint of `epoch`, or of the latest epoch when `None`.
pub fn load_epoch<B: Backend>(
    model: XRayModel<B>,
    checkpoint_dir: &Path,
    kind: ModelKind,
    epoch: Option<usize>,
    device: &B::Device,
) -> Result<(XRayModel<B>, usize)> {
    let (epoch, path) = match epoch {
        Some(epoch) => (epoch, checkpoint_path(checkpoint_dir, kind, epoch)),
        None => find_latest_checkpoint(checkpoint_dir, kind).ok_or_else(|| {
            Error::Checkpoint(format!(
                "no {} checkpoints in {}",
                kind,
                checkpoint_dir.display()
            ))
        })?,
    };

    tracing::info!("Loading {} checkpoint from epoch {}: {}", kind, epoch, path.display());
    let model = load_checkpoint(model, &path, device)?;
    Ok((model, epoch))
}

/// Highest-epoch `kind` checkpoint in `checkpoint_dir`.
pub fn find_latest_checkpoint(checkpoint_dir: &Path, kind: ModelKind) -> Option<(usize, PathBuf)> {
    if !checkpoint_dir.exists() {
        return None;
    }

    let prefix = checkpoint_stem(kind);
    let mut checkpoints: Vec<(usize, PathBuf)> = fs::read_dir(checkpoint_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension()?.to_str()? != CHECKPOINT_EXTENSION {
                return None;
            }
            let filename = path.file_stem()?.to_str()?;
            let epoch: usize = filename.strip_prefix(prefix.as_str())?.parse().ok()?;
            Some((epoch, path))
        })
        .collect();

    checkpoints.sort_by_key(|(epoch, _)| *epoch);
    checkpoints.pop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::XRayModelConfig;
    use burn::backend::NdArray;
    use burn::prelude::*;

    type TestBackend = NdArray<f32>;

    fn model() -> XRayModel<TestBackend> {
        XRayModelConfig::new()
            .with_n_layers(2)
            .with_layer_dim(8)
            .with_num_frequencies(2)
            .init(&Default::default())
    }

    #[test]
    fn save_then_load_restores_weights() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let original = model();
        let path = save_checkpoint(&original, dir.path(), ModelKind::Coarse, 3).unwrap();
        assert_eq!(path, dir.path().join("coarse_epoch_3.mpk"));
        assert!(path.exists());

        let (restored, epoch) =
            load_epoch(model(), dir.path(), ModelKind::Coarse, Some(3), &device).unwrap();
        assert_eq!(epoch, 3);

        let points = Tensor::<TestBackend, 2>::zeros([4, 3], &device);
        let a = original.forward(points.clone()).into_data().to_vec::<f32>().unwrap();
        let b = restored.forward(points).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn latest_checkpoint_is_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        for epoch in [2, 10, 4] {
            std::fs::write(checkpoint_path(dir.path(), ModelKind::Fine, epoch), b"").unwrap();
        }
        std::fs::write(checkpoint_path(dir.path(), ModelKind::Coarse, 20), b"").unwrap();
        std::fs::write(dir.path().join("fine_epoch_99.tmp"), b"").unwrap();

        let (epoch, path) = find_latest_checkpoint(dir.path(), ModelKind::Fine).unwrap();
        assert_eq!(epoch, 10);
        assert_eq!(path, dir.path().join("fine_epoch_10.mpk"));
        assert_eq!(
            find_latest_checkpoint(dir.path(), ModelKind::Coarse).map(|(e, _)| e),
            Some(20)
        );
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_epoch(model(), dir.path(), ModelKind::Fine, None, &Default::default());
        assert!(matches!(result, Err(Error::Checkpoint(_))));

        let result = load_epoch(model(), dir.path(), ModelKind::Fine, Some(1), &Default::default());
        assert!(matches!(result, Err(Error::Checkpoint(_))));
    }
}
