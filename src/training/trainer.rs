use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;

use super::checkpoint::{load_epoch, save_checkpoint};
use crate::config::{ModelKind, TrainingConfig};
use crate::data::{distances_tensor, points_tensor, BatchPrefetcher, RayBatch, RayBatcher, XrayDataset};
use crate::error::{Error, Result};
use crate::model::{XRayModel, XRayModelConfig};
use crate::progress::progress_bar;
use crate::rays::{beer_lambert, fine_samples};

/// Models at the end of training, on the inner (non-autodiff) backend.
pub struct TrainingOutcome<B: Backend> {
    pub coarse: XRayModel<B>,
    pub fine: Option<XRayModel<B>>,
    pub final_epoch: usize,
    /// Mean loss of the final epoch (coarse plus fine).
    pub final_loss: f32,
}

struct StepLoss {
    coarse: f32,
    fine: Option<f32>,
}

impl StepLoss {
    fn total(&self) -> f32 {
        self.coarse + self.fine.unwrap_or(0.0)
    }
}

pub(crate) fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32> {
    tensor_to_vec(tensor)?
        .first()
        .copied()
        .ok_or_else(|| Error::Tensor("empty loss tensor".to_string()))
}

/// Load the X-ray directory named by `config` and train on it.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingOutcome<B::InnerBackend>> {
    config.validate()?;
    let dataset = XrayDataset::load(&config.data.xray_dir)?;
    train_on_dataset::<B>(config, Arc::new(dataset), device)
}

pub fn train_on_dataset<B: AutodiffBackend>(
    config: &TrainingConfig,
    dataset: Arc<XrayDataset>,
    device: &B::Device,
) -> Result<TrainingOutcome<B::InnerBackend>> {
    if dataset.is_empty() {
        return Err(Error::Dataset("training dataset has no pixels".to_string()));
    }
    if config.data.pin_memory {
        tracing::warn!("pin_memory has no effect on burn backends; ignoring");
    }

    let settings = &config.training;
    let run_dir = config.run_checkpoint_dir();
    config.save_to_yaml(run_dir.join("config.yaml"))?;

    let model_config = XRayModelConfig::from_settings(&config.model);
    let mut coarse: XRayModel<B> = model_config.init(device);
    let mut fine: Option<XRayModel<B>> =
        (settings.num_fine_samples > 0).then(|| model_config.init(device));

    let precision = config.precision();
    coarse.param_stats().log_summary("Coarse", precision);
    if let Some(model) = &fine {
        model.param_stats().log_summary("Fine", precision);
    }

    let start_epoch = match config.checkpoint.resume_epoch {
        Some(epoch) => {
            coarse = resume(coarse, &run_dir, ModelKind::Coarse, epoch, device)?;
            fine = fine
                .map(|model| resume(model, &run_dir, ModelKind::Fine, epoch, device))
                .transpose()?;
            tracing::info!("Resuming run `{}` after epoch {}", config.run_name, epoch);
            epoch + 1
        }
        None => 1,
    };

    let seed = settings.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coarse_optim = AdamConfig::new().init();
    let mut fine_optim = AdamConfig::new().init();

    let batcher = RayBatcher::new(
        dataset.clone(),
        settings.batch_size,
        settings.num_coarse_samples,
        settings.coarse_sampling_function,
        settings.plateau_ratio,
    );
    let scaling = config.scaling.pair();
    let slice_size_cm = dataset.metadata.slice_size_cm();

    tracing::info!(
        "Training `{}` for epochs {}..={} ({} rays, {} batches/epoch, {} coarse + {} fine samples, seed {})",
        config.run_name,
        start_epoch,
        settings.epochs,
        dataset.len(),
        batcher.num_batches(),
        settings.num_coarse_samples,
        settings.num_fine_samples,
        seed
    );

    let mut final_loss = f32::NAN;

    for epoch in start_epoch..=settings.epochs {
        let batch_lists = batcher.epoch_batches(&mut rng);
        let num_batches = batch_lists.len();
        let batches: Box<dyn Iterator<Item = RayBatch>> = if config.data.num_workers == 0 {
            let batcher = batcher.clone();
            let mut batch_rng = StdRng::seed_from_u64(rng.gen());
            Box::new(
                batch_lists
                    .into_iter()
                    .map(move |indices| batcher.build(&indices, &mut batch_rng)),
            )
        } else {
            Box::new(BatchPrefetcher::new(
                batcher.clone(),
                batch_lists,
                rng.gen(),
                config.data.num_workers,
            )?)
        };

        let progress = progress_bar(num_batches, format!("epoch {}/{}", epoch, settings.epochs));
        let mut epoch_loss = 0.0f32;
        let mut running_loss = 0.0f32;
        let mut running_count = 0usize;

        for (step, batch) in batches.enumerate() {
            let targets = batch.targets_tensor::<B>(device);
            let num_rays = batch.len();

            // coarse pass
            let coarse_mu = coarse
                .forward(points_tensor::<B>(&batch.coarse, device))
                .reshape([num_rays, batch.coarse.samples_per_ray]);
            let predicted = beer_lambert(
                coarse_mu.clone(),
                distances_tensor::<B>(&batch.coarse, device),
                scaling,
                slice_size_cm,
            );
            let loss = MseLoss::new().forward(predicted, targets.clone(), Reduction::Mean);
            let coarse_loss = scalar(loss.clone())?;

            let grads = GradientsParams::from_grads(loss.backward(), &coarse);
            coarse = coarse_optim.step(settings.learning_rate, coarse, grads);

            // fine pass, guided by the detached coarse prediction
            let fine_loss = match fine.take() {
                Some(model) => {
                    let coarse_values = tensor_to_vec(coarse_mu.detach())?;
                    let samples = fine_samples(
                        &batch.rays,
                        &batch.coarse,
                        &coarse_values,
                        settings.num_fine_samples,
                        &mut rng,
                    );

                    let fine_mu = model
                        .forward(points_tensor::<B>(&samples, device))
                        .reshape([num_rays, samples.samples_per_ray]);
                    let predicted = beer_lambert(
                        fine_mu,
                        distances_tensor::<B>(&samples, device),
                        scaling,
                        slice_size_cm,
                    );
                    let loss = MseLoss::new().forward(predicted, targets, Reduction::Mean);
                    let value = scalar(loss.clone())?;

                    let grads = GradientsParams::from_grads(loss.backward(), &model);
                    fine = Some(fine_optim.step(settings.learning_rate, model, grads));
                    Some(value)
                }
                None => None,
            };

            let step_loss = StepLoss {
                coarse: coarse_loss,
                fine: fine_loss,
            };
            epoch_loss += step_loss.total();
            running_loss += step_loss.total();
            running_count += 1;

            progress.inc(1);
            progress.set_message(format!("loss {:.6}", step_loss.total()));

            if (step + 1) % settings.log_interval == 0 {
                tracing::info!(
                    "Epoch {} step {}/{} | loss {:.6} (coarse {:.6}{})",
                    epoch,
                    step + 1,
                    num_batches,
                    running_loss / running_count as f32,
                    step_loss.coarse,
                    step_loss
                        .fine
                        .map(|f| format!(", fine {f:.6}"))
                        .unwrap_or_default()
                );
                running_loss = 0.0;
                running_count = 0;
            }
        }
        progress.finish_and_clear();

        final_loss = epoch_loss / num_batches.max(1) as f32;
        tracing::info!("Epoch {}/{} mean loss {:.6}", epoch, settings.epochs, final_loss);

        if epoch % config.checkpoint.interval == 0 || epoch == settings.epochs {
            save_checkpoint(&coarse.clone().valid(), &run_dir, ModelKind::Coarse, epoch)?;
            if let Some(model) = &fine {
                save_checkpoint(&model.clone().valid(), &run_dir, ModelKind::Fine, epoch)?;
            }
        }
    }

    tracing::info!("Training completed");

    Ok(TrainingOutcome {
        coarse: coarse.valid(),
        fine: fine.map(|model| model.valid()),
        final_epoch: settings.epochs,
        final_loss,
    })
}

fn resume<B: Backend>(
    model: XRayModel<B>,
    run_dir: &Path,
    kind: ModelKind,
    epoch: usize,
    device: &B::Device,
) -> Result<XRayModel<B>> {
    load_epoch(model, run_dir, kind, Some(epoch), device).map(|(model, _)| model)
}
