use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

use super::dataset::XrayDataset;
use crate::rays::{coarse_samples, get_rays, Ray, RaySamples, SamplingFunction};

/// Rays, coarse samples and target intensities for one optimizer step.
#[derive(Debug, Clone)]
pub struct RayBatch {
    pub rays: Vec<Ray>,
    pub coarse: RaySamples,
    pub targets: Vec<f32>,
}

impl RayBatch {
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    pub fn targets_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_data(TensorData::new(self.targets.clone(), [self.len()]), device)
    }
}

/// `[rays * samples, 3]` sample points.
pub fn points_tensor<B: Backend>(samples: &RaySamples, device: &B::Device) -> Tensor<B, 2> {
    let n = samples.points.len() / 3;
    Tensor::from_data(TensorData::new(samples.points.clone(), [n, 3]), device)
}

/// `[rays, samples]` distances between adjacent samples.
pub fn distances_tensor<B: Backend>(samples: &RaySamples, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(
            samples.distances.clone(),
            [samples.num_rays(), samples.samples_per_ray],
        ),
        device,
    )
}

#[derive(Clone)]
pub struct RayBatcher {
    dataset: Arc<XrayDataset>,
    pub batch_size: usize,
    pub num_coarse_samples: usize,
    pub sampler: SamplingFunction,
    pub plateau_ratio: Option<f64>,
}

impl RayBatcher {
    pub fn new(
        dataset: Arc<XrayDataset>,
        batch_size: usize,
        num_coarse_samples: usize,
        sampler: SamplingFunction,
        plateau_ratio: Option<f64>,
    ) -> Self {
        RayBatcher {
            dataset,
            batch_size,
            num_coarse_samples,
            sampler,
            plateau_ratio,
        }
    }

    pub fn dataset(&self) -> &XrayDataset {
        &self.dataset
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Shuffled sample indices split into batches; the last may be short.
    pub fn epoch_batches<R: Rng>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    pub fn build<R: Rng>(&self, indices: &[usize], rng: &mut R) -> RayBatch {
        let samples: Vec<_> = indices.iter().map(|&i| self.dataset.samples[i]).collect();

        let pixels: Vec<[f32; 2]> = samples.iter().map(|s| s.pixel).collect();
        let angles: Vec<f32> = samples.iter().map(|s| s.angle).collect();
        let targets = samples.iter().map(|s| s.intensity).collect();

        let rays = get_rays(&pixels, &angles, self.dataset.metadata.img_shape());
        let coarse = coarse_samples(
            &rays,
            self.num_coarse_samples,
            self.sampler,
            self.plateau_ratio,
            rng,
        );

        RayBatch {
            rays,
            coarse,
            targets,
        }
    }
}
