use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use super::geometry::{sampling_distances, Ray};

/// Floor added to each interval weight so flat rays still get fine samples.
const EDGE_WEIGHT_FLOOR: f32 = 1e-5;

/// Strategy used to place coarse samples along a ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingFunction {
    /// Left edges of equal-width bins.
    #[serde(alias = "uniform_sampling")]
    Uniform,
    /// One uniform draw inside each equal-width bin.
    #[serde(alias = "stratified_sampling")]
    Stratified,
    /// Flat density over the chord centre with Gaussian tails.
    #[default]
    #[serde(alias = "plateau_cylinder_sampling", alias = "plateau")]
    PlateauCylinder,
}

impl SamplingFunction {
    /// Sorted sample positions `t` in `bounds` for one ray.
    pub fn sample<R: Rng>(
        &self,
        n_samples: usize,
        bounds: [f32; 2],
        plateau_ratio: Option<f64>,
        rng: &mut R,
    ) -> Vec<f32> {
        let [near, far] = bounds;
        let width = (far - near) / n_samples as f32;

        match self {
            SamplingFunction::Uniform => (0..n_samples)
                .map(|i| near + width * i as f32)
                .collect(),
            SamplingFunction::Stratified => (0..n_samples)
                .map(|i| near + width * (i as f32 + rng.gen::<f32>()))
                .collect(),
            SamplingFunction::PlateauCylinder => {
                plateau_samples(n_samples, bounds, plateau_ratio.unwrap_or(1.0) as f32, rng)
            }
        }
    }
}

fn plateau_samples<R: Rng>(n_samples: usize, bounds: [f32; 2], ratio: f32, rng: &mut R) -> Vec<f32> {
    let [near, far] = bounds;
    let centre = 0.5 * (near + far);
    let half = 0.5 * (far - near);
    if half <= 0.0 {
        return vec![centre; n_samples];
    }

    // plateau of width ratio*sigma plus two sigma of tail on each side spans the chord
    let sigma = half / (0.5 * ratio + 2.0);
    let plateau = ratio * sigma;
    let p_flat = plateau / (plateau + sigma * (2.0 * PI).sqrt());

    let mut ts: Vec<f32> = (0..n_samples)
        .map(|_| {
            let offset = if rng.gen::<f32>() < p_flat {
                (rng.gen::<f32>() - 0.5) * plateau
            } else {
                let tail = 0.5 * plateau + sigma * standard_normal(rng).abs();
                if rng.gen::<bool>() {
                    tail
                } else {
                    -tail
                }
            };
            (centre + offset).clamp(near, far)
        })
        .collect();
    ts.sort_by(f32::total_cmp);
    ts
}

fn standard_normal<R: Rng>(rng: &mut R) -> f32 {
    // Box-Muller; 1 - gen keeps u1 in (0, 1]
    let u1 = 1.0 - rng.gen::<f32>();
    let u2 = rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Edge-focused fine sampling for one ray.
///
/// Interval `i` spans `[ts[i], ts[i] + distances[i]]` and is weighted by the
/// jump of the coarse prediction across it. `n_samples` positions are drawn by
/// stratified inverse-CDF sampling over those weights.
pub fn edge_focused_samples<R: Rng>(
    n_samples: usize,
    ts: &[f32],
    values: &[f32],
    distances: &[f32],
    rng: &mut R,
) -> Vec<f32> {
    let n = ts.len();
    if n == 0 || n_samples == 0 {
        return Vec::new();
    }

    let weights: Vec<f32> = (0..n)
        .map(|i| {
            let jump = if i + 1 < n {
                (values[i + 1] - values[i]).abs()
            } else {
                0.0
            };
            jump + EDGE_WEIGHT_FLOOR
        })
        .collect();

    let mut cdf = Vec::with_capacity(n);
    let mut total = 0.0f32;
    for &w in &weights {
        total += w;
        cdf.push(total);
    }

    (0..n_samples)
        .map(|j| {
            let u = (j as f32 + rng.gen::<f32>()) / n_samples as f32 * total;
            let i = cdf.partition_point(|&c| c <= u).min(n - 1);
            let start = if i == 0 { 0.0 } else { cdf[i - 1] };
            let frac = ((u - start) / weights[i]).clamp(0.0, 1.0);
            ts[i] + distances[i] * frac
        })
        .collect()
}

/// Flattened per-ray samples for a batch of rays.
///
/// `ts` and `distances` are `[rays, samples_per_ray]` row major, `points`
/// is `[rays * samples_per_ray, 3]`.
#[derive(Debug, Clone, Default)]
pub struct RaySamples {
    pub ts: Vec<f32>,
    pub points: Vec<f32>,
    pub distances: Vec<f32>,
    pub samples_per_ray: usize,
}

impl RaySamples {
    pub fn num_rays(&self) -> usize {
        if self.samples_per_ray == 0 {
            0
        } else {
            self.ts.len() / self.samples_per_ray
        }
    }

    fn from_rows(rays: &[Ray], rows: Vec<(Vec<f32>, Vec<f32>)>, samples_per_ray: usize) -> Self {
        let mut out = RaySamples {
            ts: Vec::with_capacity(rays.len() * samples_per_ray),
            points: Vec::with_capacity(rays.len() * samples_per_ray * 3),
            distances: Vec::with_capacity(rays.len() * samples_per_ray),
            samples_per_ray,
        };
        for (ray, (ts, distances)) in rays.iter().zip(rows) {
            for &t in &ts {
                out.points.extend_from_slice(&ray.point_at(t));
            }
            out.ts.extend(ts);
            out.distances.extend(distances);
        }
        out
    }
}

fn ray_seeds<R: Rng>(count: usize, rng: &mut R) -> Vec<u64> {
    (0..count).map(|_| rng.gen()).collect()
}

/// Place `n_samples` coarse samples on every ray.
pub fn coarse_samples<R: Rng>(
    rays: &[Ray],
    n_samples: usize,
    sampler: SamplingFunction,
    plateau_ratio: Option<f64>,
    rng: &mut R,
) -> RaySamples {
    let seeds = ray_seeds(rays.len(), rng);
    let rows: Vec<(Vec<f32>, Vec<f32>)> = rays
        .par_iter()
        .zip(seeds.par_iter())
        .map(|(ray, &seed)| {
            let mut ray_rng = StdRng::seed_from_u64(seed);
            let ts = sampler.sample(n_samples, ray.bounds, plateau_ratio, &mut ray_rng);
            let distances = sampling_distances(&ts, Some(ray.bounds[1]));
            (ts, distances)
        })
        .collect();

    RaySamples::from_rows(rays, rows, n_samples)
}

/// Merge `n_fine` edge-focused samples into each ray's coarse samples.
///
/// `coarse_values` holds the coarse model's output per coarse sample, laid
/// out like `coarse.ts`. The result has `coarse.samples_per_ray + n_fine`
/// sorted samples per ray.
pub fn fine_samples<R: Rng>(
    rays: &[Ray],
    coarse: &RaySamples,
    coarse_values: &[f32],
    n_fine: usize,
    rng: &mut R,
) -> RaySamples {
    let n = coarse.samples_per_ray;
    let seeds = ray_seeds(rays.len(), rng);

    let rows: Vec<(Vec<f32>, Vec<f32>)> = rays
        .par_iter()
        .enumerate()
        .zip(seeds.par_iter())
        .map(|((i, ray), &seed)| {
            let mut ray_rng = StdRng::seed_from_u64(seed);
            let span = i * n..(i + 1) * n;
            let ts = &coarse.ts[span.clone()];

            let mut merged = edge_focused_samples(
                n_fine,
                ts,
                &coarse_values[span.clone()],
                &coarse.distances[span],
                &mut ray_rng,
            );
            merged.extend_from_slice(ts);
            merged.sort_by(f32::total_cmp);

            let distances = sampling_distances(&merged, Some(ray.bounds[1]));
            (merged, distances)
        })
        .collect();

    RaySamples::from_rows(rays, rows, n + n_fine)
}
