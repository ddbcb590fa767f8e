use burn::prelude::*;
use std::f64::consts::PI;

/// Width of the encoding of a 3D point with `num_frequencies` bands.
pub fn encoded_dim(num_frequencies: usize) -> usize {
    3 + 6 * num_frequencies
}

/// Fourier-feature encoding `[x, sin(2^k pi x), cos(2^k pi x)]` for `k in 0..L`.
///
/// Maps `[n, 3]` points to `[n, encoded_dim(L)]`.
pub fn positional_encoding<B: Backend>(points: Tensor<B, 2>, num_frequencies: usize) -> Tensor<B, 2> {
    let mut features = Vec::with_capacity(1 + 2 * num_frequencies);
    features.push(points.clone());

    for k in 0..num_frequencies {
        let scaled = points.clone().mul_scalar(2f64.powi(k as i32) * PI);
        features.push(scaled.clone().sin());
        features.push(scaled.cos());
    }

    Tensor::cat(features, 1)
}
