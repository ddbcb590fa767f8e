use burn::module::Module;
use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};

use super::encoding::{encoded_dim, positional_encoding};
use crate::config::Precision;

/// Neural attenuation field: maps a point in the normalized volume to its
/// attenuation coefficient (per cm).
#[derive(Module, Debug)]
pub struct XRayModel<B: Backend> {
    pub(super) hidden: Vec<Linear<B>>,
    pub(super) output: Linear<B>,
    #[module(skip)]
    pub num_frequencies: usize,
    #[module(skip)]
    pub layer_dim: usize,
}

impl<B: Backend> XRayModel<B> {
    /// `[n, 3]` points to `[n, 1]` attenuation in `(0, 1)`.
    pub fn forward(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = positional_encoding(points, self.num_frequencies);
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        sigmoid(self.output.forward(x))
    }

    pub fn n_layers(&self) -> usize {
        self.hidden.len()
    }

    pub fn param_stats(&self) -> ParameterStats {
        let input_dim = encoded_dim(self.num_frequencies);
        let mut d_in = input_dim;
        let mut hidden_params = 0;
        for _ in 0..self.n_layers() {
            hidden_params += d_in * self.layer_dim + self.layer_dim;
            d_in = self.layer_dim;
        }
        let output_params = d_in + 1;

        ParameterStats {
            input_dim,
            hidden_params,
            output_params,
            total_params: hidden_params + output_params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStats {
    pub input_dim: usize,
    pub hidden_params: usize,
    pub output_params: usize,
    pub total_params: usize,
}

impl ParameterStats {
    pub fn memory_bytes(&self, precision: Precision) -> usize {
        self.total_params * precision.bytes_per_param()
    }

    /// Parameters plus the two Adam moment buffers.
    pub fn training_memory_bytes(&self, precision: Precision) -> usize {
        self.memory_bytes(precision) * 3
    }

    pub fn log_summary(&self, name: &str, precision: Precision) {
        tracing::info!(
            "{} model: {} params ({} hidden, {} head), input width {}",
            name,
            format_params(self.total_params),
            format_params(self.hidden_params),
            format_params(self.output_params),
            self.input_dim
        );
        tracing::info!(
            "{} model memory at {}: weights {}, training {}",
            name,
            precision,
            format_bytes(self.memory_bytes(precision)),
            format_bytes(self.training_memory_bytes(precision))
        );
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_params(params: usize) -> String {
    const K: usize = 1_000;
    const M: usize = K * 1_000;

    if params >= M {
        format!("{:.2}M", params as f64 / M as f64)
    } else if params >= K {
        format!("{:.2}K", params as f64 / K as f64)
    } else {
        format!("{}", params)
    }
}
