use burn::config::Config;
use burn::nn::LinearConfig;
use burn::prelude::*;

use super::encoding::encoded_dim;
use super::xray::XRayModel;
use crate::config::ModelSettings;

#[derive(Config, Debug)]
pub struct XRayModelConfig {
    #[config(default = 8)]
    pub n_layers: usize,

    #[config(default = 256)]
    pub layer_dim: usize,

    #[config(default = 10)]
    pub num_frequencies: usize,
}

impl XRayModelConfig {
    pub fn from_settings(settings: &ModelSettings) -> Self {
        XRayModelConfig::new()
            .with_n_layers(settings.n_layers)
            .with_layer_dim(settings.layer_dim)
            .with_num_frequencies(settings.num_frequencies)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> XRayModel<B> {
        let input_dim = encoded_dim(self.num_frequencies);

        let hidden = (0..self.n_layers)
            .map(|i| {
                let d_in = if i == 0 { input_dim } else { self.layer_dim };
                LinearConfig::new(d_in, self.layer_dim).init(device)
            })
            .collect();
        let output = LinearConfig::new(self.layer_dim, 1).init(device);

        XRayModel {
            hidden,
            output,
            num_frequencies: self.num_frequencies,
            layer_dim: self.layer_dim,
        }
    }
}
