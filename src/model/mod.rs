pub mod config;
pub mod encoding;
pub mod xray;

pub use config::XRayModelConfig;
pub use encoding::{encoded_dim, positional_encoding};
pub use xray::{format_bytes, format_params, ParameterStats, XRayModel};
