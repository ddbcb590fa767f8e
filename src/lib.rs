//! Neural CT reconstruction: fit an attenuation field to X-ray projections,
//! then sample it on a voxel grid.

pub mod config;
pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod progress;
pub mod rays;
pub mod training;

pub use config::{InferenceConfig, TrainingConfig};
pub use error::{Error, Result};
pub use model::XRayModel;
