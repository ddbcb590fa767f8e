pub mod geometry;
pub mod physics;
pub mod sampling;

pub use geometry::{get_rays, ray_bounds, sampling_distances, Ray};
pub use physics::beer_lambert;
pub use sampling::{
    coarse_samples, edge_focused_samples, fine_samples, RaySamples, SamplingFunction,
};
