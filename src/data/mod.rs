pub mod batcher;
pub mod dataset;
pub mod prefetcher;
pub mod projection;

pub use batcher::{distances_tensor, points_tensor, RayBatch, RayBatcher};
pub use dataset::{
    write_xray_dir, PixelSample, ProjectionEntry, XrayDataset, XrayMetadata, METADATA_FILE,
};
pub use prefetcher::BatchPrefetcher;
pub use projection::{read_projection, write_projection, Projection};
