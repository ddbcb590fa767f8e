pub mod checkpoint;
pub mod trainer;

pub use checkpoint::{
    checkpoint_path, find_latest_checkpoint, load_checkpoint, load_epoch, save_checkpoint,
};
pub use trainer::{train, train_on_dataset, TrainingOutcome};
