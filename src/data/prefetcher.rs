use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::ThreadPoolBuilder;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use super::batcher::{RayBatch, RayBatcher};
use crate::error::{Error, Result};

/// Builds the batches of one epoch on a background thread.
///
/// Ray sampling for each batch runs on a rayon pool of `num_workers`
/// threads. At most `2 * num_workers` finished batches wait in the channel.
pub struct BatchPrefetcher {
    receiver: Receiver<RayBatch>,
}

impl BatchPrefetcher {
    pub fn new(
        batcher: RayBatcher,
        batches: Vec<Vec<usize>>,
        seed: u64,
        num_workers: usize,
    ) -> Result<Self> {
        let workers = num_workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ctnerf-sampler-{i}"))
            .build()
            .map_err(|e| Error::Dataset(format!("cannot start sampler pool: {e}")))?;

        let (sender, receiver): (SyncSender<RayBatch>, Receiver<RayBatch>) =
            sync_channel(2 * workers);

        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            for indices in batches {
                let batch = pool.install(|| batcher.build(&indices, &mut rng));
                if sender.send(batch).is_err() {
                    break;
                }
            }
        });

        Ok(BatchPrefetcher { receiver })
    }
}

impl Iterator for BatchPrefetcher {
    type Item = RayBatch;

    fn next(&mut self) -> Option<RayBatch> {
        self.receiver.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{ProjectionEntry, XrayDataset, XrayMetadata};
    use crate::data::projection::Projection;
    use crate::rays::SamplingFunction;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn yields_every_batch_then_stops() {
        let metadata = XrayMetadata {
            size: [2, 2],
            spacing: [1.0, 1.0],
            projections: vec![ProjectionEntry {
                file: "p.bin".into(),
                angle: 0.0,
            }],
            ct_meta: BTreeMap::new(),
        };
        let projection = Projection::new(2, 2, vec![1.0; 4]).unwrap();
        let dataset =
            Arc::new(XrayDataset::from_projections(metadata, &[(0.0, projection)]).unwrap());
        let batcher = RayBatcher::new(dataset, 3, 2, SamplingFunction::Uniform, None);

        let prefetcher =
            BatchPrefetcher::new(batcher, vec![vec![0, 1, 2], vec![3]], 1, 2).unwrap();
        let sizes: Vec<usize> = prefetcher.map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 1]);
    }
}
