use super::{FileRecord, ImageLoader, Letterbox};
use crate::{
    common::*,
    target::{TargetBuilder, TargetSet, YoloTarget},
    unit::RatioLabel,
};

/// Options of [`DatasetGenerator`].
#[derive(Debug, Clone)]
pub struct DatasetGeneratorInit {
    pub batch_size: usize,
    /// Drop the last incomplete batch of an epoch, otherwise pad it with samples
    /// from the start of the same permutation.
    pub drop_remainder: bool,
    pub seed: u64,
    /// Intensity of letterbox padding.
    pub fill_value: f64,
    /// The device where batches are placed.
    pub device: Device,
}

impl Default for DatasetGeneratorInit {
    fn default() -> Self {
        Self {
            batch_size: 1,
            drop_remainder: true,
            seed: 0,
            fill_value: 0.5,
            device: Device::Cpu,
        }
    }
}

impl DatasetGeneratorInit {
    pub fn build<L>(
        self,
        records: Vec<Arc<FileRecord>>,
        loader: L,
        builder: TargetBuilder,
    ) -> Result<DatasetGenerator<L>>
    where
        L: ImageLoader,
    {
        let Self {
            batch_size,
            drop_remainder,
            seed,
            fill_value,
            device,
        } = self;

        ensure!(batch_size > 0, "batch_size must be positive");
        ensure!(!records.is_empty(), "the dataset has no records");
        ensure!(
            !drop_remainder || records.len() >= batch_size,
            "batch_size {} exceeds the number of records {} while drop_remainder is set",
            batch_size,
            records.len()
        );
        ensure!(
            (0.0..=1.0).contains(&fill_value),
            "fill_value must be in range [0, 1]"
        );

        Ok(DatasetGenerator {
            records,
            loader,
            builder,
            batch_size,
            drop_remainder,
            fill_value,
            device,
            rng: StdRng::seed_from_u64(seed),
            permutation: vec![],
            epoch: 0,
            step: 0,
            batch_index: 0,
        })
    }
}

/// One training step worth of data.
#[derive(Debug)]
pub struct TrainingBatch {
    /// Epoch count starting from 0.
    pub epoch: usize,
    /// Global step count starting from 0.
    pub step: usize,
    pub image_ids: Vec<u64>,
    /// `[B, 3, S, S]` float images.
    pub images: Tensor,
    pub target: YoloTarget,
    pub letterboxes: Vec<Letterbox>,
    pub stats: BatchStats,
}

/// Encoding statistics of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Number of positive slots per scale.
    pub positives: Vec<usize>,
    pub skipped: usize,
    pub collisions: usize,
    /// Images that failed to load and were replaced.
    pub failed: usize,
}

/// Shuffled, letterboxed, target-encoded training batches.
///
/// A fresh permutation is drawn from the owned generator at the start of each
/// epoch. It never ends, the caller stops pulling when done.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DatasetGenerator<L>
where
    L: ImageLoader,
{
    #[derivative(Debug = "ignore")]
    records: Vec<Arc<FileRecord>>,
    loader: L,
    builder: TargetBuilder,
    batch_size: usize,
    drop_remainder: bool,
    fill_value: f64,
    device: Device,
    rng: StdRng,
    #[derivative(Debug = "ignore")]
    permutation: Vec<usize>,
    epoch: usize,
    step: usize,
    batch_index: usize,
}

impl<L> DatasetGenerator<L>
where
    L: ImageLoader,
{
    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    pub fn batches_per_epoch(&self) -> usize {
        let num_records = self.records.len();
        if self.drop_remainder {
            num_records / self.batch_size
        } else {
            (num_records + self.batch_size - 1) / self.batch_size
        }
    }

    /// Record indexes of the current epoch, in visiting order.
    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Produce the next batch of the current epoch, starting a new epoch when needed.
    ///
    /// A sample that fails to load is skipped with a warning and its place is taken
    /// by the following records of the permutation. The batch only fails when no
    /// record can be loaded at all, and the generator still moves on to the next batch.
    pub fn next_batch(&mut self) -> Result<TrainingBatch> {
        if self.permutation.is_empty() || self.batch_index >= self.batches_per_epoch() {
            self.start_epoch();
        }

        let epoch = self.epoch;
        let step = self.step;
        let begin = self.batch_index * self.batch_size;
        self.batch_index += 1;
        self.step += 1;

        let num_records = self.records.len();
        let mut samples = Vec::with_capacity(self.batch_size);
        let mut failed: Vec<usize> = vec![];
        let mut position = begin;

        while samples.len() < self.batch_size {
            ensure!(
                failed.len() < num_records,
                "none of the {} records can be loaded",
                num_records
            );
            let index = self.permutation[position % num_records];
            position += 1;
            if failed.contains(&index) {
                continue;
            }

            let record = &self.records[index];
            match self.load_sample(record) {
                Ok(sample) => samples.push(sample),
                Err(err) => {
                    warn!("skip image {}: {:#}", record.image_id, err);
                    failed.push(index);
                }
            }
        }

        let (image_ids, images, letterboxes, targets) = samples
            .into_iter()
            .map(|sample| {
                let Sample {
                    image_id,
                    image,
                    letterbox,
                    targets,
                } = sample;
                (image_id, image, letterbox, targets)
            })
            .unzip_n_vec();

        let stats = {
            let num_scales = self.builder.anchors().num_scales();
            let positives = (0..num_scales)
                .map(|scale_index| {
                    targets
                        .iter()
                        .map(|set: &TargetSet| set.tensors[scale_index].num_positives())
                        .sum()
                })
                .collect();
            BatchStats {
                positives,
                skipped: targets.iter().map(|set| set.skipped).sum(),
                collisions: targets.iter().map(|set| set.collisions).sum(),
                failed: failed.len(),
            }
        };
        let images = Tensor::stack(&images, 0).to_device(self.device);
        let target = YoloTarget::from_target_sets(&targets, self.device)?;

        Ok(TrainingBatch {
            epoch,
            step,
            image_ids,
            images,
            target,
            letterboxes,
            stats,
        })
    }

    fn start_epoch(&mut self) {
        if !self.permutation.is_empty() {
            self.epoch += 1;
        }
        self.batch_index = 0;
        self.permutation = (0..self.records.len()).collect();
        self.permutation.shuffle(&mut self.rng);

        info!(
            "start epoch {} with {} records in {} batches",
            self.epoch,
            self.records.len(),
            self.batches_per_epoch()
        );
    }

    fn load_sample(&self, record: &FileRecord) -> Result<Sample> {
        let input_size = self.builder.anchors().input_size();
        let image = self.loader.load(record)?;
        let letterbox = Letterbox::new(record.size, input_size)?;
        let image = letterbox.apply(&image, self.fill_value)?;

        let labels: Vec<RatioLabel> = record
            .labels
            .iter()
            .map(|label| letterbox.to_letterbox(label)?.to_ratio(input_size))
            .try_collect()?;
        let targets = self.builder.build(&labels);
        if targets.skipped > 0 {
            warn!(
                "{} annotations of image {} are skipped",
                targets.skipped, record.image_id
            );
        }

        Ok(Sample {
            image_id: record.image_id,
            image,
            letterbox,
            targets,
        })
    }
}

impl<L> Iterator for DatasetGenerator<L>
where
    L: ImageLoader,
{
    type Item = Result<TrainingBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

struct Sample {
    image_id: u64,
    image: Tensor,
    letterbox: Letterbox,
    targets: TargetSet,
}
