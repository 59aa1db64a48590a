//! Configuration format.

use crate::{
    anchor::AnchorSet, dataset::DatasetGeneratorInit, inference::YoloInferenceInit,
    loss::YoloLossInit,
};
use crate::common::*;

pub use dataset::*;
pub use inference::*;
pub use model::*;
pub use training::*;

/// The main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let Self {
            model,
            dataset,
            training,
            inference,
        } = self;

        // builds and drops the anchor set to surface geometry errors early
        model.anchor_set()?;
        dataset.validate()?;
        training.loss.yolo_loss_init().validate()?;
        inference.yolo_inference_init().validate()?;
        Ok(())
    }
}

mod model {
    use super::*;

    /// The detector geometry.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        pub num_classes: NonZeroUsize,
        /// Side length of the square network input in pixels.
        pub input_size: NonZeroUsize,
        #[serde(default = "default_strides")]
        pub strides: Vec<usize>,
        /// Anchor `[w, h]` pairs in input pixels.
        pub anchors: Vec<[R64; 2]>,
        #[serde(default = "default_anchors_per_scale")]
        pub anchors_per_scale: usize,
    }

    impl ModelConfig {
        pub fn anchor_set(&self) -> Result<AnchorSet> {
            AnchorSet::new(
                self.input_size.get(),
                &self.strides,
                &self.anchors,
                self.anchors_per_scale,
            )
        }
    }

    fn default_strides() -> Vec<usize> {
        vec![32, 16, 8]
    }

    fn default_anchors_per_scale() -> usize {
        3
    }
}

mod dataset {
    use super::*;

    /// COCO dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The COCO instance annotation file.
        pub annotation_file: PathBuf,
        /// The directory where `file_name` of each image is resolved.
        pub image_dir: PathBuf,
        /// Keep annotations marked `iscrowd`.
        #[serde(default)]
        pub include_crowd: bool,
        /// Maximum number of annotations kept per image.
        #[serde(default = "default_max_instances")]
        pub max_instances: usize,
        /// Intensity of letterbox padding in `[0, 1]`.
        #[serde(default = "default_fill_value")]
        pub fill_value: R64,
    }

    impl DatasetConfig {
        pub fn validate(&self) -> Result<()> {
            ensure!(self.max_instances > 0, "max_instances must be positive");
            ensure!(
                (0.0..=1.0).contains(&self.fill_value.raw()),
                "fill_value must be in range [0, 1], but get {}",
                self.fill_value
            );
            Ok(())
        }
    }

    fn default_max_instances() -> usize {
        100
    }

    fn default_fill_value() -> R64 {
        r64(0.5)
    }
}

mod training {
    use super::*;

    /// Batching and loss options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        pub batch_size: NonZeroUsize,
        /// Drop the last incomplete batch of an epoch instead of padding it.
        #[serde(default = "default_drop_remainder")]
        pub drop_remainder: bool,
        /// Seed of the shuffling generator.
        #[serde(default)]
        pub seed: u64,
        #[serde(with = "tch_serde::serde_device", default = "default_device")]
        pub device: Device,
        #[serde(default)]
        pub loss: LossConfig,
    }

    impl TrainingConfig {
        pub fn generator_init(&self, dataset: &DatasetConfig) -> DatasetGeneratorInit {
            DatasetGeneratorInit {
                batch_size: self.batch_size.get(),
                drop_remainder: self.drop_remainder,
                seed: self.seed,
                fill_value: dataset.fill_value.raw(),
                device: self.device,
            }
        }
    }

    /// The loss function configuration.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct LossConfig {
        /// IoU at or above which an unassigned prediction is left out of the no-object term.
        pub ignore_iou_threshold: Option<R64>,
        pub localization_weight: Option<R64>,
        pub objectness_weight: Option<R64>,
        pub classification_weight: Option<R64>,
        /// Localization terms are scaled by `small_box_scale - box_area_fraction`.
        pub small_box_scale: Option<R64>,
    }

    impl LossConfig {
        pub fn yolo_loss_init(&self) -> YoloLossInit {
            let Self {
                ignore_iou_threshold,
                localization_weight,
                objectness_weight,
                classification_weight,
                small_box_scale,
            } = *self;

            let mut init = YoloLossInit::default();

            if let Some(ignore_iou_threshold) = ignore_iou_threshold {
                init.ignore_iou_threshold = ignore_iou_threshold;
            }

            if let Some(localization_weight) = localization_weight {
                init.localization_weight = localization_weight;
            }

            if let Some(objectness_weight) = objectness_weight {
                init.objectness_weight = objectness_weight;
            }

            if let Some(classification_weight) = classification_weight {
                init.classification_weight = classification_weight;
            }

            if let Some(small_box_scale) = small_box_scale {
                init.small_box_scale = small_box_scale;
            }

            init
        }
    }

    fn default_drop_remainder() -> bool {
        true
    }

    fn default_device() -> Device {
        Device::Cpu
    }
}

mod inference {
    use super::*;

    /// Detection filtering options.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct InferenceConfig {
        pub confidence_threshold: Option<R64>,
        pub nms_threshold: Option<R64>,
    }

    impl InferenceConfig {
        pub fn yolo_inference_init(&self) -> YoloInferenceInit {
            let mut init = YoloInferenceInit::default();

            if let Some(confidence_threshold) = self.confidence_threshold {
                init.confidence_threshold = confidence_threshold;
            }

            if let Some(nms_threshold) = self.nms_threshold {
                init.nms_threshold = nms_threshold;
            }

            init
        }
    }
}
