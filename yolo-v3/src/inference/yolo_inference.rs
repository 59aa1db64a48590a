use super::{non_max_suppression, Detection};
use crate::{
    anchor::{AnchorSet, DecodedBox},
    common::*,
    dataset::Letterbox,
    model::YoloOutput,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoloInferenceInit {
    /// Minimum `objectness * max(class probability)` of a kept box.
    pub confidence_threshold: R64,
    /// Boxes overlapping a better one of the same class by this IoU are dropped.
    pub nms_threshold: R64,
}

impl Default for YoloInferenceInit {
    fn default() -> Self {
        Self {
            confidence_threshold: r64(0.5),
            nms_threshold: r64(0.45),
        }
    }
}

impl YoloInferenceInit {
    pub fn validate(&self) -> Result<()> {
        let Self {
            confidence_threshold,
            nms_threshold,
        } = *self;
        ensure!(
            (0.0..=1.0).contains(&confidence_threshold.raw()),
            "confidence_threshold must be in range [0, 1], but get {}",
            confidence_threshold
        );
        ensure!(
            (0.0..=1.0).contains(&nms_threshold.raw()),
            "nms_threshold must be in range [0, 1], but get {}",
            nms_threshold
        );
        Ok(())
    }

    pub fn build(self, anchors: Arc<AnchorSet>) -> Result<YoloInference> {
        self.validate()?;
        let Self {
            confidence_threshold,
            nms_threshold,
        } = self;

        Ok(YoloInference {
            anchors,
            confidence_threshold: confidence_threshold.raw(),
            nms_threshold: nms_threshold.raw(),
        })
    }
}

/// Decodes every scale, filters by confidence, runs per-class NMS and maps the
/// survivors back to original image pixels.
#[derive(Debug)]
pub struct YoloInference {
    anchors: Arc<AnchorSet>,
    confidence_threshold: f64,
    nms_threshold: f64,
}

impl YoloInference {
    /// Detections of each image. `letterboxes[i]` is the resize applied to image `i`.
    pub fn forward(
        &self,
        prediction: &YoloOutput,
        letterboxes: &[Letterbox],
    ) -> Result<Vec<Vec<Detection>>> {
        ensure!(
            prediction.raw.len() == self.anchors.num_scales(),
            "expect {} scales, but get {}",
            self.anchors.num_scales(),
            prediction.raw.len()
        );
        let batch_size = prediction.batch_size().unwrap_or(0) as usize;
        ensure!(
            letterboxes.len() == batch_size,
            "expect {} letterboxes, but get {}",
            batch_size,
            letterboxes.len()
        );

        let decoded = tch::no_grad(|| -> Result<Vec<_>> {
            prediction
                .raw
                .iter()
                .enumerate()
                .map(|(scale_index, raw)| self.anchors.decode(raw, scale_index))
                .try_collect()
        })?;

        letterboxes
            .iter()
            .enumerate()
            .map(|(batch_index, letterbox)| -> Result<_> {
                let candidates: Vec<(DecodedBox, usize, f64)> = decoded
                    .iter()
                    .map(|scale| scale.iter(batch_index))
                    .flatten_ok()
                    .filter_map_ok(|decoded| {
                        let (class_id, confidence) = decoded.best_class()?;
                        (confidence >= self.confidence_threshold)
                            .then(|| (decoded, class_id, confidence))
                    })
                    .try_collect()?;

                let rects = candidates.iter().map(|(decoded, ..)| *decoded.rect).collect_vec();
                let scores = candidates.iter().map(|&(_, _, score)| score).collect_vec();
                let classes = candidates.iter().map(|&(_, class, _)| class).collect_vec();
                let keep = non_max_suppression(&rects, &scores, &classes, self.nms_threshold)?;

                keep.into_iter()
                    .map(|index| -> Result<_> {
                        let (decoded, class_id, confidence) = &candidates[index];
                        Ok(Detection {
                            rect: letterbox.to_original(&decoded.rect)?,
                            class_id: *class_id,
                            confidence: *confidence,
                        })
                    })
                    .try_collect()
            })
            .try_collect()
    }
}
