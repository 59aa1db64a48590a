use super::{pairwise_iou, BceWithLogitsLoss, BceWithLogitsLossInit, ScaleLossOutput, YoloLossOutput};
use crate::{
    anchor::AnchorSet, common::*, model::YoloOutput, target::{YoloTarget, OBJECTNESS_INDEX},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoloLossInit {
    /// Unassigned predictions whose box reaches this IoU with any ground truth are
    /// left out of the no-object term.
    pub ignore_iou_threshold: R64,
    pub localization_weight: R64,
    pub objectness_weight: R64,
    pub classification_weight: R64,
    /// Localization terms are scaled by `small_box_scale - box_area_fraction`.
    pub small_box_scale: R64,
}

impl Default for YoloLossInit {
    fn default() -> Self {
        Self {
            ignore_iou_threshold: r64(0.5),
            localization_weight: r64(1.0),
            objectness_weight: r64(1.0),
            classification_weight: r64(1.0),
            small_box_scale: r64(2.0),
        }
    }
}

impl YoloLossInit {
    pub fn validate(&self) -> Result<()> {
        let Self {
            ignore_iou_threshold,
            localization_weight,
            objectness_weight,
            classification_weight,
            small_box_scale,
        } = *self;

        ensure!(
            (0.0..=1.0).contains(&ignore_iou_threshold.raw()),
            "ignore_iou_threshold must be in range [0, 1], but get {}",
            ignore_iou_threshold
        );
        ensure!(
            [localization_weight, objectness_weight, classification_weight]
                .iter()
                .all(|weight| weight.raw() >= 0.0),
            "loss weights must be non-negative"
        );
        ensure!(
            small_box_scale.raw() >= 1.0,
            "small_box_scale must be at least 1, but get {}",
            small_box_scale
        );
        Ok(())
    }

    pub fn build(self, anchors: Arc<AnchorSet>, num_classes: usize) -> Result<YoloLoss> {
        self.validate()?;
        ensure!(num_classes > 0, "num_classes must be positive");

        let Self {
            ignore_iou_threshold,
            localization_weight,
            objectness_weight,
            classification_weight,
            small_box_scale,
        } = self;

        Ok(YoloLoss {
            anchors,
            num_classes,
            ignore_iou_threshold: ignore_iou_threshold.raw(),
            localization_weight: localization_weight.raw(),
            objectness_weight: objectness_weight.raw(),
            classification_weight: classification_weight.raw(),
            small_box_scale: small_box_scale.raw(),
            bce_loss: BceWithLogitsLossInit::default(Reduction::None).build(),
        })
    }
}

/// The composite loss over all scales.
///
/// Per scale it sums a squared-error localization term over positive slots,
/// a binary cross entropy objectness term over positive and background slots,
/// and a per-class binary cross entropy over positive slots. Sums are divided by
/// the batch size and scaled by their weights.
#[derive(Debug)]
pub struct YoloLoss {
    anchors: Arc<AnchorSet>,
    num_classes: usize,
    ignore_iou_threshold: f64,
    localization_weight: f64,
    objectness_weight: f64,
    classification_weight: f64,
    small_box_scale: f64,
    bce_loss: BceWithLogitsLoss,
}

impl YoloLoss {
    pub fn forward(&self, prediction: &YoloOutput, target: &YoloTarget) -> Result<YoloLossOutput> {
        prediction.check_shape(&self.anchors, self.num_classes)?;
        ensure!(
            target.tensors.len() == prediction.raw.len(),
            "expect {} target scales, but get {}",
            prediction.raw.len(),
            target.tensors.len()
        );
        let batch_size = target.batch_size();
        ensure!(
            prediction.batch_size() == Some(batch_size as i64),
            "prediction batch size {:?} does not match target batch size {}",
            prediction.batch_size(),
            batch_size
        );
        let device = prediction.device().unwrap_or(Device::Cpu);

        let gt_boxes = self.gt_boxes(target, device)?;
        let scales: Vec<_> = izip!(0.., &prediction.raw, &target.tensors)
            .map(|(scale_index, raw, scale_target)| {
                self.scale_loss(scale_index, raw, &scale_target.to_device(device), &gt_boxes)
            })
            .try_collect()?;

        let localization_loss = sum_losses(
            scales.iter().map(|scale| &scale.localization_loss),
            device,
        );
        let objectness_loss = sum_losses(scales.iter().map(|scale| &scale.objectness_loss), device);
        let classification_loss = sum_losses(
            scales.iter().map(|scale| &scale.classification_loss),
            device,
        );
        let total_loss = sum_losses(scales.iter().map(|scale| &scale.total_loss), device);

        Ok(YoloLossOutput {
            total_loss,
            localization_loss,
            objectness_loss,
            classification_loss,
            scales,
        })
    }

    /// Ground truth per image as `[N, 4]` `(cy, cx, h, w)` input pixels.
    fn gt_boxes(&self, target: &YoloTarget, device: Device) -> Result<Vec<Tensor>> {
        let input_size = self.anchors.input_size();
        target
            .labels
            .iter()
            .map(|labels| -> Result<_> {
                let values: Vec<f32> = labels
                    .iter()
                    .map(|label| -> Result<_> {
                        let pixel = label.to_pixel(input_size)?;
                        Ok(pixel.rect.cycxhw().map(|value| value.raw() as f32))
                    })
                    .flatten_ok()
                    .try_collect()?;
                Ok(Tensor::of_slice(&values).view([-1, 4]).to_device(device))
            })
            .try_collect()
    }

    fn scale_loss(
        &self,
        scale_index: usize,
        raw: &Tensor,
        target: &Tensor,
        gt_boxes: &[Tensor],
    ) -> Result<ScaleLossOutput> {
        let scale = &self.anchors.scales()[scale_index];
        let batch_size = gt_boxes.len() as f64;
        let input_size = self.anchors.input_size() as f64;
        let device = raw.device();
        ensure!(
            raw.size() == target.size(),
            "raw output shape {:?} and target shape {:?} mismatch at stride {}",
            raw.size(),
            target.size(),
            scale.stride()
        );

        let obj_index = OBJECTNESS_INDEX as i64;
        let num_classes = self.num_classes as i64;
        let obj_mask = target.narrow(4, obj_index, 1);
        let ignore_mask = tch::no_grad(|| self.ignore_mask(scale_index, raw, gt_boxes))?;
        let noobj_mask = (1.0 - &obj_mask) * (1.0 - ignore_mask);

        // (small_box_scale - box area relative to the image) on positive slots
        let box_scale = {
            let num_anchors = scale.anchors().len() as i64;
            let (anchor_h, anchor_w): (Vec<f32>, Vec<f32>) = scale
                .anchors()
                .iter()
                .map(|anchor| (anchor.h().raw() as f32, anchor.w().raw() as f32))
                .unzip();
            let anchor_h = Tensor::of_slice(&anchor_h)
                .view([1, 1, 1, num_anchors, 1])
                .to_device(device);
            let anchor_w = Tensor::of_slice(&anchor_w)
                .view([1, 1, 1, num_anchors, 1])
                .to_device(device);
            let gt_w = target.narrow(4, 2, 1).exp() * anchor_w;
            let gt_h = target.narrow(4, 3, 1).exp() * anchor_h;
            let area = gt_h * gt_w / (input_size * input_size);
            (self.small_box_scale - area) * &obj_mask
        };

        let localization_loss = {
            let xy_diff = raw.narrow(4, 0, 2).sigmoid() - target.narrow(4, 0, 2);
            let wh_diff = raw.narrow(4, 2, 2) - target.narrow(4, 2, 2);
            let squared = &xy_diff * &xy_diff + &wh_diff * &wh_diff;
            (squared * &box_scale).sum(Kind::Float) / batch_size * self.localization_weight
        };

        let objectness_loss = {
            let bce = self
                .bce_loss
                .forward(&raw.narrow(4, obj_index, 1), &obj_mask);
            (bce * (&obj_mask + &noobj_mask)).sum(Kind::Float) / batch_size
                * self.objectness_weight
        };

        let classification_loss = {
            let bce = self.bce_loss.forward(
                &raw.narrow(4, 5, num_classes),
                &target.narrow(4, 5, num_classes),
            );
            (bce * &obj_mask).sum(Kind::Float) / batch_size * self.classification_weight
        };

        let total_loss = &localization_loss + &objectness_loss + &classification_loss;

        Ok(ScaleLossOutput {
            stride: scale.stride(),
            total_loss,
            localization_loss,
            objectness_loss,
            classification_loss,
        })
    }

    /// 1 where the decoded prediction overlaps any ground truth of its image at or
    /// above the ignore threshold, shaped `[B, H, W, A, 1]`.
    fn ignore_mask(&self, scale_index: usize, raw: &Tensor, gt_boxes: &[Tensor]) -> Result<Tensor> {
        let decoded = self.anchors.decode(raw, scale_index)?;
        let shape = decoded.objectness.size();
        let pred_boxes = Tensor::cat(&[&decoded.cy, &decoded.cx, &decoded.h, &decoded.w], 4);

        let masks = gt_boxes
            .iter()
            .enumerate()
            .map(|(batch_index, gt_boxes)| {
                let image_shape = &shape[1..];
                if gt_boxes.size()[0] == 0 {
                    return Tensor::zeros(image_shape, (Kind::Float, raw.device()));
                }
                let pred_boxes = pred_boxes
                    .select(0, batch_index as i64)
                    .view([-1, 4])
                    .to_kind(Kind::Float);
                let (max_iou, _) = pairwise_iou(&pred_boxes, gt_boxes).max_dim(1, false);
                max_iou
                    .ge(self.ignore_iou_threshold)
                    .to_kind(Kind::Float)
                    .view(image_shape)
            })
            .collect_vec();

        Ok(Tensor::stack(&masks, 0))
    }
}

fn sum_losses<'a>(losses: impl Iterator<Item = &'a Tensor>, device: Device) -> Tensor {
    losses.fold(Tensor::zeros(&[], (Kind::Float, device)), |acc, loss| acc + loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        target::TargetBuilder,
        unit::{Pixel, RatioLabel, RectLabel},
    };

    const NUM_CLASSES: usize = 4;

    fn anchor_set() -> Arc<AnchorSet> {
        let anchors = [
            [10, 13],
            [16, 30],
            [33, 23],
            [30, 61],
            [62, 45],
            [59, 119],
            [116, 90],
            [156, 198],
            [373, 326],
        ]
        .iter()
        .map(|&[w, h]| [r64(w as f64), r64(h as f64)])
        .collect_vec();
        Arc::new(AnchorSet::new(416, &[32, 16, 8], &anchors, 3).unwrap())
    }

    fn ratio_label(cx: f64, cy: f64, w: f64, h: f64, class: usize) -> RatioLabel {
        let rect = CyCxHW::try_from_cycxhw([r64(cy), r64(cx), r64(h), r64(w)]).unwrap();
        Pixel(RectLabel { rect, class }).to_ratio(416).unwrap()
    }

    fn make_target(anchors: &Arc<AnchorSet>, labels: Vec<Vec<RatioLabel>>) -> YoloTarget {
        let builder = TargetBuilder::new(anchors.clone(), NUM_CLASSES).unwrap();
        let sets = labels.iter().map(|labels| builder.build(labels)).collect_vec();
        YoloTarget::from_target_sets(&sets, Device::Cpu).unwrap()
    }

    fn zeros_output(anchors: &AnchorSet, batch_size: i64) -> YoloOutput {
        let raw = anchors
            .scales()
            .iter()
            .map(|scale| {
                let grid = scale.grid_size() as i64;
                Tensor::zeros(
                    &[batch_size, grid, grid, 3, 5 + NUM_CLASSES as i64],
                    (Kind::Float, Device::Cpu),
                )
            })
            .collect();
        YoloOutput { raw }
    }

    #[test]
    fn loss_is_non_negative() {
        tch::manual_seed(0);
        let anchors = anchor_set();
        let loss = YoloLossInit::default().build(anchors.clone(), NUM_CLASSES).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..5 {
            let labels = (0..2)
                .map(|_| {
                    (0..rng.gen_range(0..6))
                        .map(|_| {
                            ratio_label(
                                rng.gen_range(10.0..400.0),
                                rng.gen_range(10.0..400.0),
                                rng.gen_range(4.0..300.0),
                                rng.gen_range(4.0..300.0),
                                rng.gen_range(0..NUM_CLASSES),
                            )
                        })
                        .collect_vec()
                })
                .collect_vec();
            let target = make_target(&anchors, labels);
            let output = YoloOutput {
                raw: zeros_output(&anchors, 2)
                    .raw
                    .iter()
                    .map(|raw| raw.randn_like() * 3.0)
                    .collect(),
            };

            let record = loss.forward(&output, &target).unwrap().to_record();
            assert!(record.total >= 0.0);
            assert!(record.localization >= 0.0);
            assert!(record.objectness >= 0.0);
            assert!(record.classification >= 0.0);
            assert_eq!(record.scales.len(), 3);
            assert_abs_diff_eq!(
                record.total,
                record.scales.iter().map(|scale| scale.total).sum::<f64>(),
                epsilon = 1e-3
            );
        }
    }

    #[test]
    fn background_loss_decreases_toward_zero() {
        let anchors = anchor_set();
        let loss = YoloLossInit::default().build(anchors.clone(), NUM_CLASSES).unwrap();
        let target = make_target(&anchors, vec![vec![]]);

        let totals = [0.0, 2.0, 4.0, 8.0, 16.0]
            .iter()
            .map(|&logit| {
                let output = zeros_output(&anchors, 1);
                for raw in &output.raw {
                    let _ = raw.narrow(4, 4, 1).fill_(-logit);
                }
                let record = loss.forward(&output, &target).unwrap().to_record();
                assert_abs_diff_eq!(record.localization, 0.0);
                assert_abs_diff_eq!(record.classification, 0.0);
                record.total
            })
            .collect_vec();

        for (prev, next) in totals.iter().tuple_windows() {
            assert!(next < prev, "loss does not decrease: {:?}", totals);
        }
        assert!(totals[4] < 1e-2);
    }

    #[test]
    fn positive_slot_drives_all_terms() {
        let anchors = anchor_set();
        let loss = YoloLossInit::default().build(anchors.clone(), NUM_CLASSES).unwrap();
        let target = make_target(&anchors, vec![vec![ratio_label(216.0, 216.0, 60.0, 40.0, 2)]]);

        let output = zeros_output(&anchors, 1);
        let raw = output.raw[1].shallow_clone().set_requires_grad(true);
        let output = YoloOutput {
            raw: vec![
                output.raw[0].shallow_clone(),
                raw.shallow_clone(),
                output.raw[2].shallow_clone(),
            ],
        };
        let loss_output = loss.forward(&output, &target).unwrap();
        let record = loss_output.to_record();

        // sigmoid(0) hits the 0.5 offsets exactly, only the size term is left
        let tw = (60f64 / 62.0).ln();
        let th = (40f64 / 45.0).ln();
        let box_scale = 2.0 - 60.0 * 40.0 / (416.0 * 416.0);
        assert_abs_diff_eq!(
            record.localization,
            box_scale * (tw * tw + th * th),
            epsilon = 1e-5
        );
        assert!(record.classification > 0.0);
        assert_abs_diff_eq!(record.scales[1].localization, record.localization);

        loss_output.total_loss.backward();
        let grad = raw.grad();
        assert!(grad.abs().sum(Kind::Float).double_value(&[]) > 0.0);
    }

    #[test]
    fn overlapping_prediction_is_ignored() {
        let anchors = anchor_set();
        let loss = YoloLossInit::default().build(anchors.clone(), NUM_CLASSES).unwrap();
        let target = make_target(&anchors, vec![vec![ratio_label(216.0, 216.0, 60.0, 40.0, 2)]]);

        // anchor 0 of stride 16 is (30, 61), scale it onto the ground truth
        let objectness_loss = |row: i64, col: i64, logit: f64| -> f64 {
            let output = zeros_output(&anchors, 1);
            let values = Tensor::of_slice(&[
                0.0,
                0.0,
                (60f32 / 30.0).ln(),
                (40f32 / 61.0).ln(),
                logit as f32,
            ]);
            output.raw[1]
                .narrow(1, row, 1)
                .narrow(2, col, 1)
                .narrow(3, 0, 1)
                .narrow(4, 0, 5)
                .view([5])
                .copy_(&values);
            loss.forward(&output, &target).unwrap().to_record().objectness
        };

        let on_object = objectness_loss(13, 13, 5.0);
        assert_abs_diff_eq!(on_object, objectness_loss(13, 13, 0.0), epsilon = 1e-5);

        let far_away = objectness_loss(0, 0, 5.0);
        assert!(far_away > objectness_loss(0, 0, 0.0) + 1.0);
    }

    #[test]
    fn components_carry_their_weights() {
        let anchors = anchor_set();
        let target = make_target(&anchors, vec![vec![ratio_label(216.0, 216.0, 60.0, 40.0, 2)]]);
        let output = zeros_output(&anchors, 1);

        let plain = YoloLossInit::default()
            .build(anchors.clone(), NUM_CLASSES)
            .unwrap()
            .forward(&output, &target)
            .unwrap()
            .to_record();
        let weighted = YoloLossInit {
            localization_weight: r64(2.0),
            objectness_weight: r64(0.5),
            classification_weight: r64(3.0),
            ..Default::default()
        }
        .build(anchors.clone(), NUM_CLASSES)
        .unwrap()
        .forward(&output, &target)
        .unwrap()
        .to_record();

        assert_abs_diff_eq!(weighted.localization, plain.localization * 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(weighted.objectness, plain.objectness * 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(
            weighted.classification,
            plain.classification * 3.0,
            epsilon = 1e-4
        );
        assert_abs_diff_eq!(
            weighted.total,
            weighted.localization + weighted.objectness + weighted.classification,
            epsilon = 1e-4
        );
        weighted.scales.iter().for_each(|scale| {
            assert_abs_diff_eq!(
                scale.total,
                scale.localization + scale.objectness + scale.classification,
                epsilon = 1e-4
            );
        });
    }

    #[test]
    fn skipped_labels_do_not_open_ignore_region() {
        let anchors = anchor_set();
        let loss = YoloLossInit::default().build(anchors.clone(), NUM_CLASSES).unwrap();
        // the class is out of range, so the builder drops the label
        let target = make_target(
            &anchors,
            vec![vec![ratio_label(216.0, 216.0, 60.0, 40.0, NUM_CLASSES)]],
        );
        assert!(target.labels[0].is_empty());

        let objectness_loss = |logit: f64| -> f64 {
            let output = zeros_output(&anchors, 1);
            let values = Tensor::of_slice(&[
                0.0,
                0.0,
                (60f32 / 30.0).ln(),
                (40f32 / 61.0).ln(),
                logit as f32,
            ]);
            output.raw[1]
                .narrow(1, 13, 1)
                .narrow(2, 13, 1)
                .narrow(3, 0, 1)
                .narrow(4, 0, 5)
                .view([5])
                .copy_(&values);
            loss.forward(&output, &target).unwrap().to_record().objectness
        };

        assert!(objectness_loss(5.0) > objectness_loss(0.0) + 1.0);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let anchors = anchor_set();
        let loss = YoloLossInit::default().build(anchors.clone(), NUM_CLASSES).unwrap();
        let target = make_target(&anchors, vec![vec![], vec![]]);
        assert!(loss.forward(&zeros_output(&anchors, 1), &target).is_err());

        let init = YoloLossInit {
            ignore_iou_threshold: r64(1.5),
            ..Default::default()
        };
        assert!(init.build(anchors, NUM_CLASSES).is_err());
    }
}
