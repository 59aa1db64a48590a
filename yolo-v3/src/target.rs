//! Dense training targets.

use crate::{
    anchor::{AnchorSet, AnchorTarget, ScaleInfo},
    common::*,
    unit::RatioLabel,
};

/// Index of the objectness entry on the last axis.
pub const OBJECTNESS_INDEX: usize = 4;

/// Target of one image at one scale, shaped `(H, W, A, 5 + C)`.
///
/// Every slot starts as background. A positive slot holds
/// `[tx, ty, tw, th, 1, one_hot(class)]`.
#[derive(Debug, Clone, PartialEq, CopyGetters, Getters)]
pub struct TargetTensor {
    #[getset(get_copy = "pub")]
    stride: usize,
    #[getset(get = "pub")]
    array: Array4<f32>,
}

impl TargetTensor {
    pub fn zeros(scale: &ScaleInfo, num_classes: usize) -> Self {
        let grid_size = scale.grid_size();
        let shape = (
            grid_size,
            grid_size,
            scale.anchors().len(),
            5 + num_classes,
        );
        Self {
            stride: scale.stride(),
            array: Array4::zeros(shape),
        }
    }

    pub fn grid_size(&self) -> usize {
        self.array.shape()[0]
    }

    pub fn entry(&self, row: usize, col: usize, anchor_index: usize) -> ArrayView1<'_, f32> {
        self.array.slice(s![row, col, anchor_index, ..])
    }

    /// Slots holding an object, in row, column, anchor order.
    pub fn positives(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.array
            .indexed_iter()
            .filter(|(index, value)| index.3 == OBJECTNESS_INDEX && **value == 1.0)
            .map(|((row, col, anchor, _), _)| (row, col, anchor))
    }

    pub fn num_positives(&self) -> usize {
        self.positives().count()
    }

    /// Write a positive slot. Returns true if the slot was already positive.
    fn write(&mut self, target: &AnchorTarget, class: usize) -> bool {
        let AnchorTarget {
            row,
            col,
            anchor_index,
            tx,
            ty,
            tw,
            th,
            ..
        } = *target;
        let mut entry = self.array.slice_mut(s![row, col, anchor_index, ..]);
        let collided = entry[OBJECTNESS_INDEX] == 1.0;

        entry.fill(0.0);
        entry[0] = tx as f32;
        entry[1] = ty as f32;
        entry[2] = tw as f32;
        entry[3] = th as f32;
        entry[OBJECTNESS_INDEX] = 1.0;
        entry[5 + class] = 1.0;

        collided
    }

    /// Convert to a `[H, W, A, 5 + C]` float tensor.
    pub fn to_tensor(&self) -> Tensor {
        let shape: Vec<i64> = self.array.shape().iter().map(|&size| size as i64).collect();
        let values: Vec<f32> = self.array.iter().copied().collect();
        Tensor::of_slice(&values).view(shape.as_slice())
    }
}

/// Targets of one image over all scales.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSet {
    /// One tensor per scale, in the order of [`AnchorSet::scales`].
    pub tensors: Vec<TargetTensor>,
    /// Labels that were encoded, in input order. Overwritten labels stay in the list.
    pub labels: Vec<RatioLabel>,
    /// Annotations that could not be encoded.
    pub skipped: usize,
    /// Annotations that overwrote an earlier one on the same slot.
    pub collisions: usize,
}

impl TargetSet {
    pub fn num_positives(&self) -> usize {
        self.tensors.iter().map(|tensor| tensor.num_positives()).sum()
    }
}

/// Turns the labels of one image into dense per-scale targets.
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    anchors: Arc<AnchorSet>,
    num_classes: usize,
}

impl TargetBuilder {
    pub fn new(anchors: Arc<AnchorSet>, num_classes: usize) -> Result<Self> {
        ensure!(num_classes > 0, "num_classes must be positive");
        Ok(Self {
            anchors,
            num_classes,
        })
    }

    pub fn anchors(&self) -> &Arc<AnchorSet> {
        &self.anchors
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Encode every label to its single assigned slot.
    ///
    /// Labels that fall off the grid, have no area or carry an unknown class are
    /// skipped and counted. When two labels share a slot the later one wins.
    pub fn build(&self, labels: &[RatioLabel]) -> TargetSet {
        let input_size = self.anchors.input_size();
        let mut tensors = self
            .anchors
            .scales()
            .iter()
            .map(|scale| TargetTensor::zeros(scale, self.num_classes))
            .collect_vec();
        let mut encoded = vec![];
        let mut skipped = 0;
        let mut collisions = 0;

        for label in labels {
            if label.class >= self.num_classes {
                warn!(
                    "skip label with class {} >= num_classes {}",
                    label.class, self.num_classes
                );
                skipped += 1;
                continue;
            }

            let pixel = match label.to_pixel(input_size) {
                Ok(pixel) => pixel,
                Err(err) => {
                    warn!("skip label {:?}: {}", label, err);
                    skipped += 1;
                    continue;
                }
            };
            let target = match self.anchors.encode_best(&pixel.map(|label| label.rect)) {
                Ok(target) => target,
                Err(err) => {
                    warn!("skip label {:?}: {}", label, err);
                    skipped += 1;
                    continue;
                }
            };

            let tensor = &mut tensors[target.scale_index];
            if tensor.write(&target, label.class) {
                debug!(
                    "label {:?} overwrites slot ({}, {}, {}) at stride {}",
                    label,
                    target.row,
                    target.col,
                    target.anchor_index,
                    tensor.stride()
                );
                collisions += 1;
            }
            encoded.push(*label);
        }

        TargetSet {
            tensors,
            labels: encoded,
            skipped,
            collisions,
        }
    }
}

/// Batched targets handed to the loss.
#[derive(Debug)]
pub struct YoloTarget {
    /// One `[B, H, W, A, 5 + C]` tensor per scale.
    pub tensors: Vec<Tensor>,
    /// Encoded ground truth of each image, used for the ignore region.
    pub labels: Vec<Vec<RatioLabel>>,
}

impl YoloTarget {
    pub fn from_target_sets(sets: &[TargetSet], device: Device) -> Result<Self> {
        ensure!(!sets.is_empty(), "cannot batch an empty list of targets");
        let num_scales = sets[0].tensors.len();
        ensure!(
            sets.iter().all(|set| set.tensors.len() == num_scales),
            "target sets have different number of scales"
        );

        let tensors = (0..num_scales)
            .map(|scale_index| {
                let per_image = sets
                    .iter()
                    .map(|set| set.tensors[scale_index].to_tensor())
                    .collect_vec();
                Tensor::stack(&per_image, 0).to_device(device)
            })
            .collect();
        let labels = sets.iter().map(|set| set.labels.clone()).collect();

        Ok(Self { tensors, labels })
    }

    pub fn batch_size(&self) -> usize {
        self.labels.len()
    }

    pub fn shallow_clone(&self) -> Self {
        Self {
            tensors: self.tensors.iter().map(|tensor| tensor.shallow_clone()).collect(),
            labels: self.labels.clone(),
        }
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            tensors: self.tensors.iter().map(|tensor| tensor.to_device(device)).collect(),
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Pixel, RectLabel};

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

    #[test]
    fn single_box_lands_on_assigned_slot() {
        let builder = TargetBuilder::new(anchor_set(), 80).unwrap();
        let targets = builder.build(&[ratio_label(208.0, 208.0, 60.0, 40.0, 3)]);

        assert_eq!(targets.skipped, 0);
        assert_eq!(targets.collisions, 0);
        assert_eq!(targets.num_positives(), 1);

        let stride16 = &targets.tensors[1];
        assert_eq!(stride16.stride(), 16);
        assert_eq!(stride16.positives().collect_vec(), vec![(13, 13, 1)]);

        let entry = stride16.entry(13, 13, 1);
        assert_abs_diff_eq!(entry[0], 0.0);
        assert_abs_diff_eq!(entry[1], 0.0);
        assert_abs_diff_eq!(entry[2], (60f32 / 62.0).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(entry[3], (40f32 / 45.0).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(entry[4], 1.0);
        let one_hot = entry.slice(s![5..]);
        assert_eq!(one_hot.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_abs_diff_eq!(one_hot[3], 1.0);
    }

    #[test]
    fn each_box_yields_exactly_one_positive() {
        let builder = TargetBuilder::new(anchor_set(), 4).unwrap();
        let labels = vec![
            ratio_label(20.0, 20.0, 10.0, 13.0, 0),
            ratio_label(100.0, 60.0, 16.0, 30.0, 1),
            ratio_label(300.0, 40.0, 62.0, 45.0, 2),
            ratio_label(60.0, 300.0, 59.0, 119.0, 3),
            ratio_label(200.0, 200.0, 156.0, 198.0, 0),
            ratio_label(330.0, 330.0, 116.0, 90.0, 1),
        ];
        let targets = builder.build(&labels);

        assert_eq!(targets.skipped, 0);
        assert_eq!(targets.collisions, 0);
        assert_eq!(targets.num_positives(), labels.len());
        let per_scale = targets
            .tensors
            .iter()
            .map(|tensor| tensor.num_positives())
            .collect_vec();
        assert_eq!(per_scale, vec![2, 2, 2]);
    }

    #[test]
    fn colliding_boxes_keep_last_write() {
        let builder = TargetBuilder::new(anchor_set(), 4).unwrap();
        let labels = vec![
            ratio_label(210.0, 210.0, 60.0, 40.0, 0),
            ratio_label(212.0, 214.0, 62.0, 45.0, 2),
        ];
        let targets = builder.build(&labels);

        assert_eq!(targets.collisions, 1);
        assert_eq!(targets.num_positives(), 1);
        assert_eq!(targets.labels, labels);

        let entry = targets.tensors[1].entry(13, 13, 1);
        assert_abs_diff_eq!(entry[0], 0.25);
        assert_abs_diff_eq!(entry[1], 0.375);
        assert_abs_diff_eq!(entry[5], 0.0);
        assert_abs_diff_eq!(entry[7], 1.0);
    }

    #[test]
    fn invalid_boxes_are_skipped_and_counted() {
        let builder = TargetBuilder::new(anchor_set(), 4).unwrap();
        let labels = vec![
            ratio_label(500.0, 100.0, 60.0, 40.0, 0),
            ratio_label(100.0, 100.0, 0.0, 40.0, 1),
            ratio_label(100.0, 100.0, 60.0, 40.0, 9),
            ratio_label(100.0, 100.0, 60.0, 40.0, 2),
        ];
        let targets = builder.build(&labels);

        assert_eq!(targets.skipped, 3);
        assert_eq!(targets.num_positives(), 1);
        assert_eq!(targets.labels, vec![labels[3]]);
    }

    #[test]
    fn batched_target_shapes() {
        let builder = TargetBuilder::new(anchor_set(), 4).unwrap();
        let labels = vec![
            vec![ratio_label(208.0, 208.0, 60.0, 40.0, 3)],
            vec![],
        ];
        let sets = labels.iter().map(|labels| builder.build(labels)).collect_vec();
        let target = YoloTarget::from_target_sets(&sets, Device::Cpu).unwrap();

        let shapes = target.tensors.iter().map(|tensor| tensor.size()).collect_vec();
        assert_eq!(
            shapes,
            vec![
                vec![2, 13, 13, 3, 9],
                vec![2, 26, 26, 3, 9],
                vec![2, 52, 52, 3, 9],
            ]
        );
        let objectness = target.tensors[1].narrow(4, 4, 1).sum(Kind::Float);
        assert_abs_diff_eq!(objectness.double_value(&[]), 1.0);
        assert_abs_diff_eq!(
            target.tensors[1]
                .double_value(&[0, 13, 13, 1, 8]),
            1.0
        );
    }
}
