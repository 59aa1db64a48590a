//! Multi-scale anchor box encoding and decoding.

use crate::{common::*, unit::Pixel};
use thiserror::Error;

/// Anchors and grid geometry of one detection scale.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters, Getters)]
pub struct ScaleInfo {
    /// Downsampling factor from the network input.
    #[getset(get_copy = "pub")]
    stride: usize,
    /// Number of cells per side.
    #[getset(get_copy = "pub")]
    grid_size: usize,
    /// Anchor sizes in input pixels, in ascending area.
    #[getset(get = "pub")]
    anchors: Vec<Pixel<HW<R64>>>,
}

/// Location of one anchor in an [`AnchorSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorIndex {
    pub scale_index: usize,
    pub anchor_index: usize,
}

/// The training target of one ground-truth box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorTarget {
    pub scale_index: usize,
    pub anchor_index: usize,
    pub row: usize,
    pub col: usize,
    /// Center offset inside the cell, `[0, 1)` on both axes.
    pub tx: f64,
    pub ty: f64,
    /// Log ratio of the box size to the anchor size.
    pub tw: f64,
    pub th: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("box center (cy={cy}, cx={cx}) falls in cell ({row}, {col}) outside of the {grid_size}x{grid_size} grid")]
    OutOfGrid {
        cy: f64,
        cx: f64,
        row: i64,
        col: i64,
        grid_size: usize,
    },
    #[error("box size (h={h}, w={w}) is not positive")]
    DegenerateBox { h: f64, w: f64 },
    #[error("scale index {0} does not exist")]
    InvalidScale(usize),
}

/// Strides of the detection scales, coarsest first.
pub const STRIDES: [usize; 3] = [32, 16, 8];

/// Number of anchors assigned to each scale.
pub const ANCHORS_PER_SCALE: usize = 3;

/// The validated, immutable anchor layout.
///
/// Scales are kept in descending stride order. The nine configured anchors are
/// stably sorted by area, the largest group goes to the coarsest stride.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters, Getters)]
pub struct AnchorSet {
    #[getset(get_copy = "pub")]
    input_size: usize,
    #[getset(get_copy = "pub")]
    anchors_per_scale: usize,
    #[getset(get = "pub")]
    scales: Vec<ScaleInfo>,
}

impl AnchorSet {
    /// Partition `anchors`, given as `[w, h]` pixel pairs, over `strides`.
    pub fn new(
        input_size: usize,
        strides: &[usize],
        anchors: &[[R64; 2]],
        anchors_per_scale: usize,
    ) -> Result<Self> {
        ensure!(
            input_size > 0 && input_size % 32 == 0,
            "input_size must be a positive multiple of 32, but get {}",
            input_size
        );
        ensure!(
            anchors_per_scale == ANCHORS_PER_SCALE,
            "expect {} anchors per scale, but get {}",
            ANCHORS_PER_SCALE,
            anchors_per_scale
        );

        let strides: Vec<usize> = strides
            .iter()
            .copied()
            .sorted_by(|lhs, rhs| rhs.cmp(lhs))
            .collect();
        ensure!(
            strides == STRIDES,
            "unsupported stride set {:?}, expect {:?}",
            strides,
            STRIDES
        );
        ensure!(
            anchors.len() == strides.len() * anchors_per_scale,
            "expect {} anchors for {} scales, but get {}",
            strides.len() * anchors_per_scale,
            strides.len(),
            anchors.len()
        );

        let anchors: Vec<Pixel<HW<R64>>> = anchors
            .iter()
            .map(|&[w, h]| -> Result<_> {
                ensure!(
                    w.raw() > 0.0 && h.raw() > 0.0,
                    "anchor size must be positive, but get w={} h={}",
                    w,
                    h
                );
                Ok(Pixel(HW::try_from_hw([h, w])?))
            })
            .try_collect()?;

        // stable sort, equal areas keep configured order
        let anchors = anchors
            .into_iter()
            .sorted_by_key(|anchor| anchor.area())
            .collect_vec();

        let scales = strides
            .iter()
            .zip(anchors.chunks(anchors_per_scale).rev())
            .map(|(&stride, anchors)| ScaleInfo {
                stride,
                grid_size: input_size / stride,
                anchors: anchors.to_vec(),
            })
            .collect();

        Ok(Self {
            input_size,
            anchors_per_scale,
            scales,
        })
    }

    pub fn num_scales(&self) -> usize {
        self.scales.len()
    }

    pub fn scale(&self, scale_index: usize) -> Option<&ScaleInfo> {
        self.scales.get(scale_index)
    }

    /// Iterate anchors in flat order: coarsest scale first.
    pub fn iter(&self) -> impl Iterator<Item = (AnchorIndex, &Pixel<HW<R64>>)> + '_ {
        self.scales
            .iter()
            .enumerate()
            .flat_map(|(scale_index, scale)| {
                scale
                    .anchors
                    .iter()
                    .enumerate()
                    .map(move |(anchor_index, anchor)| {
                        let index = AnchorIndex {
                            scale_index,
                            anchor_index,
                        };
                        (index, anchor)
                    })
            })
    }

    /// The anchor with the highest shape IoU over all scales.
    ///
    /// The lowest flat index wins ties.
    pub fn assign(&self, rect: &Pixel<CyCxHW<R64>>) -> AnchorIndex {
        let size = rect.size();
        let mut best: Option<(AnchorIndex, R64)> = None;

        for (index, anchor) in self.iter() {
            let iou = anchor.shape_iou_with(&size);
            match best {
                Some((_, best_iou)) if best_iou >= iou => {}
                _ => best = Some((index, iou)),
            }
        }

        // validated anchor sets always contain at least one anchor
        best.map(|(index, _)| index).unwrap_or(AnchorIndex {
            scale_index: 0,
            anchor_index: 0,
        })
    }

    /// Encode `rect` against the best anchor within one scale.
    pub fn encode(
        &self,
        rect: &Pixel<CyCxHW<R64>>,
        scale_index: usize,
    ) -> Result<AnchorTarget, EncodeError> {
        let scale = self
            .scales
            .get(scale_index)
            .ok_or(EncodeError::InvalidScale(scale_index))?;
        let size = rect.size();
        let anchor_index = scale
            .anchors
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, R64)>, (index, anchor)| {
                let iou = anchor.shape_iou_with(&size);
                match best {
                    Some((_, best_iou)) if best_iou >= iou => best,
                    _ => Some((index, iou)),
                }
            })
            .map(|(index, _)| index)
            .unwrap_or(0);

        self.encode_at(
            rect,
            AnchorIndex {
                scale_index,
                anchor_index,
            },
        )
    }

    /// Encode `rect` against its globally assigned anchor.
    pub fn encode_best(&self, rect: &Pixel<CyCxHW<R64>>) -> Result<AnchorTarget, EncodeError> {
        let index = self.assign(rect);
        self.encode_at(rect, index)
    }

    /// Encode `rect` against a specific anchor.
    pub fn encode_at(
        &self,
        rect: &Pixel<CyCxHW<R64>>,
        index: AnchorIndex,
    ) -> Result<AnchorTarget, EncodeError> {
        let AnchorIndex {
            scale_index,
            anchor_index,
        } = index;
        let scale = self
            .scales
            .get(scale_index)
            .ok_or(EncodeError::InvalidScale(scale_index))?;
        let anchor = scale
            .anchors
            .get(anchor_index)
            .ok_or(EncodeError::InvalidScale(scale_index))?;

        let [cy, cx, h, w] = rect.cycxhw().map(|v| v.raw());
        if h <= 0.0 || w <= 0.0 {
            return Err(EncodeError::DegenerateBox { h, w });
        }

        let grid = rect
            .to_grid(scale.stride)
            .map_err(|_| EncodeError::InvalidScale(scale_index))?;
        let grid_cy = grid.cy().raw();
        let grid_cx = grid.cx().raw();
        let row = grid_cy.floor() as i64;
        let col = grid_cx.floor() as i64;
        let grid_size = scale.grid_size as i64;

        if !(0..grid_size).contains(&row) || !(0..grid_size).contains(&col) {
            return Err(EncodeError::OutOfGrid {
                cy,
                cx,
                row,
                col,
                grid_size: scale.grid_size,
            });
        }

        Ok(AnchorTarget {
            scale_index,
            anchor_index,
            row: row as usize,
            col: col as usize,
            tx: grid_cx - col as f64,
            ty: grid_cy - row as f64,
            tw: (w / anchor.w().raw()).ln(),
            th: (h / anchor.h().raw()).ln(),
        })
    }

    /// Decode raw head output `[B, H, W, A, 5 + C]` of one scale.
    pub fn decode(&self, raw: &Tensor, scale_index: usize) -> Result<DecodedScale> {
        let scale = self
            .scales
            .get(scale_index)
            .ok_or_else(|| format_err!("scale index {} does not exist", scale_index))?;
        let (grid_h, grid_w, num_anchors, num_entries) = match raw.size().as_slice() {
            &[_b, h, w, a, e] => (h, w, a, e),
            shape => bail!("expect a 5-dimensional raw output, but get shape {:?}", shape),
        };
        ensure!(
            grid_h == scale.grid_size as i64 && grid_w == scale.grid_size as i64,
            "expect {}x{} grid at stride {}, but get {}x{}",
            scale.grid_size,
            scale.grid_size,
            scale.stride,
            grid_h,
            grid_w
        );
        ensure!(
            num_anchors == scale.anchors.len() as i64,
            "expect {} anchors, but get {}",
            scale.anchors.len(),
            num_anchors
        );
        ensure!(num_entries > 5, "raw output has no class entries");

        let device = raw.device();
        let stride = scale.stride as f64;
        let (anchor_h, anchor_w): (Vec<f32>, Vec<f32>) = scale
            .anchors
            .iter()
            .map(|anchor| (anchor.h().raw() as f32, anchor.w().raw() as f32))
            .unzip();
        let anchor_h = Tensor::of_slice(&anchor_h)
            .view([1, 1, 1, num_anchors, 1])
            .to_device(device);
        let anchor_w = Tensor::of_slice(&anchor_w)
            .view([1, 1, 1, num_anchors, 1])
            .to_device(device);
        let rows = Tensor::arange(grid_h, (Kind::Float, device)).view([1, grid_h, 1, 1, 1]);
        let cols = Tensor::arange(grid_w, (Kind::Float, device)).view([1, 1, grid_w, 1, 1]);

        let cx = (raw.narrow(4, 0, 1).sigmoid() + cols) * stride;
        let cy = (raw.narrow(4, 1, 1).sigmoid() + rows) * stride;
        let w = raw.narrow(4, 2, 1).exp() * anchor_w;
        let h = raw.narrow(4, 3, 1).exp() * anchor_h;
        let objectness = raw.narrow(4, 4, 1).sigmoid();
        let class_probs = raw.narrow(4, 5, num_entries - 5).sigmoid();

        Ok(DecodedScale {
            scale_index,
            cy,
            cx,
            h,
            w,
            objectness,
            class_probs,
        })
    }
}

/// Decoded boxes of one scale, each field shaped `[B, H, W, A, _]`.
#[derive(Debug, TensorLike)]
pub struct DecodedScale {
    #[tensor_like(copy)]
    pub scale_index: usize,
    /// Centers and sizes in input pixels.
    pub cy: Tensor,
    pub cx: Tensor,
    pub h: Tensor,
    pub w: Tensor,
    pub objectness: Tensor,
    pub class_probs: Tensor,
}

/// One decoded cell/anchor prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBox {
    pub scale_index: usize,
    pub row: usize,
    pub col: usize,
    pub anchor_index: usize,
    pub rect: Pixel<CyCxHW<f64>>,
    pub objectness: f64,
    pub class_probs: Vec<f64>,
}

impl DecodedBox {
    /// The most probable class and `objectness * class_prob`.
    pub fn best_class(&self) -> Option<(usize, f64)> {
        self.class_probs
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (class, prob)| match best {
                Some((_, best_prob)) if best_prob >= prob => best,
                _ => Some((class, prob)),
            })
            .map(|(class, prob)| (class, prob * self.objectness))
    }
}

impl DecodedScale {
    /// Boxes of one image in row, column, anchor order.
    ///
    /// The values are copied to the host once. Entries with non-finite size are skipped.
    pub fn iter(&self, batch_index: usize) -> Result<impl Iterator<Item = DecodedBox>> {
        let (batch_size, grid_h, grid_w, num_anchors, num_classes) =
            match self.class_probs.size().as_slice() {
                &[b, h, w, a, c] => (b, h as usize, w as usize, a as usize, c as usize),
                shape => bail!("invalid decoded shape {:?}", shape),
            };
        ensure!(
            (batch_index as i64) < batch_size,
            "batch index {} is out of range for batch size {}",
            batch_index,
            batch_size
        );

        let to_vec = |tensor: &Tensor| -> Vec<f64> {
            Vec::<f64>::from(
                &tensor
                    .select(0, batch_index as i64)
                    .to_device(Device::Cpu)
                    .to_kind(Kind::Double)
                    .contiguous()
                    .view([-1]),
            )
        };
        let cy = to_vec(&self.cy);
        let cx = to_vec(&self.cx);
        let h = to_vec(&self.h);
        let w = to_vec(&self.w);
        let objectness = to_vec(&self.objectness);
        let class_probs = to_vec(&self.class_probs);
        let scale_index = self.scale_index;

        let iter = iproduct!(0..grid_h, 0..grid_w, 0..num_anchors)
            .enumerate()
            .filter_map(move |(index, (row, col, anchor_index))| {
                let rect = CyCxHW::try_from_cycxhw([cy[index], cx[index], h[index], w[index]])
                    .ok()
                    .filter(|rect| rect.h().is_finite() && rect.w().is_finite())?;
                let probs = class_probs[(index * num_classes)..((index + 1) * num_classes)].to_vec();

                Some(DecodedBox {
                    scale_index,
                    row,
                    col,
                    anchor_index,
                    rect: Pixel(rect),
                    objectness: objectness[index],
                    class_probs: probs,
                })
            });

        Ok(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_anchors() -> Vec<[R64; 2]> {
        [
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
        .collect()
    }

    fn anchor_set() -> AnchorSet {
        AnchorSet::new(416, &[32, 16, 8], &standard_anchors(), 3).unwrap()
    }

    fn pixel_box(cx: f64, cy: f64, w: f64, h: f64) -> Pixel<CyCxHW<R64>> {
        Pixel(CyCxHW::try_from_cycxhw([r64(cy), r64(cx), r64(h), r64(w)]).unwrap())
    }

    fn logit(p: f64) -> f64 {
        (p / (1.0 - p)).ln()
    }

    #[test]
    fn anchors_are_partitioned_by_area() {
        let anchors = anchor_set();
        let layout: Vec<(usize, usize, Vec<[f64; 2]>)> = anchors
            .scales()
            .iter()
            .map(|scale| {
                let sizes = scale
                    .anchors()
                    .iter()
                    .map(|anchor| [anchor.w().raw(), anchor.h().raw()])
                    .collect();
                (scale.stride(), scale.grid_size(), sizes)
            })
            .collect();

        assert_eq!(
            layout,
            vec![
                (32, 13, vec![[116.0, 90.0], [156.0, 198.0], [373.0, 326.0]]),
                (16, 26, vec![[30.0, 61.0], [62.0, 45.0], [59.0, 119.0]]),
                (8, 52, vec![[10.0, 13.0], [16.0, 30.0], [33.0, 23.0]]),
            ]
        );
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let anchors = standard_anchors();
        assert!(AnchorSet::new(400, &[32, 16, 8], &anchors, 3).is_err());
        assert!(AnchorSet::new(416, &[32, 16], &anchors, 3).is_err());
        assert!(AnchorSet::new(416, &[32, 32, 8], &anchors, 3).is_err());
        assert!(AnchorSet::new(448, &[64, 32, 16], &anchors, 3).is_err());
        assert!(AnchorSet::new(416, &[32, 16], &anchors[0..6], 3).is_err());
        assert!(AnchorSet::new(416, &[32, 16, 8], &anchors[0..6], 2).is_err());

        // any stride order is accepted
        let reversed = AnchorSet::new(416, &[8, 16, 32], &anchors, 3).unwrap();
        assert_eq!(reversed, anchor_set());

        let mut zero = anchors;
        zero[4] = [r64(0.0), r64(45.0)];
        assert!(AnchorSet::new(416, &[32, 16, 8], &zero, 3).is_err());
    }

    #[test]
    fn global_assignment_picks_highest_shape_iou() {
        let anchors = anchor_set();
        let index = anchors.assign(&pixel_box(208.0, 208.0, 60.0, 40.0));
        assert_eq!(
            index,
            AnchorIndex {
                scale_index: 1,
                anchor_index: 1
            }
        );

        let index = anchors.assign(&pixel_box(100.0, 100.0, 370.0, 320.0));
        assert_eq!(
            index,
            AnchorIndex {
                scale_index: 0,
                anchor_index: 2
            }
        );
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let anchors = [
            [4, 4],
            [4, 4],
            [8, 8],
            [16, 16],
            [20, 20],
            [24, 24],
            [32, 32],
            [48, 48],
            [64, 64],
        ]
        .iter()
        .map(|&[w, h]| [r64(w as f64), r64(h as f64)])
        .collect_vec();
        let anchors = AnchorSet::new(64, &[32, 16, 8], &anchors, 3).unwrap();
        let rect = pixel_box(20.0, 20.0, 4.0, 4.0);

        let target = anchors.encode(&rect, 2).unwrap();
        assert_eq!(target.anchor_index, 0);
        assert_eq!(
            anchors.assign(&rect),
            AnchorIndex {
                scale_index: 2,
                anchor_index: 0
            }
        );
    }

    #[test]
    fn encode_offsets() {
        let anchors = anchor_set();
        let target = anchors
            .encode_best(&pixel_box(212.0, 200.0, 62.0, 45.0))
            .unwrap();
        assert_eq!((target.scale_index, target.anchor_index), (1, 1));
        assert_eq!((target.row, target.col), (12, 13));
        assert_abs_diff_eq!(target.tx, 0.25);
        assert_abs_diff_eq!(target.ty, 0.5);
        assert_abs_diff_eq!(target.tw, 0.0);
        assert_abs_diff_eq!(target.th, 0.0);
    }

    #[test]
    fn cell_is_the_floor_of_the_grid_center() {
        let anchors = anchor_set();
        let rect = pixel_box(301.5, 97.25, 60.0, 40.0);
        let target = anchors.encode(&rect, 1).unwrap();
        let grid = rect.to_grid(16).unwrap();

        assert_eq!(target.row, grid.cy().raw().floor() as usize);
        assert_eq!(target.col, grid.cx().raw().floor() as usize);
        assert_abs_diff_eq!(target.ty, grid.cy().raw().fract());
        assert_abs_diff_eq!(target.tx, grid.cx().raw().fract());
    }

    #[test]
    fn encode_failures() {
        let anchors = anchor_set();
        assert!(matches!(
            anchors.encode(&pixel_box(416.0, 100.0, 20.0, 20.0), 0),
            Err(EncodeError::OutOfGrid { col: 13, .. })
        ));
        assert!(matches!(
            anchors.encode(&pixel_box(-1.0, 100.0, 20.0, 20.0), 2),
            Err(EncodeError::OutOfGrid { col: -1, .. })
        ));
        assert!(matches!(
            anchors.encode(&pixel_box(100.0, 100.0, 0.0, 20.0), 1),
            Err(EncodeError::DegenerateBox { .. })
        ));
        assert!(matches!(
            anchors.encode(&pixel_box(100.0, 100.0, 20.0, 20.0), 3),
            Err(EncodeError::InvalidScale(3))
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let anchors = anchor_set();
        let num_classes = 4;
        let boxes = [
            pixel_box(13.7, 21.2, 11.0, 12.0),
            pixel_box(210.0, 203.0, 60.0, 40.0),
            pixel_box(301.5, 97.25, 140.0, 180.0),
        ];

        for rect in &boxes {
            let target = anchors.encode_best(rect).unwrap();
            let scale = &anchors.scales()[target.scale_index];
            let grid = scale.grid_size() as i64;
            let num_anchors = scale.anchors().len() as i64;

            let raw = Tensor::zeros(
                &[1, grid, grid, num_anchors, 5 + num_classes],
                (Kind::Float, Device::Cpu),
            );
            let values = Tensor::of_slice(&[
                logit(target.tx) as f32,
                logit(target.ty) as f32,
                target.tw as f32,
                target.th as f32,
            ]);
            let _ = raw
                .narrow(1, target.row as i64, 1)
                .narrow(2, target.col as i64, 1)
                .narrow(3, target.anchor_index as i64, 1)
                .narrow(4, 0, 4)
                .view([4])
                .copy_(&values);

            let decoded = anchors.decode(&raw, target.scale_index).unwrap();
            let found = decoded
                .iter(0)
                .unwrap()
                .find(|decoded| {
                    decoded.row == target.row
                        && decoded.col == target.col
                        && decoded.anchor_index == target.anchor_index
                })
                .unwrap();

            let expect = rect.cycxhw().map(|v| v.raw());
            let actual = found.rect.cycxhw();
            expect.iter().zip(actual.iter()).for_each(|(&e, &a)| {
                assert!(((a - e) / e).abs() < 1e-4, "expect {}, get {}", e, a);
            });
            assert_abs_diff_eq!(found.objectness, 0.5);
        }
    }

    #[test]
    fn decode_yields_every_cell_and_anchor() {
        let anchors = anchor_set();
        let raw = Tensor::zeros(&[2, 13, 13, 3, 7], (Kind::Float, Device::Cpu));
        let decoded = anchors.decode(&raw, 0).unwrap();

        assert_eq!(decoded.iter(1).unwrap().count(), 13 * 13 * 3);
        // restartable
        assert_eq!(decoded.iter(1).unwrap().count(), 13 * 13 * 3);
        assert!(decoded.iter(2).is_err());

        let first = decoded.iter(0).unwrap().next().unwrap();
        assert_abs_diff_eq!(first.rect.cx(), 16.0);
        assert_abs_diff_eq!(first.rect.cy(), 16.0);
        assert_abs_diff_eq!(first.rect.w(), 116.0);
        assert_abs_diff_eq!(first.rect.h(), 90.0);

        assert!(anchors.decode(&raw, 1).is_err());
    }
}
