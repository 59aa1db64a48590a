use super::YoloOutput;
use crate::{anchor::AnchorSet, common::*};
use tch::nn::Module as _;

#[derive(Debug, Clone)]
pub struct YoloHeadInit {
    pub num_classes: usize,
    pub anchors_per_scale: usize,
    /// Channels of each input feature map, ordered by descending stride.
    pub in_channels: Vec<usize>,
}

impl YoloHeadInit {
    pub fn from_anchor_set(anchors: &AnchorSet, num_classes: usize, in_channels: Vec<usize>) -> Self {
        Self {
            num_classes,
            anchors_per_scale: anchors.anchors_per_scale(),
            in_channels,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<YoloHead>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            num_classes,
            anchors_per_scale,
            in_channels,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(anchors_per_scale > 0, "anchors_per_scale must be positive");
        ensure!(!in_channels.is_empty(), "at least one input feature is required");
        ensure!(
            in_channels.iter().all(|&channels| channels > 0),
            "input channels must be positive"
        );

        let num_entries = num_classes + 5;
        let convs = in_channels
            .iter()
            .enumerate()
            .map(|(index, &channels)| {
                nn::conv2d(
                    path / format!("pred_{}", index),
                    channels as i64,
                    (anchors_per_scale * num_entries) as i64,
                    1,
                    Default::default(),
                )
            })
            .collect();

        Ok(YoloHead {
            num_anchors: anchors_per_scale as i64,
            num_entries: num_entries as i64,
            convs,
        })
    }
}

/// One 1x1 prediction convolution per scale.
#[derive(Debug)]
pub struct YoloHead {
    num_anchors: i64,
    num_entries: i64,
    convs: Vec<nn::Conv2D>,
}

impl YoloHead {
    pub fn num_scales(&self) -> usize {
        self.convs.len()
    }

    /// Map feature maps to raw outputs `[B, H, W, A, 5 + C]`.
    ///
    /// The conv channel `a * (5 + C) + e` becomes entry `e` of anchor `a`.
    pub fn forward(&self, features: &[Tensor]) -> Result<YoloOutput> {
        let Self {
            num_anchors,
            num_entries,
            ref convs,
        } = *self;
        ensure!(
            features.len() == convs.len(),
            "expect {} feature maps, but get {}",
            convs.len(),
            features.len()
        );

        let raw = features
            .iter()
            .zip(convs)
            .map(|(feature, conv)| -> Result<_> {
                let (batch_size, _channels, height, width) = feature.size4()?;
                let output = conv
                    .forward(feature)
                    .view([batch_size, num_anchors, num_entries, height, width])
                    .permute(&[0, 3, 4, 1, 2])
                    .contiguous();
                Ok(output)
            })
            .try_collect()?;

        Ok(YoloOutput { raw })
    }
}
