use crate::{anchor::AnchorSet, common::*};

/// Raw head outputs, one `[B, H, W, A, 5 + C]` tensor per scale.
///
/// Scales are ordered as in [`AnchorSet::scales`].
#[derive(Debug)]
pub struct YoloOutput {
    pub raw: Vec<Tensor>,
}

impl YoloOutput {
    pub fn batch_size(&self) -> Option<i64> {
        self.raw.first().and_then(|raw| raw.size().first().copied())
    }

    pub fn device(&self) -> Option<Device> {
        self.raw.first().map(|raw| raw.device())
    }

    /// Check every scale against the anchor layout.
    pub fn check_shape(&self, anchors: &AnchorSet, num_classes: usize) -> Result<()> {
        ensure!(
            self.raw.len() == anchors.num_scales(),
            "expect {} scales, but get {}",
            anchors.num_scales(),
            self.raw.len()
        );
        let batch_size = self.batch_size().unwrap_or(0);

        for (raw, scale) in self.raw.iter().zip(anchors.scales()) {
            let grid = scale.grid_size() as i64;
            let expect = vec![
                batch_size,
                grid,
                grid,
                scale.anchors().len() as i64,
                5 + num_classes as i64,
            ];
            ensure!(
                raw.size() == expect,
                "expect shape {:?} at stride {}, but get {:?}",
                expect,
                scale.stride(),
                raw.size()
            );
        }

        Ok(())
    }

    pub fn shallow_clone(&self) -> Self {
        Self {
            raw: self.raw.iter().map(|raw| raw.shallow_clone()).collect(),
        }
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            raw: self.raw.iter().map(|raw| raw.to_device(device)).collect(),
        }
    }
}
