//! Detection head and the backbone contract.

mod head;
mod output;

pub use head::*;
pub use output::*;

use crate::common::*;

/// A feature extractor producing one feature map per detection scale.
pub trait Backbone: Debug {
    /// Map `[B, 3, S, S]` images to feature maps `[B, C_i, S / stride_i, S / stride_i]`,
    /// ordered by descending stride.
    fn forward_t(&self, images: &Tensor, train: bool) -> Result<Vec<Tensor>>;
}

/// A backbone followed by the detection head.
#[derive(Debug)]
pub struct YoloModel<B>
where
    B: Backbone,
{
    backbone: B,
    head: YoloHead,
}

impl<B> YoloModel<B>
where
    B: Backbone,
{
    pub fn new(backbone: B, head: YoloHead) -> Self {
        Self { backbone, head }
    }

    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    pub fn head(&self) -> &YoloHead {
        &self.head
    }

    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<YoloOutput> {
        let features = self.backbone.forward_t(images, train)?;
        self.head.forward(&features)
    }
}
