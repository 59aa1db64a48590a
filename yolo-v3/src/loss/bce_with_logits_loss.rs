use crate::common::*;

#[derive(Debug)]
pub struct BceWithLogitsLossInit {
    pub reduction: Reduction,
}

impl BceWithLogitsLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn build(self) -> BceWithLogitsLoss {
        let Self { reduction } = self;
        BceWithLogitsLoss { reduction }
    }
}

/// Binary cross entropy on logits, element-wise unless reduced.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );
        debug_assert!(
            bool::from(target.ge(0.0).logical_and(&target.le(1.0)).all()),
            "target values must be in range of [0.0, 1.0]"
        );

        input.binary_cross_entropy_with_logits::<Tensor>(target, None, None, self.reduction)
    }
}
