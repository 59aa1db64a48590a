use crate::common::*;

/// Weighted loss terms of one scale. Every field is a scalar tensor and
/// `total_loss` is the sum of the three components.
#[derive(Debug, TensorLike)]
pub struct ScaleLossOutput {
    #[tensor_like(copy)]
    pub stride: usize,
    pub total_loss: Tensor,
    pub localization_loss: Tensor,
    pub objectness_loss: Tensor,
    pub classification_loss: Tensor,
}

/// The total loss, its weighted components and per-scale subtotals.
///
/// Each component already carries its configured weight, so `total_loss` equals
/// the sum of the three components.
#[derive(Debug)]
pub struct YoloLossOutput {
    pub total_loss: Tensor,
    pub localization_loss: Tensor,
    pub objectness_loss: Tensor,
    pub classification_loss: Tensor,
    pub scales: Vec<ScaleLossOutput>,
}

impl YoloLossOutput {
    pub fn shallow_clone(&self) -> Self {
        Self {
            total_loss: self.total_loss.shallow_clone(),
            localization_loss: self.localization_loss.shallow_clone(),
            objectness_loss: self.objectness_loss.shallow_clone(),
            classification_loss: self.classification_loss.shallow_clone(),
            scales: self.scales.iter().map(|scale| scale.shallow_clone()).collect(),
        }
    }

    /// Copy the values out for logging.
    pub fn to_record(&self) -> LossRecord {
        LossRecord {
            total: self.total_loss.double_value(&[]),
            localization: self.localization_loss.double_value(&[]),
            objectness: self.objectness_loss.double_value(&[]),
            classification: self.classification_loss.double_value(&[]),
            scales: self
                .scales
                .iter()
                .map(|scale| ScaleLossRecord {
                    stride: scale.stride,
                    total: scale.total_loss.double_value(&[]),
                    localization: scale.localization_loss.double_value(&[]),
                    objectness: scale.objectness_loss.double_value(&[]),
                    classification: scale.classification_loss.double_value(&[]),
                })
                .collect(),
        }
    }
}

/// Plain loss values of a training step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub total: f64,
    pub localization: f64,
    pub objectness: f64,
    pub classification: f64,
    pub scales: Vec<ScaleLossRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleLossRecord {
    pub stride: usize,
    pub total: f64,
    pub localization: f64,
    pub objectness: f64,
    pub classification: f64,
}
