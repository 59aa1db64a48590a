//! The composite detection loss.

mod bce_with_logits_loss;
mod misc;
mod output;
mod yolo_loss;

pub use bce_with_logits_loss::*;
pub use misc::*;
pub use output::*;
pub use yolo_loss::*;
