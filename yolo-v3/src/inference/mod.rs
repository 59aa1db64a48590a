//! Decoding raw outputs into final detections.

mod detection;
mod nms;
mod yolo_inference;

pub use detection::*;
pub use nms::*;
pub use yolo_inference::*;
