//! Dataset loading and batch generation.

mod coco;
mod generator;
mod image;
mod letterbox;
mod record;

pub use coco::*;
pub use generator::*;
pub use image::*;
pub use letterbox::*;
pub use record::*;

pub use crate::target::YoloTarget;
