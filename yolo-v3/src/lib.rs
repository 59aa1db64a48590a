//! YOLOv3 detector core: anchor codec, targets, data pipeline, loss and inference.

pub mod anchor;
mod common;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod loss;
pub mod model;
pub mod target;
pub mod unit;
