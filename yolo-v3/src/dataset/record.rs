use crate::{
    common::*,
    unit::{OrigPixel, OrigPixelLabel},
};

/// The record with image path and boxes, but without image pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRecord {
    pub image_id: u64,
    pub path: PathBuf,
    pub size: OrigPixel<HW<usize>>,
    /// Bounding boxes in original image pixels.
    pub labels: Vec<OrigPixelLabel>,
}
