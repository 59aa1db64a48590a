use super::FileRecord;
use crate::common::*;
use tch::vision;

/// Source of decoded image pixels.
pub trait ImageLoader: Debug {
    /// Load a `[3, H, W]` uint8 image of the record.
    fn load(&self, record: &FileRecord) -> Result<Tensor>;
}

/// Reads images from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load(&self, record: &FileRecord) -> Result<Tensor> {
        let image = vision::image::load(&record.path)
            .with_context(|| format!("unable to load image '{}'", record.path.display()))?;
        let image = to_rgb(&image)?;

        let [orig_h, orig_w] = record.size.hw();
        let (_, height, width) = image.size3()?;
        ensure!(
            (height, width) == (orig_h as i64, orig_w as i64),
            "image '{}' has size {}x{}, but the annotation says {}x{}",
            record.path.display(),
            height,
            width,
            orig_h,
            orig_w
        );

        Ok(image)
    }
}

/// Expand grayscale and drop alpha so that every image has 3 channels.
pub fn to_rgb(image: &Tensor) -> Result<Tensor> {
    let image = match image.size().as_slice() {
        &[1, _, _] => image.repeat(&[3, 1, 1]),
        &[3, _, _] => image.shallow_clone(),
        &[4, _, _] => image.narrow(0, 0, 3),
        shape => bail!("unsupported image shape {:?}", shape),
    };
    Ok(image)
}
