//! Coordinate spaces.
//!
//! Every box in the pipeline carries one of four tags. Moving between spaces goes
//! through the named conversions below, each of which is a single affine
//! [`Transform`].

use crate::common::*;
use unit_wrapper::unit_wrapper;

unit_wrapper!(pub OrigPixel);
unit_wrapper!(pub Pixel);
unit_wrapper!(pub Ratio);
unit_wrapper!(pub Grid);

/// Box with a 0-based class index.
pub type RectLabel = Label<CyCxHW<R64>, usize>;

/// Label in original image pixels.
pub type OrigPixelLabel = OrigPixel<RectLabel>;
/// Label normalized to the letterboxed image.
pub type RatioLabel = Ratio<RectLabel>;

/// Values that can be carried through an axis-aligned affine map.
pub trait SpaceTransform: Sized {
    fn transformed(&self, transform: &Transform<R64>) -> Result<Self>;
}

impl SpaceTransform for CyCxHW<R64> {
    fn transformed(&self, transform: &Transform<R64>) -> Result<Self> {
        Ok(transform * self)
    }
}

impl SpaceTransform for CyCxHW<f64> {
    fn transformed(&self, transform: &Transform<R64>) -> Result<Self> {
        let transform: Transform<f64> = transform
            .try_cast()
            .ok_or_else(|| format_err!("unable to cast transform {:?}", transform))?;
        Ok(&transform * self)
    }
}

impl SpaceTransform for RectLabel {
    fn transformed(&self, transform: &Transform<R64>) -> Result<Self> {
        Ok(transform * self)
    }
}

impl<T> Pixel<T>
where
    T: SpaceTransform,
{
    pub fn to_ratio(&self, image_size: usize) -> Result<Ratio<T>> {
        let transform = Transform::try_normalize(r64(image_size as f64))?;
        Ok(Ratio(self.0.transformed(&transform)?))
    }

    pub fn to_grid(&self, stride: usize) -> Result<Grid<T>> {
        let transform = Transform::try_normalize(r64(stride as f64))?;
        Ok(Grid(self.0.transformed(&transform)?))
    }
}

impl<T> Ratio<T>
where
    T: SpaceTransform,
{
    pub fn to_pixel(&self, image_size: usize) -> Result<Pixel<T>> {
        let transform = Transform::try_scale(r64(image_size as f64))?;
        Ok(Pixel(self.0.transformed(&transform)?))
    }
}
