use crate::{
    common::*,
    unit::{OrigPixel, Pixel, SpaceTransform},
};
use tch::vision;

/// Aspect-preserving resize into the center of a square canvas.
///
/// It records the exact affine map between original and letterboxed pixels, so
/// boxes can be carried in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct Letterbox {
    #[getset(get_copy = "pub")]
    orig_size: OrigPixel<HW<usize>>,
    #[getset(get_copy = "pub")]
    input_size: usize,
    /// Size of the resized image inside the canvas.
    #[getset(get_copy = "pub")]
    resized_size: Pixel<HW<usize>>,
    #[getset(get_copy = "pub")]
    top: usize,
    #[getset(get_copy = "pub")]
    left: usize,
    #[getset(get_copy = "pub")]
    transform: Transform<R64>,
}

impl Letterbox {
    pub fn new(orig_size: OrigPixel<HW<usize>>, input_size: usize) -> Result<Self> {
        let [orig_h, orig_w] = orig_size.hw();
        ensure!(
            orig_h > 0 && orig_w > 0,
            "image size must be positive, but get {}x{}",
            orig_h,
            orig_w
        );
        ensure!(input_size > 0, "input_size must be positive");

        let scale = (input_size as f64 / orig_h as f64).min(input_size as f64 / orig_w as f64);
        let resized_h = ((orig_h as f64 * scale).round() as usize).clamp(1, input_size);
        let resized_w = ((orig_w as f64 * scale).round() as usize).clamp(1, input_size);
        let top = (input_size - resized_h) / 2;
        let left = (input_size - resized_w) / 2;

        let transform = {
            let src = TLBR::try_from_tlhw([0.0, 0.0, orig_h as f64, orig_w as f64])?;
            let tgt = TLBR::try_from_tlhw([
                top as f64,
                left as f64,
                resized_h as f64,
                resized_w as f64,
            ])?;
            Transform::try_from_rects(&src, &tgt)?
                .try_cast::<R64>()
                .ok_or_else(|| format_err!("non-finite letterbox transform"))?
        };

        Ok(Self {
            orig_size,
            input_size,
            resized_size: Pixel(HW::try_from_hw([resized_h, resized_w])?),
            top,
            left,
            transform,
        })
    }

    /// Carry a value from original image pixels into the letterboxed image.
    pub fn to_letterbox<T>(&self, value: &OrigPixel<T>) -> Result<Pixel<T>>
    where
        T: SpaceTransform,
    {
        Ok(Pixel(value.transformed(&self.transform)?))
    }

    /// Carry a value from the letterboxed image back to original image pixels.
    pub fn to_original<T>(&self, value: &Pixel<T>) -> Result<OrigPixel<T>>
    where
        T: SpaceTransform,
    {
        Ok(OrigPixel(value.transformed(&self.transform.inverse())?))
    }

    /// Resize a `[3, H, W]` uint8 image and paste it on a `fill_value` canvas.
    ///
    /// The output is a `[3, S, S]` float image in range `[0, 1]`.
    pub fn apply(&self, image: &Tensor, fill_value: f64) -> Result<Tensor> {
        let [orig_h, orig_w] = self.orig_size.hw();
        let [resized_h, resized_w] = self.resized_size.hw();
        let input_size = self.input_size as i64;

        tch::no_grad(|| -> Result<_> {
            let channels = match (image.kind(), image.size().as_slice()) {
                (Kind::Uint8, &[c, h, w]) if (h, w) == (orig_h as i64, orig_w as i64) => c,
                (kind, shape) => bail!(
                    "expect a uint8 image of shape [_, {}, {}], but get {:?} {:?}",
                    orig_h,
                    orig_w,
                    kind,
                    shape
                ),
            };

            let resized = vision::image::resize(image, resized_w as i64, resized_h as i64)?
                .to_kind(Kind::Float)
                / 255.0;
            let canvas = Tensor::full(
                &[channels, input_size, input_size],
                fill_value,
                (Kind::Float, image.device()),
            );
            canvas
                .narrow(1, self.top as i64, resized_h as i64)
                .narrow(2, self.left as i64, resized_w as i64)
                .copy_(&resized);

            Ok(canvas)
        })
    }
}
