use super::{CyCxHW, Rect, TLBR};
use crate::common::*;

/// Axis-aligned affine map `(y, x) -> (y * sy + ty, x * sx + tx)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    /// The map that sends `src` onto `tgt`.
    pub fn try_from_rects<R>(src: &R, tgt: &R) -> Result<Self>
    where
        R: Rect<Type = T>,
    {
        let zero = T::zero();
        ensure!(
            src.h() > zero && src.w() > zero,
            "source rectangle must have positive size"
        );
        let sy = tgt.h() / src.h();
        let sx = tgt.w() / src.w();
        let ty = tgt.t() - src.t() * sy;
        let tx = tgt.l() - src.l() * sx;

        Ok(Self { sy, sx, ty, tx })
    }

    /// Uniform scaling by `1 / size` on both axes.
    pub fn try_normalize(size: T) -> Result<Self> {
        ensure!(size > T::zero(), "normalizing size must be positive");
        let scale = T::one() / size;
        Ok(Self {
            sy: scale,
            sx: scale,
            ty: T::zero(),
            tx: T::zero(),
        })
    }

    /// Uniform scaling by `scale` on both axes.
    pub fn try_scale(scale: T) -> Result<Self> {
        ensure!(scale > T::zero(), "scaling factor must be positive");
        Ok(Self {
            sy: scale,
            sx: scale,
            ty: T::zero(),
            tx: T::zero(),
        })
    }
}

impl<T> Transform<T>
where
    T: Copy + Num + Neg<Output = T>,
{
    pub fn inverse(&self) -> Self {
        let sy = T::one() / self.sy;
        let sx = T::one() / self.sx;
        let ty = -self.ty / self.sy;
        let tx = -self.tx / self.sx;

        Self { sy, sx, ty, tx }
    }
}

impl<T> Transform<T> {
    pub fn try_cast<V>(self) -> Option<Transform<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(Transform {
            sy: V::from(self.sy)?,
            sx: V::from(self.sx)?,
            ty: V::from(self.ty)?,
            tx: V::from(self.tx)?,
        })
    }
}

impl<T> Mul<&TLBR<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = TLBR<T>;

    fn mul(self, rhs: &TLBR<T>) -> Self::Output {
        rhs.transform(self)
    }
}

impl<T> Mul<&CyCxHW<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = CyCxHW<T>;

    fn mul(self, rhs: &CyCxHW<T>) -> Self::Output {
        rhs.transform(self)
    }
}

/// Composition: `(lhs * rhs)` applies `rhs` first.
impl<T> Mul<&Transform<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = Transform<T>;

    fn mul(self, rhs: &Transform<T>) -> Self::Output {
        Transform {
            sx: self.sx * rhs.sx,
            sy: self.sy * rhs.sy,
            tx: rhs.tx * self.sx + self.tx,
            ty: rhs.ty * self.sy + self.ty,
        }
    }
}
