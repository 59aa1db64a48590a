use crate::common::*;

/// Non-negative height and width of a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW<T> {
    pub(crate) h: T,
    pub(crate) w: T,
}

impl<T> HW<T> {
    pub fn try_cast<U>(self) -> Option<HW<U>>
    where
        T: ToPrimitive,
        U: NumCast,
    {
        Some(HW {
            h: U::from(self.h)?,
            w: U::from(self.w)?,
        })
    }
}

impl<T> HW<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_hw(hw: [T; 2]) -> Result<Self> {
        let [h, w] = hw;
        let zero = T::zero();
        ensure!(
            h >= zero && w >= zero,
            "height and width parameters must be non-negative"
        );
        Ok(Self { h, w })
    }

    pub fn area(&self) -> T {
        self.w * self.h
    }

    pub fn h(&self) -> T {
        self.h
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn hw(&self) -> [T; 2] {
        [self.h, self.w]
    }
}

impl<T> HW<T>
where
    T: Float,
{
    /// IoU of two rectangles placed on the same center.
    ///
    /// Only the shapes are compared. Returns zero when both areas are zero.
    pub fn shape_iou_with(&self, other: &Self) -> T {
        let inter = self.h.min(other.h) * self.w.min(other.w);
        let union = self.area() + other.area() - inter;
        if union > T::zero() {
            inter / union
        } else {
            T::zero()
        }
    }
}
