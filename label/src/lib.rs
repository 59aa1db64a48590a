//! Class-labeled boxes and the class dictionary.

mod class_map;
pub use class_map::*;

use bbox::{CyCxHW, Rect, Transform, TLBR};
use num_traits::Num;
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A rectangle tagged with a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

impl<R, C> Label<R, C>
where
    R: Rect,
{
    /// Replace the rectangle and keep the class.
    pub fn with_rect<S>(&self, rect: S) -> Label<S, C>
    where
        S: Rect,
        C: Copy,
    {
        Label {
            rect,
            class: self.class,
        }
    }
}

impl<'a, T, C> Mul<&'a Label<TLBR<T>, C>> for &'a Transform<T>
where
    T: Copy + Num + PartialOrd,
    C: Copy,
{
    type Output = Label<TLBR<T>, C>;

    fn mul(self, rhs: &'a Label<TLBR<T>, C>) -> Self::Output {
        rhs.with_rect(self * &rhs.rect)
    }
}

impl<'a, T, C> Mul<&'a Label<CyCxHW<T>, C>> for &'a Transform<T>
where
    T: Copy + Num + PartialOrd,
    C: Copy,
{
    type Output = Label<CyCxHW<T>, C>;

    fn mul(self, rhs: &'a Label<CyCxHW<T>, C>) -> Self::Output {
        rhs.with_rect(self * &rhs.rect)
    }
}
