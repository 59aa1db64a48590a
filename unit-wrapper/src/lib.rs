//! Newtype tags that pin a value to one coordinate space.
//!
//! A value wrapped by a tag can only be moved into another space by an explicit
//! conversion function, so mixing pixel, normalized and grid coordinates becomes a
//! type error instead of a silent bug.

/// Declares a transparent newtype wrapper `$name<T>`.
///
/// The generated type supports arithmetic between wrappers of the same tag, and
/// [`map`](#method.map)-style helpers to rewrap the inner value in the same space.
#[macro_export]
macro_rules! unit_wrapper {
    ($name:ident) => { $crate::unit_wrapper!(() $name); };
    (pub $name:ident) => { $crate::unit_wrapper!((pub) $name); };
    (($($vis:tt)*) $name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $($vis)* struct $name<T>(pub T);

        impl<T> $name<T> {
            /// Unwrap the value, leaving the coordinate space.
            pub fn into_inner(self) -> T {
                self.0
            }

            /// Borrow the value without leaving the coordinate space.
            pub fn as_inner(&self) -> &T {
                &self.0
            }

            /// Transform the inner value while staying in the same space.
            pub fn map<U, F>(self, f: F) -> $name<U>
            where
                F: FnOnce(T) -> U,
            {
                $name(f(self.0))
            }

            pub fn as_ref(&self) -> $name<&T> {
                $name(&self.0)
            }
        }

        impl<T> From<T> for $name<T> {
            fn from(value: T) -> Self {
                Self(value)
            }
        }

        impl<T> std::ops::Deref for $name<T> {
            type Target = T;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<T> std::ops::DerefMut for $name<T> {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl<L, R> std::ops::Add<$name<R>> for $name<L>
        where
            L: std::ops::Add<R>,
        {
            type Output = $name<<L as std::ops::Add<R>>::Output>;

            fn add(self, rhs: $name<R>) -> Self::Output {
                $name(self.0 + rhs.0)
            }
        }

        impl<L, R> std::ops::Sub<$name<R>> for $name<L>
        where
            L: std::ops::Sub<R>,
        {
            type Output = $name<<L as std::ops::Sub<R>>::Output>;

            fn sub(self, rhs: $name<R>) -> Self::Output {
                $name(self.0 - rhs.0)
            }
        }

        impl<L, R> std::ops::Mul<$name<R>> for $name<L>
        where
            L: std::ops::Mul<R>,
        {
            type Output = $name<<L as std::ops::Mul<R>>::Output>;

            fn mul(self, rhs: $name<R>) -> Self::Output {
                $name(self.0 * rhs.0)
            }
        }

        impl<L, R> std::ops::Div<$name<R>> for $name<L>
        where
            L: std::ops::Div<R>,
        {
            type Output = $name<<L as std::ops::Div<R>>::Output>;

            fn div(self, rhs: $name<R>) -> Self::Output {
                $name(self.0 / rhs.0)
            }
        }
    };
}
