use super::CyCxHW;
use crate::{common::*, HW};

/// Axis-aligned affine transform: scaling followed by translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num,
{
    /// Pure scaling with no translation.
    pub fn from_scale(sy: T, sx: T) -> Self {
        Self {
            sy,
            sx,
            ty: T::zero(),
            tx: T::zero(),
        }
    }

    /// Stretch a canvas of `src_size` onto a canvas of `tgt_size`.
    ///
    /// Both canvases are anchored at the origin, so no translation is involved.
    pub fn from_sizes_exact(src_size: &HW<T>, tgt_size: &HW<T>) -> Self
    where
        T: PartialOrd,
    {
        Self::from_scale(tgt_size.h() / src_size.h(), tgt_size.w() / src_size.w())
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
