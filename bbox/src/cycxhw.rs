use super::Rect;
use crate::{common::*, Transform};

/// Bounding box in CyCxHW format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CyCxHW<T> {
    pub(crate) cy: T,
    pub(crate) cx: T,
    pub(crate) h: T,
    pub(crate) w: T,
}

impl<T> CyCxHW<T>
where
    T: Copy + Num,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        CyCxHW {
            cy: self.cy * transform.sy + transform.ty,
            cx: self.cx * transform.sx + transform.tx,
            h: self.h * transform.sy,
            w: self.w * transform.sx,
        }
    }

    /// Move the box center to the origin, keeping its size.
    pub fn centered_at_origin(&self) -> Self {
        CyCxHW {
            cy: T::zero(),
            cx: T::zero(),
            h: self.h,
            w: self.w,
        }
    }

    fn half_extent(&self) -> (T, T) {
        let two = T::one() + T::one();
        (self.h / two, self.w / two)
    }
}

impl<T> Rect for CyCxHW<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> T {
        self.cy - self.half_extent().0
    }

    fn l(&self) -> T {
        self.cx - self.half_extent().1
    }

    fn b(&self) -> T {
        self.cy + self.half_extent().0
    }

    fn r(&self) -> T {
        self.cx + self.half_extent().1
    }

    fn cy(&self) -> T {
        self.cy
    }

    fn cx(&self) -> T {
        self.cx
    }

    fn h(&self) -> T {
        self.h
    }

    fn w(&self) -> T {
        self.w
    }

    fn try_from_cycxhw([cy, cx, h, w]: [T; 4]) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            h >= zero && w >= zero,
            "box height and width must be non-negative"
        );
        Ok(Self { cy, cx, h, w })
    }
}
