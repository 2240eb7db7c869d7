use crate::common::*;

/// The generic rectangle.
pub trait Rect {
    type Type;

    fn t(&self) -> Self::Type;
    fn l(&self) -> Self::Type;
    fn b(&self) -> Self::Type;
    fn r(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn h(&self) -> Self::Type;
    fn w(&self) -> Self::Type;

    fn try_from_cycxhw(cycxhw: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_cycxhw(cycxhw: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_cycxhw(cycxhw).unwrap()
    }

    fn cycxhw(&self) -> [Self::Type; 4] {
        [self.cy(), self.cx(), self.h(), self.w()]
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    /// Overlapping area, zero when the boxes are disjoint or only touch.
    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let inter_h = self.b().min(other.b()) - self.t().max(other.t());
        let inter_w = self.r().min(other.r()) - self.l().max(other.l());
        inter_h.max(zero) * inter_w.max(zero)
    }

    /// Compute the IoU score. The `epsilon` is added to the union area.
    fn iou_with<R>(&self, other: &R, epsilon: Self::Type) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let inter_area = self.intersection_area_with(other);
        let union_area = self.h() * self.w() + other.h() * other.w() - inter_area + epsilon;
        inter_area / union_area
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}
