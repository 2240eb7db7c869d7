use crate::common::*;

/// Box size without position, e.g. an anchor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HW<T> {
    w: T,
    h: T,
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
        Ok(Self { w, h })
    }

    pub fn from_hw(hw: [T; 2]) -> Self {
        Self::try_from_hw(hw).unwrap()
    }

    /// Build from a `[width, height]` pair, the order anchors are usually written in.
    pub fn try_from_wh(wh: [T; 2]) -> Result<Self> {
        let [w, h] = wh;
        Self::try_from_hw([h, w])
    }

    /// Divide the height and width by per-axis factors.
    pub fn scale_down(&self, div_h: T, div_w: T) -> Self {
        Self {
            h: self.h / div_h,
            w: self.w / div_w,
        }
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn h(&self) -> T {
        self.h
    }
}
