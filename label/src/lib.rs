//! Bounding boxes paired with class labels.

use anyhow::{ensure, Result};
use bbox::{prelude::*, CyCxHW, Transform, HW};

/// A rectangle with a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

/// Ground truth box normalized to `[0, 1]` by the image size.
pub type RatioLabel = Label<CyCxHW<f64>, usize>;

/// Ground truth box measured in grid cells of one detection scale.
///
/// Only [RatioLabel::to_grid] produces it, so grid units cannot be passed
/// where normalized labels are expected.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLabel {
    rect: CyCxHW<f64>,
    class: usize,
}

impl GridLabel {
    pub fn rect(&self) -> &CyCxHW<f64> {
        &self.rect
    }

    pub fn class(&self) -> usize {
        self.class
    }
}

impl RatioLabel {
    /// Build a label from a `(cx, cy, w, h)` tuple normalized to the image size.
    pub fn from_cxcywh(cxcywh: [f64; 4], class: usize) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let rect = CyCxHW::try_from_cycxhw([cy, cx, h, w])?;
        Ok(Self { rect, class })
    }

    /// Reject boxes the loss cannot use: non-positive size or a center outside the image.
    pub fn check_ratio_range(&self) -> Result<()> {
        let [cy, cx, h, w] = self.rect.cycxhw();
        ensure!(
            h > 0.0 && w > 0.0,
            "the box {:?} must have positive height and width",
            self
        );
        ensure!(
            (0.0..=1.0).contains(&cy) && (0.0..=1.0).contains(&cx),
            "the center of box {:?} must lie in range [0, 1]",
            self
        );
        Ok(())
    }

    /// Convert to grid units of a `grid_h` x `grid_w` feature map.
    pub fn to_grid(&self, grid_h: i64, grid_w: i64) -> GridLabel {
        let transform = Transform::from_sizes_exact(
            &HW::from_hw([1.0, 1.0]),
            &HW::from_hw([grid_h as f64, grid_w as f64]),
        );
        GridLabel {
            rect: &transform * &self.rect,
            class: self.class,
        }
    }
}
