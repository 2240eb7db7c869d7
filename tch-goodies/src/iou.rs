//! Pairwise IoU between two sets of center-size boxes.

use crate::{common::*, compound_tensor::CyCxHWTensor};

/// Compute the `[A, B]` IoU matrix of `boxes_a` (`[A, 4]`) against `boxes_b` (`[B, 4]`).
///
/// Both inputs are laid out as `(cx, cy, w, h)` per row. The intersection
/// is clamped at zero for disjoint pairs. The union is used as is, so two
/// zero-area boxes produce NaN; callers must keep degenerate boxes out.
pub fn calculate_iou(boxes_a: &Tensor, boxes_b: &Tensor) -> Result<Tensor> {
    ensure!(
        boxes_a.device() == boxes_b.device(),
        "box tensors must be on the same device"
    );
    let boxes_a = CyCxHWTensor::from_cxcywh(boxes_a)?;
    let boxes_b = CyCxHWTensor::from_cxcywh(boxes_b)?;
    Ok(boxes_a.pairwise_iou_with(&boxes_b))
}
