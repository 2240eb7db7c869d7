use super::{loss::YoloLoss, misc::YoloPrediction};
use crate::common::*;

impl YoloLoss {
    /// Decode the predicted boxes and drop near-misses from the negative mask.
    ///
    /// A position leaves the mask when its decoded box overlaps any ground
    /// truth of the same image with IoU strictly above the ignore threshold.
    /// Returns the updated mask and the decoded boxes `(cx, cy, w, h)` in grid
    /// units with shape `[batch, anchors, grid_h, grid_w, 4]`. Nothing here is
    /// tracked by autograd.
    pub fn get_ignore(
        &self,
        scale_index: usize,
        prediction: &YoloPrediction,
        targets: &[Vec<RatioLabel>],
        scaled_anchors: &[HW<f64>],
        noobj_mask: Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let anchors_mask = self.anchors_mask(scale_index)?;
        let (batch_size, num_anchors, _, _) = prediction.grid_shape()?;
        ensure!(
            num_anchors == anchors_mask.len() as i64,
            "expect {} anchors in the prediction, but get {}",
            anchors_mask.len(),
            num_anchors
        );
        ensure!(
            targets.len() == batch_size as usize,
            "the prediction has batch size {}, but get ground truths of {} images",
            batch_size,
            targets.len()
        );
        ensure!(
            scaled_anchors.len() == self.anchors.len(),
            "expect {} scaled anchors, but get {}",
            self.anchors.len(),
            scaled_anchors.len()
        );
        ensure!(
            noobj_mask.size() == prediction.x.size(),
            "the negative mask shape {:?} does not match the prediction shape {:?}",
            noobj_mask.size(),
            prediction.x.size()
        );
        self.check_targets(targets)?;

        self.ignore_near_misses(scale_index, prediction, targets, scaled_anchors, noobj_mask)
    }

    /// The body of [YoloLoss::get_ignore] on inputs that were already checked.
    pub(crate) fn ignore_near_misses(
        &self,
        scale_index: usize,
        prediction: &YoloPrediction,
        targets: &[Vec<RatioLabel>],
        scaled_anchors: &[HW<f64>],
        noobj_mask: Tensor,
    ) -> Result<(Tensor, Tensor)> {
        tch::no_grad(|| -> Result<_> {
            let anchors_mask = self.anchors_mask(scale_index)?;
            let (batch_size, num_anchors, grid_h, grid_w) = prediction.grid_shape()?;

            let device = prediction.device();
            let kind = prediction.kind();
            let shape = [batch_size, num_anchors, grid_h, grid_w];

            let pred_boxes = {
                let grid_x = Tensor::arange(grid_w, (kind, device))
                    .view([1, 1, 1, grid_w])
                    .expand(&shape, false);
                let grid_y = Tensor::arange(grid_h, (kind, device))
                    .view([1, 1, grid_h, 1])
                    .expand(&shape, false);

                let (anchor_w, anchor_h): (Vec<f64>, Vec<f64>) = anchors_mask
                    .iter()
                    .map(|&index| {
                        let anchor = &scaled_anchors[index];
                        (anchor.w(), anchor.h())
                    })
                    .unzip();
                let anchor_w = Tensor::of_slice(&anchor_w)
                    .to_kind(kind)
                    .to_device(device)
                    .view([1, num_anchors, 1, 1])
                    .expand(&shape, false);
                let anchor_h = Tensor::of_slice(&anchor_h)
                    .to_kind(kind)
                    .to_device(device)
                    .view([1, num_anchors, 1, 1])
                    .expand(&shape, false);

                Tensor::stack(
                    &[
                        &prediction.x + grid_x,
                        &prediction.y + grid_y,
                        prediction.w.exp() * anchor_w,
                        prediction.h.exp() * anchor_h,
                    ],
                    -1,
                )
            };

            let noobj_mask = noobj_mask.copy();

            for (batch_index, labels) in targets.iter().enumerate() {
                if labels.is_empty() {
                    continue;
                }
                let batch_index = batch_index as i64;

                let gt_boxes: Vec<f64> = labels
                    .iter()
                    .flat_map(|label| {
                        let [cy, cx, h, w] = label.to_grid(grid_h, grid_w).rect().cycxhw();
                        [cx, cy, w, h]
                    })
                    .collect();
                let gt_boxes = Tensor::of_slice(&gt_boxes)
                    .view([labels.len() as i64, 4])
                    .to_kind(kind)
                    .to_device(device);
                let pred_boxes_of_image = pred_boxes.select(0, batch_index).view([-1, 4]);

                // [num_gt, anchors * grid_h * grid_w]
                let iou = calculate_iou(&gt_boxes, &pred_boxes_of_image)?;
                let max_iou = iou
                    .amax(&[0], false)
                    .view([num_anchors, grid_h, grid_w]);

                let _ = noobj_mask
                    .select(0, batch_index)
                    .masked_fill_(&max_iou.gt(self.ignore_threshold), 0.0);
            }

            Ok((noobj_mask, pred_boxes))
        })
    }
}
