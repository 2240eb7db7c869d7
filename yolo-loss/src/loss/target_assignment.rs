use super::{loss::YoloLoss, misc::YoloTargets};
use crate::common::*;

impl YoloLoss {
    /// Build the training targets of one scale.
    ///
    /// `scaled_anchors` is the full anchor set in grid units of this scale.
    /// Each ground truth is matched by shape IoU against the full set. If the
    /// best anchor belongs to this scale, the grid cell holding the box center
    /// with that anchor becomes positive. Otherwise the box is left to the
    /// scale owning the anchor. When two boxes land on the same position, the
    /// later one overwrites the box attributes and adds its class bit.
    ///
    /// The returned tensors are built on CPU without gradient tracking.
    pub fn get_target(
        &self,
        scale_index: usize,
        targets: &[Vec<RatioLabel>],
        scaled_anchors: &[HW<f64>],
        grid_h: i64,
        grid_w: i64,
    ) -> Result<YoloTargets> {
        self.anchors_mask(scale_index)?;
        ensure!(
            scaled_anchors.len() == self.anchors.len(),
            "expect {} scaled anchors, but get {}",
            self.anchors.len(),
            scaled_anchors.len()
        );
        ensure!(
            grid_h > 0 && grid_w > 0,
            "grid size must be positive, but get {}x{}",
            grid_h,
            grid_w
        );
        self.check_targets(targets)?;

        self.assign_targets(scale_index, targets, scaled_anchors, grid_h, grid_w)
    }

    /// The body of [YoloLoss::get_target] on inputs that were already checked.
    pub(crate) fn assign_targets(
        &self,
        scale_index: usize,
        targets: &[Vec<RatioLabel>],
        scaled_anchors: &[HW<f64>],
        grid_h: i64,
        grid_w: i64,
    ) -> Result<YoloTargets> {
        let anchors_mask = self.anchors_mask(scale_index)?;
        let batch_size = targets.len();
        let num_anchors = anchors_mask.len();
        let num_attrs = 5 + self.num_classes;
        let (grid_h_usize, grid_w_usize) = (grid_h as usize, grid_w as usize);
        let num_positions = batch_size * num_anchors * grid_h_usize * grid_w_usize;

        let mut y_true = vec![0f32; num_positions * num_attrs];
        let mut noobj_mask = vec![1f32; num_positions];
        let mut box_loss_scale = vec![0f32; num_positions];
        let position_index = |batch_index: usize, anchor_index: usize, row: usize, col: usize| {
            ((batch_index * num_anchors + anchor_index) * grid_h_usize + row) * grid_w_usize + col
        };

        // zero-centered anchor shapes
        let anchor_shapes: Vec<CyCxHW<f64>> = scaled_anchors
            .iter()
            .map(|anchor| CyCxHW::from_cycxhw([0.0, 0.0, anchor.h(), anchor.w()]))
            .collect();
        let anchor_shapes = CyCxHWTensor::from_bboxes(&anchor_shapes, Device::Cpu);

        let mut num_assigned = 0;

        for (batch_index, labels) in targets.iter().enumerate() {
            if labels.is_empty() {
                continue;
            }

            let grid_labels: Vec<GridLabel> = labels
                .iter()
                .map(|label| label.to_grid(grid_h, grid_w))
                .collect();
            let best_anchors: Vec<i64> = {
                let gt_shapes: Vec<CyCxHW<f64>> = grid_labels
                    .iter()
                    .map(|label| label.rect().centered_at_origin())
                    .collect();
                let gt_shapes = CyCxHWTensor::from_bboxes(&gt_shapes, Device::Cpu);
                let shape_iou = gt_shapes.pairwise_iou_with(&anchor_shapes);
                Vec::<i64>::from(&shape_iou.argmax(1, false))
            };

            for (label, best_anchor) in izip!(&grid_labels, best_anchors) {
                let anchor_index = match anchors_mask
                    .iter()
                    .position(|&index| index as i64 == best_anchor)
                {
                    Some(anchor_index) => anchor_index,
                    None => continue,
                };
                let anchor = &scaled_anchors[best_anchor as usize];

                let [gy, gx, gh, gw] = label.rect().cycxhw();
                if gh < 1e-3 || gw < 1e-3 {
                    warn!(
                        "the box {:?} is too small on the {}x{} grid",
                        label.rect(),
                        grid_h,
                        grid_w
                    );
                }

                // a center on the far edge stays in the last cell
                let col = (gx.floor() as usize).min(grid_w_usize - 1);
                let row = (gy.floor() as usize).min(grid_h_usize - 1);
                let position = position_index(batch_index, anchor_index, row, col);

                noobj_mask[position] = 0.0;
                box_loss_scale[position] = (gw * gh / grid_w as f64 / grid_h as f64) as f32;

                let attrs = &mut y_true[(position * num_attrs)..((position + 1) * num_attrs)];
                attrs[0] = (gx - col as f64) as f32;
                attrs[1] = (gy - row as f64) as f32;
                attrs[2] = (gw / anchor.w()).ln() as f32;
                attrs[3] = (gh / anchor.h()).ln() as f32;
                attrs[4] = 1.0;
                attrs[5 + label.class()] = 1.0;

                num_assigned += 1;
            }
        }

        debug!(
            "scale {} ({}x{}): {} of {} boxes assigned",
            scale_index,
            grid_h,
            grid_w,
            num_assigned,
            targets.iter().map(|labels| labels.len()).sum::<usize>()
        );

        let shape = [
            batch_size as i64,
            num_anchors as i64,
            grid_h,
            grid_w,
        ];
        let y_true = Tensor::of_slice(&y_true).view([
            shape[0],
            shape[1],
            shape[2],
            shape[3],
            num_attrs as i64,
        ]);
        let noobj_mask = Tensor::of_slice(&noobj_mask).view(shape);
        let box_loss_scale = Tensor::of_slice(&box_loss_scale).view(shape);

        Ok(YoloTargets {
            y_true,
            noobj_mask,
            box_loss_scale,
        })
    }
}
