//! Defines loss for training.

use super::{
    bce_loss::bce_loss,
    config::{DEFAULT_ANCHORS, DEFAULT_ANCHORS_MASK, DEFAULT_IGNORE_THRESHOLD},
    misc::{YoloPrediction, YoloTargets},
};
use crate::common::*;

pub use yolo_loss::*;
pub use yolo_loss_output::*;

/// The number of detection scales, coarse grid first.
pub const NUM_SCALES: usize = 3;

mod yolo_loss {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct YoloLossInit {
        /// Anchor sizes as `[width, height]` in input-image pixels.
        pub anchors: Option<Vec<[f64; 2]>>,
        pub anchors_mask: Option<Vec<Vec<usize>>>,
        pub num_classes: usize,
        /// Network input size as `[height, width]`.
        pub input_shape: [usize; 2],
        pub ignore_threshold: Option<f64>,
    }

    impl YoloLossInit {
        pub fn new(num_classes: usize, input_shape: [usize; 2]) -> Self {
            Self {
                anchors: None,
                anchors_mask: None,
                num_classes,
                input_shape,
                ignore_threshold: None,
            }
        }

        pub fn build(self) -> Result<YoloLoss> {
            let Self {
                anchors,
                anchors_mask,
                num_classes,
                input_shape: [input_h, input_w],
                ignore_threshold,
            } = self;

            let anchors = anchors.unwrap_or_else(|| DEFAULT_ANCHORS.to_vec());
            let anchors_mask = anchors_mask.unwrap_or_else(|| {
                DEFAULT_ANCHORS_MASK
                    .iter()
                    .map(|group| group.to_vec())
                    .collect()
            });
            let ignore_threshold = ignore_threshold.unwrap_or(DEFAULT_IGNORE_THRESHOLD);

            ensure!(num_classes >= 1, "num_classes must be at least 1");
            ensure!(
                input_h > 0 && input_w > 0,
                "input_shape must be positive, but get {:?}",
                [input_h, input_w]
            );
            ensure!(
                (0.0..=1.0).contains(&ignore_threshold),
                "ignore_threshold must be in range [0, 1], but get {}",
                ignore_threshold
            );
            ensure!(!anchors.is_empty(), "anchors must not be empty");

            let anchors: Vec<HW<f64>> = anchors
                .into_iter()
                .map(|[w, h]| {
                    ensure!(
                        w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0,
                        "anchor ({}, {}) must have positive width and height",
                        w,
                        h
                    );
                    HW::try_from_wh([w, h])
                })
                .collect::<Result<_>>()?;

            // the mask groups must partition the anchor indices
            ensure!(
                anchors_mask.len() == NUM_SCALES,
                "anchors_mask must have exactly {} groups, but get {}",
                NUM_SCALES,
                anchors_mask.len()
            );
            ensure!(
                anchors_mask.iter().all(|group| !group.is_empty()),
                "every group of anchors_mask must be non-empty"
            );
            {
                let mut visited = vec![false; anchors.len()];
                for &index in anchors_mask.iter().flatten() {
                    ensure!(
                        index < anchors.len(),
                        "anchor index {} is out of range of {} anchors",
                        index,
                        anchors.len()
                    );
                    ensure!(
                        !visited[index],
                        "anchor index {} appears more than once in anchors_mask",
                        index
                    );
                    visited[index] = true;
                }
                ensure!(
                    visited.iter().all(|&visited| visited),
                    "anchors_mask must cover all {} anchors",
                    anchors.len()
                );
            }

            info!(
                "build YOLO loss with {} anchors in {} scales, {} classes, input size {}x{}",
                anchors.len(),
                anchors_mask.len(),
                num_classes,
                input_h,
                input_w
            );

            Ok(YoloLoss {
                anchors,
                anchors_mask,
                num_classes,
                input_h,
                input_w,
                ignore_threshold,
            })
        }
    }

    /// Loss of one detection scale against per-image ground truth boxes.
    #[derive(Debug, Clone)]
    pub struct YoloLoss {
        pub(crate) anchors: Vec<HW<f64>>,
        pub(crate) anchors_mask: Vec<Vec<usize>>,
        pub(crate) num_classes: usize,
        pub(crate) input_h: usize,
        pub(crate) input_w: usize,
        pub(crate) ignore_threshold: f64,
    }

    impl YoloLoss {
        pub fn num_classes(&self) -> usize {
            self.num_classes
        }

        pub fn num_scales(&self) -> usize {
            self.anchors_mask.len()
        }

        /// The full anchor set in input-image pixels.
        pub fn anchors(&self) -> &[HW<f64>] {
            &self.anchors
        }

        /// The network input size as `[height, width]`.
        pub fn input_shape(&self) -> [usize; 2] {
            [self.input_h, self.input_w]
        }

        pub fn ignore_threshold(&self) -> f64 {
            self.ignore_threshold
        }

        /// The anchor indices used by the scale.
        pub fn anchors_mask(&self, scale_index: usize) -> Result<&[usize]> {
            let group = self.anchors_mask.get(scale_index).ok_or_else(|| {
                format_err!(
                    "scale index {} is out of range of {} scales",
                    scale_index,
                    self.anchors_mask.len()
                )
            })?;
            Ok(group)
        }

        /// The stride of a `grid_h` x `grid_w` feature map as `[stride_h, stride_w]`.
        pub fn strides(&self, grid_h: i64, grid_w: i64) -> [f64; 2] {
            [
                self.input_h as f64 / grid_h as f64,
                self.input_w as f64 / grid_w as f64,
            ]
        }

        /// The full anchor set measured in cells of a `grid_h` x `grid_w` feature map.
        pub fn scaled_anchors(&self, grid_h: i64, grid_w: i64) -> Vec<HW<f64>> {
            let [stride_h, stride_w] = self.strides(grid_h, grid_w);
            self.anchors
                .iter()
                .map(|anchor| anchor.scale_down(stride_h, stride_w))
                .collect()
        }

        pub(crate) fn check_targets(&self, targets: &[Vec<RatioLabel>]) -> Result<()> {
            targets.iter().flatten().try_for_each(|label| -> Result<()> {
                label.check_ratio_range()?;
                ensure!(
                    label.class < self.num_classes,
                    "the class id {} of box {:?} is out of range of {} classes",
                    label.class,
                    label.rect,
                    self.num_classes
                );
                Ok(())
            })
        }

        /// Compute the loss of one scale.
        ///
        /// The `prediction` is the raw head output in shape
        /// `[batch, anchors * (5 + num_classes), grid_h, grid_w]` and `targets`
        /// holds the normalized ground truth boxes of each image in the batch.
        ///
        /// Each ground truth is matched against the whole anchor set, and only
        /// the scale owning the best anchor makes it positive. The caller must
        /// evaluate every scale once per step so that each box is learned.
        pub fn forward(
            &self,
            scale_index: usize,
            prediction: &Tensor,
            targets: &[Vec<RatioLabel>],
        ) -> Result<(YoloLossOutput, YoloLossAuxiliary)> {
            let anchors_mask = self.anchors_mask(scale_index)?;
            let prediction = YoloPrediction::from_raw(
                prediction,
                anchors_mask.len() as i64,
                self.num_classes as i64,
            )?;
            let (batch_size, _num_anchors, grid_h, grid_w) = prediction.grid_shape()?;
            ensure!(
                grid_h > 0 && grid_w > 0,
                "the prediction grid must be non-empty, but get {}x{}",
                grid_h,
                grid_w
            );
            ensure!(
                targets.len() == batch_size as usize,
                "the prediction has batch size {}, but get ground truths of {} images",
                batch_size,
                targets.len()
            );

            self.check_targets(targets)?;

            let device = prediction.device();
            let kind = prediction.kind();
            let scaled_anchors = self.scaled_anchors(grid_h, grid_w);

            let (y_true, noobj_mask, box_loss_scale) = {
                let YoloTargets {
                    y_true,
                    noobj_mask,
                    box_loss_scale,
                } = self.assign_targets(scale_index, targets, &scaled_anchors, grid_h, grid_w)?;
                (
                    y_true.to_device(device).to_kind(kind),
                    noobj_mask.to_device(device).to_kind(kind),
                    box_loss_scale.to_device(device).to_kind(kind),
                )
            };
            let (noobj_mask, pred_boxes) = self.ignore_near_misses(
                scale_index,
                &prediction,
                targets,
                &scaled_anchors,
                noobj_mask,
            )?;

            let positive = y_true.select(-1, 4);
            let weight = (2.0 - &box_loss_scale) * &positive;

            let loss_x = (bce_loss(&prediction.x, &y_true.select(-1, 0)) * &weight).sum(kind);
            let loss_y = (bce_loss(&prediction.y, &y_true.select(-1, 1)) * &weight).sum(kind);
            let loss_w =
                (bce_loss(&prediction.w, &y_true.select(-1, 2)) * 0.5 * &weight).sum(kind);
            let loss_h =
                (bce_loss(&prediction.h, &y_true.select(-1, 3)) * 0.5 * &weight).sum(kind);

            let loss_conf = {
                let bce = bce_loss(&prediction.conf, &positive);
                (&bce * &positive).sum(kind) + (&bce * &noobj_mask).sum(kind)
            };

            let loss_cls = {
                let mask = positive
                    .eq(1.0)
                    .unsqueeze(-1)
                    .expand_as(&prediction.class);
                let pred_class = prediction.class.masked_select(&mask);
                let target_class = y_true
                    .narrow(-1, 5, self.num_classes as i64)
                    .masked_select(&mask);
                bce_loss(&pred_class, &target_class).sum(kind)
            };

            let total_loss = &loss_cls + &loss_x + &loss_y + &loss_h + &loss_w + &loss_conf;
            let num_pos = positive.sum(kind).clamp_min(1.0).detach();

            debug_assert!(
                !bool::from(total_loss.isnan().any()),
                "NaN detected in the loss of scale {}",
                scale_index
            );

            let output = YoloLossOutput {
                total_loss,
                num_pos,
                loss_x,
                loss_y,
                loss_w,
                loss_h,
                loss_conf,
                loss_cls,
            };
            let auxiliary = YoloLossAuxiliary {
                targets: YoloTargets {
                    y_true,
                    noobj_mask,
                    box_loss_scale,
                },
                pred_boxes,
            };

            Ok((output, auxiliary))
        }
    }
}

mod yolo_loss_output {
    use super::*;

    /// Loss terms of one scale, or of several scales added together.
    #[derive(Debug, TensorLike)]
    pub struct YoloLossOutput {
        /// The sum of every loss term. It carries the gradient.
        pub total_loss: Tensor,
        /// The number of positive positions, at least 1.
        pub num_pos: Tensor,
        pub loss_x: Tensor,
        pub loss_y: Tensor,
        pub loss_w: Tensor,
        pub loss_h: Tensor,
        pub loss_conf: Tensor,
        pub loss_cls: Tensor,
    }

    impl YoloLossOutput {
        /// The total loss divided by the positive count.
        pub fn normalized_loss(&self) -> Tensor {
            &self.total_loss / &self.num_pos
        }

        /// Add up the outputs of several scales, including the positive counts.
        pub fn sum_scales<T>(outputs: impl IntoIterator<Item = T>) -> Result<Self>
        where
            T: Borrow<Self>,
        {
            let outputs: Vec<T> = outputs.into_iter().collect();
            let sum = |field: fn(&Self) -> &Tensor| {
                Tensor::f_sum_tensors(outputs.iter().map(|output| field(output.borrow())))
            };

            Ok(Self {
                total_loss: sum(|output| &output.total_loss)?,
                num_pos: sum(|output| &output.num_pos)?,
                loss_x: sum(|output| &output.loss_x)?,
                loss_y: sum(|output| &output.loss_y)?,
                loss_w: sum(|output| &output.loss_w)?,
                loss_h: sum(|output| &output.loss_h)?,
                loss_conf: sum(|output| &output.loss_conf)?,
                loss_cls: sum(|output| &output.loss_cls)?,
            })
        }

        /// Named scalar values of every term for logging.
        pub fn components(&self) -> Vec<(&'static str, f64)> {
            vec![
                ("total_loss", f64::from(&self.total_loss)),
                ("num_pos", f64::from(&self.num_pos)),
                ("loss_x", f64::from(&self.loss_x)),
                ("loss_y", f64::from(&self.loss_y)),
                ("loss_w", f64::from(&self.loss_w)),
                ("loss_h", f64::from(&self.loss_h)),
                ("loss_conf", f64::from(&self.loss_conf)),
                ("loss_cls", f64::from(&self.loss_cls)),
            ]
        }
    }

    /// Intermediate results of a loss evaluation for diagnostics.
    #[derive(Debug, TensorLike)]
    pub struct YoloLossAuxiliary {
        /// Targets on the prediction's device, with near-misses removed from the negative mask.
        pub targets: YoloTargets,
        /// Decoded predicted boxes `(cx, cy, w, h)` in grid units, in shape `[batch, anchors, grid_h, grid_w, 4]`.
        pub pred_boxes: Tensor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_default() -> Result<()> {
        let yolo_loss = YoloLossInit::new(20, [416, 416]).build()?;
        assert_eq!(yolo_loss.anchors().len(), 9);
        assert_eq!(yolo_loss.anchors_mask(0)?, &[6, 7, 8]);
        assert_eq!(yolo_loss.anchors_mask(2)?, &[0, 1, 2]);
        assert!(yolo_loss.anchors_mask(3).is_err());

        let scaled = yolo_loss.scaled_anchors(13, 13);
        assert_eq!(scaled[8].w(), 373.0 / 32.0);
        assert_eq!(scaled[8].h(), 326.0 / 32.0);
        Ok(())
    }

    #[test]
    fn build_rejects_invalid_config() {
        assert!(YoloLossInit::new(0, [416, 416]).build().is_err());
        assert!(YoloLossInit::new(1, [0, 416]).build().is_err());

        let init = |anchors_mask: Vec<Vec<usize>>| YoloLossInit {
            anchors_mask: Some(anchors_mask),
            ..YoloLossInit::new(1, [416, 416])
        };
        // two groups
        assert!(init(vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7, 8]]).build().is_err());
        // duplicated index
        assert!(init(vec![vec![6, 7, 8], vec![3, 4, 5], vec![0, 1, 1]])
            .build()
            .is_err());
        // index out of range
        assert!(init(vec![vec![6, 7, 9], vec![3, 4, 5], vec![0, 1, 2]])
            .build()
            .is_err());
        // uncovered anchor
        assert!(init(vec![vec![6, 7], vec![3, 4, 5], vec![0, 1, 2]])
            .build()
            .is_err());
        // any order of a partition is fine
        assert!(init(vec![vec![0, 4, 8], vec![1, 3, 5], vec![2, 6, 7]])
            .build()
            .is_ok());

        let init = YoloLossInit {
            anchors: Some(vec![[10.0, 0.0], [1.0, 1.0], [2.0, 2.0]]),
            anchors_mask: Some(vec![vec![0], vec![1], vec![2]]),
            ..YoloLossInit::new(1, [416, 416])
        };
        assert!(init.build().is_err());

        let init = YoloLossInit {
            ignore_threshold: Some(1.5),
            ..YoloLossInit::new(1, [416, 416])
        };
        assert!(init.build().is_err());
    }

    #[test]
    fn ground_truths_are_checked_once_per_entry_point() -> Result<()> {
        let yolo_loss = YoloLossInit::new(1, [416, 416]).build()?;
        let scaled_anchors = yolo_loss.scaled_anchors(13, 13);
        let raw = Tensor::zeros(&[1, 18, 13, 13], (Kind::Float, Device::Cpu));
        let prediction = YoloPrediction::from_raw(&raw, 3, 1)?;
        let noobj_mask = || Tensor::ones(&[1, 3, 13, 13], (Kind::Float, Device::Cpu));

        // center outside the image
        let targets = vec![vec![RatioLabel::from_cxcywh([1.2, 0.5, 0.9, 0.8], 0)?]];

        assert!(yolo_loss.forward(0, &raw, &targets).is_err());
        assert!(yolo_loss
            .get_target(0, &targets, &scaled_anchors, 13, 13)
            .is_err());
        assert!(yolo_loss
            .get_ignore(0, &prediction, &targets, &scaled_anchors, noobj_mask())
            .is_err());

        // the bodies trust their caller
        let targets_ = yolo_loss.assign_targets(0, &targets, &scaled_anchors, 13, 13)?;
        assert_eq!(targets_.num_positives(), 1);
        yolo_loss.ignore_near_misses(0, &prediction, &targets, &scaled_anchors, noobj_mask())?;
        Ok(())
    }
}
