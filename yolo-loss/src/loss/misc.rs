use crate::common::*;

/// Prediction of one scale split into attribute channels.
///
/// Every tensor has the leading shape `[batch, anchors, grid_h, grid_w]`.
/// The offsets, objectness and class channels are activated with sigmoid,
/// while the size channels stay raw, as the network produced them.
#[derive(Debug, TensorLike, Getters)]
#[get = "pub"]
pub struct YoloPrediction {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
    pub(crate) w: Tensor,
    pub(crate) h: Tensor,
    pub(crate) conf: Tensor,
    /// Class probabilities in shape `[batch, anchors, grid_h, grid_w, num_classes]`.
    pub(crate) class: Tensor,
}

impl YoloPrediction {
    /// Split a raw `[batch, num_anchors * (5 + num_classes), grid_h, grid_w]` head output.
    pub fn from_raw(raw: &Tensor, num_anchors: i64, num_classes: i64) -> Result<Self> {
        let (batch_size, num_channels, grid_h, grid_w) = raw.size4()?;
        let num_attrs = 5 + num_classes;
        ensure!(
            num_channels == num_anchors * num_attrs,
            "expect {} channels for {} anchors and {} classes, but get {}",
            num_anchors * num_attrs,
            num_anchors,
            num_classes,
            num_channels
        );

        // [batch, anchor, grid_h, grid_w, attr]
        let prediction = raw
            .f_view([batch_size, num_anchors, num_attrs, grid_h, grid_w])?
            .permute(&[0, 1, 3, 4, 2])
            .contiguous();

        Ok(Self {
            x: prediction.select(4, 0).sigmoid(),
            y: prediction.select(4, 1).sigmoid(),
            w: prediction.select(4, 2),
            h: prediction.select(4, 3),
            conf: prediction.select(4, 4).sigmoid(),
            class: prediction.narrow(4, 5, num_classes).sigmoid(),
        })
    }

    pub fn device(&self) -> Device {
        self.x.device()
    }

    pub fn kind(&self) -> Kind {
        self.x.kind()
    }

    /// Returns `(batch_size, num_anchors, grid_h, grid_w)`.
    pub fn grid_shape(&self) -> Result<(i64, i64, i64, i64)> {
        Ok(self.x.size4()?)
    }
}

/// Training targets of one scale.
#[derive(Debug, TensorLike, Getters)]
#[get = "pub"]
pub struct YoloTargets {
    /// Per-position targets in shape `[batch, anchors, grid_h, grid_w, 5 + num_classes]`.
    ///
    /// The attributes are `(offset_x, offset_y, log_w, log_h, positive, one-hot classes..)`.
    pub(crate) y_true: Tensor,
    /// 1 where a position is penalized as background, in shape `[batch, anchors, grid_h, grid_w]`.
    pub(crate) noobj_mask: Tensor,
    /// Ground truth area relative to the grid, zero where nothing is assigned.
    pub(crate) box_loss_scale: Tensor,
}

impl YoloTargets {
    /// The positive flags in shape `[batch, anchors, grid_h, grid_w]`.
    pub fn positive(&self) -> Tensor {
        self.y_true.select(-1, 4)
    }

    pub fn num_positives(&self) -> i64 {
        self.positive().sum(Kind::Float).double_value(&[]) as i64
    }
}
