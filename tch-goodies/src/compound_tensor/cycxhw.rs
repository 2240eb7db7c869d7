use super::tlbr::TLBRTensor;
use crate::common::*;
use bbox::{prelude::*, CyCxHW};

/// Checked tensor of batched box parameters in CyCxHW format.
#[derive(Debug, TensorLike, Getters)]
pub struct CyCxHWTensor {
    /// The center y parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cy: Tensor,
    /// The center x parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) cx: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) h: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    #[get = "pub"]
    pub(crate) w: Tensor,
}

/// Unchecked tensor of batched box parameters in CyCxHW format.
#[derive(Debug, TensorLike)]
pub struct CyCxHWTensorUnchecked {
    /// The center y parameter in shape `[batch, 1]`.
    pub cy: Tensor,
    /// The center x parameter in shape `[batch, 1]`.
    pub cx: Tensor,
    /// The height parameter in shape `[batch, 1]`.
    pub h: Tensor,
    /// The width parameter in shape `[batch, 1]`.
    pub w: Tensor,
}

impl CyCxHWTensor {
    /// Split a `[batch, 4]` tensor laid out as `(cx, cy, w, h)` per row.
    pub fn from_cxcywh(boxes: &Tensor) -> Result<Self> {
        let (_, num_params) = boxes.size2()?;
        ensure!(
            num_params == 4,
            "expect a [batch, 4] box tensor, but get shape {:?}",
            boxes.size()
        );

        CyCxHWTensorUnchecked {
            cx: boxes.narrow(1, 0, 1),
            cy: boxes.narrow(1, 1, 1),
            w: boxes.narrow(1, 2, 1),
            h: boxes.narrow(1, 3, 1),
        }
        .try_into()
    }

    /// Collect scalar boxes into a tensor on `device`.
    pub fn from_bboxes<'a>(
        bboxes: impl IntoIterator<Item = &'a CyCxHW<f64>>,
        device: Device,
    ) -> Self {
        let (cy, cx, h, w) = bboxes
            .into_iter()
            .map(|bbox| {
                let [cy, cx, h, w] = bbox.cycxhw();
                (cy as f32, cx as f32, h as f32, w as f32)
            })
            .unzip_n_vec();

        let param = |values: &[f32]| {
            Tensor::of_slice(values)
                .view([values.len() as i64, 1])
                .to_device(device)
        };

        Self {
            cy: param(&cy),
            cx: param(&cx),
            h: param(&h),
            w: param(&w),
        }
    }

    /// Compute the IoU score of every pair of boxes, in shape `[self, other]`.
    pub fn pairwise_iou_with(&self, other: &Self) -> Tensor {
        TLBRTensor::from(self).pairwise_iou_with(&TLBRTensor::from(other))
    }
}

impl TryFrom<CyCxHWTensorUnchecked> for CyCxHWTensor {
    type Error = Error;

    fn try_from(from: CyCxHWTensorUnchecked) -> Result<Self, Self::Error> {
        let CyCxHWTensorUnchecked { cy, cx, h, w } = from;
        match (cy.size2()?, cx.size2()?, h.size2()?, w.size2()?) {
            ((cy_len, 1), (cx_len, 1), (h_len, 1), (w_len, 1)) => ensure!(
                cy_len == cx_len && cy_len == h_len && cy_len == w_len,
                "size mismatch"
            ),
            _ => bail!("size mismatch"),
        };
        ensure!(
            hashset! {
                cy.device(),
                cx.device(),
                h.device(),
                w.device(),
            }
            .len()
                == 1,
            "device mismatch"
        );
        Ok(Self { cy, cx, h, w })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn from_cxcywh_layout() -> Result<()> {
        let boxes = Tensor::of_slice(&[1.0f32, 2.0, 3.0, 4.0]).view([1, 4]);
        let cycxhw = CyCxHWTensor::from_cxcywh(&boxes)?;
        assert_abs_diff_eq!(f64::from(cycxhw.cx()), 1.0);
        assert_abs_diff_eq!(f64::from(cycxhw.cy()), 2.0);
        assert_abs_diff_eq!(f64::from(cycxhw.w()), 3.0);
        assert_abs_diff_eq!(f64::from(cycxhw.h()), 4.0);
        Ok(())
    }

    #[test]
    fn scalar_boxes_become_columns() {
        let bboxes = [
            CyCxHW::from_cycxhw([3.0, 5.0, 2.0, 4.0]),
            CyCxHW::from_cycxhw([0.0, 0.0, 1.0, 0.5]),
        ];
        let cycxhw = CyCxHWTensor::from_bboxes(&bboxes, Device::Cpu);
        assert_eq!(cycxhw.cy().size(), vec![2, 1]);
        assert_eq!(Vec::<f32>::from(&cycxhw.cx().view([-1])), vec![5.0, 0.0]);
        assert_eq!(Vec::<f32>::from(&cycxhw.w().view([-1])), vec![4.0, 0.5]);

        let empty = CyCxHWTensor::from_bboxes(&[], Device::Cpu);
        assert_eq!(empty.h().size(), vec![0, 1]);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let boxes = Tensor::zeros(&[2, 5], (Kind::Float, Device::Cpu));
        assert!(CyCxHWTensor::from_cxcywh(&boxes).is_err());
    }
}
