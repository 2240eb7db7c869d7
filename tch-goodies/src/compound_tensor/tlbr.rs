use super::cycxhw::CyCxHWTensor;
use crate::common::*;

/// Box edges in shape `[batch, 1]` each, derived from a [CyCxHWTensor].
#[derive(Debug)]
pub(crate) struct TLBRTensor {
    pub(crate) t: Tensor,
    pub(crate) l: Tensor,
    pub(crate) b: Tensor,
    pub(crate) r: Tensor,
}

impl TLBRTensor {
    fn num_samples(&self) -> i64 {
        self.t.size()[0]
    }

    /// Box areas as `(b - t) * (r - l)`, in shape `[batch, 1]`.
    fn area(&self) -> Tensor {
        (&self.b - &self.t) * (&self.r - &self.l)
    }

    /// Compute the intersection area of every pair of boxes.
    ///
    /// The output has shape `[self.num_samples(), other.num_samples()]`.
    /// Disjoint pairs get zero area.
    pub(crate) fn pairwise_intersect_area_with(&self, other: &Self) -> Tensor {
        let shape = [self.num_samples(), other.num_samples()];
        // lhs parameters go along rows, rhs parameters along columns
        let rows = |param: &Tensor| param.expand(&shape, false);
        let cols = |param: &Tensor| param.permute(&[1, 0]).expand(&shape, false);

        let inner_h = (rows(&self.b).minimum(&cols(&other.b))
            - rows(&self.t).maximum(&cols(&other.t)))
        .clamp_min(0.0);
        let inner_w = (rows(&self.r).minimum(&cols(&other.r))
            - rows(&self.l).maximum(&cols(&other.l)))
        .clamp_min(0.0);

        inner_h * inner_w
    }

    /// Compute the IoU score of every pair of boxes.
    ///
    /// The output has shape `[self.num_samples(), other.num_samples()]`. The
    /// union is not padded with an epsilon, so a pair of zero-area boxes
    /// yields NaN.
    pub(crate) fn pairwise_iou_with(&self, other: &Self) -> Tensor {
        let shape = [self.num_samples(), other.num_samples()];
        let inter_area = self.pairwise_intersect_area_with(other);
        let union_area = self.area().expand(&shape, false)
            + other.area().permute(&[1, 0]).expand(&shape, false)
            - &inter_area;
        inter_area / union_area
    }
}

impl From<&CyCxHWTensor> for TLBRTensor {
    fn from(from: &CyCxHWTensor) -> Self {
        let half_h = from.h() / 2.0;
        let half_w = from.w() / 2.0;
        Self {
            t: from.cy() - &half_h,
            l: from.cx() - &half_w,
            b: from.cy() + &half_h,
            r: from.cx() + &half_w,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Boxes given as `(cx, cy, w, h)` rows.
    fn tlbr(boxes: &[[f32; 4]]) -> Result<TLBRTensor> {
        let flat: Vec<f32> = boxes.iter().flatten().cloned().collect();
        let cycxhw = CyCxHWTensor::from_cxcywh(&Tensor::of_slice(&flat).view([-1, 4]))?;
        Ok(TLBRTensor::from(&cycxhw))
    }

    #[test]
    fn edges_from_center_size() -> Result<()> {
        let tlbr = tlbr(&[[5.0, 3.0, 4.0, 2.0]])?;
        assert_eq!(f64::from(&tlbr.t), 2.0);
        assert_eq!(f64::from(&tlbr.l), 3.0);
        assert_eq!(f64::from(&tlbr.b), 4.0);
        assert_eq!(f64::from(&tlbr.r), 7.0);
        assert_eq!(f64::from(&tlbr.area()), 8.0);
        Ok(())
    }

    #[test]
    fn pairwise_intersection() -> Result<()> {
        let lhs = tlbr(&[[1.0, 1.0, 2.0, 2.0], [10.5, 10.5, 1.0, 1.0]])?;
        let rhs = tlbr(&[
            [2.0, 2.0, 2.0, 2.0],
            [0.5, 0.5, 1.0, 1.0],
            [5.5, 5.5, 1.0, 1.0],
        ])?;
        let inter = lhs.pairwise_intersect_area_with(&rhs);
        assert_eq!(inter.size(), vec![2, 3]);

        let inter = Vec::<f32>::from(&inter.view([-1]));
        let expect = [1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        inter
            .iter()
            .zip(expect)
            .for_each(|(&lhs, rhs)| assert_abs_diff_eq!(lhs, rhs));
        Ok(())
    }

    #[test]
    fn union_counts_overlap_once() -> Result<()> {
        // areas 4 and 4 overlapping by 1
        let lhs = tlbr(&[[1.0, 1.0, 2.0, 2.0]])?;
        let rhs = tlbr(&[[2.0, 2.0, 2.0, 2.0]])?;
        let iou = lhs.pairwise_iou_with(&rhs);
        assert_abs_diff_eq!(f64::from(&iou.view([-1])), 1.0 / 7.0, epsilon = 1e-6);
        Ok(())
    }
}
