use crate::common::*;

/// The clipping margin applied to probabilities before taking logarithms.
pub const BCE_EPSILON: f64 = 1e-7;

/// Elementwise binary cross-entropy on probabilities.
///
/// The input is clipped to `[BCE_EPSILON, 1 - BCE_EPSILON]` first, so the
/// output stays finite for inputs at or beyond 0 and 1. No reduction is
/// applied.
pub fn bce_loss(input: &Tensor, target: &Tensor) -> Tensor {
    debug_assert_eq!(
        input.size(),
        target.size(),
        "input and target tensors must have equal shape"
    );

    let input = input.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
    -target * input.log() - (1.0 - target) * (1.0f64 - &input).log()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bce_matches_closed_form() {
        let input = Tensor::of_slice(&[0.25f64, 0.5, 0.9]);
        let target = Tensor::of_slice(&[0.0f64, 1.0, 1.0]);
        let loss = Vec::<f64>::from(&bce_loss(&input, &target));

        assert_abs_diff_eq!(loss[0], -(0.75f64.ln()), epsilon = 1e-12);
        assert_abs_diff_eq!(loss[1], -(0.5f64.ln()), epsilon = 1e-12);
        assert_abs_diff_eq!(loss[2], -(0.9f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn bce_is_finite_at_saturation() {
        let input = Tensor::of_slice(&[0.0f64, 1.0, -3.0, 4.0]);
        let target = Tensor::of_slice(&[1.0f64, 0.0, 0.5, 0.5]);
        let loss = bce_loss(&input, &target);
        assert!(bool::from(loss.isfinite().all()));

        let expect = -(BCE_EPSILON.ln());
        assert_abs_diff_eq!(loss.double_value(&[0]), expect, epsilon = 1e-6);
        assert_abs_diff_eq!(loss.double_value(&[1]), expect, epsilon = 1e-6);
    }

    #[test]
    fn bce_keeps_gradient() {
        let input = Tensor::of_slice(&[0.3f32, 0.6]).set_requires_grad(true);
        let target = Tensor::of_slice(&[0.0f32, 1.0]);
        let loss = bce_loss(&input, &target).sum(Kind::Float);
        loss.backward();
        let grad = input.grad();
        assert!(grad.defined());
        // d/dp of -ln(1 - p) at 0.3 and -ln(p) at 0.6
        assert_abs_diff_eq!(grad.double_value(&[0]), 1.0 / 0.7, epsilon = 1e-5);
        assert_abs_diff_eq!(grad.double_value(&[1]), -1.0 / 0.6, epsilon = 1e-5);
    }
}
