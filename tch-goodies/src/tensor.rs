use crate::common::*;

/// Extra constructors on [Tensor].
pub trait TensorExt {
    /// Add up tensors of broadcastable shapes, failing on an empty input.
    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>;
}

impl TensorExt for Tensor {
    fn f_sum_tensors<T>(tensors: impl IntoIterator<Item = T>) -> Result<Tensor>
    where
        T: Borrow<Tensor>,
    {
        let mut tensors = tensors.into_iter();
        let first = tensors
            .next()
            .ok_or_else(|| format_err!("cannot sum an empty list of tensors"))?;
        tensors.try_fold(first.borrow().shallow_clone(), |sum, tensor| {
            Ok(sum.f_add(tensor.borrow())?)
        })
    }
}
