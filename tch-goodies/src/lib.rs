//! Tensor utilities shared by the loss crates.

mod common;
pub mod compound_tensor;
pub mod iou;
pub mod tensor;

pub use compound_tensor::*;
pub use iou::*;
pub use tensor::*;
