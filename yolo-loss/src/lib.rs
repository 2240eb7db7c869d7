//! Training loss of YOLOv3-style detectors over multi-scale grid predictions.

mod common;
pub mod loss;
