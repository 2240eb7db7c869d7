//! Training utilities for YOLO detectors: learning rate schedules, weight
//! initialization and the training configuration format.

pub mod common;
pub mod config;
pub mod utils;
