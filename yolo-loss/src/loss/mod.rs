//! Loss function building blocks.

mod bce_loss;
mod config;
mod ignore_mask;
mod loss;
mod misc;
mod target_assignment;

pub use bce_loss::*;
pub use config::*;
pub use loss::*;
pub use misc::*;
