//! Misc utilities.

mod lr_scheduler;
mod weights_init;

pub use lr_scheduler::*;
pub use weights_init::*;
