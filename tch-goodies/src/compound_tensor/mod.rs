//! Box parameters stored as one `[batch, 1]` tensor per parameter.

mod cycxhw;
mod tlbr;

pub use cycxhw::*;
pub(crate) use tlbr::*;
