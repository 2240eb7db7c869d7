pub use anyhow::{bail, ensure, format_err, Error, Result};
pub use getset::Getters;
pub use maplit::hashset;
pub use std::{
    borrow::Borrow,
    convert::{TryFrom, TryInto},
};
pub use tch::{Device, Kind, Tensor};
pub use tch_tensor_like::TensorLike;

unzip_n::unzip_n!(pub 4);
