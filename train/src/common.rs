//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use itertools::Itertools;
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    f64::consts::PI,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
pub use tch::{nn, Device, Kind, Tensor};
