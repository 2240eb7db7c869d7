pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, CyCxHW, HW};
pub use getset::Getters;
pub use itertools::{izip, Itertools as _};
pub use label::{GridLabel, RatioLabel};
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashSet,
    iter,
    num::NonZeroUsize,
};
pub use tch::{Device, IndexOp, Kind, Tensor};
pub use tch_goodies::{calculate_iou, CyCxHWTensor, TensorExt as _};
pub use tch_tensor_like::TensorLike;
