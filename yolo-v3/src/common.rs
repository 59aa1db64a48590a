pub use anyhow::{bail, ensure, format_err, Context as _, Result};
pub use approx::assert_abs_diff_eq;
pub use bbox::{prelude::*, CyCxHW, Transform, HW, TLBR};
pub use derivative::Derivative;
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{iproduct, izip, Itertools as _};
pub use label::{ClassMap, Label};
pub use log::{debug, info, warn};
pub use ndarray::{s, Array4, ArrayView1};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt::Debug,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{nn, Device, Kind, Reduction, Tensor};
pub use tch_tensor_like::TensorLike;

unzip_n::unzip_n!(pub 4);
