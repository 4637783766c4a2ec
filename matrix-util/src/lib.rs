//! Sparse and dense matrix helpers shared by the block model crates.

pub mod dmatrix_util;
pub mod sparse_util;
pub mod traits;

pub use nalgebra::{DMatrix, DVector};
pub use nalgebra_sparse::{CooMatrix, CscMatrix};
