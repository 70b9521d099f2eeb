//! Analyses over the loop IR.

pub mod strides;

pub use strides::{compute_strides, op_strides, StrideInfo};
