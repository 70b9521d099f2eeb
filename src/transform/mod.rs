//! Transformations over the loop IR.

pub mod stencil;

use crate::ir::FuncOp;
use anyhow::Result;

/// Transformation pass trait.
pub trait Transform {
    /// Apply the transformation; returns whether the function changed.
    fn apply(&self, func: &mut FuncOp) -> Result<bool>;

    /// Get transformation name.
    fn name(&self) -> &str;
}
