//! # StencilOpt - Stencil-Matching Loop-Nest Optimizer
//!
//! A compiler pass that recognizes tiled multiply-accumulate patterns in
//! perfectly nested parallel loops and rewrites them into calls to a
//! specialized fused-multiply-accumulate kernel:
//! - capture of the target instruction shape in a band body
//! - backtracking search over index-to-role bindings under stride
//!   requirements
//! - tile-size search over pluggable candidate generators
//! - a hardware-calibrated analytic cost model
//! - strip-mining rewrite that leaves a single kernel call in the body
//!
//! ## Architecture
//!
//! ```text
//! FuncOp → capture → binding search → tiling search → cost model → rewrite
//!            (policy)    (engine)        (engine)       (policy)    (policy)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use stencilopt::prelude::*;
//!
//! let mut func = build_matmul();          // load, load, mul, reduce-add
//! let pass = GemmStencilPass::new(8)?;    // 8 hardware threads
//! let changed = pass.apply(&mut func)?;
//! assert!(changed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)] // During development

pub mod analysis;
pub mod ir;
pub mod target;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{compute_strides, op_strides, StrideInfo};
    pub use crate::ir::*;
    pub use crate::target::{HeatmapTable, KernelCost, KernelCostModel};
    pub use crate::transform::stencil::{
        do_stenciling, EvenTilingGenerator, FixedTilingGenerator, GemmStencil, GemmStencilPass,
        LoadStoreBundle, PowerOfTwoGenerator, StencilContext, StencilEngine, StencilPolicy,
        StrideRequirement, TensorAndIndexPermutation, TileSizeGenerator,
    };
    pub use crate::transform::Transform;
    pub use crate::utils::errors::*;
    pub use crate::utils::print_func;
}

use transform::Transform;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the matrix-multiply stencil pass over a function.
///
/// Convenience wrapper around [`transform::stencil::GemmStencilPass`];
/// returns whether any band was rewritten.
pub fn stencil_function(func: &mut ir::FuncOp, num_threads: usize) -> anyhow::Result<bool> {
    let pass = transform::stencil::GemmStencilPass::new(num_threads)?;
    pass.apply(func)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
