//! Stencil matching: recognize a computational micro-pattern in a parallel
//! band, search index-to-role bindings and tile sizes against a hardware
//! cost model, and rewrite the winner into a specialized kernel call.
//!
//! The machinery splits into a generic engine and per-kernel policies:
//!
//! ```text
//! ParallelBand → Policy::capture → binding search → tiling search
//!                       │               (engine)        (engine)
//!                       │                                  │
//!                       │                           Policy::cost
//!                       └──────── winner ────── Policy::transform
//! ```
//!
//! The engine owns the search, the stride cache, and the best-so-far
//! state; a [`StencilPolicy`] contributes the pattern-specific pieces:
//! the capture predicate, the stride requirement table, the tile-size
//! generators, the cost function, and the rewrite.

pub mod engine;
pub mod generators;
pub mod gemm;

pub use engine::{StencilContext, StencilEngine};
pub use generators::{
    EvenTilingGenerator, FixedTilingGenerator, PowerOfTwoGenerator, TileSizeGenerator,
};
pub use gemm::{GemmStencil, GemmStencilPass};

use std::collections::HashMap;

use log::debug;

use crate::ir::{FuncOp, IndexId, OpId, ParallelBand};
use crate::utils::errors::TransformError;

/// The load and accumulating-store operations captured from a band body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStoreBundle {
    /// Load operations, in pattern order
    pub loads: Vec<OpId>,
    /// Accumulating stores (currently exactly one)
    pub stores: Vec<OpId>,
}

impl LoadStoreBundle {
    /// All captured operations, loads first, in operand-slot order.
    pub fn io_ops(&self) -> Vec<OpId> {
        self.loads
            .iter()
            .chain(self.stores.iter())
            .copied()
            .collect()
    }
}

/// A candidate assignment of operations to operand slots and index
/// variables to semantic roles.
///
/// `io_ops[slot]` is the operation filling that structural slot;
/// `indexes[role]` is the index variable bound to that role. Every bound
/// index must be one of the band's own index variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TensorAndIndexPermutation {
    /// Operations, one per operand slot
    pub io_ops: Vec<OpId>,
    /// Index variables, one per semantic role
    pub indexes: Vec<IndexId>,
}

/// Stride relationship an operand must exhibit with respect to a role's
/// index variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrideRequirement {
    /// The index must not move the operand's address
    Zero,
    /// The index must move the operand's address
    NonZero,
    /// The index must move the operand's address by exactly one element
    Unit,
}

impl StrideRequirement {
    /// Whether a concrete stride satisfies the requirement.
    pub fn accepts(&self, stride: i64) -> bool {
        match self {
            StrideRequirement::Zero => stride == 0,
            StrideRequirement::NonZero => stride != 0,
            StrideRequirement::Unit => stride == 1,
        }
    }
}

/// Requirement table keyed by `(operand slot, semantic role)`.
///
/// A binding of an index to a role is structurally valid only if every
/// slot's entry for that role accepts the slot operation's stride with
/// respect to the index. Missing entries are unconstrained.
pub type RequirementTable = HashMap<(usize, usize), StrideRequirement>;

/// Pattern-specific policy: the three operations the engine drives, plus
/// the static tables that parameterize its search.
pub trait StencilPolicy {
    /// Number of semantic roles to bind.
    fn semantic_idx_count(&self) -> usize;

    /// Stride requirements per `(operand slot, semantic role)`.
    fn requirements(&self) -> &RequirementTable;

    /// Tile-size generators, one per semantic role.
    fn tiling_generators(&self) -> &[Box<dyn TileSizeGenerator>];

    /// Recognize the target instruction shape in a band body.
    ///
    /// Returns the relevant operations if and only if the body matches the
    /// pattern exactly; any structural mismatch is "no match", not an
    /// error.
    fn capture(&self, band: &ParallelBand) -> Option<LoadStoreBundle>;

    /// Estimate the execution time of one candidate binding and tiling.
    /// Infinite cost marks the candidate as never selectable.
    fn cost(
        &self,
        cx: &mut StencilContext<'_>,
        perm: &TensorAndIndexPermutation,
        tile: &[i64],
    ) -> f64;

    /// Rewrite the band into its tiled, kernel-calling form.
    ///
    /// Only called with a finite-cost winner; assumes the body still has
    /// the exact shape `capture` matched.
    fn transform(
        &self,
        func: &mut FuncOp,
        band_idx: usize,
        perm: &TensorAndIndexPermutation,
        tile: &[i64],
    ) -> Result<(), TransformError>;
}

/// Run one full stenciling attempt on one band: capture, search, and
/// transform the winner.
///
/// Returns whether the band was rewritten. A band that does not match the
/// pattern, or for which no finite-cost candidate exists, is left
/// untouched; either exactly one full rewrite happens or none does.
pub fn do_stenciling(
    policy: &dyn StencilPolicy,
    func: &mut FuncOp,
    band_idx: usize,
) -> Result<bool, TransformError> {
    let best = StencilEngine::new(policy, func, band_idx).search();

    match best {
        Some((cost, perm, tiling)) => {
            debug!(
                "stencil selection: cost = {}, indexes = {:?}, tiling = {:?}",
                cost, perm.indexes, tiling
            );
            policy.transform(func, band_idx, &perm, &tiling)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_requirement() {
        assert!(StrideRequirement::Zero.accepts(0));
        assert!(!StrideRequirement::Zero.accepts(5));
        assert!(StrideRequirement::NonZero.accepts(-3));
        assert!(!StrideRequirement::NonZero.accepts(0));
        assert!(StrideRequirement::Unit.accepts(1));
        assert!(!StrideRequirement::Unit.accepts(2));
    }

    #[test]
    fn test_bundle_slot_order() {
        let bundle = LoadStoreBundle {
            loads: vec![OpId(0), OpId(1)],
            stores: vec![OpId(3)],
        };
        assert_eq!(bundle.io_ops(), vec![OpId(0), OpId(1), OpId(3)]);
    }
}
