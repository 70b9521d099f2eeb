//! Constant-stride analysis for affine buffer accesses.
//!
//! For a load or accumulating store, the stride of an index variable is the
//! constant number of elements the linearized (row-major) address moves when
//! that index increments by one. Accesses whose subscripts are not affine in
//! their operands (floor division, modulo, products of indexes) have no
//! constant strides and are reported as such.

use std::collections::BTreeMap;

use crate::ir::{AccessMap, BufferId, FuncOp, IndexId, OpId, ParallelBand};

/// Per-index constant strides of one buffer access.
///
/// Only indexes with a nonzero net stride are stored; iteration order is
/// the index-id order, so downstream bookkeeping is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrideInfo {
    strides: BTreeMap<IndexId, i64>,
}

impl StrideInfo {
    /// Stride of `idx`, zero if the index does not move the address.
    pub fn stride_for(&self, idx: IndexId) -> i64 {
        self.strides.get(&idx).copied().unwrap_or(0)
    }

    /// Indexes with nonzero stride, in index-id order.
    pub fn iter(&self) -> impl Iterator<Item = (IndexId, i64)> + '_ {
        self.strides.iter().map(|(&k, &v)| (k, v))
    }

    /// Number of indexes that move the address.
    pub fn len(&self) -> usize {
        self.strides.len()
    }

    /// Whether no index moves the address.
    pub fn is_empty(&self) -> bool {
        self.strides.is_empty()
    }
}

/// Compute the per-index strides of `access` into `buffer`.
///
/// Returns `None` when any subscript expression is not affine in the access
/// operands.
pub fn compute_strides(
    func: &FuncOp,
    buffer: BufferId,
    access: &AccessMap,
) -> Option<StrideInfo> {
    let row_strides = func.buffer(buffer).row_major_strides();
    let num_dims = access.map.num_dims();

    let mut strides: BTreeMap<IndexId, i64> = BTreeMap::new();
    for (expr, &row_stride) in access.map.results().iter().zip(&row_strides) {
        let (_offset, coeffs) = expr.linear_coeffs(num_dims)?;
        for (pos, &coeff) in coeffs.iter().enumerate() {
            if coeff != 0 {
                *strides.entry(access.operands[pos]).or_insert(0) += coeff * row_stride;
            }
        }
    }
    strides.retain(|_, s| *s != 0);
    Some(StrideInfo { strides })
}

/// Strides of a band body operation, for operations that access a buffer.
///
/// Returns `None` for operations without a buffer access and for
/// non-affine accesses.
pub fn op_strides(func: &FuncOp, band: &ParallelBand, op: OpId) -> Option<StrideInfo> {
    let (buffer, access) = band.op(op)?.access()?;
    compute_strides(func, buffer, access)
}
