//! Body operations of a parallel band.
//!
//! Bodies are straight-line sequences of operations over band-local SSA
//! values: loads produce values, a binary operation combines them, and an
//! accumulating store ([`BodyOp::Reduce`]) folds a value into a buffer
//! element. [`BodyOp::Gemm`] is the specialized kernel call that stenciling
//! emits in place of a recognized multiply-accumulate body.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ir::affine::{AccessMap, AffineMap};
use crate::ir::loops::BufferId;

/// Identifier of an SSA value local to one band body.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identifier of a body operation: its position in the band body.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OpId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

/// Aggregation used by an accumulating store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationKind {
    /// Accumulate by addition
    Add,
    /// Accumulate by multiplication
    Mul,
    /// Keep the minimum
    Min,
    /// Keep the maximum
    Max,
}

/// One operand of the specialized kernel call: the buffer, its original
/// access map, and the tile-local address map composed over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelOperand {
    /// The accessed buffer
    pub buffer: BufferId,
    /// The operand's original access map
    pub access: AccessMap,
    /// Address map restricted to the operand's tile-local coordinates
    pub tile_map: AffineMap,
}

/// A body operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyOp {
    /// Affine load from a buffer
    Load {
        /// Produced value
        result: ValueId,
        /// Source buffer
        buffer: BufferId,
        /// Address computation
        access: AccessMap,
    },
    /// Binary arithmetic on two previously defined values
    Binary {
        /// Produced value
        result: ValueId,
        /// Operator
        op: BinOp,
        /// Left operand
        lhs: ValueId,
        /// Right operand
        rhs: ValueId,
    },
    /// Accumulating store: fold `value` into the addressed element
    Reduce {
        /// Aggregation operator
        agg: AggregationKind,
        /// Destination buffer
        buffer: BufferId,
        /// Address computation
        access: AccessMap,
        /// Value being folded in
        value: ValueId,
    },
    /// Specialized fused multiply-accumulate kernel call.
    ///
    /// `tile` is in the kernel's operand order `[n, m, k]`.
    Gemm {
        /// Output operand
        c: KernelOperand,
        /// First input operand
        a: KernelOperand,
        /// Second input operand
        b: KernelOperand,
        /// Tile sizes in kernel order
        tile: [i64; 3],
    },
    /// Band terminator
    Yield,
}

impl BodyOp {
    /// The value this operation defines, if any.
    pub fn result(&self) -> Option<ValueId> {
        match self {
            BodyOp::Load { result, .. } | BodyOp::Binary { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// The buffer access of a load or accumulating store.
    pub fn access(&self) -> Option<(BufferId, &AccessMap)> {
        match self {
            BodyOp::Load { buffer, access, .. } | BodyOp::Reduce { buffer, access, .. } => {
                Some((*buffer, access))
            }
            _ => None,
        }
    }

    /// Whether this operation terminates the band body.
    pub fn is_terminator(&self) -> bool {
        matches!(self, BodyOp::Yield)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::loops::IndexId;

    #[test]
    fn test_result_and_access() {
        let load = BodyOp::Load {
            result: ValueId(0),
            buffer: BufferId(0),
            access: AccessMap::identity(vec![IndexId(0)]),
        };
        assert_eq!(load.result(), Some(ValueId(0)));
        assert!(load.access().is_some());
        assert!(!load.is_terminator());

        let yield_op = BodyOp::Yield;
        assert_eq!(yield_op.result(), None);
        assert!(yield_op.access().is_none());
        assert!(yield_op.is_terminator());
    }
}
