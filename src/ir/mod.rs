//! Intermediate representation of affine parallel loop nests.
//!
//! This module defines the host IR the stencil pass operates on:
//! - affine expressions, maps, and buffer accesses
//! - buffers, index variables, parallel bands, functions
//! - band body operations (loads, arithmetic, accumulating stores,
//!   specialized kernel calls)

pub mod affine;
pub mod body;
pub mod loops;

pub use affine::{AccessMap, AffineExpr, AffineMap};
pub use body::{AggregationKind, BinOp, BodyOp, KernelOperand, OpId, ValueId};
pub use loops::{
    Buffer, BufferId, ElementType, FuncBuilder, FuncOp, IndexId, IndexVar, ParallelBand,
};
