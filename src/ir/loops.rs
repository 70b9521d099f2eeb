//! Loop-nest structures: buffers, index variables, parallel bands,
//! and the function that owns them.
//!
//! A [`FuncOp`] owns every index variable and buffer in an arena; bands and
//! body operations refer to them by id. A [`ParallelBand`] is one perfectly
//! nested multi-dimensional parallel loop: the ordered list of its own index
//! variables plus a straight-line body ending in a terminator. Access maps
//! inside a band may also reference index variables the band does not own
//! (indexes of an enclosing loop).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::ir::body::{BodyOp, OpId, ValueId};
use crate::utils::errors::IrError;

/// Identifier of an index variable within a function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%i{}", self.0)
    }
}

/// Identifier of a buffer within a function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@b{}", self.0)
    }
}

/// Element type of buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit signed integer
    Int,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
}

/// A statically shaped n-dimensional buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    /// Buffer name
    pub name: String,
    /// Dimension sizes, outermost first
    pub dims: Vec<i64>,
    /// Element type
    pub element: ElementType,
}

impl Buffer {
    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Row-major element strides: the innermost dimension is contiguous.
    pub fn row_major_strides(&self) -> Vec<i64> {
        let mut strides = vec![1; self.dims.len()];
        for d in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.dims[d + 1];
        }
        strides
    }
}

/// One dimension of a parallel loop: a constant iteration range and the
/// current step size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexVar {
    /// Human-readable name
    pub name: String,
    /// Constant iteration count
    pub range: i64,
    /// Current step; tiling multiplies this by the tile size
    pub step: i64,
}

/// A perfectly nested multi-dimensional parallel loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBand {
    /// The band's own index variables, outermost first
    pub ivs: Vec<IndexId>,
    /// Straight-line body; the last operation is the terminator
    pub body: Vec<BodyOp>,
}

impl ParallelBand {
    /// Look up a body operation by id.
    pub fn op(&self, id: OpId) -> Option<&BodyOp> {
        self.body.get(id.0 as usize)
    }

    /// Find the operation defining `value`, if any.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        self.body
            .iter()
            .position(|op| op.result() == Some(value))
            .map(|i| OpId(i as u32))
    }

    /// Whether `idx` is one of the band's own index variables.
    pub fn owns_index(&self, idx: IndexId) -> bool {
        self.ivs.contains(&idx)
    }
}

/// A function: the arena of index variables and buffers, plus the parallel
/// bands operating on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncOp {
    /// Function name
    pub name: String,
    /// All index variables; `IndexId` is a position in this table
    pub indices: Vec<IndexVar>,
    /// All buffers; `BufferId` is a position in this table
    pub buffers: Vec<Buffer>,
    /// Parallel bands, in program order
    pub bands: Vec<ParallelBand>,
}

impl FuncOp {
    /// Look up an index variable. The id must come from this function.
    pub fn index_var(&self, id: IndexId) -> &IndexVar {
        &self.indices[id.0 as usize]
    }

    /// Mutable index-variable lookup. The id must come from this function.
    pub fn index_var_mut(&mut self, id: IndexId) -> &mut IndexVar {
        &mut self.indices[id.0 as usize]
    }

    /// Look up a buffer. The id must come from this function.
    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.0 as usize]
    }
}

/// Builder for constructing validated functions.
#[derive(Debug, Default)]
pub struct FuncBuilder {
    name: String,
    indices: Vec<IndexVar>,
    buffers: Vec<Buffer>,
    bands: Vec<ParallelBand>,
}

impl FuncBuilder {
    /// Start a new function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Register an index variable with unit step.
    pub fn add_index(&mut self, name: impl Into<String>, range: i64) -> Result<IndexId, IrError> {
        let name = name.into();
        if range <= 0 {
            return Err(IrError::InvalidRange { name, range });
        }
        self.indices.push(IndexVar {
            name,
            range,
            step: 1,
        });
        Ok(IndexId((self.indices.len() - 1) as u32))
    }

    /// Register a buffer.
    pub fn add_buffer(
        &mut self,
        name: impl Into<String>,
        dims: Vec<i64>,
        element: ElementType,
    ) -> Result<BufferId, IrError> {
        let name = name.into();
        if let Some(&size) = dims.iter().find(|&&d| d <= 0) {
            return Err(IrError::InvalidBufferDim { name, size });
        }
        self.buffers.push(Buffer {
            name,
            dims,
            element,
        });
        Ok(BufferId((self.buffers.len() - 1) as u32))
    }

    /// Add a parallel band, validating that every id it references exists
    /// and that its body is well formed.
    pub fn add_band(&mut self, ivs: Vec<IndexId>, body: Vec<BodyOp>) -> Result<(), IrError> {
        let mut seen = HashSet::new();
        for &iv in &ivs {
            self.check_index(iv)?;
            if !seen.insert(iv) {
                return Err(IrError::DuplicateIndex(iv));
            }
        }
        if !matches!(body.last(), Some(BodyOp::Yield)) {
            return Err(IrError::MissingTerminator);
        }

        let mut defined: HashSet<ValueId> = HashSet::new();
        for op in &body {
            match op {
                BodyOp::Load { buffer, access, .. } => {
                    self.check_access(*buffer, access)?;
                }
                BodyOp::Binary { lhs, rhs, .. } => {
                    for v in [lhs, rhs] {
                        if !defined.contains(v) {
                            return Err(IrError::UndefinedValue(*v));
                        }
                    }
                }
                BodyOp::Reduce {
                    buffer,
                    access,
                    value,
                    ..
                } => {
                    self.check_access(*buffer, access)?;
                    if !defined.contains(value) {
                        return Err(IrError::UndefinedValue(*value));
                    }
                }
                BodyOp::Gemm { c, a, b, .. } => {
                    for operand in [c, a, b] {
                        self.check_access(operand.buffer, &operand.access)?;
                    }
                }
                BodyOp::Yield => {}
            }
            if let Some(v) = op.result() {
                defined.insert(v);
            }
        }

        self.bands.push(ParallelBand { ivs, body });
        Ok(())
    }

    /// Finish the function.
    pub fn build(self) -> FuncOp {
        FuncOp {
            name: self.name,
            indices: self.indices,
            buffers: self.buffers,
            bands: self.bands,
        }
    }

    fn check_index(&self, id: IndexId) -> Result<(), IrError> {
        if (id.0 as usize) < self.indices.len() {
            Ok(())
        } else {
            Err(IrError::UnknownIndex(id))
        }
    }

    fn check_access(
        &self,
        buffer: BufferId,
        access: &crate::ir::affine::AccessMap,
    ) -> Result<(), IrError> {
        let buf = self
            .buffers
            .get(buffer.0 as usize)
            .ok_or(IrError::UnknownBuffer(buffer))?;
        if access.rank() != buf.rank() {
            return Err(IrError::ArityMismatch {
                expected: buf.rank(),
                found: access.rank(),
            });
        }
        for &idx in &access.operands {
            self.check_index(idx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::affine::AccessMap;
    use crate::ir::body::{AggregationKind, BinOp};

    #[test]
    fn test_row_major_strides() {
        let buf = Buffer {
            name: "A".into(),
            dims: vec![4, 8, 16],
            element: ElementType::Float,
        };
        assert_eq!(buf.row_major_strides(), vec![128, 16, 1]);
    }

    #[test]
    fn test_builder_rejects_bad_range() {
        let mut b = FuncBuilder::new("f");
        assert!(matches!(
            b.add_index("i", 0),
            Err(IrError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_unknown_ids() {
        let mut b = FuncBuilder::new("f");
        let err = b.add_band(vec![IndexId(3)], vec![BodyOp::Yield]);
        assert_eq!(err, Err(IrError::UnknownIndex(IndexId(3))));
    }

    #[test]
    fn test_builder_requires_terminator() {
        let mut b = FuncBuilder::new("f");
        let i = b.add_index("i", 8).unwrap();
        assert_eq!(b.add_band(vec![i], vec![]), Err(IrError::MissingTerminator));
    }

    #[test]
    fn test_defining_op() {
        let mut b = FuncBuilder::new("f");
        let i = b.add_index("i", 8).unwrap();
        let buf = b.add_buffer("A", vec![8], ElementType::Float).unwrap();
        let access = AccessMap::identity(vec![i]);
        let body = vec![
            BodyOp::Load {
                result: ValueId(0),
                buffer: buf,
                access: access.clone(),
            },
            BodyOp::Binary {
                result: ValueId(1),
                op: BinOp::Mul,
                lhs: ValueId(0),
                rhs: ValueId(0),
            },
            BodyOp::Reduce {
                agg: AggregationKind::Add,
                buffer: buf,
                access,
                value: ValueId(1),
            },
            BodyOp::Yield,
        ];
        b.add_band(vec![i], body).unwrap();
        let func = b.build();
        let band = &func.bands[0];
        assert_eq!(band.defining_op(ValueId(1)), Some(OpId(1)));
        assert_eq!(band.defining_op(ValueId(9)), None);
        assert!(band.owns_index(i));
    }

    #[test]
    fn test_builder_rejects_undefined_value() {
        let mut b = FuncBuilder::new("f");
        let i = b.add_index("i", 8).unwrap();
        let buf = b.add_buffer("A", vec![8], ElementType::Float).unwrap();
        let body = vec![
            BodyOp::Reduce {
                agg: AggregationKind::Add,
                buffer: buf,
                access: AccessMap::identity(vec![i]),
                value: ValueId(0),
            },
            BodyOp::Yield,
        ];
        assert_eq!(
            b.add_band(vec![i], body),
            Err(IrError::UndefinedValue(ValueId(0)))
        );
    }
}
