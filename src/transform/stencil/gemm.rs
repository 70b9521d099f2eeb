//! General matrix-multiply stencil.
//!
//! Recognizes a parallel band whose body is
//! `load, load, mul, accumulate-add, yield`, binds the band's indexes to
//! the roles `m` (output row), `n` (output column), `k` (reduction), and
//! rewrites the winner into a strip-mined loop over a fused
//! multiply-accumulate kernel call.
//!
//! Role order is `[m, n, k]` internally; the kernel's operand order is
//! `[n, m, k]`, and tile sizes are reordered at the call boundary.

use std::collections::BTreeMap;

use log::{debug, trace};
use num_integer::Integer;

use crate::ir::{
    AccessMap, AffineExpr, AffineMap, AggregationKind, BinOp, BodyOp, FuncOp, IndexId,
    KernelOperand, ParallelBand,
};
use crate::target::{KernelCostModel, DEFAULT_HEATMAP};
use crate::transform::stencil::{
    do_stenciling, EvenTilingGenerator, LoadStoreBundle, RequirementTable, StencilContext,
    StencilPolicy, StrideRequirement, TensorAndIndexPermutation, TileSizeGenerator,
};
use crate::transform::Transform;
use crate::utils::errors::{ConfigError, TransformError};

/// Operand slot of the first multiply input.
const SLOT_A: usize = 0;
/// Operand slot of the second multiply input.
const SLOT_B: usize = 1;
/// Operand slot of the accumulating store.
const SLOT_C: usize = 2;

/// Role of the index shared by A and the output rows.
const ROLE_M: usize = 0;
/// Role of the index shared by B and the output columns.
const ROLE_N: usize = 1;
/// Role of the reduction index.
const ROLE_K: usize = 2;

/// Body shape the capture predicate accepts: load, load, mul,
/// accumulate-add, yield.
const GEMM_REGION_OPS: usize = 5;

const PASS_NAME: &str = "gemm-stencil";

/// The matrix-multiply stencil policy.
pub struct GemmStencil {
    num_threads: usize,
    requirements: RequirementTable,
    generators: Vec<Box<dyn TileSizeGenerator>>,
    cost_model: Box<dyn KernelCostModel>,
}

impl GemmStencil {
    /// Create the policy with the built-in calibration table and even
    /// tiling generators. `num_threads` is the number of execution units
    /// outer iterations are amortized across; zero is a configuration
    /// error.
    pub fn new(num_threads: usize) -> Result<Self, ConfigError> {
        Self::with_cost_model(num_threads, Box::new(DEFAULT_HEATMAP.clone()))
    }

    /// Create the policy with an explicit kernel calibration table.
    pub fn with_cost_model(
        num_threads: usize,
        cost_model: Box<dyn KernelCostModel>,
    ) -> Result<Self, ConfigError> {
        if num_threads == 0 {
            return Err(ConfigError::InvalidThreadCount(num_threads));
        }
        let generators: Vec<Box<dyn TileSizeGenerator>> = (0..3)
            .map(|_| Box::new(EvenTilingGenerator) as Box<dyn TileSizeGenerator>)
            .collect();
        Ok(Self {
            num_threads,
            requirements: Self::requirement_table(),
            generators,
            cost_model,
        })
    }

    /// Replace the per-role tile-size generators (one per role).
    pub fn with_generators(mut self, generators: Vec<Box<dyn TileSizeGenerator>>) -> Self {
        debug_assert_eq!(generators.len(), 3, "one generator per semantic role");
        self.generators = generators;
        self
    }

    /// Stride requirements of the matrix-multiply pattern:
    ///
    /// |   | m       | n    | k       |
    /// |---|---------|------|---------|
    /// | A | nonzero | zero | unit    |
    /// | B | zero    | unit | nonzero |
    /// | C | nonzero | unit | zero    |
    fn requirement_table() -> RequirementTable {
        RequirementTable::from([
            ((SLOT_A, ROLE_M), StrideRequirement::NonZero),
            ((SLOT_A, ROLE_N), StrideRequirement::Zero),
            ((SLOT_A, ROLE_K), StrideRequirement::Unit),
            ((SLOT_B, ROLE_M), StrideRequirement::Zero),
            ((SLOT_B, ROLE_N), StrideRequirement::Unit),
            ((SLOT_B, ROLE_K), StrideRequirement::NonZero),
            ((SLOT_C, ROLE_M), StrideRequirement::NonZero),
            ((SLOT_C, ROLE_N), StrideRequirement::Unit),
            ((SLOT_C, ROLE_K), StrideRequirement::Zero),
        ])
    }
}

impl StencilPolicy for GemmStencil {
    fn semantic_idx_count(&self) -> usize {
        3
    }

    fn requirements(&self) -> &RequirementTable {
        &self.requirements
    }

    fn tiling_generators(&self) -> &[Box<dyn TileSizeGenerator>] {
        &self.generators
    }

    fn capture(&self, band: &ParallelBand) -> Option<LoadStoreBundle> {
        if band.body.len() != GEMM_REGION_OPS {
            trace!("band body does not have the right number of operations for a GEMM");
            return None;
        }
        if !matches!(band.body.last(), Some(BodyOp::Yield)) {
            trace!("band body does not end in a terminator");
            return None;
        }

        // The accumulating store is the last operation before the
        // terminator.
        let reduce_id = crate::ir::OpId((band.body.len() - 2) as u32);
        let (agg, value) = match band.op(reduce_id) {
            Some(BodyOp::Reduce { agg, value, .. }) => (*agg, *value),
            _ => {
                trace!("last non-terminator is not an accumulating store");
                return None;
            }
        };
        if agg != AggregationKind::Add {
            trace!("the accumulation is not addition");
            return None;
        }

        let mul_id = match band.defining_op(value) {
            Some(id) => id,
            None => {
                trace!("the stored value is not defined in this band");
                return None;
            }
        };
        let (lhs, rhs) = match band.op(mul_id) {
            Some(BodyOp::Binary {
                op: BinOp::Mul,
                lhs,
                rhs,
                ..
            }) => (*lhs, *rhs),
            _ => {
                trace!("the stored value is not a multiplication");
                return None;
            }
        };

        let mut loads = Vec::with_capacity(2);
        for operand in [lhs, rhs] {
            let load_id = band.defining_op(operand)?;
            if !matches!(band.op(load_id), Some(BodyOp::Load { .. })) {
                trace!("a multiply operand is not a load");
                return None;
            }
            loads.push(load_id);
        }

        Some(LoadStoreBundle {
            loads,
            stores: vec![reduce_id],
        })
    }

    fn cost(
        &self,
        cx: &mut StencilContext<'_>,
        perm: &TensorAndIndexPermutation,
        tile: &[i64],
    ) -> f64 {
        let tot_inner_loop = tile[ROLE_M] * tile[ROLE_N] * tile[ROLE_K];
        // The calibration table is keyed in kernel (n, m, k) order.
        let kernel_cost = self
            .cost_model
            .lookup([tile[ROLE_N], tile[ROLE_M], tile[ROLE_K]]);
        if !kernel_cost.is_feasible() {
            return f64::INFINITY;
        }
        let inner_time = tot_inner_loop as f64 / kernel_cost.throughput;
        trace!("inner: loop = {}, time = {}", tot_inner_loop, inner_time);

        // Middle indexes drive accumulation: they stride an input but not
        // the output.
        let mut middle_idxs: BTreeMap<IndexId, i64> = BTreeMap::new();
        for slot in [SLOT_A, SLOT_B] {
            let info = match cx.stride_info(perm.io_ops[slot]) {
                Some(info) => info,
                None => {
                    debug_assert!(false, "captured operation lost its stride info");
                    return f64::INFINITY;
                }
            };
            for (idx, _) in info.iter() {
                if !cx.is_own_index(idx) {
                    debug!("index {} from outside the band on input {}", idx, slot);
                    continue;
                }
                middle_idxs.entry(idx).or_insert_with(|| cx.idx_range(idx));
            }
        }
        let out_info = match cx.stride_info(perm.io_ops[SLOT_C]) {
            Some(info) => info,
            None => {
                debug_assert!(false, "captured store lost its stride info");
                return f64::INFINITY;
            }
        };
        for (idx, _) in out_info.iter() {
            if cx.is_own_index(idx) {
                middle_idxs.remove(&idx);
            }
        }
        for (role, &idx) in perm.indexes.iter().enumerate() {
            debug_assert!(cx.is_own_index(idx), "tiled index must belong to the band");
            if let Some(range) = middle_idxs.get_mut(&idx) {
                *range = Integer::div_ceil(&*range, &tile[role]);
            }
        }
        let tot_middle_loop: i64 = middle_idxs.values().product();
        trace!("middle: loop = {}", tot_middle_loop);

        // Outer indexes address the output and parallelize across threads.
        let mut outer_idxs: BTreeMap<IndexId, i64> = BTreeMap::new();
        for (idx, _) in out_info.iter() {
            if !cx.is_own_index(idx) {
                debug!("index {} from outside the band on output", idx);
                continue;
            }
            outer_idxs.entry(idx).or_insert_with(|| cx.idx_range(idx));
        }
        for (role, &idx) in perm.indexes.iter().enumerate() {
            if let Some(range) = outer_idxs.get_mut(&idx) {
                *range = Integer::div_ceil(&*range, &tile[role]);
            }
        }
        let tot_outer_loop: i64 = outer_idxs.values().product();
        trace!("outer: loop = {}", tot_outer_loop);

        let outer_batches = Integer::div_ceil(&tot_outer_loop, &(self.num_threads as i64));
        let perf =
            outer_batches as f64 * tot_middle_loop as f64 * (kernel_cost.startup_cost + inner_time);
        debug!(
            "estimated cost = {} (outer batches: {}, middle count: {}, startup: {}, inner time: {})",
            perf, outer_batches, tot_middle_loop, kernel_cost.startup_cost, inner_time
        );
        perf
    }

    fn transform(
        &self,
        func: &mut FuncOp,
        band_idx: usize,
        perm: &TensorAndIndexPermutation,
        tile: &[i64],
    ) -> Result<(), TransformError> {
        // Strip-mine: the band now iterates over tiles of each bound index.
        let scaled: Vec<(IndexId, i64)> = func.bands[band_idx]
            .ivs
            .iter()
            .filter_map(|&iv| {
                perm.indexes
                    .iter()
                    .position(|&bound| bound == iv)
                    .map(|role| (iv, tile[role]))
            })
            .collect();
        for (iv, tile_size) in scaled {
            func.index_var_mut(iv).step *= tile_size;
        }

        let band = &func.bands[band_idx];
        let (a_buf, a_access) = match band.op(perm.io_ops[SLOT_A]) {
            Some(BodyOp::Load { buffer, access, .. }) => (*buffer, access.clone()),
            _ => {
                return Err(TransformError::UnexpectedBodyShape {
                    transform: PASS_NAME,
                    expected: "a load in the first input slot",
                })
            }
        };
        let (b_buf, b_access) = match band.op(perm.io_ops[SLOT_B]) {
            Some(BodyOp::Load { buffer, access, .. }) => (*buffer, access.clone()),
            _ => {
                return Err(TransformError::UnexpectedBodyShape {
                    transform: PASS_NAME,
                    expected: "a load in the second input slot",
                })
            }
        };
        let (c_buf, c_access) = match band.op(perm.io_ops[SLOT_C]) {
            Some(BodyOp::Reduce { buffer, access, .. }) => (*buffer, access.clone()),
            _ => {
                return Err(TransformError::UnexpectedBodyShape {
                    transform: PASS_NAME,
                    expected: "an accumulating store in the output slot",
                })
            }
        };

        // Address maps over each operand's tile-local coordinates.
        let a_tile = tile_local_map(&a_access, &[perm.indexes[ROLE_M], perm.indexes[ROLE_K]]);
        let b_tile = tile_local_map(&b_access, &[perm.indexes[ROLE_K], perm.indexes[ROLE_N]]);
        let c_tile = tile_local_map(&c_access, &[perm.indexes[ROLE_M], perm.indexes[ROLE_N]]);

        let call = BodyOp::Gemm {
            c: KernelOperand {
                buffer: c_buf,
                access: c_access,
                tile_map: c_tile,
            },
            a: KernelOperand {
                buffer: a_buf,
                access: a_access,
                tile_map: a_tile,
            },
            b: KernelOperand {
                buffer: b_buf,
                access: b_access,
                tile_map: b_tile,
            },
            tile: [tile[ROLE_N], tile[ROLE_M], tile[ROLE_K]],
        };

        // The call replaces everything but the terminator.
        func.bands[band_idx].body = vec![call, BodyOp::Yield];
        Ok(())
    }
}

/// Restrict an access to the tile-local coordinates of the given roles:
/// operands bound to `roles[i]` become dimension `i`, everything else
/// becomes the constant 0 offset, composed with the original address map.
fn tile_local_map(access: &AccessMap, roles: &[IndexId]) -> AffineMap {
    let per_operand: Vec<AffineExpr> = access
        .operands
        .iter()
        .map(|operand| {
            roles
                .iter()
                .position(|role| role == operand)
                .map(AffineExpr::Dim)
                .unwrap_or(AffineExpr::Const(0))
        })
        .collect();
    access.map.compose(&AffineMap::new(roles.len(), per_operand))
}

/// The stencil pass: runs the matrix-multiply policy over every band of a
/// function.
pub struct GemmStencilPass {
    stencil: GemmStencil,
}

impl GemmStencilPass {
    /// Create the pass. `num_threads` must be positive; constructing the
    /// pass without it is a configuration error.
    pub fn new(num_threads: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            stencil: GemmStencil::new(num_threads)?,
        })
    }

    /// Create the pass around a fully configured policy.
    pub fn with_stencil(stencil: GemmStencil) -> Self {
        Self { stencil }
    }
}

impl Transform for GemmStencilPass {
    fn apply(&self, func: &mut FuncOp) -> anyhow::Result<bool> {
        let mut changed = false;
        for band_idx in 0..func.bands.len() {
            changed |= do_stenciling(&self.stencil, func, band_idx)?;
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        PASS_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, FuncBuilder, OpId, ValueId};
    use crate::target::KernelCost;
    use crate::transform::stencil::StencilEngine;

    /// Every tile shape runs at the same speed; isolates search mechanics
    /// from calibration data.
    struct FlatCostModel {
        throughput: f64,
        startup: f64,
    }

    impl KernelCostModel for FlatCostModel {
        fn lookup(&self, _tile: [i64; 3]) -> KernelCost {
            KernelCost {
                throughput: self.throughput,
                startup_cost: self.startup,
            }
        }
    }

    struct MatmulIds {
        m: IndexId,
        n: IndexId,
        k: IndexId,
    }

    fn matmul_func(size: i64) -> (FuncOp, MatmulIds) {
        let mut b = FuncBuilder::new("matmul");
        let m = b.add_index("m", size).unwrap();
        let n = b.add_index("n", size).unwrap();
        let k = b.add_index("k", size).unwrap();
        let a = b
            .add_buffer("A", vec![size, size], ElementType::Float)
            .unwrap();
        let bb = b
            .add_buffer("B", vec![size, size], ElementType::Float)
            .unwrap();
        let c = b
            .add_buffer("C", vec![size, size], ElementType::Float)
            .unwrap();
        let body = vec![
            BodyOp::Load {
                result: ValueId(0),
                buffer: a,
                access: AccessMap::identity(vec![m, k]),
            },
            BodyOp::Load {
                result: ValueId(1),
                buffer: bb,
                access: AccessMap::identity(vec![k, n]),
            },
            BodyOp::Binary {
                result: ValueId(2),
                op: BinOp::Mul,
                lhs: ValueId(0),
                rhs: ValueId(1),
            },
            BodyOp::Reduce {
                agg: AggregationKind::Add,
                buffer: c,
                access: AccessMap::identity(vec![m, n]),
                value: ValueId(2),
            },
            BodyOp::Yield,
        ];
        b.add_band(vec![m, n, k], body).unwrap();
        (b.build(), MatmulIds { m, n, k })
    }

    fn flat_stencil(num_threads: usize) -> GemmStencil {
        GemmStencil::with_cost_model(
            num_threads,
            Box::new(FlatCostModel {
                throughput: 1.0,
                startup: 0.0,
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_capture_matches_matmul() {
        let (func, _) = matmul_func(16);
        let stencil = flat_stencil(1);
        let bundle = stencil.capture(&func.bands[0]).expect("should match");
        assert_eq!(bundle.loads, vec![OpId(0), OpId(1)]);
        assert_eq!(bundle.stores, vec![OpId(3)]);
    }

    #[test]
    fn test_capture_rejects_wrong_op_count() {
        let (mut func, _) = matmul_func(16);
        // Drop the multiply: four operations is not the GEMM shape.
        func.bands[0].body.remove(2);
        let stencil = flat_stencil(1);
        assert_eq!(stencil.capture(&func.bands[0]), None);
    }

    #[test]
    fn test_capture_rejects_non_additive_aggregation() {
        let (mut func, _) = matmul_func(16);
        if let BodyOp::Reduce { agg, .. } = &mut func.bands[0].body[3] {
            *agg = AggregationKind::Max;
        }
        let stencil = flat_stencil(1);
        assert_eq!(stencil.capture(&func.bands[0]), None);
    }

    #[test]
    fn test_capture_rejects_non_multiply_combine() {
        let (mut func, _) = matmul_func(16);
        if let BodyOp::Binary { op, .. } = &mut func.bands[0].body[2] {
            *op = BinOp::Add;
        }
        let stencil = flat_stencil(1);
        assert_eq!(stencil.capture(&func.bands[0]), None);
    }

    #[test]
    fn test_capture_rejects_non_load_operand() {
        let (mut func, _) = matmul_func(16);
        // Feed the multiply's own result back as an operand.
        if let BodyOp::Binary { lhs, result, .. } = &mut func.bands[0].body[2] {
            *lhs = *result;
        }
        let stencil = flat_stencil(1);
        assert_eq!(stencil.capture(&func.bands[0]), None);
    }

    #[test]
    fn test_requirements_force_canonical_binding() {
        let (func, ids) = matmul_func(16);
        let stencil = flat_stencil(1);
        let (_, perm, _) = StencilEngine::new(&stencil, &func, 0)
            .search()
            .expect("matmul must produce a finite-cost candidate");
        assert_eq!(perm.indexes, vec![ids.m, ids.n, ids.k]);
        assert_eq!(perm.io_ops, vec![OpId(0), OpId(1), OpId(3)]);
    }

    #[test]
    fn test_cost_formula() {
        let (func, ids) = matmul_func(64);
        let stencil = GemmStencil::with_cost_model(
            8,
            Box::new(FlatCostModel {
                throughput: 16.0,
                startup: 100.0,
            }),
        )
        .unwrap();
        let mut cx = StencilContext::new(&func, 0);
        let perm = TensorAndIndexPermutation {
            io_ops: vec![OpId(0), OpId(1), OpId(3)],
            indexes: vec![ids.m, ids.n, ids.k],
        };
        let cost = stencil.cost(&mut cx, &perm, &[16, 16, 16]);
        // inner = 16^3 / 16 = 256; middle = ceil(64/16) = 4;
        // outer = 4 * 4 = 16 over 8 threads = 2 batches.
        assert_eq!(cost, 2.0 * 4.0 * (100.0 + 256.0));
    }

    #[test]
    fn test_cost_independent_of_index_declaration_order() {
        // Same loop nest, but the index arena is declared k, n, m so the
        // ordered bookkeeping maps iterate differently than the role order.
        let mut b = FuncBuilder::new("matmul_permuted");
        let k = b.add_index("k", 64).unwrap();
        let n = b.add_index("n", 64).unwrap();
        let m = b.add_index("m", 64).unwrap();
        let a = b.add_buffer("A", vec![64, 64], ElementType::Float).unwrap();
        let bb = b.add_buffer("B", vec![64, 64], ElementType::Float).unwrap();
        let c = b.add_buffer("C", vec![64, 64], ElementType::Float).unwrap();
        let body = vec![
            BodyOp::Load {
                result: ValueId(0),
                buffer: a,
                access: AccessMap::identity(vec![m, k]),
            },
            BodyOp::Load {
                result: ValueId(1),
                buffer: bb,
                access: AccessMap::identity(vec![k, n]),
            },
            BodyOp::Binary {
                result: ValueId(2),
                op: BinOp::Mul,
                lhs: ValueId(0),
                rhs: ValueId(1),
            },
            BodyOp::Reduce {
                agg: AggregationKind::Add,
                buffer: c,
                access: AccessMap::identity(vec![m, n]),
                value: ValueId(2),
            },
            BodyOp::Yield,
        ];
        b.add_band(vec![m, n, k], body).unwrap();
        let func = b.build();

        let stencil = GemmStencil::with_cost_model(
            8,
            Box::new(FlatCostModel {
                throughput: 16.0,
                startup: 100.0,
            }),
        )
        .unwrap();
        let mut cx = StencilContext::new(&func, 0);
        let perm = TensorAndIndexPermutation {
            io_ops: vec![OpId(0), OpId(1), OpId(3)],
            indexes: vec![m, n, k],
        };
        // Identical figure to the canonical declaration order.
        let cost = stencil.cost(&mut cx, &perm, &[16, 16, 16]);
        assert_eq!(cost, 2.0 * 4.0 * (100.0 + 256.0));
    }

    #[test]
    fn test_cost_infeasible_tile_is_infinite() {
        let (func, ids) = matmul_func(64);
        let stencil = GemmStencil::with_cost_model(
            8,
            Box::new(FlatCostModel {
                throughput: 0.0,
                startup: 0.0,
            }),
        )
        .unwrap();
        let mut cx = StencilContext::new(&func, 0);
        let perm = TensorAndIndexPermutation {
            io_ops: vec![OpId(0), OpId(1), OpId(3)],
            indexes: vec![ids.m, ids.n, ids.k],
        };
        assert!(stencil.cost(&mut cx, &perm, &[16, 16, 16]).is_infinite());
    }

    #[test]
    fn test_tile_local_map_zeroes_unrelated_roles() {
        let m = IndexId(0);
        let k = IndexId(2);
        let o = IndexId(7);
        // A[o, m, k] restricted to roles (m, k).
        let access = AccessMap::identity(vec![o, m, k]);
        let tile_map = tile_local_map(&access, &[m, k]);
        assert_eq!(tile_map.num_dims(), 2);
        assert_eq!(
            tile_map.results(),
            &[
                AffineExpr::Const(0),
                AffineExpr::Dim(0),
                AffineExpr::Dim(1)
            ]
        );
    }

    #[test]
    fn test_zero_threads_is_a_config_error() {
        assert_eq!(
            GemmStencil::new(0).err(),
            Some(ConfigError::InvalidThreadCount(0))
        );
        assert!(GemmStencilPass::new(0).is_err());
    }
}
