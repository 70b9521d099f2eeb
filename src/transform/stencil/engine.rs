//! The generic stencil search engine.
//!
//! One engine instance drives one stenciling attempt on one band. It owns
//! the per-attempt caches (stride info, index ranges) and the best-so-far
//! state, and walks two nested recursive searches:
//!
//! 1. binding search: depth-first assignment of one index variable per
//!    semantic role, pruned by the policy's stride requirement table;
//! 2. tiling search: the cartesian product of per-role tile-size
//!    candidates, scored by the policy's cost function.
//!
//! All legal complete bindings are visited; cost is only consulted at
//! tiling leaves, never to prune the binding search.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, trace};

use crate::analysis::{op_strides, StrideInfo};
use crate::ir::{FuncOp, IndexId, OpId, ParallelBand};
use crate::transform::stencil::{StencilPolicy, TensorAndIndexPermutation};

/// Per-attempt view of one band: the loop's own index set, index ranges,
/// and the memoized stride oracle.
pub struct StencilContext<'f> {
    func: &'f FuncOp,
    band: &'f ParallelBand,
    own_ivs: HashSet<IndexId>,
    stride_cache: HashMap<OpId, Option<StrideInfo>>,
}

impl<'f> StencilContext<'f> {
    /// Build the context for one band of `func`.
    pub fn new(func: &'f FuncOp, band_idx: usize) -> Self {
        let band = &func.bands[band_idx];
        Self {
            func,
            band,
            own_ivs: band.ivs.iter().copied().collect(),
            stride_cache: HashMap::new(),
        }
    }

    /// The band under optimization.
    pub fn band(&self) -> &'f ParallelBand {
        self.band
    }

    /// Whether `idx` is one of the band's own index variables.
    pub fn is_own_index(&self, idx: IndexId) -> bool {
        self.own_ivs.contains(&idx)
    }

    /// Constant iteration range of an index variable.
    pub fn idx_range(&self, idx: IndexId) -> i64 {
        self.func.index_var(idx).range
    }

    /// Stride info of a captured operation, memoized per operation for the
    /// lifetime of this attempt. `None` means the access is not affine (or
    /// the operation accesses no buffer).
    pub fn stride_info(&mut self, op: OpId) -> Option<StrideInfo> {
        let func = self.func;
        let band = self.band;
        self.stride_cache
            .entry(op)
            .or_insert_with(|| op_strides(func, band, op))
            .clone()
    }
}

/// The search driver for one stenciling attempt.
pub struct StencilEngine<'f, 'p> {
    policy: &'p dyn StencilPolicy,
    cx: StencilContext<'f>,
    best_cost: f64,
    best_perm: TensorAndIndexPermutation,
    best_tiling: Vec<i64>,
}

impl<'f, 'p> StencilEngine<'f, 'p> {
    /// Create an engine for one band. Engines are single-use: one instance
    /// per attempt, never shared.
    pub fn new(policy: &'p dyn StencilPolicy, func: &'f FuncOp, band_idx: usize) -> Self {
        Self {
            policy,
            cx: StencilContext::new(func, band_idx),
            best_cost: f64::INFINITY,
            best_perm: TensorAndIndexPermutation::default(),
            best_tiling: Vec::new(),
        }
    }

    /// Run capture and both searches; return the minimum-cost candidate,
    /// or `None` if the band does not match or no candidate has finite
    /// cost.
    pub fn search(mut self) -> Option<(f64, TensorAndIndexPermutation, Vec<i64>)> {
        let bundle = match self.policy.capture(self.cx.band()) {
            Some(bundle) => bundle,
            None => {
                trace!("band body did not match the stencil pattern");
                return None;
            }
        };
        let io_ops = bundle.io_ops();
        self.bind_indexes(&io_ops);

        if self.best_cost.is_finite() {
            Some((self.best_cost, self.best_perm, self.best_tiling))
        } else {
            None
        }
    }

    /// Enumerate all legal role bindings for the captured operations.
    fn bind_indexes(&mut self, io_ops: &[OpId]) {
        // Candidate pool: every band-local index referenced by a captured
        // operation's address. Ordered so the search is deterministic.
        let mut pool = BTreeSet::new();
        for &op in io_ops {
            if let Some(info) = self.cx.stride_info(op) {
                for (idx, _) in info.iter() {
                    if self.cx.is_own_index(idx) {
                        pool.insert(idx);
                    }
                }
            }
        }
        let pool: Vec<IndexId> = pool.into_iter().collect();
        trace!("binding pool: {:?}", pool);

        let mut bound = Vec::with_capacity(self.policy.semantic_idx_count());
        self.recursive_bind_index(io_ops, &pool, &mut bound);
    }

    fn recursive_bind_index(
        &mut self,
        io_ops: &[OpId],
        pool: &[IndexId],
        bound: &mut Vec<IndexId>,
    ) {
        let role = bound.len();
        if role == self.policy.semantic_idx_count() {
            let perm = TensorAndIndexPermutation {
                io_ops: io_ops.to_vec(),
                indexes: bound.clone(),
            };
            trace!("complete binding: {:?}", perm.indexes);
            let mut tile = Vec::with_capacity(role);
            self.recursive_tile_index(&perm, &mut tile);
            return;
        }

        for &idx in pool {
            // One index per role.
            if bound.contains(&idx) {
                continue;
            }
            let satisfies = (0..io_ops.len())
                .all(|slot| self.check_requirement(slot, role, io_ops[slot], idx));
            if satisfies {
                bound.push(idx);
                self.recursive_bind_index(io_ops, pool, bound);
                bound.pop();
            }
        }
    }

    fn check_requirement(&mut self, slot: usize, role: usize, op: OpId, idx: IndexId) -> bool {
        let req = match self.policy.requirements().get(&(slot, role)) {
            Some(req) => *req,
            None => return true,
        };
        match self.cx.stride_info(op) {
            Some(info) => req.accepts(info.stride_for(idx)),
            // No constant strides: nothing to check a requirement against.
            None => false,
        }
    }

    /// Enumerate the cartesian product of per-role tile candidates and
    /// score each full tile vector.
    fn recursive_tile_index(&mut self, perm: &TensorAndIndexPermutation, tile: &mut Vec<i64>) {
        let role = tile.len();
        if role == perm.indexes.len() {
            let policy = self.policy;
            let cost = policy.cost(&mut self.cx, perm, tile);
            trace!("tiling {:?}: cost = {}", tile, cost);
            if cost < self.best_cost {
                debug!(
                    "new best candidate: cost = {}, indexes = {:?}, tiling = {:?}",
                    cost, perm.indexes, tile
                );
                self.best_cost = cost;
                self.best_perm = perm.clone();
                self.best_tiling = tile.clone();
            }
            return;
        }

        let idx = perm.indexes[role];
        debug_assert!(
            self.cx.is_own_index(idx),
            "bound index {} does not belong to the band",
            idx
        );
        let range = self.cx.idx_range(idx);
        for t in self.policy.tiling_generators()[role].candidates(range) {
            tile.push(t);
            self.recursive_tile_index(perm, tile);
            tile.pop();
        }
    }
}
