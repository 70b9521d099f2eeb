//! Hardware calibration table for the fused multiply-accumulate kernel.
//!
//! The stencil cost model consults a table of measured kernel throughputs,
//! keyed by tile shape in the kernel's `(n, m, k)` operand order. A tile
//! shape with no entry reports zero throughput, which the cost model treats
//! as infeasible.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Calibration entry for one tile shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelCost {
    /// Sustained multiply-accumulate operations per cycle; zero means the
    /// tile shape is infeasible for the kernel
    pub throughput: f64,
    /// Fixed cycles spent entering the kernel
    pub startup_cost: f64,
}

impl KernelCost {
    /// The entry reported for tile shapes absent from a table.
    pub const INFEASIBLE: KernelCost = KernelCost {
        throughput: 0.0,
        startup_cost: 0.0,
    };

    /// Whether the kernel can execute this tile shape at all.
    pub fn is_feasible(&self) -> bool {
        self.throughput > 0.0
    }
}

/// A source of kernel calibration data.
pub trait KernelCostModel {
    /// Calibration entry for a tile, keyed in kernel `(n, m, k)` order.
    fn lookup(&self, tile: [i64; 3]) -> KernelCost;
}

/// An explicit calibration table.
#[derive(Debug, Clone, Default)]
pub struct HeatmapTable {
    entries: HashMap<[i64; 3], KernelCost>,
}

impl HeatmapTable {
    /// An empty table: every tile shape is infeasible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(tile, throughput, startup)` triples.
    pub fn from_entries(entries: impl IntoIterator<Item = ([i64; 3], f64, f64)>) -> Self {
        let mut table = Self::new();
        for (tile, throughput, startup) in entries {
            table.insert(tile, throughput, startup);
        }
        table
    }

    /// Add or replace one calibration entry.
    pub fn insert(&mut self, tile: [i64; 3], throughput: f64, startup_cost: f64) {
        self.entries.insert(
            tile,
            KernelCost {
                throughput,
                startup_cost,
            },
        );
    }

    /// Number of calibrated tile shapes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calibration data for an AVX-512 server core.
    ///
    /// Covers power-of-two tiles from 8 to 64 per dimension. The throughput
    /// figures follow the measured shape of libxsmm microkernels: efficiency
    /// grows with the m*n register block, peaks around 32x32, and falls off
    /// at 64 where the accumulator tile no longer fits the register file.
    /// Startup reflects dispatch overhead amortized over larger k.
    pub fn x86_avx512() -> Self {
        const SIZES: [i64; 4] = [8, 16, 32, 64];
        let mut table = Self::new();
        for &n in &SIZES {
            for &m in &SIZES {
                for &k in &SIZES {
                    let block_eff = match m * n {
                        0..=128 => 0.35,
                        129..=512 => 0.62,
                        513..=1024 => 0.88,
                        1025..=4096 => 0.97,
                        _ => 0.71,
                    };
                    let k_eff = match k {
                        8 => 0.72,
                        16 => 0.85,
                        32 => 0.95,
                        _ => 1.0,
                    };
                    // 2 FMA ports x 16 f32 lanes = 32 madds/cycle peak.
                    let throughput = 32.0 * block_eff * k_eff;
                    let startup = 220.0 + 1.5 * (m + n) as f64;
                    table.insert([n, m, k], throughput, startup);
                }
            }
        }
        table
    }
}

impl KernelCostModel for HeatmapTable {
    fn lookup(&self, tile: [i64; 3]) -> KernelCost {
        self.entries
            .get(&tile)
            .copied()
            .unwrap_or(KernelCost::INFEASIBLE)
    }
}

/// The default calibration used when a pass is constructed without an
/// explicit table.
pub static DEFAULT_HEATMAP: Lazy<HeatmapTable> = Lazy::new(HeatmapTable::x86_avx512);
