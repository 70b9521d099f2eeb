//! Target hardware descriptions consumed by cost models.

pub mod heatmap;

pub use heatmap::{HeatmapTable, KernelCost, KernelCostModel, DEFAULT_HEATMAP};
