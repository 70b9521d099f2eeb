//! Tile-size candidate generators.
//!
//! A generator maps a loop range to the finite, ordered list of tile
//! extents the search will consider for that index. Generators are chosen
//! per semantic role by the stencil policy.

/// A source of tile-size candidates for one loop range.
pub trait TileSizeGenerator {
    /// Candidate tile extents for a loop of the given range, ascending.
    fn candidates(&self, range: i64) -> Vec<i64>;

    /// Get name of the generator.
    fn name(&self) -> &str;
}

/// Powers of two up to the range.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerOfTwoGenerator;

impl TileSizeGenerator for PowerOfTwoGenerator {
    fn candidates(&self, range: i64) -> Vec<i64> {
        let mut sizes = Vec::new();
        let mut t = 1;
        while t <= range {
            sizes.push(t);
            t *= 2;
        }
        sizes
    }

    fn name(&self) -> &str {
        "pow2"
    }
}

/// Exact divisors of the range, so every tile covers the range evenly.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvenTilingGenerator;

impl TileSizeGenerator for EvenTilingGenerator {
    fn candidates(&self, range: i64) -> Vec<i64> {
        (1..=range).filter(|t| range % t == 0).collect()
    }

    fn name(&self) -> &str {
        "even"
    }
}

/// A fixed candidate list, filtered to tiles no larger than the range.
#[derive(Debug, Clone, Default)]
pub struct FixedTilingGenerator {
    sizes: Vec<i64>,
}

impl FixedTilingGenerator {
    /// Create a generator over the given candidate sizes (ascending).
    pub fn new(sizes: Vec<i64>) -> Self {
        Self { sizes }
    }
}

impl TileSizeGenerator for FixedTilingGenerator {
    fn candidates(&self, range: i64) -> Vec<i64> {
        self.sizes.iter().copied().filter(|&t| t <= range).collect()
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two() {
        assert_eq!(PowerOfTwoGenerator.candidates(64), vec![1, 2, 4, 8, 16, 32, 64]);
        assert_eq!(PowerOfTwoGenerator.candidates(48), vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(PowerOfTwoGenerator.candidates(1), vec![1]);
    }

    #[test]
    fn test_even_tiling() {
        assert_eq!(EvenTilingGenerator.candidates(12), vec![1, 2, 3, 4, 6, 12]);
        assert_eq!(EvenTilingGenerator.candidates(7), vec![1, 7]);
    }

    #[test]
    fn test_fixed_tiling_respects_range() {
        let gen = FixedTilingGenerator::new(vec![16, 32, 64]);
        assert_eq!(gen.candidates(64), vec![16, 32, 64]);
        assert_eq!(gen.candidates(32), vec![16, 32]);
        assert_eq!(gen.candidates(8), Vec::<i64>::new());
    }
}
