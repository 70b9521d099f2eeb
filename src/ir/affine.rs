//! Affine expressions and maps for memory addressing.
//!
//! An affine expression is built over positional dimensions `d0, d1, ...`
//! and integer constants. A map bundles one expression per output dimension;
//! an [`AccessMap`] additionally binds each map dimension to a concrete index
//! variable, which is how body operations address buffers.
//!
//! `FloorDiv`, `Mod`, and products of two non-constant subtrees are
//! representable but not affine for stride purposes; the stride oracle
//! reports such accesses as non-constant.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ir::loops::IndexId;
use crate::utils::errors::IrError;

/// An expression over positional dimensions and integer constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AffineExpr {
    /// Integer constant
    Const(i64),
    /// Positional dimension `d<n>`
    Dim(usize),
    /// Sum of two subexpressions
    Add(Box<AffineExpr>, Box<AffineExpr>),
    /// Product of two subexpressions
    Mul(Box<AffineExpr>, Box<AffineExpr>),
    /// Floor division by a constant
    FloorDiv(Box<AffineExpr>, i64),
    /// Remainder modulo a constant
    Mod(Box<AffineExpr>, i64),
}

impl AffineExpr {
    /// Expression for a single dimension.
    pub fn dim(d: usize) -> Self {
        AffineExpr::Dim(d)
    }

    /// Constant expression.
    pub fn constant(value: i64) -> Self {
        AffineExpr::Const(value)
    }

    /// Sum with another expression.
    pub fn add(self, rhs: AffineExpr) -> Self {
        AffineExpr::Add(Box::new(self), Box::new(rhs))
    }

    /// Product with a constant factor.
    pub fn times(self, factor: i64) -> Self {
        AffineExpr::Mul(Box::new(self), Box::new(AffineExpr::Const(factor)))
    }

    /// Floor division by a constant.
    pub fn floordiv(self, divisor: i64) -> Self {
        AffineExpr::FloorDiv(Box::new(self), divisor)
    }

    /// Remainder modulo a constant.
    pub fn rem(self, divisor: i64) -> Self {
        AffineExpr::Mod(Box::new(self), divisor)
    }

    /// Get the constant value if this expression contains no dimensions.
    pub fn as_constant(&self) -> Option<i64> {
        match self {
            AffineExpr::Const(c) => Some(*c),
            AffineExpr::Dim(_) => None,
            AffineExpr::Add(a, b) => Some(a.as_constant()? + b.as_constant()?),
            AffineExpr::Mul(a, b) => Some(a.as_constant()? * b.as_constant()?),
            AffineExpr::FloorDiv(a, d) => {
                let a = a.as_constant()?;
                (*d != 0).then(|| a.div_euclid(*d))
            }
            AffineExpr::Mod(a, d) => {
                let a = a.as_constant()?;
                (*d != 0).then(|| a.rem_euclid(*d))
            }
        }
    }

    /// Rewrite the expression with `repl[i]` substituted for `Dim(i)`.
    ///
    /// Dimensions must be in range for `repl`; a reference past the end is a
    /// caller contract violation.
    pub fn substitute(&self, repl: &[AffineExpr]) -> AffineExpr {
        match self {
            AffineExpr::Const(c) => AffineExpr::Const(*c),
            AffineExpr::Dim(d) => repl[*d].clone(),
            AffineExpr::Add(a, b) => {
                AffineExpr::Add(Box::new(a.substitute(repl)), Box::new(b.substitute(repl)))
            }
            AffineExpr::Mul(a, b) => {
                AffineExpr::Mul(Box::new(a.substitute(repl)), Box::new(b.substitute(repl)))
            }
            AffineExpr::FloorDiv(a, d) => AffineExpr::FloorDiv(Box::new(a.substitute(repl)), *d),
            AffineExpr::Mod(a, d) => AffineExpr::Mod(Box::new(a.substitute(repl)), *d),
        }
    }

    /// Decompose into `constant + sum(coeff[d] * d)` form.
    ///
    /// Returns `None` if the expression is not affine in its dimensions:
    /// any `FloorDiv`, any `Mod`, or a product of two non-constant subtrees.
    pub fn linear_coeffs(&self, num_dims: usize) -> Option<(i64, Vec<i64>)> {
        match self {
            AffineExpr::Const(c) => Some((*c, vec![0; num_dims])),
            AffineExpr::Dim(d) => {
                let mut coeffs = vec![0; num_dims];
                if *d >= num_dims {
                    return None;
                }
                coeffs[*d] = 1;
                Some((0, coeffs))
            }
            AffineExpr::Add(a, b) => {
                let (ca, va) = a.linear_coeffs(num_dims)?;
                let (cb, vb) = b.linear_coeffs(num_dims)?;
                let coeffs = va.iter().zip(&vb).map(|(x, y)| x + y).collect();
                Some((ca + cb, coeffs))
            }
            AffineExpr::Mul(a, b) => {
                // Linear only when at least one factor is constant.
                if let Some(k) = a.as_constant() {
                    let (c, v) = b.linear_coeffs(num_dims)?;
                    Some((c * k, v.iter().map(|x| x * k).collect()))
                } else if let Some(k) = b.as_constant() {
                    let (c, v) = a.linear_coeffs(num_dims)?;
                    Some((c * k, v.iter().map(|x| x * k).collect()))
                } else {
                    None
                }
            }
            AffineExpr::FloorDiv(..) | AffineExpr::Mod(..) => None,
        }
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffineExpr::Const(c) => write!(f, "{}", c),
            AffineExpr::Dim(d) => write!(f, "d{}", d),
            AffineExpr::Add(a, b) => write!(f, "{} + {}", a, b),
            AffineExpr::Mul(a, b) => write!(f, "{} * {}", a, b),
            AffineExpr::FloorDiv(a, d) => write!(f, "({}) floordiv {}", a, d),
            AffineExpr::Mod(a, d) => write!(f, "({}) mod {}", a, d),
        }
    }
}

/// A multi-result affine map over `num_dims` positional dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineMap {
    num_dims: usize,
    results: Vec<AffineExpr>,
}

impl AffineMap {
    /// Create a map from its result expressions.
    pub fn new(num_dims: usize, results: Vec<AffineExpr>) -> Self {
        Self { num_dims, results }
    }

    /// Identity map over `n` dimensions.
    pub fn identity(n: usize) -> Self {
        Self {
            num_dims: n,
            results: (0..n).map(AffineExpr::Dim).collect(),
        }
    }

    /// Number of input dimensions.
    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    /// Number of result expressions.
    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    /// The result expressions.
    pub fn results(&self) -> &[AffineExpr] {
        &self.results
    }

    /// Functional composition: `(self ∘ other)(d) = self(other(d))`.
    ///
    /// `other` must produce exactly as many results as `self` has
    /// dimensions.
    pub fn compose(&self, other: &AffineMap) -> AffineMap {
        debug_assert_eq!(
            self.num_dims,
            other.num_results(),
            "composition arity mismatch"
        );
        AffineMap {
            num_dims: other.num_dims,
            results: self
                .results
                .iter()
                .map(|e| e.substitute(other.results()))
                .collect(),
        }
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for d in 0..self.num_dims {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "d{}", d)?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", r)?;
        }
        write!(f, ")")
    }
}

/// An affine map together with the index variables bound to its dimensions.
///
/// `operands[i]` is the index variable standing in for `Dim(i)`; the same
/// index may be bound to several dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMap {
    /// The address computation
    pub map: AffineMap,
    /// Index variables bound to the map dimensions, in order
    pub operands: Vec<IndexId>,
}

impl AccessMap {
    /// Create an access map; the operand count must match the map's
    /// dimension count.
    pub fn new(map: AffineMap, operands: Vec<IndexId>) -> Result<Self, IrError> {
        if map.num_dims() != operands.len() {
            return Err(IrError::ArityMismatch {
                expected: map.num_dims(),
                found: operands.len(),
            });
        }
        Ok(Self { map, operands })
    }

    /// Identity access: one result per operand, each addressing one
    /// dimension directly.
    pub fn identity(operands: Vec<IndexId>) -> Self {
        Self {
            map: AffineMap::identity(operands.len()),
            operands,
        }
    }

    /// Number of addressed buffer dimensions.
    pub fn rank(&self) -> usize {
        self.map.num_results()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_coeffs() {
        // 3*d0 + d1 + 7
        let e = AffineExpr::dim(0)
            .times(3)
            .add(AffineExpr::dim(1))
            .add(AffineExpr::constant(7));
        assert_eq!(e.linear_coeffs(2), Some((7, vec![3, 1])));
    }

    #[test]
    fn test_linear_coeffs_rejects_nonaffine() {
        let div = AffineExpr::dim(0).floordiv(4);
        assert_eq!(div.linear_coeffs(1), None);

        let prod = AffineExpr::Mul(
            Box::new(AffineExpr::dim(0)),
            Box::new(AffineExpr::dim(1)),
        );
        assert_eq!(prod.linear_coeffs(2), None);
    }

    #[test]
    fn test_constant_folding() {
        let e = AffineExpr::constant(6).times(7);
        assert_eq!(e.as_constant(), Some(42));
        assert_eq!(AffineExpr::dim(0).as_constant(), None);
    }

    #[test]
    fn test_compose() {
        // outer: (d0, d1) -> (d0 * 64 + d1)
        let outer = AffineMap::new(
            2,
            vec![AffineExpr::dim(0).times(64).add(AffineExpr::dim(1))],
        );
        // inner: (d0) -> (d0, 3)
        let inner = AffineMap::new(1, vec![AffineExpr::dim(0), AffineExpr::constant(3)]);
        let composed = outer.compose(&inner);
        assert_eq!(composed.num_dims(), 1);
        assert_eq!(composed.num_results(), 1);
        assert_eq!(composed.results()[0].linear_coeffs(1), Some((3, vec![64])));
    }

    #[test]
    fn test_access_map_arity() {
        let map = AffineMap::identity(2);
        assert!(AccessMap::new(map.clone(), vec![IndexId(0)]).is_err());
        assert!(AccessMap::new(map, vec![IndexId(0), IndexId(1)]).is_ok());
    }

    #[test]
    fn test_display() {
        let m = AffineMap::new(
            2,
            vec![AffineExpr::dim(0).times(8).add(AffineExpr::dim(1))],
        );
        assert_eq!(format!("{}", m), "(d0, d1) -> (d0 * 8 + d1)");
    }
}
