//! Symbolic inclusive intervals and the arithmetic used to push required
//! regions backwards through index expressions.
//!
//! Endpoints are `VarExpr`s, so a bound may mention params (`w - 1`) or
//! enclosing loop variables (`out.y.outer * 8`). Evaluating an expression
//! over an environment that does not bind one of its variables fails with
//! `UnboundedInterval`; the caller decides whether to fall back to a
//! conservative full-domain bound or to give up.

use std::collections::HashMap;

use crate::ast::VarExpr;
use crate::error::{Error, Result};
use crate::pretty_print::PrettyPrint;

/// An inclusive integer interval `[min, max]` with symbolic endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub min: VarExpr,
    pub max: VarExpr
}

impl Interval {
    pub fn new<U: Into<VarExpr>, V: Into<VarExpr>>(min: U, max: V) -> Interval {
        Interval {
            min: min.into().simplify(),
            max: max.into().simplify()
        }
    }

    /// The single-valued interval `[e, e]`.
    pub fn point<E: Into<VarExpr>>(e: E) -> Interval {
        let e = e.into().simplify();
        Interval { min: e.clone(), max: e }
    }

    /// A zero-based interval of the given extent, `[0, extent - 1]`.
    pub fn with_extent<E: Into<VarExpr>>(extent: E) -> Interval {
        Interval::new(0, extent.into() - 1)
    }

    pub fn extent(&self) -> VarExpr {
        (self.max.clone() - self.min.clone() + 1).simplify()
    }

    /// `Some(e)` when the extent folds to a compile-time constant.
    pub fn const_extent(&self) -> Option<i64> {
        self.extent().as_const()
    }

    /// True only when the interval provably contains no points.
    pub fn is_provably_empty(&self) -> bool {
        match self.const_extent() {
            Some(e) => e <= 0,
            None => false
        }
    }

    /// The smallest interval containing both inputs. Union, not
    /// intersection: distinct consumers may need disjoint regions and
    /// every one of them must be covered.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval {
            min: VarExpr::min(self.min.clone(), other.min.clone()).simplify(),
            max: VarExpr::max(self.max.clone(), other.max.clone()).simplify()
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Interval::new(
            self.min.clone() + other.min.clone(),
            self.max.clone() + other.max.clone()
        )
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        Interval::new(
            self.min.clone() - other.max.clone(),
            self.max.clone() - other.min.clone()
        )
    }

    /// Multiplication by a constant scales both ends, flipping them when
    /// the constant is negative.
    pub fn mul_const(&self, c: i64) -> Interval {
        if c >= 0 {
            Interval::new(self.min.clone() * c, self.max.clone() * c)
        } else {
            Interval::new(self.max.clone() * c, self.min.clone() * c)
        }
    }

    /// Multiplication by an expression of unknown sign: the convex hull
    /// of the four corner products.
    pub fn mul(&self, other: &Interval) -> Interval {
        if let Some(c) = point_const(other) {
            return self.mul_const(c);
        }
        if let Some(c) = point_const(self) {
            return other.mul_const(c);
        }
        let corners = [
            self.min.clone() * other.min.clone(),
            self.min.clone() * other.max.clone(),
            self.max.clone() * other.min.clone(),
            self.max.clone() * other.max.clone()
        ];
        Interval::new(
            VarExpr::min(
                VarExpr::min(corners[0].clone(), corners[1].clone()),
                VarExpr::min(corners[2].clone(), corners[3].clone())
            ),
            VarExpr::max(
                VarExpr::max(corners[0].clone(), corners[1].clone()),
                VarExpr::max(corners[2].clone(), corners[3].clone())
            )
        )
    }

    pub fn elementwise_min(&self, other: &Interval) -> Interval {
        Interval::new(
            VarExpr::min(self.min.clone(), other.min.clone()),
            VarExpr::min(self.max.clone(), other.max.clone())
        )
    }

    pub fn elementwise_max(&self, other: &Interval) -> Interval {
        Interval::new(
            VarExpr::max(self.min.clone(), other.min.clone()),
            VarExpr::max(self.max.clone(), other.max.clone())
        )
    }
}

impl PrettyPrint for Interval {
    fn pretty_print(&self) -> String {
        format!("[{}, {}]", self.min.pretty_print(), self.max.pretty_print())
    }

    fn is_leaf(&self) -> bool {
        true
    }
}

fn point_const(i: &Interval) -> Option<i64> {
    match (i.min.as_const(), i.max.as_const()) {
        (Some(a), Some(b)) if a == b => Some(a),
        _ => None
    }
}

/// Computes the interval an index expression ranges over when each
/// variable ranges over its interval in `env`. Params are treated as
/// symbolic points.
pub fn bounds_of(expr: &VarExpr, env: &HashMap<String, Interval>) -> Result<Interval> {
    match expr {
        VarExpr::Var(v) => env
            .get(v)
            .cloned()
            .ok_or_else(|| Error::UnboundedInterval { var: v.clone() }),
        VarExpr::Const(c) => Ok(Interval::point(*c)),
        VarExpr::Param(p) => Ok(Interval::point(VarExpr::param(p))),
        VarExpr::Add(l, r) => Ok(bounds_of(l, env)?.add(&bounds_of(r, env)?)),
        VarExpr::Sub(l, r) => Ok(bounds_of(l, env)?.sub(&bounds_of(r, env)?)),
        VarExpr::Mul(l, r) => Ok(bounds_of(l, env)?.mul(&bounds_of(r, env)?)),
        VarExpr::Div(l, r) => {
            let (l, r) = (bounds_of(l, env)?, bounds_of(r, env)?);
            match point_const(&r) {
                Some(c) if c > 0 => Ok(Interval::new(
                    VarExpr::Div(Box::new(l.min), Box::new(VarExpr::Const(c))),
                    VarExpr::Div(Box::new(l.max), Box::new(VarExpr::Const(c)))
                )),
                _ => Err(Error::UnboundedInterval { var: expr.pretty_print() })
            }
        },
        VarExpr::Min(l, r) => Ok(bounds_of(l, env)?.elementwise_min(&bounds_of(r, env)?)),
        VarExpr::Max(l, r) => Ok(bounds_of(l, env)?.elementwise_max(&bounds_of(r, env)?))
    }
}
