//! Chains of recurrences.
//!
//! A chrec is a closed-form description of how a scalar varies across the
//! iterations of a loop nest:
//!
//! ```text
//! {left, +, right}_l      left + x * right     (Poly)
//! {left, *, right}_l      left * right ^ x     (Expo)
//! (first, rest)_l         first on iteration 0, rest afterwards (Peeled)
//! [lo, hi]                a bounded interval
//! ```
//!
//! where `x` is the iteration counter of loop `l`. The `left` part may
//! itself be a chrec of a strictly outer loop; the `right` part is always
//! invariant in its own loop.

use mill_ir::NodeId;
use std::fmt;

/// Dense loop identifier. The loop table assigns ids so that an inner
/// loop always has a larger id than every loop containing it.
pub type LoopId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Chrec {
    /// A loop-invariant value: a constant or a symbolic IR expression
    /// (SSA name, declaration, or a tree over those).
    Val(NodeId),
    Poly {
        loop_id: LoopId,
        left: Box<Chrec>,
        right: Box<Chrec>,
    },
    Expo {
        loop_id: LoopId,
        left: Box<Chrec>,
        right: Box<Chrec>,
    },
    Peeled {
        loop_id: LoopId,
        first: Box<Chrec>,
        rest: Box<Chrec>,
    },
    Interval {
        lo: Box<Chrec>,
        hi: Box<Chrec>,
    },
    /// Unknown: the analyzer could not say anything.
    Top,
    /// Never taken / infinite (the condition can never fail).
    Bot,
}

impl Chrec {
    pub fn poly(loop_id: LoopId, left: Chrec, right: Chrec) -> Chrec {
        Chrec::Poly {
            loop_id,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn expo(loop_id: LoopId, left: Chrec, right: Chrec) -> Chrec {
        Chrec::Expo {
            loop_id,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn peeled(loop_id: LoopId, first: Chrec, rest: Chrec) -> Chrec {
        Chrec::Peeled {
            loop_id,
            first: Box::new(first),
            rest: Box::new(rest),
        }
    }

    pub fn interval(lo: Chrec, hi: Chrec) -> Chrec {
        Chrec::Interval {
            lo: Box::new(lo),
            hi: Box::new(hi),
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Chrec::Top)
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Chrec::Bot)
    }

    /// One of the sentinels generated by the analyzer itself.
    pub fn is_automatically_generated(&self) -> bool {
        self.is_top() || self.is_bot()
    }

    /// A plain value with no evolution anywhere.
    pub fn is_invariant(&self) -> bool {
        matches!(self, Chrec::Val(_))
    }

    /// Does this function evolve in LOOP? The right parts are invariant
    /// by construction, so only the head and the left spine are checked.
    pub fn has_evolution_in(&self, loop_id: LoopId) -> bool {
        match self {
            Chrec::Poly { loop_id: l, left, .. }
            | Chrec::Expo { loop_id: l, left, .. }
            | Chrec::Peeled { loop_id: l, first: left, .. } => {
                *l == loop_id || left.has_evolution_in(loop_id)
            }
            _ => false,
        }
    }

    /// Affine: `{invariant, +, invariant}` in a single loop.
    pub fn is_affine(&self) -> bool {
        match self {
            Chrec::Poly { left, right, .. } => left.is_invariant() && right.is_invariant(),
            _ => false,
        }
    }

    /// The value on entry: the leftmost leaf of the spine.
    pub fn initial_condition(&self) -> &Chrec {
        match self {
            Chrec::Poly { left, .. } | Chrec::Expo { left, .. } => left.initial_condition(),
            Chrec::Peeled { first, .. } => first.initial_condition(),
            other => other,
        }
    }

    /// The step of the evolution in LOOP, if there is one on the spine.
    pub fn evolution_part_in(&self, loop_id: LoopId) -> Option<&Chrec> {
        match self {
            Chrec::Poly { loop_id: l, left, right } | Chrec::Expo { loop_id: l, left, right } => {
                if *l == loop_id {
                    Some(right)
                } else {
                    left.evolution_part_in(loop_id)
                }
            }
            _ => None,
        }
    }

    /// Restrict the function to its behavior in LOOP, dropping evolutions
    /// of other loops along the spine.
    pub fn evolution_function_in(&self, loop_id: LoopId) -> Chrec {
        match self {
            Chrec::Poly { loop_id: l, left, right } => {
                if *l == loop_id {
                    Chrec::poly(
                        loop_id,
                        left.evolution_function_in(loop_id),
                        (**right).clone(),
                    )
                } else {
                    left.evolution_function_in(loop_id)
                }
            }
            Chrec::Expo { loop_id: l, left, right } => {
                if *l == loop_id {
                    Chrec::expo(
                        loop_id,
                        left.evolution_function_in(loop_id),
                        (**right).clone(),
                    )
                } else {
                    left.evolution_function_in(loop_id)
                }
            }
            other => other.clone(),
        }
    }

    /// Does the chrec mention any symbolic (non-constant) IR values? Used
    /// to decide whether instantiation has more work to do.
    pub fn contains_symbols(&self, arena: &mill_ir::Arena) -> bool {
        match self {
            Chrec::Val(id) => !arena.code(*id).is_constant(),
            Chrec::Poly { left, right, .. } | Chrec::Expo { left, right, .. } => {
                left.contains_symbols(arena) || right.contains_symbols(arena)
            }
            Chrec::Peeled { first, rest, .. } => {
                first.contains_symbols(arena) || rest.contains_symbols(arena)
            }
            Chrec::Interval { lo, hi } => {
                lo.contains_symbols(arena) || hi.contains_symbols(arena)
            }
            Chrec::Top | Chrec::Bot => false,
        }
    }

    pub fn contains_top(&self) -> bool {
        match self {
            Chrec::Top => true,
            Chrec::Val(_) | Chrec::Bot => false,
            Chrec::Poly { left, right, .. } | Chrec::Expo { left, right, .. } => {
                left.contains_top() || right.contains_top()
            }
            Chrec::Peeled { first, rest, .. } => first.contains_top() || rest.contains_top(),
            Chrec::Interval { lo, hi } => lo.contains_top() || hi.contains_top(),
        }
    }
}

impl fmt::Display for Chrec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chrec::Val(id) => write!(f, "v{}", id.index()),
            Chrec::Poly { loop_id, left, right } => {
                write!(f, "{{{}, +, {}}}_{}", left, right, loop_id)
            }
            Chrec::Expo { loop_id, left, right } => {
                write!(f, "{{{}, *, {}}}_{}", left, right, loop_id)
            }
            Chrec::Peeled { loop_id, first, rest } => {
                write!(f, "({}, {})_{}", first, rest, loop_id)
            }
            Chrec::Interval { lo, hi } => write!(f, "[{}, {}]", lo, hi),
            Chrec::Top => write!(f, "[-oo, +oo]"),
            Chrec::Bot => write!(f, "_|_"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_ir::Arena;

    #[test]
    fn test_has_evolution_in() {
        let mut a = Arena::new();
        let int = a.int_type();
        let zero = a.integer_zero(int);
        let one = a.integer_one(int);
        let c = Chrec::poly(1, Chrec::Val(zero), Chrec::Val(one));
        assert!(c.has_evolution_in(1));
        assert!(!c.has_evolution_in(2));
        assert!(c.is_affine());
    }

    #[test]
    fn test_initial_condition_walks_spine() {
        let mut a = Arena::new();
        let int = a.int_type();
        let zero = a.integer_zero(int);
        let one = a.integer_one(int);
        let two = a.int_cst(int, 2);
        let inner = Chrec::poly(1, Chrec::Val(zero), Chrec::Val(one));
        let nested = Chrec::poly(2, inner, Chrec::Val(two));
        assert_eq!(nested.initial_condition(), &Chrec::Val(zero));
        assert_eq!(nested.evolution_part_in(1), Some(&Chrec::Val(one)));
        assert_eq!(nested.evolution_part_in(2), Some(&Chrec::Val(two)));
    }

    #[test]
    fn test_nested_affinity() {
        let mut a = Arena::new();
        let int = a.int_type();
        let zero = a.integer_zero(int);
        let one = a.integer_one(int);
        let inner = Chrec::poly(1, Chrec::Val(zero), Chrec::Val(one));
        let nested = Chrec::poly(2, inner.clone(), Chrec::Val(one));
        // Multivariate is not affine, but its restriction to loop 2 is.
        assert!(!nested.is_affine());
        assert!(nested.evolution_function_in(2).is_affine());
        assert!(nested.evolution_function_in(1).is_affine());
    }
}
