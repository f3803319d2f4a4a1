//! Chrec algebra: folding, merging, and evaluation.
//!
//! Constants fold through the arena (so equal results share identity);
//! symbolic values combine into expression nodes. Anything the algebra
//! does not know how to fold becomes `Top`, never a wrong answer.

use crate::chrec::{Chrec, LoopId};
use mill_ir::{Arena, Code, NodeId};

/// Integer division rounding toward negative infinity.
pub fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Integer division rounding toward positive infinity.
pub fn div_ceil(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) == (b < 0)) {
        q + 1
    } else {
        q
    }
}

/// Does A divide B exactly?
pub fn divides(a: i64, b: i64) -> bool {
    a != 0 && b % a == 0
}

fn int_value(arena: &Arena, c: &Chrec) -> Option<i64> {
    match c {
        Chrec::Val(id) => arena.int_value(*id),
        _ => None,
    }
}

/// A constant chrec for VALUE, typed like WITNESS when possible.
pub fn constant(arena: &mut Arena, witness: Option<NodeId>, value: i64) -> Chrec {
    let ty = witness
        .and_then(|w| arena.ty(w))
        .unwrap_or_else(|| arena.int_type());
    Chrec::Val(arena.int_cst(ty, value))
}

fn fold_vals(arena: &mut Arena, code: Code, x: NodeId, y: NodeId) -> Chrec {
    match (arena.int_value(x), arena.int_value(y)) {
        (Some(a), Some(b)) => {
            let v = match code {
                Code::Plus => a.wrapping_add(b),
                Code::Minus => a.wrapping_sub(b),
                Code::Mult => a.wrapping_mul(b),
                _ => return Chrec::Top,
            };
            constant(arena, Some(x), v)
        }
        _ => {
            // Symbolic: build the expression tree, with the trivial
            // identities folded away.
            match code {
                Code::Plus if arena.is_integer_zero(x) => return Chrec::Val(y),
                Code::Plus | Code::Minus if arena.is_integer_zero(y) => return Chrec::Val(x),
                Code::Mult if arena.is_integer_one(x) => return Chrec::Val(y),
                Code::Mult if arena.is_integer_one(y) => return Chrec::Val(x),
                Code::Mult if arena.is_integer_zero(x) || arena.is_integer_zero(y) => {
                    return constant(arena, Some(x), 0);
                }
                _ => {}
            }
            let ty = arena.ty(x).or_else(|| arena.ty(y));
            Chrec::Val(arena.build2(code, ty, x, y))
        }
    }
}

/// `a + b` over chrecs.
pub fn fold_plus(arena: &mut Arena, a: &Chrec, b: &Chrec) -> Chrec {
    fold_plus_1(arena, Code::Plus, a, b)
}

/// `a - b` over chrecs.
pub fn fold_minus(arena: &mut Arena, a: &Chrec, b: &Chrec) -> Chrec {
    fold_plus_1(arena, Code::Minus, a, b)
}

fn fold_plus_1(arena: &mut Arena, code: Code, a: &Chrec, b: &Chrec) -> Chrec {
    if a.is_top() || b.is_top() {
        return Chrec::Top;
    }
    if a.is_bot() || b.is_bot() {
        return Chrec::Bot;
    }

    match (a, b) {
        (
            Chrec::Poly { loop_id: la, left: al, right: ar },
            Chrec::Poly { loop_id: lb, left: bl, right: br },
        ) => {
            if la == lb {
                let left = fold_plus_1(arena, code, al, bl);
                let right = fold_plus_1(arena, code, ar, br);
                // {x, +, 0} is x.
                if int_value(arena, &right) == Some(0) {
                    left
                } else {
                    Chrec::poly(*la, left, right)
                }
            } else if la < lb {
                // B's loop is inner; fold A into its left part.
                let left = fold_plus_1(arena, code, a, bl);
                let right = if code == Code::Minus {
                    fold_negate(arena, br)
                } else {
                    (**br).clone()
                };
                Chrec::poly(*lb, left, right)
            } else {
                let left = fold_plus_1(arena, code, al, b);
                Chrec::poly(*la, left, (**ar).clone())
            }
        }

        (Chrec::Poly { loop_id, left, right }, other) if !matches!(other, Chrec::Expo { .. }) => {
            let l = fold_plus_1(arena, code, left, other);
            Chrec::poly(*loop_id, l, (**right).clone())
        }

        (other, Chrec::Poly { loop_id, left, right }) if !matches!(other, Chrec::Expo { .. }) => {
            let l = fold_plus_1(arena, code, other, left);
            let r = if code == Code::Minus {
                fold_negate(arena, right)
            } else {
                (**right).clone()
            };
            Chrec::poly(*loop_id, l, r)
        }

        (Chrec::Val(x), Chrec::Val(y)) => fold_vals(arena, code, *x, *y),

        (Chrec::Interval { lo: alo, hi: ahi }, Chrec::Interval { lo: blo, hi: bhi }) => {
            if code == Code::Plus {
                Chrec::interval(
                    fold_plus_1(arena, code, alo, blo),
                    fold_plus_1(arena, code, ahi, bhi),
                )
            } else {
                Chrec::interval(
                    fold_plus_1(arena, code, alo, bhi),
                    fold_plus_1(arena, code, ahi, blo),
                )
            }
        }

        (Chrec::Interval { lo, hi }, v @ Chrec::Val(_)) => Chrec::interval(
            fold_plus_1(arena, code, lo, v),
            fold_plus_1(arena, code, hi, v),
        ),
        (v @ Chrec::Val(_), Chrec::Interval { lo, hi }) => Chrec::interval(
            fold_plus_1(arena, code, v, lo),
            fold_plus_1(arena, code, v, hi),
        ),

        // Exponential and peeled mixtures are beyond this algebra.
        _ => Chrec::Top,
    }
}

/// `a * b` over chrecs.
pub fn fold_multiply(arena: &mut Arena, a: &Chrec, b: &Chrec) -> Chrec {
    if a.is_top() || b.is_top() {
        return Chrec::Top;
    }
    if a.is_bot() || b.is_bot() {
        return Chrec::Bot;
    }

    match (a, b) {
        (Chrec::Val(x), Chrec::Val(y)) => fold_vals(arena, Code::Mult, *x, *y),

        (Chrec::Poly { loop_id, left, right }, v @ Chrec::Val(_))
        | (v @ Chrec::Val(_), Chrec::Poly { loop_id, left, right }) => {
            if int_value(arena, v) == Some(0) {
                return constant(arena, None, 0);
            }
            if int_value(arena, v) == Some(1) {
                return Chrec::poly(*loop_id, (**left).clone(), (**right).clone());
            }
            Chrec::poly(
                *loop_id,
                fold_multiply(arena, left, v),
                fold_multiply(arena, right, v),
            )
        }

        (Chrec::Expo { loop_id, left, right }, v @ Chrec::Val(_))
        | (v @ Chrec::Val(_), Chrec::Expo { loop_id, left, right }) => Chrec::expo(
            *loop_id,
            fold_multiply(arena, left, v),
            (**right).clone(),
        ),

        // The product of two evolutions mixes polynomial degrees we do
        // not track.
        _ => Chrec::Top,
    }
}

/// `-a` over chrecs.
pub fn fold_negate(arena: &mut Arena, a: &Chrec) -> Chrec {
    let minus_one = constant(arena, None, -1);
    fold_multiply(arena, a, &minus_one)
}

/// Evaluate CHREC at iteration X of LOOP. Only affine evolutions are
/// evaluated; everything else is `Top`.
pub fn apply(arena: &mut Arena, loop_id: LoopId, chrec: &Chrec, x: &Chrec) -> Chrec {
    match chrec {
        Chrec::Poly { loop_id: l, left, right } if *l == loop_id => {
            if !chrec.is_affine() {
                return Chrec::Top;
            }
            let scaled = fold_multiply(arena, right, x);
            fold_plus(arena, left, &scaled)
        }
        Chrec::Val(_) => chrec.clone(),
        _ => Chrec::Top,
    }
}

/// Merge the information from two evolutions reaching the same place
/// along different paths.
pub fn merge(arena: &mut Arena, a: &Chrec, b: &Chrec) -> Chrec {
    if a == b {
        return a.clone();
    }
    match (int_value(arena, a), int_value(arena, b)) {
        (Some(x), Some(y)) => {
            let lo = constant(arena, None, x.min(y));
            let hi = constant(arena, None, x.max(y));
            Chrec::interval(lo, hi)
        }
        _ => Chrec::Top,
    }
}

/// Try to collapse a peeled chrec `(first, rest)_l` into a polynomial:
/// possible when `rest` is `{a, +, s}_l` with `a == first + s`.
pub fn simplify_peeled(arena: &mut Arena, chrec: &Chrec) -> Chrec {
    let Chrec::Peeled { loop_id, first, rest } = chrec else {
        return chrec.clone();
    };
    if let Chrec::Poly { loop_id: rl, left, right } = &**rest
        && rl == loop_id
        && let (Some(f), Some(a), Some(s)) = (
            int_value(arena, first),
            int_value(arena, left),
            int_value(arena, right),
        )
        && a == f + s
    {
        return Chrec::poly(*loop_id, (**first).clone(), (**right).clone());
    }
    chrec.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cst(a: &mut Arena, v: i64) -> Chrec {
        constant(a, None, v)
    }

    #[test]
    fn test_div_floor_and_ceil() {
        // C99 identities for the truncating pair, and the floor/ceil
        // relations against them.
        assert_eq!(div_floor(7, 2), 3);
        assert_eq!(div_floor(-7, 2), -4);
        assert_eq!(div_floor(7, -2), -4);
        assert_eq!(div_ceil(7, 2), 4);
        assert_eq!(div_ceil(-7, 2), -3);
        assert_eq!(div_ceil(-7, -2), 4);
        for a in [-9i64, -4, 0, 5, 13] {
            for b in [-3i64, -2, 1, 4] {
                assert_eq!((a / b) * b + a % b, a);
                assert!(div_floor(a, b) <= a / b || b == 0);
                assert!(div_ceil(a, b) >= a / b);
            }
        }
    }

    #[test]
    fn test_constant_folding_interns() {
        let mut a = Arena::new();
        let two = cst(&mut a, 2);
        let three = cst(&mut a, 3);
        let five = fold_plus(&mut a, &two, &three);
        assert_eq!(five, cst(&mut a, 5));
    }

    #[test]
    fn test_poly_plus_constant_goes_left() {
        let mut a = Arena::new();
        let p = Chrec::poly(1, cst(&mut a, 0), cst(&mut a, 1));
        let four = cst(&mut a, 4);
        let sum = fold_plus(&mut a, &p, &four);
        assert_eq!(sum, Chrec::poly(1, cst(&mut a, 4), cst(&mut a, 1)));
    }

    #[test]
    fn test_poly_plus_poly_same_loop() {
        let mut a = Arena::new();
        let p = Chrec::poly(1, cst(&mut a, 1), cst(&mut a, 2));
        let q = Chrec::poly(1, cst(&mut a, 3), cst(&mut a, 4));
        let sum = fold_plus(&mut a, &p, &q);
        assert_eq!(sum, Chrec::poly(1, cst(&mut a, 4), cst(&mut a, 6)));
    }

    #[test]
    fn test_poly_minus_poly_cancels_step() {
        let mut a = Arena::new();
        let p = Chrec::poly(1, cst(&mut a, 5), cst(&mut a, 2));
        let q = Chrec::poly(1, cst(&mut a, 1), cst(&mut a, 2));
        let diff = fold_minus(&mut a, &p, &q);
        assert_eq!(diff, cst(&mut a, 4));
    }

    #[test]
    fn test_multiply_scales_both_parts() {
        let mut a = Arena::new();
        let p = Chrec::poly(1, cst(&mut a, 1), cst(&mut a, 2));
        let three = cst(&mut a, 3);
        let prod = fold_multiply(&mut a, &p, &three);
        assert_eq!(prod, Chrec::poly(1, cst(&mut a, 3), cst(&mut a, 6)));
    }

    #[test]
    fn test_apply_affine() {
        let mut a = Arena::new();
        let p = Chrec::poly(1, cst(&mut a, 10), cst(&mut a, 3));
        let five = cst(&mut a, 5);
        assert_eq!(apply(&mut a, 1, &p, &five), cst(&mut a, 25));
    }

    #[test]
    fn test_merge_constants_makes_interval() {
        let mut a = Arena::new();
        let two = cst(&mut a, 2);
        let seven = cst(&mut a, 7);
        let m = merge(&mut a, &seven, &two);
        assert_eq!(m, Chrec::interval(cst(&mut a, 2), cst(&mut a, 7)));
    }

    #[test]
    fn test_top_absorbs() {
        let mut a = Arena::new();
        let two = cst(&mut a, 2);
        assert!(fold_plus(&mut a, &Chrec::Top, &two).is_top());
        assert!(fold_multiply(&mut a, &two, &Chrec::Top).is_top());
    }

    #[test]
    fn test_simplify_peeled_to_poly() {
        let mut a = Arena::new();
        // (0, {1, +, 1}_1)_1  is  {0, +, 1}_1.
        let rest = Chrec::poly(1, cst(&mut a, 1), cst(&mut a, 1));
        let peeled = Chrec::peeled(1, cst(&mut a, 0), rest);
        let s = simplify_peeled(&mut a, &peeled);
        assert_eq!(s, Chrec::poly(1, cst(&mut a, 0), cst(&mut a, 1)));
    }

    #[test]
    fn test_simplify_peeled_keeps_irregular() {
        let mut a = Arena::new();
        let rest = Chrec::poly(1, cst(&mut a, 7), cst(&mut a, 1));
        let peeled = Chrec::peeled(1, cst(&mut a, 0), rest.clone());
        let s = simplify_peeled(&mut a, &peeled);
        assert_eq!(s, Chrec::peeled(1, cst(&mut a, 0), rest));
    }
}
