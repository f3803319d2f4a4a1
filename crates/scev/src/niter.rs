//! Number of iterations.
//!
//! For a loop with a single analyzable exit condition `a cmp b`, the
//! count is derived from the evolutions of the two sides. The stored
//! result follows the stored-minus-one convention: a loop whose body runs
//! N times stores N-1, a condition false on entry (or anything
//! unanalyzable) stores `Top`, and a condition that can never fail stores
//! `Bot`.

use crate::analyze::ScevAnalyzer;
use crate::chrec::{Chrec, LoopId};
use crate::fold::{self, div_ceil, div_floor, divides};
use mill_ir::{Code, NodeId};

impl ScevAnalyzer<'_> {
    /// The stored iteration count of LOOP, memoized.
    pub fn number_of_iterations(&mut self, loop_id: LoopId) -> Chrec {
        if let Some(c) = self.niter_cache.get(&loop_id) {
            return c.clone();
        }
        let res = self.number_of_iterations_1(loop_id);
        tracing::debug!(target: "mill::scev", loop = loop_id, "niter = {}", res);
        self.niter_cache.insert(loop_id, res.clone());
        res
    }

    fn number_of_iterations_1(&mut self, loop_id: LoopId) -> Chrec {
        let Some(exit) = self.body.exit_condition(loop_id) else {
            return Chrec::Top;
        };
        let test = exit.test;
        let exit_when_true = exit.exit_when_true;

        let (mut code, opnd0, opnd1) = match self.arena.code(test) {
            // "while (x)" is "while (x != 0)".
            Code::SsaName => {
                let int = self.arena.int_type();
                let zero = self.arena.integer_zero(int);
                (Code::Ne, test, zero)
            }
            c if c.is_comparison() => (
                c,
                self.arena.op(test, 0).unwrap(),
                self.arena.op(test, 1).unwrap(),
            ),
            _ => return Chrec::Top,
        };

        // The stored test may guard the exit edge rather than the latch.
        if exit_when_true {
            code = code.invert_comparison();
        }

        let chrec0 = self.analyze_and_instantiate(loop_id, opnd0);
        let chrec1 = self.analyze_and_instantiate(loop_id, opnd1);

        let raw = self.first_iteration_non_satisfying(code, loop_id, &chrec0, &chrec1);
        match raw {
            Chrec::Bot => Chrec::Bot,
            Chrec::Val(id) => match self.arena.int_value(id) {
                // A loop that is not entered (or whose count we cannot
                // trust) has no stored count.
                Some(0) => Chrec::Top,
                Some(n) => fold::constant(self.arena, None, n - 1),
                None => Chrec::Top,
            },
            _ => Chrec::Top,
        }
    }

    fn analyze_and_instantiate(&mut self, loop_id: LoopId, op: NodeId) -> Chrec {
        let c = self.analyze(loop_id, op);
        let c = self.instantiate(loop_id, &c);
        if c.is_top() {
            // KEEP_IT_SYMBOLIC: fall back to the operand itself.
            Chrec::Val(op)
        } else {
            c
        }
    }

    /// The first iteration x of LOOP for which `chrec0(x) code chrec1(x)`
    /// does not hold: `Bot` when it always holds, `Top` when undecidable.
    fn first_iteration_non_satisfying(
        &mut self,
        code: Code,
        loop_id: LoopId,
        chrec0: &Chrec,
        chrec1: &Chrec,
    ) -> Chrec {
        // Canonicalize > and >= by swapping the sides.
        let (code, chrec0, chrec1) = match code {
            Code::Gt | Code::Ge => (code.swap_comparison(), chrec1, chrec0),
            _ => (code, chrec0, chrec1),
        };

        if chrec0.is_automatically_generated() || chrec1.is_automatically_generated() {
            return Chrec::Top;
        }

        match (
            chrec0.has_evolution_in(loop_id),
            chrec1.has_evolution_in(loop_id),
        ) {
            (false, false) => self.niter_noev_noev(code, chrec0, chrec1),
            (false, true) => self.niter_noev_ev(code, loop_id, chrec0, chrec1),
            (true, false) => self.niter_ev_noev(code, loop_id, chrec0, chrec1),
            // Both sides evolve: out of reach for now.
            (true, true) => Chrec::Top,
        }
    }

    fn chrec_int(&self, c: &Chrec) -> Option<i64> {
        match c {
            Chrec::Val(id) => self.arena.int_value(*id),
            _ => None,
        }
    }

    /// Neither side evolves: the condition is decided on entry.
    fn niter_noev_noev(&mut self, code: Code, chrec0: &Chrec, chrec1: &Chrec) -> Chrec {
        let (Some(init0), Some(init1)) = (
            self.chrec_int(chrec0.initial_condition()),
            self.chrec_int(chrec1.initial_condition()),
        ) else {
            return Chrec::Top;
        };
        if !chrec0.is_invariant() || !chrec1.is_invariant() {
            return Chrec::Top;
        }

        let holds = match code {
            Code::Le => init0 <= init1,
            Code::Lt => init0 < init1,
            Code::Eq => init0 == init1,
            Code::Ne => init0 != init1,
            _ => return Chrec::Top,
        };
        if holds {
            Chrec::Bot
        } else {
            fold::constant(self.arena, None, 0)
        }
    }

    /// CHREC0 is invariant, CHREC1 evolves in the loop.
    fn niter_noev_ev(
        &mut self,
        code: Code,
        loop_id: LoopId,
        chrec0: &Chrec,
        chrec1: &Chrec,
    ) -> Chrec {
        let ev1 = chrec1.evolution_function_in(loop_id);
        if !ev1.is_affine() {
            // Only polynomials of degree one are solved.
            return Chrec::Top;
        }
        let (Some(init0), Some(init1), Some(step1)) = (
            self.chrec_int(chrec0.initial_condition()),
            self.chrec_int(ev1.initial_condition()),
            ev1.evolution_part_in(loop_id)
                .and_then(|s| self.chrec_int(s)),
        ) else {
            return Chrec::Top;
        };
        if !chrec0.is_invariant() {
            return Chrec::Top;
        }

        match code {
            Code::Le => {
                // while (K <= {init1, +, step1})
                if init0 > init1 {
                    return fold::constant(self.arena, None, 0);
                }
                if step1 > 0 {
                    // Runs until wraparound; not modeled.
                    return Chrec::Top;
                }
                if step1 == 0 {
                    return Chrec::Bot;
                }
                let nb = div_floor(init1 - init0, step1.abs()) + 1;
                if init0 > init1 + nb * step1 {
                    fold::constant(self.arena, None, nb)
                } else {
                    Chrec::Top
                }
            }
            Code::Lt => {
                if init0 >= init1 {
                    return fold::constant(self.arena, None, 0);
                }
                if step1 > 0 {
                    return Chrec::Top;
                }
                if step1 == 0 {
                    return Chrec::Bot;
                }
                let nb = div_ceil(init1 - init0, step1.abs());
                if init0 >= init1 + nb * step1 {
                    fold::constant(self.arena, None, nb)
                } else {
                    Chrec::Top
                }
            }
            Code::Eq => {
                if init0 != init1 {
                    return fold::constant(self.arena, None, 0);
                }
                if step1 == 0 {
                    Chrec::Bot
                } else {
                    fold::constant(self.arena, None, 1)
                }
            }
            Code::Ne => self.niter_ne(init1, step1, init0),
            _ => Chrec::Top,
        }
    }

    /// CHREC0 evolves in the loop, CHREC1 is invariant.
    fn niter_ev_noev(
        &mut self,
        code: Code,
        loop_id: LoopId,
        chrec0: &Chrec,
        chrec1: &Chrec,
    ) -> Chrec {
        let ev0 = chrec0.evolution_function_in(loop_id);
        if !ev0.is_affine() {
            return Chrec::Top;
        }
        let (Some(init0), Some(step0), Some(init1)) = (
            self.chrec_int(ev0.initial_condition()),
            ev0.evolution_part_in(loop_id)
                .and_then(|s| self.chrec_int(s)),
            self.chrec_int(chrec1.initial_condition()),
        ) else {
            return Chrec::Top;
        };
        if !chrec1.is_invariant() {
            return Chrec::Top;
        }

        match code {
            Code::Le => {
                // while ({init0, +, step0} <= K)
                if init0 > init1 {
                    return fold::constant(self.arena, None, 0);
                }
                if step0 < 0 {
                    return Chrec::Top;
                }
                if step0 == 0 {
                    return Chrec::Bot;
                }
                let nb = div_floor(init1 - init0, step0) + 1;
                if init0 + nb * step0 > init1 {
                    fold::constant(self.arena, None, nb)
                } else {
                    Chrec::Top
                }
            }
            Code::Lt => {
                if init0 >= init1 {
                    return fold::constant(self.arena, None, 0);
                }
                if step0 < 0 {
                    return Chrec::Top;
                }
                if step0 == 0 {
                    return Chrec::Bot;
                }
                let nb = div_ceil(init1 - init0, step0);
                if init0 + nb * step0 >= init1 {
                    fold::constant(self.arena, None, nb)
                } else {
                    Chrec::Top
                }
            }
            Code::Eq => {
                if init0 != init1 {
                    return fold::constant(self.arena, None, 0);
                }
                if step0 == 0 {
                    Chrec::Bot
                } else {
                    fold::constant(self.arena, None, 1)
                }
            }
            Code::Ne => self.niter_ne(init0, step0, init1),
            _ => Chrec::Top,
        }
    }

    /// `while ({init, +, step} != limit)`: exact only when the step
    /// divides the distance and walks toward the limit.
    fn niter_ne(&mut self, init: i64, step: i64, limit: i64) -> Chrec {
        if init == limit {
            return fold::constant(self.arena, None, 0);
        }
        if step > 0 {
            if init < limit && divides(step, limit - init) {
                return fold::constant(self.arena, None, (limit - init) / step);
            }
            // Either walking away from the limit or stepping over it:
            // termination depends on wraparound.
            return Chrec::Top;
        }
        if step < 0 {
            if init > limit && divides(-step, init - limit) {
                return fold::constant(self.arena, None, (init - limit) / (-step));
            }
            return Chrec::Top;
        }
        Chrec::Bot
    }
}
