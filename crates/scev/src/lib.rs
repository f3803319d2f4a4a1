//! mill scalar evolution analyzer
//!
//! Derives closed-form chains of recurrences for the scalars of a loop
//! nest from an already-constructed SSA representation, and computes loop
//! iteration counts from single-exit conditions. Any construct the
//! analyzer does not understand yields `Top`; the analyzer itself never
//! fails.

pub mod analyze;
pub mod chrec;
pub mod fold;
pub mod niter;
pub mod ssa;

pub use analyze::ScevAnalyzer;
pub use chrec::{Chrec, LoopId};
pub use ssa::{ExitCondition, Loops, PhiArg, SsaBody, SsaDef};

#[cfg(test)]
mod tests {
    use super::*;
    use mill_ir::{Arena, Code, NodeId};

    struct Fixture {
        arena: Arena,
        body: SsaBody,
        loops: Loops,
        int: NodeId,
    }

    impl Fixture {
        fn new() -> Fixture {
            let mut arena = Arena::new();
            let int = arena.int_type();
            Fixture {
                arena,
                body: SsaBody::new(),
                loops: Loops::new(),
                int,
            }
        }

        fn name(&mut self, s: &str) -> NodeId {
            self.arena.ssa_name(s, self.int)
        }

        fn cst(&mut self, v: i64) -> NodeId {
            self.arena.int_cst(self.int, v)
        }

        /// `phi(entry, back)` in the header of LOOP.
        fn loop_phi(&mut self, name: NodeId, loop_id: LoopId, entry: NodeId, back: NodeId) {
            self.body.set_def(
                name,
                loop_id,
                SsaDef::Phi {
                    loop_id,
                    loop_phi: true,
                    args: vec![
                        PhiArg { value: entry, from_inside: false },
                        PhiArg { value: back, from_inside: true },
                    ],
                },
            );
        }

        fn assign(&mut self, name: NodeId, loop_id: LoopId, rhs: NodeId) {
            self.body.set_def(name, loop_id, SsaDef::Assign { rhs });
        }

        fn analyzer(&mut self) -> ScevAnalyzer<'_> {
            ScevAnalyzer::new(&mut self.arena, &self.body, &self.loops)
        }
    }

    fn val_of(f: &Fixture, c: &Chrec) -> Option<i64> {
        match c {
            Chrec::Val(id) => f.arena.int_value(*id),
            _ => None,
        }
    }

    #[test]
    fn test_constant_assignment_is_constant_everywhere() {
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let v = f.name("v_1");
        let five = f.cst(5);
        f.assign(v, l1, five);

        let mut a = f.analyzer();
        assert_eq!(a.analyze(l1, v), Chrec::Val(five));
        assert_eq!(a.analyze(0, v), Chrec::Val(five));
    }

    #[test]
    fn test_affine_induction_variable() {
        // i_1 = phi(0, i_2); i_2 = i_1 + 1  in loop 1.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let zero = f.cst(0);
        let one = f.cst(1);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        f.loop_phi(i1, l1, zero, i2);
        f.assign(i2, l1, step);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, i1);
        assert_eq!(ev, Chrec::poly(l1, Chrec::Val(zero), Chrec::Val(one)));
        assert!(ev.is_affine());
    }

    #[test]
    fn test_derived_induction_variable() {
        // i = {0, +, 1}; b_1 = i_1 * 2  gives  {0, +, 2}.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let b1 = f.name("b_1");
        let zero = f.cst(0);
        let one = f.cst(1);
        let two = f.cst(2);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        let double = f.arena.build2(Code::Mult, Some(f.int), i1, two);
        f.loop_phi(i1, l1, zero, i2);
        f.assign(i2, l1, step);
        f.assign(b1, l1, double);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, b1);
        assert_eq!(ev, Chrec::poly(l1, Chrec::Val(zero), Chrec::Val(two)));
    }

    #[test]
    fn test_decrementing_variable() {
        // i_1 = phi(10, i_2); i_2 = i_1 - 2.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let ten = f.cst(10);
        let two = f.cst(2);
        let step = f.arena.build2(Code::Minus, Some(f.int), i1, two);
        f.loop_phi(i1, l1, ten, i2);
        f.assign(i2, l1, step);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, i1);
        let int = a.arena.int_type();
        let minus_two = a.arena.int_cst(int, -2);
        assert_eq!(ev, Chrec::poly(l1, Chrec::Val(ten), Chrec::Val(minus_two)));
    }

    #[test]
    fn test_number_of_iterations_for_count_up_loop() {
        // for (i = 0; i < 10; i++): the stored count is 9.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let zero = f.cst(0);
        let one = f.cst(1);
        let ten = f.cst(10);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        let cond = f.arena.build2(Code::Lt, Some(f.int), i1, ten);
        f.loop_phi(i1, l1, zero, i2);
        f.assign(i2, l1, step);
        f.body.set_exit_condition(l1, cond, false);

        let mut a = f.analyzer();
        let n = a.number_of_iterations(l1);
        assert_eq!(val_of(&f, &n), Some(9));
    }

    #[test]
    fn test_number_of_iterations_ne_exact_division() {
        // while (i != 5), i from 2 step 1: three iterations, stored 2.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let two = f.cst(2);
        let one = f.cst(1);
        let five = f.cst(5);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        let cond = f.arena.build2(Code::Ne, Some(f.int), i1, five);
        f.loop_phi(i1, l1, two, i2);
        f.assign(i2, l1, step);
        f.body.set_exit_condition(l1, cond, false);

        let mut a = f.analyzer();
        let n = a.number_of_iterations(l1);
        assert_eq!(val_of(&f, &n), Some(2));
    }

    #[test]
    fn test_number_of_iterations_ne_non_dividing_step() {
        // while (i != 5), i from 2 step 2: steps over the limit.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let two = f.cst(2);
        let five = f.cst(5);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, two);
        let cond = f.arena.build2(Code::Ne, Some(f.int), i1, five);
        f.loop_phi(i1, l1, two, i2);
        f.assign(i2, l1, step);
        f.body.set_exit_condition(l1, cond, false);

        let mut a = f.analyzer();
        assert!(a.number_of_iterations(l1).is_top());
    }

    #[test]
    fn test_condition_false_on_entry_is_top() {
        // for (i = 20; i < 10; i++): never entered; demoted to Top.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let twenty = f.cst(20);
        let one = f.cst(1);
        let ten = f.cst(10);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        let cond = f.arena.build2(Code::Lt, Some(f.int), i1, ten);
        f.loop_phi(i1, l1, twenty, i2);
        f.assign(i2, l1, step);
        f.body.set_exit_condition(l1, cond, false);

        let mut a = f.analyzer();
        assert!(a.number_of_iterations(l1).is_top());
    }

    #[test]
    fn test_infinite_loop_is_bot() {
        // while (0 != 1) with no evolution anywhere.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let zero = f.cst(0);
        let one = f.cst(1);
        let cond = f.arena.build2(Code::Ne, Some(f.int), zero, one);
        f.body.set_exit_condition(l1, cond, false);

        let mut a = f.analyzer();
        assert!(a.number_of_iterations(l1).is_bot());
    }

    #[test]
    fn test_exit_when_true_inverts() {
        // if (i >= 10) break;  is the same loop as  while (i < 10).
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let zero = f.cst(0);
        let one = f.cst(1);
        let ten = f.cst(10);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        let cond = f.arena.build2(Code::Ge, Some(f.int), i1, ten);
        f.loop_phi(i1, l1, zero, i2);
        f.assign(i2, l1, step);
        f.body.set_exit_condition(l1, cond, true);

        let mut a = f.analyzer();
        let n = a.number_of_iterations(l1);
        assert_eq!(val_of(&f, &n), Some(9));
    }

    #[test]
    fn test_inner_loop_effect_composes() {
        // Outer loop 1: i_1 = phi(0, i_3).
        // Inner loop 2 runs 10 times, advancing j by 3 from i_1;
        // i_3 = j_1 on the way around.  The outer evolution is {0, +, 30}.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let l2 = f.loops.add_loop(l1);

        let i1 = f.name("i_1");
        let i3 = f.name("i_3");
        let j1 = f.name("j_1");
        let j2 = f.name("j_2");
        let k1 = f.name("k_1");
        let k2 = f.name("k_2");
        let zero = f.cst(0);
        let one = f.cst(1);
        let three = f.cst(3);
        let ten = f.cst(10);

        f.loop_phi(i1, l1, zero, i3);

        let jstep = f.arena.build2(Code::Plus, Some(f.int), j1, three);
        f.loop_phi(j1, l2, i1, j2);
        f.assign(j2, l2, jstep);

        let kstep = f.arena.build2(Code::Plus, Some(f.int), k1, one);
        let kcond = f.arena.build2(Code::Lt, Some(f.int), k1, ten);
        f.loop_phi(k1, l2, zero, k2);
        f.assign(k2, l2, kstep);
        f.body.set_exit_condition(l2, kcond, false);

        f.assign(i3, l1, j1);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, i1);
        let int = a.arena.int_type();
        let thirty = a.arena.int_cst(int, 30);
        assert_eq!(ev, Chrec::poly(l1, Chrec::Val(zero), Chrec::Val(thirty)));
    }

    #[test]
    fn test_unknown_inner_count_poisons_outer() {
        // Same shape, but the inner loop has no analyzable exit.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let l2 = f.loops.add_loop(l1);

        let i1 = f.name("i_1");
        let i3 = f.name("i_3");
        let j1 = f.name("j_1");
        let j2 = f.name("j_2");
        let zero = f.cst(0);
        let three = f.cst(3);

        f.loop_phi(i1, l1, zero, i3);
        let jstep = f.arena.build2(Code::Plus, Some(f.int), j1, three);
        f.loop_phi(j1, l2, i1, j2);
        f.assign(j2, l2, jstep);
        f.assign(i3, l1, j1);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, i1);
        // The cycle search fails; the result degrades to a peeled form
        // over an unknown steady state, not to a wrong polynomial.
        assert!(!ev.is_affine());
    }

    #[test]
    fn test_peeled_chrec_for_broken_cycle() {
        // a_1 = phi(0, p_1) with p_1 a parameter: no cycle, peeled.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let a1 = f.name("a_1");
        let p1 = f.name("p_1");
        let zero = f.cst(0);
        f.loop_phi(a1, l1, zero, p1);

        let mut an = f.analyzer();
        let ev = an.analyze(l1, a1);
        assert_eq!(
            ev,
            Chrec::peeled(l1, Chrec::Val(zero), Chrec::Val(p1))
        );
    }

    #[test]
    fn test_symbolic_initial_condition_instantiates() {
        // n_1 is a parameter; i_1 = phi(n_1, i_1 + 1). The evolution is
        // {n_1, +, 1} symbolically; instantiation keeps the parameter.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let n1 = f.name("n_1");
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let one = f.cst(1);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        f.loop_phi(i1, l1, n1, i2);
        f.assign(i2, l1, step);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, i1);
        assert_eq!(ev, Chrec::poly(l1, Chrec::Val(n1), Chrec::Val(one)));
        let inst = a.instantiate(l1, &ev);
        assert_eq!(inst, Chrec::poly(l1, Chrec::Val(n1), Chrec::Val(one)));
    }

    #[test]
    fn test_cyclic_instantiation_terminates() {
        // a_1 = phi(0, a_1 + b_1); b_1 = phi(1, b_1 + a_1): the two
        // evolutions mention each other; instantiation must terminate
        // and keep the inner reference symbolic.
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let a1 = f.name("a_1");
        let a2 = f.name("a_2");
        let b1 = f.name("b_1");
        let b2 = f.name("b_2");
        let zero = f.cst(0);
        let one = f.cst(1);
        let astep = f.arena.build2(Code::Plus, Some(f.int), a1, b1);
        let bstep = f.arena.build2(Code::Plus, Some(f.int), b1, a1);
        f.loop_phi(a1, l1, zero, a2);
        f.assign(a2, l1, astep);
        f.loop_phi(b1, l1, one, b2);
        f.assign(b2, l1, bstep);

        let mut a = f.analyzer();
        let ev = a.analyze(l1, a1);
        assert_eq!(ev, Chrec::poly(l1, Chrec::Val(zero), Chrec::Val(b1)));
        let inst = a.instantiate(l1, &ev);
        // Termination is the property under test; the result must still
        // be a polynomial rooted at 0.
        assert!(matches!(inst, Chrec::Poly { .. }));
        assert_eq!(inst.initial_condition(), &Chrec::Val(zero));
    }

    #[test]
    fn test_niter_memoized() {
        let mut f = Fixture::new();
        let l1 = f.loops.add_loop(0);
        let i1 = f.name("i_1");
        let i2 = f.name("i_2");
        let zero = f.cst(0);
        let one = f.cst(1);
        let ten = f.cst(10);
        let step = f.arena.build2(Code::Plus, Some(f.int), i1, one);
        let cond = f.arena.build2(Code::Lt, Some(f.int), i1, ten);
        f.loop_phi(i1, l1, zero, i2);
        f.assign(i2, l1, step);
        f.body.set_exit_condition(l1, cond, false);

        let mut a = f.analyzer();
        let first = a.number_of_iterations(l1);
        let second = a.number_of_iterations(l1);
        assert_eq!(first, second);
    }
}
