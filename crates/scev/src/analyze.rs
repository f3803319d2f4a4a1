//! The scalar evolution analyzer.
//!
//! Evolution of an SSA name in a loop is computed by interpreting its
//! definition: assignments fold into chrec algebra, loop phis are searched
//! for a cycle back to themselves along the back edges, condition phis
//! merge their branches. Results are memoized per `(loop, name)` pair,
//! and difficult constructs yield `Top`, never an error.
//!
//! The translation follows the classic pattern match: a loop phi is
//! either `a = phi(init, a + expr)` (a polynomial of degree depending on
//! `expr`) or `a = phi(init, expr)` with no cycle, which is a peeled
//! chrec. Symbolic initial conditions are kept and resolved on demand by
//! [`ScevAnalyzer::instantiate`], whose traversal stack cuts cyclic
//! references.

use crate::chrec::{Chrec, LoopId};
use crate::fold;
use crate::ssa::{Loops, PhiArg, SsaBody, SsaDef};
use mill_ir::{Arena, Code, NodeId};
use std::collections::HashMap;

pub struct ScevAnalyzer<'a> {
    pub arena: &'a mut Arena,
    pub body: &'a SsaBody,
    pub loops: &'a Loops,
    cache: HashMap<(LoopId, NodeId), Chrec>,
    /// Names currently being instantiated; a name found here again stays
    /// symbolic instead of recursing forever.
    instantiating: Vec<NodeId>,
    pub(crate) niter_cache: HashMap<LoopId, Chrec>,
}

impl<'a> ScevAnalyzer<'a> {
    pub fn new(arena: &'a mut Arena, body: &'a SsaBody, loops: &'a Loops) -> Self {
        ScevAnalyzer {
            arena,
            body,
            loops,
            cache: HashMap::new(),
            instantiating: Vec::new(),
            niter_cache: HashMap::new(),
        }
    }

    /// The evolution of VERSION as seen from LOOP.
    pub fn analyze(&mut self, loop_id: LoopId, version: NodeId) -> Chrec {
        let code = self.arena.code(version);
        if code != Code::SsaName {
            return self.analyze_non_name(loop_id, version);
        }

        if let Some(c) = self.cache.get(&(loop_id, version)) {
            return c.clone();
        }

        let body = self.body;
        let res = match body.def(version) {
            None => {
                // Defined outside the analyzed region: a parameter.
                Chrec::Val(version)
            }
            Some(_) if !self.loops.contains(loop_id, body.loop_of(version)) => {
                // The definition does not belong to this loop nest;
                // keep the name symbolic.
                Chrec::Val(version)
            }
            Some(SsaDef::Assign { rhs }) => {
                let rhs = *rhs;
                self.interpret_rhs(loop_id, rhs)
            }
            Some(SsaDef::Phi { loop_phi, .. }) => {
                if *loop_phi {
                    self.interpret_loop_phi(loop_id, version)
                } else {
                    self.interpret_condition_phi(loop_id, version)
                }
            }
        };

        tracing::trace!(target: "mill::scev", loop = loop_id, "evolution = {}", res);
        self.cache.insert((loop_id, version), res.clone());
        res
    }

    /// Non-SSA operands: constants and declarations are themselves;
    /// memory references stay symbolic; arithmetic is folded.
    fn analyze_non_name(&mut self, loop_id: LoopId, node: NodeId) -> Chrec {
        let code = self.arena.code(node);
        if code.is_constant() || code.is_decl() {
            return Chrec::Val(node);
        }
        match code {
            // Kept in symbolic form.
            Code::AddrExpr | Code::ArrayRef | Code::ComponentRef | Code::IndirectRef
            | Code::Abs | Code::LShift | Code::RShift | Code::LRotate | Code::RRotate
            | Code::BitAnd | Code::BitIor | Code::BitXor | Code::BitNot | Code::TruthAnd
            | Code::TruthOr | Code::TruthXor | Code::TruthNot | Code::TruthAndIf
            | Code::TruthOrIf => Chrec::Val(node),

            Code::Plus | Code::Minus | Code::Mult | Code::Negate | Code::Nop
            | Code::Convert | Code::SsaName => self.interpret_rhs(loop_id, node),

            _ => Chrec::Top,
        }
    }

    /// Interpret the right-hand side of an assignment, propagating
    /// evolutions like a constant-copy propagation.
    fn interpret_rhs(&mut self, loop_id: LoopId, rhs: NodeId) -> Chrec {
        let code = self.arena.code(rhs);
        if code.is_constant() || code.is_decl() {
            return Chrec::Val(rhs);
        }
        match code {
            Code::SsaName => self.analyze(loop_id, rhs),

            Code::Plus => {
                let a = self.analyze(loop_id, self.arena.op(rhs, 0).unwrap());
                let b = self.analyze(loop_id, self.arena.op(rhs, 1).unwrap());
                fold::fold_plus(self.arena, &a, &b)
            }
            Code::Minus => {
                let a = self.analyze(loop_id, self.arena.op(rhs, 0).unwrap());
                let b = self.analyze(loop_id, self.arena.op(rhs, 1).unwrap());
                fold::fold_minus(self.arena, &a, &b)
            }
            Code::Mult => {
                let a = self.analyze(loop_id, self.arena.op(rhs, 0).unwrap());
                let b = self.analyze(loop_id, self.arena.op(rhs, 1).unwrap());
                fold::fold_multiply(self.arena, &a, &b)
            }
            Code::Negate => {
                let a = self.analyze(loop_id, self.arena.op(rhs, 0).unwrap());
                fold::fold_negate(self.arena, &a)
            }
            Code::Nop | Code::Convert => {
                let op = self.arena.op(rhs, 0).unwrap();
                self.analyze(loop_id, op)
            }

            _ => Chrec::Top,
        }
    }

    // ----- loop phis -------------------------------------------------------

    fn interpret_loop_phi(&mut self, loop_id: LoopId, phi_name: NodeId) -> Chrec {
        let body = self.body;
        let Some(SsaDef::Phi { loop_id: phi_loop, args, .. }) = body.def(phi_name) else {
            return Chrec::Top;
        };
        let phi_loop = *phi_loop;

        if phi_loop != loop_id {
            // The phi belongs to a loop nested inside the one we are
            // asked about: summarize the subloop as a whole.
            let depth = self.loops.depth(loop_id);
            let subloop = self.loops.superloop_at_depth(phi_loop, depth + 1);
            return self.overall_effect_of_inner_loop(subloop, phi_name);
        }

        let init = analyze_initial_condition(self.arena, args);
        self.analyze_evolution_in_loop(phi_name, phi_loop, args.clone(), init)
    }

    fn analyze_evolution_in_loop(
        &mut self,
        phi_name: NodeId,
        loop_id: LoopId,
        args: Vec<PhiArg>,
        init: Chrec,
    ) -> Chrec {
        let mut evolution: Option<Chrec> = None;

        for arg in args.iter().filter(|a| a.from_inside) {
            let mut ev_fn = init.clone();
            let followed = if self.arena.code(arg.value) == Code::SsaName {
                self.follow_ssa_edge_name(loop_id, arg.value, phi_name, &mut ev_fn)
            } else {
                false
            };

            if !followed {
                // No path back to the phi: the first iteration has the
                // initial value, every later one whatever the back edge
                // carries.
                let peeled = Chrec::peeled(loop_id, init.clone(), Chrec::Val(arg.value));
                ev_fn = fold::simplify_peeled(self.arena, &peeled);
            }

            evolution = Some(match evolution {
                None => ev_fn,
                Some(prev) => fold::merge(self.arena, &prev, &ev_fn),
            });
        }

        evolution.unwrap_or(Chrec::Top)
    }

    /// Follow the def-use edge into the definition of NAME, looking for a
    /// cycle back to HALTING_PHI. On success the accumulated evolution is
    /// in EV.
    fn follow_ssa_edge_name(
        &mut self,
        loop_id: LoopId,
        name: NodeId,
        halting_phi: NodeId,
        ev: &mut Chrec,
    ) -> bool {
        let body = self.body;
        let Some(def) = body.def(name) else {
            return false;
        };
        let def_loop = body.loop_of(name);

        match def {
            SsaDef::Phi { loop_phi, args, .. } => {
                if !*loop_phi {
                    let args = args.clone();
                    return self.follow_condition_phi(loop_id, args, halting_phi, ev);
                }
                // Found the halting phi: the cycle is closed.
                if name == halting_phi {
                    return true;
                }
                // Another loop phi of the same loop: a higher degree
                // polynomial we do not chase here.
                if def_loop == loop_id {
                    return false;
                }
                // A phi of a strictly inner loop: treat the whole inner
                // loop as one statement.
                if self.loops.contains(loop_id, def_loop) {
                    return self.follow_inner_loop_phi(loop_id, def_loop, name, halting_phi, ev);
                }
                // An outer loop: no cycle through here.
                false
            }
            SsaDef::Assign { rhs } => {
                let rhs = *rhs;
                self.follow_ssa_edge_in_rhs(loop_id, rhs, halting_phi, ev)
            }
        }
    }

    /// The back-edge walk through an assignment RHS. Addition and
    /// subtraction extend the evolution additively, multiplication
    /// multiplicatively; anything else ends the search.
    fn follow_ssa_edge_in_rhs(
        &mut self,
        loop_id: LoopId,
        rhs: NodeId,
        halting_phi: NodeId,
        ev: &mut Chrec,
    ) -> bool {
        let code = self.arena.code(rhs);
        match code {
            Code::IntCst => false,

            Code::SsaName => self.follow_ssa_edge_name(loop_id, rhs, halting_phi, ev),

            Code::Plus | Code::Minus => {
                let rhs0 = self.arena.op(rhs, 0).unwrap();
                let rhs1 = self.arena.op(rhs, 1).unwrap();
                let minus = code == Code::Minus;

                if self.arena.code(rhs0) == Code::SsaName {
                    if self.follow_ssa_edge_name(loop_id, rhs0, halting_phi, ev) {
                        *ev = self.add_to_evolution(loop_id, ev, minus, rhs1);
                        return true;
                    }
                    if self.arena.code(rhs1) == Code::SsaName
                        && self.follow_ssa_edge_name(loop_id, rhs1, halting_phi, ev)
                    {
                        // a = b - c with the cycle through c negates the
                        // accumulated evolution.
                        if minus {
                            *ev = fold::fold_negate(self.arena, ev);
                        }
                        *ev = self.add_to_evolution(loop_id, ev, false, rhs0);
                        return true;
                    }
                    false
                } else if self.arena.code(rhs1) == Code::SsaName {
                    if self.follow_ssa_edge_name(loop_id, rhs1, halting_phi, ev) {
                        if minus {
                            *ev = fold::fold_negate(self.arena, ev);
                        }
                        *ev = self.add_to_evolution(loop_id, ev, false, rhs0);
                        return true;
                    }
                    false
                } else {
                    false
                }
            }

            Code::Mult => {
                let rhs0 = self.arena.op(rhs, 0).unwrap();
                let rhs1 = self.arena.op(rhs, 1).unwrap();
                if self.arena.code(rhs0) == Code::SsaName
                    && self.follow_ssa_edge_name(loop_id, rhs0, halting_phi, ev)
                {
                    *ev = self.multiply_evolution(loop_id, ev, rhs1);
                    return true;
                }
                if self.arena.code(rhs1) == Code::SsaName
                    && self.follow_ssa_edge_name(loop_id, rhs1, halting_phi, ev)
                {
                    *ev = self.multiply_evolution(loop_id, ev, rhs0);
                    return true;
                }
                false
            }

            Code::Nop | Code::Convert => {
                let op = self.arena.op(rhs, 0).unwrap();
                if self.arena.code(op) == Code::SsaName {
                    self.follow_ssa_edge_name(loop_id, op, halting_phi, ev)
                } else {
                    false
                }
            }

            _ => false,
        }
    }

    fn follow_condition_phi(
        &mut self,
        loop_id: LoopId,
        args: Vec<PhiArg>,
        halting_phi: NodeId,
        ev: &mut Chrec,
    ) -> bool {
        let init = ev.clone();
        let mut merged: Option<Chrec> = None;

        for arg in &args {
            // Irreducible back edges are not followed.
            if arg.from_inside {
                return false;
            }
            if self.arena.code(arg.value) != Code::SsaName {
                // One branch sets the variable to a constant; this could
                // be refined with a wrap-around form, but for now the
                // whole phi defeats the cycle search.
                return false;
            }
            let mut branch_ev = init.clone();
            if !self.follow_ssa_edge_name(loop_id, arg.value, halting_phi, &mut branch_ev) {
                return false;
            }
            merged = Some(match merged {
                None => branch_ev,
                Some(prev) => fold::merge(self.arena, &prev, &branch_ev),
            });
        }

        match merged {
            Some(m) => {
                *ev = m;
                true
            }
            None => false,
        }
    }

    fn follow_inner_loop_phi(
        &mut self,
        outer_loop: LoopId,
        phi_loop: LoopId,
        phi_name: NodeId,
        halting_phi: NodeId,
        ev: &mut Chrec,
    ) -> bool {
        let depth = self.loops.depth(outer_loop);
        let subloop = self.loops.superloop_at_depth(phi_loop, depth + 1);
        let effect = self.overall_effect_of_inner_loop(subloop, phi_name);
        match effect {
            Chrec::Val(node) => self.follow_ssa_edge_in_rhs(outer_loop, node, halting_phi, ev),
            _ => false,
        }
    }

    /// The value of VERSION after LOOP has run to completion: its
    /// evolution applied at the loop's iteration count. An unknown count
    /// makes the effect unknown.
    pub fn overall_effect_of_inner_loop(&mut self, loop_id: LoopId, version: NodeId) -> Chrec {
        let ev = self.analyze(loop_id, version);
        if !ev.has_evolution_in(loop_id) {
            return ev;
        }
        let stored = self.number_of_iterations(loop_id);
        if stored.is_top() || stored.is_bot() {
            return Chrec::Top;
        }
        // The stored count is one less than the number of times the body
        // runs; the name is defined before the exit test.
        let one = fold::constant(self.arena, None, 1);
        let count = fold::fold_plus(self.arena, &stored, &one);
        fold::apply(self.arena, loop_id, &ev, &count)
    }

    // ----- evolution construction ------------------------------------------

    /// Add TO_ADD (negated for MINUS) to the evolution of CHREC_BEFORE in
    /// LOOP, creating the polynomial if the chrec had no evolution there
    /// yet.
    fn add_to_evolution(
        &mut self,
        loop_id: LoopId,
        chrec_before: &Chrec,
        minus: bool,
        to_add: NodeId,
    ) -> Chrec {
        let mut add = Chrec::Val(to_add);
        if !chrec_before.has_evolution_in(loop_id) {
            if minus {
                add = fold::fold_negate(self.arena, &add);
            }
            build_polynomial_evolution_in_loop(loop_id, chrec_before, &add)
        } else {
            self.add_expr_to_loop_evolution(loop_id, chrec_before, minus, &add)
        }
    }

    fn add_expr_to_loop_evolution(
        &mut self,
        loop_id: LoopId,
        chrec_before: &Chrec,
        minus: bool,
        to_add: &Chrec,
    ) -> Chrec {
        match chrec_before {
            Chrec::Poly { loop_id: l, left, right } => {
                if *l == loop_id {
                    let new_right = if minus {
                        fold::fold_minus(self.arena, right, to_add)
                    } else {
                        fold::fold_plus(self.arena, right, to_add)
                    };
                    Chrec::poly(*l, (**left).clone(), new_right)
                } else {
                    let new_left = self.add_expr_to_loop_evolution(loop_id, left, minus, to_add);
                    Chrec::poly(*l, new_left, (**right).clone())
                }
            }
            Chrec::Expo { loop_id: l, left, right } => {
                if *l == loop_id {
                    // Mixing additive steps into a geometric evolution is
                    // beyond the folder.
                    Chrec::expo(*l, (**left).clone(), Chrec::Top)
                } else {
                    let new_left = self.add_expr_to_loop_evolution(loop_id, left, minus, to_add);
                    Chrec::expo(*l, new_left, (**right).clone())
                }
            }
            _ => Chrec::Top,
        }
    }

    /// Multiply the evolution of CHREC_BEFORE in LOOP by TO_MULT.
    fn multiply_evolution(
        &mut self,
        loop_id: LoopId,
        chrec_before: &Chrec,
        to_mult: NodeId,
    ) -> Chrec {
        let mult = Chrec::Val(to_mult);
        if !chrec_before.has_evolution_in(loop_id) {
            build_exponential_evolution_in_loop(loop_id, chrec_before, &mult)
        } else {
            self.multiply_loop_evolution(loop_id, chrec_before, &mult)
        }
    }

    fn multiply_loop_evolution(
        &mut self,
        loop_id: LoopId,
        chrec_before: &Chrec,
        to_mult: &Chrec,
    ) -> Chrec {
        match chrec_before {
            Chrec::Poly { loop_id: l, left, .. } => {
                if *l == loop_id {
                    Chrec::poly(*l, (**left).clone(), Chrec::Top)
                } else {
                    let new_left = self.multiply_loop_evolution(loop_id, left, to_mult);
                    Chrec::poly(*l, new_left, chrec_right(chrec_before))
                }
            }
            Chrec::Expo { loop_id: l, left, right } => {
                if *l == loop_id && !left.has_evolution_in(loop_id) {
                    let new_right = fold::fold_multiply(self.arena, right, to_mult);
                    Chrec::expo(*l, (**left).clone(), new_right)
                } else {
                    let new_left = self.multiply_loop_evolution(loop_id, left, to_mult);
                    Chrec::expo(*l, new_left, (**right).clone())
                }
            }
            _ => Chrec::Top,
        }
    }

    // ----- condition phis --------------------------------------------------

    fn interpret_condition_phi(&mut self, loop_id: LoopId, phi_name: NodeId) -> Chrec {
        let body = self.body;
        let Some(SsaDef::Phi { args, .. }) = body.def(phi_name) else {
            return Chrec::Top;
        };
        let args = args.clone();

        let mut res: Option<Chrec> = None;
        for arg in &args {
            if arg.from_inside {
                // A back edge into a condition phi: an irreducible loop.
                res = Some(Chrec::Top);
                break;
            }
            let branch = self.analyze(loop_id, arg.value);
            res = Some(match res {
                None => branch,
                Some(prev) => fold::merge(self.arena, &prev, &branch),
            });
        }
        res.unwrap_or(Chrec::Top)
    }

    // ----- instantiation ---------------------------------------------------

    /// Resolve the symbolic names mentioned by CHREC in LOOP. A name
    /// reached again while it is being instantiated stays symbolic, which
    /// cuts self-referential evolutions.
    pub fn instantiate(&mut self, loop_id: LoopId, chrec: &Chrec) -> Chrec {
        match chrec {
            Chrec::Top | Chrec::Bot => chrec.clone(),

            Chrec::Val(id) => {
                let code = self.arena.code(*id);
                if code.is_constant() {
                    return chrec.clone();
                }
                if self.instantiating.contains(id) {
                    // Cyclic: a_2 -> {0, +, a_2}_1 style evolutions stay
                    // symbolic.
                    return chrec.clone();
                }
                let res = self.analyze(loop_id, *id);
                if res == *chrec {
                    return res;
                }
                if res.contains_symbols(self.arena) {
                    self.instantiating.push(*id);
                    let res = self.instantiate(loop_id, &res);
                    self.instantiating.pop();
                    res
                } else {
                    res
                }
            }

            Chrec::Poly { loop_id: l, left, right } => {
                let left = self.instantiate(loop_id, left);
                let right = self.instantiate(loop_id, right);
                Chrec::poly(*l, left, right)
            }
            Chrec::Expo { loop_id: l, left, right } => {
                let left = self.instantiate(loop_id, left);
                let right = self.instantiate(loop_id, right);
                Chrec::expo(*l, left, right)
            }
            Chrec::Peeled { loop_id: l, first, rest } => {
                let first = self.instantiate(loop_id, first);
                let rest = self.instantiate(loop_id, rest);
                Chrec::peeled(*l, first, rest)
            }
            Chrec::Interval { lo, hi } => {
                let lo = self.instantiate(loop_id, lo);
                let hi = self.instantiate(loop_id, hi);
                Chrec::interval(lo, hi)
            }
        }
    }
}

/// The initial condition of a loop phi: the merge of its entry-edge
/// arguments, kept symbolic where they are SSA names.
fn analyze_initial_condition(arena: &mut Arena, args: &[PhiArg]) -> Chrec {
    let mut init: Option<Chrec> = None;
    for arg in args.iter().filter(|a| !a.from_inside) {
        match init {
            None => init = Some(Chrec::Val(arg.value)),
            Some(_) if arena.code(arg.value) == Code::SsaName => {
                init = Some(Chrec::Top);
                break;
            }
            Some(prev) => {
                let branch = Chrec::Val(arg.value);
                init = Some(fold::merge(arena, &prev, &branch));
            }
        }
    }
    // A loop without an entry edge would be malformed.
    init.unwrap_or(Chrec::Top)
}

fn chrec_right(c: &Chrec) -> Chrec {
    match c {
        Chrec::Poly { right, .. } | Chrec::Expo { right, .. } => (**right).clone(),
        _ => Chrec::Top,
    }
}

/// CHREC_BEFORE has no evolution in LOOP; wrap it in a fresh polynomial
/// with step TO_ADD, keeping the outer-to-inner ordering of the spine.
fn build_polynomial_evolution_in_loop(loop_id: LoopId, before: &Chrec, to_add: &Chrec) -> Chrec {
    match before {
        Chrec::Poly { loop_id: l, left, right } => {
            if *l < loop_id {
                Chrec::poly(loop_id, before.clone(), to_add.clone())
            } else {
                Chrec::poly(
                    *l,
                    build_polynomial_evolution_in_loop(loop_id, left, to_add),
                    (**right).clone(),
                )
            }
        }
        Chrec::Expo { loop_id: l, left, right } => {
            if *l < loop_id {
                Chrec::poly(loop_id, before.clone(), to_add.clone())
            } else {
                Chrec::expo(
                    *l,
                    build_polynomial_evolution_in_loop(loop_id, left, to_add),
                    (**right).clone(),
                )
            }
        }
        _ => Chrec::poly(loop_id, before.clone(), to_add.clone()),
    }
}

/// Same for a fresh exponential evolution with factor TO_MULT.
fn build_exponential_evolution_in_loop(loop_id: LoopId, before: &Chrec, to_mult: &Chrec) -> Chrec {
    match before {
        Chrec::Poly { loop_id: l, left, right } => {
            if *l < loop_id {
                Chrec::expo(loop_id, before.clone(), to_mult.clone())
            } else {
                Chrec::poly(
                    *l,
                    build_exponential_evolution_in_loop(loop_id, left, to_mult),
                    (**right).clone(),
                )
            }
        }
        Chrec::Expo { loop_id: l, left, right } => {
            if *l < loop_id {
                Chrec::expo(loop_id, before.clone(), to_mult.clone())
            } else {
                Chrec::expo(
                    *l,
                    build_exponential_evolution_in_loop(loop_id, left, to_mult),
                    (**right).clone(),
                )
            }
        }
        _ => Chrec::expo(loop_id, before.clone(), to_mult.clone()),
    }
}
