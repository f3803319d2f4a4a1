//! mill points-to analysis
//!
//! An Andersen-style, field-sensitive, constraint-based points-to engine:
//! assignments and phis generate inclusion constraints between abstract
//! storage locations, a constraint graph is reduced offline (static cycle
//! elimination and Rountev-Chandra variable substitution), and a worklist
//! iteration converges on the per-variable solution sets behind the
//! [`PointsTo::may_point_to`] and [`PointsTo::may_alias`] queries.
//!
//! The solver never fails: anything it cannot model precisely points to
//! the artificial `ANYTHING` variable.

pub mod constraints;
pub mod graph;
pub mod scc;
pub mod solve;
pub mod vars;

pub use vars::{
    ANYTHING_ID, Constraint, ConstraintExpr, ExprKind, NOTHING_ID, PointsTo, READONLY_ID, VarId,
    VarInfo,
};

#[cfg(test)]
mod tests {
    use super::*;
    use mill_ir::{Arena, Code, NodeId};

    fn ptr_to_int(arena: &mut Arena) -> NodeId {
        let int = arena.int_type();
        arena.pointer_type(int)
    }

    fn addr_of(arena: &mut Arena, v: NodeId) -> NodeId {
        let ty = arena.ty(v).unwrap();
        let ptr = arena.pointer_type(ty);
        arena.build1(Code::AddrExpr, Some(ptr), v)
    }

    #[test]
    fn test_address_of_lands_in_solution() {
        // x = &y  ==>  y in sol(x).
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let x = arena.var_decl("x", ptr);
        let y = arena.var_decl("y", int);
        let addr = addr_of(&mut arena, y);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, x, addr);
        pta.solve();

        let yid = pta.lookup_id(y).unwrap();
        let sol = pta.may_point_to(x).unwrap();
        assert!(sol.contains(yid));
    }

    #[test]
    fn test_copy_chain_and_indirect_store() {
        // p = &x; q = p; *q = 1;
        // sol(p) == sol(q) == {x}; x is address-taken and the target of
        // an indirect store.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let x = arena.var_decl("x", int);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let addr = addr_of(&mut arena, x);
        let one = arena.integer_one(int);
        let star_q = arena.build1(Code::IndirectRef, Some(int), q);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, addr);
        pta.add_assignment(&arena, q, p);
        pta.add_assignment(&arena, star_q, one);
        pta.solve();

        let xid = pta.lookup_id(x).unwrap();
        let sol_p = pta.may_point_to(p).unwrap();
        let sol_q = pta.may_point_to(q).unwrap();
        assert!(sol_p.contains(xid));
        assert!(sol_q.contains(xid));
        assert_eq!(sol_p.len(), 1);
        assert_eq!(sol_q.len(), 1);
        assert!(pta.var(xid).address_taken);
        assert!(pta.var(xid).indirect_target);
        assert!(pta.may_alias(p, q));
    }

    #[test]
    fn test_monotone_convergence() {
        // Re-running the solver after convergence changes nothing.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let pp = arena.pointer_type(ptr);
        let x = arena.var_decl("x", int);
        let y = arena.var_decl("y", int);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", pp);
        let ax = addr_of(&mut arena, x);
        let ay = addr_of(&mut arena, y);
        let ap = addr_of(&mut arena, p);
        let star_q = arena.build1(Code::IndirectRef, Some(ptr), q);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, ax);
        pta.add_assignment(&arena, q, ap);
        pta.add_assignment(&arena, star_q, ay);
        pta.solve();

        assert!(!pta.resolve_again(), "solver did not converge");
    }

    #[test]
    fn test_indirect_store_through_double_pointer() {
        // q = &p; *q = &y  ==>  y in sol(p).
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let pp = arena.pointer_type(ptr);
        let y = arena.var_decl("y", int);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", pp);
        let ap = addr_of(&mut arena, p);
        let ay = addr_of(&mut arena, y);
        let star_q = arena.build1(Code::IndirectRef, Some(ptr), q);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, q, ap);
        pta.add_assignment(&arena, star_q, ay);
        pta.solve();

        let yid = pta.lookup_id(y).unwrap();
        assert!(pta.may_point_to(p).unwrap().contains(yid));
    }

    #[test]
    fn test_indirect_load() {
        // p = &x; q = &p; r = *q  ==>  x in sol(r).
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let pp = arena.pointer_type(ptr);
        let x = arena.var_decl("x", int);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", pp);
        let r = arena.var_decl("r", ptr);
        let ax = addr_of(&mut arena, x);
        let ap = addr_of(&mut arena, p);
        let star_q = arena.build1(Code::IndirectRef, Some(ptr), q);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, ax);
        pta.add_assignment(&arena, q, ap);
        pta.add_assignment(&arena, r, star_q);
        pta.solve();

        let xid = pta.lookup_id(x).unwrap();
        assert!(pta.may_point_to(r).unwrap().contains(xid));
    }

    #[test]
    fn test_copy_cycle_collapses_to_one_solution() {
        // a = b; b = a; a = &x: the cycle shares one solution.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let x = arena.var_decl("x", int);
        let a = arena.var_decl("a", ptr);
        let b = arena.var_decl("b", ptr);
        let ax = addr_of(&mut arena, x);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, a, b);
        pta.add_assignment(&arena, b, a);
        pta.add_assignment(&arena, a, ax);
        pta.solve();

        let xid = pta.lookup_id(x).unwrap();
        let aid = pta.lookup_id(a).unwrap();
        let bid = pta.lookup_id(b).unwrap();
        assert!(pta.points_to_set(aid).contains(xid));
        assert!(pta.points_to_set(bid).contains(xid));
        // They share a representative after collapsing.
        assert_eq!(pta.node_of(aid), pta.node_of(bid));
        assert!(pta.may_alias(a, b));
    }

    #[test]
    fn test_field_offset_shifts_solution() {
        // struct { int a; int b; } s; p = &s; q = p + 1  ==>  q -> s#1.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s_ty = arena.record_type("pair");
        arena.add_field(s_ty, "a", 0, int);
        arena.add_field(s_ty, "b", 32, int);
        let s = arena.var_decl("s", s_ty);
        let ptr = ptr_to_int(&mut arena);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let as_ = addr_of(&mut arena, s);
        let one = arena.integer_one(int);
        let p_plus = arena.build2(Code::Plus, Some(ptr), p, one);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, as_);
        pta.add_assignment(&arena, q, p_plus);
        pta.solve();

        let sid = pta.lookup_id(s).unwrap();
        let sol_q = pta.may_point_to(q).unwrap();
        assert!(sol_q.contains(sid + 1), "field shift missing");
        assert!(!sol_q.contains(sid));
    }

    #[test]
    fn test_out_of_range_shift_is_dropped() {
        // Shifting past the end of a sized variable drops the target.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s_ty = arena.record_type("pair9");
        arena.add_field(s_ty, "a", 0, int);
        arena.add_field(s_ty, "b", 32, int);
        let s = arena.var_decl("s", s_ty);
        let ptr = ptr_to_int(&mut arena);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let as_ = addr_of(&mut arena, s);
        let five = arena.int_cst(int, 5);
        let p_plus = arena.build2(Code::Plus, Some(ptr), p, five);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, as_);
        pta.add_assignment(&arena, q, p_plus);
        pta.solve();

        assert!(pta.may_point_to(q).unwrap().is_empty());
    }

    #[test]
    fn test_union_absorbs_any_offset() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let u_ty = arena.union_type("u");
        arena.add_field(u_ty, "a", 0, int);
        let u = arena.var_decl("u", u_ty);
        let ptr = ptr_to_int(&mut arena);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let au = addr_of(&mut arena, u);
        let five = arena.int_cst(int, 5);
        let p_plus = arena.build2(Code::Plus, Some(ptr), p, five);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, au);
        pta.add_assignment(&arena, q, p_plus);
        pta.solve();

        let uid = pta.lookup_id(u).unwrap();
        assert!(pta.may_point_to(q).unwrap().contains(uid));
    }

    #[test]
    fn test_phi_merges_targets() {
        // p = phi(&x, &y): both targets in sol(p).
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let x = arena.var_decl("x", int);
        let y = arena.var_decl("y", int);
        let p = arena.var_decl("p", ptr);
        let ax = addr_of(&mut arena, x);
        let ay = addr_of(&mut arena, y);

        let mut pta = PointsTo::new();
        pta.add_phi(&arena, p, &[ax, ay]);
        pta.solve();

        let sol = pta.may_point_to(p).unwrap();
        assert!(sol.contains(pta.lookup_id(x).unwrap()));
        assert!(sol.contains(pta.lookup_id(y).unwrap()));
    }

    #[test]
    fn test_call_binds_params_and_return() {
        // f(a1) with param x: sol(x) gets sol(a1); lhs gets the return
        // slot's solution.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let g = arena.var_decl("g", int);
        let a1 = arena.var_decl("a1", ptr);
        let x = arena.parm_decl("x", ptr);
        let ret_slot = arena.result_decl("ret", ptr);
        let lhs = arena.var_decl("lhs", ptr);
        let ag = addr_of(&mut arena, g);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, a1, ag);
        pta.add_assignment(&arena, ret_slot, a1);
        pta.add_call(&arena, Some(lhs), &[x], &[a1], Some(ret_slot));
        pta.solve();

        let gid = pta.lookup_id(g).unwrap();
        assert!(pta.may_point_to(x).unwrap().contains(gid));
        assert!(pta.may_point_to(lhs).unwrap().contains(gid));
    }

    #[test]
    fn test_parameter_points_to_anything() {
        let mut arena = Arena::new();
        let ptr = ptr_to_int(&mut arena);
        let p = arena.parm_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let r = arena.var_decl("r", ptr);

        let mut pta = PointsTo::new();
        pta.add_parameter(&arena, p);
        pta.add_assignment(&arena, q, p);
        pta.solve();

        assert!(pta.may_point_to(q).unwrap().contains(ANYTHING_ID));
        // Anything aliases everything, including an unrelated pointer.
        assert!(pta.may_alias(q, r) || pta.may_point_to(r).is_none());
    }

    #[test]
    fn test_disjoint_pointers_do_not_alias() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let x = arena.var_decl("x", int);
        let y = arena.var_decl("y", int);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let ax = addr_of(&mut arena, x);
        let ay = addr_of(&mut arena, y);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, ax);
        pta.add_assignment(&arena, q, ay);
        pta.solve();

        assert!(!pta.may_alias(p, q));
    }

    #[test]
    fn test_heap_sites_are_distinct() {
        // p = malloc(); q = malloc(): separate heap variables.
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = ptr_to_int(&mut arena);
        let fnty = arena.function_type(ptr);
        let malloc = arena.function_decl("malloc", fnty);
        let args1 = arena.arg_list(&[]);
        let call1 = arena.build2(Code::Call, Some(ptr), malloc, args1);
        let args2 = arena.arg_list(&[]);
        let call2 = arena.build2(Code::Call, Some(ptr), malloc, args2);
        let p = arena.var_decl("p", ptr);
        let q = arena.var_decl("q", ptr);
        let _ = int;

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, call1);
        pta.add_assignment(&arena, q, call2);
        pta.solve();

        assert!(!pta.may_alias(p, q));
    }
}
