//! mill tree simplifier
//!
//! Lowers the rich statement/expression trees produced by a C-family front
//! end into SIMPLE form: a three-address-like normal form where every
//! expression statement is a flat side effect, every assignment right-hand
//! side is at most one operation deep, and every control-flow predicate is
//! a plain comparison or identifier. The representation of simplified
//! trees follows the SIMPLE intermediate representation of the McCAT
//! compiler framework.
//!
//! Entry point: [`simplify_function`]. The pass mutates the tree in place
//! and declares the temporaries it creates in the function's outermost
//! binding scope. It has no recoverable failure mode: an operator the pass
//! does not know is an internal error.

pub mod lower;
pub mod predicates;

pub use lower::{Fallback, Simplifier, simplify_function};
pub use predicates::{
    Predicate, is_simple_condexpr, is_simple_expr, is_simple_id, is_simple_modify_lhs,
    is_simple_rhs, is_simple_val, is_simple_varname,
};

#[cfg(test)]
mod tests {
    use super::lower::{render_expr, render_stmts};
    use super::*;
    use mill_ir::{Arena, Code, NodeFlags, NodeId};

    /// Build a function declaration returning int, with an empty body
    /// compound wrapped in scope markers.
    fn make_function(a: &mut Arena, stmts: &[NodeId]) -> NodeId {
        let int = a.int_type();
        let fty = a.function_type(int);
        let f = a.function_decl("f", fty);
        let body = scoped(a, stmts);
        a.set_op(f, 0, Some(body));
        f
    }

    fn scoped(a: &mut Arena, stmts: &[NodeId]) -> NodeId {
        let begin = a.build0(Code::ScopeStmt, None);
        a.node_mut(begin).flags |= NodeFlags::SCOPE_BEGIN;
        let end = a.build0(Code::ScopeStmt, None);
        let mut prev = begin;
        for &s in stmts {
            a.set_chain(prev, Some(s));
            prev = a.chain_last(s);
        }
        a.set_chain(prev, Some(end));
        a.build_with_ops(Code::CompoundStmt, None, &[Some(begin)])
    }

    fn lines(a: &Arena, f: NodeId) -> Vec<String> {
        let head = a.op(f, 0).and_then(|b| a.op(b, 0));
        render_stmts(a, head)
    }

    #[test]
    fn test_self_mod_ordering() {
        // c = ++a * 3 + b++;  lowers to
        //     a = a + 1; T.1 = a * 3; c = T.1 + b; b = b + 1;
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let vc = a.var_decl("c", int);
        let one = a.integer_one(int);
        let three = a.int_cst(int, 3);

        let preinc = a.build2(Code::PreIncrement, Some(int), va, one);
        let mult = a.build2(Code::Mult, Some(int), preinc, three);
        let postinc = a.build2(Code::PostIncrement, Some(int), vb, one);
        let plus = a.build2(Code::Plus, Some(int), mult, postinc);
        let assign = a.build_modify(vc, plus);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "a = a + 1;",
                "T.1 = a * 3;",
                "c = T.1 + b;",
                "b = b + 1;",
            ]
        );
    }

    #[test]
    fn test_idempotence_on_simple_input() {
        // x = y + 1; is already SIMPLE and must come through untouched.
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let y = a.var_decl("y", int);
        let one = a.integer_one(int);
        let plus = a.build2(Code::Plus, Some(int), y, one);
        let assign = a.build_modify(x, plus);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        assert_eq!(lines(&a, f), vec!["x = y + 1;"]);
    }

    #[test]
    fn test_indirect_of_addr_folds() {
        // y = *&x;  ==>  y = x;
        let mut a = Arena::new();
        let int = a.int_type();
        let ptr = a.pointer_type(int);
        let x = a.var_decl("x", int);
        let y = a.var_decl("y", int);
        let addr = a.build1(Code::AddrExpr, Some(ptr), x);
        let star = a.build1(Code::IndirectRef, Some(int), addr);
        let assign = a.build_modify(y, star);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);
        assert_eq!(lines(&a, f), vec!["y = x;"]);
    }

    #[test]
    fn test_addr_of_indirect_folds() {
        // q = &*p;  ==>  q = p;
        let mut a = Arena::new();
        let int = a.int_type();
        let ptr = a.pointer_type(int);
        let p = a.var_decl("p", ptr);
        let q = a.var_decl("q", ptr);
        let star = a.build1(Code::IndirectRef, Some(int), p);
        let addr = a.build1(Code::AddrExpr, Some(ptr), star);
        let assign = a.build_modify(q, addr);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);
        assert_eq!(lines(&a, f), vec!["q = p;"]);
    }

    #[test]
    fn test_short_circuit_and() {
        // c = a && b;  ==>  T.1 = a; if (T.1 != 0) { T.1 = b; } c = T.1;
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let vc = a.var_decl("c", int);
        let and = a.build2(Code::TruthAndIf, Some(int), va, vb);
        let assign = a.build_modify(vc, and);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "T.1 = a;",
                "if (T.1 != 0)",
                "{",
                "  T.1 = b;",
                "}",
                "c = T.1;",
            ]
        );
    }

    #[test]
    fn test_short_circuit_or_uses_eq() {
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let vc = a.var_decl("c", int);
        let or = a.build2(Code::TruthOrIf, Some(int), va, vb);
        let assign = a.build_modify(vc, or);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        let out = lines(&a, f);
        assert!(out.contains(&"if (T.1 == 0)".to_string()), "got {:?}", out);
    }

    #[test]
    fn test_cond_expr_becomes_if() {
        // x = p ? a : b;
        let mut a = Arena::new();
        let int = a.int_type();
        let p = a.var_decl("p", int);
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let x = a.var_decl("x", int);
        let cond = a.build3(Code::Cond, Some(int), p, va, vb);
        let assign = a.build_modify(x, cond);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "if (p)",
                "{",
                "  T.1 = a;",
                "}",
                "else",
                "{",
                "  T.1 = b;",
                "}",
                "x = T.1;",
            ]
        );
    }

    #[test]
    fn test_comma_sequence() {
        // x = (a = 1, b = 2, b);
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);
        let two = a.int_cst(int, 2);
        let a1 = a.build_modify(va, one);
        let b2 = a.build_modify(vb, two);
        let tail = a.build2(Code::CompoundExpr, Some(int), b2, vb);
        let comma = a.build2(Code::CompoundExpr, Some(int), a1, tail);
        let assign = a.build_modify(x, comma);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        assert_eq!(lines(&a, f), vec!["a = 1;", "b = 2;", "x = b;"]);
    }

    #[test]
    fn test_while_cond_replicated_at_wraparound() {
        // while (n + m) { if (c) continue; x = 1; }
        let mut a = Arena::new();
        let int = a.int_type();
        let n = a.var_decl("n", int);
        let m = a.var_decl("m", int);
        let c = a.var_decl("c", int);
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);

        let cont = a.build0(Code::ContinueStmt, None);
        let if_stmt = a.build_with_ops(Code::IfStmt, None, &[Some(c), Some(cont), None]);
        let m1 = a.build_modify(x, one);
        let set = a.expr_stmt(m1, None);
        let body = scoped(&mut a, &[if_stmt, set]);

        let sum = a.build2(Code::Plus, Some(int), n, m);
        let w = a.build_with_ops(Code::WhileStmt, None, &[Some(sum), Some(body)]);

        let f = make_function(&mut a, &[w]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "T.1 = n + m;",
                "while (T.1)",
                "{",
                "  if (c)",
                "  {",
                "    T.1 = n + m;",
                "    continue;",
                "  }",
                "  x = 1;",
                "  T.1 = n + m;",
                "}",
            ]
        );
    }

    #[test]
    fn test_for_loop_step_moves_into_body() {
        // for (i = 0; i < n + m; i++) { x = 1; }
        let mut a = Arena::new();
        let int = a.int_type();
        let i = a.var_decl("i", int);
        let n = a.var_decl("n", int);
        let m = a.var_decl("m", int);
        let x = a.var_decl("x", int);
        let zero = a.integer_zero(int);
        let one = a.integer_one(int);

        let init = a.build_modify(i, zero);
        let sum = a.build2(Code::Plus, Some(int), n, m);
        let cond = a.build2(Code::Lt, Some(int), i, sum);
        let step = a.build2(Code::PostIncrement, Some(int), i, one);
        let m1 = a.build_modify(x, one);
        let set = a.expr_stmt(m1, None);
        let body = scoped(&mut a, &[set]);
        let for_stmt = a.build_with_ops(
            Code::ForStmt,
            None,
            &[Some(init), Some(cond), Some(step), Some(body)],
        );

        let f = make_function(&mut a, &[for_stmt]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "i = 0;",
                "for (T.1 = n + m; i < T.1; T.1 = n + m)",
                "{",
                "  x = 1;",
                "  i = i + 1;",
                "}",
            ]
        );
    }

    #[test]
    fn test_switch_selector() {
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let sum = a.build2(Code::Plus, Some(int), va, vb);
        let brk = a.build0(Code::BreakStmt, None);
        let body = scoped(&mut a, &[brk]);
        let sw = a.build_with_ops(Code::SwitchStmt, None, &[Some(sum), Some(body)]);

        let f = make_function(&mut a, &[sw]);
        simplify_function(&mut a, f);

        let out = lines(&a, f);
        assert_eq!(out[1], "T.1 = a + b;");
        assert_eq!(out[2], "switch (T.1)");
    }

    #[test]
    fn test_return_value_becomes_rhs() {
        // return a + b * c;
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let vc = a.var_decl("c", int);
        let ret_slot = a.result_decl("<retval>", int);
        let mult = a.build2(Code::Mult, Some(int), vb, vc);
        let sum = a.build2(Code::Plus, Some(int), va, mult);
        let m = a.build_modify(ret_slot, sum);
        let ret = a.build_with_ops(Code::ReturnStmt, None, &[Some(m)]);

        let f = make_function(&mut a, &[ret]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec!["decl T.1;", "T.1 = b * c;", "return <retval> = a + T.1;"]
        );
    }

    #[test]
    fn test_post_increment_in_condition() {
        // if (b++) { x = 1; }  --  the old value is tested, the increment
        // happens before the branch.
        let mut a = Arena::new();
        let int = a.int_type();
        let b = a.var_decl("b", int);
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);
        let postinc = a.build2(Code::PostIncrement, Some(int), b, one);
        let m1 = a.build_modify(x, one);
        let set = a.expr_stmt(m1, None);
        let clause = scoped(&mut a, &[set]);
        let if_stmt = a.build_with_ops(Code::IfStmt, None, &[Some(postinc), Some(clause), None]);

        let f = make_function(&mut a, &[if_stmt]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "T.1 = b;",
                "b = b + 1;",
                "if (T.1)",
                "{",
                "  x = 1;",
                "}",
            ]
        );
    }

    #[test]
    fn test_call_arguments_flattened() {
        // x = g(a + 1, h(b));
        let mut a = Arena::new();
        let int = a.int_type();
        let fty = a.function_type(int);
        let g = a.function_decl("g", fty);
        let h = a.function_decl("h", fty);
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);

        let a1 = a.build2(Code::Plus, Some(int), va, one);
        let hargs = a.arg_list(&[vb]);
        let hcall = a.build2(Code::Call, Some(int), h, hargs);
        let gargs = a.arg_list(&[a1, hcall]);
        let gcall = a.build2(Code::Call, Some(int), g, gargs);
        let assign = a.build_modify(x, gcall);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        assert_eq!(
            lines(&a, f),
            vec![
                "decl T.1;",
                "decl T.2;",
                "T.1 = a + 1;",
                "T.2 = h(b);",
                "x = g(T.1, T.2);",
            ]
        );
    }

    #[test]
    fn test_save_expr_eliminated() {
        // x = save(a) + save(a);  both uses collapse onto one temporary.
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let x = a.var_decl("x", int);
        let save = a.build1(Code::SaveExpr, Some(int), va);
        let sum = a.build2(Code::Plus, Some(int), save, save);
        let assign = a.build_modify(x, sum);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        // `a` is already an identifier, so the save vanishes in place.
        assert_eq!(lines(&a, f), vec!["x = a + a;"]);
    }

    #[test]
    fn test_predicates_hold_on_output() {
        // After lowering, every ExprStmt in the body satisfies
        // is_simple_expr.
        let mut a = Arena::new();
        let int = a.int_type();
        let va = a.var_decl("a", int);
        let vb = a.var_decl("b", int);
        let vc = a.var_decl("c", int);
        let one = a.integer_one(int);
        let three = a.int_cst(int, 3);
        let preinc = a.build2(Code::PreIncrement, Some(int), va, one);
        let mult = a.build2(Code::Mult, Some(int), preinc, three);
        let postinc = a.build2(Code::PostIncrement, Some(int), vb, one);
        let plus = a.build2(Code::Plus, Some(int), mult, postinc);
        let assign = a.build_modify(vc, plus);
        let stmt = a.expr_stmt(assign, None);

        let f = make_function(&mut a, &[stmt]);
        simplify_function(&mut a, f);

        let head = a.op(f, 0).and_then(|b| a.op(b, 0));
        for id in a.chain_to_vec(head) {
            if a.code(id) == Code::ExprStmt
                && let Some(e) = a.op(id, 0)
            {
                assert!(
                    is_simple_expr(&a, e),
                    "not simple: {}",
                    render_expr(&a, e)
                );
            }
        }
    }

    #[test]
    fn test_empty_body_is_noop() {
        let mut a = Arena::new();
        let f = make_function(&mut a, &[]);
        simplify_function(&mut a, f);
        assert_eq!(lines(&a, f), Vec::<String>::new());
    }
}
