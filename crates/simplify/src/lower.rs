//! Statement and expression lowering to SIMPLE form.
//!
//! The pass walks a function body in place. Every statement is rewritten so
//! that its side effects are explicit: simplifying an expression produces a
//! PRE list (effects that must happen before the statement) and a POST list
//! (effects that must happen after it), and the statement chain is respliced
//! as `prev -> pre -> stmt -> post -> next`. For instance
//!
//! ```text
//!     c = ++a * 3 + b++;
//! ```
//!
//! becomes
//!
//! ```text
//!     a = a + 1;
//!     T.1 = a * 3;      <-- PRE
//!     c = T.1 + b;
//!     b = b + 1;        <-- POST
//! ```
//!
//! Simplification visits constructs in the order they execute at runtime,
//! so sequence points are preserved by construction.

use crate::predicates::*;
use mill_ir::{Arena, Code, CodeClass, NodeFlags, NodeId, Payload, SourceLocation};

/// What kind of replacement `simplify_expr` may fall back to when neither
/// the expression nor a direct rewrite satisfies the predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Rvalue,
    Lvalue,
    Either,
}

impl Fallback {
    fn allows_rvalue(self) -> bool {
        matches!(self, Fallback::Rvalue | Fallback::Either)
    }

    fn allows_lvalue(self) -> bool {
        matches!(self, Fallback::Lvalue | Fallback::Either)
    }
}

/// Entry point of the lowering pass. FNDECL's first operand is the body
/// compound statement. On return the body meets the SIMPLE contract and
/// every temporary created along the way has been declared at the top of
/// the body's scope.
pub fn simplify_function(arena: &mut Arena, fndecl: NodeId) {
    let Some(body) = arena.op(fndecl, 0) else {
        return;
    };
    let Some(head) = arena.op(body, 0) else {
        return;
    };

    let mut s = Simplifier::new(arena, fndecl);
    tracing::debug!(target: "mill::simplify", "simplifying function body");
    s.simplify_stmt(body);
    s.declare_tmp_vars(head);
}

pub struct Simplifier<'a> {
    arena: &'a mut Arena,
    fndecl: NodeId,
    /// Depth of statement-expression nesting. Inside `({ ... })` the last
    /// statement may carry the expression's value even when it looks dead.
    stmt_expr_level: u32,
    next_tmp_id: u32,
    /// Temporaries created so far, declared at the end of the pass.
    new_tmps: Vec<NodeId>,
    /// Location of the statement currently being simplified.
    cur_loc: Option<SourceLocation>,
}

impl<'a> Simplifier<'a> {
    pub fn new(arena: &'a mut Arena, fndecl: NodeId) -> Self {
        Simplifier {
            arena,
            fndecl,
            stmt_expr_level: 0,
            next_tmp_id: 1,
            new_tmps: Vec::new(),
            cur_loc: None,
        }
    }

    fn fn_returns_void(&mut self) -> bool {
        let Some(fn_ty) = self.arena.ty(self.fndecl) else {
            return true;
        };
        match self.arena.op(fn_ty, 0) {
            Some(ret) => self.arena.code(ret) == Code::VoidType,
            None => true,
        }
    }

    fn is_void_type(&self, ty: Option<NodeId>) -> bool {
        ty.is_some_and(|t| self.arena.code(t) == Code::VoidType)
    }

    // ----- statement walk -------------------------------------------------

    /// Recursively scan the chain starting at HEAD and convert every
    /// statement to SIMPLE form, splicing pre/post effects around it.
    pub fn simplify_stmt(&mut self, head: NodeId) {
        let mut prev = head;
        let mut cur = Some(head);

        while let Some(stmt) = cur {
            let next = self.arena.chain(stmt);
            let mut pre: Vec<NodeId> = Vec::new();
            let mut post: Vec<NodeId> = Vec::new();
            let mut stmt_was_null = false;
            self.cur_loc = self.arena.loc(stmt);

            match self.arena.code(stmt) {
                Code::CompoundStmt => {
                    if let Some(body) = self.arena.op(stmt, 0) {
                        self.simplify_stmt(body);
                    }
                    prev = stmt;
                    cur = next;
                    continue;
                }

                Code::ForStmt => self.simplify_for_stmt(stmt, &mut pre),
                Code::WhileStmt => self.simplify_while_stmt(stmt, &mut pre),
                Code::DoStmt => self.simplify_do_stmt(stmt),
                Code::IfStmt => self.simplify_if_stmt(stmt, &mut pre),
                Code::SwitchStmt => self.simplify_switch_stmt(stmt, &mut pre),
                Code::ReturnStmt => self.simplify_return_stmt(stmt, &mut pre),

                Code::ExprStmt => {
                    // If all the side effects move to PRE and POST the
                    // statement becomes null and is dropped, unless it was
                    // already null in the source.
                    match self.arena.op(stmt, 0) {
                        Some(expr) => {
                            if !self.expr_has_effect(expr) {
                                stmt_was_null = true;
                            }
                            let mut e = self.arena.copy_mostly(expr);
                            self.simplify_expr(
                                &mut e,
                                &mut pre,
                                Some(&mut post),
                                is_simple_expr,
                                Fallback::Rvalue,
                            );
                            self.arena.set_op(stmt, 0, Some(e));
                            self.arena.update_side_effects(stmt);
                        }
                        None => stmt_was_null = true,
                    }
                }

                // Declaration statements are deliberately left alone:
                // converting initializers to assignments breaks statics,
                // read-only initializers and variable-length arrays.
                Code::DeclStmt => {}

                Code::FileStmt
                | Code::LabelStmt
                | Code::GotoStmt
                | Code::AsmStmt
                | Code::CaseLabel
                | Code::ContinueStmt
                | Code::BreakStmt
                | Code::ScopeStmt => {
                    prev = stmt;
                    cur = next;
                    continue;
                }

                other => panic!("unhandled statement node in simplify_stmt: {:?}", other),
            }

            // Re-splice: PREV -> PRE -> STMT -> POST -> NEXT, bypassing
            // STMT when it was nullified by the simplification.
            let pre_chain = self.convert_to_stmt_chain(&pre);
            let post_chain = self.convert_to_stmt_chain(&post);
            let keep_stmt = stmt_was_null || self.stmt_has_effect(stmt);

            debug_assert_ne!(prev, stmt, "statement list must open with a scope marker");
            self.arena.set_chain(prev, None);
            self.arena.set_chain(stmt, None);

            let mut head = Some(prev);
            head = self.arena.chainon(head, pre_chain);
            if keep_stmt {
                head = self.arena.chainon(head, Some(stmt));
                head = self.arena.chainon(head, post_chain);
            } else {
                head = self.arena.chainon(head, post_chain);
            }
            let tail = self.arena.chain_last(head.unwrap());
            self.arena.set_chain(tail, next);

            prev = tail;
            cur = next;
        }
    }

    /// Convert `for (init; cond; step) body` so that all the header
    /// expressions are SIMPLE:
    ///
    /// ```text
    ///     pre_init; init; post_init;
    ///     pre_cond;
    ///     for ( ; cond_s; )
    ///       { body; pre_step; step_s; post_step; pre_cond; }
    /// ```
    ///
    /// with the pre_cond list replicated before every wrap-around point.
    /// If the tail of an emitted sequence is a plain expression it is
    /// folded back into the corresponding header slot.
    fn simplify_for_stmt(&mut self, stmt: NodeId, pre_p: &mut Vec<NodeId>) {
        self.ensure_scoped(stmt, 3);

        let init = self.arena.op(stmt, 0);
        let cond = self.arena.op(stmt, 1);
        let step = self.arena.op(stmt, 2);

        let init_is_simple = init.is_none_or(|e| is_simple_exprseq(self.arena, e));
        let cond_is_simple = cond.is_none_or(|e| is_simple_condexpr(self.arena, e));
        let step_is_simple = step.is_none_or(|e| is_simple_exprseq(self.arena, e));

        if init_is_simple && cond_is_simple && step_is_simple {
            let body = self.arena.op(stmt, 3).unwrap();
            self.simplify_stmt(body);
            return;
        }

        let mut init_s = init.map(|e| self.arena.copy_mostly(e));
        let mut cond_s = cond.map(|e| self.arena.copy_mostly(e));
        let mut step_s = step.map(|e| self.arena.copy_mostly(e));

        let mut pre_init: Vec<NodeId> = Vec::new();
        let mut post_init: Vec<NodeId> = Vec::new();
        let mut pre_cond: Vec<NodeId> = Vec::new();
        let mut pre_step: Vec<NodeId> = Vec::new();
        let mut post_step: Vec<NodeId> = Vec::new();

        // The init is simplified even when already simple, because the
        // pre_cond statements must land after it.
        if let Some(ref mut e) = init_s {
            self.simplify_expr(e, &mut pre_init, Some(&mut post_init), is_simple_expr,
                Fallback::Rvalue);
        }

        if !cond_is_simple && let Some(ref mut e) = cond_s {
            self.simplify_expr(e, &mut pre_cond, None, is_simple_condexpr, Fallback::Rvalue);
        }

        let body = self.arena.op(stmt, 3).unwrap();
        self.simplify_stmt(body);

        if !step_is_simple && let Some(ref mut e) = step_s {
            self.simplify_expr(e, &mut pre_step, Some(&mut post_step), is_simple_expr,
                Fallback::Rvalue);
        }

        // New init sequence: pre_init, init, post_init, and a copy of
        // pre_cond (the original pre_cond also runs at every wrap-around).
        for t in pre_init {
            self.add_tree(t, pre_p);
        }
        if let Some(e) = init_s {
            self.add_tree(e, pre_p);
        }
        for t in post_init {
            self.add_tree(t, pre_p);
        }
        let pre_cond_copy: Vec<NodeId> =
            pre_cond.iter().map(|&t| self.arena.deep_copy_node(t)).collect();
        for t in pre_cond_copy {
            self.add_tree(t, pre_p);
        }

        if !pre_p.is_empty() {
            let last = pre_p.last().copied();
            match last {
                Some(last) if !self.arena.code(last).is_statement() => {
                    // The tail is an expression: keep it in the header.
                    self.arena.set_op(stmt, 0, Some(last));
                    pre_p.pop();
                }
                _ => {
                    self.arena.set_op(stmt, 0, None);
                }
            }
        }

        self.arena.set_op(stmt, 1, cond_s);

        // Wrap-around sequence: pre_step, step, post_step, pre_cond.
        let mut wrap: Vec<NodeId> = Vec::new();
        for t in pre_step {
            self.add_tree(t, &mut wrap);
        }
        if let Some(e) = step_s {
            self.add_tree(e, &mut wrap);
        }
        for t in post_step {
            self.add_tree(t, &mut wrap);
        }
        for t in pre_cond {
            self.add_tree(t, &mut wrap);
        }

        if !wrap.is_empty() {
            let last = wrap.last().copied();
            match last {
                Some(last) if !self.arena.code(last).is_statement() => {
                    self.arena.set_op(stmt, 2, Some(last));
                    wrap.pop();
                }
                _ => {
                    self.arena.set_op(stmt, 2, None);
                }
            }
            let chain = self.stmt_template(&wrap);
            let body = self.arena.op(stmt, 3).unwrap();
            self.insert_before_continue_end(&chain, body);
        } else {
            self.arena.set_op(stmt, 2, step_s.or(step));
        }
    }

    /// `while (cond) body` keeps its shape; the side effects of the
    /// condition run before the loop and at every wrap-around point.
    fn simplify_while_stmt(&mut self, stmt: NodeId, pre_p: &mut Vec<NodeId>) {
        self.ensure_scoped(stmt, 1);

        let cond = self.arena.op(stmt, 0);
        if cond.is_none_or(|c| is_simple_condexpr(self.arena, c)) {
            let body = self.arena.op(stmt, 1).unwrap();
            self.simplify_stmt(body);
            return;
        }

        let mut cond_s = self.arena.copy_mostly(cond.unwrap());
        self.simplify_expr(&mut cond_s, pre_p, None, is_simple_condexpr, Fallback::Rvalue);
        self.arena.set_op(stmt, 0, Some(cond_s));

        let body = self.arena.op(stmt, 1).unwrap();
        self.simplify_stmt(body);

        let copies: Vec<NodeId> = pre_p.iter().map(|&t| self.arena.deep_copy_node(t)).collect();
        let chain = self.stmt_template(&copies);
        self.insert_before_continue_end(&chain, body);
    }

    /// `do body while (cond)`: the condition's side effects run only at the
    /// wrap-around points inside the body.
    fn simplify_do_stmt(&mut self, stmt: NodeId) {
        self.ensure_scoped(stmt, 1);

        let body = self.arena.op(stmt, 1).unwrap();
        self.simplify_stmt(body);

        let cond = self.arena.op(stmt, 0);
        if cond.is_none_or(|c| is_simple_condexpr(self.arena, c)) {
            return;
        }

        let mut pre_cond: Vec<NodeId> = Vec::new();
        let mut cond_s = self.arena.copy_mostly(cond.unwrap());
        self.simplify_expr(&mut cond_s, &mut pre_cond, None, is_simple_condexpr,
            Fallback::Rvalue);
        self.arena.set_op(stmt, 0, Some(cond_s));

        let copies: Vec<NodeId> =
            pre_cond.iter().map(|&t| self.arena.deep_copy_node(t)).collect();
        let chain = self.stmt_template(&copies);
        self.insert_before_continue_end(&chain, body);
    }

    fn simplify_if_stmt(&mut self, stmt: NodeId, pre_p: &mut Vec<NodeId>) {
        if self.arena.op(stmt, 1).is_some() {
            self.ensure_scoped(stmt, 1);
        }
        if self.arena.op(stmt, 2).is_some() {
            self.ensure_scoped(stmt, 2);
        }

        if let Some(cond) = self.arena.op(stmt, 0)
            && !is_simple_condexpr(self.arena, cond)
        {
            let mut cond_s = self.arena.copy_mostly(cond);
            self.simplify_expr(&mut cond_s, pre_p, None, is_simple_condexpr, Fallback::Rvalue);
            self.arena.set_op(stmt, 0, Some(cond_s));
        }

        if let Some(then_clause) = self.arena.op(stmt, 1) {
            self.simplify_stmt(then_clause);
        }
        if let Some(else_clause) = self.arena.op(stmt, 2) {
            self.simplify_stmt(else_clause);
        }
    }

    fn simplify_switch_stmt(&mut self, stmt: NodeId, pre_p: &mut Vec<NodeId>) {
        if let Some(cond) = self.arena.op(stmt, 0)
            && !is_simple_val(self.arena, cond)
        {
            let mut cond_s = self.arena.copy_mostly(cond);
            self.simplify_expr(&mut cond_s, pre_p, None, is_simple_val, Fallback::Rvalue);
            self.arena.set_op(stmt, 0, Some(cond_s));
        }

        if let Some(body) = self.arena.op(stmt, 1) {
            self.simplify_stmt(body);
        }
    }

    /// The returned expression is represented as a Modify of the result
    /// slot. The grammar calls for a simple value, but a full RHS lets a
    /// struct-returning call stay in place.
    fn simplify_return_stmt(&mut self, stmt: NodeId, pre_p: &mut Vec<NodeId>) {
        if self.fn_returns_void() {
            return;
        }
        let Some(modify) = self.arena.op(stmt, 0) else {
            return;
        };
        assert_eq!(self.arena.code(modify), Code::Modify,
            "return value must be assigned to the result slot");

        let ret_expr = self.arena.op(modify, 1).unwrap();
        if is_simple_rhs(self.arena, ret_expr) {
            return;
        }
        let mut e = self.arena.copy_mostly(ret_expr);
        self.simplify_expr(&mut e, pre_p, None, is_simple_rhs, Fallback::Rvalue);
        self.arena.set_op(modify, 1, Some(e));
    }

    // ----- expression simplification -------------------------------------

    /// Rewrite *EXPR until TEST accepts it, accumulating side effects in
    /// PRE and POST. With no POST sink, post effects are queued internally,
    /// the value is copied into a temporary, and the queue is flushed to
    /// PRE behind the copy.
    pub fn simplify_expr(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: Option<&mut Vec<NodeId>>,
        test: Predicate,
        fallback: Fallback,
    ) {
        match post {
            Some(p) => self.simplify_expr_1(expr, pre, p, true, test, fallback),
            None => {
                let mut internal_post = Vec::new();
                self.simplify_expr_1(expr, pre, &mut internal_post, false, test, fallback);
                for t in internal_post {
                    self.add_tree(t, pre);
                }
            }
        }
    }

    fn simplify_expr_1(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: &mut Vec<NodeId>,
        external_post: bool,
        test: Predicate,
        fallback: Fallback,
    ) {
        // *&x and &*p fold away before any rewriting.
        loop {
            let code = self.arena.code(*expr);
            let op0 = self.arena.op(*expr, 0);
            match (code, op0) {
                (Code::IndirectRef, Some(inner)) if self.arena.code(inner) == Code::AddrExpr => {
                    *expr = self.arena.op(inner, 0).unwrap();
                }
                (Code::AddrExpr, Some(inner)) if self.arena.code(inner) == Code::IndirectRef => {
                    *expr = self.arena.op(inner, 0).unwrap();
                }
                _ => break,
            }
        }

        if test(self.arena, *expr) {
            return;
        }

        match self.arena.code(*expr) {
            Code::PostIncrement | Code::PostDecrement | Code::PreIncrement
            | Code::PreDecrement => {
                self.simplify_self_mod_expr(expr, pre, post);
            }

            Code::ArrayRef | Code::ComponentRef => {
                self.simplify_compound_lval(expr, pre, post);
            }

            Code::Cond => self.simplify_cond_expr(expr, pre),

            Code::Call => self.simplify_call_expr(expr, pre, post),

            Code::ArgList => self.simplify_arg_list(*expr, pre, post),

            Code::CompoundExpr => self.simplify_compound_expr(expr, pre, post),

            Code::RealPart | Code::ImagPart => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), test, fallback);
                self.arena.set_op(*expr, 0, Some(op));
                self.arena.update_side_effects(*expr);
                return;
            }

            Code::Modify => self.simplify_modify_expr(expr, pre, post),

            Code::TruthAndIf | Code::TruthOrIf => self.simplify_boolean_expr(expr, pre),

            Code::TruthNot => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_id, Fallback::Rvalue);
                let ty = self.arena.ty(*expr);
                let zero_ty = self.arena.ty(op).unwrap_or_else(|| self.arena.int_type());
                let zero = self.arena.integer_zero(zero_ty);
                *expr = self.arena.build2(Code::Eq, ty, op, zero);
            }

            Code::AddrExpr => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_varname,
                    Fallback::Lvalue);
                self.arena.set_op(*expr, 0, Some(op));
                self.arena.update_side_effects(*expr);
            }

            // va_arg is left alone so the vararg machinery still
            // recognizes it.
            Code::VaArg => {}

            Code::Nop | Code::Convert | Code::FixTrunc => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_varname,
                    Fallback::Rvalue);
                self.arena.set_op(*expr, 0, Some(op));
                self.arena.update_side_effects(*expr);
            }

            Code::IndirectRef => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_id, Fallback::Rvalue);
                self.arena.set_op(*expr, 0, Some(op));
                self.arena.update_side_effects(*expr);
            }

            Code::Negate => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_val, Fallback::Rvalue);
                self.arena.set_op(*expr, 0, Some(op));
                self.arena.update_side_effects(*expr);
            }

            Code::IntCst | Code::RealCst | Code::StringCst | Code::ComplexCst => {}

            // Compound literals and constructors are preserved whole.
            Code::CompoundLiteral | Code::Constructor => {}

            Code::StmtExpr => {
                self.stmt_expr_level += 1;
                let body = self.arena.op(*expr, 0).unwrap();
                self.simplify_stmt(body);
                self.stmt_expr_level -= 1;
            }

            // A SaveExpr turns into a SIMPLE identifier and disappears.
            Code::SaveExpr => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_id, Fallback::Rvalue);
                self.arena.set_op(*expr, 0, Some(op));
                *expr = op;
            }

            Code::BitFieldRef => {
                // Left as a scalar access of the underlying container.
            }

            Code::NonLvalue => {
                let mut op = self.arena.op(*expr, 0).unwrap();
                self.simplify_expr(&mut op, pre, Some(&mut *post), test, Fallback::Rvalue);
                self.arena.set_op(*expr, 0, Some(op));
                self.arena.update_side_effects(*expr);
            }

            code => match code.class() {
                CodeClass::Unary => {
                    let mut op = self.arena.op(*expr, 0).unwrap();
                    self.simplify_expr(&mut op, pre, Some(&mut *post), is_simple_val,
                        Fallback::Rvalue);
                    self.arena.set_op(*expr, 0, Some(op));
                    self.arena.update_side_effects(*expr);
                }
                CodeClass::Binary | CodeClass::Comparison => {
                    let mut op0 = self.arena.op(*expr, 0).unwrap();
                    self.simplify_expr(&mut op0, pre, Some(&mut *post), is_simple_val,
                        Fallback::Rvalue);
                    self.arena.set_op(*expr, 0, Some(op0));
                    let mut op1 = self.arena.op(*expr, 1).unwrap();
                    self.simplify_expr(&mut op1, pre, Some(&mut *post), is_simple_val,
                        Fallback::Rvalue);
                    self.arena.set_op(*expr, 1, Some(op1));
                    self.arena.update_side_effects(*expr);
                }
                CodeClass::Expression
                    if matches!(code, Code::TruthAnd | Code::TruthOr | Code::TruthXor) =>
                {
                    let mut op0 = self.arena.op(*expr, 0).unwrap();
                    self.simplify_expr(&mut op0, pre, Some(&mut *post), is_simple_val,
                        Fallback::Rvalue);
                    self.arena.set_op(*expr, 0, Some(op0));
                    let mut op1 = self.arena.op(*expr, 1).unwrap();
                    self.simplify_expr(&mut op1, pre, Some(&mut *post), is_simple_val,
                        Fallback::Rvalue);
                    self.arena.set_op(*expr, 1, Some(op1));
                    self.arena.update_side_effects(*expr);
                }
                _ => panic!("unhandled expression in simplify_expr: {:?}", code),
            },
        }

        // Sufficiently simple already? Only if we are not sitting on an
        // internal post queue, which must be flushed behind a temporary.
        let internal_pending = !external_post && !post.is_empty();
        if !internal_pending && test(self.arena, *expr) {
            return;
        }

        if fallback.allows_lvalue() && !internal_pending && is_simple_varname(self.arena, *expr)
        {
            // An lvalue will do: take the address, put it in a temporary,
            // and replace the expression by an indirection of it.
            let ty = self.arena.ty(*expr);
            let mut tmp = self.build_addr_expr(*expr);
            self.simplify_expr(&mut tmp, pre, Some(&mut *post), is_simple_id, Fallback::Rvalue);
            *expr = self.arena.build1(Code::IndirectRef, ty, tmp);
        } else if fallback.allows_rvalue() && is_simple_rhs(self.arena, *expr) {
            assert!(
                !self.is_void_type(self.arena.ty(*expr)),
                "cannot copy a void expression into a temporary"
            );
            *expr = self.get_initialized_tmp_var(*expr, pre);
        } else {
            panic!(
                "simplification failed for {:?} (fallback {:?})",
                self.arena.code(*expr),
                fallback
            );
        }

        assert!(test(self.arena, *expr), "temporary does not satisfy the predicate");
    }

    /// Address of T, folding away a toplevel indirection.
    fn build_addr_expr(&mut self, t: NodeId) -> NodeId {
        let t_ty = self.arena.ty(t).unwrap_or_else(|| self.arena.void_type());
        let ptr_ty = self.arena.pointer_type(t_ty);
        if self.arena.code(t) == Code::IndirectRef {
            let inner = self.arena.op(t, 0).unwrap();
            if self.arena.ty(inner) != Some(ptr_ty) {
                self.arena.build1(Code::Nop, Some(ptr_ty), inner)
            } else {
                inner
            }
        } else {
            self.arena.build1(Code::AddrExpr, Some(ptr_ty), t)
        }
    }

    /// `++x` and friends: compute the lvalue once, build the add/subtract
    /// on an rvalue copy, and queue the store on PRE (pre-form) or POST
    /// (post-form). The expression itself becomes the lvalue.
    fn simplify_self_mod_expr(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: &mut Vec<NodeId>,
    ) {
        let code = self.arena.code(*expr);

        let mut lvalue = self.arena.op(*expr, 0).unwrap();
        self.simplify_expr(&mut lvalue, pre, Some(&mut *post), is_simple_modify_lhs,
            Fallback::Lvalue);

        // An rvalue version of the lvalue, plus the step operand.
        let mut lhs = lvalue;
        self.simplify_expr(&mut lhs, pre, Some(&mut *post), is_simple_id, Fallback::Rvalue);
        let mut rhs = self.arena.op(*expr, 1).unwrap();
        self.simplify_expr(&mut rhs, pre, Some(&mut *post), is_simple_val, Fallback::Rvalue);

        let ty = self.arena.ty(*expr);
        let arith = if matches!(code, Code::PreIncrement | Code::PostIncrement) {
            self.arena.build2(Code::Plus, ty, lhs, rhs)
        } else {
            self.arena.build2(Code::Minus, ty, lhs, rhs)
        };
        assert!(is_simple_binary_expr(self.arena, arith));

        let store = self.arena.build_modify(lvalue, arith);
        if matches!(code, Code::PreIncrement | Code::PreDecrement) {
            self.add_tree(store, pre);
        } else {
            self.add_tree(store, post);
        }

        *expr = lvalue;
    }

    /// Array and member references are handled together: gather the spine
    /// of subscripts, simplify the base into a minimal lvalue, then every
    /// dimension left to right.
    fn simplify_compound_lval(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: &mut Vec<NodeId>,
    ) {
        assert!(matches!(
            self.arena.code(*expr),
            Code::ArrayRef | Code::ComponentRef
        ));

        // Walk down the spine; remember every ArrayRef so its dimension
        // can be simplified, plus the node holding the base.
        let mut array_refs: Vec<NodeId> = Vec::new();
        let mut holder = *expr;
        let mut last_code = self.arena.code(*expr);
        loop {
            let code = self.arena.code(holder);
            if code == Code::ArrayRef {
                array_refs.push(holder);
            }
            last_code = code;
            let base = self.arena.op(holder, 0).unwrap();
            if !matches!(self.arena.code(base), Code::ArrayRef | Code::ComponentRef) {
                break;
            }
            holder = base;
        }

        let fb = if last_code == Code::ComponentRef {
            Fallback::Either
        } else {
            Fallback::Lvalue
        };
        let mut base = self.arena.op(holder, 0).unwrap();
        self.simplify_expr(&mut base, pre, Some(&mut *post), is_simple_min_lval, fb);
        self.arena.set_op(holder, 0, Some(base));

        // Dimensions from left to right (outermost ref pushed first).
        for aref in array_refs {
            let mut dim = self.arena.op(aref, 1).unwrap();
            self.simplify_expr(&mut dim, pre, Some(&mut *post), is_simple_val, Fallback::Rvalue);
            self.arena.set_op(aref, 1, Some(dim));
            self.arena.update_side_effects(aref);
        }
        self.arena.update_side_effects(*expr);
    }

    fn simplify_call_expr(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: &mut Vec<NodeId>,
    ) {
        assert_eq!(self.arena.code(*expr), Code::Call);

        let mut callee = self.arena.op(*expr, 0).unwrap();
        self.simplify_expr(&mut callee, pre, Some(&mut *post), is_simple_id, Fallback::Rvalue);
        self.arena.set_op(*expr, 0, Some(callee));

        if let Some(args) = self.arena.op(*expr, 1) {
            self.simplify_arg_list(args, pre, post);
        }
        self.arena.update_side_effects(*expr);
    }

    fn simplify_arg_list(&mut self, args: NodeId, pre: &mut Vec<NodeId>, post: &mut Vec<NodeId>) {
        let count = self.arena.node(args).ops.len();
        for i in 0..count {
            if let Some(mut arg) = self.arena.op(args, i) {
                self.simplify_expr(&mut arg, pre, Some(&mut *post), is_simple_val, Fallback::Rvalue);
                self.arena.set_op(args, i, Some(arg));
            }
        }
        self.arena.update_side_effects(args);
    }

    /// `(p) ? a : b` becomes an if statement assigning a fresh temporary in
    /// both arms (no temporary when the result type is void).
    fn simplify_cond_expr(&mut self, expr: &mut NodeId, pre: &mut Vec<NodeId>) {
        assert_eq!(self.arena.code(*expr), Code::Cond);

        let ty = self.arena.ty(*expr);
        let void_result = self.is_void_type(ty) || ty.is_none();

        let pred = self.arena.op(*expr, 0).unwrap();
        let tval = self.arena.op(*expr, 1).unwrap();
        let fval = self.arena.op(*expr, 2).unwrap();

        let tmp = if void_result {
            None
        } else {
            Some(self.create_tmp_var(ty.unwrap()))
        };

        let loc = self.cur_loc.clone();
        let t_then = match tmp {
            Some(t) => {
                let m = self.arena.build_modify(t, tval);
                self.arena.expr_stmt(m, loc.clone())
            }
            None => self.arena.expr_stmt(tval, loc.clone()),
        };
        let t_then = self.build_scope_around(t_then);

        let t_else = match tmp {
            Some(t) => {
                let m = self.arena.build_modify(t, fval);
                self.arena.expr_stmt(m, loc.clone())
            }
            None => self.arena.expr_stmt(fval, loc.clone()),
        };
        let t_else = self.build_scope_around(t_else);

        let new_if = self
            .arena
            .build_with_ops(Code::IfStmt, None, &[Some(pred), Some(t_then), Some(t_else)]);
        self.arena.set_loc(new_if, loc);

        self.simplify_if_stmt(new_if, pre);
        self.add_tree(new_if, pre);

        *expr = match tmp {
            Some(t) => t,
            None => self.void_zero(),
        };
    }

    fn simplify_modify_expr(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: &mut Vec<NodeId>,
    ) {
        assert_eq!(self.arena.code(*expr), Code::Modify);

        let mut lhs = self.arena.op(*expr, 0).unwrap();
        self.simplify_expr(&mut lhs, pre, Some(&mut *post), is_simple_modify_lhs, Fallback::Lvalue);
        self.arena.set_op(*expr, 0, Some(lhs));

        let mut rhs = self.arena.op(*expr, 1).unwrap();
        self.simplify_expr(&mut rhs, pre, Some(&mut *post), is_simple_rhs, Fallback::Rvalue);
        self.arena.set_op(*expr, 1, Some(rhs));

        self.add_tree(*expr, pre);
        *expr = lhs;
    }

    /// `a && b` becomes `T = a; if (T != 0) T = b;` and `a || b` becomes
    /// `T = a; if (T == 0) T = b;`; the expression is rewritten to T.
    /// The new if statement is deliberately non-SIMPLE so that its own
    /// simplification puts the side effects of `b` behind the sequence
    /// point.
    fn simplify_boolean_expr(&mut self, expr: &mut NodeId, pre: &mut Vec<NodeId>) {
        let code = self.arena.code(*expr);
        assert!(matches!(code, Code::TruthAndIf | Code::TruthOrIf));

        let ty = self.arena.ty(*expr);
        let lhs = self.arena.op(*expr, 0).unwrap();
        let rhs = self.arena.op(*expr, 1).unwrap();

        let t = self.get_initialized_tmp_var(lhs, pre);

        let loc = self.cur_loc.clone();
        let m = self.arena.build_modify(t, rhs);
        let if_body = self.arena.expr_stmt(m, loc.clone());
        let if_body = self.build_scope_around(if_body);

        let t_ty = self.arena.ty(t).unwrap_or_else(|| self.arena.int_type());
        let zero = self.arena.integer_zero(t_ty);
        let if_cond = if code == Code::TruthAndIf {
            self.arena.build2(Code::Ne, Some(t_ty), t, zero)
        } else {
            self.arena.build2(Code::Eq, Some(t_ty), t, zero)
        };

        let if_stmt = self
            .arena
            .build_with_ops(Code::IfStmt, None, &[Some(if_cond), Some(if_body), None]);
        self.arena.set_loc(if_stmt, loc);

        self.simplify_if_stmt(if_stmt, pre);
        self.add_tree(if_stmt, pre);

        // If the context wants a different type, convert now.
        let mut result = t;
        if ty.is_some() && self.arena.ty(t) != ty {
            result = self.arena.build1(Code::Convert, ty, t);
            self.simplify_expr(&mut result, pre, None, is_simple_id, Fallback::Rvalue);
        }
        *expr = result;
    }

    /// The comma operator: every expression in the sequence is a sequence
    /// point; all but the last are emitted (with their side effects) to
    /// PRE, and the last becomes the value.
    fn simplify_compound_expr(
        &mut self,
        expr: &mut NodeId,
        pre: &mut Vec<NodeId>,
        post: &mut Vec<NodeId>,
    ) {
        assert_eq!(self.arena.code(*expr), Code::CompoundExpr);

        let mut seq: Vec<NodeId> = Vec::new();
        let mut t = *expr;
        loop {
            seq.push(self.arena.op(t, 0).unwrap());
            let rest = self.arena.op(t, 1).unwrap();
            if self.arena.code(rest) == Code::CompoundExpr {
                t = rest;
            } else {
                seq.push(rest);
                break;
            }
        }

        let last = seq.len() - 1;
        for (i, item) in seq.iter_mut().enumerate() {
            let mut item_pre = Vec::new();
            let mut item_post = Vec::new();
            self.simplify_expr(item, &mut item_pre, Some(&mut item_post), is_simple_expr,
                Fallback::Rvalue);
            for t in item_pre {
                self.add_tree(t, pre);
            }
            if i < last {
                self.add_tree(*item, pre);
                for t in item_post {
                    self.add_tree(t, pre);
                }
            } else {
                for t in item_post {
                    self.add_tree(t, post);
                }
            }
        }

        *expr = seq[last];
    }

    // ----- side-effect bookkeeping ---------------------------------------

    fn expr_has_effect(&self, expr: NodeId) -> bool {
        self.arena.node(expr).has_side_effects()
            || (self.arena.code(expr) == Code::Convert
                && self.is_void_type(self.arena.ty(expr)))
    }

    /// A statement has an effect unless it is a bare read of a
    /// non-volatile value. Inside a statement expression the last
    /// statement before the closing scope carries the value and counts as
    /// effectful even when it looks dead.
    fn stmt_has_effect(&self, stmt: NodeId) -> bool {
        if self.arena.code(stmt) != Code::ExprStmt {
            return true;
        }
        match self.arena.op(stmt, 0) {
            Some(expr) if self.expr_has_effect(expr) => true,
            _ => {
                if self.stmt_expr_level > 0
                    && let Some(next) = self.arena.chain(stmt)
                    && self.arena.code(next) == Code::ScopeStmt
                    && !self.arena.node(next).flags.contains(NodeFlags::SCOPE_BEGIN)
                {
                    return true;
                }
                false
            }
        }
    }

    /// Append T to LIST unless it is an expression or statement with no
    /// effect.
    fn add_tree(&mut self, t: NodeId, list: &mut Vec<NodeId>) {
        let keep = if self.arena.code(t).is_statement() {
            self.stmt_has_effect(t)
        } else {
            self.expr_has_effect(t)
        };
        if keep {
            list.push(t);
        }
    }

    /// Convert a pre/post list into a statement chain, wrapping bare
    /// expressions in ExprStmts carrying the current line.
    fn convert_to_stmt_chain(&mut self, list: &[NodeId]) -> Option<NodeId> {
        let mut head: Option<NodeId> = None;
        for &t in list {
            let stmt = if self.arena.code(t).is_statement() {
                self.arena.set_loc(t, self.cur_loc.clone());
                t
            } else {
                self.arena.expr_stmt(t, self.cur_loc.clone())
            };
            if self.stmt_has_effect(stmt) {
                head = self.arena.chainon(head, Some(stmt));
            }
        }
        head
    }

    /// Like `convert_to_stmt_chain` but the result is a template of
    /// unlinked statements to be copied per insertion site.
    fn stmt_template(&mut self, list: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &t in list {
            let stmt = if self.arena.code(t).is_statement() {
                self.arena.set_loc(t, self.cur_loc.clone());
                t
            } else {
                self.arena.expr_stmt(t, self.cur_loc.clone())
            };
            if self.stmt_has_effect(stmt) {
                out.push(stmt);
            }
        }
        out
    }

    // ----- loop wrap-around insertion ------------------------------------

    /// Insert a copy of the REEVAL statements before every depth-1
    /// continue in BODY and at the end of the loop body.
    fn insert_before_continue_end(&mut self, reeval: &[NodeId], body: NodeId) {
        if reeval.is_empty() {
            return;
        }
        let Some(head) = self.arena.op(body, 0) else {
            return;
        };

        let before_last = self.insert_before_continue(head, reeval);

        // If the last statement of the body is not a continue, the tail of
        // the loop is also a wrap-around point.
        if self.arena.code(before_last) != Code::ContinueStmt {
            let last = self.arena.chain(before_last);
            let mut prev = before_last;
            for &t in reeval {
                let copy = self.arena.deep_copy_node(t);
                self.arena.set_chain(prev, Some(copy));
                prev = copy;
            }
            self.arena.set_chain(prev, last);
        }
    }

    /// Walk the chain at HEAD up to (but excluding) its final statement,
    /// splicing a copy of REEVAL before every depth-1 ContinueStmt.
    /// Continues inside nested loops are left alone. Returns the
    /// before-last statement of the chain.
    fn insert_before_continue(&mut self, head: NodeId, reeval: &[NodeId]) -> NodeId {
        let mut node = head;
        loop {
            let Some(next) = self.arena.chain(node) else {
                return node;
            };
            if self.arena.chain(next).is_none() {
                return node;
            }

            match self.arena.code(next) {
                Code::ContinueStmt => {
                    let mut prev = node;
                    for &t in reeval {
                        let copy = self.arena.deep_copy_node(t);
                        self.arena.set_chain(prev, Some(copy));
                        prev = copy;
                    }
                    self.arena.set_chain(prev, Some(next));
                }
                Code::IfStmt => {
                    if let Some(clause) = self.arena.op(next, 1) {
                        self.recurse_into_block(clause, reeval);
                    }
                    if let Some(clause) = self.arena.op(next, 2) {
                        self.recurse_into_block(clause, reeval);
                    }
                }
                Code::SwitchStmt => {
                    if let Some(inner) = self.arena.op(next, 1) {
                        self.recurse_into_block(inner, reeval);
                    }
                }
                Code::CompoundStmt => {
                    self.recurse_into_block(next, reeval);
                }
                // Nested loops re-bind continue; don't descend.
                _ => {}
            }
            node = next;
        }
    }

    fn recurse_into_block(&mut self, block: NodeId, reeval: &[NodeId]) {
        if self.arena.code(block) == Code::CompoundStmt {
            if let Some(h) = self.arena.op(block, 0) {
                self.insert_before_continue(h, reeval);
            }
        }
    }

    // ----- scopes and temporaries ----------------------------------------

    /// Make sure operand I of OWNER is a compound statement with scope
    /// markers, wrapping whatever is there now.
    fn ensure_scoped(&mut self, owner: NodeId, i: usize) {
        let current = self.arena.op(owner, i);
        if let Some(c) = current
            && self.arena.code(c) == Code::CompoundStmt
            && self.arena.op(c, 0).is_some()
        {
            return;
        }
        let wrapped = match current {
            Some(c) => self.build_scope_around(c),
            None => self.build_scope_around_empty(),
        };
        self.arena.set_op(owner, i, Some(wrapped));
    }

    /// Wrap a single statement in `{ ... }` with scope markers.
    fn build_scope_around(&mut self, stmt: NodeId) -> NodeId {
        if self.arena.code(stmt) == Code::CompoundStmt && self.arena.op(stmt, 0).is_some() {
            return stmt;
        }
        let begin = self.scope_marker(true);
        let end = self.scope_marker(false);
        self.arena.set_chain(begin, Some(stmt));
        let last = self.arena.chain_last(stmt);
        self.arena.set_chain(last, Some(end));
        self.arena.build_with_ops(Code::CompoundStmt, None, &[Some(begin)])
    }

    fn build_scope_around_empty(&mut self) -> NodeId {
        let begin = self.scope_marker(true);
        let end = self.scope_marker(false);
        self.arena.set_chain(begin, Some(end));
        self.arena.build_with_ops(Code::CompoundStmt, None, &[Some(begin)])
    }

    fn scope_marker(&mut self, begin: bool) -> NodeId {
        let s = self.arena.build0(Code::ScopeStmt, None);
        if begin {
            self.arena.node_mut(s).flags |= NodeFlags::SCOPE_BEGIN;
        }
        s
    }

    fn void_zero(&mut self) -> NodeId {
        let v = self.arena.void_type();
        self.arena.int_cst(v, 0)
    }

    /// A fresh artificial temporary of TYPE, remembered for declaration at
    /// the end of the pass.
    pub fn create_tmp_var(&mut self, ty: NodeId) -> NodeId {
        assert_ne!(
            self.arena.code(ty),
            Code::ArrayType,
            "temporaries of array type make no sense"
        );
        let name = format!("T.{}", self.next_tmp_id);
        self.next_tmp_id += 1;
        let tmp = self.arena.var_decl(&name, ty);
        self.arena.node_mut(tmp).flags |= NodeFlags::ARTIFICIAL | NodeFlags::USED;
        self.arena.node_mut(tmp).flags &= !NodeFlags::READONLY;
        self.new_tmps.push(tmp);
        tmp
    }

    /// A fresh temporary initialized with VAL; the initialization lands on
    /// PRE.
    pub fn get_initialized_tmp_var(&mut self, val: NodeId, pre: &mut Vec<NodeId>) -> NodeId {
        let mut val = val;
        self.simplify_expr(&mut val, pre, None, is_simple_rhs, Fallback::Rvalue);
        let ty = self
            .arena
            .ty(val)
            .expect("initialized temporary needs a typed value");
        let t = self.create_tmp_var(ty);
        let m = self.arena.build_modify(t, val);
        self.add_tree(m, pre);
        t
    }

    /// Declare all temporaries created by the pass, right behind the
    /// declarations already at the top of the scope starting at HEAD.
    fn declare_tmp_vars(&mut self, head: NodeId) {
        let mut scope = head;
        while self.arena.code(scope) == Code::FileStmt {
            scope = self.arena.chain(scope).expect("dangling file statement");
        }
        assert!(
            self.arena.node(scope).flags.contains(NodeFlags::SCOPE_BEGIN),
            "function body does not start with a scope"
        );

        let mut last = scope;
        while let Some(next) = self.arena.chain(last) {
            if self.arena.code(next) != Code::DeclStmt {
                break;
            }
            last = next;
        }

        for tmp in std::mem::take(&mut self.new_tmps) {
            let decl = self.arena.build_with_ops(Code::DeclStmt, None, &[Some(tmp)]);
            let rest = self.arena.chain(last);
            self.arena.set_chain(last, Some(decl));
            self.arena.set_chain(decl, rest);
            last = decl;
        }
    }

    /// True when a temporary was created by this pass.
    pub fn is_simple_tmp_var(&self, id: NodeId) -> bool {
        self.arena.code(id) == Code::VarDecl
            && self.arena.node(id).is_artificial()
            && !self.arena.node(id).flags.contains(NodeFlags::STATIC)
            && !self.arena.node(id).flags.contains(NodeFlags::EXTERNAL)
    }

    pub fn tmp_count(&self) -> usize {
        self.new_tmps.len()
    }
}

// A helper used by the test suites of this crate and downstream consumers:
// render a statement chain as compact text, one statement per line.
#[doc(hidden)]
pub fn render_stmts(a: &Arena, head: Option<NodeId>) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = head;
    while let Some(id) = cur {
        render_stmt(a, id, &mut out);
        cur = a.chain(id);
    }
    out
}

fn render_stmt(a: &Arena, id: NodeId, out: &mut Vec<String>) {
    match a.code(id) {
        Code::ScopeStmt => {}
        Code::CompoundStmt => {
            out.push("{".to_string());
            for line in render_stmts(a, a.op(id, 0)) {
                out.push(format!("  {}", line));
            }
            out.push("}".to_string());
        }
        Code::ExprStmt => match a.op(id, 0) {
            Some(e) => out.push(format!("{};", render_expr(a, e))),
            None => out.push(";".to_string()),
        },
        Code::DeclStmt => {
            let d = a.op(id, 0).unwrap();
            out.push(format!("decl {};", render_expr(a, d)));
        }
        Code::IfStmt => {
            let cond = a.op(id, 0).map(|c| render_expr(a, c)).unwrap_or_default();
            out.push(format!("if ({})", cond));
            if let Some(t) = a.op(id, 1) {
                render_stmt(a, t, out);
            }
            if let Some(e) = a.op(id, 2) {
                out.push("else".to_string());
                render_stmt(a, e, out);
            }
        }
        Code::ForStmt => {
            let p = |x: Option<NodeId>| x.map(|e| render_expr(a, e)).unwrap_or_default();
            out.push(format!(
                "for ({}; {}; {})",
                p(a.op(id, 0)),
                p(a.op(id, 1)),
                p(a.op(id, 2))
            ));
            if let Some(b) = a.op(id, 3) {
                render_stmt(a, b, out);
            }
        }
        Code::WhileStmt => {
            let cond = a.op(id, 0).map(|c| render_expr(a, c)).unwrap_or_default();
            out.push(format!("while ({})", cond));
            if let Some(b) = a.op(id, 1) {
                render_stmt(a, b, out);
            }
        }
        Code::DoStmt => {
            out.push("do".to_string());
            if let Some(b) = a.op(id, 1) {
                render_stmt(a, b, out);
            }
            let cond = a.op(id, 0).map(|c| render_expr(a, c)).unwrap_or_default();
            out.push(format!("while ({});", cond));
        }
        Code::SwitchStmt => {
            let cond = a.op(id, 0).map(|c| render_expr(a, c)).unwrap_or_default();
            out.push(format!("switch ({})", cond));
            if let Some(b) = a.op(id, 1) {
                render_stmt(a, b, out);
            }
        }
        Code::ReturnStmt => match a.op(id, 0) {
            Some(m) => out.push(format!("return {};", render_expr(a, m))),
            None => out.push("return;".to_string()),
        },
        Code::ContinueStmt => out.push("continue;".to_string()),
        Code::BreakStmt => out.push("break;".to_string()),
        Code::GotoStmt => out.push("goto;".to_string()),
        Code::LabelStmt => out.push("label:".to_string()),
        Code::CaseLabel => out.push("case:".to_string()),
        other => out.push(format!("<{:?}>", other)),
    }
}

#[doc(hidden)]
pub fn render_expr(a: &Arena, id: NodeId) -> String {
    let bin = |op: &str| {
        format!(
            "{} {} {}",
            render_expr(a, a.op(id, 0).unwrap()),
            op,
            render_expr(a, a.op(id, 1).unwrap())
        )
    };
    match a.code(id) {
        Code::IntCst => match &a.node(id).payload {
            Payload::Int(v) => v.to_string(),
            _ => "?".to_string(),
        },
        Code::RealCst => match &a.node(id).payload {
            Payload::Real(v) => v.to_string(),
            _ => "?".to_string(),
        },
        Code::StringCst => match &a.node(id).payload {
            Payload::Str(s) => format!("{:?}", s),
            _ => "?".to_string(),
        },
        Code::VarDecl | Code::ParmDecl | Code::ResultDecl | Code::FunctionDecl
        | Code::Identifier | Code::SsaName => {
            a.decl_name(id).unwrap_or("?").to_string()
        }
        Code::FieldDecl => a.decl_name(id).unwrap_or("?").to_string(),
        Code::Modify => bin("="),
        Code::Plus => bin("+"),
        Code::Minus => bin("-"),
        Code::Mult => bin("*"),
        Code::TruncDiv => bin("/"),
        Code::TruncMod => bin("%"),
        Code::Lt => bin("<"),
        Code::Le => bin("<="),
        Code::Gt => bin(">"),
        Code::Ge => bin(">="),
        Code::Eq => bin("=="),
        Code::Ne => bin("!="),
        Code::TruthAndIf => bin("&&"),
        Code::TruthOrIf => bin("||"),
        Code::AddrExpr => format!("&{}", render_expr(a, a.op(id, 0).unwrap())),
        Code::IndirectRef => format!("*{}", render_expr(a, a.op(id, 0).unwrap())),
        Code::Negate => format!("-{}", render_expr(a, a.op(id, 0).unwrap())),
        Code::TruthNot => format!("!{}", render_expr(a, a.op(id, 0).unwrap())),
        Code::Nop | Code::Convert => {
            format!("({})", render_expr(a, a.op(id, 0).unwrap()))
        }
        Code::ArrayRef => format!(
            "{}[{}]",
            render_expr(a, a.op(id, 0).unwrap()),
            render_expr(a, a.op(id, 1).unwrap())
        ),
        Code::ComponentRef => format!(
            "{}.{}",
            render_expr(a, a.op(id, 0).unwrap()),
            render_expr(a, a.op(id, 1).unwrap())
        ),
        Code::Call => {
            let args = match a.op(id, 1) {
                Some(list) => a
                    .node(list)
                    .ops
                    .iter()
                    .flatten()
                    .map(|&x| render_expr(a, x))
                    .collect::<Vec<_>>()
                    .join(", "),
                None => String::new(),
            };
            format!("{}({})", render_expr(a, a.op(id, 0).unwrap()), args)
        }
        Code::CompoundExpr => bin(","),
        Code::Cond => format!(
            "{} ? {} : {}",
            render_expr(a, a.op(id, 0).unwrap()),
            render_expr(a, a.op(id, 1).unwrap()),
            render_expr(a, a.op(id, 2).unwrap())
        ),
        Code::PostIncrement => format!("{}++", render_expr(a, a.op(id, 0).unwrap())),
        Code::PreIncrement => format!("++{}", render_expr(a, a.op(id, 0).unwrap())),
        Code::PostDecrement => format!("{}--", render_expr(a, a.op(id, 0).unwrap())),
        Code::PreDecrement => format!("--{}", render_expr(a, a.op(id, 0).unwrap())),
        Code::SaveExpr => format!("save({})", render_expr(a, a.op(id, 0).unwrap())),
        other => format!("<{:?}>", other),
    }
}
