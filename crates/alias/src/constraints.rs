//! Constraint generation.
//!
//! Each assignment and phi produces constraints between constraint
//! expressions. The normalizations happen in [`PointsTo::process_constraint`]:
//! `&ANYTHING = x` turns around, a double dereference splits through a
//! fresh temporary, and taking an address marks the whole field range
//! address-taken.

use crate::vars::{ANYTHING_ID, Constraint, ConstraintExpr, ExprKind, NOTHING_ID, PointsTo};
use mill_ir::{Arena, Code, NodeId};

impl PointsTo {
    /// Record a completed constraint, applying the normalizations.
    pub(crate) fn process_constraint(&mut self, t: Constraint) {
        let mut lhs = t.lhs;
        let mut rhs = t.rhs;
        debug_assert!(lhs.var < self.vars.len());
        debug_assert!(rhs.var < self.vars.len());

        // ANYTHING = ANYTHING is pointless.
        if lhs.var == ANYTHING_ID && rhs.var == ANYTHING_ID {
            return;
        }
        // &ANYTHING = X becomes X = &ANYTHING.
        if lhs.var == ANYTHING_ID && lhs.kind == ExprKind::AddressOf {
            std::mem::swap(&mut lhs, &mut rhs);
            lhs.kind = ExprKind::Scalar;
            self.process_constraint(Constraint { lhs, rhs });
            return;
        }
        // *X = *Y splits through a temporary.
        if lhs.kind == ExprKind::Deref && rhs.kind == ExprKind::Deref {
            let tmp = self.fresh_artificial("deref_tmp");
            self.process_constraint(Constraint {
                lhs: ConstraintExpr::scalar(tmp),
                rhs,
            });
            self.process_constraint(Constraint {
                lhs,
                rhs: ConstraintExpr::scalar(tmp),
            });
            return;
        }

        if rhs.kind == ExprKind::AddressOf {
            // Normalize the target to a concrete field and mark the whole
            // range address-taken.
            let v = rhs.var + rhs.offset;
            let end = self.vars[rhs.var].end;
            let v = if v < end { v } else { rhs.var };
            let mut cur = v;
            while cur < end {
                self.vars[cur].address_taken = true;
                cur += 1;
            }
            self.constraints.push(Constraint {
                lhs,
                rhs: ConstraintExpr {
                    kind: ExprKind::AddressOf,
                    var: v,
                    offset: 0,
                },
            });
            return;
        }

        if lhs.kind != ExprKind::Deref && rhs.kind == ExprKind::Deref {
            self.vars[rhs.var].indirect_target = true;
        }
        self.constraints.push(Constraint { lhs, rhs });
    }

    /// The constraint expression for a declaration or SSA name, with the
    /// escape classes applied.
    fn expr_for_var(&mut self, arena: &Arena, t: NodeId) -> ConstraintExpr {
        if let Some(special) = self.escape_class(arena, t) {
            return ConstraintExpr {
                kind: ExprKind::AddressOf,
                var: special,
                offset: 0,
            };
        }
        ConstraintExpr::scalar(self.id_for_node(arena, t))
    }

    /// Dereference a constraint expression:
    /// `*(&x)` is `x`, `*x` is a Deref, `**x` goes through a temporary.
    fn do_deref(&mut self, cons: ConstraintExpr) -> ConstraintExpr {
        match cons.kind {
            ExprKind::Scalar => ConstraintExpr {
                kind: ExprKind::Deref,
                ..cons
            },
            ExprKind::AddressOf => ConstraintExpr {
                kind: ExprKind::Scalar,
                ..cons
            },
            ExprKind::Deref => {
                let tmp = self.fresh_artificial("deref_tmp");
                self.process_constraint(Constraint {
                    lhs: ConstraintExpr::scalar(tmp),
                    rhs: cons,
                });
                ConstraintExpr {
                    kind: ExprKind::Deref,
                    var: tmp,
                    offset: 0,
                }
            }
        }
    }

    /// The constraint expression for an arbitrary operand tree.
    pub(crate) fn constraint_for(&mut self, arena: &Arena, t: NodeId) -> ConstraintExpr {
        let code = arena.code(t);

        if code == Code::IntCst && arena.is_integer_zero(t) {
            return ConstraintExpr::scalar(NOTHING_ID);
        }
        if code == Code::StringCst {
            return ConstraintExpr {
                kind: ExprKind::AddressOf,
                var: crate::vars::READONLY_ID,
                offset: 0,
            };
        }

        match code {
            Code::AddrExpr => {
                let inner = self.constraint_for(arena, arena.op(t, 0).unwrap());
                match inner.kind {
                    // &*x cancels.
                    ExprKind::Deref => ConstraintExpr {
                        kind: ExprKind::Scalar,
                        ..inner
                    },
                    _ => ConstraintExpr {
                        kind: ExprKind::AddressOf,
                        ..inner
                    },
                }
            }

            Code::IndirectRef => {
                let inner = self.constraint_for(arena, arena.op(t, 0).unwrap());
                self.do_deref(inner)
            }

            Code::ArrayRef | Code::ComponentRef => self.constraint_for_component_ref(arena, t),

            Code::Call => {
                // Heap allocators produce a fresh heap variable; all
                // other calls can return anything.
                if self.call_is_allocation(arena, t) {
                    let heap = self.fresh_artificial("HEAP");
                    ConstraintExpr {
                        kind: ExprKind::AddressOf,
                        var: heap,
                        offset: 0,
                    }
                } else {
                    ConstraintExpr {
                        kind: ExprKind::AddressOf,
                        var: ANYTHING_ID,
                        offset: 0,
                    }
                }
            }

            Code::SsaName | Code::VarDecl | Code::ParmDecl | Code::ResultDecl
            | Code::FunctionDecl => self.expr_for_var(arena, t),

            Code::Nop | Code::Convert | Code::NonLvalue => {
                self.constraint_for(arena, arena.op(t, 0).unwrap())
            }

            // Pointer arithmetic with a constant field offset attaches
            // the offset to the base's expression.
            Code::Plus => {
                let op0 = arena.op(t, 0).unwrap();
                let op1 = arena.op(t, 1).unwrap();
                match (arena.int_value(op1), arena.int_value(op0)) {
                    (Some(c), _) if c >= 0 => {
                        let mut base = self.constraint_for(arena, op0);
                        base.offset += c as usize;
                        base
                    }
                    (_, Some(c)) if c >= 0 => {
                        let mut base = self.constraint_for(arena, op1);
                        base.offset += c as usize;
                        base
                    }
                    _ => ConstraintExpr {
                        kind: ExprKind::AddressOf,
                        var: ANYTHING_ID,
                        offset: 0,
                    },
                }
            }

            _ => ConstraintExpr {
                kind: ExprKind::AddressOf,
                var: ANYTHING_ID,
                offset: 0,
            },
        }
    }

    fn call_is_allocation(&self, arena: &Arena, call: NodeId) -> bool {
        let Some(callee) = arena.op(call, 0) else {
            return false;
        };
        matches!(
            arena.decl_name(callee),
            Some("malloc") | Some("calloc") | Some("realloc") | Some("alloca")
        )
    }

    /// Component and array references: walk down to the base, adding
    /// field offsets for record members; array indexing and indirection
    /// both dereference.
    fn constraint_for_component_ref(&mut self, arena: &Arena, t: NodeId) -> ConstraintExpr {
        let mut stack: Vec<NodeId> = Vec::new();
        let mut cur = t;
        while matches!(
            arena.code(cur),
            Code::ArrayRef | Code::ComponentRef | Code::IndirectRef
        ) {
            stack.push(cur);
            cur = arena.op(cur, 0).unwrap();
        }

        let mut result = if arena.is_integer_zero(cur) {
            ConstraintExpr::scalar(NOTHING_ID)
        } else {
            let base = self.expr_for_var(arena, cur);
            if base.kind == ExprKind::AddressOf && base.var <= crate::vars::READONLY_ID {
                ConstraintExpr {
                    kind: ExprKind::Deref,
                    var: base.var,
                    offset: 0,
                }
            } else {
                ConstraintExpr::scalar(base.var)
            }
        };

        while let Some(op) = stack.pop() {
            match arena.code(op) {
                Code::ComponentRef => {
                    let field = arena.op(op, 1).unwrap();
                    let base = arena.op(op, 0).unwrap();
                    let base_ty = arena.ty(base);
                    match base_ty {
                        Some(ty) if arena.code(ty) == Code::RecordType => {
                            result.offset += self.fieldnum_for_field(arena, ty, field);
                        }
                        // Union members all live at the whole variable.
                        _ => break,
                    }
                }
                Code::ArrayRef => {
                    result = self.do_deref(result);
                    break;
                }
                Code::IndirectRef => {
                    result = self.do_deref(result);
                }
                _ => break,
            }
        }

        if result.kind == ExprKind::Scalar {
            result.var += result.offset;
            result.offset = 0;
            if result.var >= self.vars.len() {
                result.var = ANYTHING_ID;
            }
        }
        result
    }

    // ----- statement-level entry points ------------------------------------

    /// Constraints for `lhs = rhs`. Aggregate copies expand field by
    /// field; an unknown right-hand side makes every field point to
    /// anything.
    pub fn add_assignment(&mut self, arena: &Arena, lhsop: NodeId, rhsop: NodeId) {
        let lhs_ty = self.decl_type(arena, lhsop);
        let rhs_ty = self.decl_type(arena, rhsop);
        let both_aggregate = lhs_ty
            .map(|t| arena.code(t) == Code::RecordType)
            .unwrap_or(false)
            && rhs_ty
                .map(|t| matches!(arena.code(t), Code::RecordType | Code::UnionType))
                .unwrap_or(false);

        if both_aggregate {
            self.do_structure_copy(arena, lhsop, rhsop);
            return;
        }

        let lhs = self.constraint_for(arena, lhsop);
        let code = arena.code(rhsop);
        match code.class() {
            mill_ir::CodeClass::Binary
                if code != Code::Plus && arena.code(rhsop) != Code::Minus =>
            {
                // Arithmetic on pointers degrades per operand.
                for i in 0..2 {
                    if let Some(op) = arena.op(rhsop, i) {
                        let rhs = self.constraint_for(arena, op);
                        self.process_constraint(Constraint { lhs, rhs });
                    }
                }
            }
            _ => {
                let rhs = self.constraint_for(arena, rhsop);
                self.process_constraint(Constraint { lhs, rhs });
            }
        }
    }

    /// Constraints for a phi: one copy per argument.
    pub fn add_phi(&mut self, arena: &Arena, result: NodeId, args: &[NodeId]) {
        let lhs = self.constraint_for(arena, result);
        for &arg in args {
            let rhs = self.constraint_for(arena, arg);
            self.process_constraint(Constraint { lhs, rhs });
        }
    }

    /// Parameter passing for a call: `param_i = arg_i` plus the return
    /// value copy `lhs = return_slot`.
    pub fn add_call(
        &mut self,
        arena: &Arena,
        lhs: Option<NodeId>,
        params: &[NodeId],
        args: &[NodeId],
        return_slot: Option<NodeId>,
    ) {
        for (param, arg) in params.iter().zip(args.iter()) {
            let p = self.constraint_for(arena, *param);
            let a = self.constraint_for(arena, *arg);
            self.process_constraint(Constraint { lhs: p, rhs: a });
        }
        if let Some(lhs) = lhs {
            let l = self.constraint_for(arena, lhs);
            let r = match return_slot {
                Some(slot) => self.constraint_for(arena, slot),
                None => ConstraintExpr {
                    kind: ExprKind::AddressOf,
                    var: ANYTHING_ID,
                    offset: 0,
                },
            };
            self.process_constraint(Constraint { lhs: l, rhs: r });
        }
    }

    /// An incoming parameter may point anywhere.
    pub fn add_parameter(&mut self, arena: &Arena, decl: NodeId) {
        let id = self.id_for_node(arena, decl);
        let end = self.vars[id].end;
        self.vars[id].is_artificial = true;
        for v in id..end {
            self.process_constraint(Constraint {
                lhs: ConstraintExpr::scalar(v),
                rhs: ConstraintExpr {
                    kind: ExprKind::AddressOf,
                    var: ANYTHING_ID,
                    offset: 0,
                },
            });
        }
    }

    fn decl_type(&self, arena: &Arena, t: NodeId) -> Option<NodeId> {
        arena.ty(t)
    }

    fn do_structure_copy(&mut self, arena: &Arena, lhsop: NodeId, rhsop: NodeId) {
        let lhs = self.constraint_for(arena, lhsop);
        let rhs = self.constraint_for(arena, rhsop);

        if rhs.var == ANYTHING_ID {
            // Unknown RHS: every field of the LHS points to anything.
            let size = self
                .decl_type(arena, lhsop)
                .map(|t| self.num_fields_for_type(arena, t))
                .unwrap_or(1);
            for i in 0..size {
                let mut templhs = lhs;
                if templhs.kind == ExprKind::Scalar {
                    templhs.var += i;
                } else {
                    templhs.offset += i;
                }
                self.process_constraint(Constraint { lhs: templhs, rhs });
            }
            return;
        }

        let size = self
            .decl_type(arena, rhsop)
            .map(|t| self.num_fields_for_type(arena, t))
            .unwrap_or(1);
        for i in 0..size {
            let mut templhs = lhs;
            let mut temprhs = rhs;
            if templhs.kind == ExprKind::Scalar {
                templhs.var += i;
            } else {
                templhs.offset += i;
            }
            if temprhs.kind == ExprKind::Scalar {
                temprhs.var += i;
            } else {
                temprhs.offset += i;
            }
            self.process_constraint(Constraint {
                lhs: templhs,
                rhs: temprhs,
            });
        }
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_ir::Arena;

    fn ptr_var(arena: &mut Arena, name: &str) -> NodeId {
        let int = arena.int_type();
        let ptr = arena.pointer_type(int);
        arena.var_decl(name, ptr)
    }

    #[test]
    fn test_address_of_marks_taken() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = arena.pointer_type(int);
        let x = arena.var_decl("x", int);
        let p = ptr_var(&mut arena, "p");
        let addr = arena.build1(Code::AddrExpr, Some(ptr), x);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, addr);
        let xid = pta.lookup_id(x).unwrap();
        assert!(pta.var(xid).address_taken);
    }

    #[test]
    fn test_deref_rhs_marks_indirect_target() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let x = arena.var_decl("x", int);
        let p = ptr_var(&mut arena, "p");
        let star = arena.build1(Code::IndirectRef, Some(int), p);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, x, star);
        let pid = pta.lookup_id(p).unwrap();
        assert!(pta.var(pid).indirect_target);
    }

    #[test]
    fn test_double_deref_splits() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = arena.pointer_type(int);
        let pptr = arena.pointer_type(ptr);
        let p = arena.var_decl("p", pptr);
        let q = arena.var_decl("q", pptr);
        let star_p = arena.build1(Code::IndirectRef, Some(ptr), p);
        let star_q = arena.build1(Code::IndirectRef, Some(ptr), q);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, star_p, star_q);
        // No remaining constraint has Deref on both sides.
        for c in &pta.constraints {
            assert!(
                !(c.lhs.kind == ExprKind::Deref && c.rhs.kind == ExprKind::Deref),
                "unsplit double deref"
            );
        }
    }

    #[test]
    fn test_null_assignment_points_to_nothing() {
        let mut arena = Arena::new();
        let p = ptr_var(&mut arena, "p");
        let int = arena.int_type();
        let zero = arena.integer_zero(int);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, zero);
        let c = pta.constraints.last().unwrap();
        assert_eq!(c.rhs.var, NOTHING_ID);
    }

    #[test]
    fn test_malloc_creates_heap_var() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let ptr = arena.pointer_type(int);
        let fnty = arena.function_type(ptr);
        let malloc = arena.function_decl("malloc", fnty);
        let args = arena.arg_list(&[]);
        let call = arena.build2(Code::Call, Some(ptr), malloc, args);
        let p = ptr_var(&mut arena, "p");

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, call);
        let c = *pta.constraints.last().unwrap();
        assert_eq!(c.rhs.kind, ExprKind::AddressOf);
        assert!(pta.var(c.rhs.var).name.starts_with("HEAP."));
        assert!(pta.var(c.rhs.var).is_artificial);
    }

    #[test]
    fn test_component_ref_selects_field() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s = arena.record_type("pt");
        arena.add_field(s, "a", 0, int);
        let fb = arena.add_field(s, "b", 32, int);
        let x = arena.var_decl("x", s);
        let ptr = arena.pointer_type(int);
        let p = arena.var_decl("p", ptr);
        let comp = arena.build2(Code::ComponentRef, Some(int), x, fb);
        let addr = arena.build1(Code::AddrExpr, Some(ptr), comp);

        let mut pta = PointsTo::new();
        pta.add_assignment(&arena, p, addr);
        let xid = pta.lookup_id(x).unwrap();
        let c = *pta.constraints.last().unwrap();
        assert_eq!(c.rhs.kind, ExprKind::AddressOf);
        assert_eq!(c.rhs.var, xid + 1);
    }

    #[test]
    fn test_structure_copy_expands_fields() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s = arena.record_type("pair4");
        arena.add_field(s, "a", 0, int);
        arena.add_field(s, "b", 32, int);
        let x = arena.var_decl("x", s);
        let y = arena.var_decl("y", s);

        let mut pta = PointsTo::new();
        let before = pta.constraint_count();
        pta.add_assignment(&arena, x, y);
        assert_eq!(pta.constraint_count() - before, 2);
    }
}
