//! The SIMPLE grammar predicates.
//!
//! Each predicate is a pure test against the grammar of simplified trees;
//! the simplifier uses them both to decide whether a rewrite is needed and
//! to verify that a rewrite produced what was asked for. None of them
//! mutate the arena.
//!
//! The grammar, informally:
//!
//! ```text
//! val       : ID | CONST
//! varname   : ID | compound lvalue
//! min_lval  : ID | '*' ID
//! rhs       : val | unary | binary | call | varname
//! condexpr  : val | val relop val
//! expr      : rhs | varname '=' rhs
//! ```

use mill_ir::{Arena, Code, CodeClass, NodeId};

/// Function-pointer predicate handed to `simplify_expr`.
pub type Predicate = fn(&Arena, NodeId) -> bool;

/// Identifier: a declaration usable by name.
pub fn is_simple_id(a: &Arena, id: NodeId) -> bool {
    matches!(
        a.code(id),
        Code::VarDecl | Code::ParmDecl | Code::ResultDecl | Code::FunctionDecl
    )
}

/// Constant or identifier.
pub fn is_simple_val(a: &Arena, id: NodeId) -> bool {
    is_simple_id(a, id) || a.code(id).is_constant()
}

/// Minimal lvalue: an identifier or a single indirection of one.
pub fn is_simple_min_lval(a: &Arena, id: NodeId) -> bool {
    if is_simple_id(a, id) {
        return true;
    }
    a.code(id) == Code::IndirectRef && a.op(id, 0).is_some_and(|b| is_simple_id(a, b))
}

/// Array/component reference chain over a minimal lvalue, with every array
/// index a simple value.
pub fn is_simple_compound_lval(a: &Arena, id: NodeId) -> bool {
    let mut cur = id;
    if !matches!(a.code(cur), Code::ArrayRef | Code::ComponentRef) {
        return false;
    }
    loop {
        match a.code(cur) {
            Code::ArrayRef => {
                match a.op(cur, 1) {
                    Some(idx) if is_simple_val(a, idx) => {}
                    _ => return false,
                }
                match a.op(cur, 0) {
                    Some(base) => cur = base,
                    None => return false,
                }
            }
            Code::ComponentRef => {
                if a.op(cur, 1).map(|f| a.code(f)) != Some(Code::FieldDecl) {
                    return false;
                }
                match a.op(cur, 0) {
                    Some(base) => cur = base,
                    None => return false,
                }
            }
            _ => break,
        }
    }
    is_simple_min_lval(a, cur)
}

/// Anything that can name storage: identifier or compound lvalue.
pub fn is_simple_varname(a: &Arena, id: NodeId) -> bool {
    is_simple_id(a, id) || is_simple_compound_lval(a, id)
}

/// Left-hand side of an assignment.
pub fn is_simple_modify_lhs(a: &Arena, id: NodeId) -> bool {
    is_simple_varname(a, id) || is_simple_min_lval(a, id)
}

/// Unary expression over simple operands, including conversions and the
/// address-of / indirection forms.
pub fn is_simple_unary_expr(a: &Arena, id: NodeId) -> bool {
    match a.code(id) {
        Code::IndirectRef => a.op(id, 0).is_some_and(|o| is_simple_id(a, o)),
        Code::AddrExpr => a.op(id, 0).is_some_and(|o| is_simple_varname(a, o)),
        Code::Nop | Code::Convert | Code::FixTrunc => {
            a.op(id, 0).is_some_and(|o| is_simple_varname(a, o) || is_simple_val(a, o))
        }
        Code::RealPart | Code::ImagPart => a.op(id, 0).is_some_and(|o| is_simple_val(a, o)),
        c if c.class() == CodeClass::Unary => a.op(id, 0).is_some_and(|o| is_simple_val(a, o)),
        _ => false,
    }
}

/// Binary or comparison expression with simple-value operands.
pub fn is_simple_binary_expr(a: &Arena, id: NodeId) -> bool {
    let c = a.code(id);
    let binary_like = matches!(c.class(), CodeClass::Binary | CodeClass::Comparison)
        || matches!(c, Code::TruthAnd | Code::TruthOr | Code::TruthXor);
    binary_like
        && a.op(id, 0).is_some_and(|o| is_simple_val(a, o))
        && a.op(id, 1).is_some_and(|o| is_simple_val(a, o))
}

/// Every call argument is a simple value.
pub fn is_simple_arglist(a: &Arena, id: NodeId) -> bool {
    a.code(id) == Code::ArgList
        && a.node(id)
            .ops
            .iter()
            .flatten()
            .all(|&arg| is_simple_val(a, arg))
}

/// Call with an identifier callee and a simple argument list.
pub fn is_simple_call_expr(a: &Arena, id: NodeId) -> bool {
    a.code(id) == Code::Call
        && a.op(id, 0).is_some_and(|f| is_simple_id(a, f))
        && a.op(id, 1).is_some_and(|args| is_simple_arglist(a, args))
}

/// Right-hand side of an assignment. Constructors, compound literals,
/// bit-field references, va_arg and statement expressions are accepted as
/// opaque: the simplifier preserves them rather than decomposing them.
pub fn is_simple_rhs(a: &Arena, id: NodeId) -> bool {
    is_simple_val(a, id)
        || is_simple_unary_expr(a, id)
        || is_simple_binary_expr(a, id)
        || is_simple_call_expr(a, id)
        || is_simple_compound_lval(a, id)
        || matches!(
            a.code(id),
            Code::Constructor | Code::CompoundLiteral | Code::BitFieldRef | Code::VaArg
                | Code::StmtExpr
        )
}

/// Control-flow predicate: a simple value or a comparison of two.
pub fn is_simple_condexpr(a: &Arena, id: NodeId) -> bool {
    is_simple_val(a, id)
        || (a.code(id).is_comparison()
            && a.op(id, 0).is_some_and(|o| is_simple_val(a, o))
            && a.op(id, 1).is_some_and(|o| is_simple_val(a, o)))
}

/// Expression allowed as a whole statement: a simple RHS, or an assignment
/// with simple sides.
pub fn is_simple_expr(a: &Arena, id: NodeId) -> bool {
    if is_simple_rhs(a, id) {
        return true;
    }
    a.code(id) == Code::Modify
        && a.op(id, 0).is_some_and(|l| is_simple_modify_lhs(a, l))
        && a.op(id, 1).is_some_and(|r| is_simple_rhs(a, r))
}

/// Comma-chain of simple expressions (used only to recognize loop headers
/// that need no work).
pub fn is_simple_exprseq(a: &Arena, id: NodeId) -> bool {
    match a.code(id) {
        Code::CompoundExpr => {
            a.op(id, 0).is_some_and(|f| is_simple_expr(a, f))
                && a.op(id, 1).is_some_and(|r| is_simple_exprseq(a, r))
        }
        _ => is_simple_expr(a, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_ir::Arena;

    fn setup() -> (Arena, NodeId, NodeId, NodeId) {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let c = a.int_cst(int, 7);
        (a, int, x, c)
    }

    #[test]
    fn test_val_and_id() {
        let (a, _, x, c) = setup();
        assert!(is_simple_id(&a, x));
        assert!(!is_simple_id(&a, c));
        assert!(is_simple_val(&a, x));
        assert!(is_simple_val(&a, c));
    }

    #[test]
    fn test_binary_needs_simple_operands() {
        let (mut a, int, x, c) = setup();
        let simple = a.build2(Code::Plus, Some(int), x, c);
        assert!(is_simple_binary_expr(&a, simple));
        assert!(is_simple_rhs(&a, simple));
        let nested = a.build2(Code::Plus, Some(int), simple, c);
        assert!(!is_simple_binary_expr(&a, nested));
        assert!(!is_simple_rhs(&a, nested));
    }

    #[test]
    fn test_condexpr() {
        let (mut a, int, x, c) = setup();
        let cmp = a.build2(Code::Lt, Some(int), x, c);
        assert!(is_simple_condexpr(&a, cmp));
        assert!(is_simple_condexpr(&a, x));
        let plus = a.build2(Code::Plus, Some(int), x, c);
        let bad = a.build2(Code::Lt, Some(int), plus, c);
        assert!(!is_simple_condexpr(&a, bad));
    }

    #[test]
    fn test_compound_lval() {
        let (mut a, int, x, c) = setup();
        let arr_ty = a.array_type(int);
        let arr = a.var_decl("buf", arr_ty);
        let aref = a.build2(Code::ArrayRef, Some(int), arr, c);
        assert!(is_simple_compound_lval(&a, aref));
        assert!(is_simple_varname(&a, aref));
        assert!(is_simple_rhs(&a, aref));

        let plus = a.build2(Code::Plus, Some(int), x, c);
        let bad = a.build2(Code::ArrayRef, Some(int), arr, plus);
        assert!(!is_simple_compound_lval(&a, bad));
    }

    #[test]
    fn test_modify_is_expr_not_rhs() {
        let (mut a, _, x, c) = setup();
        let m = a.build_modify(x, c);
        assert!(is_simple_expr(&a, m));
        assert!(!is_simple_rhs(&a, m));
    }

    #[test]
    fn test_call() {
        let (mut a, int, x, c) = setup();
        let fn_ty = a.function_type(int);
        let f = a.function_decl("f", fn_ty);
        let args = a.arg_list(&[x, c]);
        let call = a.build2(Code::Call, Some(int), f, args);
        assert!(is_simple_call_expr(&a, call));
        assert!(is_simple_rhs(&a, call));
    }
}
