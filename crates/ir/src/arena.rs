//! Append-only node arena with interning.
//!
//! Constants, identifiers, declarations and types are interned: building
//! the same value twice yields the same `NodeId`, so equality of handles is
//! equality of values for those codes. Expression and statement nodes are
//! distinct per build call. Nodes are never freed individually; the arena
//! is dropped as a whole with its compilation context.

use crate::code::{Code, CodeClass};
use crate::location::SourceLocation;
use crate::node::{Node, NodeFlags, NodeId, Payload};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Int { ty: Option<NodeId>, value: i64 },
    Real { ty: Option<NodeId>, bits: u64 },
    Str { value: String },
    Ident { name: String },
    Ssa { name: String },
    Decl { code: Code, name: String, ty: Option<NodeId> },
    VoidType,
    BooleanType,
    IntegerType { bits: u32, unsigned: bool },
    RealType { bits: u32 },
    PointerType { to: NodeId },
    ArrayType { elem: NodeId },
    RecordType { tag: String },
    UnionType { tag: String },
    FunctionType { ret: NodeId },
}

/// The node arena for one compilation unit.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
    interner: HashMap<InternKey, NodeId>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn interned(&mut self, key: InternKey, make: impl FnOnce() -> Node) -> NodeId {
        if let Some(&id) = self.interner.get(&key) {
            return id;
        }
        let id = self.push(make());
        self.interner.insert(key, id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn code(&self, id: NodeId) -> Code {
        self.node(id).code
    }

    pub fn op(&self, id: NodeId, i: usize) -> Option<NodeId> {
        self.node(id).op(i)
    }

    pub fn set_op(&mut self, id: NodeId, i: usize, op: Option<NodeId>) {
        let node = self.node_mut(id);
        while node.ops.len() <= i {
            node.ops.push(None);
        }
        node.ops[i] = op;
        if let Some(op) = op
            && self.node(op).has_side_effects()
        {
            self.node_mut(id).flags |= NodeFlags::SIDE_EFFECTS;
        }
    }

    pub fn ty(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ty
    }

    pub fn loc(&self, id: NodeId) -> Option<SourceLocation> {
        self.node(id).loc.clone()
    }

    pub fn set_loc(&mut self, id: NodeId, loc: Option<SourceLocation>) {
        self.node_mut(id).loc = loc;
    }

    // ----- types ---------------------------------------------------------

    pub fn void_type(&mut self) -> NodeId {
        self.interned(InternKey::VoidType, || Node::new(Code::VoidType))
    }

    pub fn boolean_type(&mut self) -> NodeId {
        self.interned(InternKey::BooleanType, || Node::new(Code::BooleanType))
    }

    pub fn integer_type(&mut self, bits: u32, unsigned: bool) -> NodeId {
        self.interned(InternKey::IntegerType { bits, unsigned }, || {
            let mut n = Node::new(Code::IntegerType);
            n.payload = Payload::Int(bits as i64);
            if unsigned {
                n.flags |= NodeFlags::UNSIGNED;
            }
            n
        })
    }

    /// The default `int` type.
    pub fn int_type(&mut self) -> NodeId {
        self.integer_type(32, false)
    }

    pub fn real_type(&mut self, bits: u32) -> NodeId {
        self.interned(InternKey::RealType { bits }, || {
            let mut n = Node::new(Code::RealType);
            n.payload = Payload::Int(bits as i64);
            n
        })
    }

    pub fn pointer_type(&mut self, to: NodeId) -> NodeId {
        self.interned(InternKey::PointerType { to }, || {
            let mut n = Node::new(Code::PointerType);
            n.ops = smallvec![Some(to)];
            n
        })
    }

    pub fn array_type(&mut self, elem: NodeId) -> NodeId {
        self.interned(InternKey::ArrayType { elem }, || {
            let mut n = Node::new(Code::ArrayType);
            n.ops = smallvec![Some(elem)];
            n
        })
    }

    pub fn record_type(&mut self, tag: &str) -> NodeId {
        self.interned(InternKey::RecordType { tag: tag.to_string() }, || {
            let mut n = Node::new(Code::RecordType);
            n.payload = Payload::Name(tag.to_string());
            n
        })
    }

    pub fn union_type(&mut self, tag: &str) -> NodeId {
        self.interned(InternKey::UnionType { tag: tag.to_string() }, || {
            let mut n = Node::new(Code::UnionType);
            n.payload = Payload::Name(tag.to_string());
            n
        })
    }

    pub fn function_type(&mut self, ret: NodeId) -> NodeId {
        self.interned(InternKey::FunctionType { ret }, || {
            let mut n = Node::new(Code::FunctionType);
            n.ops = smallvec![Some(ret)];
            n
        })
    }

    /// Append a field to an aggregate type and return its FieldDecl.
    pub fn add_field(&mut self, aggregate: NodeId, name: &str, bit_offset: u64, ty: NodeId) -> NodeId {
        debug_assert!(matches!(
            self.code(aggregate),
            Code::RecordType | Code::UnionType
        ));
        let mut n = Node::new(Code::FieldDecl);
        n.ty = Some(ty);
        n.payload = Payload::Field {
            name: name.to_string(),
            bit_offset,
        };
        let field = self.push(n);
        self.node_mut(aggregate).ops.push(Some(field));
        field
    }

    /// The fields of an aggregate type, in declaration order.
    pub fn fields(&self, aggregate: NodeId) -> Vec<NodeId> {
        self.node(aggregate).ops.iter().copied().flatten().collect()
    }

    // ----- constants -----------------------------------------------------

    pub fn int_cst(&mut self, ty: NodeId, value: i64) -> NodeId {
        self.interned(InternKey::Int { ty: Some(ty), value }, || {
            let mut n = Node::new(Code::IntCst);
            n.ty = Some(ty);
            n.payload = Payload::Int(value);
            n
        })
    }

    pub fn real_cst(&mut self, ty: NodeId, value: f64) -> NodeId {
        self.interned(
            InternKey::Real {
                ty: Some(ty),
                bits: value.to_bits(),
            },
            || {
                let mut n = Node::new(Code::RealCst);
                n.ty = Some(ty);
                n.payload = Payload::Real(value);
                n
            },
        )
    }

    pub fn string_cst(&mut self, value: &str) -> NodeId {
        self.interned(InternKey::Str { value: value.to_string() }, || {
            let mut n = Node::new(Code::StringCst);
            n.payload = Payload::Str(value.to_string());
            n
        })
    }

    pub fn integer_zero(&mut self, ty: NodeId) -> NodeId {
        self.int_cst(ty, 0)
    }

    pub fn integer_one(&mut self, ty: NodeId) -> NodeId {
        self.int_cst(ty, 1)
    }

    pub fn int_value(&self, id: NodeId) -> Option<i64> {
        if self.code(id) == Code::IntCst {
            self.node(id).payload.as_int()
        } else {
            None
        }
    }

    pub fn is_integer_zero(&self, id: NodeId) -> bool {
        self.int_value(id) == Some(0)
    }

    pub fn is_integer_one(&self, id: NodeId) -> bool {
        self.int_value(id) == Some(1)
    }

    // ----- names and declarations ----------------------------------------

    pub fn identifier(&mut self, name: &str) -> NodeId {
        self.interned(InternKey::Ident { name: name.to_string() }, || {
            let mut n = Node::new(Code::Identifier);
            n.payload = Payload::Name(name.to_string());
            n
        })
    }

    /// SSA names are interned by their version string, e.g. `"i_3"`.
    pub fn ssa_name(&mut self, name: &str, ty: NodeId) -> NodeId {
        self.interned(InternKey::Ssa { name: name.to_string() }, || {
            let mut n = Node::new(Code::SsaName);
            n.ty = Some(ty);
            n.payload = Payload::Name(name.to_string());
            n
        })
    }

    fn decl(&mut self, code: Code, name: &str, ty: NodeId) -> NodeId {
        self.interned(
            InternKey::Decl {
                code,
                name: name.to_string(),
                ty: Some(ty),
            },
            || {
                let mut n = Node::new(code);
                n.ty = Some(ty);
                n.payload = Payload::Name(name.to_string());
                n
            },
        )
    }

    pub fn var_decl(&mut self, name: &str, ty: NodeId) -> NodeId {
        self.decl(Code::VarDecl, name, ty)
    }

    pub fn parm_decl(&mut self, name: &str, ty: NodeId) -> NodeId {
        self.decl(Code::ParmDecl, name, ty)
    }

    pub fn result_decl(&mut self, name: &str, ty: NodeId) -> NodeId {
        self.decl(Code::ResultDecl, name, ty)
    }

    pub fn function_decl(&mut self, name: &str, ty: NodeId) -> NodeId {
        self.decl(Code::FunctionDecl, name, ty)
    }

    pub fn label_decl(&mut self, name: &str) -> NodeId {
        let void = self.void_type();
        self.decl(Code::LabelDecl, name, void)
    }

    pub fn decl_name(&self, id: NodeId) -> Option<&str> {
        self.node(id).payload.as_name()
    }

    // ----- expression and statement builders -----------------------------

    fn build(&mut self, code: Code, ty: Option<NodeId>, ops: SmallVec<[Option<NodeId>; 4]>) -> NodeId {
        debug_assert!(
            !code.is_shared(),
            "interned code {:?} built through build()",
            code
        );
        let mut flags = NodeFlags::empty();
        if code.has_inherent_side_effects() {
            flags |= NodeFlags::SIDE_EFFECTS;
        }
        for op in ops.iter().flatten() {
            if self.node(*op).has_side_effects()
                || self.node(*op).flags.contains(NodeFlags::VOLATILE)
            {
                flags |= NodeFlags::SIDE_EFFECTS;
            }
        }
        let mut n = Node::new(code);
        n.ty = ty;
        n.ops = ops;
        n.flags = flags;
        self.push(n)
    }

    pub fn build0(&mut self, code: Code, ty: Option<NodeId>) -> NodeId {
        self.build(code, ty, SmallVec::new())
    }

    pub fn build1(&mut self, code: Code, ty: Option<NodeId>, op0: NodeId) -> NodeId {
        self.build(code, ty, smallvec![Some(op0)])
    }

    pub fn build2(&mut self, code: Code, ty: Option<NodeId>, op0: NodeId, op1: NodeId) -> NodeId {
        self.build(code, ty, smallvec![Some(op0), Some(op1)])
    }

    pub fn build3(
        &mut self,
        code: Code,
        ty: Option<NodeId>,
        op0: NodeId,
        op1: NodeId,
        op2: NodeId,
    ) -> NodeId {
        self.build(code, ty, smallvec![Some(op0), Some(op1), Some(op2)])
    }

    /// Builder for nodes with optional operand slots (statements mostly).
    pub fn build_with_ops(
        &mut self,
        code: Code,
        ty: Option<NodeId>,
        ops: &[Option<NodeId>],
    ) -> NodeId {
        self.build(code, ty, SmallVec::from_slice(ops))
    }

    /// Variable-arity argument list for a call.
    pub fn arg_list(&mut self, args: &[NodeId]) -> NodeId {
        let ops: SmallVec<[Option<NodeId>; 4]> = args.iter().map(|a| Some(*a)).collect();
        self.build(Code::ArgList, None, ops)
    }

    /// `lhs = rhs`, typed like the left-hand side.
    pub fn build_modify(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        let ty = self.ty(lhs);
        self.build(Code::Modify, ty, smallvec![Some(lhs), Some(rhs)])
    }

    /// Wrap an expression in an ExprStmt at LOC.
    pub fn expr_stmt(&mut self, expr: NodeId, loc: Option<SourceLocation>) -> NodeId {
        let s = self.build(Code::ExprStmt, None, smallvec![Some(expr)]);
        self.set_loc(s, loc);
        s
    }

    // ----- statement chains ----------------------------------------------

    pub fn chain(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).chain
    }

    pub fn set_chain(&mut self, id: NodeId, next: Option<NodeId>) {
        self.node_mut(id).chain = next;
    }

    /// Last node of the chain starting at ID.
    pub fn chain_last(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(next) = self.chain(cur) {
            cur = next;
        }
        cur
    }

    /// Append chain B to chain A; returns the head of the result.
    pub fn chainon(&mut self, a: Option<NodeId>, b: Option<NodeId>) -> Option<NodeId> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => {
                let last = self.chain_last(a);
                debug_assert_ne!(last, b, "chainon would create a cycle");
                self.set_chain(last, Some(b));
                Some(a)
            }
        }
    }

    /// Iterate a statement chain into a Vec of ids (chains are short).
    pub fn chain_to_vec(&self, head: Option<NodeId>) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = head;
        while let Some(id) = cur {
            out.push(id);
            cur = self.chain(id);
        }
        out
    }

    // ----- copying -------------------------------------------------------

    /// Deep copy of NODE. Declarations, constants, identifiers and types
    /// are shared, everything else is duplicated. The copy's chain link is
    /// cleared; bodies of compound statements are copied as whole chains.
    pub fn deep_copy_node(&mut self, id: NodeId) -> NodeId {
        self.copy_node(id, false)
    }

    /// Like [`Arena::deep_copy_node`] but additionally shares SaveExpr and
    /// StmtExpr nodes, which must keep their identity across unsharing.
    pub fn copy_mostly(&mut self, id: NodeId) -> NodeId {
        self.copy_node(id, true)
    }

    fn copy_node(&mut self, id: NodeId, mostly: bool) -> NodeId {
        let code = self.code(id);
        if code.is_shared() || code == Code::SsaName {
            return id;
        }
        if mostly && matches!(code, Code::SaveExpr | Code::StmtExpr) {
            return id;
        }
        let template = self.node(id).clone();
        let mut copy = template.clone();
        copy.chain = None;
        for (i, op) in template.ops.iter().enumerate() {
            copy.ops[i] = match op {
                Some(op) if code == Code::CompoundStmt && i == 0 => {
                    self.copy_list(Some(*op), mostly)
                }
                Some(op) => Some(self.copy_node(*op, mostly)),
                None => None,
            };
        }
        self.push(copy)
    }

    /// Copy every statement of the chain starting at HEAD.
    pub fn deep_copy_list(&mut self, head: Option<NodeId>) -> Option<NodeId> {
        self.copy_list(head, false)
    }

    fn copy_list(&mut self, head: Option<NodeId>, mostly: bool) -> Option<NodeId> {
        let mut out_head = None;
        let mut out_tail: Option<NodeId> = None;
        let mut cur = head;
        while let Some(id) = cur {
            let copy = self.copy_node(id, mostly);
            match out_tail {
                None => out_head = Some(copy),
                Some(t) => self.set_chain(t, Some(copy)),
            }
            out_tail = Some(copy);
            cur = self.chain(id);
        }
        out_head
    }

    /// Pre-order walk of the operand tree rooted at ID. The callback
    /// returns false to prune a subtree; interned leaves (declarations,
    /// constants, types) are visited but never descended into twice.
    pub fn walk(&self, id: NodeId, f: &mut impl FnMut(&Arena, NodeId) -> bool) {
        if !f(self, id) {
            return;
        }
        if self.code(id).is_shared() {
            return;
        }
        for i in 0..self.node(id).ops.len() {
            if let Some(op) = self.op(id, i) {
                self.walk(op, f);
            }
        }
    }

    /// Recompute the side-effects bit of ID from its operands. Used after
    /// in-place operand surgery.
    pub fn update_side_effects(&mut self, id: NodeId) {
        let ops = self.node(id).ops.clone();
        let mut se = self.node(id).code.has_inherent_side_effects();
        for op in ops.iter().flatten() {
            se |= self.node(*op).has_side_effects();
        }
        if se {
            self.node_mut(id).flags |= NodeFlags::SIDE_EFFECTS;
        } else {
            self.node_mut(id).flags &= !NodeFlags::SIDE_EFFECTS;
        }
    }

    /// True when the node class is unary/binary/comparison-like with all
    /// operands present.
    pub fn class(&self, id: NodeId) -> CodeClass {
        self.code(id).class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_interning() {
        let mut a = Arena::new();
        let int = a.int_type();
        let c1 = a.int_cst(int, 42);
        let c2 = a.int_cst(int, 42);
        let c3 = a.int_cst(int, 43);
        assert_eq!(c1, c2);
        assert_ne!(c1, c3);
    }

    #[test]
    fn test_type_interning() {
        let mut a = Arena::new();
        let int = a.int_type();
        let p1 = a.pointer_type(int);
        let p2 = a.pointer_type(int);
        assert_eq!(p1, p2);
        let uns = a.integer_type(32, true);
        assert_ne!(int, uns);
    }

    #[test]
    fn test_expressions_are_not_interned() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let e1 = a.build2(Code::Plus, Some(int), x, x);
        let e2 = a.build2(Code::Plus, Some(int), x, x);
        assert_ne!(e1, e2);
    }

    #[test]
    fn test_side_effect_propagation() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);
        let assign = a.build_modify(x, one);
        assert!(a.node(assign).has_side_effects());
        let wrapped = a.build2(Code::Plus, Some(int), assign, one);
        assert!(a.node(wrapped).has_side_effects());
        let pure = a.build2(Code::Plus, Some(int), x, one);
        assert!(!a.node(pure).has_side_effects());
    }

    #[test]
    fn test_chainon_and_last() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let s1 = a.expr_stmt(x, None);
        let s2 = a.expr_stmt(x, None);
        let s3 = a.expr_stmt(x, None);
        let head = a.chainon(Some(s1), Some(s2));
        let head = a.chainon(head, Some(s3));
        assert_eq!(head, Some(s1));
        assert_eq!(a.chain_to_vec(head), vec![s1, s2, s3]);
        assert_eq!(a.chain_last(s1), s3);
    }

    #[test]
    fn test_deep_copy_shares_decls() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);
        let sum = a.build2(Code::Plus, Some(int), x, one);
        let copy = a.deep_copy_node(sum);
        assert_ne!(copy, sum);
        assert_eq!(a.op(copy, 0), Some(x));
        assert_eq!(a.op(copy, 1), Some(one));
    }

    #[test]
    fn test_copy_mostly_shares_save_expr() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let save = a.build1(Code::SaveExpr, Some(int), x);
        let sum = a.build2(Code::Plus, Some(int), save, x);
        let copy = a.copy_mostly(sum);
        assert_eq!(a.op(copy, 0), Some(save));
        let deep = a.deep_copy_node(sum);
        assert_ne!(a.op(deep, 0), Some(save));
    }

    #[test]
    fn test_walk_visits_operands() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);
        let sum = a.build2(Code::Plus, Some(int), x, one);
        let outer = a.build2(Code::Mult, Some(int), sum, one);

        let mut seen = Vec::new();
        a.walk(outer, &mut |_, id| {
            seen.push(id);
            true
        });
        assert_eq!(seen, vec![outer, sum, x, one, one]);

        // Pruning stops the descent.
        let mut count = 0;
        a.walk(outer, &mut |a, id| {
            count += 1;
            a.code(id) != Code::Plus
        });
        assert_eq!(count, 3);
    }

    #[test]
    fn test_deep_copy_list_copies_chain() {
        let mut a = Arena::new();
        let int = a.int_type();
        let x = a.var_decl("x", int);
        let one = a.integer_one(int);
        let m1 = a.build_modify(x, one);
        let s1 = a.expr_stmt(m1, None);
        let s2 = a.expr_stmt(x, None);
        a.set_chain(s1, Some(s2));
        let copy = a.deep_copy_list(Some(s1)).unwrap();
        let copied = a.chain_to_vec(Some(copy));
        assert_eq!(copied.len(), 2);
        assert_ne!(copied[0], s1);
        assert_ne!(copied[1], s2);
        // The original chain is untouched.
        assert_eq!(a.chain_to_vec(Some(s1)), vec![s1, s2]);
    }
}
