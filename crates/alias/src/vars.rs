//! The points-to variable universe.
//!
//! Every compile-time object becomes one var-info per leaf field: an
//! aggregate's first var-info names the whole variable and the fields
//! follow at consecutive ids, so `var + field` arithmetic selects fields.
//! The `end` id bounds the range; an access past it is out of range.
//! Unions and arrays collapse to a single unknown-size var-info, and
//! three artificial variables exist from the start: `NULL` (nothing),
//! `ANYTHING` (the unknown pointer), and `READONLY` (literal memory).

use bit_set::BitSet;
use mill_ir::{Arena, Code, NodeFlags, NodeId};
use std::collections::HashMap;

pub type VarId = usize;

pub const NOTHING_ID: VarId = 0;
pub const ANYTHING_ID: VarId = 1;
pub const READONLY_ID: VarId = 2;

/// What kind of access a constraint expression performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    /// `x`
    Scalar,
    /// `*x`
    Deref,
    /// `&x`
    AddressOf,
}

/// One side of a constraint: a kind, a variable, and a field offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintExpr {
    pub kind: ExprKind,
    pub var: VarId,
    pub offset: usize,
}

impl ConstraintExpr {
    pub fn scalar(var: VarId) -> ConstraintExpr {
        ConstraintExpr {
            kind: ExprKind::Scalar,
            var,
            offset: 0,
        }
    }
}

/// A constraint `lhs = rhs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    pub lhs: ConstraintExpr,
    pub rhs: ConstraintExpr,
}

/// Per-variable record in the points-to universe.
#[derive(Debug)]
pub struct VarInfo {
    pub name: String,
    /// IR declaration this var stands for, if any.
    pub decl: Option<NodeId>,
    /// One past the last field id of the variable this field belongs to.
    pub end: VarId,
    /// Graph node currently representing this variable (union-find style,
    /// updated as cycles collapse).
    pub node: VarId,
    pub address_taken: bool,
    pub indirect_target: bool,
    pub is_artificial: bool,
    /// Unions and variable arrays: any offset acts as offset zero.
    pub is_unknown_size: bool,
    /// Points-to solution, a set of var ids.
    pub solution: BitSet,
    /// Var ids merged into this node.
    pub variables: BitSet,
    /// Complex constraints (those with a Deref) attached to this node.
    pub complex: Vec<Constraint>,
}

impl VarInfo {
    fn new(name: String, decl: Option<NodeId>, end: VarId, node: VarId) -> VarInfo {
        VarInfo {
            name,
            decl,
            end,
            node,
            address_taken: false,
            indirect_target: false,
            is_artificial: false,
            is_unknown_size: false,
            solution: BitSet::new(),
            variables: BitSet::new(),
            complex: Vec::new(),
        }
    }
}

/// The constraint-based points-to engine for one function.
pub struct PointsTo {
    pub vars: Vec<VarInfo>,
    pub(crate) constraints: Vec<Constraint>,
    id_for_decl: HashMap<NodeId, VarId>,
    /// `(aggregate type, bit offset) -> field index`, shared across all
    /// variables of the type.
    fieldnum: HashMap<(NodeId, u64), usize>,
    num_fields_cache: HashMap<NodeId, usize>,
    next_heap: usize,
    next_temp: usize,
    pub(crate) solved: bool,
    /// The converged constraint graph, kept for re-solving checks.
    pub(crate) graph: Option<crate::graph::ConstraintGraph>,
}

impl Default for PointsTo {
    fn default() -> Self {
        PointsTo::new()
    }
}

impl PointsTo {
    pub fn new() -> PointsTo {
        let mut pta = PointsTo {
            vars: Vec::new(),
            constraints: Vec::new(),
            id_for_decl: HashMap::new(),
            fieldnum: HashMap::new(),
            num_fields_cache: HashMap::new(),
            next_heap: 0,
            next_temp: 0,
            solved: false,
            graph: None,
        };

        // NULL: a variable may point to nothing.
        let nothing = pta.push_var("NULL", None, 1);
        pta.vars[nothing].is_artificial = true;
        debug_assert_eq!(nothing, NOTHING_ID);

        // ANYTHING: the unknown pointer; it points to itself.
        let anything = pta.push_var("ANYTHING", None, 2);
        pta.vars[anything].is_artificial = true;
        pta.vars[anything].address_taken = true;
        debug_assert_eq!(anything, ANYTHING_ID);
        pta.constraints.push(Constraint {
            lhs: ConstraintExpr::scalar(anything),
            rhs: ConstraintExpr {
                kind: ExprKind::AddressOf,
                var: anything,
                offset: 0,
            },
        });

        // READONLY: string literals and const storage.
        let readonly = pta.push_var("READONLY", None, 3);
        pta.vars[readonly].is_artificial = true;
        pta.vars[readonly].address_taken = true;
        debug_assert_eq!(readonly, READONLY_ID);
        pta.constraints.push(Constraint {
            lhs: ConstraintExpr::scalar(readonly),
            rhs: ConstraintExpr {
                kind: ExprKind::AddressOf,
                var: readonly,
                offset: 0,
            },
        });

        pta
    }

    fn push_var(&mut self, name: &str, decl: Option<NodeId>, end: VarId) -> VarId {
        let id = self.vars.len();
        self.vars.push(VarInfo::new(name.to_string(), decl, end, id));
        id
    }

    pub fn var(&self, id: VarId) -> &VarInfo {
        &self.vars[id]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut VarInfo {
        &mut self.vars[id]
    }

    /// The graph node currently standing for ID, following collapses.
    pub fn node_of(&self, id: VarId) -> VarId {
        self.vars[id].node
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number of leaf fields a variable of type TY expands to. Records
    /// the `(type, bit offset) -> field index` mapping on the way.
    pub fn num_fields_for_type(&mut self, arena: &Arena, ty: NodeId) -> usize {
        if let Some(&n) = self.num_fields_cache.get(&ty) {
            return n;
        }
        let n = match arena.code(ty) {
            Code::RecordType => {
                let mut counter = 0usize;
                for field in arena.fields(ty) {
                    let offset = match &arena.node(field).payload {
                        mill_ir::Payload::Field { bit_offset, .. } => *bit_offset,
                        _ => 0,
                    };
                    self.fieldnum.insert((ty, offset), counter);
                    let fty = arena.ty(field);
                    match fty {
                        Some(fty)
                            if matches!(
                                arena.code(fty),
                                Code::RecordType | Code::UnionType
                            ) && fty != ty =>
                        {
                            counter += self.num_fields_for_type(arena, fty);
                        }
                        _ => counter += 1,
                    }
                }
                counter.max(1)
            }
            // Arrays and unions are globbed to one variable.
            Code::ArrayType | Code::UnionType => 1,
            _ => 1,
        };
        self.num_fields_cache.insert(ty, n);
        n
    }

    /// Field index of FIELD within its aggregate, creating the type's
    /// field table on demand.
    pub fn fieldnum_for_field(&mut self, arena: &Arena, aggregate_ty: NodeId, field: NodeId) -> usize {
        let offset = match &arena.node(field).payload {
            mill_ir::Payload::Field { bit_offset, .. } => *bit_offset,
            _ => 0,
        };
        if let Some(&n) = self.fieldnum.get(&(aggregate_ty, offset)) {
            return n;
        }
        // The type was only ever seen through pointers; process it now.
        self.num_fields_for_type(arena, aggregate_ty);
        self.fieldnum
            .get(&(aggregate_ty, offset))
            .copied()
            .unwrap_or(0)
    }

    /// The var id for DECL, creating one var-info per field on first use.
    pub fn id_for_node(&mut self, arena: &Arena, decl: NodeId) -> VarId {
        if let Some(&id) = self.id_for_decl.get(&decl) {
            return id;
        }
        let name = arena
            .decl_name(decl)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("<v{}>", decl.index()));
        let num_fields = match arena.ty(decl) {
            Some(ty) if matches!(arena.code(ty), Code::RecordType) => {
                self.num_fields_for_type(arena, ty)
            }
            _ => 1,
        };
        let unknown_size = matches!(
            arena.ty(decl).map(|t| arena.code(t)),
            Some(Code::UnionType) | Some(Code::ArrayType)
        );

        let index = self.vars.len();
        let end = index + num_fields;
        self.push_var(&name, Some(decl), end);
        self.vars[index].is_unknown_size = unknown_size;
        self.id_for_decl.insert(decl, index);
        for j in 1..num_fields {
            let field_name = format!("{}#{}", name, j);
            let id = self.push_var(&field_name, Some(decl), end);
            debug_assert_eq!(id, index + j);
        }
        index
    }

    /// A fresh artificial variable (heap site or constraint temporary).
    pub fn fresh_artificial(&mut self, prefix: &str) -> VarId {
        let n = if prefix == "HEAP" {
            self.next_heap += 1;
            self.next_heap
        } else {
            self.next_temp += 1;
            self.next_temp
        };
        let name = format!("{}.{}", prefix, n);
        let index = self.vars.len();
        self.push_var(&name, None, index + 1);
        self.vars[index].is_artificial = true;
        index
    }

    /// Looked-up var id for a declaration previously seen by constraint
    /// generation.
    pub fn lookup_id(&self, decl: NodeId) -> Option<VarId> {
        self.id_for_decl.get(&decl).copied()
    }

    /// Is the variable at J, offset OFF, still inside its object? For
    /// globbed and artificial variables any offset acts as offset zero.
    pub fn type_safe(&self, j: VarId, offset: &mut usize) -> bool {
        let vi = &self.vars[j];
        if j == ANYTHING_ID || vi.is_artificial || vi.is_unknown_size {
            *offset = 0;
            return true;
        }
        j > ANYTHING_ID && (j + *offset) < vi.end
    }

    /// Decide whether DECL names constant storage or externally visible
    /// memory, which degrade to the artificial variables.
    pub(crate) fn escape_class(&self, arena: &Arena, decl: NodeId) -> Option<VarId> {
        let flags = arena.node(decl).flags;
        if flags.contains(NodeFlags::READONLY) {
            return Some(READONLY_ID);
        }
        if flags.contains(NodeFlags::STATIC) || flags.contains(NodeFlags::EXTERNAL) {
            return Some(ANYTHING_ID);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_ir::Arena;

    #[test]
    fn test_special_vars_exist() {
        let pta = PointsTo::new();
        assert_eq!(pta.var(NOTHING_ID).name, "NULL");
        assert_eq!(pta.var(ANYTHING_ID).name, "ANYTHING");
        assert_eq!(pta.var(READONLY_ID).name, "READONLY");
        assert!(pta.var(ANYTHING_ID).is_artificial);
    }

    #[test]
    fn test_struct_expands_to_fields() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s = arena.record_type("pair");
        arena.add_field(s, "a", 0, int);
        arena.add_field(s, "b", 32, int);
        let decl = arena.var_decl("x", s);

        let mut pta = PointsTo::new();
        let id = pta.id_for_node(&arena, decl);
        assert_eq!(pta.var(id).end, id + 2);
        assert_eq!(pta.var(id + 1).name, "x#1");
        assert_eq!(pta.var(id + 1).end, id + 2);
    }

    #[test]
    fn test_union_is_unknown_size() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let u = arena.union_type("u");
        arena.add_field(u, "a", 0, int);
        let decl = arena.var_decl("x", u);

        let mut pta = PointsTo::new();
        let id = pta.id_for_node(&arena, decl);
        assert!(pta.var(id).is_unknown_size);
        assert_eq!(pta.var(id).end, id + 1);
    }

    #[test]
    fn test_type_safe_clamps_offsets() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s = arena.record_type("pair2");
        arena.add_field(s, "a", 0, int);
        arena.add_field(s, "b", 32, int);
        let decl = arena.var_decl("x", s);

        let mut pta = PointsTo::new();
        let id = pta.id_for_node(&arena, decl);
        let mut off = 1;
        assert!(pta.type_safe(id, &mut off));
        let mut off = 2;
        assert!(!pta.type_safe(id, &mut off));
        // Artificial vars absorb any offset.
        let mut off = 9;
        assert!(pta.type_safe(ANYTHING_ID, &mut off));
        assert_eq!(off, 0);
    }

    #[test]
    fn test_fieldnum_table_shared_by_type() {
        let mut arena = Arena::new();
        let int = arena.int_type();
        let s = arena.record_type("pair3");
        arena.add_field(s, "a", 0, int);
        let b = arena.add_field(s, "b", 32, int);
        let mut pta = PointsTo::new();
        pta.num_fields_for_type(&arena, s);
        assert_eq!(pta.fieldnum_for_field(&arena, s, b), 1);
    }
}
