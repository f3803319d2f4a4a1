//! IR node representation.

use crate::code::Code;
use crate::location::SourceLocation;
use bitflags::bitflags;
use smallvec::SmallVec;
use std::num::NonZeroU32;

/// Dense handle into the node arena. `Option<NodeId>` is pointer-sized
/// thanks to the `NonZeroU32` niche; an absent operand is `None`, the
/// moral equivalent of a null tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> NodeId {
        NodeId(NonZeroU32::new(index as u32 + 1).expect("node index overflow"))
    }

    pub fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

bitflags! {
    /// Per-node flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u16 {
        /// Conservative over-approximation: set whenever any subtree has it.
        const SIDE_EFFECTS = 1 << 0;
        /// Declared by the compiler, not the user.
        const ARTIFICIAL = 1 << 1;
        const STATIC = 1 << 2;
        const EXTERNAL = 1 << 3;
        const READONLY = 1 << 4;
        const VOLATILE = 1 << 5;
        const USED = 1 << 6;
        /// On a ScopeStmt: this marker opens the scope (a clear bit closes it).
        const SCOPE_BEGIN = 1 << 7;
        const UNSIGNED = 1 << 8;
        const ADDRESSABLE = 1 << 9;
    }
}

/// Kind-specific payload. Most nodes carry none; constants, names and
/// fields carry their value here.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Int(i64),
    Real(f64),
    Str(String),
    Name(String),
    Field { name: String, bit_offset: u64 },
}

impl Payload {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Payload::Name(n) => Some(n),
            Payload::Field { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Universal IR node: operator tag, optional type, up to a handful of
/// operand references, flags, and an optional source location. Statements
/// additionally link to their successor through `chain`.
#[derive(Debug, Clone)]
pub struct Node {
    pub code: Code,
    pub ty: Option<NodeId>,
    pub ops: SmallVec<[Option<NodeId>; 4]>,
    pub flags: NodeFlags,
    pub loc: Option<SourceLocation>,
    pub chain: Option<NodeId>,
    pub payload: Payload,
}

impl Node {
    pub fn new(code: Code) -> Node {
        Node {
            code,
            ty: None,
            ops: SmallVec::new(),
            flags: NodeFlags::empty(),
            loc: None,
            chain: None,
            payload: Payload::None,
        }
    }

    pub fn has_side_effects(&self) -> bool {
        self.flags.contains(NodeFlags::SIDE_EFFECTS)
    }

    pub fn is_artificial(&self) -> bool {
        self.flags.contains(NodeFlags::ARTIFICIAL)
    }

    /// Operand accessor tolerant of short operand vectors.
    pub fn op(&self, i: usize) -> Option<NodeId> {
        self.ops.get(i).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_node_id_is_small() {
        assert_eq!(std::mem::size_of::<Option<NodeId>>(), 4);
    }

    #[test]
    fn test_op_out_of_range() {
        let n = Node::new(Code::IntCst);
        assert_eq!(n.op(2), None);
    }
}
