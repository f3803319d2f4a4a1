//! Read-only SSA provider interface.
//!
//! The analyzer does not build SSA itself: the consumer supplies, for each
//! SSA name, its defining statement (an assignment right-hand side or a
//! phi with per-argument edge indicators), the loop containing the
//! definition, and per loop a single exit condition. SSA names appear in
//! right-hand sides as `Code::SsaName` nodes of the shared arena.

use crate::chrec::LoopId;
use mill_ir::NodeId;
use std::collections::HashMap;

/// The loop tree. Loop 0 is the function body pseudo-loop; ids are
/// assigned in creation order, so an inner loop always has a larger id
/// than the loops containing it.
#[derive(Debug)]
pub struct Loops {
    parents: Vec<Option<LoopId>>,
    depths: Vec<usize>,
}

impl Default for Loops {
    fn default() -> Self {
        Loops::new()
    }
}

impl Loops {
    pub fn new() -> Loops {
        Loops {
            parents: vec![None],
            depths: vec![0],
        }
    }

    /// Create a loop nested in PARENT and return its id.
    pub fn add_loop(&mut self, parent: LoopId) -> LoopId {
        assert!(parent < self.parents.len(), "unknown parent loop");
        let id = self.parents.len();
        self.parents.push(Some(parent));
        self.depths.push(self.depths[parent] + 1);
        id
    }

    pub fn depth(&self, l: LoopId) -> usize {
        self.depths[l]
    }

    pub fn parent(&self, l: LoopId) -> Option<LoopId> {
        self.parents[l]
    }

    /// Is INNER equal to or nested inside OUTER?
    pub fn contains(&self, outer: LoopId, inner: LoopId) -> bool {
        let mut cur = Some(inner);
        while let Some(l) = cur {
            if l == outer {
                return true;
            }
            cur = self.parents[l];
        }
        false
    }

    /// The ancestor of LOOP at depth DEPTH (LOOP itself when depths match).
    pub fn superloop_at_depth(&self, l: LoopId, depth: usize) -> LoopId {
        let mut cur = l;
        while self.depths[cur] > depth {
            cur = self.parents[cur].expect("depth underflow");
        }
        cur
    }
}

/// One incoming phi argument. For a loop phi, `from_inside` distinguishes
/// the back edges (the argument is defined in the loop body) from the
/// entry edges. For a condition phi it marks irreducible back edges,
/// which the analyzer refuses to follow.
#[derive(Debug, Clone)]
pub struct PhiArg {
    pub value: NodeId,
    pub from_inside: bool,
}

#[derive(Debug, Clone)]
pub enum SsaDef {
    /// `name = rhs`.
    Assign { rhs: NodeId },
    /// A phi node. `loop_phi` is true when the phi sits in the header of
    /// `loop_id` and merges an entry value with back-edge values.
    Phi {
        loop_id: LoopId,
        loop_phi: bool,
        args: Vec<PhiArg>,
    },
}

/// A single-exit loop's controlling condition: the loop runs while TEST
/// is true (after accounting for which edge leaves the loop).
#[derive(Debug, Clone)]
pub struct ExitCondition {
    pub test: NodeId,
    /// The exit edge is taken when TEST is true; the analyzer inverts the
    /// comparison in that case.
    pub exit_when_true: bool,
}

/// The read-only SSA view of one function.
#[derive(Debug, Default)]
pub struct SsaBody {
    defs: HashMap<NodeId, SsaDef>,
    def_loops: HashMap<NodeId, LoopId>,
    exits: HashMap<LoopId, ExitCondition>,
}

impl SsaBody {
    pub fn new() -> SsaBody {
        SsaBody::default()
    }

    pub fn set_def(&mut self, name: NodeId, loop_id: LoopId, def: SsaDef) {
        self.defs.insert(name, def);
        self.def_loops.insert(name, loop_id);
    }

    pub fn def(&self, name: NodeId) -> Option<&SsaDef> {
        self.defs.get(&name)
    }

    /// Loop containing the definition of NAME (0 when unknown: the name
    /// is effectively a parameter).
    pub fn loop_of(&self, name: NodeId) -> LoopId {
        self.def_loops.get(&name).copied().unwrap_or(0)
    }

    pub fn set_exit_condition(&mut self, loop_id: LoopId, test: NodeId, exit_when_true: bool) {
        self.exits.insert(
            loop_id,
            ExitCondition {
                test,
                exit_when_true,
            },
        );
    }

    pub fn exit_condition(&self, loop_id: LoopId) -> Option<&ExitCondition> {
        self.exits.get(&loop_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_nesting() {
        let mut loops = Loops::new();
        let outer = loops.add_loop(0);
        let inner = loops.add_loop(outer);
        assert_eq!(loops.depth(outer), 1);
        assert_eq!(loops.depth(inner), 2);
        assert!(loops.contains(outer, inner));
        assert!(!loops.contains(inner, outer));
        assert!(outer < inner, "ids grow inward");
        assert_eq!(loops.superloop_at_depth(inner, 1), outer);
    }
}
