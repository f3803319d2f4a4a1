//! The constraint graph.
//!
//! Nodes are var-info ids; an edge `from -> to` is a copy constraint
//! whose solution flows from FROM into TO, shifted by each offset in the
//! edge's weight set. Complex constraints (anything with a dereference)
//! are not edges: they live on the var they dereference and grow the
//! graph during solving.

use crate::vars::{ANYTHING_ID, Constraint, ExprKind, PointsTo};
use crate::vars::VarId;
use bit_set::BitSet;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct ConstraintGraph {
    /// succs[n]: destination -> weight set.
    pub succs: Vec<BTreeMap<VarId, BitSet>>,
    /// preds[n]: the sources with an edge into n.
    pub preds: Vec<BTreeSet<VarId>>,
}

impl ConstraintGraph {
    pub fn with_size(n: usize) -> ConstraintGraph {
        ConstraintGraph {
            succs: vec![BTreeMap::new(); n],
            preds: vec![BTreeSet::new(); n],
        }
    }

    pub fn grow(&mut self, n: usize) {
        while self.succs.len() < n {
            self.succs.push(BTreeMap::new());
            self.preds.push(BTreeSet::new());
        }
    }

    /// Add an edge FROM -> TO carrying WEIGHT. Self edges of weight zero
    /// are meaningless and dropped. Returns true if the edge or the
    /// weight is new.
    pub fn add_edge(&mut self, from: VarId, to: VarId, weight: usize) -> bool {
        if from == to && weight == 0 {
            return false;
        }
        self.grow(from.max(to) + 1);
        let weights = self.succs[from].entry(to).or_default();
        let added = weights.insert(weight);
        if added {
            self.preds[to].insert(from);
        }
        added
    }

    pub fn has_edge(&self, from: VarId, to: VarId) -> bool {
        self.succs.get(from).is_some_and(|m| m.contains_key(&to))
    }

    pub fn weights(&self, from: VarId, to: VarId) -> Option<&BitSet> {
        self.succs.get(from).and_then(|m| m.get(&to))
    }

    /// Remove every edge touching NODE, fixing up the reverse maps.
    pub fn clear_edges_for_node(&mut self, node: VarId) {
        let succs = std::mem::take(&mut self.succs[node]);
        for dest in succs.keys() {
            self.preds[*dest].remove(&node);
        }
        let preds = std::mem::take(&mut self.preds[node]);
        for src in preds {
            self.succs[src].remove(&node);
        }
    }

    /// Merge node FROM into node TO: FROM's edges are redirected onto TO
    /// with their weights united, and FROM is disconnected.
    pub fn merge_nodes(&mut self, to: VarId, from: VarId) {
        if to == from {
            return;
        }
        let out_edges: Vec<(VarId, BitSet)> = self.succs[from]
            .iter()
            .map(|(d, w)| (*d, w.clone()))
            .collect();
        for (dest, weights) in out_edges {
            let dest = if dest == from { to } else { dest };
            for w in weights.iter() {
                self.add_edge(to, dest, w);
            }
        }

        let in_edges: Vec<VarId> = self.preds[from].iter().copied().collect();
        for src in in_edges {
            let weights = self.succs[src].get(&from).cloned().unwrap_or_default();
            let src = if src == from { to } else { src };
            for w in weights.iter() {
                self.add_edge(src, to, w);
            }
        }

        self.clear_edges_for_node(from);
    }

    /// Drop a self edge of TO if it only carried weight zero (created by
    /// collapsing a cycle).
    pub fn prune_self_edge(&mut self, node: VarId) {
        if let Some(weights) = self.succs[node].get_mut(&node) {
            weights.remove(0);
            if weights.is_empty() {
                self.succs[node].remove(&node);
                self.preds[node].remove(&node);
            }
        }
    }
}

impl PointsTo {
    /// Turn the collected constraints into the initial graph: simple
    /// copies become edges, address-of seeds solutions, and complex
    /// constraints attach to the variable they dereference.
    pub(crate) fn build_constraint_graph(&mut self) -> ConstraintGraph {
        let mut graph = ConstraintGraph::with_size(self.vars.len());
        let constraints = self.constraints.clone();
        for c in constraints {
            let lhs = c.lhs;
            let rhs = c.rhs;
            if lhs.kind == ExprKind::Deref {
                // *x = y or *x = &y.
                if rhs.kind == ExprKind::AddressOf || rhs.var > ANYTHING_ID {
                    self.vars[lhs.var].complex.push(c);
                }
            } else if rhs.kind == ExprKind::Deref {
                // x = *y, unless x is one of the unknowns.
                if lhs.var > ANYTHING_ID {
                    self.vars[rhs.var].complex.push(c);
                }
            } else if rhs.kind == ExprKind::AddressOf {
                // x = &y seeds the solution directly.
                self.vars[lhs.var].solution.insert(rhs.var);
            } else if lhs.var > ANYTHING_ID && rhs.var > ANYTHING_ID {
                // x = y: a copy edge from y to x.
                graph.add_edge(rhs.var, lhs.var, rhs.offset);
            }
        }
        graph
    }

    /// Move the variables and complex constraints of SRC onto TO,
    /// redirecting the dereferenced side of each complex constraint.
    pub(crate) fn condense_varmap_nodes(&mut self, to: VarId, src: VarId) {
        self.vars[src].node = to;
        let members: Vec<usize> = self.vars[src].variables.iter().collect();
        for m in members {
            self.vars[m].node = to;
        }
        let src_vars = std::mem::take(&mut self.vars[src].variables);
        self.vars[to].variables.insert(src);
        self.vars[to].variables.union_with(&src_vars);

        let mut complex = std::mem::take(&mut self.vars[src].complex);
        for c in &mut complex {
            if c.rhs.kind == ExprKind::Deref {
                c.rhs.var = to;
            } else {
                c.lhs.var = to;
            }
        }
        for c in complex {
            if !self.vars[to].complex.contains(&c) {
                self.vars[to].complex.push(c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_dedup() {
        let mut g = ConstraintGraph::with_size(4);
        assert!(g.add_edge(1, 2, 0));
        assert!(!g.add_edge(1, 2, 0));
        assert!(g.add_edge(1, 2, 1), "a new weight counts as a change");
        assert!(!g.add_edge(3, 3, 0), "weight-0 self edges are dropped");
    }

    #[test]
    fn test_merge_redirects_edges() {
        let mut g = ConstraintGraph::with_size(5);
        g.add_edge(1, 2, 0);
        g.add_edge(3, 1, 0);
        g.merge_nodes(4, 1);
        assert!(g.has_edge(4, 2));
        assert!(g.has_edge(3, 4));
        assert!(!g.has_edge(1, 2));
        assert!(g.preds[2].contains(&4));
    }

    #[test]
    fn test_prune_self_edge() {
        let mut g = ConstraintGraph::with_size(3);
        g.add_edge(1, 1, 1);
        g.add_edge(1, 2, 0);
        g.merge_nodes(1, 2);
        g.prune_self_edge(1);
        // The weight-1 self loop survives, weight 0 would not.
        assert!(g.has_edge(1, 1));
        assert!(g.weights(1, 1).unwrap().contains(1));
        assert!(!g.weights(1, 1).unwrap().contains(0));
    }
}
