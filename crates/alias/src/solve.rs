//! The worklist solver and the alias query surface.
//!
//! Solutions only grow and the variable universe is finite, so iterating
//! until no solution changes converges. Each round re-collapses the
//! cycles that solution growth may have created, then walks the graph in
//! topological order propagating solutions along weighted edges and
//! through the complex (dereference) constraints, which may add new
//! edges.

use crate::graph::ConstraintGraph;
use crate::scc::{compute_topo_order, find_and_collapse_graph_cycles, perform_offline_substitution};
use crate::vars::{ANYTHING_ID, Constraint, ExprKind, PointsTo, VarId};
use bit_set::BitSet;
use mill_ir::NodeId;

/// The changed set: membership bits plus a live count.
#[derive(Debug)]
pub(crate) struct Changed {
    bits: Vec<bool>,
    count: usize,
}

impl Changed {
    fn new(size: usize) -> Changed {
        Changed {
            bits: vec![false; size],
            count: 0,
        }
    }

    pub(crate) fn contains(&self, v: VarId) -> bool {
        self.bits[v]
    }

    pub(crate) fn insert(&mut self, v: VarId) {
        if !self.bits[v] {
            self.bits[v] = true;
            self.count += 1;
        }
    }

    pub(crate) fn remove(&mut self, v: VarId) {
        if self.bits[v] {
            self.bits[v] = false;
            self.count -= 1;
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl PointsTo {
    /// Run the whole pipeline: graph construction, static cycle
    /// elimination, offline substitution, then the worklist solution.
    /// Idempotent; the solution can be queried afterwards.
    pub fn solve(&mut self) {
        if self.solved {
            return;
        }
        let mut graph = self.build_constraint_graph();
        tracing::debug!(target: "mill::alias", vars = self.vars.len(),
            constraints = self.constraints.len(), "solving points-to constraints");

        find_and_collapse_graph_cycles(self, &mut graph, None);
        perform_offline_substitution(self, &mut graph);
        self.solve_graph(&mut graph);

        self.graph = Some(graph);
        self.solved = true;
    }

    /// Re-run the worklist over the converged graph; returns true if any
    /// solution changed (it must not, by monotone convergence).
    pub fn resolve_again(&mut self) -> bool {
        let Some(mut graph) = self.graph.take() else {
            return false;
        };
        let before: Vec<usize> = self.vars.iter().map(|v| v.solution.len()).collect();
        self.solve_graph(&mut graph);
        let changed = self
            .vars
            .iter()
            .zip(before)
            .any(|(v, b)| v.solution.len() != b);
        self.graph = Some(graph);
        changed
    }

    fn solve_graph(&mut self, graph: &mut ConstraintGraph) {
        let size = self.vars.len();
        let mut changed = Changed::new(size);
        for i in 0..size {
            if self.vars[i].node == i {
                changed.insert(i);
            }
        }

        let mut iterations = 0usize;
        while !changed.is_empty() {
            iterations += 1;
            find_and_collapse_graph_cycles(self, graph, Some(&mut changed));
            let mut order = compute_topo_order(self, graph);

            while let Some(i) = order.pop() {
                if !changed.contains(i) {
                    continue;
                }
                changed.remove(i);

                let solution = self.vars[i].solution.clone();
                let complex = self.vars[i].complex.clone();
                for c in &complex {
                    self.do_complex_constraint(graph, &mut changed, c, &solution);
                }

                let succs: Vec<(VarId, BitSet)> = graph.succs[i]
                    .iter()
                    .map(|(d, w)| (*d, w.clone()))
                    .collect();
                for (dest, weights) in succs {
                    let mut flag = false;
                    for w in weights.iter() {
                        flag |= self.union_with_increment(dest, &solution, w);
                    }
                    if flag {
                        changed.insert(dest);
                    }
                }
            }
        }
        tracing::debug!(target: "mill::alias", iterations, "points-to converged");
    }

    /// Union `shift(FROM, inc)` into the solution of TO; true when the
    /// solution grew.
    fn union_with_increment(&mut self, to: VarId, from: &BitSet, inc: usize) -> bool {
        let before = self.vars[to].solution.len();
        if inc == 0 {
            self.vars[to].solution.union_with(from);
        } else {
            let shifted = self.shift_solution(from, inc);
            self.vars[to].solution.union_with(&shifted);
        }
        self.vars[to].solution.len() > before
    }

    /// Add OFFSET to each member, clamping at the member's field range:
    /// an out-of-range member of a properly sized variable is dropped,
    /// while globbed variables keep acting as themselves.
    fn shift_solution(&self, set: &BitSet, offset: usize) -> BitSet {
        let mut result = BitSet::new();
        for v in set.iter() {
            if v + offset < self.vars[v].end {
                result.insert(v + offset);
            } else if self.vars[v].is_artificial || self.vars[v].is_unknown_size {
                result.insert(v);
            }
        }
        result
    }

    fn do_complex_constraint(
        &mut self,
        graph: &mut ConstraintGraph,
        changed: &mut Changed,
        c: &Constraint,
        delta: &BitSet,
    ) {
        if c.lhs.kind == ExprKind::Deref {
            if c.rhs.kind == ExprKind::AddressOf {
                self.do_da_constraint(changed, c, delta);
            } else {
                self.do_ds_constraint(graph, changed, c, delta);
            }
        } else {
            self.do_sd_constraint(graph, changed, c, delta);
        }
    }

    /// `*x = &y`: y joins the solution of everything x points to.
    fn do_da_constraint(&mut self, changed: &mut Changed, c: &Constraint, delta: &BitSet) {
        let rhs = c.rhs.var;
        for j in delta.iter() {
            let mut offset = c.lhs.offset;
            if !self.type_safe(j, &mut offset) {
                tracing::trace!(target: "mill::alias", "untypesafe store through deref");
                continue;
            }
            let target = j + offset;
            self.vars[target].indirect_target = true;
            let t = self.vars[target].node;
            if self.vars[t].solution.insert(rhs) {
                changed.insert(t);
            }
        }
    }

    /// `x = *y`: install an edge from everything y points to into x.
    fn do_sd_constraint(
        &mut self,
        graph: &mut ConstraintGraph,
        changed: &mut Changed,
        c: &Constraint,
        delta: &BitSet,
    ) {
        let lhs = self.vars[c.lhs.var].node;
        let mut flag = false;
        for j in delta.iter() {
            let mut roffset = c.rhs.offset;
            if !self.type_safe(j, &mut roffset) {
                tracing::trace!(target: "mill::alias", "untypesafe read through deref");
                continue;
            }
            let t = self.vars[j + roffset].node;
            if graph.add_edge(t, lhs, 0) {
                let sol = self.vars[t].solution.clone();
                flag |= self.union_with_increment(lhs, &sol, 0);
            }
        }
        if flag {
            changed.insert(lhs);
        }
    }

    /// `*x = y`: install a weighted edge from y into everything x points
    /// to.
    fn do_ds_constraint(
        &mut self,
        graph: &mut ConstraintGraph,
        changed: &mut Changed,
        c: &Constraint,
        delta: &BitSet,
    ) {
        let rhs = self.vars[c.rhs.var].node;
        let roff = c.rhs.offset;
        for j in delta.iter() {
            let mut loff = c.lhs.offset;
            if !self.type_safe(j, &mut loff) {
                tracing::trace!(target: "mill::alias", "untypesafe store through deref");
                continue;
            }
            let target = j + loff;
            self.vars[target].indirect_target = true;
            let t = self.vars[target].node;
            if graph.add_edge(rhs, t, roff) {
                let sol = self.vars[rhs].solution.clone();
                if self.union_with_increment(t, &sol, roff) {
                    changed.insert(t);
                }
            }
        }
    }

    // ----- queries ---------------------------------------------------------

    /// The converged points-to set of the variable declared by DECL.
    pub fn may_point_to(&self, decl: NodeId) -> Option<&BitSet> {
        let id = self.lookup_id(decl)?;
        Some(self.points_to_set(id))
    }

    /// The converged points-to set of a var id.
    pub fn points_to_set(&self, id: VarId) -> &BitSet {
        let rep = self.vars[id].node;
        &self.vars[rep].solution
    }

    /// May the pointers P and Q designate the same storage? Conservative:
    /// unknown pointers alias everything.
    pub fn may_alias(&self, p: NodeId, q: NodeId) -> bool {
        let (Some(ps), Some(qs)) = (self.may_point_to(p), self.may_point_to(q)) else {
            return true;
        };
        if ps.contains(ANYTHING_ID) || qs.contains(ANYTHING_ID) {
            return true;
        }
        !ps.is_disjoint(qs)
    }
}
