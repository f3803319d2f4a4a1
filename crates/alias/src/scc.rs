//! Cycle collapsing and offline variable substitution.
//!
//! Nodes forming a cycle of weight-0 copy edges must end up with the same
//! solution, so they collapse to one representative (Tarjan-style SCC
//! detection, run once statically and again whenever solving grows the
//! graph). Offline variable substitution additionally folds a node into
//! its unique predecessor when the node's address is never taken, it is
//! never the target of a dereference, and every incoming edge carries
//! only weight zero.

use crate::graph::ConstraintGraph;
use crate::solve::Changed;
use crate::vars::{PointsTo, VarId};
use bit_set::BitSet;

pub(crate) struct SccInfo {
    visited: Vec<bool>,
    in_component: Vec<bool>,
    visited_index: Vec<usize>,
    current_index: usize,
    scc_stack: Vec<VarId>,
    unification_queue: Vec<VarId>,
}

impl SccInfo {
    fn new(size: usize) -> SccInfo {
        SccInfo {
            visited: vec![false; size],
            in_component: vec![true; size],
            visited_index: vec![0; size],
            current_index: 0,
            scc_stack: Vec::new(),
            unification_queue: Vec::new(),
        }
    }
}

/// Detect and collapse the cycles reachable through weight-0 edges.
pub(crate) fn find_and_collapse_graph_cycles(
    pta: &mut PointsTo,
    graph: &mut ConstraintGraph,
    mut changed: Option<&mut Changed>,
) {
    let size = pta.vars.len();
    graph.grow(size);
    let mut si = SccInfo::new(size);
    for i in 0..size {
        if !si.visited[i] && pta.vars[i].node == i {
            scc_visit(pta, graph, &mut si, i);
        }
    }
    process_unification_queue(pta, graph, &si, changed.as_deref_mut());
}

fn scc_visit(pta: &mut PointsTo, graph: &ConstraintGraph, si: &mut SccInfo, n: VarId) {
    si.visited[n] = true;
    si.in_component[n] = false;
    si.visited_index[n] = si.current_index;
    si.current_index += 1;

    // Only the zero-weight edges collapse: a weighted edge changes the
    // solution it copies.
    let succs: Vec<VarId> = graph.succs[n]
        .iter()
        .filter(|(_, w)| w.contains(0))
        .map(|(d, _)| *d)
        .collect();

    for w in succs {
        if !si.visited[w] {
            scc_visit(pta, graph, si, w);
        }
        if !si.in_component[w] {
            let t = pta.vars[w].node;
            let nnode = pta.vars[n].node;
            if si.visited_index[t] < si.visited_index[nnode] {
                pta.vars[n].node = t;
            }
        }
    }

    if pta.vars[n].node == n {
        let t = si.visited_index[n];
        si.in_component[n] = true;
        while let Some(&w) = si.scc_stack.last() {
            if t < si.visited_index[w] {
                si.scc_stack.pop();
                pta.vars[w].node = n;
                si.in_component[w] = true;
                si.unification_queue.push(w);
            } else {
                break;
            }
        }
    } else {
        si.scc_stack.push(n);
    }
}

/// Unify the queued members into their representatives, accumulating
/// member solutions and fixing up the changed set.
fn process_unification_queue(
    pta: &mut PointsTo,
    graph: &mut ConstraintGraph,
    si: &SccInfo,
    mut changed: Option<&mut Changed>,
) {
    let queue = &si.unification_queue;
    let mut tmp = BitSet::new();
    let mut i = 0;
    while i < queue.len() {
        let tounify = queue[i];
        let n = pta.vars[tounify].node;

        tmp.union_with(&pta.vars[tounify].solution);
        graph.merge_nodes(n, tounify);
        pta.condense_varmap_nodes(n, tounify);

        if let Some(ch) = changed.as_deref_mut()
            && ch.contains(tounify)
        {
            ch.remove(tounify);
            ch.insert(n);
        }
        pta.vars[tounify].solution.clear();

        i += 1;
        // Flush when the queue ends or moves on to another component.
        let flush = i == queue.len() || pta.vars[queue[i]].node != n;
        if flush {
            let before = pta.vars[n].solution.len();
            pta.vars[n].solution.union_with(&tmp);
            if pta.vars[n].solution.len() > before
                && let Some(ch) = changed.as_deref_mut()
            {
                ch.insert(n);
            }
            tmp.clear();
            graph.prune_self_edge(n);
        }
    }
}

/// Collapse FROM into TO outside the unification queue (used by offline
/// substitution).
pub(crate) fn collapse_nodes(pta: &mut PointsTo, graph: &mut ConstraintGraph, to: VarId, from: VarId) {
    pta.condense_varmap_nodes(to, from);
    let fromsol = std::mem::take(&mut pta.vars[from].solution);
    pta.vars[to].solution.union_with(&fromsol);
    graph.merge_nodes(to, from);
    graph.prune_self_edge(to);
    let at = pta.vars[from].address_taken;
    let it = pta.vars[from].indirect_target;
    pta.vars[to].address_taken |= at;
    pta.vars[to].indirect_target |= it;
}

/// Post-order over the successor graph; popping from the end of the
/// result walks the nodes sources-first.
pub(crate) fn compute_topo_order(pta: &PointsTo, graph: &ConstraintGraph) -> Vec<VarId> {
    let size = pta.vars.len();
    let mut visited = vec![false; size];
    let mut order = Vec::with_capacity(size);
    for i in 0..size {
        if !visited[i] && pta.vars[i].node == i {
            topo_visit(graph, &mut visited, &mut order, i);
        }
    }
    order
}

fn topo_visit(graph: &ConstraintGraph, visited: &mut [bool], order: &mut Vec<VarId>, n: VarId) {
    visited[n] = true;
    let succs: Vec<VarId> = graph.succs[n].keys().copied().collect();
    for dest in succs {
        if !visited[dest] {
            topo_visit(graph, visited, order, dest);
        }
    }
    order.push(n);
}

/// Offline variable substitution, per Rountev and Chandra: in topological
/// order, a node whose address is never taken, which is never a deref
/// target, whose incoming edges all carry only weight zero and come from
/// a single representative whose solution covers its own, collapses into
/// that representative.
pub(crate) fn perform_offline_substitution(pta: &mut PointsTo, graph: &mut ConstraintGraph) {
    let mut order = compute_topo_order(pta, graph);

    while let Some(i) = order.pop() {
        if pta.vars[i].address_taken || pta.vars[i].indirect_target {
            continue;
        }

        let preds: Vec<VarId> = graph.preds[i].iter().copied().collect();
        let mut okay_to_elim = false;
        let mut root = usize::MAX;

        for pred in preds {
            let Some(weights) = graph.weights(pred, i) else {
                continue;
            };
            // Any non-zero weight makes the copy field-shifting.
            if !weights.contains(0) || weights.len() != 1 {
                okay_to_elim = false;
                break;
            }
            let w = pta.vars[pred].node;
            if !okay_to_elim {
                root = w;
                okay_to_elim = true;
            } else if w != root {
                okay_to_elim = false;
                break;
            }
            // Theorem 4: a direct node's solution is a subset of its
            // predecessor's; equality of all predecessors lets us merge.
            if !pta.vars[i].solution.is_subset(&pta.vars[w].solution) {
                okay_to_elim = false;
                break;
            }
        }

        if okay_to_elim && root != pta.vars[i].node && root != usize::MAX {
            tracing::trace!(target: "mill::alias", "collapsing {} into {}",
                pta.vars[i].name, pta.vars[root].name);
            pta.vars[i].node = root;
            collapse_nodes(pta, graph, root, i);
        }
    }
}
