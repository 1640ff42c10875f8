//! DAG traversal used by every evaluation phase.
//!
//! A traversal keeps discovered/visited marks per node; seeing a discovered
//! but not yet visited dependency means the graph has a cycle, which is fatal
//! for the evaluation (connect-time checking should have prevented it).

use crate::graph::{Graph, NodeId};
use miette::bail;
use smallvec::SmallVec;
use utils::map::HashMap;

#[derive(Debug, Default, Clone, Copy)]
struct VisitMarks {
    visited: bool,
    discovered: bool,
}

/// The nodes `node` directly depends on: its connected sources, with graph
/// nodes resolved to their output proxies.
pub(crate) fn depends_on(graph: &Graph, node: NodeId) -> SmallVec<[NodeId; 2]> {
    let mut deps = SmallVec::new();
    for conn in &graph.node(node).sources {
        let mut source = conn.source;
        if graph.node(source).is_graph() {
            if let Some(proxy) = graph.proxy_for_pad(source, conn.source_pad) {
                source = proxy;
            }
        }
        if !deps.contains(&source) {
            deps.push(source);
        }
    }
    deps
}

/// Dependencies-first (reverse depth-first) visit order starting at `root`.
/// The root is the last element. Top-down phases iterate the result in
/// reverse.
pub(crate) fn reverse_dfs_order(graph: &Graph, root: NodeId) -> miette::Result<Vec<NodeId>> {
    let mut marks: HashMap<NodeId, VisitMarks> = HashMap::default();
    let mut order = Vec::new();
    visit(graph, root, &mut marks, &mut order)?;
    Ok(order)
}

fn visit(
    graph: &Graph,
    node: NodeId,
    marks: &mut HashMap<NodeId, VisitMarks>,
    order: &mut Vec<NodeId>,
) -> miette::Result<()> {
    marks.entry(node).or_default().discovered = true;

    for dep in depends_on(graph, node) {
        let mark = marks.entry(dep).or_default();
        if mark.visited {
            continue;
        }
        if mark.discovered {
            bail!(
                "cycle detected while traversing from `{}`",
                graph.node(dep).debug_name()
            );
        }
        visit(graph, dep, marks, order)?;
    }

    marks.entry(node).or_default().visited = true;
    order.push(node);
    Ok(())
}

/// How many times each node in `order` is consumed by other nodes of the
/// same traversal. Used to release contexts as soon as the last consumer is
/// done.
pub(crate) fn consumer_counts(graph: &Graph, order: &[NodeId]) -> HashMap<NodeId, usize> {
    let mut counts: HashMap<NodeId, usize> = HashMap::default();
    for &node in order {
        for dep in depends_on(graph, node) {
            *counts.entry(dep).or_default() += 1;
        }
    }
    counts
}
