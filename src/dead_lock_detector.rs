use crate::ident::{Resource, Transaction};
use crate::locks_table::LocksTable;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Transactions blocked on each resource.
type WaitingTable<R, T> = LocksTable<R, T>;
/// Transactions granted some mode on each resource.
type HoldingTable<R, T> = LocksTable<R, T>;

/// The transactions of a waits-for cycle, starting at the requester that closed it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Cycle<T>(pub Vec<T>);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// If a waiting transaction can reach itself through "waits on a resource held by"
/// edges, there is a deadlock.
///
/// Edges are never stored: every check derives them from the current waiting and
/// holding sets, so a grant or release is reflected immediately.
#[derive(Debug, Clone)]
pub struct WaitsForGraph<R: Resource, T: Transaction> {
    waiting: WaitingTable<R, T>,
    holding: HoldingTable<R, T>,
}

impl<R: Resource, T: Transaction> Default for WaitsForGraph<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource, T: Transaction> WaitsForGraph<R, T> {
    pub fn new() -> Self {
        Self {
            waiting: WaitingTable::new(),
            holding: HoldingTable::new(),
        }
    }

    /// Record that `txn` is about to block on `rid`. Only call this when the
    /// request is really going to block.
    ///
    /// On a cycle the waiting record is withdrawn again and the cycle is returned;
    /// the caller must not block.
    pub fn request(&mut self, txn: &T, rid: &R) -> Result<(), Cycle<T>> {
        self.waiting.insert(rid, txn.clone());
        match self.find_cycle(txn) {
            Some(cycle) => {
                self.waiting.remove(rid, txn);
                Err(cycle)
            }
            None => Ok(()),
        }
    }

    pub fn grant(&mut self, txn: &T, rid: &R) {
        self.waiting.remove(rid, txn);
        self.holding.insert(rid, txn.clone());
    }

    pub fn release(&mut self, txn: &T, rid: &R) {
        self.holding.remove(rid, txn);
    }

    pub fn waiting(&self, rid: &R) -> HashSet<T> {
        self.waiting.values(rid).cloned().collect()
    }

    pub fn holding(&self, rid: &R) -> HashSet<T> {
        self.holding.values(rid).cloned().collect()
    }

    /// Waiter -> holder edges, labelled by the resource that induces them.
    /// Self edges (a holder upgrading its own lock) are left out.
    pub fn build(&self) -> DiGraph<T, R> {
        let mut graph = DiGraph::new();
        let mut nodes: HashMap<T, NodeIndex> = HashMap::new();
        for rid in self.waiting.keys() {
            for waiter in self.waiting.values(rid) {
                for holder in self.holding.values(rid) {
                    if waiter == holder {
                        continue;
                    }
                    let from = *nodes
                        .entry(waiter.clone())
                        .or_insert_with(|| graph.add_node(waiter.clone()));
                    let to = *nodes
                        .entry(holder.clone())
                        .or_insert_with(|| graph.add_node(holder.clone()));
                    graph.update_edge(from, to, rid.clone());
                }
            }
        }
        graph
    }

    /// Depth-first search from `start` with an explicit stack. Reaching a node
    /// that is still on the current path closes a cycle.
    fn find_cycle(&self, start: &T) -> Option<Cycle<T>> {
        let graph = self.build();
        let root = graph.node_indices().find(|idx| graph[*idx] == *start)?;

        let mut marks = vec![Mark::Unvisited; graph.node_count()];
        let mut path: Vec<NodeIndex> = vec![root];
        let mut stack: Vec<Vec<NodeIndex>> = vec![graph.neighbors(root).collect()];
        marks[root.index()] = Mark::OnPath;

        while let Some(children) = stack.last_mut() {
            let Some(child) = children.pop() else {
                if let Some(done) = path.pop() {
                    marks[done.index()] = Mark::Done;
                }
                stack.pop();
                continue;
            };
            match marks[child.index()] {
                Mark::OnPath => {
                    let from = path.iter().position(|idx| *idx == child).unwrap_or(0);
                    let mut cycle: Vec<T> =
                        path[from..].iter().map(|idx| graph[*idx].clone()).collect();
                    if let Some(at) = cycle.iter().position(|txn| txn == start) {
                        cycle.rotate_left(at);
                    }
                    return Some(Cycle(cycle));
                }
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[child.index()] = Mark::OnPath;
                    path.push(child);
                    stack.push(graph.neighbors(child).collect());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::algo::{has_path_connecting, kosaraju_scc};
    use proptest::prelude::*;

    type Graph = WaitsForGraph<&'static str, u32>;

    #[test]
    pub fn test_wait_without_cycle() {
        let mut graph = Graph::new();
        graph.grant(&1, &"r1");
        assert!(graph.request(&2, &"r1").is_ok());
        assert!(graph.waiting(&"r1").contains(&2));
        assert_eq!(1, graph.build().edge_count());
    }

    #[test]
    pub fn test_two_party_cycle() {
        let mut graph = Graph::new();
        graph.grant(&1, &"r1");
        graph.grant(&2, &"r2");
        assert!(graph.request(&1, &"r2").is_ok());
        let cycle = graph.request(&2, &"r1").unwrap_err();
        assert_eq!(vec![2, 1], cycle.0);
        // The aborted request leaves no trace, the surviving wait stays.
        assert!(!graph.waiting(&"r1").contains(&2));
        assert!(graph.waiting(&"r2").contains(&1));
    }

    #[test]
    pub fn test_transitive_cycle() {
        let mut graph = Graph::new();
        graph.grant(&1, &"r1");
        graph.grant(&2, &"r2");
        graph.grant(&3, &"r3");
        assert!(graph.request(&1, &"r2").is_ok());
        assert!(graph.request(&2, &"r3").is_ok());
        let cycle = graph.request(&3, &"r1").unwrap_err();
        assert_eq!(vec![3, 1, 2], cycle.0);
    }

    #[test]
    pub fn test_upgrade_self_edge_ignored() {
        let mut graph = Graph::new();
        graph.grant(&1, &"r1");
        assert!(graph.request(&1, &"r1").is_ok());
        assert_eq!(0, graph.build().edge_count());
    }

    #[test]
    pub fn test_competing_upgrades_deadlock() {
        let mut graph = Graph::new();
        graph.grant(&1, &"r1");
        graph.grant(&2, &"r1");
        assert!(graph.request(&1, &"r1").is_ok());
        assert!(graph.request(&2, &"r1").is_err());
    }

    #[test]
    pub fn test_shared_target_is_not_a_cycle() {
        // 1 -> 2 -> 4 and 1 -> 3 -> 4 reach 4 twice without a cycle.
        let mut graph = Graph::new();
        graph.grant(&2, &"a");
        graph.grant(&3, &"a");
        graph.grant(&4, &"b");
        assert!(graph.request(&2, &"b").is_ok());
        assert!(graph.request(&3, &"b").is_ok());
        assert!(graph.request(&1, &"a").is_ok());
    }

    #[test]
    pub fn test_grant_and_release_move_records() {
        let mut graph = Graph::new();
        graph.grant(&1, &"r1");
        assert!(graph.request(&2, &"r1").is_ok());
        graph.release(&1, &"r1");
        graph.grant(&2, &"r1");
        assert!(graph.waiting(&"r1").is_empty());
        assert_eq!(HashSet::from([2]), graph.holding(&"r1"));
        assert!(graph.holding(&"r1").contains(&2));
        graph.release(&2, &"r1");
        assert!(graph.holding(&"r1").is_empty());
    }

    /// A cycle is reachable from `start` iff some reachable node sits in a
    /// strongly connected component with more than one member.
    fn reachable_cycle(graph: &DiGraph<u32, &'static str>, start: u32) -> bool {
        let Some(root) = graph.node_indices().find(|idx| graph[*idx] == start) else {
            return false;
        };
        kosaraju_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .flatten()
            .any(|idx| has_path_connecting(graph, root, idx, None))
    }

    const RESOURCES: [&str; 4] = ["r0", "r1", "r2", "r3"];

    proptest! {
        #[test]
        fn prop_request_fails_iff_cycle_reachable(
            holds in proptest::collection::vec((0u32..6, 0usize..4), 0..12),
            waits in proptest::collection::vec((0u32..6, 0usize..4), 1..8),
        ) {
            let mut graph = Graph::new();
            for (txn, rid) in holds {
                graph.grant(&txn, &RESOURCES[rid]);
            }
            for (txn, rid) in waits {
                if graph.waiting(&RESOURCES[rid]).contains(&txn) {
                    continue;
                }
                graph.waiting.insert(&RESOURCES[rid], txn);
                let oracle = reachable_cycle(&graph.build(), txn);
                graph.waiting.remove(&RESOURCES[rid], &txn);
                let before = graph.waiting(&RESOURCES[rid]);
                let outcome = graph.request(&txn, &RESOURCES[rid]);
                prop_assert_eq!(oracle, outcome.is_err());
                if outcome.is_err() {
                    prop_assert_eq!(before, graph.waiting(&RESOURCES[rid]));
                }
            }
        }
    }
}
