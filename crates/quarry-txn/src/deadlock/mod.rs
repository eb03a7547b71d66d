//! Deadlock detection via wait-for graph analysis.
//!
//! The wait-for graph has an edge `A -> B` when transaction A is blocked on
//! a lock transaction B holds:
//!
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T3:  T2 -> T3
//! T3 waits for T1:  T3 -> T1   (cycle: deadlock)
//! ```
//!
//! The lock manager rebuilds this graph from its queues on every detection
//! pass; nothing here is maintained incrementally. Cycle search is a DFS
//! that starts from transaction ids in ascending order and visits
//! neighbors in ascending order, so detection is deterministic. The victim
//! is the youngest (largest-id) transaction on the discovered cycle: it
//! has done the least work worth preserving.

use std::collections::{BTreeMap, BTreeSet};

use quarry_common::TxnId;

/// A directed waits-for graph over transaction ids.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitForGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the edge `waiter -> holder`. Duplicate edges collapse.
    pub fn add_edge(&mut self, waiter: TxnId, holder: TxnId) {
        self.edges.entry(waiter).or_default().insert(holder);
    }

    /// Removes the edge `waiter -> holder`, if present.
    pub fn remove_edge(&mut self, waiter: TxnId, holder: TxnId) {
        if let Some(holders) = self.edges.get_mut(&waiter) {
            holders.remove(&holder);
            if holders.is_empty() {
                self.edges.remove(&waiter);
            }
        }
    }

    /// Removes every outbound edge of `txn_id`.
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
    }

    /// Returns all edges, sorted by `(waiter, holder)`.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&waiter, holders)| holders.iter().map(move |&h| (waiter, h)))
            .collect()
    }

    /// Returns the number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Searches for a cycle; returns the youngest (largest-id) transaction
    /// on the first cycle found, or `None` if the graph is acyclic.
    ///
    /// DFS roots and neighbor lists are visited in ascending id order, so
    /// for a given graph the same victim is always chosen.
    pub fn find_cycle(&self) -> Option<TxnId> {
        let mut visited = BTreeSet::new();
        let starts: Vec<TxnId> = self.edges.keys().copied().collect();
        for start in starts {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = BTreeSet::new();
            if let Some(victim) = self.dfs(start, &mut visited, &mut path, &mut on_path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
        on_path: &mut BTreeSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(holders) = self.edges.get(&node) {
            for &next in holders {
                if on_path.contains(&next) {
                    // Back-edge: the cycle is the path suffix from `next`.
                    let cycle_start = path
                        .iter()
                        .position(|&n| n == next)
                        .expect("on_path node must be on the path");
                    let victim = path[cycle_start..]
                        .iter()
                        .copied()
                        .max()
                        .expect("cycle is non-empty");
                    return Some(victim);
                }
                if !visited.contains(&next) {
                    if let Some(victim) = self.dfs(next, visited, path, on_path) {
                        return Some(victim);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }
}
