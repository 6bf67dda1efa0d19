//! Duplicate lineage tracked as a parent/child forest.
//!
//! Every edge points from a newer identifier to the older record it was
//! flagged a duplicate of, so the forest is acyclic by construction.
//! `root` still bounds its walk to tolerate malformed imported state.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Defensive cap on the parent walk in [`AttributionGraph::root`].
pub const MAX_ROOT_WALK: usize = 64;

#[derive(Default)]
struct Forest {
    parents: HashMap<i64, i64>,
    children: HashMap<i64, Vec<i64>>,
}

/// Forest of duplicate→original edges.
#[derive(Default)]
pub struct AttributionGraph {
    inner: RwLock<Forest>,
}

impl AttributionGraph {
    /// Constructs an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dup_id` duplicates `orig_id`. A node keeps at most
    /// one parent; re-flagging moves it under the new original.
    pub fn add_edge(&self, dup_id: i64, orig_id: i64) {
        if dup_id == orig_id {
            return;
        }
        let mut forest = self.inner.write();
        if let Some(previous) = forest.parents.insert(dup_id, orig_id) {
            if previous != orig_id {
                if let Some(siblings) = forest.children.get_mut(&previous) {
                    siblings.retain(|&child| child != dup_id);
                }
            }
        }
        let siblings = forest.children.entry(orig_id).or_default();
        if !siblings.contains(&dup_id) {
            siblings.push(dup_id);
        }
    }

    /// Parent of `id`, when it has been flagged a duplicate.
    pub fn parent(&self, id: i64) -> Option<i64> {
        self.inner.read().parents.get(&id).copied()
    }

    /// Root of the duplicate chain containing `id`: follows parents until
    /// none remain, walking at most [`MAX_ROOT_WALK`] steps.
    pub fn root(&self, id: i64) -> i64 {
        let forest = self.inner.read();
        let mut current = id;
        for _ in 0..MAX_ROOT_WALK {
            match forest.parents.get(&current) {
                Some(&parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Every node reachable from `id` via child edges, excluding `id`
    /// itself, in unspecified order.
    pub fn descendants(&self, id: i64) -> Vec<i64> {
        let forest = self.inner.read();
        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(children) = forest.children.get(&node) {
                for &child in children {
                    if child != id && seen.insert(child) {
                        collected.push(child);
                        stack.push(child);
                    }
                }
            }
        }
        collected
    }

    /// Number of recorded edges.
    pub fn edge_count(&self) -> usize {
        self.inner.read().parents.len()
    }
}
