//! Dependency edges between cached resources.
//!
//! An edge `(A, B)` reads "A depends on B": invalidating B invalidates A.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use thiserror::Error;

use super::ResourceKey;

type KeySet = FxHashSet<ResourceKey>;
type KeySetMap = FxHashMap<ResourceKey, KeySet>;

/// An edge references a key the cache no longer holds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("edge {from} -> {to} references missing entry {missing}")]
    MissingNode {
        from: ResourceKey,
        to: ResourceKey,
        missing: ResourceKey,
    },
}

/// Bidirectional dependency graph.
///
/// Maintains both forward (dependent → dependencies) and reverse
/// (dependency → dependents) mappings.
///
/// # Invariants
/// - Forward and reverse mappings are always consistent
/// - Self-edges are excluded
/// - Removing a node removes every edge touching it
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward: dependent → what it depends on
    forward: KeySetMap,
    /// Reverse: dependency → what depends on it
    reverse: KeySetMap,
}

impl DependencyGraph {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Returns `false` for self-edges and already-present edges.
    pub fn add_dependency(&mut self, dependent: &ResourceKey, dependency: &ResourceKey) -> bool {
        if dependent == dependency {
            return false;
        }

        let inserted = self
            .forward
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());

        if inserted {
            self.reverse
                .entry(dependency.clone())
                .or_default()
                .insert(dependent.clone());
        }
        inserted
    }

    /// Record the mutual pair `a ⇄ b` (script and its companion spec).
    pub fn add_mutual(&mut self, a: &ResourceKey, b: &ResourceKey) {
        self.add_dependency(a, b);
        self.add_dependency(b, a);
    }

    /// Keys that depend on `key`.
    #[inline]
    pub fn dependents(&self, key: &ResourceKey) -> Option<&KeySet> {
        self.reverse.get(key)
    }

    /// Keys that `key` depends on.
    #[inline]
    pub fn dependencies(&self, key: &ResourceKey) -> Option<&KeySet> {
        self.forward.get(key)
    }

    #[inline]
    pub fn depends_on(&self, dependent: &ResourceKey, dependency: &ResourceKey) -> bool {
        self.forward
            .get(dependent)
            .is_some_and(|deps| deps.contains(dependency))
    }

    /// Breadth-first walk along dependents, starting at (and including) `key`.
    ///
    /// Each key appears once; the visited set keeps mutual pairs and
    /// diamonds from looping or repeating.
    pub fn closure(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        let mut visited = KeySet::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        visited.insert(key.clone());
        queue.push_back(key.clone());

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.reverse.get(&current) {
                for dependent in dependents {
                    if visited.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
            order.push(current);
        }

        order
    }

    /// Drop `key` and every edge touching it.
    pub fn remove(&mut self, key: &ResourceKey) {
        if let Some(dependencies) = self.forward.remove(key) {
            for dependency in dependencies {
                Self::unlink(&mut self.reverse, &dependency, key);
            }
        }
        if let Some(dependents) = self.reverse.remove(key) {
            for dependent in dependents {
                Self::unlink(&mut self.forward, &dependent, key);
            }
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(FxHashSet::len).sum()
    }

    /// Check that every edge endpoint satisfies `present`.
    pub fn verify(&self, present: impl Fn(&ResourceKey) -> bool) -> Result<(), GraphError> {
        for (from, deps) in &self.forward {
            for to in deps {
                let missing = if !present(from) {
                    from
                } else if !present(to) {
                    to
                } else {
                    continue;
                };
                return Err(GraphError::MissingNode {
                    from: from.clone(),
                    to: to.clone(),
                    missing: missing.clone(),
                });
            }
        }
        Ok(())
    }

    fn unlink(map: &mut KeySetMap, owner: &ResourceKey, key: &ResourceKey) {
        if let Some(set) = map.get_mut(owner) {
            set.remove(key);
            if set.is_empty() {
                map.remove(owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Location, ResourceKind};

    fn key(name: &str) -> ResourceKey {
        ResourceKey::script(name)
    }

    #[test]
    fn test_chain_closure() {
        let (a, b, c) = (key("a"), key("b"), key("c"));
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&a, &b);
        graph.add_dependency(&b, &c);

        assert_eq!(graph.closure(&c), vec![c.clone(), b.clone(), a.clone()]);
        assert_eq!(graph.closure(&a), vec![a]);
    }

    #[test]
    fn test_diamond_visits_once() {
        let (top, left, right, bottom) = (key("top"), key("left"), key("right"), key("bottom"));
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&top, &left);
        graph.add_dependency(&top, &right);
        graph.add_dependency(&left, &bottom);
        graph.add_dependency(&right, &bottom);

        let closure = graph.closure(&bottom);
        assert_eq!(closure.len(), 4);
        assert_eq!(closure.iter().filter(|k| **k == top).count(), 1);
        assert_eq!(closure.last(), Some(&top));
    }

    #[test]
    fn test_mutual_pair_terminates() {
        let script = key("index.js");
        let spec = ResourceKey::new(ResourceKind::Spec, Location::Specs, "index.js");
        let mut graph = DependencyGraph::new();
        graph.add_mutual(&script, &spec);

        let closure = graph.closure(&script);
        assert_eq!(closure, vec![script.clone(), spec.clone()]);
        assert_eq!(graph.closure(&spec).len(), 2);
    }

    #[test]
    fn test_self_edge_ignored() {
        let a = key("a");
        let mut graph = DependencyGraph::new();
        assert!(!graph.add_dependency(&a, &a));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_drops_both_directions() {
        let (a, b, c) = (key("a"), key("b"), key("c"));
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&a, &b);
        graph.add_dependency(&b, &c);

        graph.remove(&b);

        assert!(graph.dependents(&c).is_none());
        assert!(graph.dependencies(&a).is_none());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_verify_reports_missing_node() {
        let (a, b) = (key("a"), key("b"));
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&a, &b);

        assert!(graph.verify(|_| true).is_ok());
        let err = graph.verify(|k| *k != b).unwrap_err();
        assert!(matches!(err, GraphError::MissingNode { missing, .. } if missing == b));
    }
}
