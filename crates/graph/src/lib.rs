//! Revision graph introspection.
//!
//! Terminology, relative to two tips G and H:
//!
//! ```text
//!       A
//!       /\
//!      B  C
//!      |  |\
//!      D  E F
//!      |\/| |
//!      |/\|/
//!      G  H
//! ```
//!
//! A, B, C, D, E are common ancestors.  D and E are *least* common ancestors
//! because none of their descendants are common ancestors; C is not, because
//! its descendant E is.  `find_unique_lca(G, H)` resolves in two steps:
//! `find_lca(G, H) => {D, E}`, then `find_lca(D, E) => {A}`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

mod parents_provider;
pub use parents_provider::{DictParentsProvider, ParentsProvider, StackedParentsProvider};

pub mod tsort;

/// The parents of a node, or the marker that the node itself is absent from
/// the store it was looked up in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parents<K: Clone + PartialEq + Eq> {
    Ghost,
    Known(Vec<K>),
}

impl<K: Clone + PartialEq + Eq> Parents<K> {
    pub fn is_ghost(&self) -> bool {
        matches!(self, Parents::Ghost)
    }

    pub fn known(&self) -> Option<&[K]> {
        match self {
            Parents::Ghost => None,
            Parents::Known(v) => Some(v.as_slice()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentMap<K: Hash + Clone + PartialEq + Eq>(HashMap<K, Parents<K>>);

impl<K: Clone + Hash + PartialEq + Eq> ParentMap<K> {
    pub fn new() -> Self {
        ParentMap(HashMap::new())
    }

    #[inline]
    pub fn insert(&mut self, k: K, v: Parents<K>) {
        self.0.insert(k, v);
    }

    #[inline]
    pub fn get(&self, k: &K) -> Option<&Parents<K>> {
        self.0.get(k)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Parents<K>)> {
        self.0.iter()
    }

    #[inline]
    pub fn contains_key(&self, k: &K) -> bool {
        self.0.contains_key(k)
    }

    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn remove(&mut self, k: &K) -> Option<Parents<K>> {
        self.0.remove(k)
    }

    #[inline]
    pub fn extend(&mut self, other: ParentMap<K>) {
        self.0.extend(other.0);
    }
}

impl<K: Hash + Clone + PartialEq + Eq> Default for ParentMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Clone + PartialEq + Eq> From<HashMap<K, Vec<K>>> for ParentMap<K> {
    fn from(map: HashMap<K, Vec<K>>) -> Self {
        ParentMap(
            map.into_iter()
                .map(|(k, v)| (k, Parents::Known(v)))
                .collect(),
        )
    }
}

impl<K: Hash + Clone + PartialEq + Eq> From<ParentMap<K>> for HashMap<K, Vec<K>> {
    fn from(map: ParentMap<K>) -> Self {
        map.0
            .into_iter()
            .filter_map(|(k, v)| match v {
                Parents::Ghost => None,
                Parents::Known(v) => Some((k, v)),
            })
            .collect()
    }
}

impl<K: Hash + Clone + PartialEq + Eq> IntoIterator for ParentMap<K> {
    type Item = (K, Parents<K>);
    type IntoIter = std::collections::hash_map::IntoIter<K, Parents<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Collapse regions of the graph that are 'linear'.
///
/// For example `A:[B], B:[C]` can be collapsed by removing B, giving
/// `A:[C]`.  A node is removed only when it has exactly one parent and one
/// child and is the only link between them, so the edges of the graph are
/// always kept.
pub fn collapse_linear_regions<K: Hash + Eq + Clone>(parent_map: &ParentMap<K>) -> ParentMap<K> {
    let mut children: HashMap<K, Vec<K>> = HashMap::new();
    for (child, parents) in parent_map.iter() {
        children.entry(child.clone()).or_default();
        if let Some(ps) = parents.known() {
            for p in ps {
                children.entry(p.clone()).or_default().push(child.clone());
            }
        }
    }

    let mut result = parent_map.clone();
    for node in parent_map.keys() {
        let parents = match result.get(node).and_then(|p| p.known().map(|s| s.to_vec())) {
            Some(p) => p,
            None => continue,
        };
        if parents.len() != 1 {
            continue;
        }
        let parent_children = match children.get(&parents[0]) {
            Some(c) => c,
            None => continue,
        };
        if parent_children.len() != 1 {
            // not the only child of its parent
            continue;
        }
        let node_children = match children.get(node) {
            Some(c) => c.clone(),
            None => continue,
        };
        if node_children.len() != 1 {
            continue;
        }
        if let Some(child_parents) = result.get(&node_children[0]) {
            if child_parents.known().map(|p| p.len()) != Some(1) {
                continue;
            }
            // the child only points at this node and the parent has no
            // other children; splice them together
            result.remove(node);
            result.insert(node_children[0].clone(), Parents::Known(parents.clone()));
            children.insert(parents[0].clone(), node_children);
            children.remove(node);
        }
    }

    result
}

/// Revision graph queries over a [`ParentsProvider`].
pub struct Graph<'a, K: Hash + Eq + Clone> {
    parents_provider: &'a dyn ParentsProvider<K>,
}

impl<'a, K: Hash + Eq + Clone + std::fmt::Debug> Graph<'a, K> {
    pub fn new(parents_provider: &'a dyn ParentsProvider<K>) -> Self {
        Graph { parents_provider }
    }

    pub fn get_parent_map(&self, keys: &HashSet<K>) -> ParentMap<K> {
        self.parents_provider.get_parent_map(keys)
    }

    /// All ancestors of `keys`, including the keys themselves.  Ghosts are
    /// silently skipped.
    pub fn find_ancestry(&self, keys: &[K]) -> HashSet<K> {
        let mut seen: HashSet<K> = HashSet::new();
        let mut pending: VecDeque<K> = keys.iter().cloned().collect();
        while !pending.is_empty() {
            let batch: HashSet<K> = pending.drain(..).filter(|k| !seen.contains(k)).collect();
            if batch.is_empty() {
                break;
            }
            let parent_map = self.parents_provider.get_parent_map(&batch);
            for key in batch {
                if let Some(Parents::Known(parents)) = parent_map.get(&key) {
                    seen.insert(key);
                    pending.extend(parents.iter().cloned());
                }
            }
        }
        seen
    }

    /// The full transitive parent map of `keys`; ghosts are present in the
    /// result with [`Parents::Ghost`] so callers can log them.
    pub fn iter_ancestry(&self, keys: &[K]) -> ParentMap<K> {
        let mut result = ParentMap::new();
        let mut pending: VecDeque<K> = keys.iter().cloned().collect();
        while !pending.is_empty() {
            let batch: HashSet<K> = pending
                .drain(..)
                .filter(|k| !result.contains_key(k))
                .collect();
            if batch.is_empty() {
                break;
            }
            let parent_map = self.parents_provider.get_parent_map(&batch);
            for key in batch {
                match parent_map.get(&key) {
                    Some(Parents::Known(parents)) => {
                        pending.extend(parents.iter().cloned());
                        result.insert(key, Parents::Known(parents.clone()));
                    }
                    _ => {
                        result.insert(key, Parents::Ghost);
                    }
                }
            }
        }
        result
    }

    /// Return the heads of `keys`: the keys that are not an ancestor of any
    /// other key.
    pub fn heads(&self, keys: &[K]) -> HashSet<K> {
        let candidates: HashSet<K> = keys.iter().cloned().collect();
        if candidates.len() <= 1 {
            return candidates;
        }
        let parent_map = self.parents_provider.get_parent_map(&candidates);
        let mut seeds: Vec<K> = Vec::new();
        for key in &candidates {
            if let Some(Parents::Known(parents)) = parent_map.get(key) {
                seeds.extend(parents.iter().cloned());
            }
        }
        let dominated = self.find_ancestry(&seeds);
        candidates
            .into_iter()
            .filter(|k| !dominated.contains(k))
            .collect()
    }

    /// Least common ancestors of all of `keys`.
    ///
    /// Computed as the heads of the intersection of the ancestor sets: a
    /// common ancestor survives unless it is a strict ancestor of another
    /// common ancestor.
    pub fn find_lca(&self, keys: &[K]) -> HashSet<K> {
        let mut common: Option<HashSet<K>> = None;
        for key in keys {
            let ancestry = self.find_ancestry(std::slice::from_ref(key));
            common = Some(match common {
                None => ancestry,
                Some(prev) => prev.intersection(&ancestry).cloned().collect(),
            });
        }
        let common = common.unwrap_or_default();
        if common.len() <= 1 {
            return common;
        }
        // Every strict ancestor of a common ancestor is itself common, so
        // one sweep over direct parents is enough to find the non-heads.
        let parent_map = self
            .parents_provider
            .get_parent_map(&common.iter().cloned().collect());
        let mut interior: HashSet<K> = HashSet::new();
        for key in &common {
            if let Some(Parents::Known(parents)) = parent_map.get(key) {
                interior.extend(parents.iter().cloned());
            }
        }
        common
            .into_iter()
            .filter(|k| !interior.contains(k))
            .collect()
    }

    /// Find the unique least common ancestor by iterating [`Graph::find_lca`]
    /// until at most one node remains.  `None` means the keys share no
    /// ancestor at all.
    pub fn find_unique_lca(&self, a: &K, b: &K) -> Option<K> {
        let mut lcas: Vec<K> = vec![a.clone(), b.clone()];
        loop {
            let next = self.find_lca(&lcas);
            match next.len() {
                0 => return None,
                1 => return next.into_iter().next(),
                _ => {
                    lcas = next.into_iter().collect();
                }
            }
        }
    }

    pub fn is_ancestor(&self, candidate: &K, descendant: &K) -> bool {
        self.find_ancestry(std::slice::from_ref(descendant))
            .contains(candidate)
    }

    /// Ancestors of `tip` that are not ancestors of any of `bases`.
    pub fn find_unique_ancestors(&self, tip: &K, bases: &[K]) -> HashSet<K> {
        let tip_ancestry = self.find_ancestry(std::slice::from_ref(tip));
        let base_ancestry = self.find_ancestry(bases);
        tip_ancestry
            .into_iter()
            .filter(|k| !base_ancestry.contains(k))
            .collect()
    }

    /// Find the order that each of `interesting` was merged into `tip`.
    ///
    /// Walks backwards from tip with a stack, expanding left-most parents
    /// first, and reports nodes in first-visited order.
    pub fn find_merge_order(&self, tip: &K, interesting: &HashSet<K>) -> Vec<K> {
        if interesting.len() == 1 {
            return interesting.iter().cloned().collect();
        }
        let mut looking_for = interesting.clone();
        let mut found = Vec::new();
        let mut stack = vec![tip.clone()];
        let mut seen: HashSet<K> = HashSet::new();
        while let Some(next) = stack.pop() {
            if looking_for.is_empty() {
                break;
            }
            if !seen.insert(next.clone()) {
                continue;
            }
            if looking_for.remove(&next) {
                found.push(next.clone());
                if looking_for.len() == 1 {
                    found.extend(looking_for.drain());
                    break;
                }
            }
            let batch: HashSet<K> = std::iter::once(next.clone()).collect();
            if let Some(Parents::Known(parents)) = self
                .parents_provider
                .get_parent_map(&batch)
                .get(&next)
            {
                // reversed push so the left-most parent is popped first
                for parent in parents.iter().rev() {
                    stack.push(parent.clone());
                }
            }
        }
        found
    }
}

#[derive(Debug)]
pub enum Error<K> {
    Cycle(Vec<K>),
}

impl<K: std::fmt::Debug> std::fmt::Display for Error<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Cycle(cycle) => {
                write!(f, "cycle in graph: ")?;
                for (i, c) in cycle.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{:?}", c)?;
                }
                Ok(())
            }
        }
    }
}

impl<K: std::fmt::Debug> std::error::Error for Error<K> {}

#[cfg(test)]
mod tests;
