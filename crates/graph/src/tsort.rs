//! Topological and merge-aware sorting of revision graphs.

use crate::Error;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Plain topological sort: every parent is emitted before its children.
///
/// The graph is consumed lazily; iteration raises [`Error::Cycle`] when a
/// back-edge is found, with the current search stack as evidence.
pub struct TopoSorter<K: Eq + Hash> {
    graph: HashMap<K, Vec<K>>,
    // nodes of the original graph, so parents that point outside it can be
    // skipped instead of chased
    visitable: HashSet<K>,
    // the depth first search: each pending node with the parents of it that
    // have not been checked yet
    pending: Vec<(K, Vec<K>)>,
    completed: HashSet<K>,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> TopoSorter<K> {
    pub fn new(graph: impl IntoIterator<Item = (K, Vec<K>)>) -> TopoSorter<K> {
        let graph: HashMap<K, Vec<K>> = graph.into_iter().collect();
        let visitable = graph.keys().cloned().collect();
        TopoSorter {
            graph,
            visitable,
            pending: Vec::new(),
            completed: HashSet::new(),
        }
    }

    /// Sort the whole graph and return the node order.
    ///
    /// After calling this the sorter is exhausted.
    pub fn sorted(&mut self) -> Result<Vec<K>, Error<K>> {
        self.collect()
    }

    fn stack_names(&self) -> Vec<K> {
        self.pending.iter().map(|(n, _)| n.clone()).collect()
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> Iterator for TopoSorter<K> {
    type Item = Result<K, Error<K>>;

    fn next(&mut self) -> Option<Result<K, Error<K>>> {
        loop {
            while let Some((_, parents_to_visit)) = self.pending.last_mut() {
                match parents_to_visit.pop() {
                    None => {
                        // every parent is out already, the node is done
                        let (node, _) = self.pending.pop().unwrap();
                        self.completed.insert(node.clone());
                        return Some(Ok(node));
                    }
                    Some(parent) => {
                        if self.completed.contains(&parent) || !self.visitable.contains(&parent) {
                            continue;
                        }
                        match self.graph.remove(&parent) {
                            Some(grandparents) => self.pending.push((parent, grandparents)),
                            None => {
                                // the parent is gone from the source graph but
                                // not completed, so it is on the stack below
                                // us: a cycle
                                return Some(Err(Error::Cycle(self.stack_names())));
                            }
                        }
                    }
                }
            }
            // pick an arbitrary node to seed the next search
            let node = match self.graph.keys().next() {
                Some(node) => node.clone(),
                None => return None,
            };
            let parents = self.graph.remove(&node).unwrap();
            self.pending.push((node, parents));
        }
    }
}

pub fn topo_sort<K: Eq + Hash + Clone + std::fmt::Debug>(
    graph: impl IntoIterator<Item = (K, Vec<K>)>,
) -> Result<Vec<K>, Error<K>> {
    TopoSorter::new(graph).sorted()
}

/// A dotted revision number, e.g. `1`, `1.1.2` or `0.2.1`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RevnoVec(Vec<usize>);

impl RevnoVec {
    /// The next commit on the same branch: bump the last component.
    pub fn bump_last(&self) -> Self {
        let mut ret = self.clone();
        *ret.0.last_mut().unwrap() += 1;
        ret
    }

    /// The first commit on a new branch spawned from this revision.
    pub fn new_branch(&self, branch_count: usize) -> Self {
        RevnoVec(vec![self.0[0], branch_count, 1])
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl std::ops::Index<usize> for RevnoVec {
    type Output = usize;

    fn index(&self, index: usize) -> &usize {
        &self.0[index]
    }
}

impl From<Vec<usize>> for RevnoVec {
    fn from(v: Vec<usize>) -> Self {
        RevnoVec(v)
    }
}

impl From<usize> for RevnoVec {
    fn from(v: usize) -> Self {
        RevnoVec(vec![v])
    }
}

impl std::fmt::Debug for RevnoVec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RevnoVec({:?})", self.0)
    }
}

impl std::fmt::Display for RevnoVec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

/// One row of merge-sorted output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSortRow<K> {
    pub sequence: usize,
    pub node: K,
    pub merge_depth: usize,
    pub revno: Option<RevnoVec>,
    /// True when the next row belongs to a different merge: either it is
    /// shallower, or it is a sibling at the same depth that is not a parent
    /// of this node (multi-merge commits).
    pub end_of_merge: bool,
}

/// Merge-aware topological sort.
///
/// The left-most parent of each node is treated as its mainline
/// continuation; right-hand parents open nested merge sequences one level
/// deeper than the node that merged them.  Scheduling happens bottom-left
/// first ('left subtree, right subtree, node'), and the schedule is then
/// replayed in reverse so the output reads top-down.  Right-hand parents are
/// visited right-to-left during scheduling, which makes them come out
/// left-to-right after the reversal.
///
/// When `mainline` is given, the graph is first rewritten so that each
/// consecutive pair in it is a left-most parent edge, and output stops at
/// `mainline[0]` (oldest first).  Ghosts in the mainline are stepped over.
///
/// With `generate_revno`, each node is given a dotted revision number: the
/// first child extends its left-most parent's number, later children start
/// branch numbers `(base, branch, 1)`, and parentless roots count up from
/// `(1,)` via `(0, n, 1)`.
struct MergeSorter<K: Eq + Hash> {
    graph: HashMap<K, Vec<K>>,
    original_graph: HashMap<K, Vec<K>>,
    stop_revision: Option<K>,
    generate_revno: bool,
    // per node: the assigned revno and whether no child has claimed the
    // first-child slot yet
    revnos: HashMap<K, (Option<RevnoVec>, bool)>,
    // how many branches have been spawned from each mainline revno; key 0
    // counts parentless roots
    branch_counts: HashMap<usize, usize>,
    node_stack: Vec<PendingNode<K>>,
    completed: HashSet<K>,
    scheduled: Vec<(K, usize, RevnoVec)>,
}

struct PendingNode<K> {
    node: K,
    merge_depth: usize,
    pending_parents: Vec<K>,
    // captured at push time from the left-most parent's first-child slot;
    // None when there is no (non-ghost) left-most parent
    first_child: Option<bool>,
    left_subtree_pushed: bool,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> MergeSorter<K> {
    fn new(
        mut graph: HashMap<K, Vec<K>>,
        branch_tip: K,
        mainline: Option<&[K]>,
        generate_revno: bool,
    ) -> Self {
        // When an explicit mainline is given, rewrite the graph so that each
        // consecutive pair is a left-most parent edge; this is cheaper than
        // special-casing the mainline during the search.
        let mut stop_revision = None;
        if let Some(mainline) = mainline {
            stop_revision = mainline.first().cloned();
            for window in mainline.windows(2) {
                let (parent, revision) = (&window[0], &window[1]);
                let parent_ids = match graph.get_mut(revision) {
                    Some(ids) => ids,
                    None => continue,
                };
                if parent_ids.is_empty() {
                    // a ghost in the mainline; the graph has had ghosts
                    // stripped but the mainline has not
                    continue;
                }
                if &parent_ids[0] == parent {
                    continue;
                }
                if let Some(pos) = parent_ids.iter().position(|x| x == parent) {
                    parent_ids.swap(0, pos);
                }
            }
        }

        // the end-of-merge check needs the parents of emitted nodes, so the
        // unconsumed graph is kept around
        let original_graph = graph.clone();
        let revnos = graph
            .keys()
            .map(|node| (node.clone(), (None, true)))
            .collect();

        let mut sorter = MergeSorter {
            graph,
            original_graph,
            stop_revision,
            generate_revno,
            revnos,
            branch_counts: HashMap::new(),
            node_stack: Vec::new(),
            completed: HashSet::new(),
            scheduled: Vec::new(),
        };
        let tip_parents = sorter.graph.remove(&branch_tip).unwrap_or_default();
        sorter.push_node(branch_tip, 0, tip_parents);
        sorter
    }

    fn push_node(&mut self, node: K, merge_depth: usize, parents: Vec<K>) {
        let first_child = match parents.first() {
            Some(leftmost) => match self.revnos.get_mut(leftmost) {
                Some(entry) => {
                    let first = entry.1;
                    entry.1 = false;
                    Some(first)
                }
                // left-hand parent is a ghost: treat as parentless
                None => None,
            },
            None => None,
        };
        self.node_stack.push(PendingNode {
            node,
            merge_depth,
            pending_parents: parents,
            first_child,
            left_subtree_pushed: false,
        });
    }

    fn pop_node(&mut self) {
        let frame = self.node_stack.pop().unwrap();
        let parents = &self.original_graph[&frame.node];

        let parent_revno = parents
            .first()
            .and_then(|leftmost| self.revnos.get(leftmost))
            .and_then(|entry| entry.0.clone());

        let revno = match parent_revno {
            Some(parent_revno) => {
                if frame.first_child == Some(true) {
                    parent_revno.bump_last()
                } else {
                    // a later child spawns a new branch off the parent's
                    // mainline number
                    let base = parent_revno[0];
                    let count = self.branch_counts.get(&base).unwrap_or(&0) + 1;
                    self.branch_counts.insert(base, count);
                    parent_revno.new_branch(count)
                }
            }
            None => {
                // a root (or a node whose left parent is a ghost)
                let root_count = match self.branch_counts.get(&0) {
                    Some(count) => count + 1,
                    None => 0,
                };
                self.branch_counts.insert(0, root_count);
                if root_count > 0 {
                    RevnoVec::from(vec![0, root_count, 1])
                } else {
                    RevnoVec::from(1)
                }
            }
        };

        if let Some(entry) = self.revnos.get_mut(&frame.node) {
            entry.0 = Some(revno.clone());
        }
        self.completed.insert(frame.node.clone());
        self.scheduled.push((frame.node, frame.merge_depth, revno));
    }

    /// Run the depth-first search to completion, filling `scheduled`.
    fn schedule(&mut self) -> Result<(), Error<K>> {
        while !self.node_stack.is_empty() {
            if self.node_stack.last().unwrap().pending_parents.is_empty() {
                self.pop_node();
                continue;
            }
            while !self.node_stack.last().unwrap().pending_parents.is_empty() {
                let frame = self.node_stack.last_mut().unwrap();
                let (next_node, is_left_subtree) = if !frame.left_subtree_pushed {
                    frame.left_subtree_pushed = true;
                    (frame.pending_parents.remove(0), true)
                } else {
                    // right-hand parents are scheduled right-to-left so the
                    // reversed output reads left-to-right
                    (frame.pending_parents.pop().unwrap(), false)
                };
                if self.completed.contains(&next_node) {
                    continue;
                }
                let parents = match self.graph.remove(&next_node) {
                    Some(parents) => parents,
                    None => {
                        if self.original_graph.contains_key(&next_node) {
                            // on the stack but not completed: a cycle
                            let stack =
                                self.node_stack.iter().map(|f| f.node.clone()).collect();
                            return Err(Error::Cycle(stack));
                        }
                        // just a ghost parent
                        continue;
                    }
                };
                let depth =
                    self.node_stack.last().unwrap().merge_depth + usize::from(!is_left_subtree);
                self.push_node(next_node, depth, parents);
                break;
            }
        }
        Ok(())
    }

    fn into_rows(mut self) -> Result<Vec<MergeSortRow<K>>, Error<K>> {
        self.schedule()?;
        let mut rows = Vec::with_capacity(self.scheduled.len());
        let mut sequence = 0;
        while let Some((node, merge_depth, revno)) = self.scheduled.pop() {
            if Some(&node) == self.stop_revision.as_ref() {
                break;
            }
            let end_of_merge = match self.scheduled.last() {
                // the last revision always closes its merge
                None => true,
                Some((next_node, next_depth, _)) => {
                    if *next_depth < merge_depth {
                        true
                    } else {
                        *next_depth == merge_depth
                            && !self.original_graph[&node].contains(next_node)
                    }
                }
            };
            rows.push(MergeSortRow {
                sequence,
                node,
                merge_depth,
                revno: if self.generate_revno { Some(revno) } else { None },
                end_of_merge,
            });
            sequence += 1;
        }
        Ok(rows)
    }
}

/// Merge-sort a graph from `branch_tip` down.
///
/// Nodes not reachable from the tip are not included in the output.
pub fn merge_sort<K: Eq + Hash + Clone + std::fmt::Debug>(
    graph: HashMap<K, Vec<K>>,
    branch_tip: K,
    mainline: Option<&[K]>,
    generate_revno: bool,
) -> Result<Vec<MergeSortRow<K>>, Error<K>> {
    MergeSorter::new(graph, branch_tip, mainline, generate_revno).into_rows()
}
