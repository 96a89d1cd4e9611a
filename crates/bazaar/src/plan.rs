//! Merge planning: turn two revisions of a text plus their ancestry into a
//! tagged line stream that a plan replay can merge.

use crate::weave::{self, Weave};
use crate::RevisionId;
use heddle_annotate::matching_blocks;
use heddle_graph::tsort::merge_sort;
use heddle_graph::{collapse_linear_regions, Graph, ParentMap, Parents, ParentsProvider};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Classification of one line in a merge plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanTag {
    /// Live on both sides.
    Unchanged,
    /// Introduced by A, absent from B's ancestry.
    NewA,
    /// Introduced by B, absent from A's ancestry.
    NewB,
    /// In the common ancestry, deleted by A only.
    KilledA,
    /// In the common ancestry, deleted by B only.
    KilledB,
    /// Deleted independently by both sides.
    KilledBoth,
    /// Deleted in the common ancestry; live on neither side.
    KilledBase,
    /// Introduced and deleted within A's ancestry.
    GhostA,
    /// Introduced and deleted within B's ancestry.
    GhostB,
    /// In neither side's ancestry.
    Irrelevant,
    /// Unique to A but present in some LCA: A reinstated it while B killed
    /// it, or the sides resolved an earlier conflict differently.
    ConflictedA,
    /// Symmetric for B.
    ConflictedB,
}

impl PlanTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTag::Unchanged => "unchanged",
            PlanTag::NewA => "new-a",
            PlanTag::NewB => "new-b",
            PlanTag::KilledA => "killed-a",
            PlanTag::KilledB => "killed-b",
            PlanTag::KilledBoth => "killed-both",
            PlanTag::KilledBase => "killed-base",
            PlanTag::GhostA => "ghost-a",
            PlanTag::GhostB => "ghost-b",
            PlanTag::Irrelevant => "irrelevant",
            PlanTag::ConflictedA => "conflicted-a",
            PlanTag::ConflictedB => "conflicted-b",
        }
    }
}

impl std::fmt::Display for PlanTag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type PlanLine = (PlanTag, Vec<u8>);

/// Line access for the planners; weaves provide this, and so can any
/// per-file view of a repository.
pub trait TextRepository {
    fn get_lines(&self, version: &RevisionId) -> Result<Vec<Vec<u8>>, weave::Error>;
}

impl TextRepository for Weave {
    fn get_lines(&self, version: &RevisionId) -> Result<Vec<Vec<u8>>, weave::Error> {
        Weave::get_lines(self, version)
    }
}

/// Plan a merge of `a_rev` and `b_rev` with the recursive-LCA weave
/// strategy.  With `base`, changes already present in the base are
/// subtracted from the plan (cherry-pick).
pub fn plan_merge(
    a_rev: &RevisionId,
    b_rev: &RevisionId,
    base: Option<&RevisionId>,
    texts: &dyn TextRepository,
    parents: &dyn ParentsProvider<RevisionId>,
) -> Result<Vec<PlanLine>, weave::Error> {
    match base {
        None => PlanMerge::new(a_rev, b_rev, texts, parents).plan(),
        Some(base) => {
            let old_plan = PlanMerge::new(a_rev, base, texts, parents).plan()?;
            let new_plan = PlanMerge::new(a_rev, b_rev, texts, parents).plan()?;
            Ok(subtract_plans(&old_plan, &new_plan))
        }
    }
}

/// Plan a merge by comparing both sides against each LCA directly.
///
/// Faster than the weave strategy, and it diagnoses criss-cross
/// divergences: a line one side reinstated while the other killed it comes
/// out `conflicted-*` instead of silently winning.
pub fn plan_lca_merge(
    a_rev: &RevisionId,
    b_rev: &RevisionId,
    base: Option<&RevisionId>,
    texts: &dyn TextRepository,
    parents: &dyn ParentsProvider<RevisionId>,
) -> Result<Vec<PlanLine>, weave::Error> {
    match base {
        None => PlanLcaMerge::new(a_rev, b_rev, texts, parents)?.plan(),
        Some(base) => {
            let old_plan = PlanLcaMerge::new(a_rev, base, texts, parents)?.plan()?;
            let new_plan = PlanLcaMerge::new(a_rev, b_rev, texts, parents)?.plan()?;
            Ok(subtract_plans(&old_plan, &new_plan))
        }
    }
}

/// Remove changes from `new_plan` that came from `old_plan`.
///
/// The difference between the two plans is assumed to be their choice of
/// 'b' text.  Matching lines about the 'b' revision are the ones we do not
/// want: `killed-b` becomes `unchanged` and `new-b` is dropped entirely.
pub fn subtract_plans(old_plan: &[PlanLine], new_plan: &[PlanLine]) -> Vec<PlanLine> {
    let blocks = matching_blocks(old_plan, new_plan);
    let mut result = Vec::with_capacity(new_plan.len());
    let mut last_j = 0;
    for (_, j, n) in blocks {
        for entry in &new_plan[last_j..j] {
            result.push(entry.clone());
        }
        for entry in &new_plan[j..j + n] {
            match entry.0 {
                PlanTag::NewB => {}
                PlanTag::KilledB => result.push((PlanTag::Unchanged, entry.1.clone())),
                _ => result.push(entry.clone()),
            }
        }
        last_j = j + n;
    }
    result
}

/// Split matching blocks into the line numbers unique to each side.
fn unique_lines(blocks: &[(usize, usize, usize)]) -> (Vec<usize>, Vec<usize>) {
    let mut unique_left = Vec::new();
    let mut unique_right = Vec::new();
    let mut last_i = 0;
    let mut last_j = 0;
    for &(i, j, n) in blocks {
        unique_left.extend(last_i..i);
        unique_right.extend(last_j..j);
        last_i = i + n;
        last_j = j + n;
    }
    (unique_left, unique_right)
}

/// Plan an annotate merge using an in-memory weave built from the
/// recursive LCA frontier.
struct PlanMerge<'a> {
    a_rev: RevisionId,
    b_rev: RevisionId,
    texts: &'a dyn TextRepository,
    parents: &'a dyn ParentsProvider<RevisionId>,
}

impl<'a> PlanMerge<'a> {
    fn new(
        a_rev: &RevisionId,
        b_rev: &RevisionId,
        texts: &'a dyn TextRepository,
        parents: &'a dyn ParentsProvider<RevisionId>,
    ) -> Self {
        PlanMerge {
            a_rev: a_rev.clone(),
            b_rev: b_rev.clone(),
            texts,
            parents,
        }
    }

    fn plan(&self) -> Result<Vec<PlanLine>, weave::Error> {
        let graph = Graph::new(self.parents);
        let heads = graph.heads(&[self.a_rev.clone(), self.b_rev.clone()]);
        if heads.len() == 1 {
            // one side dominates, so its text simply wins
            let head = heads.into_iter().next().unwrap();
            debug!("found dominating revision {}", head);
            let tag = if head == self.a_rev {
                PlanTag::NewA
            } else {
                PlanTag::NewB
            };
            let lines = self.texts.get_lines(&head)?;
            return Ok(lines.into_iter().map(|l| (tag, l)).collect());
        }
        let weave = self.build_weave(&graph)?;
        weave.plan_merge(&self.a_rev, &self.b_rev)
    }

    fn build_weave(&self, graph: &Graph<RevisionId>) -> Result<Weave, weave::Error> {
        let mut parent_map = self.find_recursive_lcas(graph);

        // The insertion order decides tie-breaks in the output, so the
        // in-memory weave is filled in reversed merge-sort order seeded
        // with a synthetic tip: left-hand parents always land before
        // right-hand parents.
        let tip = RevisionId::current();
        parent_map.insert(tip.clone(), vec![self.a_rev.clone(), self.b_rev.clone()]);

        let rows = merge_sort(parent_map.clone(), tip.clone(), None, false)
            .map_err(|e| weave::Error::Format(e.to_string()))?;

        let mut weave = Weave::new_allow_reserved(Some("in-memory-weave".to_string()));
        for row in rows.into_iter().rev() {
            if row.node == tip {
                continue;
            }
            let node_parents = &parent_map[&row.node];
            let lines = self.texts.get_lines(&row.node)?;
            weave.add_lines(&row.node, node_parents, &lines)?;
        }
        Ok(weave)
    }

    /// Find all the ancestors back to a unique lca.
    fn find_recursive_lcas(
        &self,
        graph: &Graph<RevisionId>,
    ) -> HashMap<RevisionId, Vec<RevisionId>> {
        let mut parent_map: HashMap<RevisionId, Vec<RevisionId>> = HashMap::new();
        let mut cur_ancestors = vec![self.a_rev.clone(), self.b_rev.clone()];
        loop {
            let next_lcas = graph.find_lca(&cur_ancestors);
            // While the merge itself works on a set of active revisions,
            // the order the LCAs were merged into each tip decides the
            // implicit ordering of the texts, so record ordered parents.
            for rev in &cur_ancestors {
                parent_map.insert(rev.clone(), graph.find_merge_order(rev, &next_lcas));
            }
            match next_lcas.len() {
                0 => break,
                1 => {
                    parent_map.insert(next_lcas.into_iter().next().unwrap(), Vec::new());
                    break;
                }
                2 => {
                    cur_ancestors = next_lcas.into_iter().collect();
                }
                _ => {
                    // More than two LCAs: fall back to grabbing all nodes
                    // between here and the unique lca.
                    debug!(
                        "more than 2 LCAs, falling back to all nodes for {} and {}",
                        self.a_rev, self.b_rev
                    );
                    let tips: Vec<RevisionId> = next_lcas.iter().cloned().collect();
                    let mut cur_lcas = next_lcas;
                    while cur_lcas.len() > 1 {
                        let as_vec: Vec<RevisionId> = cur_lcas.into_iter().collect();
                        cur_lcas = graph.find_lca(&as_vec);
                    }
                    let unique_lca = cur_lcas.into_iter().next();
                    parent_map.extend(self.find_unique_parents(graph, &tips, unique_lca));
                    break;
                }
            }
        }
        parent_map
    }

    /// The parent map for all revisions between `tips` and `base`; `base`
    /// itself is included with no parents.  References pointing outside the
    /// set are culled, dangling tails pruned, and linear runs collapsed.
    fn find_unique_parents(
        &self,
        graph: &Graph<RevisionId>,
        tips: &[RevisionId],
        base: Option<RevisionId>,
    ) -> HashMap<RevisionId, Vec<RevisionId>> {
        let raw: HashMap<RevisionId, Vec<RevisionId>> = match &base {
            None => graph
                .iter_ancestry(tips)
                .into_iter()
                .filter_map(|(k, p)| match p {
                    Parents::Ghost => None,
                    Parents::Known(v) => Some((k, v)),
                })
                .collect(),
            Some(base) => {
                let mut interesting: HashSet<RevisionId> = HashSet::new();
                for tip in tips {
                    interesting
                        .extend(graph.find_unique_ancestors(tip, std::slice::from_ref(base)));
                }
                let mut raw: HashMap<RevisionId, Vec<RevisionId>> = graph
                    .get_parent_map(&interesting)
                    .into_iter()
                    .filter_map(|(k, p)| match p {
                        Parents::Ghost => None,
                        Parents::Known(v) => Some((k, v)),
                    })
                    .collect();
                raw.insert(base.clone(), Vec::new());
                raw
            }
        };
        let (mut culled, mut child_map, mut tails) = remove_external_references(raw);
        if let Some(base) = &base {
            tails.retain(|t| t != base);
            prune_tails(&mut culled, &mut child_map, tails);
        }
        // now drop the uninteresting linear regions
        let collapsed = collapse_linear_regions(&ParentMap::from(culled));
        collapsed.into()
    }
}

/// Remove references that go outside of the parent map.
///
/// Returns the filtered map, the child map, and the tails (nodes with no
/// parents inside the map).
fn remove_external_references(
    parent_map: HashMap<RevisionId, Vec<RevisionId>>,
) -> (
    HashMap<RevisionId, Vec<RevisionId>>,
    HashMap<RevisionId, Vec<RevisionId>>,
    Vec<RevisionId>,
) {
    let mut filtered: HashMap<RevisionId, Vec<RevisionId>> = HashMap::new();
    let mut child_map: HashMap<RevisionId, Vec<RevisionId>> = HashMap::new();
    let mut tails: Vec<RevisionId> = Vec::new();
    for (key, parents) in &parent_map {
        let culled: Vec<RevisionId> = parents
            .iter()
            .filter(|p| parent_map.contains_key(*p))
            .cloned()
            .collect();
        if culled.is_empty() {
            tails.push(key.clone());
        }
        for parent in &culled {
            child_map
                .entry(parent.clone())
                .or_default()
                .push(key.clone());
        }
        child_map.entry(key.clone()).or_default();
        filtered.insert(key.clone(), culled);
    }
    (filtered, child_map, tails)
}

/// Remove tails from the parent map until no more children hit zero
/// parents.
fn prune_tails(
    parent_map: &mut HashMap<RevisionId, Vec<RevisionId>>,
    child_map: &mut HashMap<RevisionId, Vec<RevisionId>>,
    mut tails_to_remove: Vec<RevisionId>,
) {
    while let Some(next) = tails_to_remove.pop() {
        parent_map.remove(&next);
        let children = child_map.remove(&next).unwrap_or_default();
        for child in children {
            if let Some(child_parents) = parent_map.get_mut(&child) {
                child_parents.retain(|p| p != &next);
                if child_parents.is_empty() {
                    tails_to_remove.push(child);
                }
            }
        }
    }
}

/// Plan a merge by comparing against each LCA with patience diff.
struct PlanLcaMerge {
    a_rev: RevisionId,
    b_rev: RevisionId,
    lines_a: Vec<Vec<u8>>,
    lines_b: Vec<Vec<u8>>,
    lcas: Vec<RevisionId>,
    // LCA comparisons reuse the same sequence against multiple LCAs, so
    // matching blocks are cached per (left, right) pair
    cached_blocks: HashMap<(RevisionId, RevisionId), Vec<(usize, usize, usize)>>,
}

impl PlanLcaMerge {
    fn new(
        a_rev: &RevisionId,
        b_rev: &RevisionId,
        texts: &dyn TextRepository,
        parents: &dyn ParentsProvider<RevisionId>,
    ) -> Result<Self, weave::Error> {
        let graph = Graph::new(parents);
        let lines_a = texts.get_lines(a_rev)?;
        let lines_b = texts.get_lines(b_rev)?;
        let found = graph.find_lca(&[a_rev.clone(), b_rev.clone()]);
        let lcas: Vec<RevisionId> = if found.is_empty() {
            // unrelated texts compare against the empty base
            vec![RevisionId::null()]
        } else {
            found.into_iter().collect()
        };
        let mut cached_blocks = HashMap::new();
        for lca in &lcas {
            let lca_lines = if lca.is_null() {
                Vec::new()
            } else {
                texts.get_lines(lca)?
            };
            cached_blocks.insert(
                (a_rev.clone(), lca.clone()),
                matching_blocks(&lines_a, &lca_lines),
            );
            cached_blocks.insert(
                (b_rev.clone(), lca.clone()),
                matching_blocks(&lines_b, &lca_lines),
            );
        }
        Ok(PlanLcaMerge {
            a_rev: a_rev.clone(),
            b_rev: b_rev.clone(),
            lines_a,
            lines_b,
            lcas,
            cached_blocks,
        })
    }

    /// Determine why lines are unique to `rev`: new (absent from every
    /// LCA) or killed (present in at least one LCA).  A line can be both,
    /// which means the two sides resolved an earlier conflict differently.
    fn determine_status(
        &self,
        rev: &RevisionId,
        unique_line_numbers: &[usize],
    ) -> (HashSet<usize>, HashSet<usize>) {
        let unique: HashSet<usize> = unique_line_numbers.iter().copied().collect();
        let mut new = HashSet::new();
        let mut killed = HashSet::new();
        for lca in &self.lcas {
            let blocks = &self.cached_blocks[&(rev.clone(), lca.clone())];
            let unique_vs_lca: HashSet<usize> =
                unique_lines(blocks).0.into_iter().collect();
            new.extend(unique.intersection(&unique_vs_lca).copied());
            killed.extend(unique.difference(&unique_vs_lca).copied());
        }
        (new, killed)
    }

    fn plan(&self) -> Result<Vec<PlanLine>, weave::Error> {
        let blocks = matching_blocks(&self.lines_a, &self.lines_b);
        let (unique_a, unique_b) = unique_lines(&blocks);
        let (new_a, killed_b) = self.determine_status(&self.a_rev, &unique_a);
        let (new_b, killed_a) = self.determine_status(&self.b_rev, &unique_b);

        let mut plan = Vec::new();
        let mut last_i = 0;
        let mut last_j = 0;
        for (i, j, n) in blocks {
            for a_index in last_i..i {
                let line = self.lines_a[a_index].clone();
                if new_a.contains(&a_index) {
                    if killed_b.contains(&a_index) {
                        plan.push((PlanTag::ConflictedA, line));
                    } else {
                        plan.push((PlanTag::NewA, line));
                    }
                } else {
                    plan.push((PlanTag::KilledB, line));
                }
            }
            for b_index in last_j..j {
                let line = self.lines_b[b_index].clone();
                if new_b.contains(&b_index) {
                    if killed_a.contains(&b_index) {
                        plan.push((PlanTag::ConflictedB, line));
                    } else {
                        plan.push((PlanTag::NewB, line));
                    }
                } else {
                    plan.push((PlanTag::KilledA, line));
                }
            }
            for a_index in i..i + n {
                plan.push((PlanTag::Unchanged, self.lines_a[a_index].clone()));
            }
            last_i = i + n;
            last_j = j + n;
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heddle_graph::DictParentsProvider;
    use maplit::hashmap;

    struct MapTexts(HashMap<RevisionId, Vec<Vec<u8>>>);

    impl TextRepository for MapTexts {
        fn get_lines(&self, version: &RevisionId) -> Result<Vec<Vec<u8>>, weave::Error> {
            self.0
                .get(version)
                .cloned()
                .ok_or_else(|| weave::Error::RevisionNotPresent(version.clone()))
        }
    }

    fn rev(name: &str) -> RevisionId {
        RevisionId::from(name)
    }

    fn lines(texts: &[&str]) -> Vec<Vec<u8>> {
        texts.iter().map(|t| t.as_bytes().to_vec()).collect()
    }

    fn diamond() -> (MapTexts, DictParentsProvider<RevisionId>) {
        let texts = MapTexts(hashmap! {
            rev("r1") => lines(&["a\n", "b\n", "c\n"]),
            rev("r2") => lines(&["a\n", "B\n", "c\n"]),
            rev("r3") => lines(&["a\n", "b\n", "C\n"]),
        });
        let parents = DictParentsProvider::from(hashmap! {
            rev("r1") => vec![],
            rev("r2") => vec![rev("r1")],
            rev("r3") => vec![rev("r1")],
        });
        (texts, parents)
    }

    #[test]
    fn test_plan_merge_diamond() {
        let (texts, parents) = diamond();
        let plan = plan_merge(&rev("r2"), &rev("r3"), None, &texts, &parents).unwrap();
        let rendered: Vec<(PlanTag, &str)> = plan
            .iter()
            .map(|(t, l)| (*t, std::str::from_utf8(l).unwrap()))
            .collect();
        assert!(rendered.contains(&(PlanTag::Unchanged, "a\n")));
        assert!(rendered.contains(&(PlanTag::NewA, "B\n")));
        assert!(rendered.contains(&(PlanTag::KilledA, "b\n")));
        assert!(rendered.contains(&(PlanTag::NewB, "C\n")));
        assert!(rendered.contains(&(PlanTag::KilledB, "c\n")));
    }

    #[test]
    fn test_plan_merge_dominating_side() {
        let texts = MapTexts(hashmap! {
            rev("r1") => lines(&["a\n"]),
            rev("r2") => lines(&["a\n", "b\n"]),
        });
        let parents = DictParentsProvider::from(hashmap! {
            rev("r1") => vec![],
            rev("r2") => vec![rev("r1")],
        });
        let plan = plan_merge(&rev("r2"), &rev("r1"), None, &texts, &parents).unwrap();
        assert_eq!(
            plan,
            vec![
                (PlanTag::NewA, b"a\n".to_vec()),
                (PlanTag::NewA, b"b\n".to_vec())
            ]
        );
    }

    #[test]
    fn test_plan_lca_merge_diamond() {
        let (texts, parents) = diamond();
        let plan = plan_lca_merge(&rev("r2"), &rev("r3"), None, &texts, &parents).unwrap();
        let rendered: Vec<(PlanTag, &str)> = plan
            .iter()
            .map(|(t, l)| (*t, std::str::from_utf8(l).unwrap()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                (PlanTag::Unchanged, "a\n"),
                (PlanTag::NewA, "B\n"),
                (PlanTag::KilledB, "b\n"),
                (PlanTag::NewB, "C\n"),
                (PlanTag::Unchanged, "c\n"),
            ]
        );
    }

    #[test]
    fn test_plan_lca_merge_criss_cross_conflict() {
        // x1 and x2 are criss-cross LCAs that already disagree about the
        // middle line; each tip keeps a different side's resolution.
        let texts = MapTexts(hashmap! {
            rev("base") => lines(&["a\n", "mid\n", "z\n"]),
            rev("x1") => lines(&["a\n", "one\n", "z\n"]),
            rev("x2") => lines(&["a\n", "two\n", "z\n"]),
            rev("tip-a") => lines(&["a\n", "one\n", "z\n"]),
            rev("tip-b") => lines(&["a\n", "two\n", "z\n"]),
        });
        let parents = DictParentsProvider::from(hashmap! {
            rev("base") => vec![],
            rev("x1") => vec![rev("base")],
            rev("x2") => vec![rev("base")],
            rev("tip-a") => vec![rev("x1"), rev("x2")],
            rev("tip-b") => vec![rev("x2"), rev("x1")],
        });
        let plan = plan_lca_merge(&rev("tip-a"), &rev("tip-b"), None, &texts, &parents).unwrap();
        let rendered: Vec<(PlanTag, &str)> = plan
            .iter()
            .map(|(t, l)| (*t, std::str::from_utf8(l).unwrap()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                (PlanTag::Unchanged, "a\n"),
                (PlanTag::ConflictedA, "one\n"),
                (PlanTag::ConflictedB, "two\n"),
                (PlanTag::Unchanged, "z\n"),
            ]
        );
    }

    #[test]
    fn test_subtract_plans() {
        let old_plan = vec![
            (PlanTag::Unchanged, b"a\n".to_vec()),
            (PlanTag::NewB, b"cherry\n".to_vec()),
        ];
        let new_plan = vec![
            (PlanTag::Unchanged, b"a\n".to_vec()),
            (PlanTag::NewB, b"cherry\n".to_vec()),
            (PlanTag::NewB, b"extra\n".to_vec()),
        ];
        let result = subtract_plans(&old_plan, &new_plan);
        assert_eq!(
            result,
            vec![
                (PlanTag::Unchanged, b"a\n".to_vec()),
                (PlanTag::NewB, b"extra\n".to_vec()),
            ]
        );
    }

    #[test]
    fn test_plan_merge_criss_cross_weave() {
        // The weave strategy papers over the criss-cross: each side's
        // surviving line is reported against the other side's ancestry.
        let texts = MapTexts(hashmap! {
            rev("base") => lines(&["a\n", "mid\n", "z\n"]),
            rev("x1") => lines(&["a\n", "one\n", "z\n"]),
            rev("x2") => lines(&["a\n", "two\n", "z\n"]),
            rev("tip-a") => lines(&["a\n", "one\n", "z\n"]),
            rev("tip-b") => lines(&["a\n", "two\n", "z\n"]),
        });
        let parents = DictParentsProvider::from(hashmap! {
            rev("base") => vec![],
            rev("x1") => vec![rev("base")],
            rev("x2") => vec![rev("base")],
            rev("tip-a") => vec![rev("x1"), rev("x2")],
            rev("tip-b") => vec![rev("x2"), rev("x1")],
        });
        let plan = plan_merge(&rev("tip-a"), &rev("tip-b"), None, &texts, &parents).unwrap();
        // every input line is accounted for
        let total_lines: Vec<&str> = plan
            .iter()
            .map(|(_, l)| std::str::from_utf8(l).unwrap())
            .collect();
        assert!(total_lines.contains(&"one\n"));
        assert!(total_lines.contains(&"two\n"));
        assert!(total_lines.contains(&"a\n"));
        assert!(total_lines.contains(&"z\n"));
    }
}
