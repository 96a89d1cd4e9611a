//! A small in-memory repository: the revision graph, revision trees and
//! per-file weaves the merge machinery reads from.

use crate::tree::RevisionTree;
use heddle_annotate::HeadsProvider;
use heddle_bazaar::weave::Weave;
use heddle_bazaar::{FileId, RevisionId};
use heddle_graph::{Graph, ParentMap, Parents, ParentsProvider};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct Repository {
    revisions: HashMap<RevisionId, Vec<RevisionId>>,
    trees: HashMap<RevisionId, RevisionTree>,
    file_weaves: HashMap<FileId, Weave>,
}

impl Repository {
    pub fn new() -> Self {
        Repository::default()
    }

    pub fn add_revision(
        &mut self,
        revision_id: &RevisionId,
        parents: &[RevisionId],
        tree: RevisionTree,
    ) {
        self.revisions
            .insert(revision_id.clone(), parents.to_vec());
        self.trees.insert(revision_id.clone(), tree);
    }

    pub fn has_revision(&self, revision_id: &RevisionId) -> bool {
        self.revisions.contains_key(revision_id)
    }

    /// The tree for a revision; `null:` always answers the empty tree.
    pub fn revision_tree(&self, revision_id: &RevisionId) -> Option<RevisionTree> {
        if revision_id.is_null() {
            return Some(RevisionTree::empty(revision_id.clone()));
        }
        self.trees.get(revision_id).cloned()
    }

    pub fn graph(&self) -> Graph<'_, RevisionId> {
        Graph::new(self)
    }

    /// Record one version of a file's text, building the per-file weave.
    pub fn add_file_version(
        &mut self,
        file_id: &FileId,
        revision_id: &RevisionId,
        parents: &[RevisionId],
        lines: &[Vec<u8>],
    ) -> Result<(), heddle_bazaar::weave::Error> {
        let weave = self
            .file_weaves
            .entry(file_id.clone())
            .or_insert_with(|| Weave::new(Some(format!("{}", file_id))));
        weave.add_lines(revision_id, parents, lines)?;
        Ok(())
    }

    pub fn file_weave(&self, file_id: &FileId) -> Option<&Weave> {
        self.file_weaves.get(file_id)
    }

    /// A heads oracle over the revision graph, memoizing answers; feeds
    /// the annotator.
    pub fn heads_provider(&self) -> CachingHeadsProvider<'_> {
        CachingHeadsProvider {
            repository: self,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl ParentsProvider<RevisionId> for Repository {
    fn get_parent_map(&self, keys: &HashSet<RevisionId>) -> ParentMap<RevisionId> {
        let mut map = ParentMap::new();
        for key in keys {
            if let Some(parents) = self.revisions.get(key) {
                map.insert(key.clone(), Parents::Known(parents.clone()));
            }
        }
        map
    }
}

pub struct CachingHeadsProvider<'a> {
    repository: &'a Repository,
    cache: RefCell<HashMap<Vec<RevisionId>, Vec<RevisionId>>>,
}

impl CachingHeadsProvider<'_> {
    fn cache_key(keys: &[RevisionId]) -> Vec<RevisionId> {
        let mut key = keys.to_vec();
        key.sort();
        key
    }
}

impl HeadsProvider<RevisionId> for CachingHeadsProvider<'_> {
    fn heads(&self, keys: &[RevisionId]) -> Vec<RevisionId> {
        let cache_key = Self::cache_key(keys);
        if let Some(cached) = self.cache.borrow().get(&cache_key) {
            return cached.clone();
        }
        let mut result: Vec<RevisionId> = self
            .repository
            .graph()
            .heads(keys)
            .into_iter()
            .collect();
        result.sort();
        self.cache.borrow_mut().insert(cache_key, result.clone());
        result
    }

    fn cache(&self, keys: &[RevisionId], heads: &[RevisionId]) {
        self.cache
            .borrow_mut()
            .insert(Self::cache_key(keys), heads.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(name: &str) -> RevisionId {
        RevisionId::from(name)
    }

    #[test]
    fn test_graph_queries() {
        let mut repo = Repository::new();
        repo.add_revision(&rev("r1"), &[], RevisionTree::new(rev("r1")));
        repo.add_revision(&rev("r2"), &[rev("r1")], RevisionTree::new(rev("r2")));
        repo.add_revision(&rev("r3"), &[rev("r1")], RevisionTree::new(rev("r3")));
        let graph = repo.graph();
        assert_eq!(
            graph.find_lca(&[rev("r2"), rev("r3")]),
            [rev("r1")].into_iter().collect()
        );
        assert!(graph.is_ancestor(&rev("r1"), &rev("r2")));
    }

    #[test]
    fn test_heads_provider_memoizes() {
        let mut repo = Repository::new();
        repo.add_revision(&rev("r1"), &[], RevisionTree::new(rev("r1")));
        repo.add_revision(&rev("r2"), &[rev("r1")], RevisionTree::new(rev("r2")));
        let provider = repo.heads_provider();
        assert_eq!(
            provider.heads(&[rev("r1"), rev("r2")]),
            vec![rev("r2")]
        );
        // a cached override is returned as stored
        provider.cache(&[rev("x"), rev("y")], &[rev("x")]);
        assert_eq!(provider.heads(&[rev("y"), rev("x")]), vec![rev("x")]);
    }

    #[test]
    fn test_null_revision_tree() {
        let repo = Repository::new();
        let tree = repo.revision_tree(&RevisionId::null()).unwrap();
        assert!(crate::tree::Tree::all_file_ids(&tree).is_empty());
    }
}
