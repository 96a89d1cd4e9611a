//! Three-way and LCA-aware tree merging.
//!
//! A [`Merger`] resolves BASE from the revision graph (detecting
//! criss-cross ancestry), then a [`MergeEngine`] streams per-file
//! decisions into a [`TreeTransform`]: kind, parent and name, content and
//! executability each resolve independently, with conflicts accumulated
//! and cooked into path-addressed records at the end.

use crate::conflicts::Conflict;
use crate::progress::SilentProgress;
use crate::repository::Repository;
use crate::transform::{
    self, create_from_tree, resolve_conflicts, FinalPaths, TransId, TransformError, TreeTransform,
    ROOT_PARENT,
};
use crate::tree::{self, RevisionTree, Tree, WorkingTree};
use heddle_bazaar::plan::{plan_lca_merge, plan_merge, PlanLine, TextRepository};
use heddle_bazaar::textmerge::{Merge3, Merge3Error, PlanWeaveMerge};
use heddle_bazaar::weave::{self, Weave};
use heddle_bazaar::{FileId, RevisionId};
use heddle_graph::{ParentMap, Parents, ParentsProvider};
use heddle_osutils::textfile::check_text_lines;
use heddle_osutils::Kind;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::io::Write;

#[derive(Debug)]
pub enum MergeError {
    /// The two branches share no common ancestor.
    UnrelatedBranches,
    /// The chosen merge type cannot reverse-cherrypick.
    CannotReverseCherrypick,
    /// A revision required for the merge is not in the repository.
    RevisionNotPresent(RevisionId),
    /// The external diff3 tool failed outright.
    Diff3(String),
    Transform(TransformError),
    Weave(weave::Error),
    Text(Merge3Error),
    Io(std::io::Error),
}

impl From<TransformError> for MergeError {
    fn from(e: TransformError) -> Self {
        MergeError::Transform(e)
    }
}

impl From<weave::Error> for MergeError {
    fn from(e: weave::Error) -> Self {
        MergeError::Weave(e)
    }
}

impl From<Merge3Error> for MergeError {
    fn from(e: Merge3Error) -> Self {
        MergeError::Text(e)
    }
}

impl From<std::io::Error> for MergeError {
    fn from(e: std::io::Error) -> Self {
        MergeError::Io(e)
    }
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MergeError::UnrelatedBranches => write!(f, "branches have no common ancestor"),
            MergeError::CannotReverseCherrypick => {
                write!(f, "selected merge type does not support cherrypicking from this branch")
            }
            MergeError::RevisionNotPresent(rev) => {
                write!(f, "revision {} is not present in the repository", rev)
            }
            MergeError::Diff3(msg) => write!(f, "diff3 failed: {}", msg),
            MergeError::Transform(e) => write!(f, "{}", e),
            MergeError::Weave(e) => write!(f, "{}", e),
            MergeError::Text(e) => write!(f, "{}", e),
            MergeError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for MergeError {}

/// Which side a three-way comparison picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    This,
    Other,
    Conflict,
}

/// Three-way resolution of a scalar.
///
/// `base == other` means only THIS changed (or nothing did); a THIS value
/// equal to neither side is a conflict; `this == other` is the ambiguous
/// clean merge; otherwise only OTHER changed.
pub fn three_way<T: PartialEq>(base: &T, other: &T, this: &T) -> Winner {
    if base == other {
        Winner::This
    } else if this != base && this != other {
        Winner::Conflict
    } else if this == other {
        Winner::This
    } else {
        Winner::Other
    }
}

/// Consider LCAs when determining whether a change has occurred.
///
/// With all LCAs equal to the base this degrades to [`three_way`].  When
/// the LCAs themselves disagree, `allow_overriding_lca` lets a side that
/// moved past every LCA value win over a side still sitting on one; that
/// is appropriate for truly scalar values, never for content hashes.
pub fn lca_multi_way<T: PartialEq + Clone>(
    base: &T,
    lcas: &[T],
    other: &T,
    this: &T,
    allow_overriding_lca: bool,
) -> Winner {
    if other == this {
        // either ambiguously clean, or nothing was actually changed
        return Winner::This;
    }
    let filtered: Vec<&T> = lcas.iter().filter(|v| *v != base).collect();
    if filtered.is_empty() {
        return three_way(base, other, this);
    }
    let mut unique: Vec<&T> = Vec::new();
    for value in filtered {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    if unique.len() == 1 {
        return three_way(unique[0], other, this);
    }
    if allow_overriding_lca {
        let other_is_lca = unique.contains(&other);
        let this_is_lca = unique.contains(&this);
        if other_is_lca && this_is_lca {
            // each side picked a different lca
            return Winner::Conflict;
        }
        if other_is_lca {
            return Winner::This;
        }
        if this_is_lca {
            return Winner::Other;
        }
    }
    Winner::Conflict
}

/// One scalar under merge: base and per-LCA values, plus the two tips.
#[derive(Debug, Clone)]
pub struct MergeScalar<T> {
    pub base: Option<T>,
    pub lcas: Option<Vec<Option<T>>>,
    pub other: Option<T>,
    pub this: Option<T>,
}

impl<T: PartialEq + Clone> MergeScalar<T> {
    fn resolve(&self, allow_overriding_lca: bool) -> Winner {
        match &self.lcas {
            None => three_way(&self.base, &self.other, &self.this),
            Some(lcas) => lca_multi_way(
                &self.base,
                lcas,
                &self.other,
                &self.this,
                allow_overriding_lca,
            ),
        }
    }

    fn pick(&self, winner: Winner) -> Option<T> {
        match winner {
            Winner::This => self.this.clone(),
            // conflicts fall through to the other side's value, like the
            // original's winner index table
            Winner::Other | Winner::Conflict => self.other.clone(),
        }
    }
}

/// Per-file data gathered before merging.
struct MergeEntry {
    file_id: FileId,
    changed: bool,
    parents: MergeScalar<FileId>,
    names: MergeScalar<String>,
    executable: MergeScalar<bool>,
}

/// How a content merge left the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileStatus {
    Unmodified,
    Modified,
    Deleted,
    Conflicted,
}

/// Raw conflicts produced by the merge itself (the transform adds its
/// own).
enum MergeRawConflict {
    Path {
        trans_id: TransId,
        file_id: FileId,
        this_parent: Option<FileId>,
        this_name: Option<String>,
        other_parent: Option<FileId>,
        other_name: Option<String>,
    },
    Contents {
        file_group: Vec<TransId>,
    },
    Text {
        trans_id: TransId,
    },
}

/// What a per-file content merger decided.
pub enum HookOutcome {
    /// This merger does not handle the file; try the next one.
    NotApplicable,
    /// Merged cleanly to these lines.
    Success(Vec<Vec<u8>>),
    /// Produced these lines but with conflicts.
    Conflicted(Vec<Vec<u8>>),
    /// The file should be deleted.
    Delete,
    /// The merger already updated the transform itself.
    Done,
}

/// Parameters handed to `merge_file_content` mergers.
pub struct MergeHookParams<'t> {
    pub file_id: FileId,
    pub trans_id: TransId,
    pub this_kind: Option<Kind>,
    pub other_kind: Option<Kind>,
    pub winner: Winner,
    base_tree: &'t dyn Tree,
    this_tree: &'t dyn Tree,
    other_tree: &'t dyn Tree,
}

impl MergeHookParams<'_> {
    /// True if both sides hold plain files.
    pub fn is_file_merge(&self) -> bool {
        self.this_kind == Some(Kind::File) && self.other_kind == Some(Kind::File)
    }

    pub fn base_lines(&self) -> Vec<Vec<u8>> {
        get_lines(self.base_tree, &self.file_id)
    }

    pub fn this_lines(&self) -> Vec<Vec<u8>> {
        get_lines(self.this_tree, &self.file_id)
    }

    pub fn other_lines(&self) -> Vec<Vec<u8>> {
        get_lines(self.other_tree, &self.file_id)
    }
}

/// The lines in a file, or an empty list when the tree lacks it.
fn get_lines(tree: &dyn Tree, file_id: &FileId) -> Vec<Vec<u8>> {
    if tree.has_id(file_id) {
        tree.get_file_lines(file_id).unwrap_or_default()
    } else {
        Vec::new()
    }
}

/// A per-file content merger; instances come from the hook registry.
pub trait PerFileMerger {
    fn merge_contents(&mut self, params: &MergeHookParams<'_>) -> Result<HookOutcome, MergeError>;
}

type MergerFactory = Box<dyn Fn() -> Box<dyn PerFileMerger>>;

/// The merge hook registry: an explicit value, not process state.
///
/// `merge_file_content` factories run once per merge, and each resulting
/// merger is offered every file (including files one side deleted) before
/// the default resolver.
#[derive(Default)]
pub struct MergeHooks {
    merge_file_content: Vec<MergerFactory>,
}

impl MergeHooks {
    pub fn new() -> Self {
        MergeHooks::default()
    }

    pub fn add_merge_file_content<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn PerFileMerger> + 'static,
    {
        self.merge_file_content.push(Box::new(factory));
    }
}

/// How per-file text merging is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMergeStrategy {
    /// Three-way merge3 with conflict markers.
    #[default]
    Merge3,
    /// History-aware merge replaying a weave plan.
    Weave,
    /// History-aware merge comparing against each LCA.
    Lca,
    /// Shell out to the system `diff3` tool.
    Diff3,
}

impl TextMergeStrategy {
    fn history_based(&self) -> bool {
        matches!(self, TextMergeStrategy::Weave | TextMergeStrategy::Lca)
    }

    fn supports_reverse_cherrypick(&self) -> bool {
        !self.history_based()
    }

    fn supports_cherrypick(&self) -> bool {
        !self.history_based()
    }
}

/// Resolves BASE for a merge, detecting criss-cross ancestry.
pub struct Merger<'a> {
    repository: &'a Repository,
    this_tree: &'a WorkingTree,
    this_basis: RevisionId,
    other_rev: RevisionId,
    base_rev: Option<RevisionId>,
    is_criss_cross: bool,
    base_tree: Option<RevisionTree>,
    other_tree: Option<RevisionTree>,
    lca_trees: Vec<RevisionTree>,
}

impl<'a> Merger<'a> {
    pub fn from_revision_ids(
        repository: &'a Repository,
        this_tree: &'a WorkingTree,
        other: &RevisionId,
    ) -> Result<Merger<'a>, MergeError> {
        let this_basis = this_tree.last_revision().unwrap_or_else(RevisionId::null);
        let other_tree = repository
            .revision_tree(other)
            .ok_or_else(|| MergeError::RevisionNotPresent(other.clone()))?;
        Ok(Merger {
            repository,
            this_tree,
            this_basis,
            other_rev: other.clone(),
            base_rev: None,
            is_criss_cross: false,
            base_tree: None,
            other_tree: Some(other_tree),
            lca_trees: Vec::new(),
        })
    }

    pub fn base_rev_id(&self) -> Option<&RevisionId> {
        self.base_rev.as_ref()
    }

    pub fn is_criss_cross(&self) -> bool {
        self.is_criss_cross
    }

    fn revision_tree(&self, revision_id: &RevisionId) -> Result<RevisionTree, MergeError> {
        self.repository
            .revision_tree(revision_id)
            .ok_or_else(|| MergeError::RevisionNotPresent(revision_id.clone()))
    }

    /// Use an explicit base instead of searching for one.
    pub fn set_base_revision(&mut self, revision_id: &RevisionId) -> Result<(), MergeError> {
        self.base_rev = Some(revision_id.clone());
        self.base_tree = Some(self.revision_tree(revision_id)?);
        self.is_criss_cross = false;
        Ok(())
    }

    /// Resolve BASE via graph LCA.
    ///
    /// A unique LCA is used directly.  Multiple LCAs mean a criss-cross
    /// merge: the unique LCA of the LCAs becomes BASE and the LCA trees
    /// are retained, ordered by when they were merged into THIS, so scalar
    /// fields can use the multi-way resolution.
    pub fn find_base(&mut self) -> Result<(), MergeError> {
        let graph = self.repository.graph();
        if self.this_basis.is_null() || self.other_rev.is_null() {
            self.base_rev = Some(RevisionId::null());
            self.base_tree = Some(self.revision_tree(&RevisionId::null())?);
            self.is_criss_cross = false;
            return Ok(());
        }
        let lcas = graph.find_lca(&[self.this_basis.clone(), self.other_rev.clone()]);
        self.is_criss_cross = false;
        let base_rev = match lcas.len() {
            0 => return Err(MergeError::UnrelatedBranches),
            1 => lcas.iter().next().cloned().unwrap(),
            _ => {
                self.is_criss_cross = true;
                let unique = if lcas.len() > 2 {
                    // find_unique_lca handles two nodes, so start over from
                    // the tips
                    graph.find_unique_lca(&self.this_basis, &self.other_rev)
                } else {
                    let pair: Vec<RevisionId> = lcas.iter().cloned().collect();
                    graph.find_unique_lca(&pair[0], &pair[1])
                };
                let sorted_lca_keys = graph.find_merge_order(&self.this_basis, &lcas);
                let base = match unique {
                    Some(base) => base,
                    None => sorted_lca_keys[0].clone(),
                };
                warn!("criss-cross merge encountered; merge will use {} as base", base);
                debug!("criss-cross lcas: {:?}", lcas);
                for key in &sorted_lca_keys {
                    self.lca_trees.push(self.revision_tree(key)?);
                }
                base
            }
        };
        self.base_tree = Some(self.revision_tree(&base_rev)?);
        self.base_rev = Some(base_rev);
        Ok(())
    }

    pub fn base_is_ancestor(&self) -> bool {
        match &self.base_rev {
            None => false,
            Some(base) => {
                base.is_null()
                    || self
                        .repository
                        .graph()
                        .is_ancestor(base, &self.this_basis)
            }
        }
    }

    pub fn base_is_other_ancestor(&self) -> bool {
        match &self.base_rev {
            None => false,
            Some(base) => {
                base.is_null() || self.repository.graph().is_ancestor(base, &self.other_rev)
            }
        }
    }

    /// Build the per-file engine for this merge.
    pub fn make_merger(
        &'a self,
        strategy: TextMergeStrategy,
        hooks: &'a MergeHooks,
    ) -> Result<MergeEngine<'a>, MergeError> {
        let base_tree = self
            .base_tree
            .as_ref()
            .ok_or(MergeError::UnrelatedBranches)?;
        let other_tree = self
            .other_tree
            .as_ref()
            .ok_or_else(|| MergeError::RevisionNotPresent(self.other_rev.clone()))?;
        if !strategy.supports_reverse_cherrypick() && !self.base_is_other_ancestor() {
            return Err(MergeError::CannotReverseCherrypick);
        }
        let cherrypick = strategy.supports_cherrypick()
            && !(self.base_is_ancestor() && self.base_is_other_ancestor());
        let mut engine = MergeEngine::new(self.this_tree, base_tree, other_tree, hooks);
        engine.strategy = strategy;
        engine.cherrypick = cherrypick;
        engine.repository = Some(self.repository);
        if self.is_criss_cross {
            engine.lca_trees = Some(self.lca_trees.clone());
        }
        Ok(engine)
    }
}

/// The tree merge engine: three-way (or LCA multi-way) resolution of
/// kind, parent, name, content and executability per file, streamed into
/// a tree transform.
pub struct MergeEngine<'a> {
    pub this_tree: &'a WorkingTree,
    pub base_tree: &'a dyn Tree,
    pub other_tree: &'a dyn Tree,
    pub lca_trees: Option<Vec<RevisionTree>>,
    pub strategy: TextMergeStrategy,
    pub reprocess: bool,
    pub show_base: bool,
    pub cherrypick: bool,
    repository: Option<&'a Repository>,
    hooks: &'a MergeHooks,
    raw_conflicts: Vec<MergeRawConflict>,
    pub cooked_conflicts: Vec<Conflict>,
}

const THIS_MARKER: &str = "TREE";
const OTHER_MARKER: &str = "MERGE-SOURCE";
const BASE_MARKER: &str = "BASE-REVISION";

impl<'a> MergeEngine<'a> {
    pub fn new(
        this_tree: &'a WorkingTree,
        base_tree: &'a dyn Tree,
        other_tree: &'a dyn Tree,
        hooks: &'a MergeHooks,
    ) -> MergeEngine<'a> {
        MergeEngine {
            this_tree,
            base_tree,
            other_tree,
            lca_trees: None,
            strategy: TextMergeStrategy::default(),
            reprocess: false,
            show_base: false,
            cherrypick: false,
            repository: None,
            hooks,
            raw_conflicts: Vec::new(),
            cooked_conflicts: Vec::new(),
        }
    }

    pub fn set_repository(&mut self, repository: &'a Repository) {
        self.repository = Some(repository);
    }

    /// Perform the merge against the working tree and apply it.  Returns
    /// the cooked conflicts, which are also recorded on the tree.
    pub fn do_merge(&mut self) -> Result<Vec<Conflict>, MergeError> {
        let mut tt = TreeTransform::new(self.this_tree)?;
        self.compute_transform(&mut tt)?;
        tt.apply(true, &SilentProgress)?;
        self.this_tree.add_conflicts(self.cooked_conflicts.clone());
        if self.cooked_conflicts.is_empty() {
            debug!("all changes applied successfully");
        } else {
            debug!("{} conflicts encountered", self.cooked_conflicts.len());
        }
        Ok(self.cooked_conflicts.clone())
    }

    /// Compute the merge into a preview transform without touching disk.
    pub fn make_preview_transform(&mut self) -> Result<TreeTransform<'a>, MergeError> {
        let mut tt = TreeTransform::new_preview(self.this_tree);
        self.compute_transform(&mut tt)?;
        Ok(tt)
    }

    pub fn compute_transform(&mut self, tt: &mut TreeTransform<'_>) -> Result<(), MergeError> {
        let entries = if self.lca_trees.is_none() {
            self.entries3()
        } else {
            self.entries_lca()
        };
        let mut active_hooks: Vec<Box<dyn PerFileMerger>> = self
            .hooks
            .merge_file_content
            .iter()
            .map(|factory| factory())
            .collect();
        // files are handled in file-id order so conflict numbering is
        // deterministic
        for entry in &entries {
            self.merge_names(tt, entry)?;
            let file_status = if entry.changed {
                self.do_merge_contents(tt, &entry.file_id, &mut active_hooks)?
            } else {
                FileStatus::Unmodified
            };
            self.merge_executable(tt, entry, file_status)?;
        }
        tt.fixup_new_roots()?;
        let fs_conflicts = resolve_conflicts(tt, Some(self.other_tree))?;
        self.cook_conflicts(&fs_conflicts, tt)?;
        for conflict in &self.cooked_conflicts {
            warn!("{}", conflict);
        }
        Ok(())
    }

    /// Gather data about files modified between the three trees, by
    /// diffing OTHER against BASE with THIS as the extra reference.
    fn entries3(&self) -> Vec<MergeEntry> {
        let changes = tree::iter_changes(self.base_tree, self.other_tree);
        let mut result = Vec::new();
        for change in changes {
            let this_entry = self.this_tree.get_entry(&change.file_id);
            let (this_name, this_parent, this_exec) = match &this_entry {
                Some(entry) => (
                    Some(entry.name().to_string()),
                    entry.parent_id().cloned(),
                    Some(entry.executable()),
                ),
                None => (None, None, None),
            };
            let wrap = |versioned: bool, value: bool| if versioned { Some(value) } else { None };
            result.push(MergeEntry {
                file_id: change.file_id.clone(),
                changed: change.changed_content,
                parents: MergeScalar {
                    base: change.parent_id.0.clone(),
                    lcas: None,
                    other: change.parent_id.1.clone(),
                    this: this_parent,
                },
                names: MergeScalar {
                    base: change.name.0.clone(),
                    lcas: None,
                    other: change.name.1.clone(),
                    this: this_name,
                },
                executable: MergeScalar {
                    base: wrap(change.versioned.0, change.executable.0),
                    lcas: None,
                    other: wrap(change.versioned.1, change.executable.1),
                    this: this_exec,
                },
            });
        }
        result.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        result
    }

    /// Gather data about files modified relative to multiple LCA trees.
    ///
    /// OTHER is compared against all LCAs; only entries OTHER modified
    /// somewhere are interesting.  Returned scalars carry the per-LCA
    /// values so the multi-way rule can see LCA disagreement.
    fn entries_lca(&self) -> Vec<MergeEntry> {
        let lca_trees = self.lca_trees.as_ref().unwrap();
        let other = self.other_tree;
        let mut file_ids: HashSet<FileId> = other.all_file_ids().into_iter().collect();
        for tree in lca_trees {
            file_ids.extend(Tree::all_file_ids(tree));
        }
        let mut sorted_ids: Vec<FileId> = file_ids.into_iter().collect();
        sorted_ids.sort();

        let mut result = Vec::new();
        for file_id in sorted_ids {
            let other_entry = other.get_entry(&file_id);
            let lca_entries: Vec<Option<heddle_bazaar::inventory::Entry>> = lca_trees
                .iter()
                .map(|tree| Tree::get_entry(tree, &file_id))
                .collect();

            // if OTHER's revision is found in any LCA the node is not
            // interesting: the ancestry is linear and OTHER changed
            // nothing past it
            if let Some(other_revision) = other_entry.as_ref().and_then(|e| e.revision().cloned())
            {
                let unmodified = lca_entries.iter().any(|e| {
                    e.as_ref().and_then(|e| e.revision()) == Some(&other_revision)
                });
                if unmodified {
                    continue;
                }
            }

            let base_entry = self.base_tree.get_entry(&file_id);
            let this_entry = self.this_tree.get_entry(&file_id);

            let lca_kinds: Vec<Option<Kind>> =
                lca_entries.iter().map(|e| e.as_ref().map(|e| e.kind())).collect();
            let lca_parents: Vec<Option<FileId>> = lca_entries
                .iter()
                .map(|e| e.as_ref().and_then(|e| e.parent_id().cloned()))
                .collect();
            let lca_names: Vec<Option<String>> = lca_entries
                .iter()
                .map(|e| e.as_ref().map(|e| e.name().to_string()))
                .collect();
            let lca_executable: Vec<Option<bool>> = lca_entries
                .iter()
                .map(|e| e.as_ref().map(|e| e.executable()))
                .collect();

            let base_kind = base_entry.as_ref().map(|e| e.kind());
            let other_kind = other_entry.as_ref().map(|e| e.kind());
            let this_kind = this_entry.as_ref().map(|e| e.kind());
            let kind_winner = lca_multi_way(&base_kind, &lca_kinds, &other_kind, &this_kind, true);

            let parents = MergeScalar {
                base: base_entry.as_ref().and_then(|e| e.parent_id().cloned()),
                lcas: Some(lca_parents),
                other: other_entry.as_ref().and_then(|e| e.parent_id().cloned()),
                this: this_entry.as_ref().and_then(|e| e.parent_id().cloned()),
            };
            let names = MergeScalar {
                base: base_entry.as_ref().map(|e| e.name().to_string()),
                lcas: Some(lca_names),
                other: other_entry.as_ref().map(|e| e.name().to_string()),
                this: this_entry.as_ref().map(|e| e.name().to_string()),
            };
            let executable = MergeScalar {
                base: base_entry.as_ref().map(|e| e.executable()),
                lcas: Some(lca_executable),
                other: other_entry.as_ref().map(|e| e.executable()),
                this: this_entry.as_ref().map(|e| e.executable()),
            };
            let parent_winner = parents.resolve(true);
            let name_winner = names.resolve(true);

            let mut content_changed = true;
            if kind_winner == Winner::This {
                match other_kind {
                    Some(Kind::Directory) => {
                        if parent_winner == Winner::This && name_winner == Winner::This {
                            continue;
                        }
                        content_changed = false;
                    }
                    None | Some(Kind::File) => {
                        let sha1 = |entry: &Option<heddle_bazaar::inventory::Entry>,
                                    tree: &dyn Tree|
                         -> Option<String> {
                            match entry {
                                Some(e) if e.kind() == Kind::File => tree.get_file_sha1(&file_id),
                                _ => None,
                            }
                        };
                        let base_sha = sha1(&base_entry, self.base_tree);
                        let lca_shas: Vec<Option<String>> = lca_entries
                            .iter()
                            .zip(lca_trees.iter())
                            .map(|(e, t)| sha1(e, t))
                            .collect();
                        let this_sha = sha1(&this_entry, self.this_tree);
                        let other_sha = sha1(&other_entry, other);
                        // divergent LCA content must never be silently
                        // picked, so no overriding here
                        let sha_winner =
                            lca_multi_way(&base_sha, &lca_shas, &other_sha, &this_sha, false);
                        let exec_winner = executable.resolve(true);
                        if parent_winner == Winner::This
                            && name_winner == Winner::This
                            && sha_winner == Winner::This
                            && exec_winner == Winner::This
                        {
                            continue;
                        }
                        if sha_winner == Winner::This {
                            content_changed = false;
                        }
                    }
                    Some(Kind::Symlink) => {
                        let target = |entry: &Option<heddle_bazaar::inventory::Entry>,
                                      tree: &dyn Tree|
                         -> Option<String> {
                            match entry {
                                Some(e) if e.kind() == Kind::Symlink => {
                                    tree.get_symlink_target(&file_id)
                                }
                                _ => None,
                            }
                        };
                        let base_target = target(&base_entry, self.base_tree);
                        let lca_targets: Vec<Option<String>> = lca_entries
                            .iter()
                            .zip(lca_trees.iter())
                            .map(|(e, t)| target(e, t))
                            .collect();
                        let this_target = target(&this_entry, self.this_tree);
                        let other_target = target(&other_entry, other);
                        let target_winner = lca_multi_way(
                            &base_target,
                            &lca_targets,
                            &other_target,
                            &this_target,
                            true,
                        );
                        if parent_winner == Winner::This
                            && name_winner == Winner::This
                            && target_winner == Winner::This
                        {
                            continue;
                        }
                        if target_winner == Winner::This {
                            content_changed = false;
                        }
                    }
                    Some(Kind::TreeReference) => {
                        // reference revisions are handled at a higher level
                        content_changed = false;
                        if parent_winner == Winner::This && name_winner == Winner::This {
                            continue;
                        }
                    }
                }
            }

            result.push(MergeEntry {
                file_id,
                changed: content_changed,
                parents,
                names,
                executable,
            });
        }
        result
    }

    /// Merge names and parents for one file, recording a path conflict
    /// when the sides disagree about where it lives.
    fn merge_names(
        &mut self,
        tt: &mut TreeTransform<'_>,
        entry: &MergeEntry,
    ) -> Result<(), MergeError> {
        let mut name_winner = entry.names.resolve(true);
        let mut parent_winner = entry.parents.resolve(true);
        if entry.names.this.is_none() {
            if name_winner == Winner::This {
                name_winner = Winner::Other;
            }
            if parent_winner == Winner::This {
                parent_winner = Winner::Other;
            }
        }
        if name_winner == Winner::This && parent_winner == Winner::This {
            return Ok(());
        }
        if name_winner == Winner::Conflict || parent_winner == Winner::Conflict {
            // creating .OTHER/.THIS helpers here would get in the way of a
            // later contents conflict for the same file
            let trans_id = tt.trans_id_file_id(&entry.file_id);
            self.raw_conflicts.push(MergeRawConflict::Path {
                trans_id,
                file_id: entry.file_id.clone(),
                this_parent: entry.parents.this.clone(),
                this_name: entry.names.this.clone(),
                other_parent: entry.parents.other.clone(),
                other_name: entry.names.other.clone(),
            });
        }
        if !self.other_tree.has_id(&entry.file_id) {
            // if there's no 'other', whatever the winner was, we leave the
            // file alone
            return Ok(());
        }
        let parent_id = entry.parents.pick(parent_winner);
        let name = entry.names.pick(name_winner);
        if let Some(name) = name {
            let parent_trans_id = match parent_id {
                None => ROOT_PARENT,
                Some(parent_id) => tt.trans_id_file_id(&parent_id),
            };
            let trans_id = tt.trans_id_file_id(&entry.file_id);
            tt.adjust_path(&name, parent_trans_id, trans_id)?;
        }
        Ok(())
    }

    /// Perform a merge on one file's contents.
    fn do_merge_contents(
        &mut self,
        tt: &mut TreeTransform<'_>,
        file_id: &FileId,
        active_hooks: &mut [Box<dyn PerFileMerger>],
    ) -> Result<FileStatus, MergeError> {
        fn contents_pair(tree: &dyn Tree, file_id: &FileId) -> (Option<Kind>, Option<String>) {
            match tree.kind(file_id) {
                None => (None, None),
                Some(Kind::File) => (Some(Kind::File), tree.get_file_sha1(file_id)),
                Some(Kind::Symlink) => (Some(Kind::Symlink), tree.get_symlink_target(file_id)),
                Some(kind) => (Some(kind), None),
            }
        }
        fn pair_of(tree: &dyn Tree, file_id: &FileId) -> (Option<Kind>, Option<String>) {
            if tree.has_id(file_id) {
                contents_pair(tree, file_id)
            } else {
                (None, None)
            }
        }

        let base_pair = pair_of(self.base_tree, file_id);
        let other_pair = pair_of(self.other_tree, file_id);
        let this_pair = pair_of(self.this_tree, file_id);
        let winner = if let Some(lca_trees) = &self.lca_trees {
            let lca_pairs: Vec<(Option<Kind>, Option<String>)> = lca_trees
                .iter()
                .map(|tree| pair_of(tree, file_id))
                .collect();
            lca_multi_way(&base_pair, &lca_pairs, &other_pair, &this_pair, false)
        } else if base_pair == other_pair {
            Winner::This
        } else {
            three_way(&base_pair, &other_pair, &this_pair)
        };
        if winner == Winner::This {
            // no interesting changes introduced by OTHER
            return Ok(FileStatus::Unmodified);
        }
        let trans_id = tt.trans_id_file_id(file_id);
        let params = MergeHookParams {
            file_id: file_id.clone(),
            trans_id,
            this_kind: this_pair.0,
            other_kind: other_pair.0,
            winner,
            base_tree: self.base_tree,
            this_tree: self.this_tree,
            other_tree: self.other_tree,
        };
        let mut hook_status = HookOutcome::NotApplicable;
        for hook in active_hooks.iter_mut() {
            hook_status = hook.merge_contents(&params)?;
            if !matches!(hook_status, HookOutcome::NotApplicable) {
                break;
            }
        }
        if matches!(hook_status, HookOutcome::NotApplicable) {
            hook_status = self.default_merge_contents(tt, &params)?;
        }
        let mut result = FileStatus::Modified;
        match hook_status {
            HookOutcome::NotApplicable => {
                // a contents conflict: nothing available could merge it
                result = FileStatus::Conflicted;
                let name = tt.final_name(trans_id)?;
                let parent_id = tt.final_parent(trans_id)?;
                if self.this_tree.has_id(file_id) {
                    tt.unversion_file(trans_id);
                }
                let file_group =
                    self.dump_conflicts(tt, &name, parent_id, file_id, None, true, false)?;
                self.raw_conflicts
                    .push(MergeRawConflict::Contents { file_group });
            }
            HookOutcome::Success(lines) => {
                tt.create_file(lines, trans_id)?;
            }
            HookOutcome::Conflicted(lines) => {
                tt.create_file(lines, trans_id)?;
                self.raw_conflicts.push(MergeRawConflict::Text { trans_id });
                let name = tt.final_name(trans_id)?;
                let parent_id = tt.final_parent(trans_id)?;
                self.dump_conflicts(tt, &name, parent_id, file_id, None, false, false)?;
            }
            HookOutcome::Delete => {
                tt.unversion_file(trans_id);
                result = FileStatus::Deleted;
            }
            HookOutcome::Done => {}
        }
        if !self.this_tree.has_id(file_id) && result == FileStatus::Modified {
            tt.version_file(file_id, trans_id)?;
        }
        // the merge has been performed, so the old contents should not be
        // retained
        if tt.tree_kind(trans_id).is_some() {
            tt.delete_contents(trans_id)?;
        }
        Ok(result)
    }

    /// Fallback content logic after user-installed hooks.
    fn default_merge_contents(
        &mut self,
        tt: &mut TreeTransform<'_>,
        params: &MergeHookParams<'_>,
    ) -> Result<HookOutcome, MergeError> {
        if params.winner == Winner::Other {
            // OTHER is a straight winner, so replace this content with it
            return self.other_winner_merge(tt, params);
        }
        if params.is_file_merge() {
            // both sides are files, so at least they agree the output
            // should be one
            match self.text_merge(tt, &params.file_id, params.trans_id) {
                Ok(()) => Ok(HookOutcome::Done),
                Err(MergeError::Text(Merge3Error::Binary(_))) => Ok(HookOutcome::NotApplicable),
                Err(e) => Err(e),
            }
        } else {
            Ok(HookOutcome::NotApplicable)
        }
    }

    /// Replace this content with other's.
    fn other_winner_merge(
        &mut self,
        tt: &mut TreeTransform<'_>,
        params: &MergeHookParams<'_>,
    ) -> Result<HookOutcome, MergeError> {
        if self.other_tree.has_id(&params.file_id) {
            create_from_tree(tt, params.trans_id, self.other_tree, &params.file_id, None)?;
            Ok(HookOutcome::Done)
        } else if self.this_tree.has_id(&params.file_id) {
            // OTHER deleted the file
            Ok(HookOutcome::Delete)
        } else {
            Ok(HookOutcome::NotApplicable)
        }
    }

    /// Perform the per-file text merge with the configured strategy.
    fn text_merge(
        &mut self,
        tt: &mut TreeTransform<'_>,
        file_id: &FileId,
        trans_id: TransId,
    ) -> Result<(), MergeError> {
        match self.strategy {
            TextMergeStrategy::Merge3 => self.text_merge_merge3(tt, file_id, trans_id),
            TextMergeStrategy::Weave | TextMergeStrategy::Lca => {
                self.text_merge_plan(tt, file_id, trans_id)
            }
            TextMergeStrategy::Diff3 => self.text_merge_diff3(tt, file_id, trans_id),
        }
    }

    /// Three-way text merge with merge3.  A unique sentinel marks
    /// conflict starts so marker-looking content lines cannot fool the
    /// conflict detection.
    fn text_merge_merge3(
        &mut self,
        tt: &mut TreeTransform<'_>,
        file_id: &FileId,
        trans_id: TransId,
    ) -> Result<(), MergeError> {
        let base_lines = if self.base_tree.has_id(file_id)
            && self.base_tree.kind(file_id) == Some(Kind::File)
        {
            get_lines(self.base_tree, file_id)
        } else {
            // base was a different kind; degrade to a two-way conflict
            Vec::new()
        };
        let this_lines = get_lines(self.this_tree, file_id);
        let other_lines = get_lines(self.other_tree, file_id);
        let m3 = Merge3::new(
            base_lines.clone(),
            this_lines.clone(),
            other_lines.clone(),
            self.cherrypick,
        )?;
        let start_marker = "!START OF MERGE CONFLICT!I HOPE THIS IS UNIQUE";
        let base_marker = if self.show_base { Some("|||||||") } else { None };
        let merged = m3.merge_lines(
            Some(THIS_MARKER),
            Some(OTHER_MARKER),
            Some(BASE_MARKER),
            start_marker,
            "=======",
            ">>>>>>>",
            base_marker,
            self.reprocess,
        )?;
        let mut conflicts = false;
        let marker_bytes = start_marker.as_bytes();
        let lines: Vec<Vec<u8>> = merged
            .into_iter()
            .map(|line| {
                if line.starts_with(marker_bytes) {
                    conflicts = true;
                    let mut replaced = b"<<<<<<<".to_vec();
                    replaced.extend_from_slice(&line[marker_bytes.len()..]);
                    replaced
                } else {
                    line
                }
            })
            .collect();
        tt.create_file(lines, trans_id)?;
        if conflicts {
            self.raw_conflicts.push(MergeRawConflict::Text { trans_id });
            let name = tt.final_name(trans_id)?;
            let parent_id = tt.final_parent(trans_id)?;
            let mut file_group = self.dump_conflicts(
                tt,
                &name,
                parent_id,
                file_id,
                Some((this_lines, base_lines, other_lines)),
                false,
                false,
            )?;
            file_group.push(trans_id);
        }
        Ok(())
    }

    /// History-aware text merge: build a merge plan and replay it.
    fn text_merge_plan(
        &mut self,
        tt: &mut TreeTransform<'_>,
        file_id: &FileId,
        trans_id: TransId,
    ) -> Result<(), MergeError> {
        let plan = self.generate_merge_plan(file_id)?;
        let merger = PlanWeaveMerge::new(
            plan,
            format!("<<<<<<< {}\n", THIS_MARKER).into_bytes(),
            format!(">>>>>>> {}\n", OTHER_MARKER).into_bytes(),
        );
        let (lines, conflicts) = merger.merge_lines(self.reprocess);
        // it is the output that must be text; plan internals do not matter
        check_text_lines(lines.iter().map(|l| l.as_slice()))
            .map_err(|e| MergeError::Text(Merge3Error::Binary(e)))?;
        tt.create_file(lines, trans_id)?;
        if conflicts {
            let base_lines = merger.base_from_plan();
            self.raw_conflicts.push(MergeRawConflict::Text { trans_id });
            let name = tt.final_name(trans_id)?;
            let parent_id = tt.final_parent(trans_id)?;
            let this_lines = get_lines(self.this_tree, file_id);
            let other_lines = get_lines(self.other_tree, file_id);
            let mut file_group = self.dump_conflicts(
                tt,
                &name,
                parent_id,
                file_id,
                Some((this_lines, base_lines, other_lines)),
                false,
                false,
            )?;
            file_group.push(trans_id);
        }
        Ok(())
    }

    /// Build the merge plan for one file from the per-file weave plus
    /// synthesized tips for the working state.
    fn generate_merge_plan(&self, file_id: &FileId) -> Result<Vec<PlanLine>, MergeError> {
        let fallback = self.repository.and_then(|repo| repo.file_weave(file_id));
        let mut texts = PlanTexts::new(fallback);
        let a_rev = texts.get_file_revision(self.this_tree, file_id, "this:")?;
        let b_rev = texts.get_file_revision(self.other_tree, file_id, "other:")?;
        let base_rev = if self.cherrypick {
            Some(texts.get_file_revision(self.base_tree, file_id, "base:")?)
        } else {
            None
        };
        let plan = match self.strategy {
            TextMergeStrategy::Lca => {
                plan_lca_merge(&a_rev, &b_rev, base_rev.as_ref(), &texts, &texts)?
            }
            _ => plan_merge(&a_rev, &b_rev, base_rev.as_ref(), &texts, &texts)?,
        };
        Ok(plan)
    }

    /// Three-way merge using the external diff3 tool.
    fn text_merge_diff3(
        &mut self,
        tt: &mut TreeTransform<'_>,
        file_id: &FileId,
        trans_id: TransId,
    ) -> Result<(), MergeError> {
        let temp_dir = tempfile::Builder::new().prefix("bzr-").tempdir()?;
        let dump = |name: &str, tree: &dyn Tree| -> Result<std::path::PathBuf, MergeError> {
            let path = temp_dir.path().join(name);
            let mut file = std::fs::File::create(&path)?;
            file.write_all(&get_lines(tree, file_id).concat())?;
            Ok(path)
        };
        let this = dump("this", self.this_tree)?;
        let base = dump("base", self.base_tree)?;
        let other = dump("other", self.other_tree)?;
        for path in [&this, &base, &other] {
            if !heddle_osutils::textfile::check_text_path(path)? {
                return Err(MergeError::Text(Merge3Error::Binary(
                    heddle_osutils::textfile::BinaryFile,
                )));
            }
        }
        let output = std::process::Command::new("diff3")
            .arg("-E")
            .arg("--merge")
            .args(["-L", THIS_MARKER, "-L", BASE_MARKER, "-L", OTHER_MARKER])
            .arg(&this)
            .arg(&base)
            .arg(&other)
            .output()
            .map_err(|e| MergeError::Diff3(e.to_string()))?;
        let status = output.status.code().unwrap_or(-1);
        if status != 0 && status != 1 {
            return Err(MergeError::Diff3(format!(
                "unhandled diff3 exit code {}",
                status
            )));
        }
        let lines: Vec<Vec<u8>> = heddle_osutils::split_lines(&output.stdout)
            .map(|l| l.into_owned())
            .collect();
        tt.create_file(lines, trans_id)?;
        if status == 1 {
            let name = tt.final_name(trans_id)?;
            let parent_id = tt.final_parent(trans_id)?;
            self.dump_conflicts(tt, &name, parent_id, file_id, None, false, false)?;
            self.raw_conflicts.push(MergeRawConflict::Text { trans_id });
        }
        Ok(())
    }

    /// Emit `.OTHER`/`.THIS` (and `.BASE`) siblings for a conflicted
    /// file.  With `set_version`, the first emitted sibling carries the
    /// file id.
    #[allow(clippy::too_many_arguments)]
    fn dump_conflicts(
        &mut self,
        tt: &mut TreeTransform<'_>,
        name: &str,
        parent_id: TransId,
        file_id: &FileId,
        lines: Option<(Vec<Vec<u8>>, Vec<Vec<u8>>, Vec<Vec<u8>>)>,
        set_version: bool,
        no_base: bool,
    ) -> Result<Vec<TransId>, MergeError> {
        let (this_lines, base_lines, other_lines) = match lines {
            Some((t, b, o)) => (Some(t), Some(b), Some(o)),
            None => (None, None, None),
        };
        let mut data: Vec<(&str, &dyn Tree, Option<Vec<Vec<u8>>>)> = vec![
            ("OTHER", self.other_tree, other_lines),
            ("THIS", self.this_tree, this_lines),
        ];
        if !no_base {
            data.push(("BASE", self.base_tree, base_lines));
        }
        let mut versioned = false;
        let mut file_group = Vec::new();
        for (suffix, tree, lines) in data {
            if tree.has_id(file_id) {
                let conflict_name = format!("{}.{}", name, suffix);
                let conflict_id = tt.create_path(&conflict_name, parent_id)?;
                create_from_tree(tt, conflict_id, tree, file_id, lines)?;
                file_group.push(conflict_id);
                if set_version && !versioned {
                    tt.version_file(file_id, conflict_id)?;
                    versioned = true;
                }
            }
        }
        Ok(file_group)
    }

    /// Merge the execute bit for one file.
    fn merge_executable(
        &mut self,
        tt: &mut TreeTransform<'_>,
        entry: &MergeEntry,
        file_status: FileStatus,
    ) -> Result<(), MergeError> {
        if file_status == FileStatus::Deleted {
            return Ok(());
        }
        let mut winner = entry.executable.resolve(true);
        if winner == Winner::Conflict {
            // one side lost the file but we still need a value; prefer the
            // side that still has it
            winner = if entry.executable.other.is_none() {
                Winner::This
            } else {
                Winner::Other
            };
        }
        if winner == Winner::This && file_status != FileStatus::Modified {
            return Ok(());
        }
        let trans_id = tt.trans_id_file_id(&entry.file_id);
        if tt.final_kind(trans_id) != Some(Kind::File) {
            return Ok(());
        }
        let executability = match winner {
            Winner::This => entry.executable.this,
            _ => {
                if self.other_tree.has_id(&entry.file_id) {
                    entry.executable.other
                } else if self.this_tree.has_id(&entry.file_id) {
                    entry.executable.this
                } else {
                    entry.executable.base
                }
            }
        };
        if let Some(executability) = executability {
            tt.set_executability(Some(executability), trans_id)?;
        }
        Ok(())
    }

    /// Convert all conflicts into the path-addressed cooked form.
    fn cook_conflicts(
        &mut self,
        fs_conflicts: &[transform::FsConflict],
        tt: &mut TreeTransform<'_>,
    ) -> Result<(), MergeError> {
        let mut cooked = transform::cook_conflicts(fs_conflicts, tt)?;
        let mut fp = FinalPaths::new(tt.root());
        let raw = std::mem::take(&mut self.raw_conflicts);
        for conflict in &raw {
            match conflict {
                MergeRawConflict::Path {
                    file_id,
                    this_parent,
                    this_name,
                    other_parent,
                    other_name,
                    ..
                } => {
                    let mut resolve_side =
                        |parent: &Option<FileId>, name: &Option<String>| -> Result<String, MergeError> {
                            match (parent, name) {
                                (Some(parent), Some(name)) => {
                                    let parent_trans = tt.trans_id_file_id(parent);
                                    let parent_path = fp.get_path(tt, parent_trans)?;
                                    Ok(transform::joinpath(&parent_path, name))
                                }
                                _ => Ok("<deleted>".to_string()),
                            }
                        };
                    let this_path = resolve_side(this_parent, this_name)?;
                    let other_path = resolve_side(other_parent, other_name)?;
                    cooked.push(Conflict::Path {
                        path: this_path,
                        conflict_path: other_path,
                        file_id: Some(file_id.clone()),
                    });
                }
                MergeRawConflict::Contents { file_group } => {
                    let mut chosen: Option<(TransId, Option<FileId>)> = None;
                    for &tid in file_group {
                        if let Some(fid) = tt.final_file_id(tid) {
                            chosen = Some((tid, Some(fid)));
                            break;
                        }
                    }
                    let (tid, file_id) =
                        chosen.unwrap_or_else(|| (file_group[0], None));
                    let mut path = fp.get_path(tt, tid)?;
                    for suffix in [".BASE", ".THIS", ".OTHER"] {
                        if let Some(stripped) = path.strip_suffix(suffix) {
                            path = stripped.to_string();
                            break;
                        }
                    }
                    cooked.push(Conflict::Contents { path, file_id });
                }
                MergeRawConflict::Text { trans_id } => {
                    cooked.push(Conflict::Text {
                        path: fp.get_path(tt, *trans_id)?,
                        file_id: tt.final_file_id(*trans_id),
                    });
                }
            }
        }
        crate::conflicts::sort_conflicts(&mut cooked);
        self.cooked_conflicts = cooked;
        Ok(())
    }
}

/// Per-file texts and ancestry for the merge planners: locally
/// synthesized tip versions layered over the repository's file weave.
struct PlanTexts<'r> {
    fallback: Option<&'r Weave>,
    local_texts: HashMap<RevisionId, Vec<Vec<u8>>>,
    local_parents: HashMap<RevisionId, Vec<RevisionId>>,
}

impl<'r> PlanTexts<'r> {
    fn new(fallback: Option<&'r Weave>) -> Self {
        PlanTexts {
            fallback,
            local_texts: HashMap::new(),
            local_parents: HashMap::new(),
        }
    }

    /// Ensure the tree's version of the file is available for planning
    /// and return its key.
    ///
    /// Working trees get a synthesized reserved key whose parent is the
    /// entry's last-modified revision; revision trees use that revision
    /// directly, with the text pulled in when the weave lacks it.
    fn get_file_revision(
        &mut self,
        tree: &dyn Tree,
        file_id: &FileId,
        tree_revision: &str,
    ) -> Result<RevisionId, MergeError> {
        let entry_revision = tree
            .get_entry(file_id)
            .and_then(|e| e.revision().cloned());
        if tree.get_revision_id().is_none() {
            // a working tree: synthesize a tip for its current text
            let key = RevisionId::from(tree_revision);
            let parents: Vec<RevisionId> = entry_revision
                .into_iter()
                .filter(|rev| self.has_version(rev))
                .collect();
            self.local_texts.insert(key.clone(), get_lines(tree, file_id));
            self.local_parents.insert(key.clone(), parents);
            return Ok(key);
        }
        let revision = match entry_revision.or_else(|| tree.get_revision_id()) {
            Some(rev) => rev,
            None => RevisionId::from(tree_revision),
        };
        if !self.has_version(&revision) {
            self.local_texts
                .insert(revision.clone(), get_lines(tree, file_id));
            self.local_parents.insert(revision.clone(), Vec::new());
        }
        Ok(revision)
    }

    fn has_version(&self, revision: &RevisionId) -> bool {
        self.local_texts.contains_key(revision)
            || self
                .fallback
                .map(|w| w.has_version(revision))
                .unwrap_or(false)
    }
}

impl TextRepository for PlanTexts<'_> {
    fn get_lines(&self, version: &RevisionId) -> Result<Vec<Vec<u8>>, weave::Error> {
        if let Some(lines) = self.local_texts.get(version) {
            return Ok(lines.clone());
        }
        match self.fallback {
            Some(weave) => weave.get_lines(version),
            None => Err(weave::Error::RevisionNotPresent(version.clone())),
        }
    }
}

impl ParentsProvider<RevisionId> for PlanTexts<'_> {
    fn get_parent_map(&self, keys: &HashSet<RevisionId>) -> ParentMap<RevisionId> {
        let mut map = ParentMap::new();
        for key in keys {
            if let Some(parents) = self.local_parents.get(key) {
                map.insert(key.clone(), Parents::Known(parents.clone()));
            } else if let Some(weave) = self.fallback {
                if let Some(parents) = weave.get_parent_map(&[key.clone()]).remove(key) {
                    map.insert(key.clone(), Parents::Known(parents));
                }
            }
        }
        map
    }
}
