//! Tree transforms: staged mutations of a working tree, applied atomically
//! with conflict detection and rollback.
//!
//! A transform assigns a trans-id to every file it touches.  New contents
//! are staged inside a per-transform `limbo` directory and renamed into
//! place during `apply`; contents scheduled for removal are first moved
//! into a `pending-deletion` directory so a failed apply can put
//! everything back.  Either `apply` or `finalize` must run; dropping the
//! transform finalizes it.
//!
//! Transforms give optimum performance when parent directories are created
//! before their contents: children can then be staged directly inside
//! their parent's limbo directory, which keeps the final rename count low.

use crate::conflicts::Conflict;
use crate::progress::Progress;
use crate::tree::{Tree, TreeChange, WorkingTree};
use heddle_annotate::matching_blocks;
use heddle_bazaar::inventory::{self, DeltaEntry, Entry, InventoryDelta};
use heddle_bazaar::{FileId, RevisionId};
use heddle_osutils::file as osfile;
use heddle_osutils::Kind;
use log::warn;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// Transform-local handle for a filesystem node under staged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransId(usize);

/// The synthetic parent of the tree root.
pub const ROOT_PARENT: TransId = TransId(usize::MAX);

impl std::fmt::Display for TransId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if *self == ROOT_PARENT {
            write!(f, "root-parent")
        } else {
            write!(f, "new-{}", self.0)
        }
    }
}

impl TransId {
    fn parse(text: &str) -> Option<TransId> {
        if text == "root-parent" {
            return Some(ROOT_PARENT);
        }
        text.strip_prefix("new-")
            .and_then(|n| n.parse::<usize>().ok())
            .map(TransId)
    }
}

#[derive(Debug)]
pub enum TransformError {
    /// The same trans-id was registered twice for one attribute.
    DuplicateKey(TransId),
    /// A tree-state query was made for a trans-id with no tree path.
    NoSuchFile(Option<String>),
    /// The trans-id has neither a new name nor an existing tree path.
    NoFinalPath(TransId),
    CantMoveRoot,
    /// A previous transform left its limbo directory behind.
    ExistingLimbo(PathBuf),
    ExistingPendingDeletion(PathBuf),
    /// The limbo directory could not be removed during finalize.
    ImmortalLimbo(PathBuf),
    ImmortalPendingDeletion(PathBuf),
    /// `apply` was called with unresolved conflicts.
    MalformedTransform(Vec<RawConflict>),
    /// The transform was already applied.
    ReusingTransform,
    /// Two different trans-ids both claim to be the tree root.
    TwoRoots,
    /// This operation needs a disk-backed transform, not a preview.
    NotWorkingTree,
    UnableCreateSymlink(Option<String>),
    /// A rename target already exists.
    FileExists(PathBuf, String),
    /// The orphan policy refused to relocate an orphan.
    Orphaning(String),
    Serialization(String),
    Inventory(inventory::Error),
    Io(io::Error),
}

impl From<io::Error> for TransformError {
    fn from(e: io::Error) -> Self {
        TransformError::Io(e)
    }
}

impl From<inventory::Error> for TransformError {
    fn from(e: inventory::Error) -> Self {
        TransformError::Inventory(e)
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TransformError::DuplicateKey(id) => write!(f, "key {} is already present", id),
            TransformError::NoSuchFile(path) => write!(f, "no such file: {:?}", path),
            TransformError::NoFinalPath(id) => {
                write!(f, "no final path for {}: file identification broken", id)
            }
            TransformError::CantMoveRoot => write!(f, "moving the root directory is not supported"),
            TransformError::ExistingLimbo(p) => write!(
                f,
                "this tree contains left-over files from a failed operation; \
                 remove {} to continue",
                p.display()
            ),
            TransformError::ExistingPendingDeletion(p) => write!(
                f,
                "this tree contains left-over pending deletions; remove {} to continue",
                p.display()
            ),
            TransformError::ImmortalLimbo(p) => {
                write!(f, "unable to delete transform temporary directory {}", p.display())
            }
            TransformError::ImmortalPendingDeletion(p) => write!(
                f,
                "unable to delete pending deletion directory {}",
                p.display()
            ),
            TransformError::MalformedTransform(conflicts) => {
                write!(f, "tree transform is malformed: {:?}", conflicts)
            }
            TransformError::ReusingTransform => {
                write!(f, "attempt to reuse a transform that has already been applied")
            }
            TransformError::TwoRoots => write!(f, "a tree cannot have two roots"),
            TransformError::NotWorkingTree => {
                write!(f, "this operation requires a writable working tree")
            }
            TransformError::UnableCreateSymlink(path) => {
                write!(f, "unable to create symlink {:?} on this platform", path)
            }
            TransformError::FileExists(path, detail) => {
                write!(f, "file exists: {}: {}", path.display(), detail)
            }
            TransformError::Orphaning(msg) => write!(f, "orphaning refused: {}", msg),
            TransformError::Serialization(msg) => write!(f, "bad transform stream: {}", msg),
            TransformError::Inventory(e) => write!(f, "inventory error: {}", e),
            TransformError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for TransformError {}

/// A violation of inventory or filesystem invariants found by
/// `find_conflicts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawConflict {
    /// Two entries want the same name in the same directory.
    Duplicate {
        trans_id_a: TransId,
        trans_id_b: TransId,
        name: String,
    },
    /// A new entry wants a file id that is still active in the tree.
    DuplicateId {
        existing: TransId,
        new: TransId,
    },
    ParentLoop(TransId),
    /// A versioned child under an unversioned parent.
    UnversionedParent(TransId),
    /// A child whose parent has no contents in the result.
    MissingParent(TransId),
    NonDirectoryParent(TransId),
    /// Versioning requested for a trans-id with no contents.
    VersioningNoContents(TransId),
    VersioningBadKind(TransId, Kind),
    /// Executability on an unversioned entry.
    UnversionedExecutability(TransId),
    /// Executability on a non-file.
    NonFileExecutability(TransId),
    /// New contents would overwrite existing contents not scheduled for
    /// removal.
    Overwrite(TransId, String),
}

/// Conflicts produced (and partially handled) by `conflict_pass`, still in
/// trans-id form.  Cooking turns them into [`Conflict`] values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsConflict {
    DuplicateMoved { existing: TransId, new: TransId },
    DuplicateIdUnversioned { existing: TransId, new: TransId },
    ParentLoopCancelled { cur: TransId, parent: TransId },
    MissingParentCreated(TransId),
    NonDirectoryParentCreated(TransId),
    /// The parent deletion was cancelled instead of orphaning children.
    DeletingParent(TransId),
    UnversionedParentVersioned(TransId),
}

/// What to do with unversioned children of a directory being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Leave a `deleting parent` conflict (the default).
    #[default]
    Conflict,
    /// Move orphans into a `bzr-orphans` directory at the tree root.
    Move,
}

/// The directory orphans are moved into under the `move` policy.
pub const ORPHAN_DIR: &str = "bzr-orphans";

impl OrphanPolicy {
    /// Resolve a policy by its registered name; unknown names warn and
    /// fall back to `conflict`.
    pub fn by_name(name: &str) -> OrphanPolicy {
        match name {
            "conflict" => OrphanPolicy::Conflict,
            "move" => OrphanPolicy::Move,
            other => {
                warn!("unknown orphan policy {:?}, falling back to conflict", other);
                OrphanPolicy::Conflict
            }
        }
    }
}

#[derive(Debug)]
pub struct TransformResults {
    pub modified_paths: Vec<PathBuf>,
    pub rename_count: usize,
}

enum Backing<'a> {
    Disk(&'a WorkingTree),
    Preview(&'a dyn Tree),
}

/// Represent a tree transformation.
///
/// Supports incremental generation of the transform in any order.  It is
/// easy to produce malformed transforms, but they are generally harmless:
/// applying one raises [`TransformError::MalformedTransform`] before any
/// modification is made to the tree, and many kinds can be corrected with
/// [`resolve_conflicts`].
pub struct TreeTransform<'a> {
    backing: Backing<'a>,
    id_number: usize,
    new_name: HashMap<TransId, String>,
    new_parent: HashMap<TransId, TransId>,
    new_contents: HashMap<TransId, Kind>,
    // preview transforms stage file bytes and symlink targets in memory
    new_file_bytes: HashMap<TransId, Vec<u8>>,
    new_symlink_targets: HashMap<TransId, String>,
    limbo_files: HashMap<TransId, PathBuf>,
    limbo_children: HashMap<TransId, HashSet<TransId>>,
    limbo_children_names: HashMap<TransId, HashMap<String, TransId>>,
    needs_rename: HashSet<TransId>,
    removed_contents: HashSet<TransId>,
    new_executability: HashMap<TransId, bool>,
    new_reference_revision: HashMap<TransId, RevisionId>,
    new_id: HashMap<TransId, FileId>,
    non_present_ids: HashMap<FileId, TransId>,
    r_new_id: HashMap<FileId, TransId>,
    removed_id: HashSet<TransId>,
    tree_path_ids: HashMap<String, TransId>,
    tree_id_paths: HashMap<TransId, String>,
    new_root: TransId,
    limbodir: PathBuf,
    deletiondir: PathBuf,
    rename_count: usize,
    orphan_policy: OrphanPolicy,
    done: bool,
    finalized: bool,
}

fn unique_add<K: std::hash::Hash + Eq, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: V,
    id: TransId,
) -> Result<(), TransformError> {
    if map.contains_key(&key) {
        return Err(TransformError::DuplicateKey(id));
    }
    map.insert(key, value);
    Ok(())
}

/// Join tree-relative paths, treating the empty string as the tree root.
pub fn joinpath(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

impl<'a> TreeTransform<'a> {
    /// Start a transform on a working tree.  A tree-write lock is taken
    /// for the lifetime of the transform; `apply` or `finalize` releases
    /// it.
    pub fn new(tree: &'a WorkingTree) -> Result<Self, TransformError> {
        tree.lock_tree_write();
        let limbodir = tree.control_path("limbo");
        if let Err(e) = std::fs::create_dir(&limbodir) {
            let _ = tree.unlock();
            return if e.kind() == io::ErrorKind::AlreadyExists {
                Err(TransformError::ExistingLimbo(limbodir))
            } else {
                Err(e.into())
            };
        }
        let deletiondir = tree.control_path("pending-deletion");
        if let Err(e) = std::fs::create_dir(&deletiondir) {
            let _ = std::fs::remove_dir(&limbodir);
            let _ = tree.unlock();
            return if e.kind() == io::ErrorKind::AlreadyExists {
                Err(TransformError::ExistingPendingDeletion(deletiondir))
            } else {
                Err(e.into())
            };
        }
        let mut transform = TreeTransform::bare(Backing::Disk(tree), limbodir, deletiondir);
        transform.new_root = transform.trans_id_tree_path("");
        Ok(transform)
    }

    /// Start a read-only transform over any tree.  Nothing ever touches
    /// disk; `apply` is refused.
    pub fn new_preview(tree: &'a dyn Tree) -> Self {
        let mut transform = TreeTransform::bare(Backing::Preview(tree), PathBuf::new(), PathBuf::new());
        transform.new_root = transform.trans_id_tree_path("");
        transform
    }

    fn bare(backing: Backing<'a>, limbodir: PathBuf, deletiondir: PathBuf) -> Self {
        TreeTransform {
            backing,
            id_number: 0,
            new_name: HashMap::new(),
            new_parent: HashMap::new(),
            new_contents: HashMap::new(),
            new_file_bytes: HashMap::new(),
            new_symlink_targets: HashMap::new(),
            limbo_files: HashMap::new(),
            limbo_children: HashMap::new(),
            limbo_children_names: HashMap::new(),
            needs_rename: HashSet::new(),
            removed_contents: HashSet::new(),
            new_executability: HashMap::new(),
            new_reference_revision: HashMap::new(),
            new_id: HashMap::new(),
            non_present_ids: HashMap::new(),
            r_new_id: HashMap::new(),
            removed_id: HashSet::new(),
            tree_path_ids: HashMap::new(),
            tree_id_paths: HashMap::new(),
            new_root: ROOT_PARENT,
            limbodir,
            deletiondir,
            rename_count: 0,
            orphan_policy: OrphanPolicy::default(),
            done: false,
            finalized: false,
        }
    }

    fn tree(&self) -> &dyn Tree {
        match &self.backing {
            Backing::Disk(wt) => *wt as &dyn Tree,
            Backing::Preview(t) => *t,
        }
    }

    fn working_tree(&self) -> Result<&'a WorkingTree, TransformError> {
        match &self.backing {
            Backing::Disk(wt) => Ok(wt),
            Backing::Preview(_) => Err(TransformError::NotWorkingTree),
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self.backing, Backing::Preview(_))
    }

    pub fn root(&self) -> TransId {
        self.new_root
    }

    pub fn rename_count(&self) -> usize {
        self.rename_count
    }

    pub fn set_orphan_policy(&mut self, policy: OrphanPolicy) {
        self.orphan_policy = policy;
    }

    pub fn orphan_policy(&self) -> OrphanPolicy {
        self.orphan_policy
    }

    /// Release the lock and clean the staging directories.  Required if
    /// `apply` has not run; harmless afterwards.
    pub fn finalize(&mut self) -> Result<(), TransformError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        if let Backing::Disk(tree) = &self.backing {
            let mut entries: Vec<(PathBuf, Kind)> = self
                .new_contents
                .iter()
                .filter_map(|(t, k)| self.limbo_files.get(t).map(|p| (p.clone(), *k)))
                .collect();
            entries.sort();
            entries.reverse();
            for (path, kind) in entries {
                let result = if kind == Kind::Directory {
                    std::fs::remove_dir(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                if let Err(e) = result {
                    if e.kind() != io::ErrorKind::NotFound {
                        let _ = tree.unlock();
                        return Err(e.into());
                    }
                }
            }
            if std::fs::remove_dir(&self.limbodir).is_err() {
                // we don't especially care *why* it is immortal
                let _ = tree.unlock();
                return Err(TransformError::ImmortalLimbo(self.limbodir.clone()));
            }
            if std::fs::remove_dir(&self.deletiondir).is_err() {
                let _ = tree.unlock();
                return Err(TransformError::ImmortalPendingDeletion(
                    self.deletiondir.clone(),
                ));
            }
            let _ = tree.unlock();
        }
        Ok(())
    }

    fn assign_id(&mut self) -> TransId {
        let id = TransId(self.id_number);
        self.id_number += 1;
        id
    }

    /// Assign a transaction id to a new path.
    pub fn create_path(&mut self, name: &str, parent: TransId) -> Result<TransId, TransformError> {
        let trans_id = self.assign_id();
        unique_add(&mut self.new_name, trans_id, name.to_string(), trans_id)?;
        unique_add(&mut self.new_parent, trans_id, parent, trans_id)?;
        Ok(trans_id)
    }

    /// Change the path assigned to a transaction id.
    pub fn adjust_path(
        &mut self,
        name: &str,
        parent: TransId,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        if trans_id == self.new_root {
            return Err(TransformError::CantMoveRoot);
        }
        let previous_parent = self.new_parent.get(&trans_id).copied();
        let previous_name = self.new_name.get(&trans_id).cloned();
        self.new_name.insert(trans_id, name.to_string());
        self.new_parent.insert(trans_id, parent);
        if self.limbo_files.contains_key(&trans_id) && !self.needs_rename.contains(&trans_id) {
            // we outsmarted ourselves: the limbo placement assumed the old
            // name and parent, so it has to be redone
            self.rename_in_limbo(&[trans_id])?;
            if let Some(prev_parent) = previous_parent {
                if let Some(children) = self.limbo_children.get_mut(&prev_parent) {
                    children.remove(&trans_id);
                }
                if let (Some(prev_name), Some(names)) = (
                    previous_name,
                    self.limbo_children_names.get_mut(&prev_parent),
                ) {
                    names.remove(&prev_name);
                }
            }
        }
        Ok(())
    }

    /// Fix limbo names so the right final path is produced after a path
    /// adjustment invalidated direct placements.
    fn rename_in_limbo(&mut self, trans_ids: &[TransId]) -> Result<(), TransformError> {
        for &trans_id in trans_ids {
            let old_path = match self.limbo_files.remove(&trans_id) {
                Some(p) => p,
                None => continue,
            };
            if !self.new_contents.contains_key(&trans_id) {
                // no content staged; the stale entry is just dropped
                continue;
            }
            let new_path = self.limbo_name(trans_id)?;
            if matches!(self.backing, Backing::Disk(_)) {
                std::fs::rename(&old_path, &new_path)?;
            }
        }
        Ok(())
    }

    /// Determine the transaction id of a working tree file.  Only files
    /// that already exist in the tree have one of these.
    pub fn trans_id_tree_file_id(&mut self, file_id: &FileId) -> Result<TransId, TransformError> {
        let path = self
            .tree()
            .id2path(file_id)
            .ok_or_else(|| TransformError::NoSuchFile(Some(format!("{}", file_id))))?;
        Ok(self.trans_id_tree_path(&path))
    }

    /// Determine or set the transaction id associated with a file id.  A
    /// new id is created only for file ids that were never present;
    /// unversioned transactions are deliberately still returned (this will
    /// likely lead to an unversioned parent conflict).
    pub fn trans_id_file_id(&mut self, file_id: &FileId) -> TransId {
        if let Some(&trans_id) = self.r_new_id.get(file_id) {
            return trans_id;
        }
        if let Some(path) = self.tree().id2path(file_id) {
            return self.trans_id_tree_path(&path);
        }
        if let Some(&trans_id) = self.non_present_ids.get(file_id) {
            return trans_id;
        }
        let trans_id = self.assign_id();
        self.non_present_ids.insert(file_id.clone(), trans_id);
        trans_id
    }

    /// Get the canonical tree-relative path, resolving the parent's real
    /// path and preserving the final component.
    fn canonical_path(&self, path: &str) -> String {
        let cleaned: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        let cleaned = cleaned.join("/");
        if let Backing::Disk(tree) = &self.backing {
            if let Some((dir, base)) = cleaned.rsplit_once('/') {
                let abs_dir = tree.abspath(dir);
                if let (Ok(real_dir), Ok(real_base)) =
                    (abs_dir.canonicalize(), tree.basedir().canonicalize())
                {
                    if let Ok(rel) = real_dir.strip_prefix(&real_base) {
                        let rel = rel.to_string_lossy().replace('\\', "/");
                        return joinpath(&rel, base);
                    }
                }
            }
        }
        cleaned
    }

    /// Determine (and maybe set) the transaction id for a tree path.
    pub fn trans_id_tree_path(&mut self, path: &str) -> TransId {
        let path = self.canonical_path(path);
        if let Some(&trans_id) = self.tree_path_ids.get(&path) {
            return trans_id;
        }
        let trans_id = self.assign_id();
        self.tree_path_ids.insert(path.clone(), trans_id);
        self.tree_id_paths.insert(trans_id, path);
        trans_id
    }

    /// Determine the id of the parent in the tree.
    pub fn get_tree_parent(&mut self, trans_id: TransId) -> Result<TransId, TransformError> {
        let path = self
            .tree_id_paths
            .get(&trans_id)
            .cloned()
            .ok_or(TransformError::NoFinalPath(trans_id))?;
        if path.is_empty() {
            return Ok(ROOT_PARENT);
        }
        let parent = match path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };
        Ok(self.trans_id_tree_path(&parent))
    }

    /// Schedule creation of a new file.
    ///
    /// The content chunks are written to the staged location immediately.
    pub fn create_file(
        &mut self,
        contents: Vec<Vec<u8>>,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        match &self.backing {
            Backing::Disk(_) => {
                let name = self.limbo_name(trans_id)?;
                let bytes: Vec<u8> = contents.concat();
                if let Err(e) = std::fs::write(&name, &bytes) {
                    return Err(e.into());
                }
                if let Err(e) = unique_add(&mut self.new_contents, trans_id, Kind::File, trans_id)
                {
                    // never got registered, so finalize would not clean it
                    let _ = std::fs::remove_file(&name);
                    return Err(e);
                }
            }
            Backing::Preview(_) => {
                unique_add(&mut self.new_contents, trans_id, Kind::File, trans_id)?;
                self.new_file_bytes.insert(trans_id, contents.concat());
            }
        }
        Ok(())
    }

    /// Schedule creation of a new directory.
    pub fn create_directory(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        if matches!(self.backing, Backing::Disk(_)) {
            let name = self.limbo_name(trans_id)?;
            std::fs::create_dir(&name)?;
        }
        unique_add(&mut self.new_contents, trans_id, Kind::Directory, trans_id)
    }

    /// Schedule creation of a new symbolic link.
    pub fn create_symlink(&mut self, target: &str, trans_id: TransId) -> Result<(), TransformError> {
        if !osfile::supports_symlinks() {
            let path = FinalPaths::new(self.root()).get_path(self, trans_id).ok();
            return Err(TransformError::UnableCreateSymlink(path));
        }
        if let Backing::Disk(_) = &self.backing {
            let name = self.limbo_name(trans_id)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &name)?;
        }
        unique_add(&mut self.new_contents, trans_id, Kind::Symlink, trans_id)?;
        self.new_symlink_targets
            .insert(trans_id, target.to_string());
        Ok(())
    }

    /// Schedule creation of a hard link to an existing file.
    pub fn create_hardlink(&mut self, source: &Path, trans_id: TransId) -> Result<(), TransformError> {
        match &self.backing {
            Backing::Disk(_) => {
                let name = self.limbo_name(trans_id)?;
                std::fs::hard_link(source, &name)?;
                unique_add(&mut self.new_contents, trans_id, Kind::File, trans_id)
            }
            Backing::Preview(_) => {
                let bytes = std::fs::read(source)?;
                unique_add(&mut self.new_contents, trans_id, Kind::File, trans_id)?;
                self.new_file_bytes.insert(trans_id, bytes);
                Ok(())
            }
        }
    }

    /// Set the reference revision associated with a nested-tree directory.
    pub fn set_tree_reference(
        &mut self,
        revision_id: RevisionId,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        unique_add(
            &mut self.new_reference_revision,
            trans_id,
            revision_id,
            trans_id,
        )
    }

    /// Cancel the creation of new file contents.
    pub fn cancel_creation(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.new_contents.remove(&trans_id);
        self.new_file_bytes.remove(&trans_id);
        self.new_symlink_targets.remove(&trans_id);
        // a limbo directory with children has to relocate them before the
        // directory itself can go
        if let Some(children) = self.limbo_children.remove(&trans_id) {
            let children: Vec<TransId> = children.into_iter().collect();
            self.rename_in_limbo(&children)?;
            self.limbo_children_names.remove(&trans_id);
        }
        if let Some(path) = self.limbo_files.remove(&trans_id) {
            if matches!(self.backing, Backing::Disk(_)) {
                osfile::delete_any(&path)?;
            }
        }
        Ok(())
    }

    /// Schedule the contents of a path entry for deletion.
    pub fn delete_contents(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        if self.tree_kind(trans_id).is_none() {
            return Err(TransformError::NoSuchFile(
                self.tree_id_paths.get(&trans_id).cloned(),
            ));
        }
        self.removed_contents.insert(trans_id);
        Ok(())
    }

    /// Cancel a scheduled deletion.
    pub fn cancel_deletion(&mut self, trans_id: TransId) -> bool {
        self.removed_contents.remove(&trans_id)
    }

    /// Schedule a path entry to become unversioned.
    pub fn unversion_file(&mut self, trans_id: TransId) {
        self.removed_id.insert(trans_id);
    }

    /// Delete and unversion a versioned file.
    pub fn delete_versioned(&mut self, trans_id: TransId) -> Result<(), TransformError> {
        self.delete_contents(trans_id)?;
        self.unversion_file(trans_id);
        Ok(())
    }

    /// Schedule setting of the execute bit.
    pub fn set_executability(
        &mut self,
        executability: Option<bool>,
        trans_id: TransId,
    ) -> Result<(), TransformError> {
        match executability {
            None => {
                self.new_executability.remove(&trans_id);
                Ok(())
            }
            Some(value) => unique_add(&mut self.new_executability, trans_id, value, trans_id),
        }
    }

    /// Schedule a file to become versioned.
    pub fn version_file(&mut self, file_id: &FileId, trans_id: TransId) -> Result<(), TransformError> {
        unique_add(&mut self.new_id, trans_id, file_id.clone(), trans_id)?;
        unique_add(&mut self.r_new_id, file_id.clone(), trans_id, trans_id)
    }

    /// Undo a previous versioning of a file.
    pub fn cancel_versioning(&mut self, trans_id: TransId) {
        if let Some(file_id) = self.new_id.remove(&trans_id) {
            self.r_new_id.remove(&file_id);
        }
    }

    /// The paths of all new and changed files, sorted shallow-first.
    pub fn new_paths(&mut self) -> Result<Vec<(String, TransId)>, TransformError> {
        let mut ids: HashSet<TransId> = HashSet::new();
        ids.extend(self.new_name.keys());
        ids.extend(self.new_parent.keys());
        ids.extend(self.new_contents.keys());
        ids.extend(self.new_id.keys());
        ids.extend(self.new_executability.keys());
        let mut fp = FinalPaths::new(self.root());
        let mut paths = Vec::with_capacity(ids.len());
        for trans_id in ids {
            paths.push((fp.get_path(self, trans_id)?, trans_id));
        }
        paths.sort();
        Ok(paths)
    }

    /// Determine the file kind in the working tree (`None`: no such file).
    pub fn tree_kind(&self, trans_id: TransId) -> Option<Kind> {
        let path = self.tree_id_paths.get(&trans_id)?;
        match &self.backing {
            Backing::Disk(tree) => osfile::file_kind(tree.abspath(path)).ok(),
            Backing::Preview(tree) => {
                let file_id = tree.path2id(path)?;
                tree.kind(&file_id)
            }
        }
    }

    /// Determine the final file kind, after any changes are applied
    /// (`None`: the file has no contents in the result).
    pub fn final_kind(&self, trans_id: TransId) -> Option<Kind> {
        if let Some(kind) = self.new_contents.get(&trans_id) {
            Some(*kind)
        } else if self.removed_contents.contains(&trans_id) {
            None
        } else {
            self.tree_kind(trans_id)
        }
    }

    /// The file id associated with the trans-id in the current tree.
    pub fn tree_file_id(&self, trans_id: TransId) -> Option<FileId> {
        let path = self.tree_id_paths.get(&trans_id)?;
        if trans_id == self.new_root {
            return self.tree().root_id();
        }
        self.tree().path2id(path)
    }

    /// The file id after all changes are applied; `None` means the file
    /// will not be versioned.
    pub fn final_file_id(&self, trans_id: TransId) -> Option<FileId> {
        if let Some(file_id) = self.new_id.get(&trans_id) {
            return Some(file_id.clone());
        }
        if self.removed_id.contains(&trans_id) {
            return None;
        }
        self.tree_file_id(trans_id)
    }

    /// The inactive file id: the one in the tree or in the non-present
    /// set, ignoring pending versioning.
    pub fn inactive_file_id(&self, trans_id: TransId) -> Option<FileId> {
        if let Some(file_id) = self.tree_file_id(trans_id) {
            return Some(file_id);
        }
        self.non_present_ids
            .iter()
            .find(|(_, &t)| t == trans_id)
            .map(|(file_id, _)| file_id.clone())
    }

    /// The parent trans-id after changes; `ROOT_PARENT` for the root.
    pub fn final_parent(&mut self, trans_id: TransId) -> Result<TransId, TransformError> {
        if let Some(&parent) = self.new_parent.get(&trans_id) {
            return Ok(parent);
        }
        self.get_tree_parent(trans_id)
    }

    /// The final filename, after all changes are applied.
    pub fn final_name(&self, trans_id: TransId) -> Result<String, TransformError> {
        if let Some(name) = self.new_name.get(&trans_id) {
            return Ok(name.clone());
        }
        let path = self
            .tree_id_paths
            .get(&trans_id)
            .ok_or(TransformError::NoFinalPath(trans_id))?;
        Ok(match path.rsplit_once('/') {
            Some((_, base)) => base.to_string(),
            None => path.clone(),
        })
    }

    /// A map of parent to children for all known parents: new paths plus
    /// the parents of bound tree paths.
    pub fn by_parent(&mut self) -> Result<HashMap<TransId, HashSet<TransId>>, TransformError> {
        let mut items: Vec<(TransId, TransId)> = self
            .new_parent
            .iter()
            .map(|(&t, &p)| (t, p))
            .collect();
        let tree_ids: Vec<TransId> = self.tree_id_paths.keys().copied().collect();
        for trans_id in tree_ids {
            let parent = self.final_parent(trans_id)?;
            items.push((trans_id, parent));
        }
        let mut by_parent: HashMap<TransId, HashSet<TransId>> = HashMap::new();
        for (trans_id, parent) in items {
            by_parent.entry(parent).or_default().insert(trans_id);
        }
        Ok(by_parent)
    }

    /// True if the trans-id's path has changed.
    pub fn path_changed(&self, trans_id: TransId) -> bool {
        self.new_name.contains_key(&trans_id) || self.new_parent.contains_key(&trans_id)
    }

    pub fn has_new_contents(&self, trans_id: TransId) -> bool {
        self.new_contents.contains_key(&trans_id)
    }

    /// Generate the limbo name of a file.
    ///
    /// When the parent is itself a pending directory with a known final
    /// name, the child is staged directly inside the parent's limbo
    /// directory so the ultimate rename count stays low.  Direct placement
    /// is refused when the name is already claimed (case-insensitively
    /// when the tree is case-insensitive); the child then lives at the
    /// limbo top level and is marked as needing a rename.
    fn limbo_name(&mut self, trans_id: TransId) -> Result<PathBuf, TransformError> {
        if let Some(name) = self.limbo_files.get(&trans_id) {
            return Ok(name.clone());
        }
        let parent = self.new_parent.get(&trans_id).copied();
        let mut use_direct_path = false;
        if let Some(parent) = parent {
            if self.new_contents.get(&parent) == Some(&Kind::Directory) {
                if let Some(filename) = self.new_name.get(&trans_id) {
                    if !self.limbo_children.contains_key(&parent) {
                        self.limbo_children.insert(parent, HashSet::new());
                        self.limbo_children_names.insert(parent, HashMap::new());
                        use_direct_path = true;
                    } else if self.tree().case_sensitive() {
                        let claimed = self
                            .limbo_children_names
                            .get(&parent)
                            .and_then(|names| names.get(filename));
                        use_direct_path = matches!(claimed, None) || claimed == Some(&trans_id);
                    } else {
                        let lower = filename.to_lowercase();
                        use_direct_path = !self
                            .limbo_children_names
                            .get(&parent)
                            .map(|names| {
                                names.iter().any(|(l_name, &l_id)| {
                                    l_id != trans_id && l_name.to_lowercase() == lower
                                })
                            })
                            .unwrap_or(false);
                    }
                }
            }
        }
        let limbo_name = if use_direct_path {
            let parent = parent.unwrap();
            let filename = self.new_name[&trans_id].clone();
            let name = self.limbo_files[&parent].join(&filename);
            self.limbo_children
                .get_mut(&parent)
                .unwrap()
                .insert(trans_id);
            self.limbo_children_names
                .get_mut(&parent)
                .unwrap()
                .insert(filename, trans_id);
            name
        } else {
            self.needs_rename.insert(trans_id);
            self.limbodir.join(format!("{}", trans_id))
        };
        self.limbo_files.insert(trans_id, limbo_name.clone());
        Ok(limbo_name)
    }

    /// Find any violations of inventory or filesystem invariants.
    pub fn find_conflicts(&mut self) -> Result<Vec<RawConflict>, TransformError> {
        if self.done {
            return Err(TransformError::ReusingTransform);
        }
        // all children of all active parents must be known so name
        // collisions can be seen
        self.add_tree_children()?;
        let by_parent = self.by_parent()?;
        let mut conflicts = Vec::new();
        self.unversioned_parents(&by_parent, &mut conflicts);
        self.parent_loops(&mut conflicts)?;
        self.duplicate_entries(&by_parent, &mut conflicts)?;
        self.duplicate_ids(&mut conflicts);
        self.parent_type_conflicts(&by_parent, &mut conflicts);
        self.improper_versioning(&mut conflicts);
        self.executability_conflicts(&mut conflicts);
        self.overwrite_conflicts(&mut conflicts)?;
        Ok(conflicts)
    }

    /// Add all children of active parents to the known paths.  Active
    /// parents are those which gain children and those which are removed.
    fn add_tree_children(&mut self) -> Result<(), TransformError> {
        let mut parents: Vec<TransId> = self.by_parent()?.keys().copied().collect();
        parents.extend(
            self.removed_contents
                .iter()
                .copied()
                .filter(|&t| self.tree_kind(t) == Some(Kind::Directory))
                .collect::<Vec<_>>(),
        );
        let removed: Vec<TransId> = self.removed_id.iter().copied().collect();
        for trans_id in removed {
            if let Some(file_id) = self.tree_file_id(trans_id) {
                if self.tree().kind(&file_id) == Some(Kind::Directory) {
                    parents.push(trans_id);
                }
            }
        }
        for parent_id in parents {
            self.iter_tree_children(parent_id)?;
        }
        Ok(())
    }

    /// Register (and return) the tree children of a directory, if any.
    pub fn iter_tree_children(
        &mut self,
        parent_id: TransId,
    ) -> Result<Vec<TransId>, TransformError> {
        let path = match self.tree_id_paths.get(&parent_id) {
            Some(p) => p.clone(),
            None => return Ok(Vec::new()),
        };
        let mut children = Vec::new();
        match &self.backing {
            Backing::Disk(tree) => {
                let names = match std::fs::read_dir(tree.abspath(&path)) {
                    Ok(iter) => {
                        let mut names = Vec::new();
                        for entry in iter {
                            names.push(entry?.file_name().to_string_lossy().into_owned());
                        }
                        names
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) if e.kind() == io::ErrorKind::NotADirectory => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                };
                let tree = *tree;
                for name in names {
                    let childpath = joinpath(&path, &name);
                    if tree.is_control_filename(&childpath) {
                        continue;
                    }
                    children.push(self.trans_id_tree_path(&childpath));
                }
            }
            Backing::Preview(tree) => {
                let dir_id = match tree.path2id(&path) {
                    Some(id) => id,
                    None => return Ok(Vec::new()),
                };
                let mut child_paths = Vec::new();
                for file_id in tree.all_file_ids() {
                    if let Some(entry) = tree.get_entry(&file_id) {
                        if entry.parent_id() == Some(&dir_id) {
                            child_paths.push(joinpath(&path, entry.name()));
                        }
                    }
                }
                for childpath in child_paths {
                    children.push(self.trans_id_tree_path(&childpath));
                }
            }
        }
        Ok(children)
    }

    /// True when `parent_id` will have a child named `name`, counting
    /// unbound tree children.
    fn has_named_child(
        &mut self,
        by_parent: &HashMap<TransId, HashSet<TransId>>,
        parent_id: TransId,
        name: &str,
    ) -> Result<bool, TransformError> {
        if let Some(children) = by_parent.get(&parent_id) {
            for &child in children {
                if self.final_name(child).ok().as_deref() == Some(name) {
                    return Ok(true);
                }
            }
        }
        let path = match self.tree_id_paths.get(&parent_id) {
            Some(p) => p.clone(),
            None => return Ok(false),
        };
        let childpath = joinpath(&path, name);
        match self.tree_path_ids.get(&childpath) {
            None => match &self.backing {
                Backing::Disk(tree) => Ok(osfile::lexists(&tree.abspath(&childpath))),
                Backing::Preview(tree) => Ok(tree.path2id(&childpath).is_some()),
            },
            Some(&child_id) => {
                if self.final_parent(child_id)? != parent_id {
                    return Ok(false);
                }
                Ok(!self.removed_contents.contains(&child_id))
            }
        }
    }

    /// No entry may be its own ancestor.
    fn parent_loops(&mut self, conflicts: &mut Vec<RawConflict>) -> Result<(), TransformError> {
        let candidates: Vec<TransId> = self.new_parent.keys().copied().collect();
        for trans_id in candidates {
            let mut seen = HashSet::new();
            let mut parent_id = trans_id;
            while parent_id != ROOT_PARENT {
                seen.insert(parent_id);
                parent_id = match self.final_parent(parent_id) {
                    Ok(p) => p,
                    Err(_) => break,
                };
                if parent_id == trans_id {
                    conflicts.push(RawConflict::ParentLoop(trans_id));
                }
                if seen.contains(&parent_id) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// If parent directories are versioned, children must be versioned.
    fn unversioned_parents(
        &self,
        by_parent: &HashMap<TransId, HashSet<TransId>>,
        conflicts: &mut Vec<RawConflict>,
    ) {
        for (&parent_id, children) in by_parent {
            if parent_id == ROOT_PARENT {
                continue;
            }
            if self.final_file_id(parent_id).is_some() {
                continue;
            }
            if children
                .iter()
                .any(|&child| self.final_file_id(child).is_some())
            {
                conflicts.push(RawConflict::UnversionedParent(parent_id));
            }
        }
    }

    /// Cannot version a file with no contents or of a bad kind.  Existing
    /// entries without contents are okay.
    fn improper_versioning(&self, conflicts: &mut Vec<RawConflict>) {
        for &trans_id in self.new_id.keys() {
            match self.final_kind(trans_id) {
                None => conflicts.push(RawConflict::VersioningNoContents(trans_id)),
                Some(kind) => {
                    if !inventory::versionable_kind(kind) {
                        conflicts.push(RawConflict::VersioningBadKind(trans_id, kind));
                    }
                }
            }
        }
    }

    /// Only versioned files may have their executability set, and only
    /// files can be executable.
    fn executability_conflicts(&self, conflicts: &mut Vec<RawConflict>) {
        for &trans_id in self.new_executability.keys() {
            if self.final_file_id(trans_id).is_none() {
                conflicts.push(RawConflict::UnversionedExecutability(trans_id));
            } else if self.final_kind(trans_id) != Some(Kind::File) {
                conflicts.push(RawConflict::NonFileExecutability(trans_id));
            }
        }
    }

    /// New contents may not land on existing contents not scheduled for
    /// removal.
    fn overwrite_conflicts(&mut self, conflicts: &mut Vec<RawConflict>) -> Result<(), TransformError> {
        let with_contents: Vec<TransId> = self.new_contents.keys().copied().collect();
        for trans_id in with_contents {
            if self.tree_kind(trans_id).is_none() {
                continue;
            }
            if !self.removed_contents.contains(&trans_id) {
                let name = self.final_name(trans_id)?;
                conflicts.push(RawConflict::Overwrite(trans_id, name));
            }
        }
        Ok(())
    }

    /// No directory may have two entries with the same name, case-folded
    /// when the tree is case-insensitive.
    fn duplicate_entries(
        &mut self,
        by_parent: &HashMap<TransId, HashSet<TransId>>,
        conflicts: &mut Vec<RawConflict>,
    ) -> Result<(), TransformError> {
        if self.new_name.is_empty() && self.new_parent.is_empty() {
            return Ok(());
        }
        let case_sensitive = self.tree().case_sensitive();
        for children in by_parent.values() {
            let mut name_ids: Vec<(String, TransId)> = Vec::new();
            for &child in children {
                if let Ok(name) = self.final_name(child) {
                    let key = if case_sensitive {
                        name
                    } else {
                        name.to_lowercase()
                    };
                    name_ids.push((key, child));
                }
            }
            name_ids.sort();
            let mut last: Option<(String, TransId)> = None;
            for (name, trans_id) in name_ids {
                let kind = self.final_kind(trans_id);
                let file_id = self.final_file_id(trans_id);
                if kind.is_none() && file_id.is_none() {
                    continue;
                }
                if let Some((last_name, last_id)) = &last {
                    if *last_name == name {
                        conflicts.push(RawConflict::Duplicate {
                            trans_id_a: *last_id,
                            trans_id_b: trans_id,
                            name: name.clone(),
                        });
                    }
                }
                last = Some((name, trans_id));
            }
        }
        Ok(())
    }

    /// Each file id may be used only once.
    fn duplicate_ids(&mut self, conflicts: &mut Vec<RawConflict>) {
        let removed_tree_ids: HashSet<FileId> = self
            .removed_id
            .iter()
            .filter_map(|&t| self.tree_file_id(t))
            .collect();
        let new_ids: Vec<(TransId, FileId)> = self
            .new_id
            .iter()
            .map(|(&t, f)| (t, f.clone()))
            .collect();
        for (trans_id, file_id) in new_ids {
            if removed_tree_ids.contains(&file_id) {
                continue;
            }
            if self.tree().has_id(&file_id) {
                if let Ok(old_trans_id) = self.trans_id_tree_file_id(&file_id) {
                    conflicts.push(RawConflict::DuplicateId {
                        existing: old_trans_id,
                        new: trans_id,
                    });
                }
            }
        }
    }

    /// Parents of entries with contents must be directories.
    fn parent_type_conflicts(
        &self,
        by_parent: &HashMap<TransId, HashSet<TransId>>,
        conflicts: &mut Vec<RawConflict>,
    ) {
        for (&parent_id, children) in by_parent {
            if parent_id == ROOT_PARENT {
                continue;
            }
            let any_contents = children
                .iter()
                .any(|&child| self.final_kind(child).is_some());
            if !any_contents {
                continue;
            }
            match self.final_kind(parent_id) {
                None => conflicts.push(RawConflict::MissingParent(parent_id)),
                Some(Kind::Directory) => {}
                Some(_) => conflicts.push(RawConflict::NonDirectoryParent(parent_id)),
            }
        }
    }

    /// Reinterpret requests to change the root directory.
    ///
    /// Instead of creating or moving a second root, the attributes and
    /// children of the would-be root are applied to the existing root
    /// directory.
    pub fn fixup_new_roots(&mut self) -> Result<(), TransformError> {
        let new_roots: Vec<TransId> = self
            .new_parent
            .iter()
            .filter(|(_, &parent)| parent == ROOT_PARENT)
            .map(|(&t, _)| t)
            .collect();
        if new_roots.is_empty() {
            return Ok(());
        }
        if new_roots.len() > 1 {
            return Err(TransformError::TwoRoots);
        }
        let old_new_root = new_roots[0];
        if old_new_root == self.new_root {
            return Ok(());
        }
        // decide which file id ends up on the root
        let file_id = if self.final_kind(self.new_root).is_none() {
            self.final_file_id(old_new_root)
        } else {
            self.final_file_id(self.new_root)
        };
        if self.new_id.contains_key(&old_new_root) {
            self.cancel_versioning(old_new_root);
        } else {
            self.unversion_file(old_new_root);
        }
        // if root still carries an old file id, clear it out first
        if self.tree_file_id(self.new_root).is_some() && !self.removed_id.contains(&self.new_root)
        {
            self.unversion_file(self.new_root);
        }
        if let Some(file_id) = file_id {
            if self.new_id.values().all(|f| f != &file_id) {
                self.version_file(&file_id, self.new_root)?;
            }
        }

        // move the children of the would-be root into the real root
        self.iter_tree_children(old_new_root)?;
        let children = self
            .by_parent()?
            .get(&old_new_root)
            .cloned()
            .unwrap_or_default();
        for child in children {
            let name = self.final_name(child)?;
            self.adjust_path(&name, self.new_root, child)?;
        }
        if self.new_contents.contains_key(&old_new_root) {
            self.cancel_creation(old_new_root)?;
        }
        self.new_name.remove(&old_new_root);
        self.new_parent.remove(&old_new_root);
        Ok(())
    }

    /// Apply all changes to the inventory and the filesystem.
    ///
    /// Removals run deepest-first, then insertions shallowest-first; a
    /// failure rolls every completed rename back before returning.  On
    /// success the transform is finalized.
    pub fn apply(
        &mut self,
        no_conflicts: bool,
        progress: &dyn Progress,
    ) -> Result<TransformResults, TransformError> {
        let tree = self.working_tree()?;
        if self.done {
            return Err(TransformError::ReusingTransform);
        }
        if !no_conflicts {
            let conflicts = self.find_conflicts()?;
            if !conflicts.is_empty() {
                return Err(TransformError::MalformedTransform(conflicts));
            }
        }
        let mut inventory_delta: InventoryDelta = Vec::new();
        let mut mover = FileMover::new();
        progress.update("Apply phase", 0, 2);
        if let Err(e) = self.apply_removals(&mut inventory_delta, &mut mover) {
            mover.rollback()?;
            return Err(e);
        }
        progress.update("Apply phase", 1, 2);
        let modified_paths = match self.apply_insertions(&mut inventory_delta, &mut mover) {
            Ok(paths) => paths,
            Err(e) => {
                mover.rollback()?;
                return Err(e);
            }
        };
        mover.apply_deletions()?;
        tree.apply_inventory_delta(inventory_delta)?;
        self.done = true;
        self.finalize()?;
        Ok(TransformResults {
            modified_paths,
            rename_count: self.rename_count,
        })
    }

    /// Perform tree operations that remove directory and inventory names:
    /// delete files to be deleted and put renamed files into limbo, in
    /// strict child-to-parent order.
    fn apply_removals(
        &mut self,
        inventory_delta: &mut InventoryDelta,
        mover: &mut FileMover,
    ) -> Result<(), TransformError> {
        let tree = self.working_tree()?;
        let mut tree_paths: Vec<(String, TransId)> = self
            .tree_path_ids
            .iter()
            .map(|(p, &t)| (p.clone(), t))
            .collect();
        tree_paths.sort();
        tree_paths.reverse();
        for (path, trans_id) in tree_paths {
            let full_path = tree.abspath(&path);
            if self.removed_contents.contains(&trans_id) {
                mover.pre_delete(&full_path, &self.deletiondir.join(format!("{}", trans_id)))?;
            } else if self.new_name.contains_key(&trans_id)
                || self.new_parent.contains_key(&trans_id)
            {
                let limbo_name = self.limbo_name(trans_id)?;
                match mover.rename(&full_path, &limbo_name) {
                    Ok(()) => self.rename_count += 1,
                    // a dangling entry never present on disk is skipped
                    Err(TransformError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
            if self.removed_id.contains(&trans_id) {
                let file_id = if trans_id == self.new_root {
                    self.tree().root_id()
                } else {
                    self.tree_file_id(trans_id)
                };
                if let Some(file_id) = file_id {
                    inventory_delta.push(DeltaEntry {
                        old_path: Some(path.clone()),
                        new_path: None,
                        file_id,
                        entry: None,
                    });
                }
            }
        }
        Ok(())
    }

    /// Perform tree operations that insert directory and inventory names:
    /// create files and restore renamed files from limbo, in strict
    /// parent-to-child order.
    fn apply_insertions(
        &mut self,
        inventory_delta: &mut InventoryDelta,
        mover: &mut FileMover,
    ) -> Result<Vec<PathBuf>, TransformError> {
        let tree = self.working_tree()?;
        let new_paths = self.new_paths()?;
        let mut modified_paths = Vec::new();
        let mut completed_new = Vec::new();
        for (path, trans_id) in new_paths {
            let mut new_entry: Option<Entry> = None;
            let kind = self.new_contents.get(&trans_id).copied();
            if kind.is_some() || self.path_changed(trans_id) {
                let full_path = tree.abspath(&path);
                if self.needs_rename.contains(&trans_id) {
                    let limbo_name = self.limbo_name(trans_id)?;
                    match mover.rename(&limbo_name, &full_path) {
                        Ok(()) => self.rename_count += 1,
                        // we may be renaming a dangling inventory id
                        Err(TransformError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                if kind.is_some() {
                    modified_paths.push(full_path);
                    completed_new.push(trans_id);
                }
            }
            if let Some(file_id) = self.new_id.get(&trans_id).cloned() {
                let kind = match kind {
                    Some(kind) => kind,
                    None => osfile::file_kind(tree.abspath(&path))?,
                };
                let parent = self.final_parent(trans_id)?;
                let parent_id = if parent == ROOT_PARENT {
                    None
                } else {
                    self.final_file_id(parent)
                };
                let name = self.final_name(trans_id)?;
                let mut entry = if let Some(reference) = self.new_reference_revision.get(&trans_id)
                {
                    let mut e = Entry::tree_reference(file_id.clone(), name, parent_id);
                    if let Entry::TreeReference {
                        reference_revision, ..
                    } = &mut e
                    {
                        *reference_revision = Some(reference.clone());
                    }
                    e
                } else {
                    Entry::make_entry(kind, name, parent_id, file_id.clone())
                };
                if kind == Kind::Symlink {
                    if let (Entry::Link { symlink_target, .. }, Some(target)) =
                        (&mut entry, self.new_symlink_targets.get(&trans_id))
                    {
                        *symlink_target = Some(target.clone());
                    }
                }
                new_entry = Some(entry);
            } else if self.path_changed(trans_id) || self.new_executability.contains_key(&trans_id)
            {
                if let Some(file_id) = self.final_file_id(trans_id) {
                    if let Some(mut entry) = tree.get_entry(&file_id) {
                        if self.path_changed(trans_id) {
                            entry.set_name(self.final_name(trans_id)?);
                            let parent = self.final_parent(trans_id)?;
                            let parent_id = if parent == ROOT_PARENT {
                                None
                            } else {
                                self.final_file_id(parent)
                            };
                            entry.set_parent_id(parent_id);
                        }
                        new_entry = Some(entry);
                    }
                }
            }

            if let Some(&executability) = self.new_executability.get(&trans_id) {
                if let Some(entry) = new_entry.as_mut() {
                    entry.set_executable(executability);
                }
                if osfile::supports_executable() {
                    osfile::set_executability(tree.abspath(&path), executability)?;
                }
            }
            if let Some(entry) = new_entry {
                let old_path = tree.id2path(entry.file_id());
                inventory_delta.push(DeltaEntry {
                    old_path,
                    new_path: Some(path.clone()),
                    file_id: entry.file_id().clone(),
                    entry: Some(entry),
                });
            }
        }
        for trans_id in completed_new {
            self.new_contents.remove(&trans_id);
        }
        Ok(modified_paths)
    }

    // -- convenience constructors --

    fn new_entry(
        &mut self,
        name: &str,
        parent_id: TransId,
        file_id: Option<&FileId>,
    ) -> Result<TransId, TransformError> {
        let trans_id = self.create_path(name, parent_id)?;
        if let Some(file_id) = file_id {
            self.version_file(file_id, trans_id)?;
        }
        Ok(trans_id)
    }

    /// Convenience method to create files.
    pub fn new_file(
        &mut self,
        name: &str,
        parent_id: TransId,
        contents: Vec<Vec<u8>>,
        file_id: Option<&FileId>,
        executable: Option<bool>,
    ) -> Result<TransId, TransformError> {
        let trans_id = self.new_entry(name, parent_id, file_id)?;
        self.create_file(contents, trans_id)?;
        if let Some(executable) = executable {
            self.set_executability(Some(executable), trans_id)?;
        }
        Ok(trans_id)
    }

    /// Convenience method to create directories.
    pub fn new_directory(
        &mut self,
        name: &str,
        parent_id: TransId,
        file_id: Option<&FileId>,
    ) -> Result<TransId, TransformError> {
        let trans_id = self.new_entry(name, parent_id, file_id)?;
        self.create_directory(trans_id)?;
        Ok(trans_id)
    }

    /// Convenience method to create symbolic links.
    pub fn new_symlink(
        &mut self,
        name: &str,
        parent_id: TransId,
        target: &str,
        file_id: Option<&FileId>,
    ) -> Result<TransId, TransformError> {
        let trans_id = self.new_entry(name, parent_id, file_id)?;
        self.create_symlink(target, trans_id)?;
        Ok(trans_id)
    }

    /// Handle an orphaned child according to the active policy.
    pub fn new_orphan(&mut self, orphan_id: TransId, parent_id: TransId) -> Result<(), TransformError> {
        match self.orphan_policy {
            OrphanPolicy::Conflict => Err(TransformError::Orphaning(
                "deletion policy keeps orphans in place".to_string(),
            )),
            OrphanPolicy::Move => self.move_orphan(orphan_id, parent_id),
        }
    }

    /// Move an orphan into the `bzr-orphans` directory with a backup-style
    /// suffix.
    fn move_orphan(&mut self, orphan_id: TransId, _parent_id: TransId) -> Result<(), TransformError> {
        let orphan_dir_id = self.trans_id_tree_path(ORPHAN_DIR);
        if self.final_kind(orphan_dir_id).is_none() {
            self.create_directory(orphan_dir_id)?;
            warn!("{} is not versioned; created to hold orphans", ORPHAN_DIR);
        }
        let by_parent = self.by_parent()?;
        let actual_name = self.final_name(orphan_id)?;
        let new_name = self.get_backup_name(&actual_name, &by_parent, orphan_dir_id)?;
        self.adjust_path(&new_name, orphan_dir_id, orphan_id)?;
        warn!("{} has been orphaned in {}", actual_name, ORPHAN_DIR);
        Ok(())
    }

    /// Produce a backup-style name that appears to be available.
    fn get_backup_name(
        &mut self,
        name: &str,
        by_parent: &HashMap<TransId, HashSet<TransId>>,
        parent_trans_id: TransId,
    ) -> Result<String, TransformError> {
        let mut counter = 1;
        loop {
            let candidate = format!("{}.~{}~", name, counter);
            if !self.has_named_child(by_parent, parent_trans_id, &candidate)? {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    /// Children of a directory being deleted that would be orphaned, or
    /// `None` when any child is versioned (orphaning is then not allowed).
    fn potential_orphans(&mut self, dir_id: TransId) -> Result<Option<Vec<TransId>>, TransformError> {
        let children = match self.by_parent()?.get(&dir_id) {
            Some(children) => children.clone(),
            None => return Ok(Some(Vec::new())),
        };
        let mut orphans = Vec::new();
        for child in children {
            if self.removed_contents.contains(&child) {
                // the child is going away anyway
                continue;
            }
            if self.final_file_id(child).is_some() {
                return Ok(None);
            }
            orphans.push(child);
        }
        Ok(Some(orphans))
    }

    /// The changes between the tree state and the transform's result, in
    /// the same shape as tree-to-tree changes.  Only files versioned in
    /// the FROM or TO state are reflected.
    pub fn iter_changes(&mut self) -> Result<Vec<TreeChange>, TransformError> {
        let mut from_trans_ids: HashMap<FileId, TransId> = HashMap::new();
        let mut to_trans_ids: HashMap<FileId, TransId> = HashMap::new();
        let mut affected: HashSet<TransId> = HashSet::new();
        affected.extend(self.removed_id.iter());
        affected.extend(self.new_id.keys());
        affected.extend(self.removed_contents.iter());
        affected.extend(self.new_contents.keys());
        affected.extend(self.new_executability.keys());
        affected.extend(self.new_name.keys());
        affected.extend(self.new_parent.keys());
        for &trans_id in &affected {
            if let Some(file_id) = self.tree_file_id(trans_id) {
                from_trans_ids.insert(file_id, trans_id);
            }
            if let Some(file_id) = self.final_file_id(trans_id) {
                to_trans_ids.insert(file_id, trans_id);
            }
        }
        let mut final_paths = FinalPaths::new(self.root());
        let mut results = Vec::new();
        let mut file_ids: HashSet<FileId> = from_trans_ids.keys().cloned().collect();
        file_ids.extend(to_trans_ids.keys().cloned());
        for file_id in file_ids {
            let from_trans_id = from_trans_ids.get(&file_id).copied();
            let to_trans_id = to_trans_ids.get(&file_id).copied();
            let from_versioned = from_trans_id.is_some();
            let to_versioned = to_trans_id.is_some();
            let probe_from = from_trans_id.or(to_trans_id).unwrap();
            let probe_to = to_trans_id.or(from_trans_id).unwrap();

            let (from_name, from_parent, from_kind, from_executable, from_path) =
                self.from_file_data(probe_from, from_versioned, &file_id);
            let to_name = self.final_name(probe_to).ok();
            let to_kind = self.final_kind(probe_to);
            let to_parent = {
                let parent = self.final_parent(probe_to)?;
                if parent == ROOT_PARENT {
                    None
                } else {
                    self.final_file_id(parent)
                }
            };
            let to_executable = if let Some(&e) = self.new_executability.get(&probe_to) {
                e
            } else if probe_to == probe_from {
                from_executable
            } else {
                false
            };
            let to_path = if to_versioned {
                Some(final_paths.get_path(self, probe_to)?)
            } else {
                None
            };
            let from_path = if from_versioned { from_path } else { None };

            let mut modified = from_kind != to_kind;
            if !modified
                && matches!(to_kind, Some(Kind::File) | Some(Kind::Symlink))
                && (probe_to != probe_from || self.new_contents.contains_key(&probe_to))
            {
                modified = true;
            }
            if !modified
                && from_versioned == to_versioned
                && from_parent == to_parent
                && from_name == to_name
                && from_executable == to_executable
            {
                continue;
            }
            results.push(TreeChange {
                file_id,
                paths: (from_path, to_path),
                changed_content: modified,
                versioned: (from_versioned, to_versioned),
                parent_id: (from_parent, to_parent),
                name: (from_name, to_name),
                kind: (from_kind, to_kind),
                executable: (from_executable, to_executable),
            });
        }
        results.sort_by(|a, b| {
            let key = |c: &TreeChange| c.paths.1.clone().or_else(|| c.paths.0.clone());
            key(a).cmp(&key(b))
        });
        Ok(results)
    }

    fn from_file_data(
        &self,
        trans_id: TransId,
        from_versioned: bool,
        file_id: &FileId,
    ) -> (
        Option<String>,
        Option<FileId>,
        Option<Kind>,
        bool,
        Option<String>,
    ) {
        let from_path = self.tree_id_paths.get(&trans_id).cloned();
        let (from_name, from_parent) = if from_versioned {
            match self.tree().get_entry(file_id) {
                Some(entry) => (
                    Some(entry.name().to_string()),
                    entry.parent_id().cloned(),
                ),
                None => (None, None),
            }
        } else {
            match &from_path {
                None => (None, None),
                Some(path) => {
                    let name = path
                        .rsplit_once('/')
                        .map(|(_, b)| b.to_string())
                        .unwrap_or_else(|| path.clone());
                    (Some(name), None)
                }
            }
        };
        let from_kind = self.tree_kind(trans_id);
        let from_executable = match &from_path {
            Some(path) => match &self.backing {
                Backing::Disk(tree) => {
                    osfile::is_executable(tree.abspath(path)).unwrap_or(false)
                }
                Backing::Preview(tree) => tree
                    .path2id(path)
                    .map(|id| tree.is_executable(&id))
                    .unwrap_or(false),
            },
            None => false,
        };
        (from_name, from_parent, from_kind, from_executable, from_path)
    }

    /// The staged content of a created file, wherever it lives.
    pub fn staged_file_bytes(&self, trans_id: TransId) -> Result<Vec<u8>, TransformError> {
        if let Some(bytes) = self.new_file_bytes.get(&trans_id) {
            return Ok(bytes.clone());
        }
        if let Some(path) = self.limbo_files.get(&trans_id) {
            return Ok(std::fs::read(path)?);
        }
        Err(TransformError::NoSuchFile(None))
    }

    pub fn symlink_target(&self, trans_id: TransId) -> Option<String> {
        self.new_symlink_targets.get(&trans_id).cloned()
    }

    /// A read-only tree presenting the transform's result.
    pub fn get_preview_tree(&mut self) -> Result<crate::transform::PreviewTree<'a>, TransformError> {
        PreviewTree::build(self)
    }
}

impl Drop for TreeTransform<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize();
        }
    }
}

/// Make final path calculation cheap by memoizing; the transform must not
/// be mutated between calls.
pub struct FinalPaths {
    known_paths: HashMap<TransId, String>,
    root: TransId,
}

impl FinalPaths {
    pub fn new(root: TransId) -> Self {
        FinalPaths {
            known_paths: HashMap::new(),
            root,
        }
    }

    pub fn get_path(
        &mut self,
        transform: &mut TreeTransform<'_>,
        trans_id: TransId,
    ) -> Result<String, TransformError> {
        if let Some(path) = self.known_paths.get(&trans_id) {
            return Ok(path.clone());
        }
        let path = if trans_id == self.root {
            String::new()
        } else {
            let name = transform.final_name(trans_id)?;
            let parent_id = transform.final_parent(trans_id)?;
            if parent_id == self.root {
                name
            } else {
                joinpath(&self.get_path(transform, parent_id)?, &name)
            }
        };
        self.known_paths.insert(trans_id, path.clone());
        Ok(path)
    }
}

/// Moves and deletes files for a transform, tracking every operation so
/// they can be reversed.
pub struct FileMover {
    past_renames: Vec<(PathBuf, PathBuf)>,
    pending_deletions: Vec<PathBuf>,
    dead: bool,
}

impl FileMover {
    pub fn new() -> Self {
        FileMover {
            past_renames: Vec::new(),
            pending_deletions: Vec::new(),
            dead: false,
        }
    }

    /// Rename a file, recording the move for rollback.
    pub fn rename(&mut self, from: &Path, to: &Path) -> Result<(), TransformError> {
        assert!(!self.dead, "FileMover reused after rollback");
        if osfile::lexists(to) {
            return Err(TransformError::FileExists(
                to.to_path_buf(),
                "rename target exists".to_string(),
            ));
        }
        std::fs::rename(from, to).map_err(TransformError::Io)?;
        self.past_renames.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    /// Rename a file out of the way and mark it for deletion.  Works
    /// equally well for files and directories, unlike a bare unlink.
    pub fn pre_delete(&mut self, from: &Path, to: &Path) -> Result<(), TransformError> {
        self.rename(from, to)?;
        self.pending_deletions.push(to.to_path_buf());
        Ok(())
    }

    /// Reverse all renames performed so far, most recent first.  The
    /// mover is dead afterwards.
    pub fn rollback(&mut self) -> Result<(), TransformError> {
        for (from, to) in self.past_renames.drain(..).rev() {
            std::fs::rename(&to, &from)?;
        }
        self.pending_deletions.clear();
        self.dead = true;
        Ok(())
    }

    /// Apply all marked deletions.  The mover is dead afterwards.
    pub fn apply_deletions(&mut self) -> Result<(), TransformError> {
        for path in self.pending_deletions.drain(..) {
            delete_recursively(&path)?;
        }
        self.past_renames.clear();
        self.dead = true;
        Ok(())
    }
}

impl Default for FileMover {
    fn default() -> Self {
        Self::new()
    }
}

fn delete_recursively(path: &Path) -> io::Result<()> {
    let md = std::fs::symlink_metadata(path)?;
    if md.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Create new file contents from an inventory entry in another tree.
pub fn create_from_tree(
    tt: &mut TreeTransform<'_>,
    trans_id: TransId,
    tree: &dyn Tree,
    file_id: &FileId,
    chunks: Option<Vec<Vec<u8>>>,
) -> Result<(), TransformError> {
    match tree.kind(file_id) {
        Some(Kind::File) => {
            let chunks = match chunks {
                Some(chunks) => chunks,
                None => vec![tree.get_file_text(file_id)?],
            };
            tt.create_file(chunks, trans_id)
        }
        Some(Kind::Directory) => tt.create_directory(trans_id),
        Some(Kind::Symlink) => {
            let target = tree.get_symlink_target(file_id).unwrap_or_default();
            tt.create_symlink(&target, trans_id)
        }
        Some(Kind::TreeReference) => {
            tt.create_directory(trans_id)?;
            if let Some(Entry::TreeReference {
                reference_revision: Some(rev),
                ..
            }) = tree.get_entry(file_id)
            {
                tt.set_tree_reference(rev, trans_id)?;
            }
            Ok(())
        }
        None => Err(TransformError::NoSuchFile(Some(format!("{}", file_id)))),
    }
}

/// Make repeated conflict-resolution attempts; die if they keep failing.
pub fn resolve_conflicts(
    tt: &mut TreeTransform<'_>,
    path_tree: Option<&dyn Tree>,
) -> Result<Vec<FsConflict>, TransformError> {
    let mut new_conflicts: Vec<FsConflict> = Vec::new();
    for _pass in 0..10 {
        let conflicts = tt.find_conflicts()?;
        if conflicts.is_empty() {
            return Ok(new_conflicts);
        }
        for resolved in conflict_pass(tt, &conflicts, path_tree)? {
            if !new_conflicts.contains(&resolved) {
                new_conflicts.push(resolved);
            }
        }
    }
    let conflicts = tt.find_conflicts()?;
    Err(TransformError::MalformedTransform(conflicts))
}

/// Resolve some classes of conflicts.
pub fn conflict_pass(
    tt: &mut TreeTransform<'_>,
    conflicts: &[RawConflict],
    path_tree: Option<&dyn Tree>,
) -> Result<Vec<FsConflict>, TransformError> {
    let mut new_conflicts = Vec::new();
    for conflict in conflicts {
        match conflict {
            RawConflict::DuplicateId { existing, new } => {
                tt.unversion_file(*existing);
                new_conflicts.push(FsConflict::DuplicateIdUnversioned {
                    existing: *existing,
                    new: *new,
                });
            }
            RawConflict::Duplicate {
                trans_id_a,
                trans_id_b,
                ..
            } => {
                // files that were renamed take precedence
                let (existing, new) = if tt.path_changed(*trans_id_a) {
                    (*trans_id_b, *trans_id_a)
                } else {
                    (*trans_id_a, *trans_id_b)
                };
                let final_parent = tt.final_parent(existing)?;
                let new_name = format!("{}.moved", tt.final_name(existing)?);
                tt.adjust_path(&new_name, final_parent, existing)?;
                new_conflicts.push(FsConflict::DuplicateMoved { existing, new });
            }
            RawConflict::ParentLoop(trans_id) => {
                // break the loop by undoing one of the ops that caused it
                let mut cur = *trans_id;
                while !tt.path_changed(cur) {
                    cur = tt.final_parent(cur)?;
                }
                let parent = tt.final_parent(cur)?;
                new_conflicts.push(FsConflict::ParentLoopCancelled { cur, parent });
                let name = tt.final_name(cur)?;
                let tree_parent = tt.get_tree_parent(cur)?;
                tt.adjust_path(&name, tree_parent, cur)?;
            }
            RawConflict::MissingParent(trans_id) => {
                if tt.removed_contents.contains(trans_id) {
                    let mut cancel_deletion = true;
                    if let Some(orphans) = tt.potential_orphans(*trans_id)? {
                        cancel_deletion = false;
                        for orphan in orphans {
                            if tt.new_orphan(orphan, *trans_id).is_err() {
                                cancel_deletion = true;
                                break;
                            }
                        }
                    }
                    if cancel_deletion {
                        // the parent cannot go away after all
                        tt.cancel_deletion(*trans_id);
                        new_conflicts.push(FsConflict::DeletingParent(*trans_id));
                    }
                } else {
                    tt.create_directory(*trans_id)?;
                    new_conflicts.push(FsConflict::MissingParentCreated(*trans_id));
                    if tt.final_name(*trans_id).is_err() {
                        if let Some(path_tree) = path_tree {
                            if let Some(file_id) = tt.final_file_id(*trans_id) {
                                if let Some(entry) = path_tree.get_entry(&file_id) {
                                    if let Some(parent_fid) = entry.parent_id() {
                                        let parent_fid = parent_fid.clone();
                                        let name = entry.name().to_string();
                                        let parent_trans =
                                            tt.trans_id_file_id(&parent_fid);
                                        tt.adjust_path(&name, parent_trans, *trans_id)?;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            RawConflict::UnversionedParent(trans_id) => {
                if let Some(file_id) = tt.inactive_file_id(*trans_id) {
                    tt.version_file(&file_id, *trans_id)?;
                    new_conflicts.push(FsConflict::UnversionedParentVersioned(*trans_id));
                }
            }
            RawConflict::NonDirectoryParent(trans_id) => {
                let parent_parent = tt.final_parent(*trans_id)?;
                let parent_name = tt.final_name(*trans_id)?;
                let parent_file_id = tt.final_file_id(*trans_id);
                if parent_file_id.is_some() {
                    tt.unversion_file(*trans_id);
                }
                let new_parent_id = tt.new_directory(
                    &format!("{}.new", parent_name),
                    parent_parent,
                    parent_file_id.as_ref(),
                )?;
                let children = tt
                    .by_parent()?
                    .get(trans_id)
                    .cloned()
                    .unwrap_or_default();
                for child in children {
                    if child == new_parent_id {
                        continue;
                    }
                    let name = tt.final_name(child)?;
                    tt.adjust_path(&name, new_parent_id, child)?;
                }
                new_conflicts.push(FsConflict::NonDirectoryParentCreated(new_parent_id));
            }
            RawConflict::VersioningNoContents(trans_id) => {
                tt.cancel_versioning(*trans_id);
            }
            // the remaining kinds have no automatic resolution
            _ => {}
        }
    }
    Ok(new_conflicts)
}

/// Convert trans-id conflicts into path-addressed cooked conflicts,
/// sorted by path.
pub fn cook_conflicts(
    fs_conflicts: &[FsConflict],
    tt: &mut TreeTransform<'_>,
) -> Result<Vec<Conflict>, TransformError> {
    let mut fp = FinalPaths::new(tt.root());
    let mut cooked = Vec::new();
    for conflict in fs_conflicts {
        let c = match conflict {
            FsConflict::DuplicateMoved { existing, new } => Conflict::Duplicate {
                action: "Moved existing file to",
                path: fp.get_path(tt, *existing)?,
                conflict_path: fp.get_path(tt, *new)?,
                file_id: tt.final_file_id(*existing),
            },
            FsConflict::DuplicateIdUnversioned { existing, new } => Conflict::DuplicateId {
                action: "Unversioned existing file",
                path: fp.get_path(tt, *existing)?,
                conflict_path: fp.get_path(tt, *new)?,
                file_id: tt.final_file_id(*new),
            },
            FsConflict::ParentLoopCancelled { cur, parent } => Conflict::ParentLoop {
                action: "Cancelled move",
                path: fp.get_path(tt, *cur)?,
                conflict_path: fp.get_path(tt, *parent)?,
                file_id: tt.final_file_id(*cur),
            },
            FsConflict::MissingParentCreated(trans_id) => Conflict::MissingParent {
                action: "Created directory",
                path: fp.get_path(tt, *trans_id)?,
                file_id: tt.final_file_id(*trans_id),
            },
            FsConflict::NonDirectoryParentCreated(trans_id) => Conflict::NonDirectoryParent {
                action: "Created directory",
                path: fp.get_path(tt, *trans_id)?,
                file_id: tt.final_file_id(*trans_id),
            },
            FsConflict::DeletingParent(trans_id) => Conflict::DeletingParent {
                action: "Not deleting",
                path: fp.get_path(tt, *trans_id)?,
                file_id: tt.final_file_id(*trans_id),
            },
            FsConflict::UnversionedParentVersioned(trans_id) => Conflict::UnversionedParent {
                action: "Versioned directory",
                path: fp.get_path(tt, *trans_id)?,
                file_id: tt.final_file_id(*trans_id),
            },
        };
        cooked.push(c);
    }
    crate::conflicts::sort_conflicts(&mut cooked);
    Ok(cooked)
}

/// A read-only tree that composes a base tree with the staged mutations
/// of a preview transform.
pub struct PreviewTree<'t> {
    base: &'t dyn Tree,
    inventory: heddle_bazaar::inventory::Inventory,
    file_bytes: HashMap<FileId, Vec<u8>>,
    symlink_targets: HashMap<FileId, String>,
    changes: Vec<TreeChange>,
}

impl<'t> PreviewTree<'t> {
    fn build(transform: &mut TreeTransform<'t>) -> Result<Self, TransformError> {
        let base: &'t dyn Tree = match &transform.backing {
            Backing::Preview(tree) => *tree,
            Backing::Disk(wt) => *wt as &dyn Tree,
        };
        let changes = transform.iter_changes()?;

        // rebuild the final inventory: every tree path not removed plus
        // everything the transform creates
        let mut fp = FinalPaths::new(transform.root());
        let mut trans_ids: HashSet<TransId> = HashSet::new();
        for file_id in base.all_file_ids() {
            trans_ids.insert(transform.trans_id_file_id(&file_id));
        }
        trans_ids.extend(transform.new_id.keys().copied());
        trans_ids.extend(transform.new_contents.keys().copied());
        let mut with_paths: Vec<(String, TransId)> = Vec::new();
        for trans_id in trans_ids {
            if transform.final_file_id(trans_id).is_none() {
                continue;
            }
            if transform.final_kind(trans_id).is_none() {
                continue;
            }
            with_paths.push((fp.get_path(transform, trans_id)?, trans_id));
        }
        with_paths.sort();

        let mut inventory = heddle_bazaar::inventory::Inventory::new();
        let mut file_bytes = HashMap::new();
        let mut symlink_targets = HashMap::new();
        for (path, trans_id) in with_paths {
            let file_id = transform.final_file_id(trans_id).unwrap();
            let kind = transform.final_kind(trans_id).unwrap();
            let name = if path.is_empty() {
                String::new()
            } else {
                transform.final_name(trans_id)?
            };
            let parent = if path.is_empty() {
                None
            } else {
                let parent_trans = transform.final_parent(trans_id)?;
                if parent_trans == transform.root() {
                    transform.final_file_id(transform.root())
                } else {
                    transform.final_file_id(parent_trans)
                }
            };
            let mut entry = Entry::make_entry(kind, name, parent, file_id.clone());
            if let Some(&exec) = transform.new_executability.get(&trans_id) {
                entry.set_executable(exec);
            } else if let Some(base_entry) = base.get_entry(&file_id) {
                entry.set_executable(base_entry.executable());
            }
            if kind == Kind::Symlink {
                let target = transform
                    .symlink_target(trans_id)
                    .or_else(|| base.get_symlink_target(&file_id));
                if let (Entry::Link { symlink_target, .. }, Some(t)) = (&mut entry, target.clone())
                {
                    *symlink_target = Some(t);
                }
                if let Some(t) = target {
                    symlink_targets.insert(file_id.clone(), t);
                }
            }
            if transform.new_contents.contains_key(&trans_id) && kind == Kind::File {
                file_bytes.insert(file_id.clone(), transform.staged_file_bytes(trans_id)?);
            }
            inventory.add(entry)?;
        }
        Ok(PreviewTree {
            base,
            inventory,
            file_bytes,
            symlink_targets,
            changes,
        })
    }

    /// Changes between the base tree and this preview.
    pub fn iter_changes_from_base(&self) -> &[TreeChange] {
        &self.changes
    }

    /// Per-line provenance for a file in the preview: the base tree's
    /// annotation pushed through the staged text.
    pub fn annotate_iter(
        &self,
        file_id: &FileId,
        default_revision: &RevisionId,
    ) -> Option<Vec<(RevisionId, Vec<u8>)>> {
        self.kind(file_id)?;
        let base_annotation: Vec<(RevisionId, Vec<u8>)> =
            if let Ok(lines) = self.base.get_file_lines(file_id) {
                let origin = self
                    .base
                    .get_entry(file_id)
                    .and_then(|e| e.revision().cloned())
                    .or_else(|| self.base.get_revision_id())
                    .unwrap_or_else(RevisionId::null);
                lines.into_iter().map(|l| (origin.clone(), l)).collect()
            } else {
                Vec::new()
            };
        let changed = self
            .changes
            .iter()
            .find(|c| &c.file_id == file_id)
            .map(|c| c.changed_content)
            .unwrap_or(false);
        if !changed {
            return Some(base_annotation);
        }
        let new_lines = self.get_file_lines(file_id).ok()?;
        Some(heddle_annotate::reannotate(
            &[base_annotation],
            &new_lines,
            default_revision,
            None,
            None,
        ))
    }
}

impl Tree for PreviewTree<'_> {
    fn root_id(&self) -> Option<FileId> {
        self.inventory.root_id().cloned()
    }

    fn has_id(&self, file_id: &FileId) -> bool {
        self.inventory.has_id(file_id)
    }

    fn get_entry(&self, file_id: &FileId) -> Option<Entry> {
        self.inventory.get(file_id).cloned()
    }

    fn path2id(&self, path: &str) -> Option<FileId> {
        self.inventory.path2id(path).cloned()
    }

    fn id2path(&self, file_id: &FileId) -> Option<String> {
        self.inventory.id2path(file_id)
    }

    fn kind(&self, file_id: &FileId) -> Option<Kind> {
        self.inventory.get(file_id).map(|e| e.kind())
    }

    fn get_file_text(&self, file_id: &FileId) -> io::Result<Vec<u8>> {
        if let Some(bytes) = self.file_bytes.get(file_id) {
            return Ok(bytes.clone());
        }
        self.base.get_file_text(file_id)
    }

    fn get_symlink_target(&self, file_id: &FileId) -> Option<String> {
        self.symlink_targets
            .get(file_id)
            .cloned()
            .or_else(|| self.base.get_symlink_target(file_id))
    }

    fn is_executable(&self, file_id: &FileId) -> bool {
        self.inventory
            .get(file_id)
            .map(|e| e.executable())
            .unwrap_or(false)
    }

    fn case_sensitive(&self) -> bool {
        self.base.case_sensitive()
    }

    fn all_file_ids(&self) -> Vec<FileId> {
        self.inventory.file_ids().cloned().collect()
    }

    fn iter_entries_by_dir(&self) -> Vec<(String, Entry)> {
        self.inventory
            .iter_entries_by_dir()
            .into_iter()
            .map(|(p, e)| (p, e.clone()))
            .collect()
    }
}

// -- serialization --

/// One record of a serialized transform: a header tuple and a payload.
pub type TransformRecord = (Vec<Vec<u8>>, Vec<u8>);

impl TreeTransform<'_> {
    /// Serialize this transform as a record stream.
    ///
    /// The first record carries the bencoded attribute dictionary;
    /// subsequent records carry staged contents per trans-id, with file
    /// bodies patch-encoded against the existing tree text when one
    /// exists.
    pub fn serialize(&mut self) -> Result<Vec<TransformRecord>, TransformError> {
        use bendy::encoding::{AsString, Encoder};
        use std::collections::BTreeMap;

        let to_key = |t: &TransId| format!("{}", t);
        let new_name: BTreeMap<String, AsString<Vec<u8>>> = self
            .new_name
            .iter()
            .map(|(t, n)| (to_key(t), AsString(n.as_bytes().to_vec())))
            .collect();
        let new_parent: BTreeMap<String, AsString<Vec<u8>>> = self
            .new_parent
            .iter()
            .map(|(t, p)| (to_key(t), AsString(format!("{}", p).into_bytes())))
            .collect();
        let new_executability: BTreeMap<String, i64> = self
            .new_executability
            .iter()
            .map(|(t, &e)| (to_key(t), i64::from(e)))
            .collect();
        let new_id: BTreeMap<String, AsString<Vec<u8>>> = self
            .new_id
            .iter()
            .map(|(t, f)| (to_key(t), AsString(f.as_bytes().to_vec())))
            .collect();
        let tree_path_ids: BTreeMap<String, AsString<Vec<u8>>> = self
            .tree_path_ids
            .iter()
            .map(|(p, t)| (p.clone(), AsString(format!("{}", t).into_bytes())))
            .collect();
        let mut removed_id: Vec<AsString<Vec<u8>>> = self
            .removed_id
            .iter()
            .map(|t| AsString(to_key(t).into_bytes()))
            .collect();
        removed_id.sort_by(|a, b| a.0.cmp(&b.0));
        let mut removed_contents: Vec<AsString<Vec<u8>>> = self
            .removed_contents
            .iter()
            .map(|t| AsString(to_key(t).into_bytes()))
            .collect();
        removed_contents.sort_by(|a, b| a.0.cmp(&b.0));
        let non_present_ids: BTreeMap<String, AsString<Vec<u8>>> = self
            .non_present_ids
            .iter()
            .map(|(f, t)| {
                (
                    String::from_utf8_lossy(f.as_bytes()).into_owned(),
                    AsString(format!("{}", t).into_bytes()),
                )
            })
            .collect();

        let id_number = self.id_number;
        let mut encoder = Encoder::new();
        encoder
            .emit_dict(|mut dict| {
                dict.emit_pair(b"_id_number", id_number as i64)?;
                dict.emit_pair(b"_new_executability", new_executability)?;
                dict.emit_pair(b"_new_id", new_id)?;
                dict.emit_pair(b"_new_name", new_name)?;
                dict.emit_pair(b"_new_parent", new_parent)?;
                dict.emit_pair(b"_non_present_ids", non_present_ids)?;
                dict.emit_pair(b"_removed_contents", removed_contents)?;
                dict.emit_pair(b"_removed_id", removed_id)?;
                dict.emit_pair(b"_tree_path_ids", tree_path_ids)?;
                Ok(())
            })
            .map_err(|e| TransformError::Serialization(e.to_string()))?;
        let attribs = encoder
            .get_output()
            .map_err(|e| TransformError::Serialization(e.to_string()))?;

        let mut records: Vec<TransformRecord> = vec![(vec![b"attribs".to_vec()], attribs)];
        let mut content_ids: Vec<TransId> = self.new_contents.keys().copied().collect();
        content_ids.sort();
        for trans_id in content_ids {
            let kind = self.new_contents[&trans_id];
            let header = vec![
                format!("{}", trans_id).into_bytes(),
                kind.as_str().as_bytes().to_vec(),
            ];
            let payload = match kind {
                Kind::File => {
                    let cur_lines: Vec<Vec<u8>> = heddle_osutils::split_lines(
                        &self.staged_file_bytes(trans_id)?,
                    )
                    .map(|l| l.into_owned())
                    .collect();
                    let parent_lines = self.parents_lines(trans_id);
                    encode_line_patch(&cur_lines, parent_lines.as_deref())
                }
                Kind::Directory | Kind::TreeReference => Vec::new(),
                Kind::Symlink => self
                    .symlink_target(trans_id)
                    .unwrap_or_default()
                    .into_bytes(),
            };
            records.push((header, payload));
        }
        Ok(records)
    }

    /// The existing tree's lines for a trans-id's file, used as the patch
    /// basis during (de)serialization.
    fn parents_lines(&self, trans_id: TransId) -> Option<Vec<Vec<u8>>> {
        let path = self.tree_id_paths.get(&trans_id)?;
        let file_id = self.tree().path2id(path)?;
        if self.tree().kind(&file_id) != Some(Kind::File) {
            return None;
        }
        self.tree().get_file_lines(&file_id).ok()
    }

    /// Reconstruct transform state from a record stream; the transform
    /// must be freshly created.
    pub fn deserialize(&mut self, records: &[TransformRecord]) -> Result<(), TransformError> {
        use bendy::decoding::{Decoder, Object};

        let (header, attribs) = records
            .first()
            .ok_or_else(|| TransformError::Serialization("empty record stream".into()))?;
        if header.first().map(|h| h.as_slice()) != Some(b"attribs") {
            return Err(TransformError::Serialization(
                "first record must be attribs".into(),
            ));
        }

        fn bad(e: impl std::fmt::Display) -> TransformError {
            TransformError::Serialization(e.to_string())
        }
        fn parse_trans_id(bytes: &[u8]) -> Result<TransId, TransformError> {
            TransId::parse(&String::from_utf8_lossy(bytes))
                .ok_or_else(|| TransformError::Serialization("bad trans id".into()))
        }
        fn as_bytes<'ser>(obj: Object<'_, 'ser>) -> Result<&'ser [u8], TransformError> {
            obj.try_into_bytes().map_err(bad)
        }
        fn each_pair(
            value: Object,
            mut f: impl FnMut(&[u8], Object) -> Result<(), TransformError>,
        ) -> Result<(), TransformError> {
            let mut dict = value.try_into_dictionary().map_err(bad)?;
            while let Some((k, v)) = dict.next_pair().map_err(bad)? {
                f(k, v)?;
            }
            Ok(())
        }

        let mut decoder = Decoder::new(attribs);
        let mut dict = match decoder.next_object() {
            Ok(Some(Object::Dict(d))) => d,
            _ => return Err(TransformError::Serialization("attribs must be a dict".into())),
        };
        while let Some((key, value)) = dict.next_pair().map_err(bad)? {
            match key {
                b"_id_number" => {
                    if let Object::Integer(n) = value {
                        self.id_number = n.parse::<usize>().map_err(bad)?;
                    }
                }
                b"_new_name" => each_pair(value, |k, v| {
                    let name = String::from_utf8_lossy(as_bytes(v)?).into_owned();
                    self.new_name.insert(parse_trans_id(k)?, name);
                    Ok(())
                })?,
                b"_new_parent" => each_pair(value, |k, v| {
                    let parent = parse_trans_id(as_bytes(v)?)?;
                    self.new_parent.insert(parse_trans_id(k)?, parent);
                    Ok(())
                })?,
                b"_new_executability" => each_pair(value, |k, v| {
                    if let Object::Integer(n) = v {
                        self.new_executability
                            .insert(parse_trans_id(k)?, n != "0");
                    }
                    Ok(())
                })?,
                b"_new_id" => each_pair(value, |k, v| {
                    let file_id = FileId::from(as_bytes(v)?);
                    let trans_id = parse_trans_id(k)?;
                    self.new_id.insert(trans_id, file_id.clone());
                    self.r_new_id.insert(file_id, trans_id);
                    Ok(())
                })?,
                b"_tree_path_ids" => each_pair(value, |k, v| {
                    let path = String::from_utf8_lossy(k).into_owned();
                    let trans_id = parse_trans_id(as_bytes(v)?)?;
                    if path.is_empty() {
                        self.new_root = trans_id;
                    }
                    self.tree_path_ids.insert(path.clone(), trans_id);
                    self.tree_id_paths.insert(trans_id, path);
                    Ok(())
                })?,
                b"_removed_id" | b"_removed_contents" => {
                    let mut list = value.try_into_list().map_err(bad)?;
                    while let Some(item) = list.next_object().map_err(bad)? {
                        let trans_id = parse_trans_id(as_bytes(item)?)?;
                        if key == b"_removed_id" {
                            self.removed_id.insert(trans_id);
                        } else {
                            self.removed_contents.insert(trans_id);
                        }
                    }
                }
                b"_non_present_ids" => each_pair(value, |k, v| {
                    let trans_id = parse_trans_id(as_bytes(v)?)?;
                    self.non_present_ids.insert(FileId::from(k), trans_id);
                    Ok(())
                })?,
                _ => {
                    return Err(TransformError::Serialization(format!(
                        "unknown attribute {:?}",
                        String::from_utf8_lossy(key)
                    )))
                }
            }
        }

        for (header, payload) in &records[1..] {
            if header.len() != 2 {
                return Err(TransformError::Serialization("bad content header".into()));
            }
            let trans_id = parse_trans_id(&header[0])?;
            let kind = String::from_utf8_lossy(&header[1]).into_owned();
            match kind.as_str() {
                "file" => {
                    let parent_lines = self.parents_lines(trans_id);
                    let lines = decode_line_patch(payload, parent_lines.as_deref())?;
                    self.create_file(lines, trans_id)?;
                }
                "directory" => self.create_directory(trans_id)?,
                "symlink" => {
                    let target = String::from_utf8_lossy(payload).into_owned();
                    self.create_symlink(&target, trans_id)?;
                }
                other => {
                    return Err(TransformError::Serialization(format!(
                        "unknown content kind {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Encode lines as a patch: a fulltext is one `i` run; with a basis,
/// matched runs become `c <parent> <parent_pos> <child_pos> <len>` copies.
fn encode_line_patch(new_lines: &[Vec<u8>], parent_lines: Option<&[Vec<u8>]>) -> Vec<u8> {
    // An unterminated line can only be the last line of the text, so every
    // insert run except possibly the final one is newline-clean and the
    // stream stays parseable without extra escaping.
    let mut out = Vec::new();
    match parent_lines {
        None => {
            out.extend_from_slice(format!("i {}\n", new_lines.len()).as_bytes());
            for line in new_lines {
                out.extend_from_slice(line);
            }
        }
        Some(parents) => {
            let blocks = matching_blocks(parents, new_lines);
            let mut last_j = 0;
            for (i, j, n) in blocks {
                if j > last_j {
                    out.extend_from_slice(format!("i {}\n", j - last_j).as_bytes());
                    for line in &new_lines[last_j..j] {
                        out.extend_from_slice(line);
                    }
                }
                if n > 0 {
                    out.extend_from_slice(format!("c 0 {} {} {}\n", i, j, n).as_bytes());
                }
                last_j = j + n;
            }
        }
    }
    out
}

/// Replay a line patch against the basis lines.
fn decode_line_patch(
    payload: &[u8],
    parent_lines: Option<&[Vec<u8>]>,
) -> Result<Vec<Vec<u8>>, TransformError> {
    let raw: Vec<Vec<u8>> = heddle_osutils::split_lines(payload)
        .map(|l| l.into_owned())
        .collect();
    let mut result = Vec::new();
    let mut idx = 0;
    while idx < raw.len() {
        let op = &raw[idx];
        idx += 1;
        if let Some(rest) = op.strip_prefix(b"i ") {
            let count: usize = String::from_utf8_lossy(rest)
                .trim()
                .parse()
                .map_err(|_| TransformError::Serialization("bad insert count".into()))?;
            for _ in 0..count {
                if idx >= raw.len() {
                    return Err(TransformError::Serialization("truncated insert run".into()));
                }
                result.push(raw[idx].clone());
                idx += 1;
            }
        } else if let Some(rest) = op.strip_prefix(b"c ") {
            let fields: Vec<usize> = String::from_utf8_lossy(rest)
                .split_whitespace()
                .map(|t| t.parse::<usize>())
                .collect::<Result<_, _>>()
                .map_err(|_| TransformError::Serialization("bad copy fields".into()))?;
            if fields.len() != 4 {
                return Err(TransformError::Serialization("bad copy op".into()));
            }
            let (parent_pos, len) = (fields[1], fields[3]);
            let parents = parent_lines.ok_or_else(|| {
                TransformError::Serialization("copy op without basis text".into())
            })?;
            if parent_pos + len > parents.len() {
                return Err(TransformError::Serialization("copy out of range".into()));
            }
            result.extend_from_slice(&parents[parent_pos..parent_pos + len]);
        } else {
            return Err(TransformError::Serialization("unknown patch op".into()));
        }
    }
    Ok(result)
}
