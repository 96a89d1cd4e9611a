//! Trees: the read surface the merge and transform engines consume, plus
//! the in-memory revision tree and the on-disk working tree.

use crate::conflicts::Conflict;
use heddle_bazaar::inventory::{Entry, Inventory, InventoryDelta, ROOT_ID};
use heddle_bazaar::{FileId, RevisionId};
use heddle_osutils::file as osfile;
use heddle_osutils::sha::sha_string;
use heddle_osutils::Kind;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// Read access to one tree state.
pub trait Tree {
    fn root_id(&self) -> Option<FileId>;

    /// The revision this tree represents, if it is a revision tree.
    fn get_revision_id(&self) -> Option<RevisionId> {
        None
    }

    fn has_id(&self, file_id: &FileId) -> bool;

    fn get_entry(&self, file_id: &FileId) -> Option<Entry>;

    fn path2id(&self, path: &str) -> Option<FileId>;

    fn id2path(&self, file_id: &FileId) -> Option<String>;

    fn kind(&self, file_id: &FileId) -> Option<Kind>;

    fn get_file_text(&self, file_id: &FileId) -> io::Result<Vec<u8>>;

    fn get_file_lines(&self, file_id: &FileId) -> io::Result<Vec<Vec<u8>>> {
        Ok(heddle_osutils::split_lines(&self.get_file_text(file_id)?)
            .map(|l| l.into_owned())
            .collect())
    }

    fn get_file_sha1(&self, file_id: &FileId) -> Option<String> {
        if self.kind(file_id) != Some(Kind::File) {
            return None;
        }
        self.get_file_text(file_id).ok().map(|t| sha_string(&t))
    }

    fn get_symlink_target(&self, file_id: &FileId) -> Option<String>;

    fn is_executable(&self, file_id: &FileId) -> bool;

    fn case_sensitive(&self) -> bool {
        true
    }

    fn supports_content_filtering(&self) -> bool {
        false
    }

    fn all_file_ids(&self) -> Vec<FileId>;

    fn iter_entries_by_dir(&self) -> Vec<(String, Entry)>;
}

/// One changed file between two tree states, `(from, to)` ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub file_id: FileId,
    pub paths: (Option<String>, Option<String>),
    pub changed_content: bool,
    pub versioned: (bool, bool),
    pub parent_id: (Option<FileId>, Option<FileId>),
    pub name: (Option<String>, Option<String>),
    pub kind: (Option<Kind>, Option<Kind>),
    pub executable: (bool, bool),
}

/// Compare two trees by file id, reporting entries that differ.
///
/// Output is sorted by destination path (source path for deletions) so
/// downstream processing is deterministic.
pub fn iter_changes(from: &dyn Tree, to: &dyn Tree) -> Vec<TreeChange> {
    let mut ids: HashSet<FileId> = from.all_file_ids().into_iter().collect();
    ids.extend(to.all_file_ids());
    let mut changes = Vec::new();
    for file_id in ids {
        let from_entry = from.get_entry(&file_id);
        let to_entry = to.get_entry(&file_id);
        let from_kind = from_entry.as_ref().map(|e| e.kind());
        let to_kind = to_entry.as_ref().map(|e| e.kind());
        let changed_content = if from_kind != to_kind {
            true
        } else {
            match to_kind {
                Some(Kind::File) => from.get_file_sha1(&file_id) != to.get_file_sha1(&file_id),
                Some(Kind::Symlink) => {
                    from.get_symlink_target(&file_id) != to.get_symlink_target(&file_id)
                }
                _ => false,
            }
        };
        let from_name = from_entry.as_ref().map(|e| e.name().to_string());
        let to_name = to_entry.as_ref().map(|e| e.name().to_string());
        let from_parent = from_entry.as_ref().and_then(|e| e.parent_id().cloned());
        let to_parent = to_entry.as_ref().and_then(|e| e.parent_id().cloned());
        let from_exec = from_entry.as_ref().map(|e| e.executable()).unwrap_or(false);
        let to_exec = to_entry.as_ref().map(|e| e.executable()).unwrap_or(false);
        if !changed_content
            && from_name == to_name
            && from_parent == to_parent
            && from_exec == to_exec
            && from_entry.is_some() == to_entry.is_some()
        {
            continue;
        }
        changes.push(TreeChange {
            paths: (from.id2path(&file_id), to.id2path(&file_id)),
            changed_content,
            versioned: (from_entry.is_some(), to_entry.is_some()),
            parent_id: (from_parent, to_parent),
            name: (from_name, to_name),
            kind: (from_kind, to_kind),
            executable: (from_exec, to_exec),
            file_id,
        });
    }
    changes.sort_by(|a, b| {
        let key = |c: &TreeChange| c.paths.1.clone().or_else(|| c.paths.0.clone());
        key(a).cmp(&key(b))
    });
    changes
}

/// An immutable in-memory tree for one revision.
#[derive(Debug, Clone)]
pub struct RevisionTree {
    revision_id: RevisionId,
    inventory: Inventory,
    texts: std::collections::HashMap<FileId, Vec<u8>>,
    symlinks: std::collections::HashMap<FileId, String>,
}

impl RevisionTree {
    /// An empty tree (no root) for `null:` and similar.
    pub fn empty(revision_id: RevisionId) -> Self {
        RevisionTree {
            revision_id,
            inventory: Inventory::new(),
            texts: Default::default(),
            symlinks: Default::default(),
        }
    }

    /// A tree with a standard root directory.
    pub fn new(revision_id: RevisionId) -> Self {
        let mut tree = Self::empty(revision_id.clone());
        let mut root = Entry::directory(FileId::from(ROOT_ID), String::new(), None);
        if let Entry::Directory { revision, .. } = &mut root {
            *revision = Some(revision_id);
        }
        tree.inventory.add(root).unwrap();
        tree
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    fn place(&self, path: &str) -> (Option<FileId>, String) {
        match path.rsplit_once('/') {
            Some((dir, name)) => (
                self.inventory.path2id(dir).cloned(),
                name.to_string(),
            ),
            None => (self.inventory.root_id().cloned(), path.to_string()),
        }
    }

    pub fn add_dir(&mut self, file_id: &str, path: &str) {
        let (parent, name) = self.place(path);
        let mut entry = Entry::directory(FileId::from(file_id), name, parent);
        if let Entry::Directory { revision, .. } = &mut entry {
            *revision = Some(self.revision_id.clone());
        }
        self.inventory.add(entry).unwrap();
    }

    pub fn add_file(&mut self, file_id: &str, path: &str, content: &[u8], executable: bool) {
        let (parent, name) = self.place(path);
        let mut entry = Entry::file(FileId::from(file_id), name, parent);
        if let Entry::File {
            revision,
            text_sha1,
            text_size,
            executable: exec,
            ..
        } = &mut entry
        {
            *revision = Some(self.revision_id.clone());
            *text_sha1 = Some(sha_string(content));
            *text_size = Some(content.len() as u64);
            *exec = executable;
        }
        self.inventory.add(entry).unwrap();
        self.texts.insert(FileId::from(file_id), content.to_vec());
    }

    pub fn add_symlink(&mut self, file_id: &str, path: &str, target: &str) {
        let (parent, name) = self.place(path);
        let mut entry = Entry::link(FileId::from(file_id), name, parent);
        if let Entry::Link {
            revision,
            symlink_target,
            ..
        } = &mut entry
        {
            *revision = Some(self.revision_id.clone());
            *symlink_target = Some(target.to_string());
        }
        self.inventory.add(entry).unwrap();
        self.symlinks
            .insert(FileId::from(file_id), target.to_string());
    }

    /// Direct entry access for shaping test fixtures (e.g. per-entry
    /// last-modified revisions).
    pub fn entry_mut(&mut self, file_id: &FileId) -> Option<&mut Entry> {
        self.inventory.get_mut(file_id)
    }
}

impl Tree for RevisionTree {
    fn root_id(&self) -> Option<FileId> {
        self.inventory.root_id().cloned()
    }

    fn get_revision_id(&self) -> Option<RevisionId> {
        Some(self.revision_id.clone())
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
        self.texts
            .get(file_id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}", file_id)))
    }

    fn get_symlink_target(&self, file_id: &FileId) -> Option<String> {
        self.symlinks.get(file_id).cloned()
    }

    fn is_executable(&self, file_id: &FileId) -> bool {
        self.inventory
            .get(file_id)
            .map(|e| e.executable())
            .unwrap_or(false)
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

/// The control directory name; everything under it belongs to the tool.
pub const CONTROL_DIR: &str = ".bzr";

#[derive(Debug)]
pub enum LockError {
    NotLocked,
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LockError::NotLocked => write!(f, "tree is not locked"),
        }
    }
}

impl std::error::Error for LockError {}

/// A working tree on disk: a directory with a `.bzr` control dir and an
/// inventory.
///
/// Locks are scoped counters; a transform takes the tree-write lock for
/// its whole lifetime and releases it from `apply` or `finalize`.
pub struct WorkingTree {
    basedir: PathBuf,
    inventory: RefCell<Inventory>,
    write_locks: Cell<usize>,
    read_locks: Cell<usize>,
    case_sensitive: bool,
    last_revision: RefCell<Option<RevisionId>>,
    conflicts: RefCell<Vec<Conflict>>,
}

impl WorkingTree {
    /// Initialize a working tree in `basedir`, creating the control dir
    /// and a root inventory entry.
    pub fn create(basedir: &Path) -> io::Result<WorkingTree> {
        std::fs::create_dir_all(basedir)?;
        std::fs::create_dir_all(basedir.join(CONTROL_DIR))?;
        let inventory = Inventory::with_root(FileId::from(ROOT_ID));
        Ok(WorkingTree {
            basedir: basedir.to_path_buf(),
            inventory: RefCell::new(inventory),
            write_locks: Cell::new(0),
            read_locks: Cell::new(0),
            case_sensitive: true,
            last_revision: RefCell::new(None),
            conflicts: RefCell::new(Vec::new()),
        })
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn control_path(&self, name: &str) -> PathBuf {
        self.basedir.join(CONTROL_DIR).join(name)
    }

    pub fn abspath(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.basedir.clone()
        } else {
            self.basedir.join(path)
        }
    }

    pub fn relpath(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.basedir)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    pub fn is_control_filename(&self, path: &str) -> bool {
        path == CONTROL_DIR || path.starts_with(&format!("{}/", CONTROL_DIR))
    }

    pub fn lock_tree_write(&self) {
        self.write_locks.set(self.write_locks.get() + 1);
    }

    pub fn lock_read(&self) {
        self.read_locks.set(self.read_locks.get() + 1);
    }

    pub fn unlock(&self) -> Result<(), LockError> {
        if self.write_locks.get() > 0 {
            self.write_locks.set(self.write_locks.get() - 1);
            Ok(())
        } else if self.read_locks.get() > 0 {
            self.read_locks.set(self.read_locks.get() - 1);
            Ok(())
        } else {
            Err(LockError::NotLocked)
        }
    }

    pub fn is_locked(&self) -> bool {
        self.write_locks.get() > 0 || self.read_locks.get() > 0
    }

    pub fn set_case_sensitive(&mut self, value: bool) {
        self.case_sensitive = value;
    }

    pub fn set_last_revision(&self, revision_id: RevisionId) {
        *self.last_revision.borrow_mut() = Some(revision_id);
    }

    pub fn last_revision(&self) -> Option<RevisionId> {
        self.last_revision.borrow().clone()
    }

    pub fn apply_inventory_delta(
        &self,
        delta: InventoryDelta,
    ) -> Result<(), heddle_bazaar::inventory::Error> {
        self.inventory.borrow_mut().apply_delta(delta)
    }

    pub fn add_conflicts(&self, new_conflicts: Vec<Conflict>) {
        let mut conflicts = self.conflicts.borrow_mut();
        conflicts.extend(new_conflicts);
        crate::conflicts::sort_conflicts(&mut conflicts);
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.conflicts.borrow().clone()
    }

    // -- helpers for building tree content --

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        std::fs::create_dir(self.abspath(path))
    }

    pub fn put_file_bytes(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(self.abspath(path), bytes)
    }

    pub fn make_symlink(&self, path: &str, target: &str) -> io::Result<()> {
        #[cfg(unix)]
        return std::os::unix::fs::symlink(target, self.abspath(path));
        #[cfg(not(unix))]
        {
            let _ = (path, target);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "symlinks unsupported",
            ))
        }
    }

    /// Record the last-modified revision of a versioned entry, as a
    /// commit would; the merge planners read it for ancestry.
    pub fn set_entry_revision(&self, file_id: &FileId, revision: &RevisionId) {
        if let Some(entry) = self.inventory.borrow_mut().get_mut(file_id) {
            entry.set_revision(Some(revision.clone()));
        }
    }

    /// Version an existing filesystem entry, inferring its kind from disk.
    pub fn add(&self, path: &str, file_id: &str) -> io::Result<()> {
        let kind = osfile::file_kind(self.abspath(path))?;
        let (parent, name) = match path.rsplit_once('/') {
            Some((dir, name)) => {
                let inv = self.inventory.borrow();
                (inv.path2id(dir).cloned(), name.to_string())
            }
            None => {
                let inv = self.inventory.borrow();
                (inv.root_id().cloned(), path.to_string())
            }
        };
        let entry = match kind {
            Kind::Directory => Entry::directory(FileId::from(file_id), name, parent),
            Kind::Symlink => {
                let mut e = Entry::link(FileId::from(file_id), name, parent);
                if let Entry::Link { symlink_target, .. } = &mut e {
                    *symlink_target = std::fs::read_link(self.abspath(path))
                        .ok()
                        .map(|t| t.to_string_lossy().into_owned());
                }
                e
            }
            _ => {
                let mut e = Entry::file(FileId::from(file_id), name, parent);
                if let Entry::File { executable, .. } = &mut e {
                    *executable = osfile::is_executable(self.abspath(path)).unwrap_or(false);
                }
                e
            }
        };
        self.inventory
            .borrow_mut()
            .add(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    }
}

impl Tree for WorkingTree {
    fn root_id(&self) -> Option<FileId> {
        self.inventory.borrow().root_id().cloned()
    }

    fn has_id(&self, file_id: &FileId) -> bool {
        self.inventory.borrow().has_id(file_id)
    }

    fn get_entry(&self, file_id: &FileId) -> Option<Entry> {
        self.inventory.borrow().get(file_id).cloned()
    }

    fn path2id(&self, path: &str) -> Option<FileId> {
        self.inventory.borrow().path2id(path).cloned()
    }

    fn id2path(&self, file_id: &FileId) -> Option<String> {
        self.inventory.borrow().id2path(file_id)
    }

    fn kind(&self, file_id: &FileId) -> Option<Kind> {
        let path = self.id2path(file_id)?;
        osfile::file_kind(self.abspath(&path))
            .ok()
            .or_else(|| self.inventory.borrow().get(file_id).map(|e| e.kind()))
    }

    fn get_file_text(&self, file_id: &FileId) -> io::Result<Vec<u8>> {
        let path = self
            .id2path(file_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}", file_id)))?;
        std::fs::read(self.abspath(&path))
    }

    fn get_file_sha1(&self, file_id: &FileId) -> Option<String> {
        if self.kind(file_id) != Some(Kind::File) {
            return None;
        }
        let path = self.id2path(file_id)?;
        heddle_osutils::sha::sha_file_by_name(self.abspath(&path)).ok()
    }

    fn get_symlink_target(&self, file_id: &FileId) -> Option<String> {
        let path = self.id2path(file_id)?;
        std::fs::read_link(self.abspath(&path))
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    }

    fn is_executable(&self, file_id: &FileId) -> bool {
        match self.id2path(file_id) {
            Some(path) => osfile::is_executable(self.abspath(&path)).unwrap_or(false),
            None => false,
        }
    }

    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn all_file_ids(&self) -> Vec<FileId> {
        self.inventory.borrow().file_ids().cloned().collect()
    }

    fn iter_entries_by_dir(&self) -> Vec<(String, Entry)> {
        self.inventory
            .borrow()
            .iter_entries_by_dir()
            .into_iter()
            .map(|(p, e)| (p, e.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_tree_paths() {
        let mut tree = RevisionTree::new(RevisionId::from("r1"));
        tree.add_dir("dir-id", "dir");
        tree.add_file("file-id", "dir/file", b"hello\n", false);
        assert_eq!(tree.id2path(&FileId::from("file-id")).unwrap(), "dir/file");
        assert_eq!(tree.path2id("dir/file"), Some(FileId::from("file-id")));
        assert_eq!(tree.get_file_text(&FileId::from("file-id")).unwrap(), b"hello\n");
        assert_eq!(tree.kind(&FileId::from("dir-id")), Some(Kind::Directory));
    }

    #[test]
    fn test_iter_changes_detects_rename_and_edit() {
        let mut base = RevisionTree::new(RevisionId::from("base"));
        base.add_file("f-id", "a", b"x\n", false);
        let mut other = RevisionTree::new(RevisionId::from("other"));
        other.add_file("f-id", "b", b"x\ny\n", false);
        let changes = iter_changes(&base, &other);
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.file_id, FileId::from("f-id"));
        assert!(change.changed_content);
        assert_eq!(change.name, (Some("a".to_string()), Some("b".to_string())));
        assert_eq!(
            change.paths,
            (Some("a".to_string()), Some("b".to_string()))
        );
    }

    #[test]
    fn test_iter_changes_skips_unchanged() {
        let mut base = RevisionTree::new(RevisionId::from("base"));
        base.add_file("f-id", "a", b"x\n", false);
        let mut other = RevisionTree::new(RevisionId::from("other"));
        other.add_file("f-id", "a", b"x\n", false);
        // the roots match and the file is identical
        assert!(iter_changes(&base, &other).is_empty());
    }

    #[test]
    fn test_working_tree_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let wt = WorkingTree::create(dir.path()).unwrap();
        wt.put_file_bytes("hello", b"hi\n").unwrap();
        wt.add("hello", "hello-id").unwrap();
        assert_eq!(wt.path2id("hello"), Some(FileId::from("hello-id")));
        assert_eq!(
            wt.get_file_text(&FileId::from("hello-id")).unwrap(),
            b"hi\n"
        );
        assert_eq!(wt.kind(&FileId::from("hello-id")), Some(Kind::File));
        assert!(wt.is_control_filename(".bzr/limbo"));
        assert!(!wt.is_control_filename("src"));
        assert_eq!(
            wt.relpath(&wt.abspath("hello")),
            Some("hello".to_string())
        );
        assert_eq!(
            wt.get_file_sha1(&FileId::from("hello-id")).unwrap(),
            heddle_osutils::sha::sha_string(b"hi\n")
        );
    }

    #[test]
    fn test_lock_counters() {
        let dir = tempfile::tempdir().unwrap();
        let wt = WorkingTree::create(dir.path()).unwrap();
        assert!(!wt.is_locked());
        wt.lock_tree_write();
        assert!(wt.is_locked());
        wt.unlock().unwrap();
        assert!(wt.unlock().is_err());
    }
}
