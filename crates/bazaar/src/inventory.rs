//! Inventories: the mapping from file ids to names, parents and kinds.

use crate::{FileId, RevisionId};
use heddle_osutils::Kind;
use std::collections::HashMap;

// This should really be an id randomly assigned when the tree is created,
// but it's not for now.
pub const ROOT_ID: &[u8] = b"TREE_ROOT";

pub fn versionable_kind(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::File | Kind::Directory | Kind::Symlink | Kind::TreeReference
    )
}

/// Description of a versioned file, directory, symlink or nested tree.
///
/// `parent_id` is `None` only for the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Directory {
        file_id: FileId,
        name: String,
        parent_id: Option<FileId>,
        revision: Option<RevisionId>,
    },
    File {
        file_id: FileId,
        name: String,
        parent_id: Option<FileId>,
        revision: Option<RevisionId>,
        text_sha1: Option<String>,
        text_size: Option<u64>,
        executable: bool,
    },
    Link {
        file_id: FileId,
        name: String,
        parent_id: Option<FileId>,
        revision: Option<RevisionId>,
        symlink_target: Option<String>,
    },
    TreeReference {
        file_id: FileId,
        name: String,
        parent_id: Option<FileId>,
        revision: Option<RevisionId>,
        reference_revision: Option<RevisionId>,
    },
}

impl Entry {
    pub fn directory(file_id: FileId, name: String, parent_id: Option<FileId>) -> Self {
        Entry::Directory {
            file_id,
            name,
            parent_id,
            revision: None,
        }
    }

    pub fn file(file_id: FileId, name: String, parent_id: Option<FileId>) -> Self {
        Entry::File {
            file_id,
            name,
            parent_id,
            revision: None,
            text_sha1: None,
            text_size: None,
            executable: false,
        }
    }

    pub fn link(file_id: FileId, name: String, parent_id: Option<FileId>) -> Self {
        Entry::Link {
            file_id,
            name,
            parent_id,
            revision: None,
            symlink_target: None,
        }
    }

    pub fn tree_reference(file_id: FileId, name: String, parent_id: Option<FileId>) -> Self {
        Entry::TreeReference {
            file_id,
            name,
            parent_id,
            revision: None,
            reference_revision: None,
        }
    }

    pub fn make_entry(
        kind: Kind,
        name: String,
        parent_id: Option<FileId>,
        file_id: FileId,
    ) -> Self {
        match kind {
            Kind::Directory => Entry::directory(file_id, name, parent_id),
            Kind::File => Entry::file(file_id, name, parent_id),
            Kind::Symlink => Entry::link(file_id, name, parent_id),
            Kind::TreeReference => Entry::tree_reference(file_id, name, parent_id),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Entry::Directory { .. } => Kind::Directory,
            Entry::File { .. } => Kind::File,
            Entry::Link { .. } => Kind::Symlink,
            Entry::TreeReference { .. } => Kind::TreeReference,
        }
    }

    pub fn file_id(&self) -> &FileId {
        match self {
            Entry::Directory { file_id, .. }
            | Entry::File { file_id, .. }
            | Entry::Link { file_id, .. }
            | Entry::TreeReference { file_id, .. } => file_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::Directory { name, .. }
            | Entry::File { name, .. }
            | Entry::Link { name, .. }
            | Entry::TreeReference { name, .. } => name,
        }
    }

    pub fn parent_id(&self) -> Option<&FileId> {
        match self {
            Entry::Directory { parent_id, .. }
            | Entry::File { parent_id, .. }
            | Entry::Link { parent_id, .. }
            | Entry::TreeReference { parent_id, .. } => parent_id.as_ref(),
        }
    }

    pub fn revision(&self) -> Option<&RevisionId> {
        match self {
            Entry::Directory { revision, .. }
            | Entry::File { revision, .. }
            | Entry::Link { revision, .. }
            | Entry::TreeReference { revision, .. } => revision.as_ref(),
        }
    }

    pub fn set_name(&mut self, new_name: String) {
        match self {
            Entry::Directory { name, .. }
            | Entry::File { name, .. }
            | Entry::Link { name, .. }
            | Entry::TreeReference { name, .. } => *name = new_name,
        }
    }

    pub fn set_revision(&mut self, new_revision: Option<RevisionId>) {
        match self {
            Entry::Directory { revision, .. }
            | Entry::File { revision, .. }
            | Entry::Link { revision, .. }
            | Entry::TreeReference { revision, .. } => *revision = new_revision,
        }
    }

    pub fn set_parent_id(&mut self, new_parent: Option<FileId>) {
        match self {
            Entry::Directory { parent_id, .. }
            | Entry::File { parent_id, .. }
            | Entry::Link { parent_id, .. }
            | Entry::TreeReference { parent_id, .. } => *parent_id = new_parent,
        }
    }

    pub fn executable(&self) -> bool {
        matches!(self, Entry::File { executable: true, .. })
    }

    pub fn set_executable(&mut self, value: bool) {
        if let Entry::File { executable, .. } = self {
            *executable = value;
        }
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match self {
            Entry::Link { symlink_target, .. } => symlink_target.as_deref(),
            _ => None,
        }
    }

    /// True if the object this entry represents has textual data.
    pub fn has_text(&self) -> bool {
        matches!(self, Entry::File { .. })
    }
}

#[derive(Debug)]
pub enum Error {
    DuplicateFileId(FileId),
    NoSuchId(FileId),
    ParentNotDirectory(FileId),
    ParentMissing(FileId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::DuplicateFileId(id) => write!(f, "file id {} is already present", id),
            Error::NoSuchId(id) => write!(f, "no entry for file id {}", id),
            Error::ParentNotDirectory(id) => write!(f, "parent {} is not a directory", id),
            Error::ParentMissing(id) => write!(f, "parent {} not in inventory", id),
        }
    }
}

impl std::error::Error for Error {}

/// One record of an inventory delta.
///
/// `old_path` is `None` for additions, `new_path` and `entry` are `None`
/// for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEntry {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub file_id: FileId,
    pub entry: Option<Entry>,
}

pub type InventoryDelta = Vec<DeltaEntry>;

/// An id-keyed inventory with parent links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: HashMap<FileId, Entry>,
    root_id: Option<FileId>,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory::default()
    }

    /// An inventory holding just a root directory with the given id.
    pub fn with_root(root_id: FileId) -> Self {
        let mut inv = Inventory::new();
        inv.add(Entry::directory(root_id, String::new(), None))
            .unwrap();
        inv
    }

    pub fn root_id(&self) -> Option<&FileId> {
        self.root_id.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_id(&self, file_id: &FileId) -> bool {
        self.entries.contains_key(file_id)
    }

    pub fn get(&self, file_id: &FileId) -> Option<&Entry> {
        self.entries.get(file_id)
    }

    pub fn file_ids(&self) -> impl Iterator<Item = &FileId> {
        self.entries.keys()
    }

    pub fn add(&mut self, entry: Entry) -> Result<(), Error> {
        if self.entries.contains_key(entry.file_id()) {
            return Err(Error::DuplicateFileId(entry.file_id().clone()));
        }
        match entry.parent_id() {
            None => {
                self.root_id = Some(entry.file_id().clone());
            }
            Some(parent) => match self.entries.get(parent) {
                None => return Err(Error::ParentMissing(parent.clone())),
                Some(p) if p.kind() != Kind::Directory => {
                    return Err(Error::ParentNotDirectory(parent.clone()))
                }
                Some(_) => {}
            },
        }
        self.entries.insert(entry.file_id().clone(), entry);
        Ok(())
    }

    pub fn delete(&mut self, file_id: &FileId) -> Result<Entry, Error> {
        if self.root_id.as_ref() == Some(file_id) {
            self.root_id = None;
        }
        self.entries
            .remove(file_id)
            .ok_or_else(|| Error::NoSuchId(file_id.clone()))
    }

    pub fn get_mut(&mut self, file_id: &FileId) -> Option<&mut Entry> {
        self.entries.get_mut(file_id)
    }

    pub fn id2path(&self, file_id: &FileId) -> Option<String> {
        let mut segments: Vec<&str> = Vec::new();
        let mut cur = self.entries.get(file_id)?;
        loop {
            match cur.parent_id() {
                None => break,
                Some(parent) => {
                    segments.push(cur.name());
                    cur = self.entries.get(parent)?;
                }
            }
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    pub fn path2id(&self, path: &str) -> Option<&FileId> {
        let mut cur = self.root_id.as_ref()?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let child = self.entries.values().find(|e| {
                e.parent_id() == Some(cur) && e.name() == segment
            })?;
            cur = child.file_id();
        }
        Some(cur)
    }

    pub fn children_of<'a>(&'a self, file_id: &'a FileId) -> Vec<&'a Entry> {
        let mut children: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.parent_id() == Some(file_id))
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));
        children
    }

    /// All entries, directory-major: each directory precedes its children
    /// and siblings come out name-sorted.
    pub fn iter_entries_by_dir(&self) -> Vec<(String, &Entry)> {
        let mut result = Vec::with_capacity(self.entries.len());
        let root_id = match &self.root_id {
            Some(id) => id,
            None => return result,
        };
        let root = &self.entries[root_id];
        let mut pending: Vec<(String, &Entry)> = vec![(String::new(), root)];
        while let Some((path, entry)) = pending.pop() {
            result.push((path.clone(), entry));
            if entry.kind() == Kind::Directory {
                let mut children = self.children_of(entry.file_id());
                // popped from the back, so queue in reverse name order
                children.reverse();
                for child in children {
                    let child_path = if path.is_empty() {
                        child.name().to_string()
                    } else {
                        format!("{}/{}", path, child.name())
                    };
                    pending.push((child_path, child));
                }
            }
        }
        result
    }

    /// Apply an inventory delta: all removals first, then additions from
    /// the shallowest path down so parents exist before their children.
    pub fn apply_delta(&mut self, delta: InventoryDelta) -> Result<(), Error> {
        let mut additions = Vec::new();
        for record in delta {
            if record.old_path.is_some() {
                // replaced entries are deleted and re-added
                let _ = self.delete(&record.file_id);
            }
            if let Some(entry) = record.entry {
                additions.push((record.new_path.unwrap_or_default(), entry));
            }
        }
        additions.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, entry) in additions {
            self.add(entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Inventory {
        let mut inv = Inventory::with_root(FileId::from(ROOT_ID));
        inv.add(Entry::directory(
            FileId::from("dir-id"),
            "dir".to_string(),
            Some(FileId::from(ROOT_ID)),
        ))
        .unwrap();
        inv.add(Entry::file(
            FileId::from("file-id"),
            "file".to_string(),
            Some(FileId::from("dir-id")),
        ))
        .unwrap();
        inv
    }

    #[test]
    fn test_paths() {
        let inv = sample();
        assert_eq!(inv.id2path(&FileId::from("file-id")).unwrap(), "dir/file");
        assert_eq!(inv.path2id("dir/file"), Some(&FileId::from("file-id")));
        assert_eq!(inv.path2id(""), Some(&FileId::from(ROOT_ID)));
        assert_eq!(inv.path2id("missing"), None);
    }

    #[test]
    fn test_iter_entries_by_dir() {
        let inv = sample();
        let paths: Vec<String> = inv
            .iter_entries_by_dir()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(paths, vec!["", "dir", "dir/file"]);
    }

    #[test]
    fn test_add_rejects_duplicates_and_bad_parents() {
        let mut inv = sample();
        assert!(matches!(
            inv.add(Entry::file(
                FileId::from("file-id"),
                "other".to_string(),
                Some(FileId::from(ROOT_ID)),
            )),
            Err(Error::DuplicateFileId(_))
        ));
        assert!(matches!(
            inv.add(Entry::file(
                FileId::from("new-id"),
                "child".to_string(),
                Some(FileId::from("file-id")),
            )),
            Err(Error::ParentNotDirectory(_))
        ));
    }

    #[test]
    fn test_apply_delta() {
        let mut inv = sample();
        let delta = vec![
            DeltaEntry {
                old_path: Some("dir/file".to_string()),
                new_path: Some("renamed".to_string()),
                file_id: FileId::from("file-id"),
                entry: Some(Entry::file(
                    FileId::from("file-id"),
                    "renamed".to_string(),
                    Some(FileId::from(ROOT_ID)),
                )),
            },
            DeltaEntry {
                old_path: Some("dir".to_string()),
                new_path: None,
                file_id: FileId::from("dir-id"),
                entry: None,
            },
        ];
        inv.apply_delta(delta).unwrap();
        assert!(!inv.has_id(&FileId::from("dir-id")));
        assert_eq!(inv.id2path(&FileId::from("file-id")).unwrap(), "renamed");
    }
}
