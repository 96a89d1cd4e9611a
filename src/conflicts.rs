//! Cooked conflicts: the final, path-addressed form surfaced to callers.
//!
//! Raw conflicts inside a transform refer to trans-ids; cooking resolves
//! them to final paths and file ids so they stay meaningful after the
//! transform is gone.

use heddle_bazaar::FileId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The two sides want different paths for the same file.
    Path {
        path: String,
        conflict_path: String,
        file_id: Option<FileId>,
    },
    /// Non-text contents changed on both sides; `.BASE`/`.THIS`/`.OTHER`
    /// siblings were left next to `path`.
    Contents {
        path: String,
        file_id: Option<FileId>,
    },
    /// The text merge left markers in the file.
    Text {
        path: String,
        file_id: Option<FileId>,
    },
    /// Two entries want the same name in one directory.
    Duplicate {
        action: &'static str,
        path: String,
        conflict_path: String,
        file_id: Option<FileId>,
    },
    /// A new entry claims a file id that is still in the tree.
    DuplicateId {
        action: &'static str,
        path: String,
        conflict_path: String,
        file_id: Option<FileId>,
    },
    /// A reparent cycle had to be broken.
    ParentLoop {
        action: &'static str,
        path: String,
        conflict_path: String,
        file_id: Option<FileId>,
    },
    /// A child's parent directory has no contents in the result.
    MissingParent {
        action: &'static str,
        path: String,
        file_id: Option<FileId>,
    },
    /// A versioned child sits under an unversioned parent.
    UnversionedParent {
        action: &'static str,
        path: String,
        file_id: Option<FileId>,
    },
    /// A parent in the result is not a directory.
    NonDirectoryParent {
        action: &'static str,
        path: String,
        file_id: Option<FileId>,
    },
    /// A directory deletion was cancelled because children remain.
    DeletingParent {
        action: &'static str,
        path: String,
        file_id: Option<FileId>,
    },
}

impl Conflict {
    pub fn path(&self) -> &str {
        match self {
            Conflict::Path { path, .. }
            | Conflict::Contents { path, .. }
            | Conflict::Text { path, .. }
            | Conflict::Duplicate { path, .. }
            | Conflict::DuplicateId { path, .. }
            | Conflict::ParentLoop { path, .. }
            | Conflict::MissingParent { path, .. }
            | Conflict::UnversionedParent { path, .. }
            | Conflict::NonDirectoryParent { path, .. }
            | Conflict::DeletingParent { path, .. } => path,
        }
    }

    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            Conflict::Path { file_id, .. }
            | Conflict::Contents { file_id, .. }
            | Conflict::Text { file_id, .. }
            | Conflict::Duplicate { file_id, .. }
            | Conflict::DuplicateId { file_id, .. }
            | Conflict::ParentLoop { file_id, .. }
            | Conflict::MissingParent { file_id, .. }
            | Conflict::UnversionedParent { file_id, .. }
            | Conflict::NonDirectoryParent { file_id, .. }
            | Conflict::DeletingParent { file_id, .. } => file_id.as_ref(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Conflict::Path { .. } => "path conflict",
            Conflict::Contents { .. } => "contents conflict",
            Conflict::Text { .. } => "text conflict",
            Conflict::Duplicate { .. } => "duplicate",
            Conflict::DuplicateId { .. } => "duplicate id",
            Conflict::ParentLoop { .. } => "parent loop",
            Conflict::MissingParent { .. } => "missing parent",
            Conflict::UnversionedParent { .. } => "unversioned parent",
            Conflict::NonDirectoryParent { .. } => "non-directory parent",
            Conflict::DeletingParent { .. } => "deleting parent",
        }
    }

    /// Conflict lists are reported ordered by path, then kind.
    pub fn sort_key(&self) -> (String, &'static str) {
        (self.path().to_string(), self.type_name())
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Conflict::Path {
                path,
                conflict_path,
                ..
            } => write!(f, "Path conflict: {} / {}", path, conflict_path),
            Conflict::Contents { path, .. } => {
                write!(f, "Contents conflict in {}", path)
            }
            Conflict::Text { path, .. } => write!(f, "Text conflict in {}", path),
            Conflict::Duplicate {
                action,
                path,
                conflict_path,
                ..
            } => write!(f, "Conflict adding file {}. {} {}.", conflict_path, action, path),
            Conflict::DuplicateId {
                action,
                path,
                conflict_path,
                ..
            } => write!(
                f,
                "Conflict adding id to {}. {} {}.",
                conflict_path, action, path
            ),
            Conflict::ParentLoop {
                action,
                path,
                conflict_path,
                ..
            } => write!(
                f,
                "Conflict moving {} into {}. {}.",
                path, conflict_path, action
            ),
            Conflict::MissingParent { action, path, .. } => {
                write!(f, "Conflict adding files to {}. {}.", path, action)
            }
            Conflict::UnversionedParent { action, path, .. } => write!(
                f,
                "Conflict because {} is not versioned, but has versioned children. {}.",
                path, action
            ),
            Conflict::NonDirectoryParent { action, path, .. } => write!(
                f,
                "Conflict: {} is not a directory, but has files in it. {}.",
                path, action
            ),
            Conflict::DeletingParent { action, path, .. } => write!(
                f,
                "Conflict: can't delete {} because it is not empty. {}.",
                path, action
            ),
        }
    }
}

/// Sort cooked conflicts into their reporting order.
pub fn sort_conflicts(conflicts: &mut Vec<Conflict>) {
    conflicts.sort_by_key(|c| c.sort_key());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_by_path() {
        let mut conflicts = vec![
            Conflict::Text {
                path: "b".to_string(),
                file_id: None,
            },
            Conflict::Text {
                path: "a".to_string(),
                file_id: None,
            },
        ];
        sort_conflicts(&mut conflicts);
        assert_eq!(conflicts[0].path(), "a");
    }
}
