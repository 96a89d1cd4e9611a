//! Bazaar format storage.
//!
//! Identifiers, inventories and the weave text store, plus the merge
//! planners that read from it.

use std::fmt::{Debug, Error, Formatter};

pub mod inventory;
pub mod plan;
pub mod textmerge;
pub mod weave;
pub mod weavefile;

/// The reserved revision id naming the empty tree.
pub const NULL_REVISION: &[u8] = b"null:";

/// The reserved revision id naming the not-yet-committed tip.
pub const CURRENT_REVISION: &[u8] = b"current:";

pub fn is_valid_id(id: &[u8]) -> bool {
    if id.is_empty() {
        return false;
    }
    !id.iter()
        .any(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
}

fn check_valid(id: &[u8]) {
    if !is_valid_id(id) {
        panic!("invalid id: {:?}", String::from_utf8_lossy(id));
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Vec<u8>);

impl FileId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FileId {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<Vec<u8>> for FileId {
    fn from(v: Vec<u8>) -> Self {
        check_valid(&v);
        FileId(v)
    }
}

impl From<&[u8]> for FileId {
    fn from(v: &[u8]) -> Self {
        check_valid(v);
        FileId(v.to_vec())
    }
}

impl From<&str> for FileId {
    fn from(v: &str) -> Self {
        FileId::from(v.as_bytes())
    }
}

impl From<FileId> for Vec<u8> {
    fn from(v: FileId) -> Self {
        v.0
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId(Vec<u8>);

impl RevisionId {
    pub fn null() -> Self {
        RevisionId(NULL_REVISION.to_vec())
    }

    pub fn current() -> Self {
        RevisionId(CURRENT_REVISION.to_vec())
    }

    pub fn is_null(&self) -> bool {
        self.0 == NULL_REVISION
    }

    /// Reserved ids end with a colon and never name a stored revision.
    pub fn is_reserved(&self) -> bool {
        self.0.ends_with(b":")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for RevisionId {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<Vec<u8>> for RevisionId {
    fn from(v: Vec<u8>) -> Self {
        check_valid(&v);
        RevisionId(v)
    }
}

impl From<&[u8]> for RevisionId {
    fn from(v: &[u8]) -> Self {
        check_valid(v);
        RevisionId(v.to_vec())
    }
}

impl From<&str> for RevisionId {
    fn from(v: &str) -> Self {
        RevisionId::from(v.as_bytes())
    }
}

impl From<RevisionId> for Vec<u8> {
    fn from(v: RevisionId) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        assert!(RevisionId::null().is_reserved());
        assert!(RevisionId::current().is_reserved());
        assert!(!RevisionId::from("rev-1").is_reserved());
    }

    #[test]
    fn test_id_validity() {
        assert!(is_valid_id(b"rev-1"));
        assert!(!is_valid_id(b""));
        assert!(!is_valid_id(b"rev 1"));
        assert!(!is_valid_id(b"rev\n1"));
    }
}
