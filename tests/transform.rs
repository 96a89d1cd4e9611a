//! Tree transform scenarios against a real on-disk working tree.

use heddle::progress::SilentProgress;
use heddle::transform::{
    cook_conflicts, resolve_conflicts, OrphanPolicy, RawConflict, TransformError, TreeTransform,
};
use heddle::tree::{RevisionTree, Tree, WorkingTree};
use heddle::{FileId, RevisionId};
use heddle_osutils::Kind;

fn make_tree() -> (tempfile::TempDir, WorkingTree) {
    let dir = tempfile::tempdir().unwrap();
    let wt = WorkingTree::create(dir.path()).unwrap();
    (dir, wt)
}

#[test]
fn test_build_and_apply() {
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    let dir_id = tt
        .new_directory("dir", root, Some(&FileId::from("dir-id")))
        .unwrap();
    tt.new_file(
        "file",
        dir_id,
        vec![b"contents\n".to_vec()],
        Some(&FileId::from("file-id")),
        None,
    )
    .unwrap();
    let results = tt.apply(false, &SilentProgress).unwrap();
    assert!(results.rename_count >= 1);
    assert_eq!(wt.path2id("dir/file"), Some(FileId::from("file-id")));
    assert_eq!(
        std::fs::read(wt.abspath("dir/file")).unwrap(),
        b"contents\n".to_vec()
    );
    // no residue under the control directory
    assert!(!wt.control_path("limbo").exists());
    assert!(!wt.control_path("pending-deletion").exists());
}

#[test]
fn test_direct_limbo_placement_minimizes_renames() {
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    let parent = tt
        .new_directory("parent", root, Some(&FileId::from("parent-id")))
        .unwrap();
    // children created after the parent stage directly inside its limbo
    // directory, so only the parent needs a final rename
    for i in 0..3 {
        tt.new_file(
            &format!("f{}", i),
            parent,
            vec![b"x\n".to_vec()],
            Some(&FileId::from(format!("f{}-id", i).as_bytes())),
            None,
        )
        .unwrap();
    }
    let results = tt.apply(false, &SilentProgress).unwrap();
    assert_eq!(results.rename_count, 1);
    assert!(wt.abspath("parent/f2").exists());
}

#[test]
fn test_rename_and_reparent() {
    let (_dir, wt) = make_tree();
    wt.mkdir("a").unwrap();
    wt.add("a", "a-id").unwrap();
    wt.put_file_bytes("a/b", b"b\n").unwrap();
    wt.add("a/b", "b-id").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    let a = tt.trans_id_tree_path("a");
    let b = tt.trans_id_tree_path("a/b");
    tt.adjust_path("c", root, a).unwrap();
    tt.adjust_path("d", a, b).unwrap();
    tt.apply(false, &SilentProgress).unwrap();
    assert_eq!(wt.path2id("c"), Some(FileId::from("a-id")));
    assert_eq!(wt.path2id("c/d"), Some(FileId::from("b-id")));
    assert!(!wt.abspath("a").exists());
    assert_eq!(std::fs::read(wt.abspath("c/d")).unwrap(), b"b\n".to_vec());
}

/// Scenario: a failure mid-apply rolls back every completed rename.
#[test]
fn test_failed_apply_rolls_back() {
    let (_dir, wt) = make_tree();
    wt.mkdir("a").unwrap();
    wt.add("a", "a-id").unwrap();
    wt.put_file_bytes("a/b", b"payload\n").unwrap();
    wt.add("a/b", "b-id").unwrap();
    // an unversioned obstruction at the rename target makes the second
    // apply phase fail after the first phase moved things into limbo
    wt.put_file_bytes("c", b"obstruction\n").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    let a = tt.trans_id_tree_path("a");
    let b = tt.trans_id_tree_path("a/b");
    tt.adjust_path("c", root, a).unwrap();
    tt.adjust_path("d", a, b).unwrap();
    let err = tt.apply(true, &SilentProgress).unwrap_err();
    assert!(matches!(err, TransformError::FileExists(..)));
    // the tree is back to its initial state
    assert!(wt.abspath("a").is_dir());
    assert_eq!(
        std::fs::read(wt.abspath("a/b")).unwrap(),
        b"payload\n".to_vec()
    );
    assert_eq!(
        std::fs::read(wt.abspath("c")).unwrap(),
        b"obstruction\n".to_vec()
    );
    // a subsequent finalize leaves no residue behind
    tt.finalize().unwrap();
    assert!(!wt.control_path("limbo").exists());
    assert!(!wt.control_path("pending-deletion").exists());
}

#[test]
fn test_delete_contents_deepest_first() {
    let (_dir, wt) = make_tree();
    wt.mkdir("d").unwrap();
    wt.add("d", "d-id").unwrap();
    wt.put_file_bytes("d/f", b"f\n").unwrap();
    wt.add("d/f", "f-id").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let d = tt.trans_id_tree_path("d");
    let f = tt.trans_id_tree_path("d/f");
    tt.delete_versioned(f).unwrap();
    tt.delete_versioned(d).unwrap();
    tt.apply(false, &SilentProgress).unwrap();
    assert!(!wt.abspath("d").exists());
    assert_eq!(wt.path2id("d"), None);
    assert_eq!(wt.path2id("d/f"), None);
}

/// Scenario: orphan handling under both policies.
#[test]
fn test_orphans_moved_under_move_policy() {
    let (_dir, wt) = make_tree();
    wt.mkdir("d").unwrap();
    wt.add("d", "d-id").unwrap();
    // d/f exists on disk but is not versioned
    wt.put_file_bytes("d/f", b"orphan\n").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    tt.set_orphan_policy(OrphanPolicy::Move);
    let d = tt.trans_id_tree_path("d");
    tt.delete_versioned(d).unwrap();
    let fs_conflicts = resolve_conflicts(&mut tt, None).unwrap();
    let cooked = cook_conflicts(&fs_conflicts, &mut tt).unwrap();
    assert!(cooked.is_empty());
    tt.apply(true, &SilentProgress).unwrap();
    assert!(!wt.abspath("d").exists());
    assert_eq!(
        std::fs::read(wt.abspath("bzr-orphans/f.~1~")).unwrap(),
        b"orphan\n".to_vec()
    );
}

#[test]
fn test_orphans_conflict_under_default_policy() {
    let (_dir, wt) = make_tree();
    wt.mkdir("d").unwrap();
    wt.add("d", "d-id").unwrap();
    wt.put_file_bytes("d/f", b"orphan\n").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let d = tt.trans_id_tree_path("d");
    tt.delete_versioned(d).unwrap();
    let fs_conflicts = resolve_conflicts(&mut tt, None).unwrap();
    let cooked = cook_conflicts(&fs_conflicts, &mut tt).unwrap();
    assert_eq!(cooked.len(), 1);
    assert_eq!(cooked[0].type_name(), "deleting parent");
    assert_eq!(cooked[0].path(), "d");
    tt.apply(true, &SilentProgress).unwrap();
    // the directory was kept because it still has a child
    assert!(wt.abspath("d/f").exists());
    assert_eq!(wt.path2id("d"), None);
}

#[test]
fn test_unknown_orphan_policy_falls_back() {
    assert_eq!(OrphanPolicy::by_name("move"), OrphanPolicy::Move);
    assert_eq!(OrphanPolicy::by_name("conflict"), OrphanPolicy::Conflict);
    assert_eq!(OrphanPolicy::by_name("nonsense"), OrphanPolicy::Conflict);
}

#[test]
fn test_find_conflicts_catalogue() {
    let (_dir, wt) = make_tree();
    wt.put_file_bytes("existing", b"x\n").unwrap();
    wt.add("existing", "existing-id").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    // duplicate names in one directory
    tt.new_file("dup", root, vec![b"a\n".to_vec()], Some(&FileId::from("dup1")), None)
        .unwrap();
    tt.new_file("dup", root, vec![b"b\n".to_vec()], Some(&FileId::from("dup2")), None)
        .unwrap();
    // versioning with no contents
    let empty = tt.create_path("empty", root).unwrap();
    tt.version_file(&FileId::from("empty-id"), empty).unwrap();
    // executability on a non-file
    let subdir = tt
        .new_directory("subdir", root, Some(&FileId::from("subdir-id")))
        .unwrap();
    tt.set_executability(Some(true), subdir).unwrap();
    // duplicate file id with an existing tree file
    tt.new_file(
        "other-name",
        root,
        vec![b"y\n".to_vec()],
        Some(&FileId::from("existing-id")),
        None,
    )
    .unwrap();
    // a new file under a parent with no contents
    let ghost_parent = tt.create_path("ghost", root).unwrap();
    tt.new_file("child", ghost_parent, vec![b"z\n".to_vec()], None, None)
        .unwrap();

    let conflicts = tt.find_conflicts().unwrap();
    let has = |pred: fn(&RawConflict) -> bool| conflicts.iter().any(pred);
    assert!(has(|c| matches!(c, RawConflict::Duplicate { .. })));
    assert!(has(|c| matches!(c, RawConflict::VersioningNoContents(_))));
    assert!(has(|c| matches!(c, RawConflict::NonFileExecutability(_))));
    assert!(has(|c| matches!(c, RawConflict::DuplicateId { .. })));
    assert!(has(|c| matches!(c, RawConflict::MissingParent(_))));

    // applying a malformed transform fails before touching the tree
    assert!(matches!(
        tt.apply(false, &SilentProgress),
        Err(TransformError::MalformedTransform(_))
    ));
}

#[test]
fn test_parent_loop_detected() {
    let (_dir, wt) = make_tree();
    wt.mkdir("a").unwrap();
    wt.add("a", "a-id").unwrap();
    wt.mkdir("a/b").unwrap();
    wt.add("a/b", "b-id").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let a = tt.trans_id_tree_path("a");
    let b = tt.trans_id_tree_path("a/b");
    // move a under its own child
    tt.adjust_path("a", b, a).unwrap();
    let conflicts = tt.find_conflicts().unwrap();
    assert!(conflicts
        .iter()
        .any(|c| matches!(c, RawConflict::ParentLoop(_))));
}

#[test]
fn test_unversioned_parent_conflict() {
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    // the parent is created without a file id but the child is versioned
    let parent = tt.new_directory("par", root, None).unwrap();
    tt.new_file(
        "child",
        parent,
        vec![b"x\n".to_vec()],
        Some(&FileId::from("child-id")),
        None,
    )
    .unwrap();
    let conflicts = tt.find_conflicts().unwrap();
    assert!(conflicts
        .iter()
        .any(|c| matches!(c, RawConflict::UnversionedParent(_))));
}

#[test]
fn test_existing_limbo_detected() {
    let (_dir, wt) = make_tree();
    std::fs::create_dir(wt.control_path("limbo")).unwrap();
    assert!(matches!(
        TreeTransform::new(&wt),
        Err(TransformError::ExistingLimbo(_))
    ));
    std::fs::remove_dir(wt.control_path("limbo")).unwrap();
    // and the lock was released, so a new transform works
    let tt = TreeTransform::new(&wt).unwrap();
    drop(tt);
    assert!(!wt.is_locked());
}

#[test]
fn test_cant_move_root() {
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    assert!(matches!(
        tt.adjust_path("elsewhere", root, root),
        Err(TransformError::CantMoveRoot)
    ));
}

#[test]
fn test_symlink_creation() {
    if !heddle_osutils::file::supports_symlinks() {
        return;
    }
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    tt.new_symlink("link", root, "target", Some(&FileId::from("link-id")))
        .unwrap();
    tt.apply(false, &SilentProgress).unwrap();
    assert_eq!(
        std::fs::read_link(wt.abspath("link")).unwrap(),
        std::path::PathBuf::from("target")
    );
    assert_eq!(wt.kind(&FileId::from("link-id")), Some(Kind::Symlink));
}

#[test]
fn test_executability_applied() {
    if !heddle_osutils::file::supports_executable() {
        return;
    }
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    tt.new_file(
        "script",
        root,
        vec![b"#!/bin/sh\n".to_vec()],
        Some(&FileId::from("script-id")),
        Some(true),
    )
    .unwrap();
    tt.apply(false, &SilentProgress).unwrap();
    assert!(wt.is_executable(&FileId::from("script-id")));
}

#[test]
fn test_hardlink_creation() {
    let (_dir, wt) = make_tree();
    wt.put_file_bytes("source", b"shared\n").unwrap();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    let trans_id = tt.create_path("linked", root).unwrap();
    tt.create_hardlink(&wt.abspath("source"), trans_id).unwrap();
    tt.apply(true, &SilentProgress).unwrap();
    assert_eq!(
        std::fs::read(wt.abspath("linked")).unwrap(),
        b"shared\n".to_vec()
    );
}

#[test]
fn test_tree_reference_entry() {
    let (_dir, wt) = make_tree();
    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    let sub = tt
        .new_directory("nested", root, Some(&FileId::from("nested-id")))
        .unwrap();
    tt.set_tree_reference(RevisionId::from("sub-rev"), sub)
        .unwrap();
    tt.apply(false, &SilentProgress).unwrap();
    let entry = wt.get_entry(&FileId::from("nested-id")).unwrap();
    match entry {
        heddle_bazaar::inventory::Entry::TreeReference {
            reference_revision, ..
        } => assert_eq!(reference_revision, Some(RevisionId::from("sub-rev"))),
        other => panic!("expected tree reference, got {:?}", other),
    }
}

fn base_tree() -> RevisionTree {
    let mut tree = RevisionTree::new(RevisionId::from("base-rev"));
    tree.add_dir("dir-id", "dir");
    tree.add_file("keep-id", "dir/keep", b"keep\n", false);
    tree.add_file("gone-id", "dir/gone", b"gone\n", false);
    tree
}

#[test]
fn test_preview_tree_composition() {
    let base = base_tree();
    let mut tt = TreeTransform::new_preview(&base);
    let root = tt.root();
    tt.new_file(
        "fresh",
        root,
        vec![b"fresh\n".to_vec()],
        Some(&FileId::from("fresh-id")),
        None,
    )
    .unwrap();
    let gone = tt.trans_id_tree_path("dir/gone");
    tt.delete_versioned(gone).unwrap();
    let keep = tt.trans_id_tree_path("dir/keep");
    tt.adjust_path("kept", root, keep).unwrap();

    let preview = tt.get_preview_tree().unwrap();
    assert_eq!(preview.path2id("fresh"), Some(FileId::from("fresh-id")));
    assert_eq!(
        preview.get_file_text(&FileId::from("fresh-id")).unwrap(),
        b"fresh\n".to_vec()
    );
    assert_eq!(preview.path2id("dir/gone"), None);
    assert_eq!(preview.path2id("kept"), Some(FileId::from("keep-id")));
    // untouched content is served from the base tree
    assert_eq!(
        preview.get_file_text(&FileId::from("keep-id")).unwrap(),
        b"keep\n".to_vec()
    );
    let changed: Vec<_> = preview
        .iter_changes_from_base()
        .iter()
        .map(|c| c.file_id.clone())
        .collect();
    assert!(changed.contains(&FileId::from("fresh-id")));
    assert!(changed.contains(&FileId::from("gone-id")));
    assert!(changed.contains(&FileId::from("keep-id")));
}

#[test]
fn test_preview_annotate() {
    let base = base_tree();
    let mut tt = TreeTransform::new_preview(&base);
    let keep = tt.trans_id_tree_path("dir/keep");
    tt.delete_contents(keep).unwrap();
    tt.create_file(vec![b"keep\n".to_vec(), b"new line\n".to_vec()], keep)
        .unwrap();
    let preview = tt.get_preview_tree().unwrap();
    let annotation = preview
        .annotate_iter(&FileId::from("keep-id"), &RevisionId::current())
        .unwrap();
    assert_eq!(
        annotation,
        vec![
            (RevisionId::from("base-rev"), b"keep\n".to_vec()),
            (RevisionId::current(), b"new line\n".to_vec()),
        ]
    );
}

/// Scenario: a serialized preview deserializes to an identical preview.
#[test]
fn test_serialization_round_trip() {
    let base = base_tree();
    let mut tt = TreeTransform::new_preview(&base);
    let root = tt.root();
    tt.new_file(
        "fresh",
        root,
        vec![b"fresh\n".to_vec()],
        Some(&FileId::from("fresh-id")),
        Some(true),
    )
    .unwrap();
    let keep = tt.trans_id_tree_path("dir/keep");
    tt.delete_contents(keep).unwrap();
    tt.create_file(vec![b"keep\n".to_vec(), b"more\n".to_vec()], keep)
        .unwrap();
    let gone = tt.trans_id_tree_path("dir/gone");
    tt.delete_versioned(gone).unwrap();
    if heddle_osutils::file::supports_symlinks() {
        tt.new_symlink("link", root, "target", None).unwrap();
    }

    let records = tt.serialize().unwrap();
    assert_eq!(records[0].0, vec![b"attribs".to_vec()]);

    let mut restored = TreeTransform::new_preview(&base);
    restored.deserialize(&records).unwrap();
    let original_changes = tt.iter_changes().unwrap();
    let restored_changes = restored.iter_changes().unwrap();
    assert_eq!(original_changes, restored_changes);
    // staged contents replay too, including the patch-encoded file body
    let preview = restored.get_preview_tree().unwrap();
    assert_eq!(
        preview.get_file_text(&FileId::from("keep-id")).unwrap(),
        b"keep\nmore\n".to_vec()
    );
    assert_eq!(
        preview.get_file_text(&FileId::from("fresh-id")).unwrap(),
        b"fresh\n".to_vec()
    );
}

#[test]
fn test_preview_never_touches_disk() {
    let base = base_tree();
    let mut tt = TreeTransform::new_preview(&base);
    let root = tt.root();
    tt.new_file("x", root, vec![b"x\n".to_vec()], None, None)
        .unwrap();
    assert!(matches!(
        tt.apply(true, &SilentProgress),
        Err(TransformError::NotWorkingTree)
    ));
}

#[test]
fn test_duplicate_resolution_moves_existing() {
    let (_dir, wt) = make_tree();
    wt.put_file_bytes("name", b"old\n").unwrap();
    wt.add("name", "old-id").unwrap();

    let mut tt = TreeTransform::new(&wt).unwrap();
    let root = tt.root();
    tt.new_file(
        "name",
        root,
        vec![b"new\n".to_vec()],
        Some(&FileId::from("new-id")),
        None,
    )
    .unwrap();
    let old = tt.trans_id_tree_path("name");
    tt.unversion_file(old);
    let fs_conflicts = resolve_conflicts(&mut tt, None).unwrap();
    let cooked = cook_conflicts(&fs_conflicts, &mut tt).unwrap();
    assert!(cooked
        .iter()
        .any(|c| c.type_name() == "duplicate" && c.path() == "name.moved"));
    tt.apply(true, &SilentProgress).unwrap();
    assert_eq!(
        std::fs::read(wt.abspath("name.moved")).unwrap(),
        b"old\n".to_vec()
    );
    assert_eq!(
        std::fs::read(wt.abspath("name")).unwrap(),
        b"new\n".to_vec()
    );
}
