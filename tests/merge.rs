//! Merge scenarios: three-way, criss-cross LCA and history-aware text
//! merging, end to end against a working tree.

use heddle::merge::{
    HookOutcome, MergeEngine, MergeError, MergeHookParams, MergeHooks, Merger, PerFileMerger,
    TextMergeStrategy,
};
use heddle::repository::Repository;
use heddle::transform::TreeTransform;
use heddle::tree::{RevisionTree, Tree, WorkingTree};
use heddle::{FileId, RevisionId};

fn rev(name: &str) -> RevisionId {
    RevisionId::from(name)
}

fn fid(name: &str) -> FileId {
    FileId::from(name)
}

fn working_tree() -> (tempfile::TempDir, WorkingTree) {
    let dir = tempfile::tempdir().unwrap();
    let wt = WorkingTree::create(dir.path()).unwrap();
    (dir, wt)
}

/// Scenario: OTHER renames a file and edits it, THIS edits it too.  The
/// content conflicts but the rename goes through: only one side renamed.
#[test]
fn test_rename_with_content_conflict() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "a", b"x\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "b", b"x\ny\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("a", b"X\n").unwrap();
    wt.add("a", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();

    // no path conflict: only OTHER renamed; one text conflict on content
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].type_name(), "text conflict");
    assert_eq!(conflicts[0].path(), "b");
    assert_eq!(conflicts[0].file_id(), Some(&fid("f-id")));
    // the file ended up at OTHER's name
    assert_eq!(wt.path2id("b"), Some(fid("f-id")));
    assert_eq!(wt.path2id("a"), None);
    let merged = std::fs::read(wt.abspath("b")).unwrap();
    let text = String::from_utf8_lossy(&merged);
    assert!(text.contains("<<<<<<< TREE"), "got: {}", text);
    assert!(text.contains(">>>>>>> MERGE-SOURCE"));
    // auxiliary files for all three versions
    assert_eq!(std::fs::read(wt.abspath("b.THIS")).unwrap(), b"X\n".to_vec());
    assert_eq!(
        std::fs::read(wt.abspath("b.OTHER")).unwrap(),
        b"x\ny\n".to_vec()
    );
    assert_eq!(std::fs::read(wt.abspath("b.BASE")).unwrap(), b"x\n".to_vec());
}

#[test]
fn test_clean_merge_other_wins() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"old\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"new\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"old\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty());
    assert_eq!(std::fs::read(wt.abspath("file")).unwrap(), b"new\n".to_vec());
}

/// Property 9: with three-way agreement (base == other) THIS is kept with
/// zero side effects.
#[test]
fn test_this_only_change_untouched() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"same\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"same\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"local edit\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty());
    assert_eq!(
        std::fs::read(wt.abspath("file")).unwrap(),
        b"local edit\n".to_vec()
    );
}

#[test]
fn test_other_adds_and_deletes() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("gone-id", "goner", b"bye\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("added-id", "added", b"hello\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("goner", b"bye\n").unwrap();
    wt.add("goner", "gone-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty(), "{:?}", conflicts);
    assert_eq!(wt.path2id("added"), Some(fid("added-id")));
    assert_eq!(wt.path2id("goner"), None);
    assert!(!wt.abspath("goner").exists());
}

#[test]
fn test_separated_edits_merge_cleanly() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"a\nb\nc\nd\ne\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"a\nb\nc\nd\nE\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"A\nb\nc\nd\ne\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty());
    assert_eq!(
        std::fs::read(wt.abspath("file")).unwrap(),
        b"A\nb\nc\nd\nE\n".to_vec()
    );
}

fn criss_cross_repo() -> Repository {
    // base -- x1 --- tip-this (x1, x2)
    //      \      X
    //       - x2 --- tip-other (x2, x1)
    let mut repo = Repository::new();

    let mut base = RevisionTree::new(rev("base"));
    base.add_file("name-id", "orig", b"same\n", false);
    base.add_file("text-id", "text", b"m\n", false);
    repo.add_revision(&rev("base"), &[], base);

    let mut x1 = RevisionTree::new(rev("x1"));
    x1.add_file("name-id", "foo", b"same\n", false);
    x1.add_file("text-id", "text", b"one\n", false);
    repo.add_revision(&rev("x1"), &[rev("base")], x1);

    let mut x2 = RevisionTree::new(rev("x2"));
    x2.add_file("name-id", "bar", b"same\n", false);
    x2.add_file("text-id", "text", b"two\n", false);
    repo.add_revision(&rev("x2"), &[rev("base")], x2);

    // THIS kept x1's resolutions; OTHER renamed past both LCAs but kept
    // x2's text
    let mut tip_this = RevisionTree::new(rev("tip-this"));
    tip_this.add_file("name-id", "foo", b"same\n", false);
    tip_this.add_file("text-id", "text", b"one\n", false);
    repo.add_revision(&rev("tip-this"), &[rev("x1"), rev("x2")], tip_this);

    let mut tip_other = RevisionTree::new(rev("tip-other"));
    tip_other.add_file("name-id", "newname", b"same\n", false);
    tip_other.add_file("text-id", "text", b"two\n", false);
    repo.add_revision(&rev("tip-other"), &[rev("x2"), rev("x1")], tip_other);

    repo
}

/// Scenario: criss-cross ancestry uses the unique LCA as base, keeps the
/// LCA trees, and resolves scalars with the multi-way rule.
#[test]
fn test_criss_cross_lca_merge() {
    let repo = criss_cross_repo();
    let (_dir, wt) = working_tree();
    // working tree mirrors tip-this
    wt.put_file_bytes("foo", b"same\n").unwrap();
    wt.add("foo", "name-id").unwrap();
    wt.put_file_bytes("text", b"one\n").unwrap();
    wt.add("text", "text-id").unwrap();
    wt.set_entry_revision(&fid("name-id"), &rev("x1"));
    wt.set_entry_revision(&fid("text-id"), &rev("x1"));
    wt.set_last_revision(rev("tip-this"));

    let mut merger = Merger::from_revision_ids(&repo, &wt, &rev("tip-other")).unwrap();
    merger.find_base().unwrap();
    assert!(merger.is_criss_cross());
    assert_eq!(merger.base_rev_id(), Some(&rev("base")));

    let hooks = MergeHooks::new();
    let mut engine = merger.make_merger(TextMergeStrategy::Merge3, &hooks).unwrap();
    let conflicts = engine.do_merge().unwrap();

    // the rename: THIS sits on an LCA value, OTHER superseded both, so
    // OTHER wins without a conflict
    assert_eq!(wt.path2id("newname"), Some(fid("name-id")));
    // the text: each side matches a different LCA, so content conflicts
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].type_name(), "text conflict");
    assert_eq!(conflicts[0].path(), "text");
    let text = std::fs::read(wt.abspath("text")).unwrap();
    let text = String::from_utf8_lossy(&text);
    assert!(text.contains("one"));
    assert!(text.contains("two"));
}

#[test]
fn test_unrelated_branches_rejected() {
    let mut repo = Repository::new();
    repo.add_revision(&rev("left"), &[], RevisionTree::new(rev("left")));
    repo.add_revision(&rev("right"), &[], RevisionTree::new(rev("right")));
    let (_dir, wt) = working_tree();
    wt.set_last_revision(rev("left"));
    let mut merger = Merger::from_revision_ids(&repo, &wt, &rev("right")).unwrap();
    assert!(matches!(
        merger.find_base(),
        Err(MergeError::UnrelatedBranches)
    ));
}

#[test]
fn test_merge_into_empty_basis_uses_null_base() {
    let mut repo = Repository::new();
    let mut tree = RevisionTree::new(rev("r1"));
    tree.add_file("f-id", "file", b"contents\n", false);
    repo.add_revision(&rev("r1"), &[], tree);
    let (_dir, wt) = working_tree();
    // no last revision: merging into an empty branch
    let mut merger = Merger::from_revision_ids(&repo, &wt, &rev("r1")).unwrap();
    merger.find_base().unwrap();
    assert_eq!(merger.base_rev_id(), Some(&RevisionId::null()));
}

fn weave_repo() -> Repository {
    let mut repo = Repository::new();
    let base_text: &[u8] = b"a\nb\nz\nc\n";
    let this_text: &[u8] = b"a\nB\nz\nc\n";
    let other_text: &[u8] = b"a\nb\nz\nC\n";

    let mut base = RevisionTree::new(rev("r1"));
    base.add_file("f-id", "file", base_text, false);
    repo.add_revision(&rev("r1"), &[], base);
    let mut this_tree = RevisionTree::new(rev("r2"));
    this_tree.add_file("f-id", "file", this_text, false);
    repo.add_revision(&rev("r2"), &[rev("r1")], this_tree);
    let mut other = RevisionTree::new(rev("r3"));
    other.add_file("f-id", "file", other_text, false);
    repo.add_revision(&rev("r3"), &[rev("r1")], other);

    let lines = |text: &[u8]| -> Vec<Vec<u8>> {
        heddle_osutils::split_lines(text)
            .map(|l| l.into_owned())
            .collect()
    };
    repo.add_file_version(&fid("f-id"), &rev("r1"), &[], &lines(base_text))
        .unwrap();
    repo.add_file_version(&fid("f-id"), &rev("r2"), &[rev("r1")], &lines(this_text))
        .unwrap();
    repo.add_file_version(&fid("f-id"), &rev("r3"), &[rev("r1")], &lines(other_text))
        .unwrap();
    repo
}

#[test]
fn test_weave_merge_strategy() {
    let repo = weave_repo();
    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"a\nB\nz\nc\n").unwrap();
    wt.add("file", "f-id").unwrap();
    wt.set_entry_revision(&fid("f-id"), &rev("r2"));
    wt.set_last_revision(rev("r2"));

    let mut merger = Merger::from_revision_ids(&repo, &wt, &rev("r3")).unwrap();
    merger.find_base().unwrap();
    assert_eq!(merger.base_rev_id(), Some(&rev("r1")));
    let hooks = MergeHooks::new();
    let mut engine = merger.make_merger(TextMergeStrategy::Weave, &hooks).unwrap();
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty(), "{:?}", conflicts);
    assert_eq!(
        std::fs::read(wt.abspath("file")).unwrap(),
        b"a\nB\nz\nC\n".to_vec()
    );
}

#[test]
fn test_lca_merge_strategy() {
    let repo = weave_repo();
    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"a\nB\nz\nc\n").unwrap();
    wt.add("file", "f-id").unwrap();
    wt.set_entry_revision(&fid("f-id"), &rev("r2"));
    wt.set_last_revision(rev("r2"));

    let mut merger = Merger::from_revision_ids(&repo, &wt, &rev("r3")).unwrap();
    merger.find_base().unwrap();
    let hooks = MergeHooks::new();
    let mut engine = merger.make_merger(TextMergeStrategy::Lca, &hooks).unwrap();
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty(), "{:?}", conflicts);
    assert_eq!(
        std::fs::read(wt.abspath("file")).unwrap(),
        b"a\nB\nz\nC\n".to_vec()
    );
}

#[test]
fn test_history_based_merge_refuses_reverse_cherrypick() {
    let repo = weave_repo();
    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"a\nB\nz\nc\n").unwrap();
    wt.add("file", "f-id").unwrap();
    wt.set_last_revision(rev("r2"));

    let mut merger = Merger::from_revision_ids(&repo, &wt, &rev("r3")).unwrap();
    // force a base that is not an ancestor of OTHER
    merger.set_base_revision(&rev("r2")).unwrap();
    let hooks = MergeHooks::new();
    assert!(matches!(
        merger.make_merger(TextMergeStrategy::Weave, &hooks),
        Err(MergeError::CannotReverseCherrypick)
    ));
    // the plain three-way merger accepts it as a cherrypick
    assert!(merger.make_merger(TextMergeStrategy::Merge3, &hooks).is_ok());
}

#[test]
fn test_show_base_marker() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"base\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"theirs\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"ours\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    engine.show_base = true;
    let conflicts = engine.do_merge().unwrap();
    assert_eq!(conflicts.len(), 1);
    let text = std::fs::read(wt.abspath("file")).unwrap();
    let text = String::from_utf8_lossy(&text);
    assert!(text.contains("||||||| BASE-REVISION"), "got: {}", text);
    assert!(text.contains("base\n"));
}

#[test]
fn test_diff3_strategy() {
    if std::process::Command::new("diff3")
        .arg("--version")
        .output()
        .is_err()
    {
        // no diff3 on this system
        return;
    }
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"a\nb\nc\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"a\nb\nC\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"A\nb\nc\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    engine.strategy = TextMergeStrategy::Diff3;
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty(), "{:?}", conflicts);
    assert_eq!(
        std::fs::read(wt.abspath("file")).unwrap(),
        b"A\nb\nC\n".to_vec()
    );
}

struct UppercaseMerger;

impl PerFileMerger for UppercaseMerger {
    fn merge_contents(&mut self, params: &MergeHookParams<'_>) -> Result<HookOutcome, MergeError> {
        if !params.is_file_merge() {
            return Ok(HookOutcome::NotApplicable);
        }
        // only claim the file both sides edited
        if params.this_lines() == params.other_lines() {
            return Ok(HookOutcome::NotApplicable);
        }
        let merged = params
            .this_lines()
            .iter()
            .map(|l| l.to_ascii_uppercase())
            .collect();
        Ok(HookOutcome::Success(merged))
    }
}

#[test]
fn test_merge_file_content_hook_takes_precedence() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"base\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"other\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"mine\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let mut hooks = MergeHooks::new();
    hooks.add_merge_file_content(|| Box::new(UppercaseMerger));
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty());
    assert_eq!(std::fs::read(wt.abspath("file")).unwrap(), b"MINE\n".to_vec());
}

#[test]
fn test_executable_bit_merges() {
    if !heddle_osutils::file::supports_executable() {
        return;
    }
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"x\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"x\n", true);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"x\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty(), "{:?}", conflicts);
    assert!(wt.is_executable(&fid("f-id")));
}

#[test]
fn test_preview_merge_leaves_tree_alone() {
    let mut base = RevisionTree::new(rev("base"));
    base.add_file("f-id", "file", b"old\n", false);
    let mut other = RevisionTree::new(rev("other"));
    other.add_file("f-id", "file", b"new\n", false);

    let (_dir, wt) = working_tree();
    wt.put_file_bytes("file", b"old\n").unwrap();
    wt.add("file", "f-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let mut tt: TreeTransform = engine.make_preview_transform().unwrap();
    let preview = tt.get_preview_tree().unwrap();
    assert_eq!(
        preview.get_file_text(&fid("f-id")).unwrap(),
        b"new\n".to_vec()
    );
    // the working tree itself is untouched
    assert_eq!(std::fs::read(wt.abspath("file")).unwrap(), b"old\n".to_vec());
}

#[test]
fn test_symlink_target_merge() {
    if !heddle_osutils::file::supports_symlinks() {
        return;
    }
    let mut base = RevisionTree::new(rev("base"));
    base.add_symlink("l-id", "link", "old-target");
    let mut other = RevisionTree::new(rev("other"));
    other.add_symlink("l-id", "link", "new-target");

    let (_dir, wt) = working_tree();
    wt.make_symlink("link", "old-target").unwrap();
    wt.add("link", "l-id").unwrap();

    let hooks = MergeHooks::new();
    let mut engine = MergeEngine::new(&wt, &base, &other, &hooks);
    let conflicts = engine.do_merge().unwrap();
    assert!(conflicts.is_empty(), "{:?}", conflicts);
    assert_eq!(
        std::fs::read_link(wt.abspath("link")).unwrap(),
        std::path::PathBuf::from("new-target")
    );
}
