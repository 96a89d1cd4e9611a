//! Annotation propagation.
//!
//! Given the annotated texts of a revision's parents and the new text of the
//! revision itself, work out a per-line origin for the new text.  Matched
//! lines keep the origin a parent gave them; fresh lines are tagged with the
//! new revision.  When the left and right parent disagree about a line, a
//! heads oracle decides which origin supersedes the other.

use similar::{capture_diff_slices, Algorithm, DiffOp};
use std::collections::HashSet;
use std::hash::Hash;

/// An annotated line: the revision that introduced it, and the raw bytes.
pub type AnnotatedLine<K> = (K, Vec<u8>);

/// Resolves ancestry disputes between two line origins.
///
/// `heads` returns the subset of the given ids that is not an ancestor of
/// another one of them.  `cache` lets the annotator memoize an answer it has
/// derived itself (the tip dominates both contested origins); providers that
/// do not memoize can ignore it.
pub trait HeadsProvider<K> {
    fn heads(&self, keys: &[K]) -> Vec<K>;
    fn cache(&self, _keys: &[K], _heads: &[K]) {}
}

/// Matching blocks between two sequences, patience style.
///
/// Returns `(left_start, right_start, length)` triples followed by the
/// conventional zero-length end sentinel `(left_len, right_len, 0)`.
pub fn matching_blocks<T: Eq + Hash + Ord>(
    left: &[T],
    right: &[T],
) -> Vec<(usize, usize, usize)> {
    let mut blocks: Vec<(usize, usize, usize)> =
        capture_diff_slices(Algorithm::Patience, left, right)
            .into_iter()
            .filter_map(|op| match op {
                DiffOp::Equal {
                    old_index,
                    new_index,
                    len,
                } => Some((old_index, new_index, len)),
                _ => None,
            })
            .collect();
    blocks.push((left.len(), right.len(), 0));
    blocks
}

/// Create a new annotated version from new lines and parent annotations.
///
/// `left_matching_blocks` is an optional hint about which areas are common
/// between the text and its left-hand parent, in `matching_blocks` format.
/// Without a `heads_provider`, ancestry disputes resolve to `new_revision_id`.
pub fn reannotate<K: Clone + Eq + Hash + Ord>(
    parents_lines: &[Vec<AnnotatedLine<K>>],
    new_lines: &[Vec<u8>],
    new_revision_id: &K,
    left_matching_blocks: Option<&[(usize, usize, usize)]>,
    heads_provider: Option<&dyn HeadsProvider<K>>,
) -> Vec<AnnotatedLine<K>> {
    match parents_lines.len() {
        0 => new_lines
            .iter()
            .map(|line| (new_revision_id.clone(), line.clone()))
            .collect(),
        1 => reannotate_one(
            &parents_lines[0],
            new_lines,
            new_revision_id,
            left_matching_blocks,
        ),
        2 => {
            let left = reannotate_one(
                &parents_lines[0],
                new_lines,
                new_revision_id,
                left_matching_blocks,
            );
            reannotate_annotated(
                &parents_lines[1],
                new_lines,
                new_revision_id,
                left,
                heads_provider,
            )
        }
        _ => {
            let mut reannotations = vec![reannotate_one(
                &parents_lines[0],
                new_lines,
                new_revision_id,
                left_matching_blocks,
            )];
            reannotations.extend(
                parents_lines[1..]
                    .iter()
                    .map(|p| reannotate_one(p, new_lines, new_revision_id, None)),
            );
            let mut lines = Vec::with_capacity(new_lines.len());
            for idx in 0..new_lines.len() {
                let mut origins: HashSet<&K> =
                    reannotations.iter().map(|anno| &anno[idx].0).collect();
                if origins.len() == 1 {
                    // all parents agree
                    lines.push(reannotations[0][idx].clone());
                    continue;
                }
                let line = reannotations[0][idx].1.clone();
                if origins.len() == 2 && origins.contains(new_revision_id) {
                    origins.remove(new_revision_id);
                }
                if origins.len() == 1 {
                    lines.push(((*origins.iter().next().unwrap()).clone(), line));
                } else {
                    lines.push((new_revision_id.clone(), line));
                }
            }
            lines
        }
    }
}

/// Annotate against a single parent: copy annotations through matched
/// blocks, tag everything else with the new revision.
fn reannotate_one<K: Clone + Eq + Hash + Ord>(
    parent_lines: &[AnnotatedLine<K>],
    new_lines: &[Vec<u8>],
    new_revision_id: &K,
    matching: Option<&[(usize, usize, usize)]>,
) -> Vec<AnnotatedLine<K>> {
    let computed;
    let blocks = match matching {
        Some(blocks) => blocks,
        None => {
            let plain_parent: Vec<&[u8]> =
                parent_lines.iter().map(|(_, l)| l.as_slice()).collect();
            let plain_new: Vec<&[u8]> = new_lines.iter().map(|l| l.as_slice()).collect();
            computed = matching_blocks(&plain_parent, &plain_new);
            &computed
        }
    };
    let mut lines = Vec::with_capacity(new_lines.len());
    let mut new_cur = 0;
    for &(i, j, n) in blocks {
        for line in &new_lines[new_cur..j] {
            lines.push((new_revision_id.clone(), line.clone()));
        }
        lines.extend_from_slice(&parent_lines[i..i + n]);
        new_cur = j + n;
    }
    lines
}

/// Update annotations derived from the left parent with the right parent's
/// view of the text.
fn reannotate_annotated<K: Clone + Eq + Hash + Ord>(
    right_parent_lines: &[AnnotatedLine<K>],
    new_lines: &[Vec<u8>],
    new_revision_id: &K,
    annotated_lines: Vec<AnnotatedLine<K>>,
    heads_provider: Option<&dyn HeadsProvider<K>>,
) -> Vec<AnnotatedLine<K>> {
    assert_eq!(
        new_lines.len(),
        annotated_lines.len(),
        "mismatched new_lines and annotated_lines"
    );
    // Compare the left-annotated lines with the right parent's annotated
    // lines; lines unchanged on both sides match here with identical origins
    // and need no further work.  Only the gaps between matches have to be
    // reconciled on raw text.
    let mut lines: Vec<AnnotatedLine<K>> = Vec::with_capacity(new_lines.len());
    let mut last_right_idx = 0;
    let mut last_left_idx = 0;
    for (right_idx, left_idx, match_len) in
        matching_blocks(right_parent_lines, &annotated_lines)
    {
        if last_right_idx == right_idx || last_left_idx == left_idx {
            // one side is empty, so the gap is a pure insertion
            lines.extend_from_slice(&annotated_lines[last_left_idx..left_idx]);
        } else {
            find_matching_unannotated_lines(
                &mut lines,
                new_lines,
                &annotated_lines,
                last_left_idx,
                left_idx,
                right_parent_lines,
                last_right_idx,
                right_idx,
                heads_provider,
                new_revision_id,
            );
        }
        last_right_idx = right_idx + match_len;
        last_left_idx = left_idx + match_len;
        // left and right agree on this range
        lines.extend_from_slice(&annotated_lines[left_idx..left_idx + match_len]);
    }
    lines
}

/// Reconcile a mismatched region against the right parent's lines.
#[allow(clippy::too_many_arguments)]
fn find_matching_unannotated_lines<K: Clone + Eq + Hash + Ord>(
    output_lines: &mut Vec<AnnotatedLine<K>>,
    plain_child_lines: &[Vec<u8>],
    child_lines: &[AnnotatedLine<K>],
    start_child: usize,
    end_child: usize,
    right_lines: &[AnnotatedLine<K>],
    start_right: usize,
    end_right: usize,
    heads_provider: Option<&dyn HeadsProvider<K>>,
    revision_id: &K,
) {
    let plain_right_subset: Vec<&[u8]> = right_lines[start_right..end_right]
        .iter()
        .map(|(_, l)| l.as_slice())
        .collect();
    let plain_child_subset: Vec<&[u8]> = plain_child_lines[start_child..end_child]
        .iter()
        .map(|l| l.as_slice())
        .collect();
    let match_blocks = matching_blocks(&plain_right_subset, &plain_child_subset);

    let mut last_child_idx = 0;
    for (right_idx, child_idx, match_len) in match_blocks {
        if child_idx > last_child_idx {
            // unmatched lines keep their left annotation
            output_lines.extend_from_slice(
                &child_lines[start_child + last_child_idx..start_child + child_idx],
            );
        }
        for offset in 0..match_len {
            let left = &child_lines[start_child + child_idx + offset];
            let right = &right_lines[start_right + right_idx + offset];
            if left.0 == right.0 {
                output_lines.push(left.clone());
            } else if &left.0 == revision_id {
                // the left parent marked this as unmatched, so the right
                // parent gets to claim it
                output_lines.push(right.clone());
            } else {
                match heads_provider {
                    None => output_lines.push((revision_id.clone(), left.1.clone())),
                    Some(provider) => {
                        let heads = provider.heads(&[left.0.clone(), right.0.clone()]);
                        if heads.len() == 1 {
                            output_lines.push((heads[0].clone(), left.1.clone()));
                        } else {
                            // both sides claim different origins; the tip
                            // supersedes them both, remember that
                            output_lines.push((revision_id.clone(), left.1.clone()));
                            provider.cache(
                                &[revision_id.clone(), left.0.clone()],
                                std::slice::from_ref(revision_id),
                            );
                            provider.cache(
                                &[revision_id.clone(), right.0.clone()],
                                std::slice::from_ref(revision_id),
                            );
                        }
                    }
                }
            }
        }
        last_child_idx = child_idx + match_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<Vec<u8>> {
        texts.iter().map(|t| t.as_bytes().to_vec()).collect()
    }

    fn annotated(pairs: &[(&str, &str)]) -> Vec<AnnotatedLine<String>> {
        pairs
            .iter()
            .map(|(o, t)| (o.to_string(), t.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_no_parents() {
        let result = reannotate::<String>(
            &[],
            &lines(&["a\n", "b\n"]),
            &"rev".to_string(),
            None,
            None,
        );
        assert_eq!(result, annotated(&[("rev", "a\n"), ("rev", "b\n")]));
    }

    #[test]
    fn test_single_parent_insert() {
        let parent = annotated(&[("r1", "a\n"), ("r1", "c\n")]);
        let result = reannotate(
            &[parent],
            &lines(&["a\n", "b\n", "c\n"]),
            &"r2".to_string(),
            None,
            None,
        );
        assert_eq!(
            result,
            annotated(&[("r1", "a\n"), ("r2", "b\n"), ("r1", "c\n")])
        );
    }

    #[test]
    fn test_single_parent_with_matching_hint() {
        let parent = annotated(&[("r1", "a\n"), ("r1", "b\n")]);
        let result = reannotate(
            &[parent],
            &lines(&["a\n", "b\n"]),
            &"r2".to_string(),
            Some(&[(0, 0, 2), (2, 2, 0)]),
            None,
        );
        assert_eq!(result, annotated(&[("r1", "a\n"), ("r1", "b\n")]));
    }

    #[test]
    fn test_two_parents_agree() {
        let left = annotated(&[("r1", "a\n"), ("r1", "b\n")]);
        let right = annotated(&[("r1", "a\n"), ("r1", "b\n")]);
        let result = reannotate(
            &[left, right],
            &lines(&["a\n", "b\n"]),
            &"r3".to_string(),
            None,
            None,
        );
        assert_eq!(result, annotated(&[("r1", "a\n"), ("r1", "b\n")]));
    }

    #[test]
    fn test_right_parent_claims_unmatched() {
        // the left parent lacks 'b\n' so it was tagged with the tip; the
        // right parent knows its true origin
        let left = annotated(&[("r1", "a\n")]);
        let right = annotated(&[("r1", "a\n"), ("r2", "b\n")]);
        let result = reannotate(
            &[left, right],
            &lines(&["a\n", "b\n"]),
            &"r3".to_string(),
            None,
            None,
        );
        assert_eq!(result, annotated(&[("r1", "a\n"), ("r2", "b\n")]));
    }

    struct FixedHeads(String);

    impl HeadsProvider<String> for FixedHeads {
        fn heads(&self, _keys: &[String]) -> Vec<String> {
            vec![self.0.clone()]
        }
    }

    #[test]
    fn test_disputed_line_resolved_by_heads() {
        let left = annotated(&[("r1", "a\n"), ("rA", "x\n")]);
        let right = annotated(&[("r1", "a\n"), ("rB", "x\n")]);
        let provider = FixedHeads("rA".to_string());
        let result = reannotate(
            &[left, right],
            &lines(&["a\n", "x\n"]),
            &"tip".to_string(),
            None,
            Some(&provider),
        );
        assert_eq!(result, annotated(&[("r1", "a\n"), ("rA", "x\n")]));
    }

    #[test]
    fn test_disputed_line_without_provider_goes_to_tip() {
        let left = annotated(&[("r1", "a\n"), ("rA", "x\n")]);
        let right = annotated(&[("r1", "a\n"), ("rB", "x\n")]);
        let result = reannotate(
            &[left, right],
            &lines(&["a\n", "x\n"]),
            &"tip".to_string(),
            None,
            None,
        );
        assert_eq!(result, annotated(&[("r1", "a\n"), ("tip", "x\n")]));
    }

    #[test]
    fn test_three_parents_tip_dissents() {
        // two parents agree on r1 and the third never saw the line, so the
        // agreed origin wins over the tip tag
        let p1 = annotated(&[("r1", "a\n")]);
        let p2 = annotated(&[("r1", "a\n")]);
        let p3 = annotated(&[("r9", "z\n")]);
        let result = reannotate(
            &[p1, p2, p3],
            &lines(&["a\n"]),
            &"tip".to_string(),
            None,
            None,
        );
        assert_eq!(result, annotated(&[("r1", "a\n")]));
    }

    #[test]
    fn test_three_parents_real_disagreement_goes_to_tip() {
        let p1 = annotated(&[("r1", "a\n")]);
        let p2 = annotated(&[("r2", "a\n")]);
        let p3 = annotated(&[("r3", "a\n")]);
        let result = reannotate(
            &[p1, p2, p3],
            &lines(&["a\n"]),
            &"tip".to_string(),
            None,
            None,
        );
        assert_eq!(result, annotated(&[("tip", "a\n")]));
    }
}
