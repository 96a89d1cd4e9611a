//! Text merging: replaying merge plans and three-way merge3.

use crate::plan::{PlanLine, PlanTag};
use heddle_annotate::matching_blocks;
use heddle_osutils::textfile::{check_text_lines, BinaryFile};

/// One structural group of merged output: either lines both sides agree
/// on, or a conflict carrying each side's lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeGroup {
    Lines(Vec<Vec<u8>>),
    Conflict(Vec<Vec<u8>>, Vec<Vec<u8>>),
}

fn struct_to_lines(
    groups: Vec<MergeGroup>,
    a_marker: &[u8],
    split_marker: &[u8],
    b_marker: &[u8],
) -> (Vec<Vec<u8>>, bool) {
    let mut lines = Vec::new();
    let mut conflicts = false;
    for group in groups {
        match group {
            MergeGroup::Lines(ls) => lines.extend(ls),
            MergeGroup::Conflict(lines_a, lines_b) => {
                conflicts = true;
                lines.push(a_marker.to_vec());
                lines.extend(lines_a);
                lines.push(split_marker.to_vec());
                lines.extend(lines_b);
                lines.push(b_marker.to_vec());
            }
        }
    }
    (lines, conflicts)
}

/// Refine a conflict group: lines common to both sides become clean
/// output, splitting the conflict around them.
fn refine_group(lines_a: Vec<Vec<u8>>, lines_b: Vec<Vec<u8>>) -> Vec<MergeGroup> {
    let blocks = matching_blocks(&lines_a, &lines_b);
    let mut result = Vec::new();
    let mut last_a = 0;
    let mut last_b = 0;
    for (ai, bi, n) in blocks {
        if last_a < ai || last_b < bi {
            result.push(MergeGroup::Conflict(
                lines_a[last_a..ai].to_vec(),
                lines_b[last_b..bi].to_vec(),
            ));
        }
        if n > 0 {
            result.push(MergeGroup::Lines(lines_a[ai..ai + n].to_vec()));
        }
        last_a = ai + n;
        last_b = bi + n;
    }
    result
}

/// Replay a merge plan into merged lines.
///
/// Lines tagged as changed on only one side win cleanly; regions changed
/// on both sides become conflicts unless the sides produced identical
/// lines.  Only `unchanged` lines resynchronize the two sides; agreement
/// on `killed-both` lines is not trusted for that.
pub struct PlanWeaveMerge {
    plan: Vec<PlanLine>,
    a_marker: Vec<u8>,
    b_marker: Vec<u8>,
}

impl PlanWeaveMerge {
    pub const SPLIT_MARKER: &'static [u8] = b"=======\n";

    pub fn new(plan: Vec<PlanLine>, a_marker: Vec<u8>, b_marker: Vec<u8>) -> Self {
        PlanWeaveMerge {
            plan,
            a_marker,
            b_marker,
        }
    }

    fn merge_struct(&self) -> Vec<MergeGroup> {
        let mut groups = Vec::new();
        let mut lines_a: Vec<Vec<u8>> = Vec::new();
        let mut lines_b: Vec<Vec<u8>> = Vec::new();
        let mut ch_a = false;
        let mut ch_b = false;

        fn flush(
            groups: &mut Vec<MergeGroup>,
            lines_a: &mut Vec<Vec<u8>>,
            lines_b: &mut Vec<Vec<u8>>,
            ch_a: &mut bool,
            ch_b: &mut bool,
        ) {
            if !lines_a.is_empty() || !lines_b.is_empty() {
                let group = if *ch_a && !*ch_b {
                    MergeGroup::Lines(std::mem::take(lines_a))
                } else if *ch_b && !*ch_a {
                    MergeGroup::Lines(std::mem::take(lines_b))
                } else if lines_a == lines_b {
                    MergeGroup::Lines(std::mem::take(lines_a))
                } else {
                    MergeGroup::Conflict(std::mem::take(lines_a), std::mem::take(lines_b))
                };
                groups.push(group);
            }
            lines_a.clear();
            lines_b.clear();
            *ch_a = false;
            *ch_b = false;
        }

        for (tag, line) in &self.plan {
            match tag {
                PlanTag::Unchanged => {
                    // resync and flush any queued changes
                    flush(&mut groups, &mut lines_a, &mut lines_b, &mut ch_a, &mut ch_b);
                    groups.push(MergeGroup::Lines(vec![line.clone()]));
                }
                PlanTag::KilledA => {
                    // killed by A, so B's text still carries it
                    ch_a = true;
                    lines_b.push(line.clone());
                }
                PlanTag::KilledB => {
                    ch_b = true;
                    lines_a.push(line.clone());
                }
                PlanTag::NewA => {
                    ch_a = true;
                    lines_a.push(line.clone());
                }
                PlanTag::NewB => {
                    ch_b = true;
                    lines_b.push(line.clone());
                }
                PlanTag::ConflictedA => {
                    ch_a = true;
                    ch_b = true;
                    lines_a.push(line.clone());
                }
                PlanTag::ConflictedB => {
                    ch_a = true;
                    ch_b = true;
                    lines_b.push(line.clone());
                }
                PlanTag::KilledBoth => {
                    // counts as a change on both sides even though the line
                    // itself is gone
                    ch_a = true;
                    ch_b = true;
                }
                PlanTag::KilledBase | PlanTag::Irrelevant | PlanTag::GhostA | PlanTag::GhostB => {}
            }
        }
        flush(&mut groups, &mut lines_a, &mut lines_b, &mut ch_a, &mut ch_b);
        groups
    }

    /// Merged lines plus a conflict flag.
    pub fn merge_lines(&self, reprocess: bool) -> (Vec<Vec<u8>>, bool) {
        let mut groups = self.merge_struct();
        if reprocess {
            groups = groups
                .into_iter()
                .flat_map(|g| match g {
                    MergeGroup::Conflict(a, b) => refine_group(a, b),
                    lines => vec![lines],
                })
                .collect();
        }
        struct_to_lines(groups, &self.a_marker, Self::SPLIT_MARKER, &self.b_marker)
    }

    /// Reconstruct the base text from the plan: everything that was in the
    /// common ancestry and not killed there.
    pub fn base_from_plan(&self) -> Vec<Vec<u8>> {
        self.plan
            .iter()
            .filter(|(tag, _)| {
                matches!(
                    tag,
                    PlanTag::Unchanged | PlanTag::KilledA | PlanTag::KilledB | PlanTag::KilledBoth
                )
            })
            .map(|(_, line)| line.clone())
            .collect()
    }
}

/// One region of three-way merged output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRegion {
    /// Lines taken from base (both sides left them alone).
    Unchanged { start: usize, end: usize },
    /// Both sides made the same change; range into `a`.
    Same { astart: usize, aend: usize },
    /// Only `a` changed this region.
    A { start: usize, end: usize },
    /// Only `b` changed this region.
    B { start: usize, end: usize },
    /// Both changed, differently.  Base range is `None` for synthetic
    /// conflicts produced by reprocessing.
    Conflict {
        zstart: Option<usize>,
        zend: Option<usize>,
        astart: usize,
        aend: usize,
        bstart: usize,
        bend: usize,
    },
}

#[derive(Debug)]
pub enum Merge3Error {
    Binary(BinaryFile),
    /// `base_marker` and `reprocess` cannot be combined.
    CantReprocessAndShowBase,
}

impl std::fmt::Display for Merge3Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Merge3Error::Binary(_) => write!(f, "cannot merge binary content"),
            Merge3Error::CantReprocessAndShowBase => {
                write!(f, "cannot reprocess and show base")
            }
        }
    }
}

impl std::error::Error for Merge3Error {}

impl From<BinaryFile> for Merge3Error {
    fn from(e: BinaryFile) -> Self {
        Merge3Error::Binary(e)
    }
}

/// Three-way merge of line sequences.
///
/// Synchronization regions are ranges that all three of base, a and b
/// agree on; everything between them is classified by which sides changed
/// it.  With `is_cherrypick`, regions where b matches base are not
/// considered part of the change being picked.
pub struct Merge3 {
    base: Vec<Vec<u8>>,
    a: Vec<Vec<u8>>,
    b: Vec<Vec<u8>>,
    is_cherrypick: bool,
}

impl Merge3 {
    pub fn new(
        base: Vec<Vec<u8>>,
        a: Vec<Vec<u8>>,
        b: Vec<Vec<u8>>,
        is_cherrypick: bool,
    ) -> Result<Self, Merge3Error> {
        check_text_lines(base.iter().map(|l| l.as_slice()))?;
        check_text_lines(a.iter().map(|l| l.as_slice()))?;
        check_text_lines(b.iter().map(|l| l.as_slice()))?;
        Ok(Merge3 {
            base,
            a,
            b,
            is_cherrypick,
        })
    }

    /// Regions where base, a and b all agree: `(zstart, zend, astart,
    /// aend, bstart, bend)` with all three ranges the same length, ending
    /// with an empty sentinel region.
    fn find_sync_regions(&self) -> Vec<(usize, usize, usize, usize, usize, usize)> {
        let amatches = matching_blocks(&self.base, &self.a);
        let bmatches = matching_blocks(&self.base, &self.b);
        let mut regions = Vec::new();
        let mut ai = 0;
        let mut bi = 0;
        while ai < amatches.len() - 1 && bi < bmatches.len() - 1 {
            let (abase, amatch, alen) = amatches[ai];
            let (bbase, bmatch, blen) = bmatches[bi];
            // intersect the two base ranges
            let start = abase.max(bbase);
            let end = (abase + alen).min(bbase + blen);
            if end > start {
                let intlen = end - start;
                let asub = amatch + (start - abase);
                let bsub = bmatch + (start - bbase);
                regions.push((start, end, asub, asub + intlen, bsub, bsub + intlen));
            }
            if abase + alen < bbase + blen {
                ai += 1;
            } else {
                bi += 1;
            }
        }
        regions.push((
            self.base.len(),
            self.base.len(),
            self.a.len(),
            self.a.len(),
            self.b.len(),
            self.b.len(),
        ));
        regions
    }

    fn compare_range(
        x: &[Vec<u8>],
        xstart: usize,
        xend: usize,
        y: &[Vec<u8>],
        ystart: usize,
        yend: usize,
    ) -> bool {
        xend - xstart == yend - ystart && x[xstart..xend] == y[ystart..yend]
    }

    /// Classify the whole text into merge regions.
    pub fn merge_regions(&self) -> Vec<MergeRegion> {
        let mut regions = Vec::new();
        let mut iz = 0;
        let mut ia = 0;
        let mut ib = 0;
        for (zmatch, zend, amatch, aend, bmatch, bend) in self.find_sync_regions() {
            let matchlen = zend - zmatch;
            let len_a = amatch - ia;
            let len_b = bmatch - ib;
            if len_a > 0 || len_b > 0 {
                let equal_a = Self::compare_range(&self.a, ia, amatch, &self.base, iz, zmatch);
                let equal_b = Self::compare_range(&self.b, ib, bmatch, &self.base, iz, zmatch);
                let same = Self::compare_range(&self.a, ia, amatch, &self.b, ib, bmatch);
                if same {
                    regions.push(MergeRegion::Same {
                        astart: ia,
                        aend: amatch,
                    });
                } else if equal_a && !equal_b {
                    regions.push(MergeRegion::B {
                        start: ib,
                        end: bmatch,
                    });
                } else if equal_b && !equal_a {
                    regions.push(MergeRegion::A {
                        start: ia,
                        end: amatch,
                    });
                } else if self.is_cherrypick {
                    regions.extend(self.refine_cherrypick_conflict(
                        iz, zmatch, ia, amatch, ib, bmatch,
                    ));
                } else {
                    regions.push(MergeRegion::Conflict {
                        zstart: Some(iz),
                        zend: Some(zmatch),
                        astart: ia,
                        aend: amatch,
                        bstart: ib,
                        bend: bmatch,
                    });
                }
            }
            ia = amatch;
            ib = bmatch;
            iz = zmatch;
            if matchlen > 0 {
                regions.push(MergeRegion::Unchanged {
                    start: zmatch,
                    end: zend,
                });
                iz = zend;
                ia = aend;
                ib = bend;
            }
        }
        regions
    }

    /// When cherrypicking, regions where b matches base are not part of
    /// the change being picked, so they produce no conflict.
    fn refine_cherrypick_conflict(
        &self,
        zstart: usize,
        zend: usize,
        astart: usize,
        aend: usize,
        bstart: usize,
        bend: usize,
    ) -> Vec<MergeRegion> {
        let base_slice = self.base[zstart..zend].to_vec();
        let b_slice = self.b[bstart..bend].to_vec();
        let matches = matching_blocks(&base_slice, &b_slice);
        let mut regions = Vec::new();
        let mut last_base_idx = 0;
        let mut last_b_idx = 0;
        let mut yielded_a = false;
        for (base_idx, b_idx, match_len) in matches {
            let conflict_b_len = b_idx - last_b_idx;
            if conflict_b_len > 0 {
                // a's lines go into the first sub-conflict only
                let (sub_astart, sub_aend) = if yielded_a {
                    (aend, aend)
                } else {
                    yielded_a = true;
                    (astart, aend)
                };
                regions.push(MergeRegion::Conflict {
                    zstart: Some(zstart + last_base_idx),
                    zend: Some(zstart + base_idx),
                    astart: sub_astart,
                    aend: sub_aend,
                    bstart: bstart + last_b_idx,
                    bend: bstart + b_idx,
                });
            }
            last_base_idx = base_idx + match_len;
            last_b_idx = b_idx + match_len;
        }
        if !yielded_a {
            regions.push(MergeRegion::Conflict {
                zstart: Some(zstart),
                zend: Some(zend),
                astart,
                aend,
                bstart,
                bend,
            });
        }
        regions
    }

    /// Re-merge conflict regions ignoring the base, salvaging lines the
    /// two sides agree on.
    pub fn reprocess_merge_regions(&self, regions: Vec<MergeRegion>) -> Vec<MergeRegion> {
        let mut result = Vec::new();
        for region in regions {
            let (ia, amatch, ib, bmatch) = match region {
                MergeRegion::Conflict {
                    astart,
                    aend,
                    bstart,
                    bend,
                    ..
                } => (astart, aend, bstart, bend),
                other => {
                    result.push(other);
                    continue;
                }
            };
            let a_region = self.a[ia..amatch].to_vec();
            let b_region = self.b[ib..bmatch].to_vec();
            let matches = matching_blocks(&a_region, &b_region);
            let mut next_a = ia;
            let mut next_b = ib;
            for &(region_ia, region_ib, region_len) in
                &matches[..matches.len().saturating_sub(1)]
            {
                let region_ia = region_ia + ia;
                let region_ib = region_ib + ib;
                if let Some(mismatch) =
                    Self::mismatch_region(next_a, region_ia, next_b, region_ib)
                {
                    result.push(mismatch);
                }
                result.push(MergeRegion::Same {
                    astart: region_ia,
                    aend: region_ia + region_len,
                });
                next_a = region_ia + region_len;
                next_b = region_ib + region_len;
            }
            if let Some(mismatch) = Self::mismatch_region(next_a, amatch, next_b, bmatch) {
                result.push(mismatch);
            }
        }
        result
    }

    fn mismatch_region(
        next_a: usize,
        region_ia: usize,
        next_b: usize,
        region_ib: usize,
    ) -> Option<MergeRegion> {
        if next_a < region_ia || next_b < region_ib {
            Some(MergeRegion::Conflict {
                zstart: None,
                zend: None,
                astart: next_a,
                aend: region_ia,
                bstart: next_b,
                bend: region_ib,
            })
        } else {
            None
        }
    }

    /// Merge into a cvs-like form with conflict markers.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_lines(
        &self,
        name_a: Option<&str>,
        name_b: Option<&str>,
        name_base: Option<&str>,
        start_marker: &str,
        mid_marker: &str,
        end_marker: &str,
        base_marker: Option<&str>,
        reprocess: bool,
    ) -> Result<Vec<Vec<u8>>, Merge3Error> {
        if base_marker.is_some() && reprocess {
            return Err(Merge3Error::CantReprocessAndShowBase);
        }
        let newline: &[u8] = if self.a.last().map(|l| l.ends_with(b"\n")).unwrap_or(true) {
            b"\n"
        } else {
            b""
        };
        let decorate = |marker: &str, name: Option<&str>| -> Vec<u8> {
            let mut line = marker.as_bytes().to_vec();
            if let Some(name) = name {
                line.push(b' ');
                line.extend_from_slice(name.as_bytes());
            }
            line.extend_from_slice(newline);
            line
        };
        let start_marker = decorate(start_marker, name_a);
        let end_marker = decorate(end_marker, name_b);
        let mid_marker = decorate(mid_marker, None);
        let base_marker = base_marker.map(|m| decorate(m, name_base));

        let regions = if reprocess {
            self.reprocess_merge_regions(self.merge_regions())
        } else {
            self.merge_regions()
        };
        let mut lines = Vec::new();
        for region in regions {
            match region {
                MergeRegion::Unchanged { start, end } => {
                    lines.extend(self.base[start..end].iter().cloned())
                }
                MergeRegion::Same { astart, aend } => {
                    lines.extend(self.a[astart..aend].iter().cloned())
                }
                MergeRegion::A { start, end } => lines.extend(self.a[start..end].iter().cloned()),
                MergeRegion::B { start, end } => lines.extend(self.b[start..end].iter().cloned()),
                MergeRegion::Conflict {
                    zstart,
                    zend,
                    astart,
                    aend,
                    bstart,
                    bend,
                } => {
                    lines.push(start_marker.clone());
                    lines.extend(self.a[astart..aend].iter().cloned());
                    if let (Some(marker), Some(zstart), Some(zend)) =
                        (base_marker.as_ref(), zstart, zend)
                    {
                        lines.push(marker.clone());
                        lines.extend(self.base[zstart..zend].iter().cloned());
                    }
                    lines.push(mid_marker.clone());
                    lines.extend(self.b[bstart..bend].iter().cloned());
                    lines.push(end_marker.clone());
                }
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<Vec<u8>> {
        texts.iter().map(|t| t.as_bytes().to_vec()).collect()
    }

    fn merge3(base: &[&str], a: &[&str], b: &[&str]) -> Merge3 {
        Merge3::new(lines(base), lines(a), lines(b), false).unwrap()
    }

    #[test]
    fn test_no_changes() {
        let m = merge3(&["a\n"], &["a\n"], &["a\n"]);
        let out = m
            .merge_lines(None, None, None, "<<<<<<<", "=======", ">>>>>>>", None, false)
            .unwrap();
        assert_eq!(out, lines(&["a\n"]));
    }

    #[test]
    fn test_one_side_wins() {
        let m = merge3(&["a\n", "b\n"], &["a\n", "b\n"], &["a\n", "B\n"]);
        let out = m
            .merge_lines(None, None, None, "<<<<<<<", "=======", ">>>>>>>", None, false)
            .unwrap();
        assert_eq!(out, lines(&["a\n", "B\n"]));
    }

    #[test]
    fn test_both_sides_same_change() {
        let m = merge3(&["a\n"], &["A\n"], &["A\n"]);
        let out = m
            .merge_lines(None, None, None, "<<<<<<<", "=======", ">>>>>>>", None, false)
            .unwrap();
        assert_eq!(out, lines(&["A\n"]));
    }

    #[test]
    fn test_separated_changes_merge_cleanly() {
        let m = merge3(
            &["a\n", "b\n", "c\n"],
            &["A\n", "b\n", "c\n"],
            &["a\n", "b\n", "C\n"],
        );
        let out = m
            .merge_lines(None, None, None, "<<<<<<<", "=======", ">>>>>>>", None, false)
            .unwrap();
        assert_eq!(out, lines(&["A\n", "b\n", "C\n"]));
    }

    #[test]
    fn test_conflict_markers_and_names() {
        let m = merge3(&["base\n"], &["ours\n"], &["theirs\n"]);
        let out = m
            .merge_lines(
                Some("TREE"),
                Some("MERGE-SOURCE"),
                None,
                "<<<<<<<",
                "=======",
                ">>>>>>>",
                None,
                false,
            )
            .unwrap();
        assert_eq!(
            out,
            lines(&[
                "<<<<<<< TREE\n",
                "ours\n",
                "=======\n",
                "theirs\n",
                ">>>>>>> MERGE-SOURCE\n",
            ])
        );
    }

    #[test]
    fn test_show_base() {
        let m = merge3(&["base\n"], &["ours\n"], &["theirs\n"]);
        let out = m
            .merge_lines(
                None,
                None,
                None,
                "<<<<<<<",
                "=======",
                ">>>>>>>",
                Some("|||||||"),
                false,
            )
            .unwrap();
        assert_eq!(
            out,
            lines(&[
                "<<<<<<<\n",
                "ours\n",
                "|||||||\n",
                "base\n",
                "=======\n",
                "theirs\n",
                ">>>>>>>\n",
            ])
        );
    }

    #[test]
    fn test_reprocess_salvages_agreement() {
        // both sides append 'shared' but disagree about the first line
        let m = merge3(
            &["x\n"],
            &["ours\n", "shared\n"],
            &["theirs\n", "shared\n"],
        );
        let out = m
            .merge_lines(None, None, None, "<<<<<<<", "=======", ">>>>>>>", None, true)
            .unwrap();
        assert_eq!(
            out,
            lines(&[
                "<<<<<<<\n",
                "ours\n",
                "=======\n",
                "theirs\n",
                ">>>>>>>\n",
                "shared\n",
            ])
        );
    }

    #[test]
    fn test_reprocess_with_base_marker_rejected() {
        let m = merge3(&["x\n"], &["a\n"], &["b\n"]);
        assert!(matches!(
            m.merge_lines(
                None,
                None,
                None,
                "<<<<<<<",
                "=======",
                ">>>>>>>",
                Some("|||||||"),
                true
            ),
            Err(Merge3Error::CantReprocessAndShowBase)
        ));
    }

    #[test]
    fn test_binary_rejected() {
        assert!(Merge3::new(lines(&["a\0b\n"]), vec![], vec![], false).is_err());
    }

    #[test]
    fn test_cherrypick_skips_base_matching_regions() {
        // within the conflicted region, b's 'x' line still matches base,
        // so only the 'B' part of b ends up conflicting
        let m = Merge3::new(
            lines(&["k\n", "x\n", "y\n"]),
            lines(&["k\n", "A\n"]),
            lines(&["k\n", "x\n", "B\n"]),
            true,
        )
        .unwrap();
        let regions = m.merge_regions();
        let conflicts: Vec<&MergeRegion> = regions
            .iter()
            .filter(|r| matches!(r, MergeRegion::Conflict { .. }))
            .collect();
        assert_eq!(conflicts.len(), 1);
        match conflicts[0] {
            MergeRegion::Conflict { bstart, bend, .. } => {
                assert_eq!((*bstart, *bend), (2, 3));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_plan_weave_merge_clean() {
        let plan = vec![
            (PlanTag::Unchanged, b"a\n".to_vec()),
            (PlanTag::KilledA, b"b\n".to_vec()),
            (PlanTag::NewA, b"B\n".to_vec()),
            (PlanTag::Unchanged, b"z\n".to_vec()),
            (PlanTag::KilledB, b"c\n".to_vec()),
            (PlanTag::NewB, b"C\n".to_vec()),
        ];
        let (out, conflicts) = PlanWeaveMerge::new(
            plan,
            b"<<<<<<<\n".to_vec(),
            b">>>>>>>\n".to_vec(),
        )
        .merge_lines(false);
        assert!(!conflicts);
        assert_eq!(out, lines(&["a\n", "B\n", "z\n", "C\n"]));
    }

    #[test]
    fn test_plan_weave_merge_identical_changes() {
        let plan = vec![
            (PlanTag::NewA, b"same\n".to_vec()),
            (PlanTag::NewB, b"same\n".to_vec()),
        ];
        let (out, conflicts) =
            PlanWeaveMerge::new(plan, b"<\n".to_vec(), b">\n".to_vec()).merge_lines(false);
        assert!(!conflicts);
        assert_eq!(out, lines(&["same\n"]));
    }

    #[test]
    fn test_base_from_plan() {
        let plan = vec![
            (PlanTag::Unchanged, b"a\n".to_vec()),
            (PlanTag::KilledA, b"b\n".to_vec()),
            (PlanTag::NewA, b"B\n".to_vec()),
            (PlanTag::KilledBase, b"old\n".to_vec()),
        ];
        let merge = PlanWeaveMerge::new(plan, b"<\n".to_vec(), b">\n".to_vec());
        assert_eq!(merge.base_from_plan(), lines(&["a\n", "b\n"]));
    }
}
