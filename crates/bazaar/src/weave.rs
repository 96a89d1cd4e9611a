//! Weave - storage of related text file versions.
//!
//! A weave manages versions of line-based text files, keeping track of the
//! originating version for each line.  The store is an ordered mix of
//! control instructions and literal lines.  `Open`/`Close` bracket an
//! insertion block; `DeleteOpen`/`DeleteClose` bracket a deletion region.
//!
//! Constraints:
//!
//! * A later version can delete lines introduced by any number of ancestor
//!   versions, so deletion brackets span insertion blocks without regard to
//!   their nesting, and deletions need not nest with respect to each other.
//! * Insertions are made by inserting a new bracketed block at a single
//!   point, so they nest but never overlap, with later insertions on the
//!   inside.
//! * A line is live when the innermost enclosing insertion is in the
//!   included set and none of the enclosing deletions are.

use crate::plan::PlanTag;
use crate::RevisionId;
use heddle_osutils::sha::sha_chunks;
use std::collections::{HashMap, HashSet};

/// One element of the woven stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// `{ v`: start of the lines inserted by version `v`.
    Open(usize),
    /// `} v`: end of the innermost open insertion.
    Close(usize),
    /// `[ v`: start of a region deleted by version `v`.
    DeleteOpen(usize),
    /// `] v`: end of that region.
    DeleteClose(usize),
    Line(Vec<u8>),
}

#[derive(Debug)]
pub enum Error {
    RevisionNotPresent(RevisionId),
    /// The version exists with different parents or content.
    RevisionAlreadyPresent(RevisionId),
    InvalidChecksum {
        weave: Option<String>,
        version: RevisionId,
        expected: String,
        measured: String,
    },
    /// A parent index did not name an existing version.
    InvalidVersion(usize),
    /// Structural corruption: unbalanced brackets or bad ordering.
    Format(String),
    /// The same name carries different texts in two weaves being combined.
    TextDiffers(RevisionId),
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::RevisionNotPresent(v) => write!(f, "revision {} not present", v),
            Error::RevisionAlreadyPresent(v) => {
                write!(f, "revision {} already present with different content", v)
            }
            Error::InvalidChecksum {
                weave,
                version,
                expected,
                measured,
            } => write!(
                f,
                "checksum mismatch in weave {:?} for {}: expected {}, measured {}",
                weave, version, expected, measured
            ),
            Error::InvalidVersion(i) => write!(f, "invalid version number {}", i),
            Error::Format(msg) => write!(f, "weave format error: {}", msg),
            Error::TextDiffers(v) => write!(f, "weaves differ on text for {}", v),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

/// How `get_record_stream` should order its output.
pub enum Ordering {
    Unordered,
    Topological,
}

/// A record pulled out of, or destined for, a weave.
///
/// `storage_kind` mirrors the wire names: `fulltext`, `chunked`, `absent`.
pub enum Record {
    Fulltext {
        key: RevisionId,
        parents: Vec<RevisionId>,
        sha1: String,
        text: Vec<u8>,
    },
    Chunked {
        key: RevisionId,
        parents: Vec<RevisionId>,
        sha1: Option<String>,
        chunks: Vec<Vec<u8>>,
    },
    /// The version was requested but is not present; the consumer decides
    /// whether that is fatal.
    Absent { key: RevisionId },
}

impl Record {
    pub fn key(&self) -> &RevisionId {
        match self {
            Record::Fulltext { key, .. }
            | Record::Chunked { key, .. }
            | Record::Absent { key } => key,
        }
    }

    pub fn storage_kind(&self) -> &'static str {
        match self {
            Record::Fulltext { .. } => "fulltext",
            Record::Chunked { .. } => "chunked",
            Record::Absent { .. } => "absent",
        }
    }

    /// The record's text as lines; absent records have none.
    pub fn into_lines(self) -> Option<Vec<Vec<u8>>> {
        match self {
            Record::Fulltext { text, .. } => Some(
                heddle_osutils::split_lines(&text)
                    .map(|l| l.into_owned())
                    .collect(),
            ),
            Record::Chunked { chunks, .. } => Some(heddle_osutils::chunks_to_lines(chunks)),
            Record::Absent { .. } => None,
        }
    }
}

/// Weave - versioned text file storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Weave {
    weave: Vec<Element>,
    parents: Vec<Vec<usize>>,
    sha1s: Vec<String>,
    names: Vec<RevisionId>,
    name_map: HashMap<RevisionId, usize>,
    weave_name: Option<String>,
    allow_reserved: bool,
}

struct WalkedLine<'a> {
    /// Index of the innermost open insertion.
    inserted: usize,
    /// Versions with an open deletion spanning this line.
    deleted_by: HashSet<usize>,
    line: &'a [u8],
}

impl Weave {
    pub fn new(weave_name: Option<String>) -> Self {
        Weave {
            weave_name,
            ..Default::default()
        }
    }

    /// A weave that accepts reserved version ids (`current:` etc); used for
    /// the in-memory weaves the merge planner builds.
    pub fn new_allow_reserved(weave_name: Option<String>) -> Self {
        Weave {
            weave_name,
            allow_reserved: true,
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.weave_name.as_deref()
    }

    pub fn num_versions(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn versions(&self) -> &[RevisionId] {
        &self.names
    }

    pub fn has_version(&self, version_id: &RevisionId) -> bool {
        self.name_map.contains_key(version_id)
    }

    pub fn idx_to_name(&self, version: usize) -> &RevisionId {
        &self.names[version]
    }

    pub fn lookup(&self, name: &RevisionId) -> Result<usize, Error> {
        if !self.allow_reserved && name.is_reserved() {
            return Err(Error::RevisionNotPresent(name.clone()));
        }
        self.name_map
            .get(name)
            .copied()
            .ok_or_else(|| Error::RevisionNotPresent(name.clone()))
    }

    /// Direct access used by the file serializer.
    pub(crate) fn stream(&self) -> &[Element] {
        &self.weave
    }

    pub(crate) fn parent_indices(&self, version: usize) -> &[usize] {
        &self.parents[version]
    }

    pub(crate) fn sha1_of(&self, version: usize) -> &str {
        &self.sha1s[version]
    }

    /// Rebuild from parsed parts; the file reader uses this.
    pub(crate) fn from_parts(
        weave_name: Option<String>,
        weave: Vec<Element>,
        parents: Vec<Vec<usize>>,
        sha1s: Vec<String>,
        names: Vec<RevisionId>,
    ) -> Self {
        let name_map = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Weave {
            weave,
            parents,
            sha1s,
            names,
            name_map,
            weave_name,
            allow_reserved: false,
        }
    }

    /// Add a single text on top of the weave, returning the index of the
    /// new version.
    ///
    /// Adding the same name again with identical parents and content
    /// returns the old index without touching the store; differing content
    /// is [`Error::RevisionAlreadyPresent`].
    pub fn add_lines(
        &mut self,
        version_id: &RevisionId,
        parents: &[RevisionId],
        lines: &[Vec<u8>],
    ) -> Result<usize, Error> {
        let parent_idxs = parents
            .iter()
            .map(|p| self.lookup(p))
            .collect::<Result<Vec<usize>, Error>>()?;
        if !self.allow_reserved && version_id.is_reserved() {
            return Err(Error::RevisionAlreadyPresent(version_id.clone()));
        }
        self.add(version_id, &parent_idxs, lines)
    }

    fn check_repeated_add(
        &self,
        name: &RevisionId,
        parents: &[usize],
        sha1: &str,
    ) -> Result<usize, Error> {
        let idx = self.name_map[name];
        let mut mine: Vec<usize> = self.parents[idx].clone();
        let mut theirs: Vec<usize> = parents.to_vec();
        mine.sort_unstable();
        theirs.sort_unstable();
        if mine != theirs || self.sha1s[idx] != sha1 {
            return Err(Error::RevisionAlreadyPresent(name.clone()));
        }
        Ok(idx)
    }

    fn add(
        &mut self,
        version_id: &RevisionId,
        parents: &[usize],
        lines: &[Vec<u8>],
    ) -> Result<usize, Error> {
        let sha1 = sha_chunks(lines);
        if self.name_map.contains_key(version_id) {
            return self.check_repeated_add(version_id, parents, &sha1);
        }
        for &p in parents {
            if p >= self.parents.len() {
                return Err(Error::InvalidVersion(p));
            }
        }

        let new_version = self.parents.len();
        self.parents.push(parents.to_vec());
        self.sha1s.push(sha1.clone());
        self.names.push(version_id.clone());
        self.name_map.insert(version_id.clone(), new_version);

        if parents.is_empty() {
            // adding a parentless revision appends unconditionally; an
            // empty text needs no instructions at all
            if !lines.is_empty() {
                self.weave.push(Element::Open(new_version));
                self.weave
                    .extend(lines.iter().map(|l| Element::Line(l.clone())));
                self.weave.push(Element::Close(new_version));
            }
            return Ok(new_version);
        }

        if parents.len() == 1 && sha1 == self.sha1s[parents[0]] {
            // same text as the single parent
            return Ok(new_version);
        }

        // materialize the parents' union as the basis to diff against
        let basis = self.extract(parents)?;
        let mut basis_lineno: Vec<usize> = basis.iter().map(|w| w.0).collect();
        let basis_lines: Vec<Vec<u8>> = basis.into_iter().map(|w| w.2).collect();

        if lines == basis_lines.as_slice() {
            // a merge producing the same text as the auto-merge
            return Ok(new_version);
        }

        // a sentinel so edits can also anchor after the final line
        basis_lineno.push(self.weave.len());

        let blocks = heddle_annotate::matching_blocks(&basis_lines, lines);
        // offset counts the instructions inserted so far; an edit at basis
        // line A really lands at A+offset
        let mut offset: usize = 0;
        let mut last_i = 0;
        let mut last_j = 0;
        for (bi, bj, n) in blocks {
            let (i1, i2, j1, j2) = (last_i, bi, last_j, bj);
            last_i = bi + n;
            last_j = bj + n;
            if i1 == i2 && j1 == j2 {
                continue;
            }
            let w1 = basis_lineno[i1];
            let w2 = basis_lineno[i2];
            if w1 != w2 {
                self.weave.insert(w1 + offset, Element::DeleteOpen(new_version));
                self.weave
                    .insert(w2 + offset + 1, Element::DeleteClose(new_version));
                offset += 2;
            }
            if j1 != j2 {
                // insert after any deletion region just written so the new
                // block is not swallowed by it
                let at = w2 + offset;
                let mut block = Vec::with_capacity(j2 - j1 + 2);
                block.push(Element::Open(new_version));
                block.extend(lines[j1..j2].iter().map(|l| Element::Line(l.clone())));
                block.push(Element::Close(new_version));
                self.weave.splice(at..at, block);
                offset += 2 + (j2 - j1);
            }
        }
        Ok(new_version)
    }

    /// The set of all ancestor indices of `versions`, including themselves.
    pub fn inclusions(&self, versions: &[usize]) -> HashSet<usize> {
        let mut included: HashSet<usize> = versions.iter().copied().collect();
        let max = match versions.iter().max() {
            Some(&m) => m,
            None => return included,
        };
        for v in (1..=max).rev() {
            if included.contains(&v) {
                included.extend(self.parents[v].iter().copied());
            }
        }
        included
    }

    /// Names of all ancestors of the named versions, including themselves.
    pub fn get_ancestry(&self, version_ids: &[RevisionId]) -> Result<HashSet<RevisionId>, Error> {
        let idxs = version_ids
            .iter()
            .map(|v| self.lookup(v))
            .collect::<Result<Vec<usize>, Error>>()?;
        Ok(self
            .inclusions(&idxs)
            .into_iter()
            .map(|i| self.names[i].clone())
            .collect())
    }

    pub fn get_parent_map(
        &self,
        version_ids: &[RevisionId],
    ) -> HashMap<RevisionId, Vec<RevisionId>> {
        let mut result = HashMap::new();
        for version_id in version_ids {
            if let Ok(idx) = self.lookup(version_id) {
                result.insert(
                    version_id.clone(),
                    self.parents[idx]
                        .iter()
                        .map(|&p| self.names[p].clone())
                        .collect(),
                );
            }
        }
        result
    }

    pub fn get_sha1s(&self, version_ids: &[RevisionId]) -> Result<HashMap<RevisionId, String>, Error> {
        let mut result = HashMap::new();
        for v in version_ids {
            result.insert(v.clone(), self.sha1s[self.lookup(v)?].clone());
        }
        Ok(result)
    }

    /// Walk the weave yielding every line with its originating insertion
    /// and the set of versions that delete it.  Bracket balance is checked
    /// on the way.
    fn walk(&self) -> Result<Vec<WalkedLine<'_>>, Error> {
        let mut istack: Vec<usize> = Vec::new();
        let mut dset: HashSet<usize> = HashSet::new();
        let mut result = Vec::new();
        for element in &self.weave {
            match element {
                Element::Open(v) => istack.push(*v),
                Element::Close(_) => {
                    istack
                        .pop()
                        .ok_or_else(|| Error::Format("unmatched insertion close".into()))?;
                }
                Element::DeleteOpen(v) => {
                    if !dset.insert(*v) {
                        return Err(Error::Format(format!("repeated deletion open for {}", v)));
                    }
                }
                Element::DeleteClose(v) => {
                    if !dset.remove(v) {
                        return Err(Error::Format(format!("unmatched deletion close for {}", v)));
                    }
                }
                Element::Line(line) => {
                    let inserted = *istack
                        .last()
                        .ok_or_else(|| Error::Format("line outside insertion block".into()))?;
                    result.push(WalkedLine {
                        inserted,
                        deleted_by: dset.clone(),
                        line,
                    });
                }
            }
        }
        if !istack.is_empty() {
            return Err(Error::Format(format!(
                "unclosed insertion blocks at end of weave: {:?}",
                istack
            )));
        }
        if !dset.is_empty() {
            return Err(Error::Format(format!(
                "unclosed deletion blocks at end of weave: {:?}",
                dset
            )));
        }
        Ok(result)
    }

    /// Yield the annotated lines in the included set: `(origin, weave
    /// lineno, line)` triples.
    fn extract(&self, versions: &[usize]) -> Result<Vec<(usize, usize, Vec<u8>)>, Error> {
        for &v in versions {
            if v >= self.parents.len() {
                return Err(Error::InvalidVersion(v));
            }
        }
        let included = self.inclusions(versions);

        let mut istack: Vec<usize> = Vec::new();
        let mut dset: HashSet<usize> = HashSet::new();
        let mut result = Vec::new();

        for (lineno, element) in self.weave.iter().enumerate() {
            match element {
                Element::Open(v) => istack.push(*v),
                Element::Close(_) => {
                    istack
                        .pop()
                        .ok_or_else(|| Error::Format("unmatched insertion close".into()))?;
                }
                Element::DeleteOpen(v) => {
                    if included.contains(v) {
                        dset.insert(*v);
                    }
                }
                Element::DeleteClose(v) => {
                    if included.contains(v) {
                        dset.remove(v);
                    }
                }
                Element::Line(line) => {
                    if dset.is_empty() {
                        if let Some(&top) = istack.last() {
                            if included.contains(&top) {
                                result.push((top, lineno, line.clone()));
                            }
                        }
                    }
                }
            }
        }
        if !istack.is_empty() {
            return Err(Error::Format(format!(
                "unclosed insertion blocks at end of weave: {:?}",
                istack
            )));
        }
        Ok(result)
    }

    /// The lines of a version, verified against the stored SHA-1.
    pub fn get_lines(&self, version_id: &RevisionId) -> Result<Vec<Vec<u8>>, Error> {
        let idx = self.lookup(version_id)?;
        let result: Vec<Vec<u8>> = self
            .extract(&[idx])?
            .into_iter()
            .map(|(_, _, line)| line)
            .collect();
        let expected = &self.sha1s[idx];
        let measured = sha_chunks(&result);
        if &measured != expected {
            return Err(Error::InvalidChecksum {
                weave: self.weave_name.clone(),
                version: version_id.clone(),
                expected: expected.clone(),
                measured,
            });
        }
        Ok(result)
    }

    pub fn get_text(&self, version_id: &RevisionId) -> Result<Vec<u8>, Error> {
        Ok(self.get_lines(version_id)?.concat())
    }

    /// Per-line provenance of a version: `(origin name, line)` pairs.
    pub fn annotate(&self, version_id: &RevisionId) -> Result<Vec<(RevisionId, Vec<u8>)>, Error> {
        let idx = self.lookup(version_id)?;
        Ok(self
            .extract(&[idx])?
            .into_iter()
            .map(|(origin, _, line)| (self.names[origin].clone(), line))
            .collect())
    }

    /// Lines added or present in the given versions, with the version that
    /// inserted each line.  Lines lacking a final newline get one, since
    /// consumers use this for indexing.
    pub fn iter_lines_added_or_present_in_versions(
        &self,
        version_ids: Option<&[RevisionId]>,
    ) -> Result<Vec<(Vec<u8>, RevisionId)>, Error> {
        let _version_ids = version_ids;
        // weaves cannot represent ghosts, so no filtering to the requested
        // set happens here; every line is someone's line
        let mut result = Vec::new();
        for walked in self.walk()? {
            let mut line = walked.line.to_vec();
            if line.last() != Some(&b'\n') {
                line.push(b'\n');
            }
            result.push((line, self.names[walked.inserted].clone()));
        }
        Ok(result)
    }

    /// Return a pseudo-annotation indicating how two versions merge.
    ///
    /// Lines are classified against the common ancestry of `ver_a` and
    /// `ver_b`; lines present in neither side's ancestry come out as
    /// `Irrelevant`.
    pub fn plan_merge(
        &self,
        ver_a: &RevisionId,
        ver_b: &RevisionId,
    ) -> Result<Vec<(PlanTag, Vec<u8>)>, Error> {
        let idx_a = self.lookup(ver_a)?;
        let idx_b = self.lookup(ver_b)?;
        let inc_a = self.inclusions(&[idx_a]);
        let inc_b = self.inclusions(&[idx_b]);
        let inc_c: HashSet<usize> = inc_a.intersection(&inc_b).copied().collect();

        let mut plan = Vec::new();
        for walked in self.walk()? {
            let killed_base = walked.deleted_by.iter().any(|d| inc_c.contains(d));
            let tag = if killed_base {
                // killed in the common ancestry; live in neither side
                PlanTag::KilledBase
            } else if inc_c.contains(&walked.inserted) {
                let killed_a = walked.deleted_by.iter().any(|d| inc_a.contains(d));
                let killed_b = walked.deleted_by.iter().any(|d| inc_b.contains(d));
                match (killed_a, killed_b) {
                    (true, true) => PlanTag::KilledBoth,
                    (true, false) => PlanTag::KilledA,
                    (false, true) => PlanTag::KilledB,
                    (false, false) => PlanTag::Unchanged,
                }
            } else if inc_a.contains(&walked.inserted) {
                if walked.deleted_by.iter().any(|d| inc_a.contains(d)) {
                    PlanTag::GhostA
                } else {
                    PlanTag::NewA
                }
            } else if inc_b.contains(&walked.inserted) {
                if walked.deleted_by.iter().any(|d| inc_b.contains(d)) {
                    PlanTag::GhostB
                } else {
                    PlanTag::NewB
                }
            } else {
                PlanTag::Irrelevant
            };
            plan.push((tag, walked.line.to_vec()));
        }
        Ok(plan)
    }

    /// Check invariants over the whole store: parent ordering, ancestry
    /// agreement between the parent table and the instruction walk, and the
    /// SHA-1 of every version via one parallel extraction pass.
    pub fn check(&self) -> Result<(), Error> {
        for (version, parents) in self.parents.iter().enumerate() {
            for &p in parents {
                if p >= version {
                    return Err(Error::Format(format!(
                        "invalid included version {} for index {}",
                        p, version
                    )));
                }
            }
        }

        let nv = self.num_versions();
        let mut inclusions: Vec<HashSet<usize>> = Vec::with_capacity(nv);
        for i in 0..nv {
            let mut new_inc: HashSet<usize> = HashSet::new();
            new_inc.insert(i);
            for &p in &self.parents[i] {
                new_inc.extend(inclusions[p].iter().copied());
            }
            if new_inc != self.inclusions(&[i]) {
                return Err(Error::Format(format!(
                    "inclusions of version {} disagree with parent walk",
                    self.names[i]
                )));
            }
            inclusions.push(new_inc);
        }

        let mut texts: Vec<Vec<Vec<u8>>> = vec![Vec::new(); nv];
        for walked in self.walk()? {
            for (v, inclusion) in inclusions.iter().enumerate() {
                // the inserting version must be an ancestor and no ancestor
                // may have deleted the line; resurrection is unsupported
                if inclusion.contains(&walked.inserted)
                    && !walked.deleted_by.iter().any(|d| inclusion.contains(d))
                {
                    texts[v].push(walked.line.to_vec());
                }
            }
        }
        for (i, text) in texts.into_iter().enumerate() {
            let measured = sha_chunks(&text);
            if measured != self.sha1s[i] {
                return Err(Error::InvalidChecksum {
                    weave: self.weave_name.clone(),
                    version: self.names[i].clone(),
                    expected: self.sha1s[i].clone(),
                    measured,
                });
            }
        }
        Ok(())
    }

    /// Stream records for the requested versions.  Missing versions come
    /// out as [`Record::Absent`].
    pub fn get_record_stream(
        &self,
        versions: &[RevisionId],
        ordering: Ordering,
        _include_delta_closure: bool,
    ) -> Result<Vec<Record>, Error> {
        let order: Vec<RevisionId> = match ordering {
            Ordering::Unordered => versions.to_vec(),
            Ordering::Topological => {
                let requested: HashSet<&RevisionId> = versions.iter().collect();
                let parent_map = self.get_parent_map(versions);
                let graph: HashMap<RevisionId, Vec<RevisionId>> = parent_map
                    .into_iter()
                    .map(|(k, ps)| {
                        (k, ps.into_iter().filter(|p| requested.contains(p)).collect())
                    })
                    .collect();
                let known: HashSet<RevisionId> = graph.keys().cloned().collect();
                let mut order = heddle_graph::tsort::topo_sort(graph)
                    .map_err(|e| Error::Format(e.to_string()))?;
                order.extend(
                    versions
                        .iter()
                        .filter(|v| !known.contains(*v))
                        .cloned(),
                );
                order
            }
        };
        let mut records = Vec::with_capacity(order.len());
        for version in order {
            match self.lookup(&version) {
                Err(_) => records.push(Record::Absent { key: version }),
                Ok(idx) => records.push(Record::Fulltext {
                    key: version.clone(),
                    parents: self.parents[idx]
                        .iter()
                        .map(|&p| self.names[p].clone())
                        .collect(),
                    sha1: self.sha1s[idx].clone(),
                    text: self.get_text(&version)?,
                }),
            }
        }
        Ok(records)
    }

    /// Insert a stream of records.  Absent records are an error; fulltext
    /// and chunked records are adapted to lines and added.  Records whose
    /// name is already present with identical content are skipped by the
    /// repeated-add rule.
    pub fn insert_record_stream(
        &mut self,
        stream: impl IntoIterator<Item = Record>,
    ) -> Result<(), Error> {
        for record in stream {
            match record {
                Record::Absent { key } => return Err(Error::RevisionNotPresent(key)),
                other => {
                    let key = other.key().clone();
                    let parents = match &other {
                        Record::Fulltext { parents, .. } | Record::Chunked { parents, .. } => {
                            parents.clone()
                        }
                        Record::Absent { .. } => unreachable!(),
                    };
                    let lines = other.into_lines().unwrap_or_default();
                    self.add_lines(&key, &parents, &lines)?;
                }
            }
        }
        Ok(())
    }
}

/// Combine two weaves into a new one.
///
/// This works even when a revision carries different parents in the two
/// inputs; the result gives it the union.  Differing texts for the same
/// name are an error.
pub fn reweave(wa: &Weave, wb: &Weave) -> Result<Weave, Error> {
    let mut combined: HashMap<RevisionId, HashSet<RevisionId>> = HashMap::new();
    for weave in [wa, wb] {
        for (idx, name) in weave.names.iter().enumerate() {
            let entry = combined.entry(name.clone()).or_default();
            entry.extend(weave.parents[idx].iter().map(|&p| weave.names[p].clone()));
        }
    }
    let graph: HashMap<RevisionId, Vec<RevisionId>> = combined
        .iter()
        .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
        .collect();
    let order =
        heddle_graph::tsort::topo_sort(graph).map_err(|e| Error::Format(e.to_string()))?;

    let mut result = Weave::new(wa.weave_name.clone());
    for name in order {
        let lines = if wa.has_version(&name) {
            let lines = wa.get_lines(&name)?;
            if wb.has_version(&name) && lines != wb.get_lines(&name)? {
                log::debug!("weaves differ on content for {}", name);
                return Err(Error::TextDiffers(name));
            }
            lines
        } else {
            wb.get_lines(&name)?
        };
        let parents: Vec<RevisionId> = combined[&name].iter().cloned().collect();
        result.add_lines(&name, &parents, &lines)?;
    }
    Ok(result)
}
