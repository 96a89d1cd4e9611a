//! Read and write weave files, format v5.
//!
//! The file starts with a header line, then one block per version giving
//! its parents (`i`), SHA-1 (`1`) and name (`n`), a blank separator, and
//! finally the woven body between `w` and `W` lines.  Body lines keep
//! their terminator behind `. `; lines with no terminator are written
//! behind `, ` with an artificial newline the reader strips again.

use crate::weave::{Element, Error, Weave};
use crate::RevisionId;
use std::io::{BufRead, Write};
use std::path::Path;

pub const FORMAT_V5: &[u8] = b"# bzr weave file v5\n";

/// The conventional on-disk suffix for a weave.
pub const WEAVE_SUFFIX: &str = ".weave";

pub fn write_weave<W: Write>(weave: &Weave, out: &mut W) -> Result<(), Error> {
    out.write_all(FORMAT_V5)?;
    for version in 0..weave.num_versions() {
        let included = weave.parent_indices(version);
        if included.is_empty() {
            out.write_all(b"i\n")?;
        } else {
            out.write_all(b"i")?;
            for parent in included {
                write!(out, " {}", parent)?;
            }
            out.write_all(b"\n")?;
        }
        writeln!(out, "1 {}", weave.sha1_of(version))?;
        out.write_all(b"n ")?;
        out.write_all(weave.idx_to_name(version).as_bytes())?;
        out.write_all(b"\n\n")?;
    }
    out.write_all(b"w\n")?;
    for element in weave.stream() {
        match element {
            Element::Open(v) => writeln!(out, "{{ {}", v)?,
            Element::Close(_) => out.write_all(b"}\n")?,
            Element::DeleteOpen(v) => writeln!(out, "[ {}", v)?,
            Element::DeleteClose(v) => writeln!(out, "] {}", v)?,
            Element::Line(line) => {
                if line.ends_with(b"\n") {
                    out.write_all(b". ")?;
                    out.write_all(line)?;
                } else {
                    out.write_all(b", ")?;
                    out.write_all(line)?;
                    out.write_all(b"\n")?;
                }
            }
        }
    }
    out.write_all(b"W\n")?;
    Ok(())
}

/// Save a weave to `path` atomically: readers observe either the previous
/// or the new contents, never a torn write.
pub fn write_weave_atomic(weave: &Weave, path: &Path) -> Result<(), Error> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = std::fs::File::create(&tmp_path)?;
        let mut writer = std::io::BufWriter::new(file);
        write_weave(weave, &mut writer)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_weave<R: BufRead>(input: &mut R, weave_name: Option<String>) -> Result<Weave, Error> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        lines.push(buf.clone());
    }
    let mut it = lines.into_iter();

    let header = it.next().ok_or_else(|| Error::Format("empty weave file".into()))?;
    if header != FORMAT_V5 {
        return Err(Error::Format(format!(
            "unexpected weave header {:?}",
            String::from_utf8_lossy(&header)
        )));
    }

    let mut parents: Vec<Vec<usize>> = Vec::new();
    let mut sha1s: Vec<String> = Vec::new();
    let mut names: Vec<RevisionId> = Vec::new();

    // version headers until the 'w' line
    loop {
        let line = it
            .next()
            .ok_or_else(|| Error::Format("truncated weave header section".into()))?;
        if line == b"w\n" {
            break;
        }
        if !line.starts_with(b"i") {
            return Err(Error::Format(format!(
                "unexpected header line {:?}",
                String::from_utf8_lossy(&line)
            )));
        }
        let version_parents = parse_parent_line(&line)?;
        let sha_line = it
            .next()
            .ok_or_else(|| Error::Format("missing sha line".into()))?;
        if !sha_line.starts_with(b"1 ") {
            return Err(Error::Format("malformed sha line".into()));
        }
        let sha1 = String::from_utf8_lossy(trim_newline(&sha_line[2..])).to_string();
        let name_line = it
            .next()
            .ok_or_else(|| Error::Format("missing name line".into()))?;
        if !name_line.starts_with(b"n ") {
            return Err(Error::Format("malformed name line".into()));
        }
        let name = RevisionId::from(trim_newline(&name_line[2..]));
        let blank = it
            .next()
            .ok_or_else(|| Error::Format("missing separator line".into()))?;
        if blank != b"\n" {
            return Err(Error::Format("missing blank separator".into()));
        }
        parents.push(version_parents);
        sha1s.push(sha1);
        names.push(name);
    }

    // woven body until the 'W' line
    let mut elements: Vec<Element> = Vec::new();
    let mut open_stack: Vec<usize> = Vec::new();
    loop {
        let line = it
            .next()
            .ok_or_else(|| Error::Format("truncated weave body".into()))?;
        if line == b"W\n" {
            break;
        }
        match line.first() {
            Some(b'{') => {
                let v = parse_version(&line[1..])?;
                open_stack.push(v);
                elements.push(Element::Open(v));
            }
            Some(b'}') => {
                let v = open_stack
                    .pop()
                    .ok_or_else(|| Error::Format("unmatched insertion close".into()))?;
                elements.push(Element::Close(v));
            }
            Some(b'[') => elements.push(Element::DeleteOpen(parse_version(&line[1..])?)),
            Some(b']') => elements.push(Element::DeleteClose(parse_version(&line[1..])?)),
            Some(b'.') => elements.push(Element::Line(line[2..].to_vec())),
            Some(b',') => {
                elements.push(Element::Line(line[2..line.len() - 1].to_vec()));
            }
            _ => {
                return Err(Error::Format(format!(
                    "unexpected body line {:?}",
                    String::from_utf8_lossy(&line)
                )))
            }
        }
    }
    if !open_stack.is_empty() {
        return Err(Error::Format("unclosed insertion block".into()));
    }
    Ok(Weave::from_parts(weave_name, elements, parents, sha1s, names))
}

pub fn read_weave_file(path: &Path) -> Result<Weave, Error> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());
    read_weave(&mut reader, name)
}

fn trim_newline(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

fn parse_parent_line(line: &[u8]) -> Result<Vec<usize>, Error> {
    let text = String::from_utf8_lossy(trim_newline(&line[1..]));
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<usize>()
                .map_err(|_| Error::Format(format!("bad parent index {:?}", tok)))
        })
        .collect()
}

fn parse_version(rest: &[u8]) -> Result<usize, Error> {
    let text = String::from_utf8_lossy(trim_newline(rest));
    text.trim()
        .parse::<usize>()
        .map_err(|_| Error::Format(format!("bad version number {:?}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<Vec<u8>> {
        texts.iter().map(|t| t.as_bytes().to_vec()).collect()
    }

    fn rev(name: &str) -> RevisionId {
        RevisionId::from(name)
    }

    fn sample_weave() -> Weave {
        let mut w = Weave::new(None);
        w.add_lines(&rev("r1"), &[], &lines(&["a\n", "b\n", "c\n"]))
            .unwrap();
        w.add_lines(&rev("r2"), &[rev("r1")], &lines(&["a\n", "B\n", "c\n"]))
            .unwrap();
        w.add_lines(&rev("r3"), &[rev("r1")], &lines(&["a\n", "b\n", "C\n"]))
            .unwrap();
        w
    }

    #[test]
    fn test_round_trip() {
        let w = sample_weave();
        let mut buf = Vec::new();
        write_weave(&w, &mut buf).unwrap();
        assert!(buf.starts_with(FORMAT_V5));
        let read = read_weave(&mut std::io::Cursor::new(&buf), None).unwrap();
        assert_eq!(read.get_lines(&rev("r1")).unwrap(), lines(&["a\n", "b\n", "c\n"]));
        assert_eq!(read.get_lines(&rev("r2")).unwrap(), lines(&["a\n", "B\n", "c\n"]));
        assert_eq!(read.get_lines(&rev("r3")).unwrap(), lines(&["a\n", "b\n", "C\n"]));
        read.check().unwrap();
    }

    #[test]
    fn test_round_trip_missing_final_newline() {
        let mut w = Weave::new(None);
        w.add_lines(&rev("r1"), &[], &lines(&["a\n", "tail"])).unwrap();
        let mut buf = Vec::new();
        write_weave(&w, &mut buf).unwrap();
        let read = read_weave(&mut std::io::Cursor::new(&buf), None).unwrap();
        assert_eq!(read.get_lines(&rev("r1")).unwrap(), lines(&["a\n", "tail"]));
    }

    #[test]
    fn test_empty_weave_serializes() {
        let w = Weave::new(None);
        let mut buf = Vec::new();
        write_weave(&w, &mut buf).unwrap();
        assert_eq!(buf, b"# bzr weave file v5\nw\nW\n".to_vec());
        let read = read_weave(&mut std::io::Cursor::new(&buf), None).unwrap();
        assert_eq!(read.num_versions(), 0);
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut cursor = std::io::Cursor::new(b"# bzr weave file v4\nw\nW\n".to_vec());
        assert!(matches!(
            read_weave(&mut cursor, None),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.weave");
        let w = sample_weave();
        write_weave_atomic(&w, &path).unwrap();
        // no stray temp file remains
        assert!(!dir.path().join("file.tmp").exists());
        let read = read_weave_file(&path).unwrap();
        assert_eq!(read.num_versions(), 3);
        read.check().unwrap();
    }
}
