use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub fn sha_file(f: &mut dyn Read) -> Result<String, std::io::Error> {
    let mut s = Sha1::new();
    std::io::copy(f, &mut s)?;
    Ok(format!("{:x}", s.finalize()))
}

pub fn sha_file_by_name<P: AsRef<Path>>(path: P) -> Result<String, std::io::Error> {
    let mut f = File::open(path)?;
    sha_file(&mut f)
}

/// SHA-1 of a sequence of byte strings, hashed back to back.
pub fn sha_chunks<I, S>(chunks: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut s = Sha1::new();
    for chunk in chunks {
        s.update(chunk.as_ref());
    }
    format!("{:x}", s.finalize())
}

pub fn sha_string(string: &[u8]) -> String {
    let mut s = Sha1::new();
    s.update(string);
    format!("{:x}", s.finalize())
}
