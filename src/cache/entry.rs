//! On-disk layout of a single entry directory.
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! concurrent reader sees either the previous file or the new one. The
//! expiration file is written last: once it is valid, the content is complete.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::Path,
};

pub(crate) const FILE_PAGE: &str = "page.html";
pub(crate) const FILE_URL: &str = "url.txt";
pub(crate) const FILE_EXPIRES: &str = "expires_at.txt";

const TEMP_PREFIX: &str = ".tmp-";

/// Parsed state of an entry's expiration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    Missing,
    Corrupt,
    At(i64),
}

impl Expiry {
    /// An entry stays valid strictly before its expiration instant.
    pub(crate) fn is_valid_at(self, now: i64) -> bool {
        matches!(self, Expiry::At(expires_at) if expires_at > now)
    }
}

pub(crate) fn read_expiry(entry_dir: &Path) -> Expiry {
    match fs::read_to_string(entry_dir.join(FILE_EXPIRES)) {
        Ok(text) => text
            .trim()
            .parse::<i64>()
            .map_or(Expiry::Corrupt, Expiry::At),
        Err(err) if err.kind() == ErrorKind::NotFound => Expiry::Missing,
        Err(_) => Expiry::Corrupt,
    }
}

pub(crate) fn read_content(entry_dir: &Path) -> io::Result<String> {
    fs::read_to_string(entry_dir.join(FILE_PAGE))
}

pub(crate) fn read_url(entry_dir: &Path) -> io::Result<String> {
    fs::read_to_string(entry_dir.join(FILE_URL))
}

pub(crate) fn write_entry(
    entry_dir: &Path,
    relative_url: &str,
    content: &str,
    expires_at: i64,
) -> io::Result<()> {
    write_atomic(entry_dir, FILE_PAGE, content.as_bytes())?;
    write_atomic(entry_dir, FILE_URL, relative_url.as_bytes())?;
    write_atomic(entry_dir, FILE_EXPIRES, expires_at.to_string().as_bytes())
}

fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> io::Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(dir.join(name)).map_err(|err| err.error)?;
    Ok(())
}
