//! Cache path derivation.
//!
//! A relative URL maps to `<slug path>/<hash>`: the slug path comes from the
//! URL path with the query stripped and groups every variant of one page,
//! while the hash covers the full URL (query included) and tells variants
//! apart.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use slug::slugify;

/// Slug used for the site root so it never maps onto the cache root itself.
pub const ROOT_SENTINEL: &str = "-";

const HASH_HEX_LEN: usize = 64;

/// Location of one entry relative to the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CachePath {
    slug: String,
    hash: String,
}

impl CachePath {
    /// Slug path shared by all variants of a page, `/` separated.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Hex digest of the full relative URL.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// `<slug path>/<hash>`.
    pub fn relative(&self) -> String {
        format!("{}/{}", self.slug, self.hash)
    }

    /// Separator count of [`CachePath::relative`].
    pub fn depth(&self) -> usize {
        self.slug.matches('/').count() + 1
    }

    /// Directory holding every variant of this slug path.
    pub fn container(&self, root: &Path) -> PathBuf {
        self.slug
            .split('/')
            .fold(root.to_path_buf(), |path, segment| path.join(segment))
    }

    /// Directory holding this entry's files.
    pub fn entry(&self, root: &Path) -> PathBuf {
        self.container(root).join(&self.hash)
    }
}

/// Derive the cache path for a relative URL (path plus optional query).
pub fn derive_path(relative_url: &str) -> CachePath {
    let url = normalize_url(relative_url);

    CachePath {
        slug: slugify_path(strip_query(url)),
        hash: hash_url(url),
    }
}

/// Map the empty URL and `/` onto the root sentinel.
pub(crate) fn normalize_url(relative_url: &str) -> &str {
    if relative_url.is_empty() || relative_url == "/" {
        ROOT_SENTINEL
    } else {
        relative_url
    }
}

/// Drop everything from the first `?`.
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

/// Slugify each path segment and rejoin them with `/`.
///
/// Segments that slugify to nothing (`""`, `.`, `..`, punctuation) are
/// dropped, so the result never contains traversal components. A path with no
/// usable segment becomes [`ROOT_SENTINEL`].
pub fn slugify_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .map(slugify)
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        ROOT_SENTINEL.to_string()
    } else {
        segments.join("/")
    }
}

/// True when a directory name has the shape of an entry hash.
pub(crate) fn is_variant_name(name: &str) -> bool {
    name.len() == HASH_HEX_LEN
        && name
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

fn hash_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
