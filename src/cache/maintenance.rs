//! Subtree deletion: prefix invalidation, single-URL and full clears, and the
//! optional expired-entry sweep.
//!
//! Every deletion goes through [`PageCache::remove_directory_recursive`], which
//! refuses any target that does not resolve inside the cache root.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use metrics::counter;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::entry::{self, FILE_EXPIRES};
use super::error::CacheError;
use super::keys::{ROOT_SENTINEL, derive_path, slugify_path, strip_query};
use super::store::{METRIC_PURGE, METRIC_SANDBOX_VIOLATION, PageCache};

const WILDCARD_MARKER: char = '*';
const PARAMETER_MARKER: char = '{';

/// Result of [`PageCache::invalidate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// The route has no wildcard or parameter; use [`PageCache::clear_url`].
    NotApplicable,
    /// Nothing was cached under the route's prefix.
    NothingCached,
    /// The slug container at this path was deleted.
    Removed(PathBuf),
    /// The prefix covered the whole site; the cache was emptied.
    ClearedAll,
}

/// Counts from one [`PageCache::sweep_expired`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub entries: usize,
    pub purged: usize,
    pub failed: usize,
}

/// Literal part of a route pattern before its first wildcard or parameter.
///
/// When both markers occur the shorter prefix wins. Returns `None` for exact
/// routes.
pub fn invalidation_prefix(route: &str) -> Option<&str> {
    let cut = match (route.find(WILDCARD_MARKER), route.find(PARAMETER_MARKER)) {
        (Some(wildcard), Some(parameter)) => wildcard.min(parameter),
        (Some(index), None) | (None, Some(index)) => index,
        (None, None) => return None,
    };
    Some(&route[..cut])
}

impl PageCache {
    /// Delete every cached variant whose URL starts with the literal prefix of
    /// `route`.
    ///
    /// A prefix ending mid-segment (`/blog/post-{id}`) widens to its directory
    /// (`/blog/`), since slugified segments cannot be matched partially.
    /// A marker in the query (`/search?q=*`) removes only that page's variants.
    pub fn invalidate(&self, route: &str) -> Result<Invalidation, CacheError> {
        let Some(prefix) = invalidation_prefix(route) else {
            debug!(
                op = "invalidate",
                result = "not_applicable",
                route,
                "exact route; nothing to invalidate"
            );
            return Ok(Invalidation::NotApplicable);
        };

        // A marker inside the query string follows a complete path.
        let has_query = prefix.contains('?');
        let directory = if has_query {
            strip_query(prefix)
        } else {
            prefix.rfind('/').map_or("", |index| &prefix[..=index])
        };
        if !has_query && slugify_path(directory) == ROOT_SENTINEL {
            self.clear_all()?;
            info!(
                op = "invalidate",
                result = "cleared_all",
                route,
                "route prefix covers the whole cache"
            );
            return Ok(Invalidation::ClearedAll);
        }

        let container = derive_path(directory).container(self.root());
        match self.remove_directory_recursive(&container) {
            Ok(()) => {
                info!(
                    op = "invalidate",
                    result = "removed",
                    route,
                    path = %container.display(),
                    "invalidated cached pages"
                );
                Ok(Invalidation::Removed(container))
            }
            Err(CacheError::Missing(_)) => Ok(Invalidation::NothingCached),
            Err(err) => Err(err),
        }
    }

    /// Delete the entry for exactly `relative_url`.
    pub fn clear_url(&self, relative_url: &str) -> Result<(), CacheError> {
        self.remove_directory_recursive(&self.path_for_url(relative_url))
    }

    /// Delete everything under the cache root, leaving the root itself in
    /// place (a symlinked root keeps its link).
    pub fn clear_all(&self) -> Result<(), CacheError> {
        let root = match canonicalize(self.root()) {
            Ok(root) => root,
            Err(CacheError::Missing(_)) => {
                fs::create_dir_all(self.root())
                    .map_err(|err| CacheError::io(self.root(), err))?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !root.is_dir() {
            return Err(CacheError::NotADirectory(root));
        }

        let children = fs::read_dir(&root).map_err(|err| CacheError::io(&root, err))?;
        for child in children {
            let child = child.map_err(|err| CacheError::io(&root, err))?;
            let path = child.path();
            // file_type does not follow links; a linked directory is unlinked.
            let removed = match child.file_type() {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
                Ok(_) => fs::remove_file(&path),
                Err(err) => Err(err),
            };
            match removed {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(CacheError::io(&path, err)),
            }
        }

        info!(
            op = "clear_all",
            result = "ok",
            root = %self.root().display(),
            "cache cleared"
        );
        Ok(())
    }

    /// Recursively delete `path`, which must resolve to the cache root or a
    /// directory inside it.
    ///
    /// Both sides are canonicalized first, so symlinks and `..` cannot point
    /// the deletion elsewhere. Links found inside the tree are unlinked, not
    /// followed.
    pub fn remove_directory_recursive(&self, path: &Path) -> Result<(), CacheError> {
        let root = canonicalize(self.root())?;
        let target = canonicalize(path)?;

        if !target.starts_with(&root) {
            counter!(METRIC_SANDBOX_VIOLATION).increment(1);
            warn!(
                op = "remove_dir",
                result = "outside_root",
                path = %path.display(),
                resolved = %target.display(),
                root = %root.display(),
                "Refusing to delete a path outside the cache root"
            );
            return Err(CacheError::OutsideRoot { path: target, root });
        }

        if !target.is_dir() {
            return Err(CacheError::NotADirectory(target));
        }

        fs::remove_dir_all(&target).map_err(|err| match err.kind() {
            ErrorKind::NotFound => CacheError::Missing(target.clone()),
            _ => CacheError::io(&target, err),
        })
    }

    /// Purge every entry whose expiration has passed or cannot be parsed.
    ///
    /// Entries without an expiration file are skipped; they may still be
    /// mid-write and are purged lazily on their next read instead.
    pub fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.now();
        let mut stale = Vec::new();

        for item in WalkDir::new(self.root())
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !item.file_type().is_file() || item.file_name() != FILE_EXPIRES {
                continue;
            }
            let Some(entry_dir) = item.path().parent() else {
                continue;
            };

            report.entries += 1;
            if !entry::read_expiry(entry_dir).is_valid_at(now) {
                stale.push(entry_dir.to_path_buf());
            }
        }

        for entry_dir in stale {
            let url = entry::read_url(&entry_dir).unwrap_or_default();
            match self.remove_directory_recursive(&entry_dir) {
                Ok(()) => {
                    report.purged += 1;
                    counter!(METRIC_PURGE).increment(1);
                    debug!(
                        op = "sweep",
                        result = "purged",
                        url = %url,
                        "swept expired entry"
                    );
                }
                Err(CacheError::Missing(_)) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        op = "sweep",
                        result = "error",
                        url = %url,
                        error = %err,
                        "Failed to sweep expired entry"
                    );
                }
            }
        }

        info!(
            op = "sweep",
            entries = report.entries,
            purged = report.purged,
            failed = report.failed,
            "cache sweep finished"
        );
        report
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, CacheError> {
    fs::canonicalize(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => CacheError::Missing(path.to_path_buf()),
        _ => CacheError::io(path, err),
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::cache::{CacheConfig, ManualClock};

    fn cache_in(dir: &TempDir) -> (PageCache, ManualClock) {
        let clock = ManualClock::new(1_700_000_000);
        let root = dir.path().join("cache");
        fs::create_dir_all(&root).expect("cache root");
        let cache = PageCache::with_clock(CacheConfig::new(root), Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn prefix_stops_at_first_marker() {
        assert_eq!(invalidation_prefix("/blog/*"), Some("/blog/"));
        assert_eq!(invalidation_prefix("/blog/{slug}"), Some("/blog/"));
        assert_eq!(invalidation_prefix("/shop/{cat}/items/*"), Some("/shop/"));
        assert_eq!(invalidation_prefix("/a/*/b/{id}"), Some("/a/"));
        assert_eq!(invalidation_prefix("/about"), None);
    }

    #[test]
    fn invalidate_removes_every_variant_under_prefix() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        for url in ["/blog/a", "/blog/b", "/blog/b?x=1", "/about"] {
            assert!(cache.store(url, url, 10).is_stored());
        }

        let outcome = cache.invalidate("/blog/*").expect("invalidate");
        assert!(matches!(outcome, Invalidation::Removed(_)));

        assert!(cache.get("/blog/a").is_none());
        assert!(cache.get("/blog/b").is_none());
        assert!(cache.get("/blog/b?x=1").is_none());
        assert_eq!(cache.get("/about").as_deref(), Some("/about"));
    }

    #[test]
    fn invalidate_removes_skeletons_under_prefix() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/blog/skeleton-depth1", "<shell/>", 10);
        cache.invalidate("/blog/{slug}").expect("invalidate");

        assert!(cache.get("/blog/post-1").is_none());
    }

    #[test]
    fn partial_segment_prefix_widens_to_directory() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/blog/post-42", "post", 10);
        cache.invalidate("/blog/post-{id}").expect("invalidate");

        assert!(cache.get("/blog/post-42").is_none());
    }

    #[test]
    fn query_marker_only_clears_its_page() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/search?q=rust", "rust", 10);
        cache.store("/search?q=go", "go", 10);
        cache.store("/about", "about", 10);

        let outcome = cache.invalidate("/search?q=*").expect("invalidate");

        assert!(matches!(outcome, Invalidation::Removed(_)));
        assert!(cache.get("/search?q=rust").is_none());
        assert!(cache.get("/search?q=go").is_none());
        assert_eq!(cache.get("/about").as_deref(), Some("about"));
    }

    #[test]
    fn root_query_marker_keeps_other_pages() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/?page=2", "home two", 10);
        cache.store("/about", "about", 10);

        let outcome = cache.invalidate("/?page={n}").expect("invalidate");

        assert!(matches!(outcome, Invalidation::Removed(_)));
        assert!(cache.get("/?page=2").is_none());
        assert_eq!(cache.get("/about").as_deref(), Some("about"));
    }

    #[test]
    fn exact_route_is_not_applicable() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/about", "about", 10);

        assert_eq!(
            cache.invalidate("/about").expect("invalidate"),
            Invalidation::NotApplicable
        );
        assert!(cache.get("/about").is_some());
    }

    #[test]
    fn uncached_prefix_reports_nothing_cached() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        assert_eq!(
            cache.invalidate("/events/*").expect("invalidate"),
            Invalidation::NothingCached
        );
    }

    #[test]
    fn site_wide_route_clears_everything() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/", "home", 10);
        cache.store("/blog/a", "a", 10);

        assert_eq!(
            cache.invalidate("/*").expect("invalidate"),
            Invalidation::ClearedAll
        );
        assert!(cache.get("/").is_none());
        assert!(cache.get("/blog/a").is_none());
        assert!(cache.root().is_dir());
    }

    #[test]
    fn clear_url_removes_only_that_variant() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/list", "plain", 10);
        cache.store("/list?page=2", "page two", 10);

        cache.clear_url("/list?page=2").expect("clear");

        assert!(cache.get("/list?page=2").is_none());
        assert_eq!(cache.get("/list").as_deref(), Some("plain"));
        assert!(matches!(
            cache.clear_url("/list?page=2"),
            Err(CacheError::Missing(_))
        ));
    }

    #[test]
    fn clear_all_leaves_an_empty_root() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/a", "a", 10);
        cache.store("/b/c", "c", 10);

        cache.clear_all().expect("clear all");

        assert!(cache.root().is_dir());
        assert_eq!(fs::read_dir(cache.root()).expect("read root").count(), 0);
        assert!(cache.get("/a").is_none());
        assert!(cache.get("/b/c").is_none());
    }

    #[test]
    fn clear_all_creates_missing_root() {
        let dir = TempDir::new().expect("temp dir");
        let cache = PageCache::new(CacheConfig::new(dir.path().join("not-yet")));

        cache.clear_all().expect("clear all");

        assert!(cache.root().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn clear_all_keeps_a_symlinked_root_usable() {
        let dir = TempDir::new().expect("temp dir");
        let real = dir.path().join("real");
        fs::create_dir_all(&real).expect("real root");
        let link = dir.path().join("linked");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");
        let cache = PageCache::with_clock(
            CacheConfig::new(&link),
            Arc::new(ManualClock::new(1_700_000_000)),
        );

        assert!(cache.store("/a", "a", 10).is_stored());
        cache.clear_all().expect("clear all");

        assert!(cache.root().is_dir());
        assert!(link.symlink_metadata().expect("link").file_type().is_symlink());
        assert_eq!(fs::read_dir(&real).expect("read real").count(), 0);
        assert!(cache.store("/a", "again", 10).is_stored());
        assert_eq!(cache.get("/a").as_deref(), Some("again"));
    }

    #[cfg(unix)]
    #[test]
    fn clear_all_unlinks_inner_symlinks_without_following() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);
        let outside = dir.path().join("elsewhere");
        fs::create_dir_all(&outside).expect("outside dir");
        fs::write(outside.join("data.txt"), "keep me").expect("write");
        std::os::unix::fs::symlink(&outside, cache.root().join("evil")).expect("symlink");

        cache.clear_all().expect("clear all");

        assert!(!cache.root().join("evil").exists());
        assert!(outside.join("data.txt").is_file());
    }

    #[test]
    fn refuses_to_delete_outside_root() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);
        let outside = dir.path().join("precious");
        fs::create_dir_all(&outside).expect("outside dir");
        fs::write(outside.join("data.txt"), "keep me").expect("write");

        let err = cache
            .remove_directory_recursive(&outside)
            .expect_err("outside root");
        assert!(matches!(err, CacheError::OutsideRoot { .. }));

        let traversal = cache.root().join("..").join("precious");
        let err = cache
            .remove_directory_recursive(&traversal)
            .expect_err("traversal");
        assert!(matches!(err, CacheError::OutsideRoot { .. }));

        assert!(outside.join("data.txt").is_file());
    }

    #[test]
    fn sibling_with_shared_name_prefix_is_outside_root() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);
        let sibling = dir.path().join("cache-other");
        fs::create_dir_all(&sibling).expect("sibling");

        let err = cache
            .remove_directory_recursive(&sibling)
            .expect_err("sibling outside root");
        assert!(matches!(err, CacheError::OutsideRoot { .. }));
        assert!(sibling.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_slug_container_cannot_escape() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);
        let outside = dir.path().join("elsewhere");
        fs::create_dir_all(&outside).expect("outside dir");
        fs::write(outside.join("data.txt"), "keep me").expect("write");
        std::os::unix::fs::symlink(&outside, cache.root().join("evil")).expect("symlink");

        let err = cache.invalidate("/evil/*").expect_err("escape refused");
        assert!(matches!(err, CacheError::OutsideRoot { .. }));
        assert!(outside.join("data.txt").is_file());
    }

    #[test]
    fn refuses_missing_and_non_directory_targets() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);
        let file = cache.root().join("stray.txt");
        fs::write(&file, "x").expect("write");

        assert!(matches!(
            cache.remove_directory_recursive(&cache.root().join("nope")),
            Err(CacheError::Missing(_))
        ));
        assert!(matches!(
            cache.remove_directory_recursive(&file),
            Err(CacheError::NotADirectory(_))
        ));
        assert!(file.is_file());
    }

    #[test]
    fn sweep_purges_only_expired_entries() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, clock) = cache_in(&dir);

        cache.store("/short", "short", 1);
        cache.store("/long", "long", 60);
        cache.store("/blog/skeleton-depth1", "shell", 1);
        clock.advance(Duration::from_secs(5 * 60));

        let report = cache.sweep_expired();

        assert_eq!(report.entries, 3);
        assert_eq!(report.purged, 2);
        assert_eq!(report.failed, 0);
        assert!(!cache.path_for_url("/short").exists());
        assert!(!cache.path_for_url("/blog/skeleton-depth1").exists());
        assert_eq!(cache.get("/long").as_deref(), Some("long"));
    }

    #[test]
    fn sweep_skips_entries_without_expiry() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        let in_flight = cache.path_for_url("/draft");
        fs::create_dir_all(&in_flight).expect("entry dir");

        let report = cache.sweep_expired();

        assert_eq!(report, SweepReport::default());
        assert!(in_flight.is_dir());
    }
}
