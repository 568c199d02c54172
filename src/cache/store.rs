//! Entry reads and writes.
//!
//! Failures here never reach the caller as errors: an unreadable entry is a
//! miss and a write that cannot complete is dropped.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use metrics::counter;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::entry::{self, Expiry};
use super::keys::{CachePath, derive_path, is_variant_name};
use super::skeleton::RequestContext;

pub const METRIC_HIT: &str = "pagecache_hit_total";
pub const METRIC_MISS: &str = "pagecache_miss_total";
pub const METRIC_SKELETON_HIT: &str = "pagecache_skeleton_hit_total";
pub const METRIC_STORE: &str = "pagecache_store_total";
pub const METRIC_STORE_REJECTED: &str = "pagecache_store_rejected_total";
pub const METRIC_PURGE: &str = "pagecache_purge_total";
pub const METRIC_SANDBOX_VIOLATION: &str = "pagecache_sandbox_violation_total";

/// What happened to a [`PageCache::store`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Lifetime was zero or negative; the response is not cacheable.
    Disabled,
    /// The slug path is nested deeper than `max_depth`.
    TooDeep,
    /// The slug path already holds `max_variants` variants.
    TooManyVariants,
    /// The filesystem refused the write.
    Failed,
}

impl StoreOutcome {
    pub fn is_stored(self) -> bool {
        self == StoreOutcome::Stored
    }

    fn as_str(self) -> &'static str {
        match self {
            StoreOutcome::Stored => "stored",
            StoreOutcome::Disabled => "disabled",
            StoreOutcome::TooDeep => "too_deep",
            StoreOutcome::TooManyVariants => "too_many_variants",
            StoreOutcome::Failed => "failed",
        }
    }
}

/// Filesystem-backed page cache rooted at [`CacheConfig::root`].
///
/// Instances are cheap to clone and hold no in-process state besides their
/// configuration; all coordination happens through the filesystem.
#[derive(Clone)]
pub struct PageCache {
    config: Arc<CacheConfig>,
    clock: Arc<dyn Clock>,
}

impl PageCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.unix_now()
    }

    /// Absolute entry directory for `relative_url`.
    pub fn path_for_url(&self, relative_url: &str) -> PathBuf {
        derive_path(relative_url).entry(self.root())
    }

    /// Cached content for `relative_url`, falling back to a skeleton.
    pub fn get(&self, relative_url: &str) -> Option<String> {
        self.get_with(relative_url, &RequestContext::default())
    }

    /// Cached content for `relative_url` as seen by the given request.
    pub fn get_with(&self, relative_url: &str, context: &RequestContext) -> Option<String> {
        let entry_dir = self.path_for_url(relative_url);

        let content = if entry_dir.is_dir() {
            self.read_valid(relative_url, &entry_dir)
        } else {
            self.resolve_skeleton(relative_url, context)
        };

        match content {
            Some(content) => {
                counter!(METRIC_HIT).increment(1);
                debug!(op = "get", result = "hit", url = relative_url, "page cache hit");
                Some(content)
            }
            None => {
                counter!(METRIC_MISS).increment(1);
                debug!(op = "get", result = "miss", url = relative_url, "page cache miss");
                None
            }
        }
    }

    /// Expiration of the entry stored for exactly `relative_url`, if readable.
    pub fn expires_at(&self, relative_url: &str) -> Option<i64> {
        match entry::read_expiry(&self.path_for_url(relative_url)) {
            Expiry::At(unix_seconds) => Some(unix_seconds),
            Expiry::Missing | Expiry::Corrupt => None,
        }
    }

    /// Exact-URL lookup with expiration but without skeleton fallback.
    pub(crate) fn lookup_exact(&self, relative_url: &str) -> Option<String> {
        let entry_dir = self.path_for_url(relative_url);
        if !entry_dir.is_dir() {
            return None;
        }
        self.read_valid(relative_url, &entry_dir)
    }

    fn read_valid(&self, relative_url: &str, entry_dir: &Path) -> Option<String> {
        let expiry = entry::read_expiry(entry_dir);
        if !expiry.is_valid_at(self.now()) {
            self.purge(relative_url, expiry);
            return None;
        }

        match entry::read_content(entry_dir) {
            Ok(content) => Some(content),
            Err(err) => {
                warn!(
                    op = "get",
                    result = "read_error",
                    url = relative_url,
                    path = %entry_dir.display(),
                    error = %err,
                    "Failed to read cached page; treating as miss"
                );
                None
            }
        }
    }

    fn purge(&self, relative_url: &str, expiry: Expiry) {
        counter!(METRIC_PURGE).increment(1);
        let reason = match expiry {
            Expiry::Missing => "missing_expiry",
            Expiry::Corrupt => "corrupt_expiry",
            Expiry::At(_) => "expired",
        };

        match self.clear_url(relative_url) {
            Ok(()) => debug!(
                op = "purge",
                result = "ok",
                reason,
                url = relative_url,
                "Purged invalid cache entry"
            ),
            Err(err) => warn!(
                op = "purge",
                result = "error",
                reason,
                url = relative_url,
                error = %err,
                "Failed to purge invalid cache entry"
            ),
        }
    }

    /// Store `content` for `relative_url` for `lifetime_minutes`.
    ///
    /// Best effort: the outcome is informational and callers may ignore it.
    pub fn store(&self, relative_url: &str, content: &str, lifetime_minutes: i64) -> StoreOutcome {
        let outcome = self.try_store(relative_url, content, lifetime_minutes);

        match outcome {
            StoreOutcome::Stored => counter!(METRIC_STORE).increment(1),
            StoreOutcome::TooDeep | StoreOutcome::TooManyVariants => {
                counter!(METRIC_STORE_REJECTED, "reason" => outcome.as_str()).increment(1)
            }
            StoreOutcome::Disabled | StoreOutcome::Failed => {}
        }
        debug!(
            op = "store",
            result = outcome.as_str(),
            url = relative_url,
            "page cache store"
        );

        outcome
    }

    fn try_store(&self, relative_url: &str, content: &str, lifetime_minutes: i64) -> StoreOutcome {
        if lifetime_minutes <= 0 {
            return StoreOutcome::Disabled;
        }

        let path = derive_path(relative_url);
        if let Some(rejection) = self.admission(&path) {
            return rejection;
        }

        let entry_dir = path.entry(self.root());
        let expires_at = self
            .now()
            .saturating_add(lifetime_minutes.saturating_mul(60));

        let written = fs::create_dir_all(&entry_dir)
            .and_then(|()| entry::write_entry(&entry_dir, relative_url, content, expires_at));

        match written {
            Ok(()) => StoreOutcome::Stored,
            Err(err) => {
                warn!(
                    op = "store",
                    result = "error",
                    url = relative_url,
                    path = %entry_dir.display(),
                    error = %err,
                    "Failed to write cache entry; continuing without cache"
                );
                StoreOutcome::Failed
            }
        }
    }

    /// Whether a new entry may be created at `path`.
    ///
    /// Read-then-act: concurrent writers near the variant limit can overshoot
    /// it by a few entries.
    pub fn can_use(&self, path: &CachePath) -> bool {
        self.admission(path).is_none()
    }

    fn admission(&self, path: &CachePath) -> Option<StoreOutcome> {
        if path.depth() > self.config.max_depth {
            return Some(StoreOutcome::TooDeep);
        }

        let container = path.container(self.root());
        if !container.is_dir() || container.join(path.hash()).is_dir() {
            return None;
        }

        (count_variants(&container) >= self.config.max_variants)
            .then_some(StoreOutcome::TooManyVariants)
    }
}

fn count_variants(container: &Path) -> usize {
    let Ok(entries) = fs::read_dir(container) else {
        return 0;
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .filter(|entry| entry.file_name().to_str().is_some_and(is_variant_name))
        .count()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn cache_in(dir: &TempDir) -> (PageCache, ManualClock) {
        let clock = ManualClock::new(1_700_000_000);
        let cache = PageCache::with_clock(
            CacheConfig::new(dir.path().join("cache")),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn store_then_get_roundtrip() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        assert_eq!(cache.store("/blog/a", "<h1>A</h1>", 10), StoreOutcome::Stored);
        assert_eq!(cache.get("/blog/a").as_deref(), Some("<h1>A</h1>"));
    }

    #[test]
    fn store_writes_all_entry_files() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, clock) = cache_in(&dir);

        cache.store("/docs?lang=en", "body", 2);

        let entry_dir = cache.path_for_url("/docs?lang=en");
        assert_eq!(entry::read_url(&entry_dir).expect("url"), "/docs?lang=en");
        assert_eq!(
            entry::read_expiry(&entry_dir),
            Expiry::At(clock.unix_now() + 120)
        );
        assert_eq!(cache.expires_at("/docs?lang=en"), Some(clock.unix_now() + 120));
        assert_eq!(cache.expires_at("/docs"), None);
    }

    #[test]
    fn non_positive_lifetime_is_a_noop() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        assert_eq!(cache.store("/a", "x", 0), StoreOutcome::Disabled);
        assert_eq!(cache.store("/a", "x", -5), StoreOutcome::Disabled);
        assert!(!cache.path_for_url("/a").exists());
        assert!(cache.get("/a").is_none());
    }

    #[test]
    fn expired_entry_misses_and_is_removed() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, clock) = cache_in(&dir);

        cache.store("/news", "fresh", 5);
        clock.advance(Duration::from_secs(4 * 60));
        assert_eq!(cache.get("/news").as_deref(), Some("fresh"));

        clock.advance(Duration::from_secs(60));
        assert!(cache.get("/news").is_none());
        assert!(!cache.path_for_url("/news").exists());
    }

    #[test]
    fn missing_expiry_purges_entry() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/about", "hi", 5);
        let entry_dir = cache.path_for_url("/about");
        fs::remove_file(entry_dir.join(entry::FILE_EXPIRES)).expect("remove expiry");

        assert!(cache.get("/about").is_none());
        assert!(!entry_dir.exists());
    }

    #[test]
    fn corrupt_expiry_purges_entry() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/about", "hi", 5);
        let entry_dir = cache.path_for_url("/about");
        fs::write(entry_dir.join(entry::FILE_EXPIRES), "1700x").expect("corrupt");

        assert!(cache.get("/about").is_none());
        assert!(!entry_dir.exists());
    }

    #[test]
    fn missing_content_is_a_miss_without_purge() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/about", "hi", 5);
        let entry_dir = cache.path_for_url("/about");
        fs::remove_file(entry_dir.join(entry::FILE_PAGE)).expect("remove page");

        assert!(cache.get("/about").is_none());
        assert!(entry_dir.is_dir());
    }

    #[test]
    fn depth_bound_rejects_deep_urls() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        assert!(cache.store("/a/b/c/d/e/f/g", "ok", 5).is_stored());
        assert_eq!(
            cache.store("/a/b/c/d/e/f/g/h", "deep", 5),
            StoreOutcome::TooDeep
        );
        assert!(!cache.can_use(&derive_path("/a/b/c/d/e/f/g/h")));
        assert!(cache.get("/a/b/c/d/e/f/g/h").is_none());
    }

    #[test]
    fn variant_bound_rejects_extra_query_variants() {
        let dir = TempDir::new().expect("temp dir");
        let clock = ManualClock::new(0);
        let config = CacheConfig {
            max_variants: 3,
            ..CacheConfig::new(dir.path())
        };
        let cache = PageCache::with_clock(config, Arc::new(clock));

        for page in 0..3 {
            let url = format!("/list?page={page}");
            assert!(cache.store(&url, "ok", 5).is_stored(), "variant {page}");
        }

        assert_eq!(
            cache.store("/list?page=3", "nope", 5),
            StoreOutcome::TooManyVariants
        );
        assert!(!cache.path_for_url("/list?page=3").exists());

        // Existing variants can still be refreshed at the limit.
        assert!(cache.store("/list?page=1", "refreshed", 5).is_stored());
        assert_eq!(cache.get("/list?page=1").as_deref(), Some("refreshed"));
    }

    #[test]
    fn child_pages_do_not_count_as_variants() {
        let dir = TempDir::new().expect("temp dir");
        let config = CacheConfig {
            max_variants: 1,
            ..CacheConfig::new(dir.path())
        };
        let cache = PageCache::with_clock(config, Arc::new(ManualClock::new(0)));

        assert!(cache.store("/blog/a", "a", 5).is_stored());
        assert!(cache.store("/blog/b", "b", 5).is_stored());
        assert!(cache.store("/blog", "index", 5).is_stored());
    }

    #[test]
    fn root_url_is_stored_under_sentinel() {
        let dir = TempDir::new().expect("temp dir");
        let (cache, _) = cache_in(&dir);

        cache.store("/", "home", 5);

        assert_eq!(cache.get("").as_deref(), Some("home"));
        assert!(cache.root().join("-").is_dir());
    }
}
