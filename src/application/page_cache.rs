//! Render-pipeline facade over [`PageCache`].
//!
//! The renderer asks [`PageCacheService::serve`] for a URL; on a miss it
//! renders the page and decides, through [`RenderCachePolicy`], whether and
//! for how long the result may be cached. Page updates call
//! [`PageCacheService::invalidate_page`] with every route the page is
//! reachable under (one per translation).

use tracing::{info, warn};

use crate::cache::{CacheError, Invalidation, PageCache, RequestContext, StoreOutcome};

/// Cacheability of one render cycle.
///
/// Every block rendered during the cycle may restrict the policy. The
/// effective lifetime is the smallest one requested; a single non-cacheable
/// block disables caching for the whole page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderCachePolicy {
    cacheable: bool,
    lifetime_minutes: i64,
}

impl RenderCachePolicy {
    pub fn new(default_lifetime_minutes: i64) -> Self {
        Self {
            cacheable: default_lifetime_minutes > 0,
            lifetime_minutes: default_lifetime_minutes,
        }
    }

    /// Apply a block's cache settings.
    ///
    /// `cacheable == false` or a non-positive lifetime disables caching for
    /// the rest of the cycle.
    pub fn restrict(&mut self, cacheable: bool, lifetime_minutes: Option<i64>) {
        if !cacheable || lifetime_minutes.is_some_and(|minutes| minutes <= 0) {
            self.cacheable = false;
            return;
        }

        if let Some(minutes) = lifetime_minutes {
            self.lifetime_minutes = self.lifetime_minutes.min(minutes);
        }
    }

    pub fn disable(&mut self) {
        self.cacheable = false;
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Lifetime to store with; zero when caching is disabled.
    pub fn lifetime_minutes(&self) -> i64 {
        if self.cacheable {
            self.lifetime_minutes
        } else {
            0
        }
    }
}

/// How [`PageCacheService::serve`] produced its HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    /// Served from the cache, possibly as an ancestor skeleton.
    Cached(String),
    /// Rendered now; `stored` tells whether the result was cached.
    Rendered { html: String, stored: StoreOutcome },
}

impl Served {
    pub fn html(&self) -> &str {
        match self {
            Served::Cached(html) | Served::Rendered { html, .. } => html,
        }
    }

    pub fn into_html(self) -> String {
        match self {
            Served::Cached(html) | Served::Rendered { html, .. } => html,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Served::Cached(_))
    }
}

/// Counts from [`PageCacheService::invalidate_page`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInvalidation {
    pub invalidated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PageCacheService {
    cache: PageCache,
}

impl PageCacheService {
    pub fn new(cache: PageCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Serve `relative_url` from the cache or render and store it.
    ///
    /// Errors from `render` propagate; cache failures never do.
    pub fn serve<F, E>(
        &self,
        relative_url: &str,
        context: &RequestContext,
        render: F,
    ) -> Result<Served, E>
    where
        F: FnOnce(&mut RenderCachePolicy) -> Result<String, E>,
    {
        if let Some(html) = self.cache.get_with(relative_url, context) {
            return Ok(Served::Cached(html));
        }

        let mut policy = RenderCachePolicy::new(self.cache.config().default_lifetime_minutes);
        let html = render(&mut policy)?;
        let stored = self
            .cache
            .store(relative_url, &html, policy.lifetime_minutes());

        Ok(Served::Rendered { html, stored })
    }

    /// Invalidate every route a page is published under.
    ///
    /// Failures are logged and counted; stale entries then live until they
    /// expire.
    pub fn invalidate_page<'a, I>(&self, routes: I) -> PageInvalidation
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut summary = PageInvalidation::default();

        for route in routes {
            match self.cache.invalidate(route) {
                Ok(Invalidation::NotApplicable) => {
                    summary.skipped += 1;
                }
                Ok(_) => summary.invalidated += 1,
                Err(err) => {
                    summary.failed += 1;
                    log_invalidation_failure(route, &err);
                }
            }
        }

        info!(
            op = "invalidate_page",
            invalidated = summary.invalidated,
            skipped = summary.skipped,
            failed = summary.failed,
            "page cache invalidated"
        );
        summary
    }
}

fn log_invalidation_failure(route: &str, err: &CacheError) {
    warn!(
        op = "invalidate_page",
        result = "error",
        route,
        error = %err,
        "Failed to invalidate cached pages; stale content may persist until expiry"
    );
}
