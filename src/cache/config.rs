//! Cache configuration.
//!
//! Controls where pages are stored and how far a single URL family may grow.
//! Built from `[cache]` in `pagecache.toml` or constructed directly.

use std::path::PathBuf;

// Default values for cache configuration
const DEFAULT_MAX_DEPTH: usize = 7;
const DEFAULT_MAX_VARIANTS: usize = 50;
const DEFAULT_LIFETIME_MINUTES: i64 = 7 * 24 * 60;

/// Number of ancestor levels searched for a skeleton entry.
pub const SKELETON_MAX_DEPTH: usize = 10;

/// Per-instance cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root. Every mutating operation is confined to this directory.
    pub root: PathBuf,
    /// Maximum number of separators in `<slug path>/<hash>`.
    pub max_depth: usize,
    /// Maximum number of hash variants stored under one slug path.
    pub max_variants: usize,
    /// Lifetime applied by callers that do not pick one themselves.
    pub default_lifetime_minutes: i64,
}

impl CacheConfig {
    /// Default limits rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_variants: DEFAULT_MAX_VARIANTS,
            default_lifetime_minutes: DEFAULT_LIFETIME_MINUTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            root: settings.directory.clone(),
            max_depth: settings.max_depth.get(),
            max_variants: settings.max_variants.get(),
            default_lifetime_minutes: i64::from(settings.default_lifetime_minutes.get()),
        }
    }
}
