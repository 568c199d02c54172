//! Page response cache.
//!
//! Rendered pages are stored on disk, one directory per URL variant:
//!
//! ```text
//! <root>/<slug path>/<sha256 of relative url>/
//!     page.html        rendered content
//!     url.txt          original relative URL
//!     expires_at.txt   unix seconds
//! ```
//!
//! - **Path codec** (`keys`): URL → `<slug path>/<hash>`
//! - **Entry I/O** (`entry`, `store`): atomic writes, lazy expiration
//! - **Skeleton fallback** (`skeleton`): coarse ancestor renderings on miss
//! - **Tree maintenance** (`maintenance`): sandboxed subtree deletion
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = "/var/cache/pagecache"
//! max_depth = 7
//! max_variants = 50
//! default_lifetime_minutes = 10080
//! ```

mod clock;
mod config;
mod entry;
mod error;
mod keys;
mod maintenance;
mod skeleton;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, SKELETON_MAX_DEPTH};
pub use error::CacheError;
pub use keys::{CachePath, ROOT_SENTINEL, derive_path, slugify_path, strip_query};
pub use maintenance::{Invalidation, SweepReport, invalidation_prefix};
pub use skeleton::{RequestContext, parent_url, skeleton_url};
pub use store::{PageCache, StoreOutcome};

/// Names of the counters emitted by the cache.
pub mod metric_names {
    pub use super::store::{
        METRIC_HIT as HIT, METRIC_MISS as MISS, METRIC_PURGE as PURGE,
        METRIC_SANDBOX_VIOLATION as SANDBOX_VIOLATION, METRIC_SKELETON_HIT as SKELETON_HIT,
        METRIC_STORE as STORE, METRIC_STORE_REJECTED as STORE_REJECTED,
    };
}
