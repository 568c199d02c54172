//! Skeleton fallback.
//!
//! When a URL has no entry of its own, an ancestor may provide a coarse
//! "skeleton" rendering stored at `<ancestor>/skeleton-depth{N}`, where `N`
//! is how many levels up the ancestor sits.

use metrics::counter;
use tracing::debug;

use super::config::SKELETON_MAX_DEPTH;
use super::keys::{derive_path, strip_query};
use super::store::{METRIC_SKELETON_HIT, PageCache};

const SKELETON_SEGMENT: &str = "skeleton-depth";

/// Request properties that decide whether a skeleton may be served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// The request asks for fragment/skeleton data rather than a full page.
    pub fragment_request: bool,
    /// The visitor's session opted out of skeleton pages.
    pub skeletons_disabled: bool,
}

impl RequestContext {
    fn allows_skeleton(&self) -> bool {
        !self.fragment_request && !self.skeletons_disabled
    }
}

/// URL of the skeleton entry `depth` levels above a page, under `ancestor`.
pub fn skeleton_url(ancestor: &str, depth: usize) -> String {
    let ancestor = ancestor.trim_end_matches('/');
    format!("{ancestor}/{SKELETON_SEGMENT}{depth}")
}

/// Directory-style parent of a URL path: `/blog/post` → `/blog`, `/blog` → `/`.
pub fn parent_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &trimmed[..index],
    }
}

impl PageCache {
    pub(crate) fn resolve_skeleton(
        &self,
        relative_url: &str,
        context: &RequestContext,
    ) -> Option<String> {
        if !context.allows_skeleton() {
            return None;
        }

        let mut current = strip_query(relative_url);

        for depth in 1..=SKELETON_MAX_DEPTH {
            if current.is_empty() || current == "/" {
                break;
            }
            current = parent_url(current);

            let candidate = skeleton_url(current, depth);
            if !derive_path(&candidate).container(self.root()).is_dir() {
                continue;
            }

            let content = self.lookup_exact(&candidate);
            if content.is_some() {
                counter!(METRIC_SKELETON_HIT).increment(1);
            }
            debug!(
                op = "skeleton",
                result = if content.is_some() { "hit" } else { "miss" },
                url = relative_url,
                skeleton = %candidate,
                depth,
                "skeleton candidate found"
            );
            return content;
        }

        None
    }
}
