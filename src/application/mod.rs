//! Application services over the page cache.

pub mod error;
pub mod page_cache;

pub use page_cache::{PageCacheService, PageInvalidation, RenderCachePolicy, Served};
