//! Filesystem-backed page response cache.
//!
//! [`cache`] holds the storage engine, [`application`] the render-pipeline
//! facade, and [`config`]/[`infra`] the runtime plumbing used by the
//! `pagecache` binary.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
