//! Command admission-control policy modules.
//!
//! Provides the three-tier rule sets (allowlist / dangerous-list /
//! blocklist) and the pure classification function applied before any
//! process is spawned.

pub mod classifier;
pub mod rules;
