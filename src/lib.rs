//! Post image cache - a two-tier (memory + disk) cache for remote images.
//!
//! Images are looked up by URL in a cost-bounded in-memory LRU, then in a
//! one-file-per-URL disk store, and finally downloaded, validated by
//! decoding, and written back to both tiers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache tiers and adapters.
pub mod infrastructure;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "post-image-cache";
