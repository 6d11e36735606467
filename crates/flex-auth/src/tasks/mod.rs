//! Background tasks.
//!
//! - `cache_purge` - evicts expired entries from the in-memory claims cache

pub mod cache_purge;

pub use cache_purge::start_cache_purge;
