//! Named response stores and the strategies that read and fill them.
//!
//! This module provides:
//! - Request identity hashing for stable storage keys
//! - A `CacheStorage` trait with a SQLite backend (one `Mutex<Connection>`
//!   serializes every mutation across overlapping handlers)
//! - Network-first and cache-first fetch strategies with offline fallback
//! - Install-time precaching and activate-time garbage collection

mod key;
mod layer;
mod manager;
mod storage;
mod traits;

pub use key::RequestKey;
pub use layer::CacheLayer;
pub use manager::CacheStoreManager;
pub use storage::{CacheStorage, CachedEntry, SqliteStorage};
pub use traits::{ResponseSource, Served};
