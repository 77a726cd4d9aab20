// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort read-through cache.
//!
//! [`CacheLayer`] wraps a [`CacheBackend`] and adds logical expiry, tag
//! indexes and hit/miss accounting. Backend failures are logged and turned
//! into misses; they never reach callers.

pub mod backend;
pub mod error;
pub mod layer;
pub mod memory;

pub use backend::CacheBackend;
pub use error::{CacheError, Result};
pub use layer::{CacheEntry, CacheLayer, CacheStats};
pub use memory::MemoryCacheBackend;
