// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod cache;
mod database;
mod http;
mod hub;
mod logging;
mod secrets;

pub use cache::{CacheConfig, CacheConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use hub::{HubConfig, HubConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use secrets::{RetiredKeyConfig, SecretsConfig, SecretsConfigLayer};
