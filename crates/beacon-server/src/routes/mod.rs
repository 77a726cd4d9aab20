// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod configurations;
pub mod flags;
pub mod health;
pub mod secrets;
pub mod ws;

use axum::http::HeaderMap;

/// Header naming who performed a mutation; recorded in audit entries.
pub const ACTOR_HEADER: &str = "x-beacon-actor";

pub(crate) fn actor(headers: &HeaderMap) -> Option<String> {
	headers
		.get(ACTOR_HEADER)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.map(str::to_string)
}
