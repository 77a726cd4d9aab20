// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beacon configuration and feature flag server.
//!
//! Serves versioned service configuration, feature flag evaluation and
//! encrypted secrets over HTTP, and pushes changes to subscribed clients
//! over WebSocket.

pub mod api;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;

pub use api::{create_app_state, create_router, AppState};
pub use beacon_server_config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use metrics::{MetricsSnapshot, ServerMetrics};
