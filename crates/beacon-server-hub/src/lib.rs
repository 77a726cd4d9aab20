// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Live connection hub.
//!
//! Each process runs one [`ConnectionHub`]. It owns a
//! [`ConnectionRegistry`], answers `GET_CONFIG` and `EVALUATE_FLAGS`
//! requests, and runs one dispatcher task per bus pattern that writes
//! matching change events to connection queues. Heartbeat and cleanup run
//! on fixed timers and stop on [`ConnectionHub::shutdown`], which closes
//! every socket with code 1001.

pub mod connection;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod ws;

pub use connection::{ConnectionInfo, ConnectionState, Outbound, CLOSE_GOING_AWAY, CLOSE_NORMAL};
pub use error::{HubError, Result};
pub use hub::{ConnectionHub, HubConfig};
pub use protocol::{ClientMessage, ContextPayload, ErrorCode, ServerMessage, Topic};
pub use registry::ConnectionRegistry;
pub use ws::serve_socket;
