// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Publish/subscribe bus carrying configuration and flag change events
//! between writers and the connection hub of every server process.
//!
//! # Channels
//!
//! - `config:change:{service}:{env}` - a new configuration version
//! - `config:reload:{service}:{env}` - reload signal, no data change
//! - `flags:change:{key}` - flag created, updated or deleted
//!
//! Subscribers use glob patterns (`config:*`, `flags:*`).

pub mod bus;
pub mod channel;
pub mod error;
pub mod event;
pub mod local;

pub use bus::{BusMessage, BusSubscription, ChangeBus};
pub use channel::{
	config_change_channel, config_reload_channel, flag_change_channel, matches_pattern,
	CONFIG_PATTERN, FLAGS_PATTERN,
};
pub use error::{BusError, Result};
pub use event::{
	ChangeEvent, ConfigurationChangedData, ConfigurationReloadData, FeatureFlagChangedData,
};
pub use local::{BusStats, LocalChangeBus};
