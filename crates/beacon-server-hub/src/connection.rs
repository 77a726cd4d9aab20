// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::Topic;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// `Connecting -> Open -> (Stale) -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
	Connecting,
	Open,
	Stale,
	Closed,
}

/// What the socket writer should put on the wire next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
	Message(String),
	Ping,
	Close { code: u16, reason: String },
}

#[derive(Debug)]
pub(crate) struct Connection {
	pub(crate) id: Uuid,
	pub(crate) service_name: Option<String>,
	pub(crate) environment: Option<String>,
	pub(crate) subscriptions: BTreeSet<Topic>,
	pub(crate) state: ConnectionState,
	pub(crate) connected_at: DateTime<Utc>,
	pub(crate) last_ping: DateTime<Utc>,
	pub(crate) tx: mpsc::Sender<Outbound>,
}

impl Connection {
	pub(crate) fn new(id: Uuid, tx: mpsc::Sender<Outbound>) -> Self {
		let now = Utc::now();
		Self {
			id,
			service_name: None,
			environment: None,
			subscriptions: BTreeSet::new(),
			state: ConnectionState::Connecting,
			connected_at: now,
			last_ping: now,
			tx,
		}
	}

	pub(crate) fn wants(&self, topic: Topic) -> bool {
		self.state == ConnectionState::Open
			&& self.service_name.is_some()
			&& self.subscriptions.contains(&topic)
	}

	pub(crate) fn info(&self) -> ConnectionInfo {
		ConnectionInfo {
			id: self.id,
			service_name: self.service_name.clone(),
			environment: self.environment.clone(),
			subscriptions: self.subscriptions.clone(),
			state: self.state,
			connected_at: self.connected_at,
			last_ping: self.last_ping,
		}
	}
}

/// A point-in-time view of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
	pub id: Uuid,
	pub service_name: Option<String>,
	pub environment: Option<String>,
	pub subscriptions: BTreeSet<Topic>,
	pub state: ConnectionState,
	pub connected_at: DateTime<Utc>,
	pub last_ping: DateTime<Utc>,
}
