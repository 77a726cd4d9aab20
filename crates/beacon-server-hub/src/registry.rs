// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Owned state for every live connection of this process.

use std::collections::{BTreeSet, HashMap};

use beacon_bus::ChangeEvent;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionInfo, ConnectionState, Outbound, CLOSE_NORMAL};
use crate::error::{HubError, Result};
use crate::protocol::Topic;

pub struct ConnectionRegistry {
	connections: RwLock<HashMap<Uuid, Connection>>,
	queue_capacity: usize,
}

impl ConnectionRegistry {
	pub fn new(queue_capacity: usize) -> Self {
		Self {
			connections: RwLock::new(HashMap::new()),
			queue_capacity: queue_capacity.max(1),
		}
	}

	/// Add a connection in the `Connecting` state. The receiver yields
	/// everything queued for its socket.
	pub fn register(&self) -> (Uuid, mpsc::Receiver<Outbound>) {
		let (tx, rx) = mpsc::channel(self.queue_capacity);
		let id = Uuid::new_v4();
		self.connections.write().insert(id, Connection::new(id, tx));
		(id, rx)
	}

	pub fn mark_open(&self, id: Uuid) -> bool {
		match self.connections.write().get_mut(&id) {
			Some(conn) if conn.state == ConnectionState::Connecting => {
				conn.state = ConnectionState::Open;
				true
			}
			_ => false,
		}
	}

	/// Point a connection at a service. Returns the service it was
	/// previously subscribed to, if that was a different one.
	pub fn subscribe(
		&self,
		id: Uuid,
		service_name: &str,
		environment: Option<String>,
		topics: BTreeSet<Topic>,
	) -> Result<Option<String>> {
		let mut connections = self.connections.write();
		let conn = connections
			.get_mut(&id)
			.ok_or(HubError::UnknownConnection(id))?;

		let previous = conn
			.service_name
			.replace(service_name.to_string())
			.filter(|previous| previous != service_name);
		conn.environment = environment;
		conn.subscriptions = topics;
		Ok(previous)
	}

	/// Remove topics (all when `None`). Returns the remaining topics, or
	/// `None` when the connection is not subscribed to `service_name`.
	/// A connection left with no topics forgets its service.
	pub fn unsubscribe(
		&self,
		id: Uuid,
		service_name: &str,
		topics: Option<&[Topic]>,
	) -> Result<Option<BTreeSet<Topic>>> {
		let mut connections = self.connections.write();
		let conn = connections
			.get_mut(&id)
			.ok_or(HubError::UnknownConnection(id))?;

		if conn.service_name.as_deref() != Some(service_name) {
			return Ok(None);
		}

		match topics {
			Some(topics) => {
				for topic in topics {
					conn.subscriptions.remove(topic);
				}
			}
			None => conn.subscriptions.clear(),
		}

		if conn.subscriptions.is_empty() {
			conn.service_name = None;
			conn.environment = None;
		}
		Ok(Some(conn.subscriptions.clone()))
	}

	/// Record liveness.
	pub fn touch(&self, id: Uuid) -> bool {
		match self.connections.write().get_mut(&id) {
			Some(conn) => {
				conn.last_ping = Utc::now();
				true
			}
			None => false,
		}
	}

	pub fn get(&self, id: Uuid) -> Option<ConnectionInfo> {
		self.connections.read().get(&id).map(Connection::info)
	}

	pub fn connections(&self) -> Vec<ConnectionInfo> {
		self.connections.read().values().map(Connection::info).collect()
	}

	pub fn sender(&self, id: Uuid) -> Option<mpsc::Sender<Outbound>> {
		self.connections.read().get(&id).map(|conn| conn.tx.clone())
	}

	/// Queue without waiting. A full queue drops the item.
	pub fn try_send(&self, id: Uuid, outbound: Outbound) -> bool {
		let connections = self.connections.read();
		let Some(conn) = connections.get(&id) else {
			return false;
		};
		enqueue(conn, outbound)
	}

	/// Connections that should receive `event`.
	///
	/// Configuration events need the same service, the `configuration`
	/// topic, and a matching environment when the connection set one.
	/// Flag events need the `feature_flags` topic; they are global unless
	/// they name a service, and are filtered by environment only when
	/// both sides have one.
	pub fn targets(&self, event: &ChangeEvent) -> Vec<Uuid> {
		let connections = self.connections.read();
		connections
			.values()
			.filter(|conn| routes_to(conn, event))
			.map(|conn| conn.id)
			.collect()
	}

	pub fn remove(&self, id: Uuid) -> Option<ConnectionInfo> {
		self.connections.write().remove(&id).map(|mut conn| {
			conn.state = ConnectionState::Closed;
			conn.info()
		})
	}

	/// Queue a protocol-level ping on every open connection.
	pub fn ping_all(&self) -> usize {
		let connections = self.connections.read();
		connections
			.values()
			.filter(|conn| conn.state == ConnectionState::Open)
			.filter(|conn| enqueue(conn, Outbound::Ping))
			.count()
	}

	/// Close and remove connections not heard from within `timeout`, or
	/// whose socket writer has gone away.
	pub fn sweep(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<ConnectionInfo> {
		let mut connections = self.connections.write();
		let stale: Vec<Uuid> = connections
			.values()
			.filter(|conn| {
				now - conn.last_ping > timeout
					|| conn.tx.is_closed()
					|| conn.state == ConnectionState::Closed
			})
			.map(|conn| conn.id)
			.collect();

		let mut removed = Vec::with_capacity(stale.len());
		for id in stale {
			if let Some(mut conn) = connections.remove(&id) {
				conn.state = ConnectionState::Stale;
				let _ = conn.tx.try_send(Outbound::Close {
					code: CLOSE_NORMAL,
					reason: "timeout".to_string(),
				});
				conn.state = ConnectionState::Closed;
				debug!(connection_id = %id, "closed stale connection");
				removed.push(conn.info());
			}
		}
		removed
	}

	/// Close and remove everything. Returns how many were closed.
	pub fn close_all(&self, code: u16, reason: &str) -> usize {
		let drained: Vec<Connection> = self.connections.write().drain().map(|(_, c)| c).collect();
		for conn in &drained {
			let _ = conn.tx.try_send(Outbound::Close {
				code,
				reason: reason.to_string(),
			});
		}
		drained.len()
	}

	pub fn len(&self) -> usize {
		self.connections.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.connections.read().is_empty()
	}

	pub fn open_count(&self) -> usize {
		self.connections
			.read()
			.values()
			.filter(|conn| conn.state == ConnectionState::Open)
			.count()
	}
}

fn enqueue(conn: &Connection, outbound: Outbound) -> bool {
	match conn.tx.try_send(outbound) {
		Ok(()) => true,
		Err(TrySendError::Full(_)) => {
			warn!(connection_id = %conn.id, "outbound queue full, dropping message");
			false
		}
		Err(TrySendError::Closed(_)) => false,
	}
}

fn routes_to(conn: &Connection, event: &ChangeEvent) -> bool {
	match event {
		ChangeEvent::ConfigurationChanged(_) | ChangeEvent::ConfigurationReload(_) => {
			conn.wants(Topic::Configuration)
				&& conn.service_name.as_deref() == event.service_name()
				&& match (&conn.environment, event.environment()) {
					(Some(mine), Some(theirs)) => mine == theirs,
					_ => true,
				}
		}
		ChangeEvent::FeatureFlagChanged(_) => {
			conn.wants(Topic::FeatureFlags)
				&& event
					.service_name()
					.map_or(true, |service| conn.service_name.as_deref() == Some(service))
				&& match (&conn.environment, event.environment()) {
					(Some(mine), Some(theirs)) => mine == theirs,
					_ => true,
				}
		}
	}
}
