// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Which live connections want changes for which service.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscriber {
	connection_id: Uuid,
	environment: Option<String>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	by_service: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register or re-scope a connection's interest in a service. A
	/// subscriber without an environment sees every environment.
	pub fn register_subscriber(
		&self,
		service_name: &str,
		environment: Option<&str>,
		connection_id: Uuid,
	) {
		let mut by_service = self.by_service.write();
		let subscribers = by_service.entry(service_name.to_string()).or_default();
		let environment = environment.map(str::to_string);
		match subscribers
			.iter_mut()
			.find(|s| s.connection_id == connection_id)
		{
			Some(existing) => existing.environment = environment,
			None => subscribers.push(Subscriber {
				connection_id,
				environment,
			}),
		}
	}

	pub fn unregister_subscriber(&self, service_name: &str, connection_id: Uuid) -> bool {
		let mut by_service = self.by_service.write();
		let Some(subscribers) = by_service.get_mut(service_name) else {
			return false;
		};
		let before = subscribers.len();
		subscribers.retain(|s| s.connection_id != connection_id);
		let removed = subscribers.len() != before;
		if subscribers.is_empty() {
			by_service.remove(service_name);
		}
		removed
	}

	/// Drop a connection from every service. Returns how many
	/// registrations were removed.
	pub fn unregister_all(&self, connection_id: Uuid) -> usize {
		let mut by_service = self.by_service.write();
		let mut removed = 0;
		by_service.retain(|_, subscribers| {
			let before = subscribers.len();
			subscribers.retain(|s| s.connection_id != connection_id);
			removed += before - subscribers.len();
			!subscribers.is_empty()
		});
		removed
	}

	/// Connections interested in `service_name` in `environment`.
	pub fn subscribers(&self, service_name: &str, environment: &str) -> Vec<Uuid> {
		self.by_service
			.read()
			.get(service_name)
			.map(|subscribers| {
				subscribers
					.iter()
					.filter(|s| s.environment.as_deref().map_or(true, |e| e == environment))
					.map(|s| s.connection_id)
					.collect()
			})
			.unwrap_or_default()
	}

	pub fn subscriber_count(&self) -> usize {
		self.by_service.read().values().map(Vec::len).sum()
	}
}
