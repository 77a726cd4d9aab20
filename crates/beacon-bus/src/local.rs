// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process bus.
//!
//! Each subscription owns a bounded queue. Publishing never waits: a full
//! queue drops the message for that subscriber only, and closed queues are
//! pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, instrument, warn};

use crate::bus::{BusMessage, BusSubscription, ChangeBus};
use crate::channel::matches_pattern;
use crate::error::{BusError, Result};
use crate::event::ChangeEvent;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Subscriber {
	pattern: String,
	tx: mpsc::Sender<BusMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
	pub subscribers: usize,
	pub published: u64,
	pub delivered: u64,
	pub dropped: u64,
}

pub struct LocalChangeBus {
	subscribers: RwLock<Vec<Subscriber>>,
	queue_capacity: usize,
	published: AtomicU64,
	delivered: AtomicU64,
	dropped: AtomicU64,
}

impl Default for LocalChangeBus {
	fn default() -> Self {
		Self::new()
	}
}

impl LocalChangeBus {
	pub fn new() -> Self {
		Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
	}

	pub fn with_queue_capacity(queue_capacity: usize) -> Self {
		Self {
			subscribers: RwLock::new(Vec::new()),
			queue_capacity: queue_capacity.max(1),
			published: AtomicU64::new(0),
			delivered: AtomicU64::new(0),
			dropped: AtomicU64::new(0),
		}
	}

	pub fn stats(&self) -> BusStats {
		BusStats {
			subscribers: self.subscribers.read().len(),
			published: self.published.load(Ordering::Relaxed),
			delivered: self.delivered.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
		}
	}
}

#[async_trait]
impl ChangeBus for LocalChangeBus {
	#[instrument(skip(self, event), fields(event_type = event.event_type()))]
	async fn publish(&self, channel: &str, event: ChangeEvent) -> Result<usize> {
		self.published.fetch_add(1, Ordering::Relaxed);

		let mut accepted = 0;
		let mut saw_closed = false;
		{
			let subscribers = self.subscribers.read();
			for subscriber in subscribers
				.iter()
				.filter(|s| matches_pattern(&s.pattern, channel))
			{
				let message = BusMessage {
					channel: channel.to_string(),
					event: event.clone(),
				};
				match subscriber.tx.try_send(message) {
					Ok(()) => accepted += 1,
					Err(TrySendError::Full(_)) => {
						self.dropped.fetch_add(1, Ordering::Relaxed);
						warn!(
							channel,
							pattern = %subscriber.pattern,
							"subscriber queue full, dropping event"
						);
					}
					Err(TrySendError::Closed(_)) => saw_closed = true,
				}
			}
		}

		if saw_closed {
			let mut subscribers = self.subscribers.write();
			let before = subscribers.len();
			subscribers.retain(|s| !s.tx.is_closed());
			debug!(pruned = before - subscribers.len(), "pruned closed bus subscribers");
		}

		self.delivered.fetch_add(accepted as u64, Ordering::Relaxed);
		debug!(channel, accepted, "published change event");
		Ok(accepted)
	}

	async fn subscribe(&self, pattern: &str) -> Result<BusSubscription> {
		if pattern.is_empty() {
			return Err(BusError::InvalidPattern("pattern must not be empty".to_string()));
		}

		let (tx, rx) = mpsc::channel(self.queue_capacity);
		self.subscribers.write().push(Subscriber {
			pattern: pattern.to_string(),
			tx,
		});
		debug!(pattern, "bus subscription added");
		Ok(BusSubscription::new(pattern, rx))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::channel::{config_change_channel, flag_change_channel, CONFIG_PATTERN, FLAGS_PATTERN};
	use serde_json::json;

	fn config_event(service: &str) -> ChangeEvent {
		ChangeEvent::configuration_changed(service, "prod", 1, json!({}), true, None)
	}

	#[tokio::test]
	async fn test_pattern_routing() {
		let bus = LocalChangeBus::new();
		let mut configs = bus.subscribe(CONFIG_PATTERN).await.unwrap();
		let mut flags = bus.subscribe(FLAGS_PATTERN).await.unwrap();

		let accepted = bus
			.publish(&config_change_channel("svc-a", "prod"), config_event("svc-a"))
			.await
			.unwrap();
		assert_eq!(accepted, 1);

		let message = configs.recv().await.unwrap();
		assert_eq!(message.channel, "config:change:svc-a:prod");
		assert_eq!(message.event.service_name(), Some("svc-a"));
		assert!(flags.try_recv().is_none());

		bus.publish(
			&flag_change_channel("x"),
			ChangeEvent::feature_flag_changed("x", true, None, None),
		)
		.await
		.unwrap();
		assert!(flags.recv().await.is_some());
		assert!(configs.try_recv().is_none());
	}

	#[tokio::test]
	async fn test_full_queue_drops_without_blocking() {
		let bus = LocalChangeBus::with_queue_capacity(1);
		let mut sub = bus.subscribe("*").await.unwrap();

		bus.publish("a", config_event("a")).await.unwrap();
		let accepted = bus.publish("b", config_event("b")).await.unwrap();
		assert_eq!(accepted, 0);
		assert_eq!(bus.stats().dropped, 1);

		assert_eq!(sub.recv().await.unwrap().channel, "a");
	}

	#[tokio::test]
	async fn test_dropped_subscription_is_pruned() {
		let bus = LocalChangeBus::new();
		let sub = bus.subscribe("*").await.unwrap();
		assert_eq!(bus.stats().subscribers, 1);
		drop(sub);

		let accepted = bus.publish("a", config_event("a")).await.unwrap();
		assert_eq!(accepted, 0);
		assert_eq!(bus.stats().subscribers, 0);
	}

	#[tokio::test]
	async fn test_empty_pattern_rejected() {
		let bus = LocalChangeBus::new();
		assert!(matches!(
			bus.subscribe("").await,
			Err(BusError::InvalidPattern(_))
		));
	}
}
