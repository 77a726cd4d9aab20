// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::event::ChangeEvent;

/// An event together with the concrete channel it was published on.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
	pub channel: String,
	pub event: ChangeEvent,
}

/// An owned stream of messages for one pattern subscription.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct BusSubscription {
	pattern: String,
	rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
	pub fn new(pattern: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
		Self {
			pattern: pattern.into(),
			rx,
		}
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	/// Wait for the next message. `None` once the bus is gone.
	pub async fn recv(&mut self) -> Option<BusMessage> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<BusMessage> {
		self.rx.try_recv().ok()
	}
}

#[async_trait]
pub trait ChangeBus: Send + Sync {
	/// Publish an event. Returns how many subscriptions accepted it.
	async fn publish(&self, channel: &str, event: ChangeEvent) -> Result<usize>;

	/// Subscribe to every channel matching a glob pattern.
	async fn subscribe(&self, pattern: &str) -> Result<BusSubscription>;
}
