// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_bus::{BusMessage, BusSubscription, ChangeBus, ChangeEvent, CONFIG_PATTERN, FLAGS_PATTERN};
use beacon_server_configuration::{validate_name, ConfigurationError, ConfigurationStore};
use beacon_server_flags::FlagService;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::connection::{Outbound, CLOSE_GOING_AWAY};
use crate::error::Result;
use crate::protocol::{ClientMessage, ContextPayload, ErrorCode, ServerMessage, Topic};
use crate::registry::ConnectionRegistry;

const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Debug, Clone)]
pub struct HubConfig {
	pub heartbeat_interval: Duration,
	pub connection_timeout: Duration,
	pub outbound_queue_capacity: usize,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval: Duration::from_secs(30),
			connection_timeout: Duration::from_secs(300),
			outbound_queue_capacity: 256,
		}
	}
}

impl HubConfig {
	/// Sweeps run at half the timeout.
	pub fn cleanup_interval(&self) -> Duration {
		(self.connection_timeout / 2).max(Duration::from_secs(1))
	}
}

/// Per-process hub: owns the connections, answers their requests and fans
/// change events out to them.
pub struct ConnectionHub {
	registry: ConnectionRegistry,
	configurations: Arc<ConfigurationStore>,
	flags: Arc<FlagService>,
	bus: Arc<dyn ChangeBus>,
	config: HubConfig,
	shutdown: CancellationToken,
	tasks: TaskTracker,
	delivered: AtomicU64,
}

impl ConnectionHub {
	pub fn new(
		configurations: Arc<ConfigurationStore>,
		flags: Arc<FlagService>,
		bus: Arc<dyn ChangeBus>,
		config: HubConfig,
	) -> Self {
		Self {
			registry: ConnectionRegistry::new(config.outbound_queue_capacity),
			configurations,
			flags,
			bus,
			config,
			shutdown: CancellationToken::new(),
			tasks: TaskTracker::new(),
			delivered: AtomicU64::new(0),
		}
	}

	pub fn registry(&self) -> &ConnectionRegistry {
		&self.registry
	}

	pub fn config(&self) -> &HubConfig {
		&self.config
	}

	/// Events pushed to connections since start.
	pub fn events_delivered(&self) -> u64 {
		self.delivered.load(Ordering::Relaxed)
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Subscribe to the bus and start the dispatcher, heartbeat and cleanup
	/// tasks. The bus subscriptions exist when this returns.
	#[instrument(skip(self))]
	pub async fn start(self: &Arc<Self>) -> Result<()> {
		for pattern in [CONFIG_PATTERN, FLAGS_PATTERN] {
			let subscription = self.bus.subscribe(pattern).await?;
			let hub = Arc::clone(self);
			self.tasks.spawn(async move { hub.run_dispatcher(subscription).await });
		}

		let hub = Arc::clone(self);
		self.tasks.spawn(async move { hub.run_heartbeat().await });
		let hub = Arc::clone(self);
		self.tasks.spawn(async move { hub.run_cleanup().await });

		info!(
			heartbeat_secs = self.config.heartbeat_interval.as_secs(),
			timeout_secs = self.config.connection_timeout.as_secs(),
			"connection hub started"
		);
		Ok(())
	}

	/// Close every connection with 1001 and wait for the hub's tasks.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		let closed = self.registry.close_all(CLOSE_GOING_AWAY, "server shutdown");
		self.tasks.close();
		self.tasks.wait().await;
		info!(closed, "connection hub stopped");
	}

	/// Register a new socket, greet it and mark it open.
	pub async fn connect(&self) -> (Uuid, mpsc::Receiver<Outbound>) {
		let (id, rx) = self.registry.register();
		self.reply(id, ServerMessage::Welcome { connection_id: id }).await;
		self.registry.mark_open(id);
		info!(connection_id = %id, "connection opened");
		(id, rx)
	}

	pub fn disconnect(&self, id: Uuid) {
		let removed = self.configurations.subscriptions().unregister_all(id);
		if self.registry.remove(id).is_some() {
			info!(connection_id = %id, subscriptions = removed, "connection closed");
		}
	}

	/// A transport-level pong counts as liveness.
	pub fn record_pong(&self, id: Uuid) {
		self.registry.touch(id);
	}

	/// Handle one text frame. Protocol errors are answered with an `ERROR`
	/// frame and never close the connection.
	#[instrument(skip(self, text), fields(connection_id = %id))]
	pub async fn handle_text(&self, id: Uuid, text: &str) {
		let message = match ClientMessage::parse(text) {
			Ok(message) => message,
			Err(e) => {
				debug!(error = %e, "invalid client message");
				self.reply(
					id,
					ServerMessage::error(ErrorCode::InvalidMessage, format!("invalid message: {e}")),
				)
				.await;
				return;
			}
		};

		let response = match message {
			ClientMessage::Subscribe {
				service_name,
				environment,
				subscriptions,
			} => self.subscribe(id, service_name, environment, subscriptions),
			ClientMessage::Unsubscribe {
				service_name,
				subscriptions,
			} => self.unsubscribe(id, service_name, subscriptions),
			ClientMessage::Ping => {
				self.registry.touch(id);
				ServerMessage::Pong
			}
			ClientMessage::GetConfig {
				service_name,
				environment,
				version,
			} => self.get_config(id, service_name, environment, version).await,
			ClientMessage::EvaluateFlags { flags, context } => {
				self.evaluate_flags(id, flags, context).await
			}
		};
		self.reply(id, response).await;
	}

	fn subscribe(
		&self,
		id: Uuid,
		service_name: String,
		environment: Option<String>,
		subscriptions: Option<Vec<Topic>>,
	) -> ServerMessage {
		if let Err(e) = validate_name("service", &service_name) {
			return ServerMessage::error(ErrorCode::InvalidMessage, e.to_string());
		}
		if let Some(env) = &environment {
			if let Err(e) = validate_name("environment", env) {
				return ServerMessage::error(ErrorCode::InvalidMessage, e.to_string());
			}
		}

		let topics: BTreeSet<Topic> = match subscriptions {
			Some(topics) if !topics.is_empty() => topics.into_iter().collect(),
			_ => Topic::all(),
		};

		match self
			.registry
			.subscribe(id, &service_name, environment.clone(), topics.clone())
		{
			Ok(previous) => {
				let registrations = self.configurations.subscriptions();
				if let Some(previous) = previous {
					registrations.unregister_subscriber(&previous, id);
				}
				registrations.register_subscriber(&service_name, environment.as_deref(), id);
				info!(connection_id = %id, service_name = %service_name, "subscribed");
				ServerMessage::SubscriptionConfirmed {
					service_name,
					environment,
					subscriptions: topics,
				}
			}
			Err(e) => ServerMessage::error(ErrorCode::InternalError, e.to_string()),
		}
	}

	fn unsubscribe(
		&self,
		id: Uuid,
		service_name: String,
		subscriptions: Option<Vec<Topic>>,
	) -> ServerMessage {
		match self
			.registry
			.unsubscribe(id, &service_name, subscriptions.as_deref())
		{
			Ok(Some(remaining)) => {
				if remaining.is_empty() {
					self.configurations
						.subscriptions()
						.unregister_subscriber(&service_name, id);
				}
				info!(connection_id = %id, service_name = %service_name, "unsubscribed");
				ServerMessage::UnsubscriptionConfirmed {
					service_name,
					subscriptions: remaining,
				}
			}
			Ok(None) => ServerMessage::error(
				ErrorCode::NotSubscribed,
				format!("not subscribed to '{service_name}'"),
			),
			Err(e) => ServerMessage::error(ErrorCode::InternalError, e.to_string()),
		}
	}

	async fn get_config(
		&self,
		id: Uuid,
		service_name: String,
		environment: Option<String>,
		version: Option<i64>,
	) -> ServerMessage {
		let environment = environment
			.or_else(|| self.registry.get(id).and_then(|info| info.environment))
			.unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

		match self
			.configurations
			.get_configuration(&service_name, &environment, version)
			.await
		{
			Ok(Some(configuration)) => ServerMessage::ConfigResponse { configuration },
			Ok(None) => ServerMessage::error(
				ErrorCode::NotFound,
				format!("no configuration for {service_name}/{environment}"),
			),
			Err(e @ ConfigurationError::InvalidName { .. }) => {
				ServerMessage::error(ErrorCode::InvalidMessage, e.to_string())
			}
			Err(e) => {
				error!(connection_id = %id, error = %e, "configuration lookup failed");
				ServerMessage::error(ErrorCode::InternalError, "configuration lookup failed")
			}
		}
	}

	async fn evaluate_flags(
		&self,
		id: Uuid,
		flags: Vec<String>,
		context: Option<ContextPayload>,
	) -> ServerMessage {
		// An environment in the context wins over the subscribed one.
		let fallback = self
			.registry
			.get(id)
			.and_then(|info| info.environment)
			.unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
		let context = context.unwrap_or_default().into_context(fallback);

		match self.flags.evaluate_feature_flags(&flags, &context).await {
			Ok(evaluations) => ServerMessage::FeatureFlagsResponse { evaluations },
			Err(e) => {
				error!(connection_id = %id, error = %e, "flag evaluation failed");
				ServerMessage::error(ErrorCode::InternalError, "flag evaluation failed")
			}
		}
	}

	/// Queue a direct response, waiting for queue space.
	async fn reply(&self, id: Uuid, message: ServerMessage) {
		let frame = match message.to_frame() {
			Ok(frame) => frame,
			Err(e) => {
				error!(connection_id = %id, error = %e, "failed to encode server message");
				return;
			}
		};
		if let Some(tx) = self.registry.sender(id) {
			if tx.send(Outbound::Message(frame)).await.is_err() {
				debug!(connection_id = %id, "connection gone before reply");
			}
		}
	}

	/// Push one bus message to every matching connection. Returns how many
	/// connections it was queued for.
	pub fn route(&self, message: &BusMessage) -> usize {
		let targets = self.registry.targets(&message.event);
		if targets.is_empty() {
			return 0;
		}

		let frame = match to_server_message(&message.event).to_frame() {
			Ok(frame) => frame,
			Err(e) => {
				error!(channel = %message.channel, error = %e, "failed to encode change event");
				return 0;
			}
		};

		let delivered = targets
			.into_iter()
			.filter(|id| self.registry.try_send(*id, Outbound::Message(frame.clone())))
			.count();
		self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
		debug!(channel = %message.channel, delivered, "routed change event");
		delivered
	}

	/// Queue a ping on every open connection.
	pub fn heartbeat(&self) -> usize {
		self.registry.ping_all()
	}

	/// Close connections idle past the timeout. Returns how many closed.
	pub fn sweep(&self, now: chrono::DateTime<Utc>) -> usize {
		let timeout = chrono::Duration::from_std(self.config.connection_timeout)
			.unwrap_or_else(|_| chrono::Duration::seconds(300));
		let removed = self.registry.sweep(now, timeout);
		for info in &removed {
			self.configurations.subscriptions().unregister_all(info.id);
		}
		if !removed.is_empty() {
			info!(closed = removed.len(), "closed stale connections");
		}
		removed.len()
	}

	async fn run_dispatcher(&self, mut subscription: BusSubscription) {
		loop {
			tokio::select! {
				_ = self.shutdown.cancelled() => break,
				message = subscription.recv() => match message {
					Some(message) => {
						self.route(&message);
					}
					None => {
						warn!(pattern = %subscription.pattern(), "change bus closed");
						break;
					}
				},
			}
		}
		debug!(pattern = %subscription.pattern(), "dispatcher stopped");
	}

	async fn run_heartbeat(&self) {
		let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		ticker.tick().await;
		loop {
			tokio::select! {
				_ = self.shutdown.cancelled() => break,
				_ = ticker.tick() => {
					let pinged = self.heartbeat();
					debug!(pinged, "heartbeat");
				}
			}
		}
	}

	async fn run_cleanup(&self) {
		let mut ticker = tokio::time::interval(self.config.cleanup_interval());
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		ticker.tick().await;
		loop {
			tokio::select! {
				_ = self.shutdown.cancelled() => break,
				_ = ticker.tick() => {
					self.sweep(Utc::now());
				}
			}
		}
	}
}

fn to_server_message(event: &ChangeEvent) -> ServerMessage {
	match event {
		ChangeEvent::ConfigurationChanged(data) => ServerMessage::ConfigurationUpdate {
			service_name: data.service_name.clone(),
			environment: data.environment.clone(),
			version: data.version,
			config: data.config.clone(),
			is_valid: data.is_valid,
			changed_by: data.changed_by.clone(),
		},
		ChangeEvent::ConfigurationReload(data) => ServerMessage::ConfigurationReload {
			service_name: data.service_name.clone(),
			environment: data.environment.clone(),
			force: data.force,
		},
		ChangeEvent::FeatureFlagChanged(data) => ServerMessage::FeatureFlagUpdate {
			flag_key: data.flag_key.clone(),
			enabled: data.enabled,
			rollout_percentage: data.rollout_percentage,
			environment: data.environment.clone(),
		},
	}
}
