// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! axum WebSocket adapter: pumps frames between a socket and the hub.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::connection::Outbound;
use crate::hub::ConnectionHub;

/// Drive one upgraded socket until either side goes away.
pub async fn serve_socket(hub: Arc<ConnectionHub>, socket: WebSocket) {
	let (sender, receiver) = socket.split();
	pump(hub, sender, receiver).await;
}

/// Run the writer and reader halves of one connection. When either half
/// finishes the other is aborted before the connection is dropped from the
/// hub.
async fn pump<S, R, E>(hub: Arc<ConnectionHub>, mut sender: S, mut receiver: R)
where
	S: Sink<Message> + Unpin + Send + 'static,
	S::Error: Display + Send,
	R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
	E: Display + Send + 'static,
{
	let (id, mut outbound) = hub.connect().await;
	let mut tasks = JoinSet::new();

	tasks.spawn(async move {
		while let Some(item) = outbound.recv().await {
			let (message, closing) = to_ws_message(item);
			if let Err(e) = sender.send(message).await {
				debug!(connection_id = %id, error = %e, "failed to send WebSocket message");
				break;
			}
			if closing {
				break;
			}
		}
	});

	let recv_hub = Arc::clone(&hub);
	tasks.spawn(async move {
		while let Some(frame) = receiver.next().await {
			match frame {
				Ok(Message::Text(text)) => {
					let text_str: &str = &text;
					recv_hub.handle_text(id, text_str).await;
				}
				Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
					Ok(text) => recv_hub.handle_text(id, text).await,
					Err(_) => debug!(connection_id = %id, "ignoring non UTF-8 binary frame"),
				},
				Ok(Message::Pong(_)) => recv_hub.record_pong(id),
				Ok(Message::Ping(_)) => debug!(connection_id = %id, "received ping"),
				Ok(Message::Close(_)) => {
					info!(connection_id = %id, "WebSocket close received");
					break;
				}
				Err(e) => {
					debug!(connection_id = %id, error = %e, "WebSocket error");
					break;
				}
			}
		}
	});

	tasks.join_next().await;
	tasks.abort_all();
	while tasks.join_next().await.is_some() {}

	hub.disconnect(id);
}

fn to_ws_message(item: Outbound) -> (Message, bool) {
	match item {
		Outbound::Message(text) => (Message::Text(text.into()), false),
		Outbound::Ping => (Message::Ping(Default::default()), false),
		Outbound::Close { code, reason } => (
			Message::Close(Some(CloseFrame {
				code,
				reason: reason.into(),
			})),
			true,
		),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use beacon_bus::{ChangeBus, LocalChangeBus};
	use beacon_cache::{CacheLayer, MemoryCacheBackend};
	use beacon_server_configuration::{ConfigurationStore, SqliteConfigurationRepository};
	use beacon_server_db::testing::create_test_pool;
	use beacon_server_db::SqliteAuditRepository;
	use beacon_server_flags::{FlagService, SqliteFlagsRepository};
	use chrono::Utc;
	use futures::channel::mpsc;

	use crate::hub::HubConfig;

	async fn hub() -> Arc<ConnectionHub> {
		let pool = create_test_pool().await;
		let cache = Arc::new(CacheLayer::new(Arc::new(MemoryCacheBackend::new())));
		let bus: Arc<dyn ChangeBus> = Arc::new(LocalChangeBus::new());
		let configurations = Arc::new(ConfigurationStore::new(
			Arc::new(SqliteConfigurationRepository::new(pool.clone())),
			Arc::new(SqliteAuditRepository::new(pool.clone())),
			cache.clone(),
			bus.clone(),
		));
		let flags = Arc::new(
			FlagService::new(Arc::new(SqliteFlagsRepository::new(pool)), cache, bus.clone())
				.with_evaluation_recording(false),
		);
		Arc::new(ConnectionHub::new(
			configurations,
			flags,
			bus,
			HubConfig::default(),
		))
	}

	#[tokio::test]
	async fn test_sweep_of_silent_client_ends_both_halves() {
		let hub = hub().await;
		let (sink, mut written) = mpsc::unbounded::<Message>();
		// The client never sends anything and never hangs up.
		let (client, incoming) = mpsc::unbounded::<Result<Message, axum::Error>>();
		let pumping = tokio::spawn(pump(Arc::clone(&hub), sink, incoming));

		let welcome = tokio::time::timeout(Duration::from_secs(2), written.next())
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(welcome, Message::Text(ref t) if t.as_str().contains("WELCOME")));

		assert_eq!(hub.sweep(Utc::now() + chrono::Duration::seconds(301)), 1);
		let close = tokio::time::timeout(Duration::from_secs(2), written.next())
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(close, Message::Close(Some(ref frame)) if frame.code == 1000));

		tokio::time::timeout(Duration::from_secs(2), pumping)
			.await
			.expect("connection loop kept running after sweep")
			.unwrap();
		assert!(client.is_closed());
		assert!(hub.registry().is_empty());
	}

	#[tokio::test]
	async fn test_client_hangup_ends_writer() {
		let hub = hub().await;
		let (sink, _written) = mpsc::unbounded::<Message>();
		let (client, incoming) = mpsc::unbounded::<Result<Message, axum::Error>>();
		let pumping = tokio::spawn(pump(Arc::clone(&hub), sink, incoming));

		client.unbounded_send(Ok(Message::Close(None))).unwrap();
		tokio::time::timeout(Duration::from_secs(2), pumping)
			.await
			.expect("connection loop kept running after hangup")
			.unwrap();
		assert!(hub.registry().is_empty());
	}

	#[test]
	fn test_close_ends_writer() {
		let (message, closing) = to_ws_message(Outbound::Close {
			code: 1001,
			reason: "server shutdown".to_string(),
		});
		assert!(closing);
		match message {
			Message::Close(Some(frame)) => {
				assert_eq!(frame.code, 1001);
				assert_eq!(frame.reason.as_str(), "server shutdown");
			}
			other => panic!("unexpected message {other:?}"),
		}
	}

	#[test]
	fn test_text_and_ping() {
		let (message, closing) = to_ws_message(Outbound::Message("{}".to_string()));
		assert!(!closing);
		assert!(matches!(message, Message::Text(ref t) if t.as_str() == "{}"));
		assert!(matches!(to_ws_message(Outbound::Ping).0, Message::Ping(_)));
	}
}
