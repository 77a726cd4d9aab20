// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use beacon_server_hub::serve_socket;

use crate::api::AppState;
use crate::error::ServerError;

/// GET /ws - upgrade to the push protocol.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
	if state.hub.is_shutting_down() {
		return ServerError::Unavailable("server is shutting down".to_string()).into_response();
	}

	let hub = Arc::clone(&state.hub);
	ws.on_upgrade(move |socket| serve_socket(hub, socket))
}
