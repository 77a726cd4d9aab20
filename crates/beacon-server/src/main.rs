// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beacon server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beacon_server::jobs::spawn_secret_cleanup;
use beacon_server::{create_app_state, create_router};
use beacon_server_config::LogFormat;
use beacon_server_db::PoolSettings;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Beacon server - configuration and feature flag distribution.
#[derive(Parser, Debug)]
#[command(
	name = "beacon-server",
	about = "Beacon configuration and feature flag server",
	version
)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/beacon/server.toml)
	#[arg(long, env = "BEACON_SERVER_CONFIG")]
	config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match args.config {
		Some(path) => beacon_server_config::load_config_with_file(path)?,
		None => beacon_server_config::load_config()?,
	};

	let json = config.logging.format == LogFormat::Json;
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(json.then(|| tracing_subscriber::fmt::layer().json()))
		.with((!json).then(tracing_subscriber::fmt::layer))
		.init();

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		"starting beacon-server"
	);

	let pool = beacon_server_db::create_pool_with(
		&config.database.url,
		PoolSettings {
			max_connections: config.database.max_connections,
			busy_timeout: Duration::from_secs(config.database.busy_timeout_secs),
		},
	)
	.await?;
	beacon_server_db::run_migrations(&pool).await?;

	let state = create_app_state(pool, &config)?;
	state.hub.start().await?;

	let jobs = CancellationToken::new();
	let cleanup = state.vault.as_ref().map(|vault| {
		spawn_secret_cleanup(
			Arc::clone(vault),
			Duration::from_secs(config.secrets.cleanup_interval_secs),
			jobs.clone(),
		)
	});

	let hub = Arc::clone(&state.hub);
	let app = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = config.socket_addr();
	tracing::info!("listening on {}", addr);

	let listener = tokio::net::TcpListener::bind(&addr).await?;

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "Server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Received shutdown signal");
		}
	}

	jobs.cancel();
	if let Some(cleanup) = cleanup {
		if let Err(e) = cleanup.await {
			tracing::warn!(error = %e, "secret cleanup task ended abnormally");
		}
	}
	hub.shutdown().await;

	tracing::info!("Server shutdown complete");
	Ok(())
}
