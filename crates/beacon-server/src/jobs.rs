// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic background work owned by the server process.

use std::sync::Arc;
use std::time::Duration;

use beacon_server_secrets::SecretVault;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Remove expired secrets every `interval` until `cancel` fires. The first
/// pass runs immediately.
pub fn spawn_secret_cleanup(
	vault: Arc<SecretVault>,
	interval: Duration,
	cancel: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		info!(interval_secs = interval.as_secs(), "secret cleanup job started");

		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = ticker.tick() => run_secret_cleanup(&vault).await,
			}
		}
		debug!("secret cleanup job stopped");
	})
}

#[instrument(skip(vault), fields(job_id = "secret-cleanup"))]
async fn run_secret_cleanup(vault: &SecretVault) {
	match vault.cleanup_expired_secrets().await {
		Ok(removed) => debug!(removed, "secret cleanup completed"),
		Err(e) => warn!(error = %e, "secret cleanup failed"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_common_secret::SecretString;
	use beacon_server_db::testing::create_test_pool;
	use beacon_server_db::SqliteAuditRepository;
	use beacon_server_secrets::{KeyRing, NewSecret, SqliteSecretsRepository};
	use chrono::Utc;

	#[tokio::test]
	async fn test_cleanup_job_removes_expired_and_stops() {
		let pool = create_test_pool().await;
		let vault = Arc::new(SecretVault::new(
			Arc::new(SqliteSecretsRepository::new(pool.clone())),
			Arc::new(SqliteAuditRepository::new(pool.clone())),
			KeyRing::new(1, &SecretString::new("job-master".to_string())).unwrap(),
		));
		vault
			.store_secret(
				"cfg-1",
				NewSecret::new("OLD", "x").with_expires_at(Utc::now() - chrono::Duration::minutes(1)),
				None,
			)
			.await
			.unwrap();
		vault
			.store_secret("cfg-1", NewSecret::new("KEEP", "y"), None)
			.await
			.unwrap();

		let cancel = CancellationToken::new();
		let handle = spawn_secret_cleanup(
			Arc::clone(&vault),
			Duration::from_secs(3600),
			cancel.clone(),
		);

		let mut remaining = i64::MAX;
		for _ in 0..50 {
			remaining = sqlx::query_scalar("SELECT COUNT(*) FROM secrets")
				.fetch_one(&pool)
				.await
				.unwrap();
			if remaining == 1 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		assert_eq!(remaining, 1);

		cancel.cancel();
		handle.await.unwrap();
	}
}
