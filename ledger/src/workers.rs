//! # Background Workers
//!
//! Two independent activities run for the lifetime of the service, each on
//! its own schedule:
//!
//! - the **retry worker** drains a bounded batch from the retry queue,
//!   re-attempts each entry, and runs the store's expiry sweep;
//! - the **key-rotation worker** checks whether the rotation period has
//!   elapsed and swaps in fresh key material when it has.
//!
//! Both are plain tokio tasks, and both are cancellable: they monitor a
//! shared `tokio::sync::watch` channel and exit cleanly — finishing the
//! current tick first — when it flips. [`WorkerHandles::shutdown`] flips
//! the channel and joins both tasks, so a host process can stop the
//! ledger without leaking loops.
//!
//! A failing tick never kills a worker. One bad transaction must not stop
//! the queue from draining; failures are logged and the loop continues.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::LedgerService;

/// Join handles plus the shutdown switch for the two background workers.
pub struct WorkerHandles {
    shutdown: watch::Sender<bool>,
    retry: JoinHandle<()>,
    rotation: JoinHandle<()>,
}

impl WorkerHandles {
    /// Signals both workers to stop and waits for them to finish their
    /// current tick and exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.retry.await;
        let _ = self.rotation.await;
        info!("background workers stopped");
    }
}

/// Spawns the retry and key-rotation workers against a shared service.
///
/// Intervals come from the service's [`crate::config::LedgerConfig`].
/// Call once per service; the returned handles are the only way to stop
/// the tasks short of dropping the runtime.
pub fn spawn_workers(service: Arc<LedgerService>) -> WorkerHandles {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retry = tokio::spawn(retry_loop(Arc::clone(&service), shutdown_rx.clone()));
    let rotation = tokio::spawn(rotation_loop(service, shutdown_rx));

    WorkerHandles {
        shutdown: shutdown_tx,
        retry,
        rotation,
    }
}

/// Wakes on a fixed interval, drains a bounded retry batch, and sweeps
/// expired store entries.
async fn retry_loop(service: Arc<LedgerService>, mut shutdown: watch::Receiver<bool>) {
    let interval = service.config().retry_interval;
    info!(interval_ms = interval.as_millis() as u64, "retry worker started");

    loop {
        // Sleep with shutdown awareness — wake early if the switch flips.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let attempted = service.process_retry_batch().await;
        if attempted > 0 {
            debug!(attempted, remaining = service.pending_retries(), "retry batch processed");
        }

        let evicted = service.cleanup_expired();
        if evicted > 0 {
            debug!(evicted, "expiry sweep completed");
        }
    }

    info!("retry worker received shutdown signal, exiting cleanly");
}

/// Wakes on a fixed interval and rotates the signing key once the rotation
/// period has elapsed. Rotation itself is serialized against in-flight
/// sign/verify operations by the engine's key-ring lock.
async fn rotation_loop(service: Arc<LedgerService>, mut shutdown: watch::Receiver<bool>) {
    let interval = service.config().rotation_check_interval;
    info!(interval_ms = interval.as_millis() as u64, "key-rotation worker started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        if let Some(retired) = service.rotate_keys_if_due() {
            debug!(retired_key = %retired, "rotation worker retired signing key");
        }
    }

    info!("key-rotation worker received shutdown signal, exiting cleanly");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::remote::{RemoteChainClient, SubmissionError};
    use crate::transaction::{SubmissionPath, Transaction, TransactionState};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// A remote chain that fails the first `failures` submissions and
    /// accepts everything after.
    struct FlakyChain {
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RemoteChainClient for FlakyChain {
        async fn submit(&self, _transaction: &Transaction) -> Result<(), SubmissionError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(SubmissionError::Unreachable("chain warming up".into()))
            } else {
                Ok(())
            }
        }

        async fn is_connected(&self) -> bool {
            true
        }
    }

    fn fast_config() -> LedgerConfig {
        LedgerConfig {
            retry_interval: Duration::from_millis(20),
            retry_backoff_base: Duration::from_millis(1),
            rotation_check_interval: Duration::from_millis(20),
            key_rotation_period: Duration::from_secs(3600),
            sensor_batch_size: 1,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn shutdown_joins_both_workers() {
        let service = Arc::new(LedgerService::local(fast_config()).unwrap());
        let handles = spawn_workers(Arc::clone(&service));

        // Workers are running; shutdown must return promptly.
        tokio::time::timeout(Duration::from_secs(5), handles.shutdown())
            .await
            .expect("shutdown did not complete in time");
    }

    #[tokio::test]
    async fn retry_worker_drains_failed_submissions() {
        let chain = Arc::new(FlakyChain {
            failures: 1,
            attempts: AtomicU32::new(0),
        });
        let service =
            Arc::new(LedgerService::with_remote(fast_config(), chain).unwrap());

        let receipt = service
            .record_quality_check("SHIP-1", json!({"grade": "A"}).as_object().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(receipt.path, SubmissionPath::QueuedForRetry);
        assert_eq!(
            service.get_transaction_status(&receipt.hash),
            TransactionState::PendingRetry
        );

        let handles = spawn_workers(Arc::clone(&service));

        // The worker should pick the entry up and succeed on the second
        // submission attempt.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if service.get_transaction_status(&receipt.hash) == TransactionState::Stored {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "retry worker never submitted the queued transaction"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handles.shutdown().await;
    }

    #[tokio::test]
    async fn rotation_worker_rotates_when_period_elapsed() {
        let config = LedgerConfig {
            key_rotation_period: Duration::ZERO,
            rotation_check_interval: Duration::from_millis(10),
            retry_interval: Duration::from_millis(10),
            ..LedgerConfig::default()
        };
        let service = Arc::new(LedgerService::local(config).unwrap());
        let key_before = service.get_status().await.active_public_key;

        let handles = spawn_workers(Arc::clone(&service));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if service.get_status().await.key_generation > 0 {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "rotation worker never rotated"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = service.get_status().await;
        assert_ne!(status.active_public_key, key_before);
        handles.shutdown().await;
    }
}
