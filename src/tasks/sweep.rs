//! Expiration Sweep Task
//!
//! Background task that periodically evicts expired entries.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Backend, Result};

/// Spawns a task that runs `sweep` every `interval` until `shutdown` fires.
///
/// The first sweep runs one full interval after spawning. A failing sweep is
/// logged and retried on the next tick; it never ends the task.
///
/// # Arguments
/// * `backend` - Provider the sweep belongs to, for logging
/// * `interval` - Time between sweeps
/// * `shutdown` - Token cancelled when the owning provider is disposed
/// * `sweep` - Deletes expired entries, returning how many were removed
///
/// # Returns
/// A JoinHandle for the spawned task, which resolves once `shutdown` fires.
pub fn spawn_sweep_task<F, Fut>(
    backend: Backend,
    interval: Duration,
    shutdown: CancellationToken,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        info!(%backend, ?interval, "Starting expiration sweep task");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match sweep().await {
                Ok(0) => debug!(%backend, "Sweep: no expired entries found"),
                Ok(removed) => info!(%backend, removed, "Sweep: removed expired entries"),
                Err(e) => warn!(%backend, error = %e, "Sweep failed; retrying next interval"),
            }
        }

        debug!(%backend, "Expiration sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_runs_periodically() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = runs.clone();
        let handle = spawn_sweep_task(
            Backend::Sqlite,
            Duration::from_millis(20),
            shutdown.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_sweep_failures_are_swallowed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = runs.clone();
        let handle = spawn_sweep_task(
            Backend::Sqlite,
            Duration::from_millis(20),
            shutdown.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CacheError::backend(Backend::Sqlite, "disk I/O error"))
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished(), "Task should survive failing sweeps");
        assert!(runs.load(Ordering::SeqCst) >= 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = spawn_sweep_task(
            Backend::Sqlite,
            Duration::from_secs(3600),
            shutdown.clone(),
            || async { Ok(0) },
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Task should stop promptly after shutdown")
            .unwrap();
    }
}
