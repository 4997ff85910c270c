//! Background purge of expired secrets.
//!
//! Expiry is already enforced on the read path; the reaper only reclaims
//! storage. Runs fire on wall-clock boundaries (the top of the hour for the
//! default interval), never overlap, and keep no state across restarts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::{SecretStore, StoreError};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Delete every record whose `expires_at` is strictly before `now`.
pub async fn sweep(store: &dyn SecretStore, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let expired = store.find_expired(now).await?;
    if expired.is_empty() {
        debug!("no expired secrets to purge");
        return Ok(0);
    }
    let removed = store.purge_expired(now).await?;
    info!(found = expired.len(), removed, "expired secrets purged");
    Ok(removed)
}

/// The next instant after `now` that is a whole multiple of `interval`
/// since the Unix epoch.
pub fn next_boundary(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now)
}

/// Guarantees at most one sweep at a time. Shared between the scheduled
/// [`Reaper`] and on-demand purges.
#[derive(Debug, Clone, Default)]
pub struct SweepLock(Arc<AtomicBool>);

/// Held for the duration of one sweep; releases the lock on drop, even on panic.
#[must_use]
pub struct SweepGuard(Arc<AtomicBool>);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SweepLock {
    /// `None` while another sweep holds the lock.
    pub fn try_acquire(&self) -> Option<SweepGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard(Arc::clone(&self.0)))
    }

    /// Sweep unless one is already running, in which case `None`.
    pub async fn sweep(
        &self,
        store: &dyn SecretStore,
        now: DateTime<Utc>,
    ) -> Option<Result<usize, StoreError>> {
        let _guard = self.try_acquire()?;
        Some(sweep(store, now).await)
    }
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Reaper {
    store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    lock: SweepLock,
    task: Mutex<Option<Running>>,
}

impl Reaper {
    pub fn new(store: Arc<dyn SecretStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
            lock: SweepLock::default(),
            task: Mutex::new(None),
        }
    }

    /// The lock scheduled runs take; hand it to anything else that sweeps.
    pub fn sweep_lock(&self) -> SweepLock {
        self.lock.clone()
    }

    /// Start the recurring schedule. Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let lock = self.lock.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                let now = clock.now();
                let wait = (next_boundary(now, interval) - now)
                    .to_std()
                    .unwrap_or(interval);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        match lock.sweep(&*store, clock.now()).await {
                            Some(Ok(_)) => {}
                            Some(Err(e)) => warn!(error = %e, "reaper sweep error"),
                            None => debug!("another sweep is still running; skipped"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("reaper stopped");
                        break;
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "reaper started");
        *task = Some(Running {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the schedule and wait for the task to exit.
    /// Returns false (and does nothing) when it was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.task.lock().await.take() else {
            return false;
        };
        let _ = running.shutdown_tx.send(());
        let _ = running.handle.await;
        true
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}
