use std::fmt;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;

use super::manager::WorkManager;
use super::ticker::{PeriodicTask, TickerHandle};

/// Drives a [`WorkManager`] with its two periodic tickers: dispatch of owned
/// work and adoption of orphaned work.
pub struct WorkRuntime {
    manager: WorkManager,
    shutdown_token: CancellationToken,
    tickers: Mutex<Vec<TickerHandle>>,
}

impl fmt::Debug for WorkRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ticker_count = self
            .tickers
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("WorkRuntime")
            .field("manager", &self.manager)
            .field("ticker_count", &ticker_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl WorkRuntime {
    /// Runtime for `manager`; nothing ticks until [`WorkRuntime::start`].
    pub fn new(manager: WorkManager) -> Self {
        Self {
            manager,
            shutdown_token: CancellationToken::new(),
            tickers: Mutex::new(Vec::new()),
        }
    }

    /// The driven manager.
    pub fn manager(&self) -> &WorkManager {
        &self.manager
    }

    /// Token cancelled by [`WorkRuntime::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawns the dispatch and rebalance tickers.
    pub async fn start(&self) -> Result<()> {
        let config = self.manager.config();
        info!(
            owner = %self.manager.owner_id(),
            dispatch_ms = config.dispatch_interval_ms,
            rebalance_ms = config.rebalance_interval_ms,
            "Starting work runtime"
        );

        let dispatcher = self.manager.clone();
        let dispatch = PeriodicTask::new("dispatch", config.dispatch_interval()).spawn(
            self.shutdown_token.child_token(),
            move || {
                let manager = dispatcher.clone();
                async move {
                    if let Err(err) = manager.dispatch_owned().await {
                        warn!("dispatch tick failed: {err}");
                    }
                }
            },
        );

        let rebalancer = self.manager.clone();
        let rebalance = PeriodicTask::new("rebalance", config.rebalance_interval())
            .spawn(self.shutdown_token.child_token(), move || {
                let manager = rebalancer.clone();
                async move {
                    if let Err(err) = manager.rebalance_orphans().await {
                        warn!("orphan rebalancing tick failed: {err}");
                    }
                }
            });

        let mut guard = self.tickers.lock().await;
        guard.push(dispatch);
        guard.push(rebalance);
        Ok(())
    }

    /// Number of dispatch ticks dropped because the previous one was still
    /// running.
    pub async fn skipped_dispatch_ticks(&self) -> u64 {
        let guard = self.tickers.lock().await;
        guard
            .iter()
            .find(|ticker| ticker.name() == "dispatch")
            .map(TickerHandle::skipped_ticks)
            .unwrap_or_default()
    }

    /// Cancels both tickers and waits, up to the configured grace period,
    /// for running ticks and fired dispatches to finish.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown of work runtime");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.tickers.lock().await;
            std::mem::take(&mut *guard)
        };

        let deadline = tokio::time::Instant::now() + self.manager.config().shutdown_grace();
        for handle in handles {
            let name = handle.name();
            let mut join = handle.into_join_handle();
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{name} ticker task failed: {e:?}"),
                Err(_) => {
                    warn!("{name} ticker timed out during shutdown");
                    join.abort();
                }
            }
        }

        if tokio::time::timeout_at(deadline, self.manager.drain())
            .await
            .is_err()
        {
            warn!("fired dispatches still running after the shutdown grace period");
        }

        info!("Work runtime shutdown complete");
        Ok(())
    }
}
