//! Non-overlapping periodic tasks.
//!
//! A tick that fires while the previous run is still executing is dropped
//! rather than queued, so a slow body never builds up a backlog.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct TickState {
    in_progress: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
}

/// A named periodic task driven by a cancellable ticker.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
}

impl PeriodicTask {
    /// Ticker that fires every `period`.
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self { name, period }
    }

    /// Starts ticking. `body` is invoked once per tick unless the previous
    /// invocation has not finished yet. The first tick fires after one full
    /// period.
    ///
    /// A panicking body is logged and counted; the next tick runs normally.
    /// After cancellation the ticker task waits for a running body before it
    /// exits.
    pub fn spawn<F, Fut>(self, shutdown: CancellationToken, body: F) -> TickerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(TickState::default());
        let loop_state = Arc::clone(&state);
        let name = self.name;
        let period = self.period;

        let join = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut running: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("{name} ticker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if loop_state.in_progress.swap(true, Ordering::AcqRel) {
                            loop_state.skipped.fetch_add(1, Ordering::Relaxed);
                            debug!("{name} tick skipped, previous run still in progress");
                            continue;
                        }

                        let run_state = Arc::clone(&loop_state);
                        let run = body();
                        running = Some(tokio::spawn(async move {
                            match AssertUnwindSafe(run).catch_unwind().await {
                                Ok(()) => {
                                    run_state.runs.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(_) => {
                                    run_state.panicked.fetch_add(1, Ordering::Relaxed);
                                    error!("{name} tick panicked");
                                }
                            }
                            run_state.in_progress.store(false, Ordering::Release);
                        }));
                    }
                }
            }

            if let Some(run) = running.take()
                && !run.is_finished()
            {
                info!("{name} ticker waiting for the running tick to finish");
                if let Err(err) = run.await {
                    error!("{name} tick task failed: {err}");
                }
            }
        });

        TickerHandle { name, state, join }
    }
}

/// Handle to a running [`PeriodicTask`].
#[derive(Debug)]
pub struct TickerHandle {
    name: &'static str,
    state: Arc<TickState>,
    join: JoinHandle<()>,
}

impl TickerHandle {
    /// Name given to [`PeriodicTask::new`].
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True while a tick body is executing.
    pub fn in_progress(&self) -> bool {
        self.state.in_progress.load(Ordering::Acquire)
    }

    /// Number of tick bodies that ran to completion.
    pub fn completed_runs(&self) -> u64 {
        self.state.runs.load(Ordering::Relaxed)
    }

    /// Number of ticks dropped because a run was still in progress.
    pub fn skipped_ticks(&self) -> u64 {
        self.state.skipped.load(Ordering::Relaxed)
    }

    /// Number of tick bodies that panicked.
    pub fn panicked_runs(&self) -> u64 {
        self.state.panicked.load(Ordering::Relaxed)
    }

    /// Task that completes once the ticker is cancelled and its last run
    /// has finished.
    pub fn into_join_handle(self) -> JoinHandle<()> {
        self.join
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn slow_body_suppresses_overlapping_ticks() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let body_active = Arc::clone(&active);
        let body_max = Arc::clone(&max_active);
        let handle = PeriodicTask::new("test", Duration::from_millis(100)).spawn(
            shutdown.clone(),
            move || {
                let active = Arc::clone(&body_active);
                let max_active = Arc::clone(&body_max);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        shutdown.cancel();

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(handle.skipped_ticks() > 0);
        assert!(handle.completed_runs() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_body_runs_every_tick() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let counter = Arc::clone(&runs);
        let handle = PeriodicTask::new("fast", Duration::from_millis(100)).spawn(
            shutdown.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(550)).await;
        shutdown.cancel();
        handle
            .into_join_handle()
            .await
            .expect("ticker task should exit cleanly");

        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_body_does_not_stop_the_ticker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let handle = PeriodicTask::new("flaky", Duration::from_millis(100)).spawn(
            shutdown.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick fails");
                    }
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        shutdown.cancel();

        assert_eq!(handle.panicked_runs(), 1);
        assert!(!handle.in_progress());
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(handle.completed_runs(), 9);
        handle
            .into_join_handle()
            .await
            .expect("ticker task should exit cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_waits_for_the_running_tick() {
        let finished = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let done = Arc::clone(&finished);
        let handle = PeriodicTask::new("slow", Duration::from_millis(100)).spawn(
            shutdown.clone(),
            move || {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    done.store(true, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.in_progress());
        shutdown.cancel();

        let started = tokio::time::Instant::now();
        handle
            .into_join_handle()
            .await
            .expect("ticker task should exit cleanly");
        assert!(finished.load(Ordering::SeqCst));
        assert!(started.elapsed() >= Duration::from_secs(9));
    }
}
