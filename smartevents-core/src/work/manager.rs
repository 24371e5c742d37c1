use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use dashmap::DashSet;
use futures::future::join_all;
use smartevents_model::{ManagedResource, OwnerId, WorkId, WorkItem};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::error::{Result, WorkError};
use crate::workers::WorkerSet;

use super::config::WorkConfig;
use super::ledger::WorkRepository;

/// Outcome of firing one work item through its worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchStatus {
    /// The worker ran; the item was either completed or rescheduled.
    Handled,
    /// Another dispatch of the same item is still running in this process.
    Skipped,
    /// The worker refused the item, e.g. its resource no longer exists.
    Failed { error: String },
}

impl DispatchStatus {
    /// True when the worker ran.
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchStatus::Handled)
    }
}

struct Inner {
    ledger: Arc<dyn WorkRepository>,
    workers: WorkerSet,
    owner: OwnerId,
    config: WorkConfig,
    in_flight: DashSet<WorkId>,
    fired: Mutex<JoinSet<()>>,
}

/// Owns the work ledger for one manager process.
///
/// Cheap to clone; clones share the ledger, the worker set and the set of
/// items currently being handled.
#[derive(Clone)]
pub struct WorkManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkManager")
            .field("owner", &self.inner.owner)
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

/// Removes the item from the in-flight set when the dispatch finishes,
/// including on panic or cancellation.
struct InFlightGuard<'a> {
    set: &'a DashSet<WorkId>,
    id: WorkId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl WorkManager {
    /// Creates a manager owning `ledger` rows under `config`'s owner id.
    pub fn new(
        ledger: Arc<dyn WorkRepository>,
        workers: WorkerSet,
        config: WorkConfig,
    ) -> Self {
        let owner = config.owner_id();
        info!(owner = %owner, "Work manager initialised");
        Self {
            inner: Arc::new(Inner {
                ledger,
                workers,
                owner,
                config,
                in_flight: DashSet::new(),
                fired: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Identity this process stamps on the work it owns.
    pub fn owner_id(&self) -> &OwnerId {
        &self.inner.owner
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &WorkConfig {
        &self.inner.config
    }

    /// The work ledger.
    pub fn ledger(&self) -> Arc<dyn WorkRepository> {
        Arc::clone(&self.inner.ledger)
    }

    /// Workers items are dispatched to.
    pub fn workers(&self) -> &WorkerSet {
        &self.inner.workers
    }

    /// Ensures `resource` has a work item and returns it.
    ///
    /// An existing item is returned untouched. A new item is owned by this
    /// process and, unless disabled in config, fired immediately.
    pub async fn schedule<R: ManagedResource>(&self, resource: &R) -> Result<WorkItem> {
        if let Some(existing) =
            self.inner.ledger.find_by_resource_id(resource.id()).await?
        {
            debug!(
                resource = %resource.id(),
                work = %existing.id,
                "Work already scheduled"
            );
            return Ok(existing);
        }

        let item = WorkItem::for_resource(resource, self.inner.owner.clone());
        let item = match self.inner.ledger.persist(item).await {
            Ok(item) => item,
            Err(WorkError::Conflict(reason)) => {
                // Lost an insert race with another scheduler.
                debug!(resource = %resource.id(), %reason, "Concurrent schedule");
                return self
                    .inner
                    .ledger
                    .find_by_resource_id(resource.id())
                    .await?
                    .ok_or(WorkError::Conflict(reason));
            }
            Err(err) => return Err(err),
        };

        info!(
            "Scheduling work for '{}' [{}]",
            item.managed_resource_id, item.resource_type
        );

        if self.inner.config.dispatch_on_schedule {
            self.fire(item.clone());
        }
        Ok(item)
    }

    /// Whether the item is still in the ledger.
    pub async fn exists(&self, item: &WorkItem) -> Result<bool> {
        Ok(self.inner.ledger.find_by_id(item.id).await?.is_some())
    }

    /// Bumps `attempts` and `modified_at` on the stored item.
    ///
    /// Returns `None` when the item was already completed, or when a
    /// concurrent writer updated it first. Neither case is an error.
    pub async fn record_attempt(&self, item: &WorkItem) -> Result<Option<WorkItem>> {
        let Some(mut current) = self.inner.ledger.find_by_id(item.id).await? else {
            debug!(work = %item.id, "Attempt recorded for completed work");
            return Ok(None);
        };

        current.attempts = current.attempts.saturating_add(1);
        current.modified_at = Utc::now();

        match self.inner.ledger.persist(current).await {
            Ok(updated) => Ok(Some(updated)),
            Err(WorkError::Conflict(reason)) => {
                warn!(work = %item.id, %reason, "Attempt lost to concurrent update");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Leaves the item in place for the next dispatch tick.
    pub async fn reschedule(&self, item: &WorkItem) -> Result<Option<WorkItem>> {
        self.record_attempt(item).await
    }

    /// Removes the item. Returns `false` when it was already gone.
    pub async fn complete(&self, item: &WorkItem) -> Result<bool> {
        let removed = self.inner.ledger.delete_by_id(item.id).await?;
        if removed {
            info!(
                "Completed work for '{}' [{}]",
                item.managed_resource_id, item.resource_type
            );
        }
        Ok(removed)
    }

    /// Runs `item` through the worker for its resource type.
    pub async fn dispatch(&self, item: WorkItem) -> DispatchStatus {
        if !self.inner.in_flight.insert(item.id) {
            debug!(work = %item.id, "Dispatch already in flight, skipping");
            return DispatchStatus::Skipped;
        }
        let _guard = InFlightGuard {
            set: &self.inner.in_flight,
            id: item.id,
        };

        let span = debug_span!(
            "dispatch_work",
            work = %item.id,
            resource = %item.managed_resource_id,
            kind = %item.resource_type,
            attempts = item.attempts
        );
        match self.inner.workers.handle(self, &item).instrument(span).await {
            Ok(()) => DispatchStatus::Handled,
            Err(err) => {
                warn!("Failed to handle {item}: {err}");
                DispatchStatus::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    /// Fires `item` on a background task.
    ///
    /// The task is tracked so [`WorkManager::drain`] can wait for it.
    pub fn fire(&self, item: WorkItem) {
        info!(
            "Executing work for '{}' [{}]",
            item.managed_resource_id, item.resource_type
        );
        let manager = self.clone();
        let mut fired = self
            .inner
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Some(finished) = fired.try_join_next() {
            if let Err(err) = finished {
                warn!("fired dispatch task failed: {err}");
            }
        }
        fired.spawn(async move {
            manager.dispatch(item).await;
        });
    }

    /// Waits for every task started by [`WorkManager::fire`].
    pub async fn drain(&self) {
        let mut fired = {
            let mut guard = self
                .inner
                .fired
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if !fired.is_empty() {
            debug!(count = fired.len(), "Waiting for fired dispatches");
        }
        while let Some(finished) = fired.join_next().await {
            if let Err(err) = finished {
                warn!("fired dispatch task failed: {err}");
            }
        }
    }

    /// Dispatches every item owned by this process and waits for all of
    /// them. Returns the number of items that were handled.
    pub async fn dispatch_owned(&self) -> Result<usize> {
        let items = self.inner.ledger.find_by_owner_id(&self.inner.owner).await?;
        if items.is_empty() {
            return Ok(0);
        }
        debug!(count = items.len(), "Dispatching owned work");

        let outcomes = join_all(items.into_iter().map(|item| self.dispatch(item))).await;
        Ok(outcomes.iter().filter(|status| status.is_handled()).count())
    }

    /// Adopts work whose owner has not touched it within the orphan lease.
    ///
    /// A lease reaching back past the representable time range adopts
    /// nothing.
    pub async fn rebalance_orphans(&self) -> Result<u64> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.inner.config.orphan_lease())
        else {
            debug!(
                lease_secs = self.inner.config.orphan_lease_secs,
                "Orphan lease exceeds the time range, nothing is stale"
            );
            return Ok(0);
        };
        let adopted = self
            .inner
            .ledger
            .reassign_stale(&self.inner.owner, cutoff)
            .await?;
        if adopted > 0 {
            info!(owner = %self.inner.owner, adopted, "Adopted orphaned work");
        }
        Ok(adopted)
    }
}
