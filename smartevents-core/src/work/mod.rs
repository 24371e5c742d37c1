//! Durable work ledger and the machinery that drives it.
//!
//! A [`WorkItem`](smartevents_model::WorkItem) exists exactly while its
//! managed resource has outstanding reconciliation work. The
//! [`WorkManager`] creates items on `schedule`, hands them to the worker for
//! their resource type, and removes them once the worker reports the current
//! life-cycle phase complete. [`WorkRuntime`] owns the two periodic tickers:
//! dispatch of owned work and adoption of orphaned work.

pub mod config;
pub mod ledger;
pub mod manager;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
pub mod runtime;
pub mod ticker;

pub use config::WorkConfig;
pub use ledger::WorkRepository;
pub use manager::{DispatchStatus, WorkManager};
pub use memory::InMemoryWorkRepository;
#[cfg(feature = "database")]
pub use postgres::PostgresWorkRepository;
pub use runtime::WorkRuntime;
pub use ticker::{PeriodicTask, TickerHandle};
