//! # smartevents core
//!
//! Work scheduling and resource reconciliation engine for the smartevents
//! manager.
//!
//! Managed resources (bridges, processors, connectors) need several slow,
//! failure-prone external side effects before they can be deployed or torn
//! down. This crate drives them there:
//!
//! - [`work`]: the durable work ledger, the [`work::WorkManager`] that
//!   schedules and dispatches it, and the non-overlapping tickers that poll
//!   it and rescue orphaned rows.
//! - [`workers`]: one state machine per resource type, selected by the work
//!   item's resource type.
//! - [`providers`]: contracts for the topic and connector-management
//!   services the workers call, with HTTP and in-memory implementations.
//! - [`resources`]: storage for the managed resources themselves.
//! - [`processors`] and [`shard`]: the hidden error-handler processor
//!   lifecycle and the status surface polled by the external reconciler.
//!
//! ## Feature Flags
//!
//! - `database` (default): PostgreSQL repositories and embedded migrations.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Error types and error handling utilities
pub mod error;

/// Hidden error-handler processor lifecycle
pub mod processors;

/// Topic and connector-management provider contracts
pub mod providers;

/// Managed resource storage
pub mod resources;

/// Status surface for the external (shard) reconciler
pub mod shard;

/// Work ledger, manager and dispatch loop
pub mod work;

/// Per-resource-type reconciliation workers
pub mod workers;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{ProviderError, Result, WorkError};
pub use smartevents_model as model;
