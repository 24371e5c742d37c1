//! Configuration for the smartevents manager process.
//!
//! The manager reads one [`ManagerConfig`] at startup. It can come from a
//! TOML/JSON file, inline JSON in the environment, or defaults; see
//! [`ManagerConfig::load_from_env`] for the evaluation order.

#![allow(missing_docs)]

pub mod loader;
pub mod models;

pub use loader::ConfigSource;
pub use models::{
    DatabaseConfig, ManagerConfig, ProviderMode, ProvidersConfig, TopicsConfig,
};
pub use smartevents_core::work::WorkConfig;
