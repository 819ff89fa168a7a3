//! Dual Cache - a key/value cache that can be shared between processes
//!
//! Each process keeps an optional in-memory mapping and can additionally use
//! a shared directory as a common store. Writers to the shared directory take
//! turns through a ticket queue, and crashed peers are detected by heartbeat.

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod tasks;
pub mod workdir;

pub use api::AppState;
pub use cache::Cache;
pub use config::Config;
pub use error::{CacheError, Result};
