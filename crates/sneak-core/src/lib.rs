//! Sneak Core - Shared types, configuration and errors
//!
//! This crate contains the foundational types used by the SneakVLC rendezvous
//! registry and its transport. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ConfigError, RegistryConfig, ServerConfig};
pub use error::*;
pub use types::*;

/// Service name reported by the health endpoint
pub const SERVICE_NAME: &str = "sneakvlc";

/// Default HTTP/WebSocket port
pub const DEFAULT_PORT: u16 = 8080;

/// Default maximum number of entries held by the registry
pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// Default interval between staleness sweeps (30 seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default time an entry may go unseen before it is swept (5 minutes)
pub const DEFAULT_STALE_TIMEOUT_SECS: u64 = 300;

/// Longest accepted sweep interval (one day)
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Longest accepted stale timeout (one week)
pub const MAX_STALE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Number of random bytes in an entry id
pub const ENTRY_ID_BYTES: usize = 8;
