//! Sneak Signal - rendezvous registry server
//!
//! Peers publish a (content hash -> ip, port) mapping so that other peers can
//! discover how to reach them. The server only stores and serves this
//! metadata; it never relays peer traffic.
//!
//! # Protocol
//!
//! 1. A peer publishes `POST /api/punch` with its hash and reachable address
//! 2. Another peer resolves `GET /api/lookup/{hash}` to learn that address
//! 3. Peers connect to each other directly
//! 4. Entries expire when nobody looks them up for a while, or are evicted
//!    when the table is full
//!
//! Dashboards can follow `/ws` for the full entry list on every change.

pub mod facade;
pub mod messages;
pub mod registry;
pub mod server;

pub use facade::{ApiError, Rendezvous};
pub use messages::{PublishRequest, PublishResponse};
pub use registry::{Registry, RegistryEvent, RemovalReason};
pub use server::{router, SignalServer};
