//! Request-level operations over the registry
//!
//! The transport calls into [`Rendezvous`] rather than the registry so that
//! input validation and error mapping live in one place.

use std::sync::Arc;

use thiserror::Error;

use sneak_core::{Entry, EntryId, PeerAddress, RegistryError};

use crate::messages::{PublishRequest, PublishResponse, StatsResponse};
use crate::registry::Registry;

/// Failures surfaced to callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Access facade shared by every connection
#[derive(Clone)]
pub struct Rendezvous {
    registry: Arc<Registry>,
}

impl Rendezvous {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Validate and publish a new entry
    pub fn publish(&self, req: PublishRequest) -> Result<PublishResponse, ApiError> {
        if req.hash.is_empty() || req.ip.is_empty() || req.port == 0 {
            return Err(ApiError::BadRequest("Missing required fields".into()));
        }

        let id = self
            .registry
            .publish(req.hash, PeerAddress::new(req.ip, req.port));
        Ok(PublishResponse::success(id))
    }

    /// Resolve a peer by content key
    pub fn lookup(&self, hash: &str) -> Result<Entry, ApiError> {
        if hash.is_empty() {
            return Err(ApiError::BadRequest("Hash parameter required".into()));
        }

        self.registry.lookup(hash).ok_or_else(|| {
            RegistryError::NotFound {
                hash: hash.to_string(),
            }
            .into()
        })
    }

    /// Every stored entry, oldest first
    pub fn entries(&self) -> Vec<Entry> {
        self.registry.list()
    }

    /// Delete an entry by id
    pub fn remove(&self, id: &str) -> Result<(), ApiError> {
        if id.is_empty() {
            return Err(ApiError::BadRequest("ID parameter required".into()));
        }

        let id = EntryId::from(id);
        if self.registry.remove(&id) {
            Ok(())
        } else {
            Err(RegistryError::AlreadyRemoved { id }.into())
        }
    }

    pub fn stats(&self) -> StatsResponse {
        StatsResponse {
            entries: self.registry.len(),
            max_entries: self.registry.config().max_entries,
            subscribers: self.registry.subscriber_count(),
        }
    }
}
