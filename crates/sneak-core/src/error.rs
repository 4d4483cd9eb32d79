//! Error types for the rendezvous registry

use thiserror::Error;

use crate::types::EntryId;

/// Registry-level outcomes a caller must handle
///
/// Neither variant is a fault: both describe a normal absence of data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no entry published for hash {hash}")]
    NotFound { hash: String },

    #[error("entry {id} does not exist or was already removed")]
    AlreadyRemoved { id: EntryId },
}
