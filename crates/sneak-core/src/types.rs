//! Core types for rendezvous entries

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ENTRY_ID_BYTES;

/// Opaque identifier assigned to an entry when it is published
///
/// Rendered as 16 lowercase hex characters. Ids are only used to reference an
/// entry for removal; peers look entries up by hash.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Generate a random entry id
    ///
    /// # Panics
    /// Panics if the system random number generator fails (extremely rare).
    /// Use `try_generate` if you need to handle this case.
    pub fn generate() -> Self {
        Self::try_generate().expect("RNG failed - system entropy source unavailable")
    }

    /// Try to generate a random entry id, returning an error if RNG fails
    pub fn try_generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; ENTRY_ID_BYTES];
        getrandom::getrandom(&mut bytes)?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network address where a publishing peer can be reached
///
/// The host is kept as an opaque string: the registry does not interpret it.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bracket bare IPv6 literals so the output parses as a socket address
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

/// A published rendezvous record
///
/// Values of this type are snapshots: the registry hands out copies and never
/// shares its internal records.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Entry {
    /// Registry-assigned identifier
    pub id: EntryId,

    /// Content key peers search by (not unique)
    pub hash: String,

    /// Where the publisher is reachable
    #[serde(flatten)]
    pub address: PeerAddress,

    /// When the entry was published
    pub created_at: DateTime<Utc>,

    /// When the entry was last returned by a lookup
    pub last_seen: DateTime<Utc>,
}
