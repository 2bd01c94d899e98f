//! Entity identifiers.
//!
//! An entity created optimistically lives in the cache under a [`EntityId::Pending`]
//! id until the server answers. Only [`EntityId::Confirmed`] ids may be sent to the
//! server, which [`EntityId::server_id`] enforces at every request-building site.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Display prefix for client-generated ids.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    /// Assigned by the server.
    Confirmed(String),
    /// Generated by the client for an entity the server has not acknowledged yet.
    Pending(String),
}

impl EntityId {
    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed(id.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The id to put on the wire, or `None` while the entity is still optimistic.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Confirmed(id) | Self::Pending(id) => id,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::Confirmed(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self::Confirmed(id)
    }
}

// Anything read off the wire is server-assigned, regardless of its spelling.
impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::Confirmed)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Kinds of entity the client caches and mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Task,
    Attachment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Task => "task",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces `temp-<unix-millis>-<seq>` ids, unique within the process.
#[derive(Debug, Default)]
pub struct TempIdGenerator {
    seq: AtomicU64,
}

impl TempIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> EntityId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        EntityId::Pending(format!("{TEMP_ID_PREFIX}{millis}-{seq}"))
    }
}
