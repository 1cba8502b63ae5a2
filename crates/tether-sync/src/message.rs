//! Wire messages, one shape per host kind.
//!
//! Every message carries `is_update` (partial vs full) and a [`Document`].
//! What differs is the address: creatures are identified by instance id,
//! chunks by their 2D coordinate, and worlds implicitly.
//!
//! Messages are encoded as JSON, internally tagged by `"host"`:
//!
//! ```json
//! {"host":"chunk","x":3,"z":-2,"is_update":true,"document":[{"key":"mod:qi","data":12}]}
//! ```

use serde::{Deserialize, Serialize};
use tether_core::document::Document;
use tether_core::host::HostAddress;

use crate::SyncError;

/// A full or partial snapshot addressed to one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "host", rename_all = "snake_case")]
pub enum SyncMessage {
    Creature {
        entity_id: i32,
        is_update: bool,
        document: Document,
    },
    Chunk {
        x: i32,
        z: i32,
        is_update: bool,
        document: Document,
    },
    World {
        is_update: bool,
        document: Document,
    },
}

impl SyncMessage {
    /// Wrap `document` in the message shape matching `address`.
    pub fn new(address: HostAddress, is_update: bool, document: Document) -> Self {
        match address {
            HostAddress::Creature(entity_id) => SyncMessage::Creature {
                entity_id,
                is_update,
                document,
            },
            HostAddress::Chunk { x, z } => SyncMessage::Chunk {
                x,
                z,
                is_update,
                document,
            },
            HostAddress::World => SyncMessage::World {
                is_update,
                document,
            },
        }
    }

    pub fn address(&self) -> HostAddress {
        match self {
            SyncMessage::Creature { entity_id, .. } => HostAddress::Creature(*entity_id),
            SyncMessage::Chunk { x, z, .. } => HostAddress::Chunk { x: *x, z: *z },
            SyncMessage::World { .. } => HostAddress::World,
        }
    }

    /// `true` for partial snapshots (merge), `false` for full (replace).
    pub fn is_update(&self) -> bool {
        match self {
            SyncMessage::Creature { is_update, .. }
            | SyncMessage::Chunk { is_update, .. }
            | SyncMessage::World { is_update, .. } => *is_update,
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            SyncMessage::Creature { document, .. }
            | SyncMessage::Chunk { document, .. }
            | SyncMessage::World { document, .. } => document,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            SyncMessage::Creature { document, .. }
            | SyncMessage::Chunk { document, .. }
            | SyncMessage::World { document, .. } => document,
        }
    }

    /// Serialize to bytes for the transport.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(|e| SyncError::Encode {
            details: e.to_string(),
        })
    }

    /// Parse bytes received from the transport.
    ///
    /// # Errors
    ///
    /// [`SyncError::Decode`] on malformed input. The caller should drop the
    /// message; local state stays as it was until the next sync.
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Decode {
            details: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
