//! Tether Sync -- replication of component aggregates to remote replicas.
//!
//! The authoritative side runs a [`ReplicationManager`](manager::ReplicationManager):
//! it attaches aggregates to new hosts, sends a full snapshot when a replica
//! starts observing a host, and on every dirty check sends only the
//! components that changed. Replicas decode incoming [`SyncMessage`]s and
//! apply them with [`apply_inbound`](inbound::apply_inbound).
//!
//! Messages travel through a [`Transport`](transport::Transport). Sends are
//! fire-and-forget; messages are idempotent, and a replica that misses one is
//! corrected by the next full snapshot.
//!
//! Persistence of aggregates inside a host's save record lives in
//! [`persistence`].

#![deny(unsafe_code)]

pub use tether_core;

pub mod config;
pub mod host;
pub mod inbound;
pub mod manager;
pub mod message;
pub mod persistence;
pub mod transport;

use tether_core::host::HostAddress;
use tether_core::key::HostKind;

pub use message::SyncMessage;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the replication layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Received bytes are not a valid sync message.
    #[error("failed to decode sync message: {details}")]
    Decode { details: String },

    /// A message could not be serialized.
    #[error("failed to encode sync message: {details}")]
    Encode { details: String },

    /// A message addresses a host that does not exist locally.
    #[error("no local host at {address}")]
    UnknownHost { address: HostAddress },

    /// The resolved host is of another kind than the message shape.
    #[error("message for {address} resolved to a {host_kind} host")]
    AddressMismatch {
        address: HostAddress,
        host_kind: HostKind,
    },

    /// The host has no aggregate attached yet.
    #[error("host {address} has no aggregate attached")]
    NotAttached { address: HostAddress },

    /// Clone between hosts of different kinds.
    #[error("cannot clone a {from} aggregate into a {to} host")]
    KindMismatch { from: HostKind, to: HostKind },

    /// A config value is out of range or unparsable.
    #[error("invalid sync config: {details}")]
    InvalidConfig { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::SyncConfig;
    pub use crate::host::{AsHost, HostAdapter, HostResolver, ReplicaId, SyncTarget};
    pub use crate::inbound::{apply_inbound, apply_message};
    pub use crate::manager::{LifecycleEvent, ReplicationManager, SyncStats};
    pub use crate::message::SyncMessage;
    pub use crate::persistence::{load_from, save_into, SaveRecord, COMPONENTS_FIELD};
    pub use crate::transport::{ChannelTransport, Transport};
    pub use crate::SyncError;
}
