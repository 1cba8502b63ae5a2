//! The read-only host view seen by registrations.
//!
//! The engine never reaches into the surrounding game engine directly. A host
//! object (a creature, a chunk, a world) is seen through the [`Host`] trait:
//! its kind, its stable address, and an `Any` escape hatch that predicates and
//! factories use to downcast to the concrete engine type they care about.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::HostKind;

// ---------------------------------------------------------------------------
// HostAddress
// ---------------------------------------------------------------------------

/// Stable per-host address, usable in wire messages.
///
/// The shape differs per host kind: creatures carry an instance id, chunks a
/// 2D coordinate, and worlds are implicit (one per world).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HostAddress {
    Creature(i32),
    Chunk { x: i32, z: i32 },
    World,
}

impl HostAddress {
    /// The host kind this address belongs to.
    pub fn kind(&self) -> HostKind {
        match self {
            HostAddress::Creature(_) => HostKind::Creature,
            HostAddress::Chunk { .. } => HostKind::SpatialChunk,
            HostAddress::World => HostKind::World,
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAddress::Creature(id) => write!(f, "creature#{id}"),
            HostAddress::Chunk { x, z } => write!(f, "chunk[{x},{z}]"),
            HostAddress::World => f.write_str("world"),
        }
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Read-only view of a host instance.
///
/// Implemented by the engine integration for each concrete host type.
/// `kind()` must agree with `address().kind()`.
pub trait Host {
    /// Which registry applies to this host.
    fn kind(&self) -> HostKind;

    /// Stable address of this host instance.
    fn address(&self) -> HostAddress;

    /// Downcast support for predicates and factories.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Host + '_ {
    /// Downcast to a concrete host type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
