//! The host adapter contract implemented by the engine integration.
//!
//! [`HostAdapter`] extends the core read-only [`Host`] view with what the
//! replication layer needs: access to the host's aggregate, the ability to
//! replace it wholesale, and the set of replicas currently observing it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tether_core::aggregate::Aggregate;
use tether_core::host::{Host, HostAddress};

// ---------------------------------------------------------------------------
// ReplicaId
// ---------------------------------------------------------------------------

/// A remote party that can observe hosts (typically a connected client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SyncTarget
// ---------------------------------------------------------------------------

/// Who receives a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    /// One replica only (e.g. the player that just joined).
    Replica(ReplicaId),
    /// Every replica currently observing the host.
    Observers,
}

// ---------------------------------------------------------------------------
// HostAdapter
// ---------------------------------------------------------------------------

/// Upcast helper so `&dyn HostAdapter` can be handed to registry code that
/// expects `&dyn Host`.
pub trait AsHost {
    fn as_host(&self) -> &dyn Host;
}

impl<T: Host> AsHost for T {
    fn as_host(&self) -> &dyn Host {
        self
    }
}

/// Integration surface a host type must provide.
///
/// The host owns its aggregate exclusively. `aggregate()` returns `None`
/// until the replication manager attaches one.
pub trait HostAdapter: Host + AsHost {
    fn aggregate(&self) -> Option<&Aggregate>;

    fn aggregate_mut(&mut self) -> Option<&mut Aggregate>;

    /// Install `aggregate`, returning the previous one (if any).
    fn replace_aggregate(&mut self, aggregate: Aggregate) -> Option<Aggregate>;

    /// Replicas currently observing this host. May be empty.
    fn observers(&self) -> Vec<ReplicaId>;
}

// ---------------------------------------------------------------------------
// HostResolver
// ---------------------------------------------------------------------------

/// Replica-side lookup from a wire address to the local host object.
pub trait HostResolver {
    fn resolve(&mut self, address: &HostAddress) -> Option<&mut dyn HostAdapter>;
}
