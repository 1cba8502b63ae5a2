//! Replication orchestration on the authoritative side.
//!
//! The [`ReplicationManager`] attaches aggregates to new hosts, emits full
//! and partial snapshots, clones state between hosts, and maps host lifecycle
//! events onto those operations.
//!
//! # Ordering guarantee
//!
//! For every (host, replica) pair a full snapshot is sent before any partial
//! one. The manager remembers which replicas have been primed with a full
//! snapshot per host; [`sync_dirty`](ReplicationManager::sync_dirty) sends a
//! full snapshot instead of a partial to any current observer it has not
//! primed yet, and forgets replicas that stopped observing so that a later
//! re-subscribe is primed again.
//!
//! # Dirty-flag clearing
//!
//! `sync_dirty` captures the partial snapshot, hands every message to the
//! transport, and only then clears the flags, through the epoch each
//! component had when it was captured. A mutation that lands between capture
//! and clear keeps its component dirty for the next tick.
//!
//! # Example
//!
//! ```
//! use std::any::Any;
//! use std::sync::Arc;
//! use tether_core::prelude::*;
//! use tether_sync::prelude::*;
//!
//! #[derive(Default, serde::Serialize, serde::Deserialize)]
//! struct Qi { current: u32 }
//!
//! struct World { aggregate: Option<Aggregate>, observers: Vec<ReplicaId> }
//!
//! impl Host for World {
//!     fn kind(&self) -> HostKind { HostKind::World }
//!     fn address(&self) -> HostAddress { HostAddress::World }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! impl HostAdapter for World {
//!     fn aggregate(&self) -> Option<&Aggregate> { self.aggregate.as_ref() }
//!     fn aggregate_mut(&mut self) -> Option<&mut Aggregate> { self.aggregate.as_mut() }
//!     fn replace_aggregate(&mut self, a: Aggregate) -> Option<Aggregate> { self.aggregate.replace(a) }
//!     fn observers(&self) -> Vec<ReplicaId> { self.observers.clone() }
//! }
//!
//! let mut builder = Registries::builder();
//! builder
//!     .register(ComponentKey::new("realm:ambient_qi", HostKind::World).unwrap(), always, stored_default::<Qi>())
//!     .unwrap();
//! let transport = ChannelTransport::new();
//! let rx = transport.connect(ReplicaId(1));
//! let mut manager =
//!     ReplicationManager::new(Arc::new(builder.build()), transport, SyncConfig::default()).unwrap();
//!
//! let mut world = World { aggregate: None, observers: vec![ReplicaId(1)] };
//! manager.attach_new(&mut world);
//! manager.begin_observing(&world, ReplicaId(1)).unwrap();
//! assert!(!SyncMessage::decode(&rx.try_recv().unwrap()).unwrap().is_update());
//!
//! // Fresh components are dirty: the first dirty check sends a partial.
//! assert_eq!(manager.sync_dirty(&world).unwrap(), 1);
//! // Nothing changed since: nothing is sent.
//! assert_eq!(manager.sync_dirty(&world).unwrap(), 0);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tether_core::aggregate::{Aggregate, LoadReport};
use tether_core::host::HostAddress;
use tether_core::registry::Registries;

use crate::config::SyncConfig;
use crate::host::{HostAdapter, ReplicaId, SyncTarget};
use crate::message::SyncMessage;
use crate::transport::Transport;
use crate::SyncError;

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// Host lifecycle points at which the engine integration calls
/// [`ReplicationManager::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The host was just constructed.
    Created,
    /// A player's own replica connected to the server.
    Join(ReplicaId),
    /// A replica started observing the host (came into view).
    StartTracking(ReplicaId),
    /// The host moved (e.g. to another dimension) and must be re-sent.
    Migrated(ReplicaId),
    /// A replica stopped observing the host.
    StopTracking(ReplicaId),
    /// The host respawned after its state was cloned into it.
    Respawn,
    /// Periodic dirty check.
    Tick,
}

// ---------------------------------------------------------------------------
// SyncStats
// ---------------------------------------------------------------------------

/// Cumulative counters, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Full snapshot messages handed to the transport.
    pub full_messages: u64,
    /// Partial snapshot messages handed to the transport.
    pub partial_messages: u64,
    /// Dirty checks that found nothing to send.
    pub clean_checks: u64,
}

// ---------------------------------------------------------------------------
// ReplicationManager
// ---------------------------------------------------------------------------

/// Authoritative-side replication driver.
///
/// Runs on the simulation thread; the only thing that leaves it is the
/// already-serialized message handed to the [`Transport`].
pub struct ReplicationManager<T: Transport> {
    registries: Arc<Registries>,
    transport: T,
    config: SyncConfig,
    /// Replicas that received a full snapshot, per host.
    primed: HashMap<HostAddress, BTreeSet<ReplicaId>>,
    tick_counter: u64,
    stats: SyncStats,
}

impl<T: Transport> ReplicationManager<T> {
    /// Create a manager over closed registries.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidConfig`] if `config` fails [`SyncConfig::validate`].
    pub fn new(registries: Arc<Registries>, transport: T, config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            registries,
            transport,
            config,
            primed: HashMap::new(),
            tick_counter: 0,
            stats: SyncStats::default(),
        })
    }

    /// Number of hosts with at least one primed replica.
    pub fn primed_hosts(&self) -> usize {
        self.primed.len()
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Whether `replica` has been primed with a full snapshot of `address`.
    pub fn is_primed(&self, address: &HostAddress, replica: ReplicaId) -> bool {
        self.primed
            .get(address)
            .is_some_and(|set| set.contains(&replica))
    }

    // -- attach -------------------------------------------------------------

    /// Attach the aggregate for a newly constructed host.
    ///
    /// Must be called once per host. A host that already has an aggregate
    /// keeps it; the call is logged and returns `false`.
    pub fn attach_new(&self, host: &mut dyn HostAdapter) -> bool {
        if host.aggregate().is_some() {
            tracing::warn!(host = %host.address(), "host already has an aggregate -- attach ignored");
            return false;
        }
        let aggregate = self.registries.attach(host.as_host());
        tracing::debug!(
            host = %host.address(),
            components = aggregate.len(),
            "aggregate attached to new host"
        );
        host.replace_aggregate(aggregate);
        true
    }

    // -- sending ------------------------------------------------------------

    fn dispatch(&mut self, replicas: &[ReplicaId], message: &SyncMessage) -> usize {
        for &replica in replicas {
            self.transport.send(replica, message);
        }
        let sent = replicas.len();
        if message.is_update() {
            self.stats.partial_messages += sent as u64;
        } else {
            self.stats.full_messages += sent as u64;
        }
        sent
    }

    fn send_full(&mut self, address: HostAddress, aggregate: &Aggregate, replicas: &[ReplicaId]) -> usize {
        if replicas.is_empty() {
            return 0;
        }
        let document = aggregate.save_full();
        tracing::debug!(
            host = %address,
            replicas = replicas.len(),
            components = document.len(),
            digest = %document.digest(),
            "sending full snapshot"
        );
        let message = SyncMessage::new(address, false, document);
        let sent = self.dispatch(replicas, &message);
        self.primed
            .entry(address)
            .or_default()
            .extend(replicas.iter().copied());
        sent
    }

    /// Send a full snapshot of `host` to `target`.
    ///
    /// Dirty flags are left alone. Every replica reached is recorded as
    /// primed for this host. Returns the number of messages sent.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAttached`] if the host has no aggregate.
    pub fn sync_full(&mut self, host: &dyn HostAdapter, target: SyncTarget) -> Result<usize, SyncError> {
        let address = host.address();
        let aggregate = host
            .aggregate()
            .ok_or(SyncError::NotAttached { address })?;
        let replicas = match target {
            SyncTarget::Replica(replica) => vec![replica],
            SyncTarget::Observers => host.observers(),
        };
        Ok(self.send_full(address, aggregate, &replicas))
    }

    /// Periodic dirty check for one host.
    ///
    /// Sends nothing when the aggregate is clean. Otherwise sends a partial
    /// snapshot to primed observers, a full snapshot to observers that were
    /// never primed, and then clears the captured dirty flags. Returns the
    /// number of messages sent.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAttached`] if the host has no aggregate.
    pub fn sync_dirty(&mut self, host: &dyn HostAdapter) -> Result<usize, SyncError> {
        let address = host.address();
        let aggregate = host
            .aggregate()
            .ok_or(SyncError::NotAttached { address })?;

        // Pruned before the clean gate, so a replica that leaves and returns
        // while nothing changes is primed again.
        let observers = host.observers();
        self.prune_primed(address, &observers);

        if !aggregate.is_dirty() {
            self.stats.clean_checks += 1;
            return Ok(0);
        }

        let primed = self.primed.get(&address);
        let (warm, cold): (Vec<ReplicaId>, Vec<ReplicaId>) = observers
            .iter()
            .partition(|r| primed.is_some_and(|set| set.contains(*r)));

        let capture = aggregate.capture_partial();
        let mut sent = 0;

        if !warm.is_empty() && !capture.document().is_empty() {
            tracing::debug!(
                host = %address,
                replicas = warm.len(),
                components = capture.document().len(),
                "sending partial snapshot"
            );
            let message = SyncMessage::new(address, true, capture.document().clone());
            sent += self.dispatch(&warm, &message);
        }
        sent += self.send_full(address, aggregate, &cold);

        aggregate.acknowledge(&capture);
        Ok(sent)
    }

    // -- observers ----------------------------------------------------------

    /// Forget primed replicas of `address` that are no longer observing it.
    fn prune_primed(&mut self, address: HostAddress, observers: &[ReplicaId]) {
        if let Some(set) = self.primed.get_mut(&address) {
            set.retain(|r| observers.contains(r));
            if set.is_empty() {
                self.primed.remove(&address);
            }
        }
    }

    /// A replica started observing `host`: prime it with a full snapshot.
    pub fn begin_observing(&mut self, host: &dyn HostAdapter, replica: ReplicaId) -> Result<usize, SyncError> {
        self.sync_full(host, SyncTarget::Replica(replica))
    }

    /// A replica stopped observing the host at `address`. A later
    /// re-subscribe starts with a full snapshot again.
    pub fn end_observing(&mut self, address: &HostAddress, replica: ReplicaId) {
        if let Some(set) = self.primed.get_mut(address) {
            set.remove(&replica);
            if set.is_empty() {
                self.primed.remove(address);
            }
        }
    }

    /// Drop all bookkeeping for a removed host.
    pub fn forget_host(&mut self, address: &HostAddress) {
        self.primed.remove(address);
    }

    /// A replica disconnected: forget it for every host.
    pub fn forget_replica(&mut self, replica: ReplicaId) {
        self.primed.retain(|_, set| {
            set.remove(&replica);
            !set.is_empty()
        });
    }

    // -- cloning ------------------------------------------------------------

    /// Give `dest` an independent copy of `source`'s state.
    ///
    /// `dest`'s previous aggregate is replaced wholesale and the two never
    /// share component instances. `dest`'s priming is reset and its current
    /// observers are sent a full snapshot of the inherited state, whether or
    /// not the source was dirty.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAttached`] if `source` has no aggregate,
    /// [`SyncError::KindMismatch`] if the hosts are of different kinds.
    pub fn clone_into(
        &mut self,
        source: &dyn HostAdapter,
        dest: &mut dyn HostAdapter,
    ) -> Result<LoadReport, SyncError> {
        let source_address = source.address();
        let aggregate = source
            .aggregate()
            .ok_or(SyncError::NotAttached {
                address: source_address,
            })?;
        if source.kind() != dest.kind() {
            return Err(SyncError::KindMismatch {
                from: source.kind(),
                to: dest.kind(),
            });
        }

        let registry = self.registries.for_kind(dest.kind());
        let (copy, report) = aggregate.duplicate_for(registry, dest.as_host());
        tracing::debug!(
            from = %source_address,
            to = %dest.address(),
            components = copy.len(),
            skipped = report.skipped.len(),
            "aggregate cloned"
        );
        dest.replace_aggregate(copy);

        let address = dest.address();
        self.primed.remove(&address);
        let observers = dest.observers();
        if let Some(aggregate) = dest.aggregate() {
            self.send_full(address, aggregate, &observers);
        }
        Ok(report)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Apply the reference sync policy for a lifecycle event. Returns the
    /// number of messages sent.
    pub fn handle(&mut self, host: &mut dyn HostAdapter, event: LifecycleEvent) -> Result<usize, SyncError> {
        match event {
            LifecycleEvent::Created => {
                self.attach_new(host);
                Ok(0)
            }
            LifecycleEvent::Join(replica)
            | LifecycleEvent::StartTracking(replica)
            | LifecycleEvent::Migrated(replica) => self.begin_observing(host, replica),
            LifecycleEvent::StopTracking(replica) => {
                self.end_observing(&host.address(), replica);
                Ok(0)
            }
            LifecycleEvent::Respawn => {
                if self.config.full_sync_on_respawn {
                    self.sync_full(host, SyncTarget::Observers)
                } else {
                    Ok(0)
                }
            }
            LifecycleEvent::Tick => self.sync_dirty(host),
        }
    }

    /// Advance one tick and, on the configured cadence, run the dirty check
    /// for every host. Hosts without an aggregate are skipped. Returns the
    /// number of messages sent.
    pub fn tick<'a, I>(&mut self, hosts: I) -> usize
    where
        I: IntoIterator<Item = &'a dyn HostAdapter>,
    {
        self.tick_counter += 1;
        if self.tick_counter % u64::from(self.config.dirty_check_interval) != 0 {
            return 0;
        }

        let mut sent = 0;
        for host in hosts {
            match self.sync_dirty(host) {
                Ok(n) => sent += n,
                Err(err) => {
                    tracing::debug!(host = %host.address(), error = %err, "dirty check skipped");
                }
            }
        }
        sent
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for ReplicationManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("primed_hosts", &self.primed.len())
            .field("tick_counter", &self.tick_counter)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
