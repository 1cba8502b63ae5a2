//! Shared test hosts for the replication integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use tether_sync::prelude::*;
use tether_sync::tether_core::prelude::*;

// -- components -------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Qi {
    pub current: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Realm {
    pub stage: u8,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Density {
    pub qi: i32,
}

pub const QI: &str = "test:qi";
pub const REALM: &str = "test:realm";
pub const DENSITY: &str = "test:density";

/// `test:qi` on every creature, `test:realm` on players only,
/// `test:density` on every chunk.
pub fn registries() -> Registries {
    let mut builder = Registries::builder();
    builder
        .register(
            ComponentKey::new(QI, HostKind::Creature).unwrap(),
            always,
            stored_default::<Qi>(),
        )
        .unwrap()
        .register(
            ComponentKey::new(REALM, HostKind::Creature).unwrap(),
            |host: &dyn Host| host.downcast_ref::<TestHost>().is_some_and(|h| h.is_player),
            stored_default::<Realm>(),
        )
        .unwrap()
        .register(
            ComponentKey::new(DENSITY, HostKind::SpatialChunk).unwrap(),
            always,
            stored_default::<Density>(),
        )
        .unwrap();
    builder.build()
}

// -- hosts ------------------------------------------------------------------

/// A host of any kind, addressed by `address`.
pub struct TestHost {
    pub address: HostAddress,
    pub is_player: bool,
    pub aggregate: Option<Aggregate>,
    pub observers: Vec<ReplicaId>,
}

impl TestHost {
    pub fn new(address: HostAddress) -> Self {
        Self {
            address,
            is_player: false,
            aggregate: None,
            observers: Vec::new(),
        }
    }

    pub fn player(id: i32) -> Self {
        Self {
            is_player: true,
            ..Self::new(HostAddress::Creature(id))
        }
    }

    pub fn agg(&self) -> &Aggregate {
        self.aggregate.as_ref().expect("host has no aggregate")
    }

    pub fn agg_mut(&mut self) -> &mut Aggregate {
        self.aggregate.as_mut().expect("host has no aggregate")
    }

    pub fn qi(&self) -> Qi {
        self.agg().get::<Stored<Qi>>(QI).unwrap().get().clone()
    }

    pub fn set_qi(&mut self, current: i64) {
        self.agg_mut()
            .get_mut::<Stored<Qi>>(QI)
            .unwrap()
            .modify(|qi| qi.current = current);
    }
}

impl Host for TestHost {
    fn kind(&self) -> HostKind {
        self.address.kind()
    }
    fn address(&self) -> HostAddress {
        self.address
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostAdapter for TestHost {
    fn aggregate(&self) -> Option<&Aggregate> {
        self.aggregate.as_ref()
    }
    fn aggregate_mut(&mut self) -> Option<&mut Aggregate> {
        self.aggregate.as_mut()
    }
    fn replace_aggregate(&mut self, aggregate: Aggregate) -> Option<Aggregate> {
        self.aggregate.replace(aggregate)
    }
    fn observers(&self) -> Vec<ReplicaId> {
        self.observers.clone()
    }
}

// -- replica side -----------------------------------------------------------

/// The replica's local copies of hosts, keyed by address.
#[derive(Default)]
pub struct ReplicaWorld {
    pub hosts: BTreeMap<HostAddress, TestHost>,
}

impl ReplicaWorld {
    /// Add a local host without an aggregate; the first message fills it.
    pub fn spawn(&mut self, host: TestHost) {
        self.hosts.insert(host.address, host);
    }

    pub fn host(&self, address: HostAddress) -> &TestHost {
        &self.hosts[&address]
    }

    /// Apply everything waiting on `rx`. Returns how many messages were
    /// applied successfully.
    pub fn drain(&mut self, registries: &Registries, rx: &Receiver<Vec<u8>>) -> usize {
        let mut applied = 0;
        while let Ok(bytes) = rx.try_recv() {
            if apply_inbound(registries, self, &bytes).is_ok() {
                applied += 1;
            }
        }
        applied
    }
}

impl HostResolver for ReplicaWorld {
    fn resolve(&mut self, address: &HostAddress) -> Option<&mut dyn HostAdapter> {
        self.hosts
            .get_mut(address)
            .map(|host| host as &mut dyn HostAdapter)
    }
}

/// Decode everything waiting on `rx` without applying it.
pub fn received(rx: &Receiver<Vec<u8>>) -> Vec<SyncMessage> {
    rx.try_iter()
        .map(|bytes| SyncMessage::decode(&bytes).unwrap())
        .collect()
}
