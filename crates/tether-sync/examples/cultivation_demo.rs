//! Cultivation demo: a server simulates a player, a mob, a chunk and the
//! world for a few dozen ticks while a replica on another thread mirrors them
//! over the channel transport.
//!
//! Halfway through, the player dies and respawns as a new creature; its
//! state is cloned into the new host and resent in full. At the end the
//! replica's state is checked against the server's and the player's save
//! record is written and reloaded.
//!
//! Run with:
//! ```text
//! RUST_LOG=tether_sync=debug cargo run -p tether-sync --example cultivation_demo [sync.json]
//! ```

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_sync::prelude::*;
use tether_sync::tether_core::prelude::*;

const REPLICA: ReplicaId = ReplicaId(1);
const TICKS: u64 = 40;
const RESPAWN_AT: u64 = 20;

const QI: &str = "cultivation:qi";
const REALM: &str = "cultivation:realm";
const MERIDIANS: &str = "cultivation:meridians";
const DENSITY: &str = "terrain:qi_density";
const TRIBULATION: &str = "world:tribulation";

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Qi {
    current: u32,
    max: u32,
}

impl Default for Qi {
    fn default() -> Self {
        Self { current: 0, max: 50 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Realm {
    stage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Density {
    qi: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Tribulation {
    strikes: u32,
}

/// Meridians opened so far. Only ever grows, so updates merge into the
/// receiver's set instead of replacing it.
#[derive(Debug, Default)]
struct Meridians {
    opened: BTreeSet<u8>,
    dirty: DirtyFlag,
}

impl Meridians {
    fn open(&mut self, meridian: u8) {
        if self.opened.insert(meridian) {
            self.dirty.mark();
        }
    }
}

impl Component for Meridians {
    fn save_full(&self) -> Result<Value, PayloadError> {
        Ok(serde_json::to_value(&self.opened)?)
    }

    fn load_full(&mut self, data: &Value) -> Result<(), PayloadError> {
        self.opened = BTreeSet::deserialize(data)?;
        Ok(())
    }

    fn load_update(&mut self, data: &Value) -> Result<(), PayloadError> {
        let opened: BTreeSet<u8> = BTreeSet::deserialize(data)?;
        self.opened.extend(opened);
        Ok(())
    }

    fn dirty_flag(&self) -> &DirtyFlag {
        &self.dirty
    }
}

fn is_player(host: &dyn Host) -> bool {
    host.downcast_ref::<DemoHost>().is_some_and(|h| h.is_player)
}

fn register_components() -> Result<Registries, TetherError> {
    let mut builder = Registries::builder();
    builder
        .register(
            ComponentKey::new(QI, HostKind::Creature)?,
            always,
            stored_default::<Qi>(),
        )?
        .register(
            ComponentKey::new(REALM, HostKind::Creature)?,
            is_player,
            stored_default::<Realm>(),
        )?
        .register(
            ComponentKey::new(MERIDIANS, HostKind::Creature)?,
            is_player,
            |_: &dyn Host| Ok(Box::new(Meridians::default()) as BoxedComponent),
        )?
        .register(
            ComponentKey::new(DENSITY, HostKind::SpatialChunk)?,
            always,
            |_: &dyn Host| Ok(Box::new(Stored::new(Density { qi: 100 })) as BoxedComponent),
        )?
        .register(
            ComponentKey::new(TRIBULATION, HostKind::World)?,
            always,
            stored_default::<Tribulation>(),
        )?;
    Ok(builder.build())
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

struct DemoHost {
    address: HostAddress,
    is_player: bool,
    aggregate: Option<Aggregate>,
    observers: Vec<ReplicaId>,
}

impl DemoHost {
    fn new(address: HostAddress, is_player: bool) -> Self {
        Self {
            address,
            is_player,
            aggregate: None,
            observers: Vec::new(),
        }
    }

    fn component_mut<C: Component>(&mut self, name: &str) -> Result<&mut C, anyhow::Error> {
        let address = self.address;
        self.aggregate
            .as_mut()
            .and_then(|a| a.get_mut::<C>(name))
            .ok_or_else(|| anyhow::anyhow!("{address} has no component {name}"))
    }

    fn stored_mut<T>(&mut self, name: &str) -> Result<&mut Stored<T>, anyhow::Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.component_mut::<Stored<T>>(name)
    }

    fn digest(&self) -> Option<String> {
        self.aggregate.as_ref().map(|a| a.save_full().digest())
    }
}

impl Host for DemoHost {
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

impl HostAdapter for DemoHost {
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

/// The replica's view. Hosts appear on demand when a message names them.
#[derive(Default)]
struct ReplicaWorld {
    hosts: BTreeMap<HostAddress, DemoHost>,
}

impl HostResolver for ReplicaWorld {
    fn resolve(&mut self, address: &HostAddress) -> Option<&mut dyn HostAdapter> {
        let host = self
            .hosts
            .entry(*address)
            .or_insert_with(|| DemoHost::new(*address, false));
        Some(host as &mut dyn HostAdapter)
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

const PLAYER: usize = 0;
const MOB: usize = 1;
const CHUNK: usize = 2;
const WORLD: usize = 3;

fn simulate(hosts: &mut [DemoHost], tick: u64) -> Result<(), anyhow::Error> {
    // The player meditates every tick and breaks through when full.
    let player = &mut hosts[PLAYER];
    let full = player.stored_mut::<Qi>(QI)?.modify(|qi| {
        qi.current = (qi.current + 9).min(qi.max);
        qi.current == qi.max
    });
    if full {
        let stage = player.stored_mut::<Realm>(REALM)?.modify(|realm| {
            realm.stage += 1;
            realm.stage
        });
        player.stored_mut::<Qi>(QI)?.modify(|qi| {
            qi.current = 0;
            qi.max += 25;
        });
        player.component_mut::<Meridians>(MERIDIANS)?.open(stage);
        tracing::info!(tick, stage, "player broke through");
    }

    // The mob feeds on the chunk's qi every fifth tick.
    if tick % 5 == 0 {
        let drained = hosts[CHUNK].stored_mut::<Density>(DENSITY)?.modify(|d| {
            let drained = d.qi.min(3);
            d.qi -= drained;
            drained
        });
        hosts[MOB]
            .stored_mut::<Qi>(QI)?
            .modify(|qi| qi.current = (qi.current + drained).min(qi.max));
    }

    if tick % 10 == 0 {
        hosts[WORLD]
            .stored_mut::<Tribulation>(TRIBULATION)?
            .modify(|t| t.strikes += 1);
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    let registries = Arc::new(register_components()?);

    // Replica thread: applies everything it receives until the channel closes.
    let transport = ChannelTransport::new();
    let rx = transport.connect(REPLICA);
    let replica_registries = Arc::clone(&registries);
    let replica = thread::spawn(move || {
        let mut world = ReplicaWorld::default();
        let mut applied = 0usize;
        for bytes in rx {
            match apply_inbound(&replica_registries, &mut world, &bytes) {
                Ok(report) => {
                    applied += 1;
                    for skipped in &report.skipped {
                        tracing::warn!(component = %skipped.key, error = %skipped.error, "replica skipped entry");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "replica dropped message"),
            }
        }
        (world, applied)
    });

    let mut manager = ReplicationManager::new(Arc::clone(&registries), transport, config)?;
    let mut hosts = vec![
        DemoHost::new(HostAddress::Creature(1), true),
        DemoHost::new(HostAddress::Creature(2), false),
        DemoHost::new(HostAddress::Chunk { x: 0, z: 0 }, false),
        DemoHost::new(HostAddress::World, false),
    ];
    for host in &mut hosts {
        host.observers.push(REPLICA);
        manager.handle(host, LifecycleEvent::Created)?;
        manager.handle(host, LifecycleEvent::StartTracking(REPLICA))?;
    }

    for tick in 1..=TICKS {
        simulate(&mut hosts, tick)?;

        if tick == RESPAWN_AT {
            let mut reborn = DemoHost::new(HostAddress::Creature(3), true);
            reborn.observers.push(REPLICA);
            manager.handle(&mut reborn, LifecycleEvent::Created)?;
            manager.clone_into(&hosts[PLAYER], &mut reborn)?;
            manager.handle(&mut reborn, LifecycleEvent::Respawn)?;
            manager.forget_host(&hosts[PLAYER].address);
            tracing::info!(from = %hosts[PLAYER].address, to = %reborn.address, "player respawned");
            hosts[PLAYER] = reborn;
        }

        let sent = manager.tick(hosts.iter().map(|h| h as &dyn HostAdapter));
        tracing::debug!(tick, sent, "tick complete");
    }

    manager.transport().disconnect(REPLICA);
    let (world, applied) = replica
        .join()
        .map_err(|_| anyhow::anyhow!("replica thread panicked"))?;

    println!("replica applied {applied} messages; server stats: {:?}", manager.stats());
    for host in &hosts {
        let server = host
            .digest()
            .ok_or_else(|| anyhow::anyhow!("{} has no aggregate", host.address))?;
        let local = world
            .hosts
            .get(&host.address)
            .and_then(DemoHost::digest)
            .ok_or_else(|| anyhow::anyhow!("replica never saw {}", host.address))?;
        if server != local {
            anyhow::bail!("replica diverged at {}", host.address);
        }
        println!("{:<16} in sync  digest {}", host.address.to_string(), &server[..16]);
    }

    // Persist the player and load it back into a fresh host.
    let mut record = SaveRecord::new();
    record.insert("name".to_owned(), Value::from("wandering cultivator"));
    save_into(&hosts[PLAYER], &mut record)?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    let mut reloaded = DemoHost::new(hosts[PLAYER].address, true);
    let report = load_from(&registries, &mut reloaded, &record)
        .ok_or_else(|| anyhow::anyhow!("save record has no component field"))?;
    if reloaded.digest() != hosts[PLAYER].digest() {
        anyhow::bail!("reloaded player differs from the saved one");
    }
    println!("reloaded player: {} components, {} skipped", report.applied.len(), report.skipped.len());

    Ok(())
}
