//! Integration tests for attach, full/partial snapshots and cloning.

use std::any::Any;

use serde_json::json;
use tether_core::prelude::*;

// -- test hosts -------------------------------------------------------------

struct Creature {
    id: i32,
    is_player: bool,
}

impl Host for Creature {
    fn kind(&self) -> HostKind {
        HostKind::Creature
    }
    fn address(&self) -> HostAddress {
        HostAddress::Creature(self.id)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn creature(id: i32) -> Creature {
    Creature {
        id,
        is_player: true,
    }
}

// -- test components --------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct A {
    x: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct B {
    y: i64,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Realm {
    name: String,
    stage: u8,
}

fn key(name: &str) -> ComponentKey {
    ComponentKey::new(name, HostKind::Creature).unwrap()
}

fn setup_registries() -> Registries {
    let mut builder = Registries::builder();
    builder
        .register(key("test:a"), always, stored_default::<A>())
        .unwrap()
        .register(key("test:b"), always, stored_default::<B>())
        .unwrap()
        .register(
            key("test:realm"),
            |host: &dyn Host| {
                host.downcast_ref::<Creature>()
                    .is_some_and(|c| c.is_player)
            },
            stored_default::<Realm>(),
        )
        .unwrap();
    builder.build()
}

fn attach_clean(registries: &Registries, host: &Creature) -> Aggregate {
    let aggregate = registries.attach(host);
    aggregate.clear_all_dirty();
    aggregate
}

fn set_a(aggregate: &mut Aggregate, x: i64) {
    aggregate
        .get_mut::<Stored<A>>("test:a")
        .unwrap()
        .modify(|a| a.x = x);
}

fn set_b(aggregate: &mut Aggregate, y: i64) {
    aggregate
        .get_mut::<Stored<B>>("test:b")
        .unwrap()
        .modify(|b| b.y = y);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn only_mutated_component_appears_in_partial() {
    let registries = setup_registries();
    let host = creature(1);
    let mut aggregate = attach_clean(&registries, &host);

    set_a(&mut aggregate, 42);
    let partial = aggregate.create_partial(true);

    assert_eq!(partial.len(), 1);
    assert_eq!(partial.keys().collect::<Vec<_>>(), vec!["test:a"]);
    assert!(!aggregate.is_dirty());
}

#[test]
fn full_snapshot_reproduces_state() {
    let registries = setup_registries();
    let mut aggregate = attach_clean(&registries, &creature(1));
    set_a(&mut aggregate, 1);
    set_b(&mut aggregate, 2);

    let saved = aggregate.save_full();
    assert_eq!(saved.get("test:a"), Some(&json!({"x": 1})));
    assert_eq!(saved.get("test:b"), Some(&json!({"y": 2})));

    let mut fresh = Aggregate::new(HostKind::Creature);
    let report = fresh.load_full(
        registries.for_kind(HostKind::Creature),
        &creature(2),
        &saved,
    );

    assert!(report.is_clean());
    assert_eq!(fresh.get::<Stored<A>>("test:a").unwrap().get(), &A { x: 1 });
    assert_eq!(fresh.get::<Stored<B>>("test:b").unwrap().get(), &B { y: 2 });
    assert_eq!(fresh.save_full(), saved);
}

#[test]
fn unregistered_entry_is_dropped_on_load() {
    let registries = setup_registries();
    let mut doc = Document::new();
    doc.push("test:a", json!({"x": 7}));
    doc.push("test:b", json!({"y": 8}));
    doc.push("test:c", json!({"z": 9}));

    let mut aggregate = Aggregate::new(HostKind::Creature);
    let report = aggregate.load_full(
        registries.for_kind(HostKind::Creature),
        &creature(1),
        &doc,
    );

    assert_eq!(aggregate.keys().collect::<Vec<_>>(), vec!["test:a", "test:b"]);
    assert_eq!(report.applied, vec!["test:a", "test:b"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, "test:c");
    assert!(matches!(
        report.skipped[0].error,
        TetherError::UnknownComponentKey { .. }
    ));
}

#[test]
fn clone_matches_source_and_stays_independent() {
    let registries = setup_registries();
    let registry = registries.for_kind(HostKind::Creature);
    let mut source = attach_clean(&registries, &creature(1));
    set_a(&mut source, 3);
    source
        .get_mut::<Stored<Realm>>("test:realm")
        .unwrap()
        .modify(|r| {
            r.name = "foundation".into();
            r.stage = 2;
        });

    let before = source.save_full();
    let (copy, report) = source.duplicate_for(registry, &creature(2));
    assert!(report.is_clean());
    assert_eq!(copy.save_full(), before);
    assert_eq!(copy.save_full().digest(), before.digest());

    set_a(&mut source, 4);
    assert_eq!(copy.save_full(), before);
    assert_ne!(source.save_full(), before);
}

#[test]
fn predicate_excludes_non_players() {
    let registries = setup_registries();
    let zombie = Creature {
        id: 9,
        is_player: false,
    };
    let aggregate = registries.attach(&zombie);
    assert!(!aggregate.contains("test:realm"));
    assert_eq!(aggregate.len(), 2);
}

#[test]
fn partial_applied_to_replica_converges() {
    let registries = setup_registries();
    let mut server = attach_clean(&registries, &creature(1));
    let mut replica = attach_clean(&registries, &creature(1));

    set_b(&mut server, 99);
    let partial = server.create_partial(true);
    let report = replica.apply_partial(&partial);

    assert!(report.is_clean());
    assert_eq!(replica.save_full(), server.save_full());
}

#[test]
fn clean_aggregate_yields_empty_partial() {
    let registries = setup_registries();
    let aggregate = attach_clean(&registries, &creature(1));
    assert!(!aggregate.is_dirty());
    assert!(aggregate.create_partial(true).is_empty());
    assert!(aggregate.capture_partial().is_empty());
}
