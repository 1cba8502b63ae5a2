//! The per-host component container.
//!
//! An [`Aggregate`] maps [`ComponentKey`]s to component instances. Exactly one
//! exists per host; it is created when the host is constructed, replaced only
//! wholesale (clone, full load), and dropped with the host. A key appears at
//! most once, and components are never removed individually.
//!
//! # Snapshot forms
//!
//! - [`save_full`](Aggregate::save_full) emits every component regardless of
//!   dirtiness. This is the persisted form and the initial-sync form.
//! - [`create_partial`](Aggregate::create_partial) emits only dirty
//!   components, through their `save_outdated` payload.
//!
//! # Failure policy
//!
//! Per-entry failures (unknown key, failing factory, unparsable payload) are
//! logged and reported in a [`LoadReport`]; they never abort the remaining
//! entries.

use std::collections::BTreeMap;

use crate::component::{BoxedComponent, Component};
use crate::document::Document;
use crate::host::Host;
use crate::key::{ComponentKey, HostKind};
use crate::registry::ComponentRegistry;
use crate::TetherError;

// ---------------------------------------------------------------------------
// LoadReport
// ---------------------------------------------------------------------------

/// An entry that could not be loaded or applied.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    /// The key as it appeared in the document.
    pub key: String,
    pub error: TetherError,
}

/// Outcome of a full load or a partial apply.
///
/// Skipped entries are warnings, not errors: everything else in the document
/// was still applied.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Keys that were loaded or applied, in document order.
    pub applied: Vec<String>,
    /// Entries that were skipped, with the reason.
    pub skipped: Vec<SkippedEntry>,
}

impl LoadReport {
    /// `true` when nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, key: &str, error: TetherError) {
        tracing::warn!(component = %key, error = %error, "document entry skipped");
        self.skipped.push(SkippedEntry {
            key: key.to_owned(),
            error,
        });
    }
}

// ---------------------------------------------------------------------------
// PartialCapture
// ---------------------------------------------------------------------------

/// A partial snapshot plus the dirty epochs it observed.
///
/// Produced by [`Aggregate::capture_partial`]. Passing it to
/// [`Aggregate::acknowledge`] clears each captured component's flag through
/// the epoch read before that component was serialized, so marks made after
/// capture survive.
#[derive(Debug, Clone, Default)]
pub struct PartialCapture {
    document: Document,
    epochs: Vec<(ComponentKey, u64)>,
}

impl PartialCapture {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    /// No component was dirty at capture time.
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// All components attached to one host.
pub struct Aggregate {
    kind: HostKind,
    /// Sorted by name, so documents come out in a stable order.
    components: BTreeMap<ComponentKey, BoxedComponent>,
}

impl Aggregate {
    /// Create an empty aggregate for a host of `kind`.
    pub fn new(kind: HostKind) -> Self {
        Self {
            kind,
            components: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    /// Insert a component. Keeps the existing instance and returns `false`
    /// if the key is already present.
    pub(crate) fn insert(&mut self, key: ComponentKey, component: BoxedComponent) -> bool {
        if self.components.contains_key(&key) {
            tracing::warn!(component = %key, "component already attached -- keeping existing instance");
            return false;
        }
        self.components.insert(key, component);
        true
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Attached component names, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(|k| k.name())
    }

    /// The component registered under `name`, if attached.
    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        self.components.get(name).map(|c| &**c)
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut dyn Component> {
        match self.components.get_mut(name) {
            Some(c) => Some(&mut **c),
            None => None,
        }
    }

    /// Typed access. `None` if absent or of another type.
    pub fn get<T: Component>(&self, name: &str) -> Option<&T> {
        self.component(name)?.as_any().downcast_ref::<T>()
    }

    /// Typed mutable access. Does not mark the component dirty.
    pub fn get_mut<T: Component>(&mut self, name: &str) -> Option<&mut T> {
        self.component_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    /// `true` if any attached component is dirty.
    pub fn is_dirty(&self) -> bool {
        self.components.values().any(|c| c.is_dirty())
    }

    pub fn mark_all_dirty(&self) {
        for component in self.components.values() {
            component.mark_dirty();
        }
    }

    pub fn clear_all_dirty(&self) {
        for component in self.components.values() {
            component.clear_dirty();
        }
    }

    // -- full snapshots -----------------------------------------------------

    /// Full snapshot: every attached component, dirty or not.
    ///
    /// A component that fails to serialize is logged and omitted. Dirty flags
    /// are not touched. The returned document owns its data, so it can be
    /// handed to another thread while the simulation keeps mutating.
    pub fn save_full(&self) -> Document {
        let mut document = Document::new();
        for (key, component) in &self.components {
            match component.save_full() {
                Ok(data) => document.push(key.name(), data),
                Err(err) => {
                    tracing::warn!(
                        component = %key,
                        error = %err,
                        "component failed to serialize -- omitted from full snapshot"
                    );
                }
            }
        }
        document
    }

    /// Replace the whole aggregate from a full snapshot.
    ///
    /// The aggregate is cleared first. Each entry is then rebuilt through
    /// `registry`'s factory for `host` and loaded with `load_full`. Unknown
    /// keys, failing factories and unparsable payloads are skipped.
    pub fn load_full(
        &mut self,
        registry: &ComponentRegistry,
        host: &dyn Host,
        document: &Document,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        self.components.clear();

        if registry.kind() != self.kind {
            for entry in document {
                report.skip(
                    &entry.key,
                    TetherError::HostKindMismatch {
                        key: entry.key.clone(),
                        expected: self.kind,
                        found: registry.kind(),
                    },
                );
            }
            return report;
        }

        for entry in document {
            let (key, mut component) = match registry.construct(&entry.key, host) {
                Ok(built) => built,
                Err(err) => {
                    report.skip(&entry.key, err);
                    continue;
                }
            };
            if let Err(err) = component.load_full(&entry.data) {
                report.skip(
                    &entry.key,
                    TetherError::CorruptComponentPayload {
                        key: entry.key.clone(),
                        details: err.to_string(),
                    },
                );
                continue;
            }
            // Last occurrence wins when a document repeats a key.
            self.components.insert(key, component);
            report.applied.push(entry.key.clone());
        }

        report
    }

    /// Attach every registration that applies to `host` but is not present
    /// yet, e.g. components added by a feature after a save was written.
    /// Returns how many were attached.
    pub fn attach_missing(&mut self, registry: &ComponentRegistry, host: &dyn Host) -> usize {
        let mut attached = 0;
        if registry.kind() != self.kind || host.kind() != self.kind {
            return attached;
        }
        for registration in registry.iter() {
            let key = registration.key();
            if self.components.contains_key(key) || !registration.applies_to(host) {
                continue;
            }
            match registry.construct(key.name(), host) {
                Ok((key, component)) => {
                    self.components.insert(key, component);
                    attached += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        component = %key,
                        host = %host.address(),
                        error = %err,
                        "component construction failed -- host continues without it"
                    );
                }
            }
        }
        attached
    }

    // -- partial snapshots --------------------------------------------------

    /// Capture every dirty component's outdated payload without clearing.
    ///
    /// A component whose `save_outdated` fails is logged and left out of the
    /// document, but its epoch is still recorded: retrying every tick would
    /// not fix it, so acknowledging the capture clears it too.
    pub fn capture_partial(&self) -> PartialCapture {
        let mut capture = PartialCapture::default();
        for (key, component) in &self.components {
            if !component.is_dirty() {
                continue;
            }
            let epoch = component.dirty_flag().epoch();
            match component.save_outdated() {
                Ok(data) => {
                    tracing::trace!(component = %key, epoch, "captured dirty component");
                    capture.document.push(key.name(), data);
                }
                Err(err) => {
                    tracing::warn!(
                        component = %key,
                        error = %err,
                        "component failed to serialize -- omitted from partial snapshot"
                    );
                }
            }
            capture.epochs.push((key.clone(), epoch));
        }
        capture
    }

    /// Clear the dirty flags observed by `capture`.
    pub fn acknowledge(&self, capture: &PartialCapture) {
        for (key, epoch) in &capture.epochs {
            if let Some(component) = self.components.get(key) {
                component.dirty_flag().clear_through(*epoch);
            }
        }
    }

    /// Partial snapshot of the dirty components.
    ///
    /// With `clear_after`, flags are cleared after the data was captured, and
    /// only through the epoch seen at capture.
    pub fn create_partial(&self, clear_after: bool) -> Document {
        let capture = self.capture_partial();
        if clear_after {
            self.acknowledge(&capture);
        }
        capture.into_document()
    }

    /// Merge a partial snapshot into the existing instances.
    ///
    /// Each entry is applied with `load_update` to the component already
    /// attached under that key; nothing is reconstructed. Keys that are not
    /// attached here are skipped.
    pub fn apply_partial(&mut self, document: &Document) -> LoadReport {
        let mut report = LoadReport::default();
        for entry in document {
            let Some(component) = self.components.get_mut(entry.key.as_str()) else {
                report.skip(
                    &entry.key,
                    TetherError::UnknownComponentKey {
                        key: entry.key.clone(),
                        host_kind: self.kind,
                    },
                );
                continue;
            };
            match component.load_update(&entry.data) {
                Ok(()) => report.applied.push(entry.key.clone()),
                Err(err) => report.skip(
                    &entry.key,
                    TetherError::CorruptComponentPayload {
                        key: entry.key.clone(),
                        details: err.to_string(),
                    },
                ),
            }
        }
        report
    }

    // -- cloning ------------------------------------------------------------

    /// Build an independent copy of this aggregate bound to `dest`.
    ///
    /// The copy is produced by `save_full` + `load_full`, so it never shares
    /// component instances with `self`. Dirty state is carried over per
    /// component.
    pub fn duplicate_for(
        &self,
        registry: &ComponentRegistry,
        dest: &dyn Host,
    ) -> (Aggregate, LoadReport) {
        let snapshot = self.save_full();
        let mut copy = Aggregate::new(self.kind);
        let report = copy.load_full(registry, dest, &snapshot);

        for (key, component) in &copy.components {
            let source_dirty = self.components.get(key).is_some_and(|c| c.is_dirty());
            if !source_dirty {
                component.clear_dirty();
            }
        }
        (copy, report)
    }
}

impl std::fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("kind", &self.kind)
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{stored_default, DirtyFlag, PayloadError, Stored};
    use crate::host::HostAddress;
    use crate::registry::always;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::any::Any;

    // -- helpers ------------------------------------------------------------

    struct Mob(i32);

    impl Host for Mob {
        fn kind(&self) -> HostKind {
            HostKind::Creature
        }
        fn address(&self) -> HostAddress {
            HostAddress::Creature(self.0)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct A {
        x: i64,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct B {
        y: i64,
    }

    /// Component with a delta payload: only the counter change is sent.
    #[derive(Default)]
    struct Counter {
        total: i64,
        last_sent: i64,
        dirty: DirtyFlag,
    }

    impl Component for Counter {
        fn save_full(&self) -> Result<serde_json::Value, PayloadError> {
            Ok(json!({ "total": self.total }))
        }
        fn load_full(&mut self, data: &serde_json::Value) -> Result<(), PayloadError> {
            self.total = data["total"]
                .as_i64()
                .ok_or_else(|| PayloadError::Invalid("missing total".into()))?;
            Ok(())
        }
        fn save_outdated(&self) -> Result<serde_json::Value, PayloadError> {
            Ok(json!({ "set": self.total, "delta": self.total - self.last_sent }))
        }
        fn load_update(&mut self, data: &serde_json::Value) -> Result<(), PayloadError> {
            self.total = data["set"]
                .as_i64()
                .ok_or_else(|| PayloadError::Invalid("missing set".into()))?;
            Ok(())
        }
        fn dirty_flag(&self) -> &DirtyFlag {
            &self.dirty
        }
    }

    fn key(name: &str) -> ComponentKey {
        ComponentKey::new(name, HostKind::Creature).unwrap()
    }

    fn registry() -> ComponentRegistry {
        let mut reg = ComponentRegistry::new(HostKind::Creature);
        reg.register(key("t:a"), always, stored_default::<A>()).unwrap();
        reg.register(key("t:b"), always, stored_default::<B>()).unwrap();
        reg.register(key("t:counter"), always, |_h: &dyn Host| {
            Ok(Box::new(Counter::default()) as BoxedComponent)
        })
        .unwrap();
        reg
    }

    fn attached() -> Aggregate {
        let agg = registry().attach(&Mob(1));
        agg.clear_all_dirty();
        agg
    }

    // -- tests --------------------------------------------------------------

    #[test]
    fn fresh_components_are_dirty() {
        let agg = registry().attach(&Mob(1));
        assert_eq!(agg.len(), 3);
        assert!(agg.is_dirty());
    }

    #[test]
    fn partial_contains_only_dirty() {
        let mut agg = attached();
        assert!(!agg.is_dirty());

        agg.get_mut::<Stored<A>>("t:a").unwrap().modify(|a| a.x = 1);
        let partial = agg.create_partial(true);

        assert_eq!(partial.keys().collect::<Vec<_>>(), vec!["t:a"]);
        assert_eq!(partial.get("t:a"), Some(&json!({"x": 1})));
        assert!(!agg.is_dirty());
    }

    #[test]
    fn partial_without_clear_leaves_flags() {
        let agg = registry().attach(&Mob(1));
        let partial = agg.create_partial(false);
        assert_eq!(partial.len(), 3);
        assert!(agg.is_dirty());
    }

    #[test]
    fn partial_uses_outdated_payload() {
        let mut agg = attached();
        agg.get_mut::<Counter>("t:counter").unwrap().total = 7;
        agg.component("t:counter").unwrap().mark_dirty();

        let partial = agg.create_partial(true);
        assert_eq!(partial.get("t:counter"), Some(&json!({"set": 7, "delta": 7})));

        let mut replica = attached();
        let report = replica.apply_partial(&partial);
        assert!(report.is_clean());
        assert_eq!(replica.get::<Counter>("t:counter").unwrap().total, 7);
    }

    #[test]
    fn mark_during_capture_survives_acknowledge() {
        let mut agg = attached();
        agg.get_mut::<Stored<A>>("t:a").unwrap().modify(|a| a.x = 1);

        let capture = agg.capture_partial();
        // Another mutation lands before the capture is acknowledged.
        agg.get_mut::<Stored<A>>("t:a").unwrap().modify(|a| a.x = 2);
        agg.acknowledge(&capture);

        assert!(agg.is_dirty());
        assert_eq!(capture.document().get("t:a"), Some(&json!({"x": 1})));
    }

    #[test]
    fn full_roundtrip() {
        let mut agg = attached();
        agg.get_mut::<Stored<A>>("t:a").unwrap().modify(|a| a.x = 1);
        agg.get_mut::<Stored<B>>("t:b").unwrap().modify(|b| b.y = 2);

        let saved = agg.save_full();
        let mut other = Aggregate::new(HostKind::Creature);
        let report = other.load_full(&registry(), &Mob(2), &saved);

        assert!(report.is_clean());
        assert_eq!(other.get::<Stored<A>>("t:a").unwrap().get(), &A { x: 1 });
        assert_eq!(other.get::<Stored<B>>("t:b").unwrap().get(), &B { y: 2 });
        assert_eq!(other.save_full(), saved);
    }

    #[test]
    fn load_full_clears_previous_components() {
        let mut agg = attached();
        let mut only_a = Document::new();
        only_a.push("t:a", json!({"x": 5}));

        agg.load_full(&registry(), &Mob(1), &only_a);
        assert_eq!(agg.keys().collect::<Vec<_>>(), vec!["t:a"]);
    }

    #[test]
    fn load_full_skips_unknown_and_corrupt() {
        let mut doc = Document::new();
        doc.push("t:a", json!({"x": 3}));
        doc.push("t:ghost", json!({}));
        doc.push("t:b", json!("garbage"));

        let mut agg = Aggregate::new(HostKind::Creature);
        let report = agg.load_full(&registry(), &Mob(1), &doc);

        assert_eq!(report.applied, vec!["t:a"]);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(
            report.skipped[0].error,
            TetherError::UnknownComponentKey { .. }
        ));
        assert!(matches!(
            report.skipped[1].error,
            TetherError::CorruptComponentPayload { .. }
        ));
        assert_eq!(agg.keys().collect::<Vec<_>>(), vec!["t:a"]);
    }

    #[test]
    fn apply_partial_mutates_in_place_and_skips_unknown() {
        let mut agg = attached();
        let before: *const Stored<A> = agg.get::<Stored<A>>("t:a").unwrap();

        let mut doc = Document::new();
        doc.push("t:a", json!({"x": 9}));
        doc.push("t:ghost", json!(1));
        let report = agg.apply_partial(&doc);

        let after: *const Stored<A> = agg.get::<Stored<A>>("t:a").unwrap();
        assert_eq!(before, after);
        assert_eq!(agg.get::<Stored<A>>("t:a").unwrap().get().x, 9);
        assert_eq!(report.applied, vec!["t:a"]);
        assert_eq!(report.skipped[0].key, "t:ghost");
    }

    #[test]
    fn apply_partial_twice_is_idempotent() {
        let mut doc = Document::new();
        doc.push("t:a", json!({"x": 4}));
        doc.push("t:counter", json!({"set": 3, "delta": 3}));

        let mut once = attached();
        once.apply_partial(&doc);
        let mut twice = attached();
        twice.apply_partial(&doc);
        twice.apply_partial(&doc);

        assert_eq!(once.save_full(), twice.save_full());
    }

    #[test]
    fn duplicate_is_independent() {
        let mut source = attached();
        source.get_mut::<Stored<A>>("t:a").unwrap().modify(|a| a.x = 10);

        let (copy, report) = source.duplicate_for(&registry(), &Mob(2));
        assert!(report.is_clean());
        assert_eq!(copy.save_full(), source.save_full());

        // Dirty state follows the source.
        assert!(copy.component("t:a").unwrap().is_dirty());
        assert!(!copy.component("t:b").unwrap().is_dirty());

        source.get_mut::<Stored<A>>("t:a").unwrap().modify(|a| a.x = 11);
        assert_eq!(copy.get::<Stored<A>>("t:a").unwrap().get().x, 10);
    }

    #[test]
    fn attach_missing_backfills_new_components() {
        let mut doc = Document::new();
        doc.push("t:a", json!({"x": 6}));

        let mut agg = Aggregate::new(HostKind::Creature);
        agg.load_full(&registry(), &Mob(1), &doc);
        assert_eq!(agg.len(), 1);

        let added = agg.attach_missing(&registry(), &Mob(1));
        assert_eq!(added, 2);
        assert_eq!(agg.keys().collect::<Vec<_>>(), vec!["t:a", "t:b", "t:counter"]);
        // The loaded value is untouched.
        assert_eq!(agg.get::<Stored<A>>("t:a").unwrap().get().x, 6);
    }

    #[test]
    fn insert_keeps_first_instance() {
        let mut agg = Aggregate::new(HostKind::Creature);
        assert!(agg.insert(key("t:a"), Box::new(Stored::new(A { x: 1 }))));
        assert!(!agg.insert(key("t:a"), Box::new(Stored::new(A { x: 2 }))));
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.get::<Stored<A>>("t:a").unwrap().get().x, 1);
    }
}
