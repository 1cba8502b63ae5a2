//! Component registration, one table per host kind.
//!
//! Feature modules register each component kind once at startup as a
//! `(key, predicate, factory)` triple. When a host is constructed, the
//! registry of its kind evaluates every predicate against it and builds an
//! [`Aggregate`] from the factories that matched.
//!
//! [`Registries`] bundles the three per-kind registries. It is produced by a
//! [`RegistriesBuilder`] and has no mutating API, so once built (and usually
//! shared behind an `Arc`) the tables are closed.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use crate::aggregate::Aggregate;
use crate::component::{BoxedComponent, PayloadError};
use crate::host::Host;
use crate::key::{ComponentKey, HostKind};
use crate::TetherError;

/// Decides whether a host receives a component.
pub type Predicate = Box<dyn Fn(&dyn Host) -> bool + Send + Sync>;

/// Builds a fresh component instance for a host.
pub type Factory = Box<dyn Fn(&dyn Host) -> Result<BoxedComponent, PayloadError> + Send + Sync>;

/// Predicate that matches every host of the registry's kind.
pub fn always(_host: &dyn Host) -> bool {
    true
}

// ---------------------------------------------------------------------------
// ComponentRegistration
// ---------------------------------------------------------------------------

/// How to decide whether a host gets a component, and how to build it.
pub struct ComponentRegistration {
    key: ComponentKey,
    predicate: Predicate,
    factory: Factory,
}

impl ComponentRegistration {
    pub fn key(&self) -> &ComponentKey {
        &self.key
    }

    /// Evaluate the attach predicate. A panicking predicate counts as "does
    /// not apply" and is logged.
    pub fn applies_to(&self, host: &dyn Host) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(host))) {
            Ok(applies) => applies,
            Err(_) => {
                tracing::warn!(
                    component = %self.key,
                    host = %host.address(),
                    "attach predicate panicked -- component skipped"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for ComponentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistration")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Table of registrations for one host kind, in registration order.
#[derive(Debug)]
pub struct ComponentRegistry {
    kind: HostKind,
    /// Name -> index into `registrations`.
    by_name: HashMap<String, usize>,
    registrations: Vec<ComponentRegistration>,
}

impl ComponentRegistry {
    /// Create an empty registry for `kind`.
    pub fn new(kind: HostKind) -> Self {
        Self {
            kind,
            by_name: HashMap::new(),
            registrations: Vec::new(),
        }
    }

    pub fn kind(&self) -> HostKind {
        self.kind
    }

    /// Register a component kind.
    ///
    /// # Errors
    ///
    /// - [`TetherError::HostKindMismatch`] if `key` targets a different host
    ///   kind than this registry.
    /// - [`TetherError::DuplicateRegistration`] if a component with the same
    ///   name is already registered. The first registration stays in place.
    ///
    /// Rejections are also logged, so callers at startup may ignore the
    /// result.
    pub fn register<P, F>(
        &mut self,
        key: ComponentKey,
        predicate: P,
        factory: F,
    ) -> Result<(), TetherError>
    where
        P: Fn(&dyn Host) -> bool + Send + Sync + 'static,
        F: Fn(&dyn Host) -> Result<BoxedComponent, PayloadError> + Send + Sync + 'static,
    {
        if key.host_kind() != self.kind {
            tracing::warn!(
                component = %key,
                expected = %self.kind,
                found = %key.host_kind(),
                "component targets a different host kind -- not registered"
            );
            return Err(TetherError::HostKindMismatch {
                key: key.name().to_owned(),
                expected: self.kind,
                found: key.host_kind(),
            });
        }
        if self.by_name.contains_key(key.name()) {
            tracing::warn!(
                component = %key,
                host_kind = %self.kind,
                "component is already registered -- duplicate ignored"
            );
            return Err(TetherError::DuplicateRegistration {
                key: key.name().to_owned(),
                host_kind: self.kind,
            });
        }

        self.by_name
            .insert(key.name().to_owned(), self.registrations.len());
        self.registrations.push(ComponentRegistration {
            key,
            predicate: Box::new(predicate),
            factory: Box::new(factory),
        });
        Ok(())
    }

    /// Look up a registration by component name.
    pub fn get(&self, name: &str) -> Option<&ComponentRegistration> {
        self.by_name.get(name).map(|&idx| &self.registrations[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registrations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentRegistration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registered component names, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Build a fresh component for `name` via its factory.
    ///
    /// The predicate is not consulted. A panicking factory is reported as a
    /// construction failure rather than unwinding into the caller.
    ///
    /// # Errors
    ///
    /// [`TetherError::UnknownComponentKey`] if `name` is not registered,
    /// [`TetherError::ComponentConstructionFailure`] if the factory fails.
    pub fn construct(
        &self,
        name: &str,
        host: &dyn Host,
    ) -> Result<(ComponentKey, BoxedComponent), TetherError> {
        let registration = self
            .get(name)
            .ok_or_else(|| TetherError::UnknownComponentKey {
                key: name.to_owned(),
                host_kind: self.kind,
            })?;
        let component = invoke_factory(registration, host)?;
        Ok((registration.key.clone(), component))
    }

    /// Build the aggregate for a newly constructed host.
    ///
    /// Every registration whose predicate accepts `host` is instantiated.
    /// Factory failures are logged and that component is left out; the rest
    /// still attach. A host of another kind gets an empty aggregate.
    pub fn attach(&self, host: &dyn Host) -> Aggregate {
        let mut aggregate = Aggregate::new(self.kind);

        if host.kind() != self.kind {
            tracing::warn!(
                host = %host.address(),
                host_kind = %host.kind(),
                registry_kind = %self.kind,
                "attach called with a registry for another host kind -- nothing attached"
            );
            return aggregate;
        }

        for registration in &self.registrations {
            if !registration.applies_to(host) {
                continue;
            }
            match invoke_factory(registration, host) {
                Ok(component) => {
                    aggregate.insert(registration.key.clone(), component);
                }
                Err(err) => {
                    tracing::warn!(
                        component = %registration.key,
                        host = %host.address(),
                        error = %err,
                        "component construction failed -- host continues without it"
                    );
                }
            }
        }

        tracing::trace!(
            host = %host.address(),
            attached = aggregate.len(),
            "aggregate attached"
        );
        aggregate
    }
}

/// Run a registration's factory, turning both errors and panics into
/// [`TetherError::ComponentConstructionFailure`].
fn invoke_factory(
    registration: &ComponentRegistration,
    host: &dyn Host,
) -> Result<BoxedComponent, TetherError> {
    let failure = |details: String| TetherError::ComponentConstructionFailure {
        key: registration.key.name().to_owned(),
        details,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| (registration.factory)(host))) {
        Ok(Ok(component)) => Ok(component),
        Ok(Err(err)) => Err(failure(err.to_string())),
        Err(payload) => {
            let details = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "factory panicked".to_owned());
            Err(failure(details))
        }
    }
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// The three per-kind registries, closed for registration.
#[derive(Debug)]
pub struct Registries {
    creature: ComponentRegistry,
    chunk: ComponentRegistry,
    world: ComponentRegistry,
}

impl Registries {
    pub fn builder() -> RegistriesBuilder {
        RegistriesBuilder::new()
    }

    /// The registry for `kind`.
    pub fn for_kind(&self, kind: HostKind) -> &ComponentRegistry {
        match kind {
            HostKind::Creature => &self.creature,
            HostKind::SpatialChunk => &self.chunk,
            HostKind::World => &self.world,
        }
    }

    /// Attach using the registry matching `host.kind()`.
    pub fn attach(&self, host: &dyn Host) -> Aggregate {
        self.for_kind(host.kind()).attach(host)
    }

    /// Total registrations across all kinds.
    pub fn len(&self) -> usize {
        self.creature.len() + self.chunk.len() + self.world.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// RegistriesBuilder
// ---------------------------------------------------------------------------

/// Startup-time builder for [`Registries`].
///
/// Registrations are routed to the registry of the key's host kind.
#[derive(Debug)]
pub struct RegistriesBuilder {
    creature: ComponentRegistry,
    chunk: ComponentRegistry,
    world: ComponentRegistry,
}

impl RegistriesBuilder {
    pub fn new() -> Self {
        Self {
            creature: ComponentRegistry::new(HostKind::Creature),
            chunk: ComponentRegistry::new(HostKind::SpatialChunk),
            world: ComponentRegistry::new(HostKind::World),
        }
    }

    /// Register into the registry selected by `key.host_kind()`.
    ///
    /// # Errors
    ///
    /// [`TetherError::DuplicateRegistration`] if the name is already taken
    /// in that registry.
    pub fn register<P, F>(
        &mut self,
        key: ComponentKey,
        predicate: P,
        factory: F,
    ) -> Result<&mut Self, TetherError>
    where
        P: Fn(&dyn Host) -> bool + Send + Sync + 'static,
        F: Fn(&dyn Host) -> Result<BoxedComponent, PayloadError> + Send + Sync + 'static,
    {
        let registry = match key.host_kind() {
            HostKind::Creature => &mut self.creature,
            HostKind::SpatialChunk => &mut self.chunk,
            HostKind::World => &mut self.world,
        };
        registry.register(key, predicate, factory)?;
        Ok(self)
    }

    /// Close registration.
    pub fn build(self) -> Registries {
        tracing::debug!(
            creature = self.creature.len(),
            chunk = self.chunk.len(),
            world = self.world.len(),
            "component registries closed"
        );
        Registries {
            creature: self.creature,
            chunk: self.chunk,
            world: self.world,
        }
    }
}

impl Default for RegistriesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
