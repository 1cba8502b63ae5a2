//! Tether Core -- attachable component storage for heterogeneous hosts.
//!
//! Feature modules register named component kinds per host kind (creature,
//! spatial chunk, world). When a host is constructed, every registration whose
//! predicate accepts it contributes one component to the host's
//! [`Aggregate`](aggregate::Aggregate). Components carry their own dirty flag
//! and know how to emit full and partial payloads; the aggregate turns those
//! into self-describing [`Document`](document::Document)s used for both disk
//! persistence and replication.
//!
//! Networking lives in `tether-sync`; this crate is pure storage.
//!
//! # Quick Start
//!
//! ```
//! use tether_core::prelude::*;
//! use std::any::Any;
//!
//! #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Qi { current: u32 }
//!
//! struct Player { id: i32 }
//!
//! impl Host for Player {
//!     fn kind(&self) -> HostKind { HostKind::Creature }
//!     fn address(&self) -> HostAddress { HostAddress::Creature(self.id) }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! let mut builder = Registries::builder();
//! builder
//!     .register(
//!         ComponentKey::new("cultivation:qi", HostKind::Creature).unwrap(),
//!         always,
//!         stored_default::<Qi>(),
//!     )
//!     .unwrap();
//! let registries = builder.build();
//!
//! let mut aggregate = registries.attach(&Player { id: 1 });
//! aggregate.clear_all_dirty();
//!
//! aggregate
//!     .get_mut::<Stored<Qi>>("cultivation:qi")
//!     .unwrap()
//!     .modify(|qi| qi.current = 5);
//!
//! let partial = aggregate.create_partial(true);
//! assert_eq!(partial.keys().collect::<Vec<_>>(), vec!["cultivation:qi"]);
//! assert!(!aggregate.is_dirty());
//! ```

#![deny(unsafe_code)]

pub mod aggregate;
pub mod component;
pub mod document;
pub mod host;
pub mod key;
pub mod registry;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by registration and by per-entry load/apply.
///
/// None of these are fatal. Load and apply paths report them per entry in a
/// [`LoadReport`](aggregate::LoadReport) and carry on with the rest.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TetherError {
    /// A document names a component that is not registered locally.
    #[error("component '{key}' is not registered for {host_kind} hosts")]
    UnknownComponentKey {
        key: String,
        host_kind: key::HostKind,
    },

    /// A factory failed (or panicked) while building a component.
    #[error("failed to construct component '{key}': {details}")]
    ComponentConstructionFailure { key: String, details: String },

    /// A component could not parse its own payload.
    #[error("corrupt payload for component '{key}': {details}")]
    CorruptComponentPayload { key: String, details: String },

    /// A component name was registered twice in the same registry.
    #[error("component '{key}' is already registered for {host_kind} hosts")]
    DuplicateRegistration {
        key: String,
        host_kind: key::HostKind,
    },

    /// A key or registry was used with the wrong host kind.
    #[error("component '{key}' targets {found} hosts, expected {expected}")]
    HostKindMismatch {
        key: String,
        expected: key::HostKind,
        found: key::HostKind,
    },

    /// A component name is not of the form `namespace:path`.
    #[error("invalid component key '{name}': {reason}")]
    InvalidKey { name: String, reason: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::aggregate::{Aggregate, LoadReport, PartialCapture, SkippedEntry};
    pub use crate::component::{
        stored_default, BoxedComponent, Component, DirtyFlag, PayloadError, Stored,
    };
    pub use crate::document::{Document, DocumentEntry};
    pub use crate::host::{Host, HostAddress};
    pub use crate::key::{ComponentKey, HostKind};
    pub use crate::registry::{
        always, ComponentRegistration, ComponentRegistry, Registries, RegistriesBuilder,
    };
    pub use crate::TetherError;
}
