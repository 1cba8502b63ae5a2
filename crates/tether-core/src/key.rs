//! Component keys and host kinds.
//!
//! A [`ComponentKey`] names one kind of attachable state, e.g.
//! `"cultivation:qi"`. The same string is used as the registry lookup key,
//! the aggregate map key, and the tag written into wire and disk documents.
//! Every key also records which [`HostKind`] it targets, so a key can only be
//! registered into the registry of that kind.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::TetherError;

// ---------------------------------------------------------------------------
// HostKind
// ---------------------------------------------------------------------------

/// The closed set of host kinds that can carry an aggregate.
///
/// Each kind has its own registry and its own wire addressing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// A living entity (players, mobs), addressed by instance id.
    Creature,
    /// A column of terrain, addressed by its 2D chunk coordinate.
    SpatialChunk,
    /// A whole world / dimension. One per world, no address.
    World,
}

impl HostKind {
    /// All host kinds, in declaration order.
    pub const ALL: [HostKind; 3] = [HostKind::Creature, HostKind::SpatialChunk, HostKind::World];

    /// Short lowercase label used in log fields.
    pub fn label(self) -> &'static str {
        match self {
            HostKind::Creature => "creature",
            HostKind::SpatialChunk => "chunk",
            HostKind::World => "world",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// ComponentKey
// ---------------------------------------------------------------------------

/// Namespaced identifier for a component kind.
///
/// Equality, ordering and hashing consider the name only. Two keys with the
/// same name but different host kinds compare equal; registries reject such a
/// pair at registration time.
#[derive(Clone)]
pub struct ComponentKey {
    name: String,
    /// Byte offset of the `:` separator within `name`.
    split: usize,
    host_kind: HostKind,
}

impl ComponentKey {
    /// Create a key from a `"namespace:path"` name.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::InvalidKey`] when the name is not of the form
    /// `namespace:path`, or contains characters outside `[a-z0-9_.-/]`.
    pub fn new(name: &str, host_kind: HostKind) -> Result<Self, TetherError> {
        let invalid = |reason: &str| TetherError::InvalidKey {
            name: name.to_owned(),
            reason: reason.to_owned(),
        };

        let split = name
            .find(':')
            .ok_or_else(|| invalid("missing ':' between namespace and path"))?;
        let (namespace, path) = (&name[..split], &name[split + 1..]);

        if namespace.is_empty() {
            return Err(invalid("empty namespace"));
        }
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        if path.contains(':') {
            return Err(invalid("more than one ':'"));
        }
        let allowed = |c: char| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-' | '/')
        };
        if !namespace.chars().all(allowed) || !path.chars().all(allowed) {
            return Err(invalid("only [a-z0-9_.-/] are allowed"));
        }

        Ok(Self {
            name: name.to_owned(),
            split,
            host_kind,
        })
    }

    /// Create a key from separate namespace and path parts.
    pub fn from_parts(namespace: &str, path: &str, host_kind: HostKind) -> Result<Self, TetherError> {
        Self::new(&format!("{namespace}:{path}"), host_kind)
    }

    /// The full `"namespace:path"` name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The part before the `:`.
    pub fn namespace(&self) -> &str {
        &self.name[..self.split]
    }

    /// The part after the `:`.
    pub fn path(&self) -> &str {
        &self.name[self.split + 1..]
    }

    /// The host kind this component attaches to.
    pub fn host_kind(&self) -> HostKind {
        self.host_kind
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ComponentKey {}

impl Hash for ComponentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for ComponentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::borrow::Borrow<str> for ComponentKey {
    fn borrow(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKey({} @ {})", self.name, self.host_kind)
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parts_are_split_on_colon() {
        let key = ComponentKey::new("cultivation:qi_pool", HostKind::Creature).unwrap();
        assert_eq!(key.namespace(), "cultivation");
        assert_eq!(key.path(), "qi_pool");
        assert_eq!(key.name(), "cultivation:qi_pool");
        assert_eq!(key.host_kind(), HostKind::Creature);
    }

    #[test]
    fn from_parts_matches_new() {
        let a = ComponentKey::from_parts("cultivation", "realm", HostKind::Creature).unwrap();
        let b = ComponentKey::new("cultivation:realm", HostKind::Creature).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_names_are_rejected() {
        for bad in ["qi", ":qi", "cultivation:", "a:b:c", "Cultivation:qi", "a:b c"] {
            assert!(
                ComponentKey::new(bad, HostKind::World).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn equality_ignores_host_kind() {
        let a = ComponentKey::new("mod:density", HostKind::SpatialChunk).unwrap();
        let b = ComponentKey::new("mod:density", HostKind::World).unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn ordering_is_by_name() {
        let a = ComponentKey::new("mod:a", HostKind::World).unwrap();
        let b = ComponentKey::new("mod:b", HostKind::Creature).unwrap();
        assert!(a < b);
    }
}
