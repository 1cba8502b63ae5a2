//! Save/load of aggregates inside a host's persistent record.
//!
//! The host's save format is a JSON object owned by the engine. The aggregate
//! is stored under one reserved field, [`COMPONENTS_FIELD`], as its full
//! snapshot document. Persistence never touches dirty flags on save, and a
//! loaded aggregate starts fully dirty so the first dirty check after load
//! brings observers up to date.

use serde::Deserialize;
use serde_json::Value;
use tether_core::aggregate::{Aggregate, LoadReport};
use tether_core::document::Document;
use tether_core::registry::Registries;

use crate::host::HostAdapter;
use crate::SyncError;

/// Reserved field in the host record holding the component document.
pub const COMPONENTS_FIELD: &str = "tether:components";

/// A host's persistent record.
pub type SaveRecord = serde_json::Map<String, Value>;

/// Write `host`'s full snapshot into `record`, replacing any previous one.
///
/// # Errors
///
/// [`SyncError::NotAttached`] if the host has no aggregate,
/// [`SyncError::Encode`] if the document cannot be represented as JSON.
pub fn save_into(host: &dyn HostAdapter, record: &mut SaveRecord) -> Result<(), SyncError> {
    let aggregate = host.aggregate().ok_or(SyncError::NotAttached {
        address: host.address(),
    })?;
    let document = aggregate.save_full();
    let value = serde_json::to_value(&document).map_err(|e| SyncError::Encode {
        details: e.to_string(),
    })?;
    record.insert(COMPONENTS_FIELD.to_owned(), value);
    Ok(())
}

/// Restore `host`'s aggregate from `record`.
///
/// Entries are rebuilt through the registry for the host's kind; unknown or
/// corrupt entries are skipped and reported. Registrations that apply to the
/// host but are absent from the record (added after the save was written)
/// are attached fresh. The host's previous aggregate is replaced.
///
/// Returns `None`, leaving the host untouched, when the record has no
/// component field or the field is malformed.
pub fn load_from(
    registries: &Registries,
    host: &mut dyn HostAdapter,
    record: &SaveRecord,
) -> Option<LoadReport> {
    let value = record.get(COMPONENTS_FIELD)?;
    let document: Document = match Document::deserialize(value) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(
                host = %host.address(),
                error = %err,
                "malformed component field in save record -- ignored"
            );
            return None;
        }
    };

    let registry = registries.for_kind(host.kind());
    let mut aggregate = Aggregate::new(host.kind());
    let report = aggregate.load_full(registry, host.as_host(), &document);
    let backfilled = aggregate.attach_missing(registry, host.as_host());
    aggregate.mark_all_dirty();
    tracing::debug!(
        host = %host.address(),
        loaded = report.applied.len(),
        skipped = report.skipped.len(),
        backfilled,
        "aggregate restored from save"
    );
    host.replace_aggregate(aggregate);
    Some(report)
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use serde_json::json;
    use tether_core::prelude::*;

    use super::*;
    use crate::host::ReplicaId;

    struct Chunk {
        aggregate: Option<Aggregate>,
    }

    impl Host for Chunk {
        fn kind(&self) -> HostKind {
            HostKind::SpatialChunk
        }
        fn address(&self) -> HostAddress {
            HostAddress::Chunk { x: 0, z: 0 }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl HostAdapter for Chunk {
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
            Vec::new()
        }
    }

    fn registries(names: &[&str]) -> Registries {
        let mut builder = Registries::builder();
        for name in names {
            builder
                .register(
                    ComponentKey::new(name, HostKind::SpatialChunk).unwrap(),
                    always,
                    stored_default::<i64>(),
                )
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn save_then_load_restores_values() {
        let registries = registries(&["test:density"]);
        let mut chunk = Chunk { aggregate: None };
        chunk.aggregate = Some(registries.attach(&chunk));
        chunk
            .aggregate
            .as_mut()
            .unwrap()
            .get_mut::<Stored<i64>>("test:density")
            .unwrap()
            .replace(-12);

        let mut record = SaveRecord::new();
        record.insert("biome".to_owned(), json!("marsh"));
        save_into(&chunk, &mut record).unwrap();
        assert_eq!(record["biome"], json!("marsh"));

        let mut restored = Chunk { aggregate: None };
        let report = load_from(&registries, &mut restored, &record).unwrap();
        assert!(report.is_clean());
        let aggregate = restored.aggregate.as_ref().unwrap();
        assert_eq!(*aggregate.get::<Stored<i64>>("test:density").unwrap().get(), -12);
        assert!(aggregate.is_dirty());
    }

    #[test]
    fn load_backfills_new_registrations() {
        let old = registries(&["test:density"]);
        let mut chunk = Chunk { aggregate: None };
        chunk.aggregate = Some(old.attach(&chunk));
        let mut record = SaveRecord::new();
        save_into(&chunk, &mut record).unwrap();

        let new = registries(&["test:density", "test:miasma"]);
        let mut restored = Chunk { aggregate: None };
        load_from(&new, &mut restored, &record).unwrap();
        let aggregate = restored.aggregate.as_ref().unwrap();
        assert!(aggregate.contains("test:miasma"));
        assert_eq!(aggregate.len(), 2);
    }

    #[test]
    fn missing_or_malformed_field_is_ignored() {
        let registries = registries(&["test:density"]);
        let mut chunk = Chunk { aggregate: None };

        assert!(load_from(&registries, &mut chunk, &SaveRecord::new()).is_none());

        let mut record = SaveRecord::new();
        record.insert(COMPONENTS_FIELD.to_owned(), json!("not a document"));
        assert!(load_from(&registries, &mut chunk, &record).is_none());
        assert!(chunk.aggregate.is_none());
    }

    #[test]
    fn save_requires_attachment() {
        let chunk = Chunk { aggregate: None };
        let mut record = SaveRecord::new();
        assert!(matches!(
            save_into(&chunk, &mut record),
            Err(SyncError::NotAttached { .. })
        ));
    }
}
