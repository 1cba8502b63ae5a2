//! Replica-side application of received sync messages.
//!
//! A full message rebuilds the host's aggregate from scratch through the
//! local registry; an update merges into the existing instances. Either way
//! the replica's dirty flags end up cleared: replicas never send state back.

use tether_core::aggregate::{Aggregate, LoadReport};
use tether_core::registry::Registries;

use crate::host::{HostAdapter, HostResolver};
use crate::message::SyncMessage;
use crate::SyncError;

/// Decode `bytes` and apply the message to the host it addresses.
///
/// # Errors
///
/// - [`SyncError::Decode`] on malformed bytes. The message is dropped and
///   local state stays as it was until the next full sync.
/// - [`SyncError::UnknownHost`] when the address does not resolve locally.
/// - [`SyncError::AddressMismatch`] when the resolved host is of another
///   kind than the message shape.
pub fn apply_inbound(
    registries: &Registries,
    resolver: &mut dyn HostResolver,
    bytes: &[u8],
) -> Result<LoadReport, SyncError> {
    let message = SyncMessage::decode(bytes).inspect_err(|err| {
        tracing::warn!(error = %err, bytes = bytes.len(), "dropping undecodable sync message");
    })?;
    apply_message(registries, resolver, &message)
}

/// Apply an already decoded message. See [`apply_inbound`].
pub fn apply_message(
    registries: &Registries,
    resolver: &mut dyn HostResolver,
    message: &SyncMessage,
) -> Result<LoadReport, SyncError> {
    let address = message.address();
    let host = resolver
        .resolve(&address)
        .ok_or(SyncError::UnknownHost { address })?;
    if host.kind() != address.kind() {
        return Err(SyncError::AddressMismatch {
            address,
            host_kind: host.kind(),
        });
    }

    let report = if message.is_update() {
        apply_update(registries, host, message)
    } else {
        apply_full(registries, host, message)
    };
    tracing::trace!(
        host = %address,
        update = message.is_update(),
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "sync message applied"
    );
    Ok(report)
}

fn apply_full(registries: &Registries, host: &mut dyn HostAdapter, message: &SyncMessage) -> LoadReport {
    let registry = registries.for_kind(host.kind());
    let mut aggregate = Aggregate::new(host.kind());
    let report = aggregate.load_full(registry, host.as_host(), message.document());
    aggregate.clear_all_dirty();
    host.replace_aggregate(aggregate);
    report
}

fn apply_update(registries: &Registries, host: &mut dyn HostAdapter, message: &SyncMessage) -> LoadReport {
    if host.aggregate().is_none() {
        // An update overtook the host's creation on this side.
        let aggregate = registries.attach(host.as_host());
        host.replace_aggregate(aggregate);
    }
    let Some(aggregate) = host.aggregate_mut() else {
        return LoadReport::default();
    };
    let report = aggregate.apply_partial(message.document());
    aggregate.clear_all_dirty();
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
