//! Outbound transport seam.
//!
//! The replication manager hands each message to a [`Transport`] and moves
//! on: sends are fire-and-forget and never block the simulation thread on
//! delivery. Messages are idempotent, so late or duplicate delivery is
//! harmless.
//!
//! [`ChannelTransport`] is an in-process implementation over
//! `std::sync::mpsc`, one channel per connected replica. It is what the tests
//! and the demo use, and a template for a real network adapter.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::host::ReplicaId;
use crate::message::SyncMessage;

/// Fire-and-forget delivery of sync messages to one replica.
pub trait Transport {
    fn send(&self, replica: ReplicaId, message: &SyncMessage);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, replica: ReplicaId, message: &SyncMessage) {
        (**self).send(replica, message)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, replica: ReplicaId, message: &SyncMessage) {
        (**self).send(replica, message)
    }
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

/// In-process transport delivering encoded messages over mpsc channels.
///
/// A replica that is not connected, or whose receiver was dropped, silently
/// loses the message (logged at debug). Dropping the receiver is the
/// connection-scoped cancellation signal.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: Mutex<HashMap<ReplicaId, Sender<Vec<u8>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for `replica`, replacing any previous one.
    pub fn connect(&self, replica: ReplicaId) -> Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        self.lock().insert(replica, tx);
        rx
    }

    /// Close the channel for `replica`.
    pub fn disconnect(&self, replica: ReplicaId) {
        self.lock().remove(&replica);
    }

    pub fn is_connected(&self, replica: ReplicaId) -> bool {
        self.lock().contains_key(&replica)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ReplicaId, Sender<Vec<u8>>>> {
        // A poisoned map is still a valid map of senders.
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for ChannelTransport {
    fn send(&self, replica: ReplicaId, message: &SyncMessage) {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%replica, error = %err, "failed to encode sync message -- dropped");
                return;
            }
        };

        let mut senders = self.lock();
        let Some(sender) = senders.get(&replica) else {
            tracing::debug!(%replica, "replica not connected -- sync message dropped");
            return;
        };
        if sender.send(bytes).is_err() {
            tracing::debug!(%replica, "replica channel closed -- disconnecting");
            senders.remove(&replica);
        }
    }
}
