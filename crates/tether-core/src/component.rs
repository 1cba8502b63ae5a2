//! The component contract and dirty tracking.
//!
//! Every piece of attached state implements [`Component`]: a full
//! save/load pair, an optional cheaper "outdated" (delta) pair, and a
//! [`DirtyFlag`]. Feature code that just wants to attach a serde type can use
//! [`Stored<T>`] instead of writing the trait by hand.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::host::Host;

// ---------------------------------------------------------------------------
// PayloadError
// ---------------------------------------------------------------------------

/// A component failed to produce or understand its own payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid for this component: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// DirtyFlag
// ---------------------------------------------------------------------------

/// Per-component "changed since last captured snapshot" marker.
///
/// Internally a pair of counters: every [`mark`](Self::mark) bumps `marked`,
/// and clearing records how far marks have been consumed. A capture reads
/// [`epoch`](Self::epoch) *before* serializing and later calls
/// [`clear_through`](Self::clear_through) with that value, so a mark that lands
/// while the capture is in flight keeps the flag set.
///
/// New flags start dirty.
#[derive(Debug)]
pub struct DirtyFlag {
    marked: AtomicU64,
    cleared_through: AtomicU64,
}

impl DirtyFlag {
    /// A flag that starts dirty.
    pub fn new() -> Self {
        Self {
            marked: AtomicU64::new(1),
            cleared_through: AtomicU64::new(0),
        }
    }

    /// A flag that starts clean.
    pub fn clean() -> Self {
        Self {
            marked: AtomicU64::new(0),
            cleared_through: AtomicU64::new(0),
        }
    }

    pub fn mark(&self) {
        self.marked.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_dirty(&self) -> bool {
        self.marked.load(Ordering::Acquire) > self.cleared_through.load(Ordering::Acquire)
    }

    /// Current mark counter. Pass it to [`clear_through`](Self::clear_through)
    /// once the state observed at this point has been captured.
    pub fn epoch(&self) -> u64 {
        self.marked.load(Ordering::Acquire)
    }

    /// Clear every mark up to and including `epoch`.
    pub fn clear_through(&self, epoch: u64) {
        self.cleared_through.fetch_max(epoch, Ordering::AcqRel);
    }

    /// Clear all marks made so far.
    pub fn clear(&self) {
        self.clear_through(self.epoch());
    }
}

impl Default for DirtyFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// `Any` access for trait objects, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Contract implemented by every attachable piece of state.
///
/// `load_full` must accept any document produced by `save_full` of an earlier
/// compatible version and ignore fields it does not know. If a load fails, the
/// component decides whether it keeps its prior state or resets; the
/// aggregate only skips the entry.
pub trait Component: AsAny + Send {
    /// Everything needed to rebuild equivalent state from nothing.
    fn save_full(&self) -> Result<serde_json::Value, PayloadError>;

    /// Replace this component's state from a full payload.
    fn load_full(&mut self, data: &serde_json::Value) -> Result<(), PayloadError>;

    /// Payload sent in partial snapshots. Override to emit a cheaper delta;
    /// applying it through [`load_update`](Self::load_update) must converge the
    /// receiver for every field that changed.
    fn save_outdated(&self) -> Result<serde_json::Value, PayloadError> {
        self.save_full()
    }

    /// Apply a payload produced by [`save_outdated`](Self::save_outdated).
    fn load_update(&mut self, data: &serde_json::Value) -> Result<(), PayloadError> {
        self.load_full(data)
    }

    fn dirty_flag(&self) -> &DirtyFlag;

    fn mark_dirty(&self) {
        self.dirty_flag().mark();
    }

    fn clear_dirty(&self) {
        self.dirty_flag().clear();
    }

    fn is_dirty(&self) -> bool {
        self.dirty_flag().is_dirty()
    }
}

/// Boxed factory result.
pub type BoxedComponent = Box<dyn Component>;

// ---------------------------------------------------------------------------
// Stored<T>
// ---------------------------------------------------------------------------

/// A component wrapping any serde type.
///
/// Full and partial payloads are the serde representation of `T`. Mutation
/// goes through [`modify`](Self::modify) or [`replace`](Self::replace), both of
/// which mark the component dirty. On a failed load the previous value is
/// kept.
#[derive(Debug, Default)]
pub struct Stored<T> {
    value: T,
    dirty: DirtyFlag,
}

impl<T> Stored<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            dirty: DirtyFlag::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutate the value in place and mark the component dirty.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = f(&mut self.value);
        self.dirty.mark();
        out
    }

    /// Swap in a new value, returning the old one. Marks dirty.
    pub fn replace(&mut self, value: T) -> T {
        self.dirty.mark();
        std::mem::replace(&mut self.value, value)
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Component for Stored<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn save_full(&self) -> Result<serde_json::Value, PayloadError> {
        Ok(serde_json::to_value(&self.value)?)
    }

    fn load_full(&mut self, data: &serde_json::Value) -> Result<(), PayloadError> {
        self.value = T::deserialize(data)?;
        Ok(())
    }

    fn dirty_flag(&self) -> &DirtyFlag {
        &self.dirty
    }
}

/// Factory closure that builds a [`Stored<T>`] holding `T::default()`.
pub fn stored_default<T>() -> impl Fn(&dyn Host) -> Result<BoxedComponent, PayloadError> + Send + Sync
where
    T: Serialize + DeserializeOwned + Default + Send + 'static,
{
    |_host: &dyn Host| Ok(Box::new(Stored::new(T::default())) as BoxedComponent)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
