//! Record observers.

use std::sync::Arc;

use crate::memo::Memo;

/// A materialized-view consumer subscribed to one record.
///
/// Subscribers are notified synchronously after new memos for their record
/// were indexed, and before those memos become eviction candidates. The
/// slab does not hold its state lock during the callback, so
/// implementations may call back into the slab; they must tolerate being
/// invoked re-entrantly.
pub trait RecordSubscriber: Send + Sync {
    /// New memos for the subscribed record arrived on this slab.
    fn added_memos(&self, memos: &[Arc<Memo>]);
}
