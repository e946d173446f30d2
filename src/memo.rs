//! The memo value object.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::ids::{MemoId, RecordId};

/// An immutable fact, the unit of storage.
///
/// Memos compose into records by sharing a record id and form a parent/child
/// DAG by citing the memos they supersede as parents. A slab reads the
/// identifiers, the parent list and the replication target; the body is
/// opaque to it.
///
/// Memos are shared as `Arc<Memo>` between the index, the recency list,
/// record subscribers and the mesh.
pub struct Memo {
    id: MemoId,
    record_id: RecordId,
    parents: Vec<MemoId>,
    body: Bytes,
    desired_replicas: usize,
    evicting: AtomicBool,
}

impl Memo {
    /// Create a memo with no replication target.
    pub fn new(
        id: impl Into<MemoId>,
        record_id: impl Into<RecordId>,
        parents: Vec<MemoId>,
        body: Bytes,
    ) -> Self {
        Memo {
            id: id.into(),
            record_id: record_id.into(),
            parents,
            body,
            desired_replicas: 0,
            evicting: AtomicBool::new(false),
        }
    }

    /// Set the number of slab copies this memo wants to exist.
    pub fn with_desired_replicas(mut self, desired_replicas: usize) -> Self {
        self.desired_replicas = desired_replicas;
        self
    }

    pub fn id(&self) -> &MemoId {
        &self.id
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// The memo ids this memo supersedes. Empty for a root memo.
    pub fn parents(&self) -> &[MemoId] {
        &self.parents
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The replication target K: how many slabs should hold a copy.
    pub fn desired_replicas(&self) -> usize {
        self.desired_replicas
    }

    /// Advisory mark that eviction of this memo is in progress.
    pub fn set_evicting(&self, flag: bool) {
        self.evicting.store(flag, Ordering::Relaxed);
    }

    pub fn is_evicting(&self) -> bool {
        self.evicting.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id.as_str())
            .field("record_id", &self.record_id.as_str())
            .field("parents", &self.parents)
            .field("body", &format!("[{} bytes]", self.body.len()))
            .field("desired_replicas", &self.desired_replicas)
            .finish()
    }
}

pub mod tests {
    use std::sync::Arc;

    use super::*;

    /// Create a memo for tests, with an empty body.
    pub fn create_memo(
        id: &str,
        record_id: &str,
        parents: &[&str],
        desired_replicas: usize,
    ) -> Arc<Memo> {
        let parents = parents.iter().map(|p| MemoId::from(*p)).collect();
        Arc::new(
            Memo::new(id, record_id, parents, Bytes::new())
                .with_desired_replicas(desired_replicas),
        )
    }
}
