//! A distributed, content-addressed memo store.
//!
//! Cooperating in-memory [`Slab`]s maintain a partially replicated,
//! causally linked set of immutable facts called [`Memo`]s. Memos compose
//! into records by sharing a record id and form a parent/child DAG by
//! citing the memos they supersede, so a record's current value is
//! projected from its head memos (those with no resident child). Slabs
//! peer with each other per memo, which lets a slab know where copies of
//! anything it references live, push replicas out, and evict safely.
//!
//! This crate is the storage substrate: the LRU-ordered memo cache with
//! quota and limit driven eviction, the record and parent indexes behind
//! head-memo queries, the peering registry, and the replication check
//! that gates eviction. Transport and slab discovery are behind the
//! [`Mesh`] trait, which is injected at slab construction.

mod error;
mod ids;
mod memo;
mod mesh;
mod record;
mod slab;

pub use crate::error::Error;
pub use crate::ids::{MemoId, RecordId, SlabId};
pub use crate::memo::tests::create_memo as create_test_memo;
pub use crate::memo::Memo;
pub use crate::mesh::{MemoPeerings, Mesh, PeerState, PeeringChanges, PeeringDelta};
pub use crate::record::RecordSubscriber;
pub use crate::slab::{Slab, SlabConfig, MAX_SLABS};
