//! The mesh collaborator: inter-slab directory and transport.
//!
//! The slab core is pure with respect to IO. Everything that leaves the
//! process goes through the [`Mesh`] trait, which is injected at slab
//! construction; an implementation is free to deliver in-process, over a
//! wire, or not at all. Delivery between slabs is unordered and
//! at-least-once; receivers ignore changes for memos they do not track, so
//! duplicated or reordered batches converge.

use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{MemoId, SlabId};
use crate::memo::Memo;
use crate::slab::Slab;

/// Participation of a slab in a memo peering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    /// The slab no longer participates; receivers drop it.
    NonParticipating,
    /// The slab participates without holding a copy.
    Participating,
    /// The slab participates and holds a copy.
    Resident,
}

impl PeerState {
    pub fn has_copy(&self) -> bool {
        matches!(self, PeerState::Resident)
    }

    pub fn is_participating(&self) -> bool {
        !matches!(self, PeerState::NonParticipating)
    }
}

/// Peering updates destined for one slab: memo id to new peer state.
pub type PeeringDelta = AHashMap<MemoId, PeerState>;

/// A batch of peering updates keyed by destination slab.
///
/// One local slab operation emits at most one batch.
pub type PeeringChanges = AHashMap<SlabId, PeeringDelta>;

/// Peerings of one local memo: referenced memo id to the participation
/// state of each remote slab.
pub type MemoPeerings = AHashMap<MemoId, AHashMap<SlabId, PeerState>>;

/// Capabilities the slab consumes from the mesh.
#[async_trait]
pub trait Mesh: Send + Sync + fmt::Debug {
    /// Called once while the slab is constructed.
    fn register_slab(&self, slab: &Slab);

    /// Deliver a batch of peering changes from `from` to each destination
    /// slab. On the receiving side this surfaces through
    /// [`Slab::receive_peering_change`].
    async fn send_peering_changes(&self, from: SlabId, changes: PeeringChanges) -> Result<()>;

    /// Up to `desired` slab ids willing to accept a replica, never any of
    /// `exclude`. Best effort: may return fewer than `desired`, or none.
    async fn get_accepting_slab_ids(
        &self,
        exclude: &AHashSet<SlabId>,
        desired: usize,
    ) -> Result<Vec<SlabId>>;

    /// Deliver a copy of `memo` to the slab `to`. On the receiving side
    /// this surfaces through [`Slab::put_memo`].
    async fn push_memo_to_slab(&self, from: SlabId, to: SlabId, memo: Arc<Memo>) -> Result<()>;
}
