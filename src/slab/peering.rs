use ahash::AHashMap;
use tracing::trace;

use crate::ids::{MemoId, SlabId};
use crate::mesh::{MemoPeerings, PeerState, PeeringChanges, PeeringDelta};

/// Interest in a single referenced memo.
#[derive(Debug, Default)]
struct RefPeering {
    /// Local memos that reference this memo.
    memos: Vec<MemoId>,
    /// Participation state per remote slab.
    remotes: AHashMap<SlabId, PeerState>,
}

/// Tracks, per referenced memo, which local memos reference it and which
/// remote slabs participate at what state.
///
/// The registry performs no IO. Mutations return the [`PeeringChanges`]
/// they produced and the slab forwards them to the mesh; inbound updates
/// arrive through [`receive`](PeeringRegistry::receive). This keeps the
/// registry a plain state machine that tests can drive directly.
#[derive(Debug)]
pub(crate) struct PeeringRegistry {
    slab_id: SlabId,
    /// Referenced memo ids per local memo, in registration order.
    local: AHashMap<MemoId, Vec<MemoId>>,
    refs: AHashMap<MemoId, RefPeering>,
}

impl PeeringRegistry {
    pub fn new(slab_id: SlabId) -> Self {
        PeeringRegistry {
            slab_id,
            local: Default::default(),
            refs: Default::default(),
        }
    }

    /// Record peerings of one local memo with the memos it references.
    ///
    /// A remote already recorded under a referenced memo is left as is;
    /// state transitions of known remotes arrive from the remote itself
    /// through [`receive`](PeeringRegistry::receive). Our own slab id is
    /// never recorded as a remote and never emitted.
    pub fn update(&mut self, memo_id: &MemoId, peerings: &MemoPeerings) -> PeeringChanges {
        let locals = self.local.entry(memo_id.clone()).or_default();
        let mut changes = PeeringChanges::default();

        for (ref_id, remotes) in peerings {
            if !locals.contains(ref_id) {
                locals.push(ref_id.clone());
            }
            let peering = self.refs.entry(ref_id.clone()).or_default();
            if !peering.memos.contains(memo_id) {
                peering.memos.push(memo_id.clone());
            }

            for (remote_id, state) in remotes {
                if *remote_id == self.slab_id || peering.remotes.contains_key(remote_id) {
                    continue;
                }
                peering.remotes.insert(remote_id.clone(), *state);
                changes
                    .entry(remote_id.clone())
                    .or_default()
                    .insert(memo_id.clone(), *state);
            }
        }

        changes
    }

    /// Apply a peering delta received from another slab.
    ///
    /// Changes for memos we do not track are dropped; at-least-once
    /// delivery makes those harmless.
    pub fn receive(&mut self, sender: &SlabId, delta: &PeeringDelta) {
        for (memo_id, state) in delta {
            match self.refs.get_mut(memo_id) {
                Some(peering) => {
                    if state.is_participating() {
                        peering.remotes.insert(sender.clone(), *state);
                    } else {
                        peering.remotes.remove(sender);
                    }
                }
                None => {
                    trace!("ignoring peering change from {sender} for unknown memo {memo_id}");
                }
            }
        }
    }

    /// Drop every peering of a departing local memo.
    ///
    /// When the departing memo was the last local referent of a referenced
    /// memo, each remaining remote is told we no longer participate. The
    /// emitted change is keyed by the departing memo's id, which receivers
    /// resolve against their own ref index.
    pub fn deregister(&mut self, memo_id: &MemoId) -> PeeringChanges {
        let mut changes = PeeringChanges::default();
        let Some(ref_ids) = self.local.remove(memo_id) else {
            return changes;
        };

        for ref_id in ref_ids {
            let Some(peering) = self.refs.get_mut(&ref_id) else {
                continue;
            };
            peering.memos.retain(|m| m != memo_id);
            if peering.memos.is_empty() {
                if let Some(peering) = self.refs.remove(&ref_id) {
                    for remote_id in peering.remotes.keys() {
                        changes
                            .entry(remote_id.clone())
                            .or_default()
                            .insert(memo_id.clone(), PeerState::NonParticipating);
                    }
                }
            }
        }

        changes
    }

    /// Snapshot of the peerings of one local memo.
    pub fn peerings_for_memo(&self, memo_id: &MemoId, include_self: bool) -> MemoPeerings {
        let mut result = MemoPeerings::default();
        let Some(ref_ids) = self.local.get(memo_id) else {
            return result;
        };
        for ref_id in ref_ids {
            let mut remotes = self
                .refs
                .get(ref_id)
                .map(|p| p.remotes.clone())
                .unwrap_or_default();
            if include_self {
                remotes.insert(self.slab_id.clone(), PeerState::Resident);
            }
            result.insert(ref_id.clone(), remotes);
        }
        result
    }

    /// Remote slabs participating in a memo, or `None` when the memo id is
    /// not tracked at all.
    pub fn memo_peers(&self, memo_id: &MemoId, must_have_copy: bool) -> Option<Vec<SlabId>> {
        let peering = self.refs.get(memo_id)?;
        Some(
            peering
                .remotes
                .iter()
                .filter(|(_, state)| {
                    if must_have_copy {
                        state.has_copy()
                    } else {
                        state.is_participating()
                    }
                })
                .map(|(id, _)| id.clone())
                .collect(),
        )
    }
}
