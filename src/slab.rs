//! The slab: one in-memory memo store participating in a mesh.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::ids::{base36, MemoId, RecordId, SlabId};
use crate::memo::Memo;
use crate::mesh::{MemoPeerings, Mesh, PeerState, PeeringChanges, PeeringDelta};
use crate::record::RecordSubscriber;

mod peering;
mod store;

use self::peering::PeeringRegistry;
use self::store::MemoStore;

/// Process-wide cap on live slabs: two base-36 digits of id namespace.
pub const MAX_SLABS: usize = 1296;

static SLAB_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Per-slab configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabConfig {
    /// Slab identity, unique within the mesh.
    pub id: SlabId,
    /// Soft residency target eviction drives down to.
    pub quota: usize,
    /// Hard residency cap; exceeding it triggers eviction back to `quota`.
    pub limit: usize,
}

impl SlabConfig {
    pub fn new(id: impl Into<SlabId>) -> Self {
        SlabConfig {
            id: id.into(),
            quota: 5,
            limit: 10,
        }
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Mutable slab state, serialized behind one lock.
///
/// The lock is never held across a mesh call or a subscriber callback;
/// code resuming after such a suspension re-resolves memo ids instead of
/// trusting earlier lookups.
struct State {
    store: MemoStore,
    peerings: PeeringRegistry,
    subscribers: AHashMap<RecordId, Vec<Arc<dyn RecordSubscriber>>>,
}

struct Inner {
    id: SlabId,
    quota: usize,
    limit: usize,
    mesh: Arc<dyn Mesh>,
    state: RwLock<State>,
    child_counter: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        SLAB_COUNT.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One in-memory memo store. Cheap to clone; clones share the same slab.
///
/// Memos enter through [`put_memo`](Slab::put_memo), get indexed by record
/// and parent, and live in an LRU list until eviction or
/// [`kill_memo`](Slab::kill_memo) removes them. The slab tracks which
/// remote slabs participate in each memo it references and refuses to
/// evict a memo until enough remote copies exist.
#[derive(Clone)]
pub struct Slab {
    inner: Arc<Inner>,
}

impl Slab {
    /// Create a slab and register it with the mesh.
    ///
    /// Fails when the id is empty or longer than two characters, or when
    /// the process already hosts [`MAX_SLABS`] slabs.
    pub fn new(config: SlabConfig, mesh: Arc<dyn Mesh>) -> Result<Self, Error> {
        let SlabConfig { id, quota, limit } = config;
        if id.as_str().is_empty() {
            return Err(Error::EmptySlabId);
        }
        if id.as_str().len() > 2 {
            return Err(Error::SlabIdTooLong(id));
        }

        let mut count = SLAB_COUNT.load(Ordering::SeqCst);
        loop {
            if count >= MAX_SLABS {
                return Err(Error::SlabCapExceeded(MAX_SLABS));
            }
            match SLAB_COUNT.compare_exchange(count, count + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => count = actual,
            }
        }

        let slab = Slab {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    store: MemoStore::default(),
                    peerings: PeeringRegistry::new(id.clone()),
                    subscribers: Default::default(),
                }),
                id,
                quota,
                limit,
                mesh: mesh.clone(),
                child_counter: AtomicU64::new(0),
            }),
        };
        mesh.register_slab(&slab);
        Ok(slab)
    }

    pub fn id(&self) -> &SlabId {
        &self.inner.id
    }

    pub fn quota(&self) -> usize {
        self.inner.quota
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of resident memos.
    pub fn size(&self) -> usize {
        self.inner.state.read().store.len()
    }

    /// Generate a slab-scoped id: the slab id followed by a monotonic
    /// base-36 counter.
    pub fn gen_child_id(&self) -> String {
        let n = self.inner.child_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.inner.id, base36::encode(n))
    }

    /// Store a memo.
    ///
    /// Never fails on content; a memo whose id is already resident is
    /// silently ignored, since replication delivery may duplicate. A new
    /// memo is indexed, subscribers of its record are notified, it is
    /// self-peered, and its replication target is checked. When residency
    /// exceeds the limit, eviction runs down to the quota first.
    pub async fn put_memo(&self, memo: Arc<Memo>) {
        let (subscribers, over_limit) = {
            let mut state = self.inner.state.write();
            if !state.store.insert(memo.clone()) {
                trace!("slab {}: duplicate memo {}, ignoring", self.inner.id, memo.id());
                return;
            }
            let subscribers = state
                .subscribers
                .get(memo.record_id())
                .cloned()
                .unwrap_or_default();
            (subscribers, state.store.len() > self.inner.limit)
        };

        if !subscribers.is_empty() {
            let batch = [memo.clone()];
            for subscriber in &subscribers {
                subscriber.added_memos(&batch);
            }
        }

        if over_limit {
            self.evict_memos().await;
        }

        self.register_memo_peering(
            &memo,
            memo.id().clone(),
            self.inner.id.clone(),
            PeerState::Resident,
            false,
        )
        .await;

        if let Err(err) = self.check_memo_replication_factor(&memo).await {
            warn!(
                "slab {}: replication check for {} failed: {:#}",
                self.inner.id,
                memo.id(),
                err
            );
        }
    }

    /// Look up a memo and promote it to the most recently used position.
    pub fn get_memo(&self, id: &MemoId) -> Option<Arc<Memo>> {
        self.inner.state.write().store.get_promote(id)
    }

    pub fn contains_memo(&self, id: &MemoId) -> bool {
        self.inner.state.read().store.contains(id)
    }

    pub fn has_memos_for_record(&self, record_id: &RecordId) -> bool {
        self.inner.state.read().store.has_memos_for_record(record_id)
    }

    /// Resident memos of a record, in insertion order. Does not promote.
    pub fn get_memos_for_record(&self, record_id: &RecordId) -> Vec<Arc<Memo>> {
        self.inner.state.read().store.memos_for_record(record_id)
    }

    /// Resident memos of a record that no resident memo cites as parent.
    pub fn get_head_memos_for_record(&self, record_id: &RecordId) -> Vec<Arc<Memo>> {
        self.inner.state.read().store.head_memos_for_record(record_id)
    }

    pub fn get_head_memo_ids_for_record(&self, record_id: &RecordId) -> Vec<MemoId> {
        self.get_head_memos_for_record(record_id)
            .iter()
            .map(|m| m.id().clone())
            .collect()
    }

    /// Resident memos citing `parent_id` as a parent. Empty for a head.
    pub fn get_child_memo_ids(&self, parent_id: &MemoId) -> Vec<MemoId> {
        self.inner.state.read().store.child_ids_of(parent_id).to_vec()
    }

    /// Resident memo ids from least to most recently used.
    pub fn lru_memo_ids(&self) -> Vec<MemoId> {
        self.inner.state.read().store.lru_ids()
    }

    /// Subscribe an observer to a record. Adding the same observer twice
    /// is a no-op.
    pub fn subscribe_record(&self, record_id: RecordId, subscriber: Arc<dyn RecordSubscriber>) {
        let mut state = self.inner.state.write();
        let subscribers = state.subscribers.entry(record_id).or_default();
        if !subscribers.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
            subscribers.push(subscriber);
        }
    }

    /// Remove an observer from a record.
    pub fn unsubscribe_record(&self, record_id: &RecordId, subscriber: &Arc<dyn RecordSubscriber>) {
        let mut state = self.inner.state.write();
        if let Some(subscribers) = state.subscribers.get_mut(record_id) {
            subscribers.retain(|s| !Arc::ptr_eq(s, subscriber));
            if subscribers.is_empty() {
                state.subscribers.remove(record_id);
            }
        }
    }

    /// Record one peering of `memo` with a referenced memo on a remote
    /// slab.
    pub async fn register_memo_peering(
        &self,
        memo: &Memo,
        ref_memo_id: MemoId,
        remote_slab_id: SlabId,
        state: PeerState,
        silent: bool,
    ) {
        let peerings: MemoPeerings = [(ref_memo_id, [(remote_slab_id, state)].into_iter().collect())]
            .into_iter()
            .collect();
        self.update_memo_peerings(memo, &peerings, silent).await;
    }

    /// Record peerings of `memo` with the memos it references, and tell
    /// each newly recorded remote unless `silent`.
    pub async fn update_memo_peerings(&self, memo: &Memo, peerings: &MemoPeerings, silent: bool) {
        let changes = self.inner.state.write().peerings.update(memo.id(), peerings);
        if !silent {
            self.send_peering_changes(changes).await;
        }
    }

    /// Apply a peering delta another slab sent us. Changes for memos this
    /// slab does not track are ignored.
    pub fn receive_peering_change(&self, sender_slab_id: SlabId, change: PeeringDelta) {
        self.inner
            .state
            .write()
            .peerings
            .receive(&sender_slab_id, &change);
    }

    /// Snapshot of the peerings of a local memo. With `include_self`, this
    /// slab appears as a copy holder under each referenced memo.
    pub fn get_peerings_for_memo(&self, memo: &Memo, include_self: bool) -> MemoPeerings {
        self.inner
            .state
            .read()
            .peerings
            .peerings_for_memo(memo.id(), include_self)
    }

    /// Remote slabs participating in a memo, restricted to copy holders
    /// with `must_have_copy`. `None` when the memo id is unknown here.
    pub fn get_memo_peers(&self, memo_id: &MemoId, must_have_copy: bool) -> Option<Vec<SlabId>> {
        self.inner
            .state
            .read()
            .peerings
            .memo_peers(memo_id, must_have_copy)
    }

    /// Ensure a memo has enough remote copies, pushing it to accepting
    /// slabs if not.
    ///
    /// Success is optimistic: the memo was handed to the mesh for up to
    /// `desired_replicas` targets, acks are not awaited.
    pub async fn check_memo_replication_factor(&self, memo: &Arc<Memo>) -> Result<()> {
        let desired = memo.desired_replicas();
        if desired == 0 {
            return Ok(());
        }

        let peers = self
            .get_memo_peers(memo.id(), true)
            .unwrap_or_default();
        let mut exclude: AHashSet<SlabId> = peers.into_iter().collect();
        exclude.insert(self.inner.id.clone());

        let targets = self
            .inner
            .mesh
            .get_accepting_slab_ids(&exclude, desired)
            .await?;
        for target in targets {
            trace!(
                "slab {}: pushing {} to slab {}",
                self.inner.id,
                memo.id(),
                target
            );
            self.inner
                .mesh
                .push_memo_to_slab(self.inner.id.clone(), target, memo.clone())
                .await?;
        }
        Ok(())
    }

    /// Evict memos from the least recently used end until residency is
    /// back at the quota.
    ///
    /// The walk captures each victim's newer neighbour before the kill,
    /// since victims unlink themselves; a victim whose replication check
    /// fails stays resident and is skipped until the next cycle.
    pub async fn evict_memos(&self) {
        let mut cursor = self.inner.state.read().store.head_id().cloned();
        while let Some(id) = cursor {
            if self.inner.state.read().store.len() <= self.inner.quota {
                break;
            }
            let (memo, next) = {
                let state = self.inner.state.read();
                (state.store.get(&id).cloned(), state.store.newer_than(&id))
            };
            if let Some(memo) = memo {
                self.evict_memo(&memo).await;
            }
            cursor = next;
        }
    }

    /// Evict one memo: verify its replication factor, then kill it. On
    /// failure the memo stays resident for a later retry.
    pub async fn evict_memo(&self, memo: &Arc<Memo>) {
        memo.set_evicting(true);
        match self.check_memo_replication_factor(memo).await {
            Ok(()) => self.kill_memo(memo.id()).await,
            Err(err) => {
                warn!(
                    "slab {}: not evicting {}, replication check failed: {:#}",
                    self.inner.id,
                    memo.id(),
                    err
                );
            }
        }
    }

    /// Remove a memo from this slab without checking replication.
    ///
    /// Refuses to remove a head memo of a record that has subscribers;
    /// observers project record state from the heads. Killing an unknown
    /// id is reported and otherwise a no-op.
    pub async fn kill_memo(&self, id: &MemoId) {
        let changes = {
            let mut state = self.inner.state.write();
            let Some(memo) = state.store.get(id).cloned() else {
                warn!("slab {}: kill of unknown memo {}", self.inner.id, id);
                return;
            };

            let watched = state
                .subscribers
                .get(memo.record_id())
                .is_some_and(|subs| !subs.is_empty());
            if watched && !state.store.has_children(id) {
                debug!(
                    "slab {}: refusing to kill {}, head of subscribed record {}",
                    self.inner.id,
                    id,
                    memo.record_id()
                );
                return;
            }

            state.store.remove(id);
            state.peerings.deregister(id)
        };
        self.send_peering_changes(changes).await;
    }

    async fn send_peering_changes(&self, changes: PeeringChanges) {
        if changes.is_empty() {
            return;
        }
        if let Err(err) = self
            .inner
            .mesh
            .send_peering_changes(self.inner.id.clone(), changes)
            .await
        {
            warn!(
                "slab {}: failed to send peering changes: {:#}",
                self.inner.id, err
            );
        }
    }
}

impl fmt::Debug for Slab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("id", &self.inner.id)
            .field("size", &self.size())
            .field("quota", &self.inner.quota)
            .field("limit", &self.inner.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A mesh that accepts registrations and nothing else.
    #[derive(Debug, Default)]
    struct NullMesh;

    #[async_trait::async_trait]
    impl Mesh for NullMesh {
        fn register_slab(&self, _slab: &Slab) {}

        async fn send_peering_changes(
            &self,
            _from: SlabId,
            _changes: PeeringChanges,
        ) -> Result<()> {
            Ok(())
        }

        async fn get_accepting_slab_ids(
            &self,
            _exclude: &AHashSet<SlabId>,
            _desired: usize,
        ) -> Result<Vec<SlabId>> {
            Ok(vec![])
        }

        async fn push_memo_to_slab(
            &self,
            _from: SlabId,
            _to: SlabId,
            _memo: Arc<Memo>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn config_validation() {
        let mesh = Arc::new(NullMesh);
        assert!(matches!(
            Slab::new(SlabConfig::new(""), mesh.clone()),
            Err(Error::EmptySlabId)
        ));
        assert!(matches!(
            Slab::new(SlabConfig::new("abc"), mesh.clone()),
            Err(Error::SlabIdTooLong(_))
        ));
        let slab = Slab::new(SlabConfig::new("zz"), mesh).unwrap();
        assert_eq!(slab.quota(), 5);
        assert_eq!(slab.limit(), 10);
        assert_eq!(slab.size(), 0);
    }

    #[test]
    fn gen_child_id_is_monotonic_base36() {
        let slab = Slab::new(SlabConfig::new("q"), Arc::new(NullMesh)).unwrap();
        assert_eq!(slab.gen_child_id(), "q0");
        assert_eq!(slab.gen_child_id(), "q1");
        for _ in 2..36 {
            slab.gen_child_id();
        }
        assert_eq!(slab.gen_child_id(), "q10");
    }

    #[test]
    fn dropping_a_slab_releases_its_slot() {
        // Creating far more slabs than the cap only works if every drop
        // gives its slot back.
        let mesh = Arc::new(NullMesh);
        for _ in 0..(MAX_SLABS + 8) {
            let slab = Slab::new(SlabConfig::new("y"), mesh.clone()).unwrap();
            drop(slab);
        }
    }
}
