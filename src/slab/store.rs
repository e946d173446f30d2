use std::sync::Arc;

use ahash::AHashMap;

use crate::ids::{MemoId, RecordId};
use crate::memo::Memo;

/// A resident memo with its links into the recency list.
#[derive(Debug)]
struct Entry {
    memo: Arc<Memo>,
    /// Towards the head (least recently used).
    older: Option<MemoId>,
    /// Towards the tail (most recently used).
    newer: Option<MemoId>,
}

/// The resident memos of one slab: the id index, the record and parent
/// reverse indexes, and the LRU recency list threaded through the entries.
///
/// The entries own the memos; the list stores neighbour ids instead of
/// pointers, which keeps unlink and promotion constant time without any
/// cyclic ownership. A memo is in the index iff it is linked into the
/// list, and the resident count is the length of both.
#[derive(Debug, Default)]
pub(crate) struct MemoStore {
    entries: AHashMap<MemoId, Entry>,
    /// Resident memo ids per record, in insertion order.
    by_record: AHashMap<RecordId, Vec<MemoId>>,
    /// Resident child ids per parent. An entry is removed when its last
    /// child goes away, so a memo is a head iff it has no entry here.
    by_parent: AHashMap<MemoId, Vec<MemoId>>,
    /// Least recently used resident memo.
    head: Option<MemoId>,
    /// Most recently used resident memo.
    tail: Option<MemoId>,
}

impl MemoStore {
    /// Insert a memo at the most recently used position.
    ///
    /// Idempotent: returns `false` and changes nothing, not even the
    /// recency order, when the id is already resident.
    pub fn insert(&mut self, memo: Arc<Memo>) -> bool {
        let id = memo.id().clone();
        if self.entries.contains_key(&id) {
            return false;
        }

        self.by_record
            .entry(memo.record_id().clone())
            .or_default()
            .push(id.clone());
        for parent in memo.parents() {
            let children = self.by_parent.entry(parent.clone()).or_default();
            if !children.contains(&id) {
                children.push(id.clone());
            }
        }

        self.entries.insert(
            id.clone(),
            Entry {
                memo,
                older: None,
                newer: None,
            },
        );
        self.push_tail(&id);
        true
    }

    /// Remove a memo, updating all indexes and the recency list.
    pub fn remove(&mut self, id: &MemoId) -> Option<Arc<Memo>> {
        if !self.entries.contains_key(id) {
            return None;
        }
        self.unlink(id);
        let entry = self.entries.remove(id)?;
        let memo = entry.memo;

        if let Some(ids) = self.by_record.get_mut(memo.record_id()) {
            ids.retain(|m| m != id);
            if ids.is_empty() {
                self.by_record.remove(memo.record_id());
            }
        }
        for parent in memo.parents() {
            if let Some(children) = self.by_parent.get_mut(parent) {
                children.retain(|c| c != id);
                if children.is_empty() {
                    self.by_parent.remove(parent);
                }
            }
        }

        Some(memo)
    }

    pub fn get(&self, id: &MemoId) -> Option<&Arc<Memo>> {
        self.entries.get(id).map(|e| &e.memo)
    }

    /// Look up a memo and promote it to the most recently used position.
    pub fn get_promote(&mut self, id: &MemoId) -> Option<Arc<Memo>> {
        let memo = self.entries.get(id)?.memo.clone();
        self.promote(id);
        Some(memo)
    }

    /// Move a resident memo to the most recently used position.
    pub fn promote(&mut self, id: &MemoId) {
        if self.tail.as_ref() == Some(id) || !self.entries.contains_key(id) {
            return;
        }
        self.unlink(id);
        self.push_tail(id);
    }

    pub fn contains(&self, id: &MemoId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The least recently used resident memo id.
    pub fn head_id(&self) -> Option<&MemoId> {
        self.head.as_ref()
    }

    /// The next newer neighbour of a resident memo in the recency list.
    pub fn newer_than(&self, id: &MemoId) -> Option<MemoId> {
        self.entries.get(id).and_then(|e| e.newer.clone())
    }

    /// Resident memo ids from least to most recently used.
    pub fn lru_ids(&self) -> Vec<MemoId> {
        let mut ids = Vec::with_capacity(self.entries.len());
        let mut cursor = self.head.clone();
        while let Some(id) = cursor {
            cursor = self.entries.get(&id).and_then(|e| e.newer.clone());
            ids.push(id);
        }
        ids
    }

    pub fn has_memos_for_record(&self, record_id: &RecordId) -> bool {
        self.by_record.contains_key(record_id)
    }

    /// Resident memos of a record, in insertion order.
    pub fn memos_for_record(&self, record_id: &RecordId) -> Vec<Arc<Memo>> {
        self.by_record
            .get(record_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resident children citing `id` as a parent.
    pub fn child_ids_of(&self, id: &MemoId) -> &[MemoId] {
        self.by_parent.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any resident memo cites `id` as a parent.
    pub fn has_children(&self, id: &MemoId) -> bool {
        self.by_parent.contains_key(id)
    }

    /// Resident memos of a record that no resident memo cites as parent.
    pub fn head_memos_for_record(&self, record_id: &RecordId) -> Vec<Arc<Memo>> {
        self.memos_for_record(record_id)
            .into_iter()
            .filter(|m| !self.has_children(m.id()))
            .collect()
    }

    fn push_tail(&mut self, id: &MemoId) {
        let old_tail = self.tail.replace(id.clone());
        if let Some(entry) = self.entries.get_mut(id) {
            entry.older = old_tail.clone();
            entry.newer = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(prev) = self.entries.get_mut(&t) {
                    prev.newer = Some(id.clone());
                }
            }
            None => self.head = Some(id.clone()),
        }
    }

    fn unlink(&mut self, id: &MemoId) {
        let (older, newer) = match self.entries.get_mut(id) {
            Some(entry) => (entry.older.take(), entry.newer.take()),
            None => return,
        };
        match &older {
            Some(o) => {
                if let Some(entry) = self.entries.get_mut(o) {
                    entry.newer = newer.clone();
                }
            }
            None => self.head = newer.clone(),
        }
        match &newer {
            Some(n) => {
                if let Some(entry) = self.entries.get_mut(n) {
                    entry.older = older.clone();
                }
            }
            None => self.tail = older,
        }
    }
}
