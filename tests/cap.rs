//! The process-wide slab cap. Kept in its own test binary so the counter
//! is not shared with other tests.

use std::sync::Arc;

use ahash::AHashSet;
use anyhow::Result;
use async_trait::async_trait;

use memomesh::{
    Error, Memo, Mesh, PeeringChanges, Slab, SlabConfig, SlabId, MAX_SLABS,
};

#[derive(Debug, Default)]
struct NullMesh;

#[async_trait]
impl Mesh for NullMesh {
    fn register_slab(&self, _slab: &Slab) {}

    async fn send_peering_changes(&self, _from: SlabId, _changes: PeeringChanges) -> Result<()> {
        Ok(())
    }

    async fn get_accepting_slab_ids(
        &self,
        _exclude: &AHashSet<SlabId>,
        _desired: usize,
    ) -> Result<Vec<SlabId>> {
        Ok(vec![])
    }

    async fn push_memo_to_slab(&self, _from: SlabId, _to: SlabId, _memo: Arc<Memo>) -> Result<()> {
        Ok(())
    }
}

#[test]
fn slab_cap_is_enforced_process_wide() {
    let mesh = Arc::new(NullMesh);

    let mut slabs = Vec::with_capacity(MAX_SLABS);
    for _ in 0..MAX_SLABS {
        slabs.push(Slab::new(SlabConfig::new("aa"), mesh.clone()).unwrap());
    }

    let err = Slab::new(SlabConfig::new("zz"), mesh.clone()).unwrap_err();
    assert!(matches!(err, Error::SlabCapExceeded(MAX_SLABS)));

    // Dropping a slab frees its slot.
    slabs.pop();
    assert!(Slab::new(SlabConfig::new("zz"), mesh).is_ok());
}
