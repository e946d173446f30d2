use thiserror::Error;

use crate::ids::SlabId;

/// Errors raised while constructing a slab.
#[derive(Debug, Error)]
pub enum Error {
    #[error("slab id must not be empty")]
    EmptySlabId,
    #[error("slab id {0} exceeds the two character namespace")]
    SlabIdTooLong(SlabId),
    #[error("process-wide cap of {0} slabs reached")]
    SlabCapExceeded(usize),
}
