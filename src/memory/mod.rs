//! Shared byte storage: the segmented zero-copy [`View`] and the fixed-size
//! chunk [`BufferPool`] that backs reassembled message bodies.

pub mod pool;
pub mod view;

pub use self::pool::{Buffer, BufferError, BufferPool, PoolError};
pub use self::view::{Slab, View, ViewReader};
