//! Buffer pool management
//!
//! Fixed-capacity pools of reference-counted payload buffers.

mod buffer;
mod slab;

pub use buffer::{Blank, Delivery, Handle, Pool, PoolStats};
pub use slab::SlotIndex;
