//! Time-ordered 64-bit record identifiers.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | 32 bits epoch seconds | 14 bits stream tag | 18 bits counter |
//! ```
//!
//! The counter is shared by every caller of one generator, so at most
//! 2^18 ids per second and stream tag are distinct; beyond that the counter
//! wraps and ids repeat. Stream tags wider than 14 bits are truncated.

use std::sync::atomic::{AtomicU32, Ordering};

pub const STREAM_TAG_BITS: u32 = 14;
pub const COUNTER_BITS: u32 = 18;

const STREAM_TAG_MASK: u64 = (1 << STREAM_TAG_BITS) - 1;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Process-wide counter behind one family of ids.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU32,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Next id for `stream_tag` within `epoch_secs`.
    #[inline]
    pub fn next_id(&self, epoch_secs: u32, stream_tag: u16) -> u64 {
        gen_id(epoch_secs, &self.counter, stream_tag)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids of L4 and L7 flow logs.
pub static FLOW_LOG_IDS: IdGenerator = IdGenerator::new();
/// Ids of L4 packet blocks.
pub static PACKET_IDS: IdGenerator = IdGenerator::new();
/// Ids of in-process profile nodes.
pub static PROFILE_IDS: IdGenerator = IdGenerator::new();

/// Build an id from an epoch second, a shared counter and a stream tag.
///
/// The counter is only ever touched through one atomic increment.
#[inline]
pub fn gen_id(epoch_secs: u32, counter: &AtomicU32, stream_tag: u16) -> u64 {
    let count = counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    (u64::from(epoch_secs) << 32)
        | ((u64::from(stream_tag) & STREAM_TAG_MASK) << COUNTER_BITS)
        | (u64::from(count) & COUNTER_MASK)
}

/// Split an id back into `(epoch_secs, stream_tag, counter)`.
pub fn split_id(id: u64) -> (u32, u16, u32) {
    (
        (id >> 32) as u32,
        ((id >> COUNTER_BITS) & STREAM_TAG_MASK) as u16,
        (id & COUNTER_MASK) as u32,
    )
}
