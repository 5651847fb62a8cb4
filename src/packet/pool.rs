//! See [`PacketPool`].

use std::collections::VecDeque;

use octs::BytesMut;

/// Number of bucketed size classes tracked internally. Buckets 2&3 and 4-7
/// are folded together into shared storage (see [`PacketPool::bucket_of`]),
/// so there are only 5 *physical* free lists even though the bucketing
/// formula in `spec.md` §4.1 enumerates indices `0..=8`.
const PHYSICAL_CLASSES: usize = 5;

/// Nominal capacity, in bytes, of each physical free list. The last class
/// ("others") has no fixed nominal capacity - buffers in it are grown to
/// whatever the caller needs.
const CLASS_CAP: [usize; PHYSICAL_CLASSES] = [16, 32, 64, 128, 0];

/// Size-class free-list pool of reusable packet buffers.
///
/// Mirrors the `alloc`/`reclaim` shape of a plain buffer pool (see e.g.
/// `ChunkPool` in the wider retrieval pack), generalized to multiple
/// bounded size classes so that a flood of small ACKs doesn't evict the
/// buffers a large fragmented message needs.
///
/// This type is not [`Send`]/[`Sync`] by convention - it is only ever
/// touched from the manager's tick thread, per `spec.md` §5.
#[derive(Debug)]
pub struct PacketPool {
    buckets: [VecDeque<BytesMut>; PHYSICAL_CLASSES],
    /// Bounded capacity per free list. Excess recycled buffers beyond this
    /// are simply dropped (`spec.md` §4.1 "Overflow beyond PoolLimit drops
    /// excess packets").
    limit: usize,
}

impl PacketPool {
    /// Buffers larger than this are never pooled - they are allocated fresh
    /// on `take` and freed (not recycled) on `give`.
    pub const MAX_PACKET_SIZE: usize = 65_507;

    /// Creates a pool sized for `max_connections` peers, using the default
    /// `PoolLimit = max_connections * 50` from `spec.md` §4.1.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self::with_limit(max_connections.saturating_mul(50))
    }

    /// Creates a pool with an explicit per-class bound.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buckets: Default::default(),
            limit,
        }
    }

    /// Warm-starts the free list that would service a request of `size`
    /// bytes with `n` pre-allocated buffers.
    pub fn prepool(&mut self, n: usize, size: usize) {
        for _ in 0..n {
            let buf = self.fresh_buf(size);
            self.give(buf);
        }
    }

    /// Maps a requested total buffer length to a physical free-list index.
    ///
    /// `b = min(8, (size-1)/16)`, then buckets 2&3 and 4-7 are folded into
    /// shared storage to avoid fragmenting the pool across close size
    /// classes (`spec.md` §4.1).
    fn bucket_of(size: usize) -> usize {
        let size = size.max(1);
        let b = ((size - 1) / 16).min(8);
        match b {
            0 => 0,
            1 => 1,
            2 | 3 => 2,
            4..=7 => 3,
            _ => 4,
        }
    }

    fn fresh_buf(&self, size: usize) -> BytesMut {
        let class = Self::bucket_of(size);
        let nominal = CLASS_CAP[class];
        let cap = if nominal == 0 { size } else { nominal.max(size) };
        BytesMut::with_capacity(cap)
    }

    /// Takes a buffer with capacity for at least `size` bytes, reusing a
    /// pooled one if available. Buffers over [`Self::MAX_PACKET_SIZE`] are
    /// always allocated fresh and never recycled.
    pub fn take(&mut self, size: usize) -> BytesMut {
        if size > Self::MAX_PACKET_SIZE {
            return BytesMut::with_capacity(size);
        }
        let class = Self::bucket_of(size);
        match self.buckets[class].pop_front() {
            Some(mut buf) => {
                // "others" class buffers may need upsizing in place.
                if buf.capacity() < size {
                    buf.reserve(size - buf.capacity());
                }
                buf.clear();
                buf
            }
            None => self.fresh_buf(size),
        }
    }

    /// Returns a buffer to its bucket, unless it is oversize (in which case
    /// it is simply dropped and its memory freed).
    pub fn give(&mut self, mut buf: BytesMut) {
        if buf.capacity() > Self::MAX_PACKET_SIZE {
            return;
        }
        buf.clear();
        let class = Self::bucket_of(buf.capacity());
        if self.buckets[class].len() < self.limit {
            self.buckets[class].push_back(buf);
        }
        // else: pool overflow, drop the excess buffer.
    }
}
