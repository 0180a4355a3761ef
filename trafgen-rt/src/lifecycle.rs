//! Buffer lifecycle: deferred freeing and the zero-copy release path.
//!
//! Buffers released on a core collect in that core's [`FreeBatch`]. When the
//! batch reaches its threshold it is flushed in one go, either back to the
//! pools or, for a zero-copy-client port, stamped
//! [`ReleaseState::PendingTransmitRelease`] and pushed out through the TX
//! queue so the peer can reclaim it. A zero-copy buffer never goes straight
//! back to a pool: its memory may still be read by the peer.

use crate::api::rte::mbuf::{Mbuf, ReleaseState, free_bulk};
use crate::api::rte::pktmbuf::MemPool;
use crate::api::rte::queue::{Burst, RxQueue, TxQueue};
use crate::config::FREE_BATCH_MAX;

/// Requests above this are served with the driver's default count.
pub const ZC_ALLOC_THRESHOLD: usize = 32768;

/// Zero-copy allocation requests are rounded up to a multiple of this.
pub const ZC_ALLOC_ALIGN: usize = 32;

/// Burst count to ask the zero-copy allocator for.
///
/// Returns 0 ("driver default") for requests above [`ZC_ALLOC_THRESHOLD`],
/// otherwise `requested` rounded up to [`ZC_ALLOC_ALIGN`].
#[inline]
pub fn zero_copy_alloc_count(requested: usize) -> usize {
    if requested > ZC_ALLOC_THRESHOLD {
        0
    } else {
        requested.div_ceil(ZC_ALLOC_ALIGN) * ZC_ALLOC_ALIGN
    }
}

/// Receive up to a padded `requested` buffers from the zero-copy allocator.
///
/// Returns how many were delivered, which may be fewer than requested.
pub fn alloc_zero_copy(rxq: &RxQueue, pkts: &mut Burst, requested: usize) -> usize {
    rxq.rx(pkts, zero_copy_alloc_count(requested))
}

/// Stamp every buffer for release by transmission.
#[inline]
pub fn tag_for_release(mbufs: &mut Burst) {
    for mbuf in mbufs.iter_mut() {
        mbuf.set_state(ReleaseState::PendingTransmitRelease);
    }
}

/// Hand every buffer to `txq`, retrying until the queue has taken them all.
///
/// Never drops a buffer and never gives up: a stalled queue stalls the
/// caller. Returns the number transmitted.
pub fn transmit_for_release(txq: &TxQueue, mbufs: &mut Burst) -> usize {
    let mut sent = 0;
    while !mbufs.is_empty() {
        let n = txq.tx(mbufs);
        if n == 0 {
            std::hint::spin_loop();
        }
        sent += n;
    }
    sent
}

/// Copy `src` into a fresh buffer from `pool`.
///
/// Returns `None` when the pool is exhausted or the data does not fit.
pub fn duplicate(pool: &MemPool, src: &Mbuf) -> Option<Mbuf> {
    let mut dup = pool.try_alloc()?;
    if !dup.copy_from_slice(src.data()) {
        return None;
    }
    dup.set_port(src.port());
    Some(dup)
}

/// Where a flushed batch goes.
#[derive(Debug, Clone)]
pub enum ReleasePath {
    /// Back to the owning pools in bulk.
    Pool,
    /// Tagged and transmitted for the zero-copy peer to reclaim.
    Transmit(TxQueue),
}

impl ReleasePath {
    pub fn is_zero_copy(&self) -> bool {
        matches!(self, ReleasePath::Transmit(_))
    }
}

/// A core's pending frees.
#[derive(Debug)]
pub struct FreeBatch {
    mbufs: Burst,
    threshold: usize,
    flushes: u64,
}

impl Default for FreeBatch {
    fn default() -> Self {
        Self::new(FREE_BATCH_MAX)
    }
}

impl FreeBatch {
    /// A batch that flushes once it holds `threshold` buffers (1..=64).
    pub fn new(threshold: usize) -> Self {
        Self {
            mbufs: Burst::new(),
            threshold: threshold.clamp(1, FREE_BATCH_MAX),
            flushes: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mbufs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mbufs.is_empty()
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of flushes performed so far.
    #[inline]
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Queue `mbuf` for release, flushing if the batch is now full.
    ///
    /// Returns the number of buffers flushed (0 if none).
    #[inline]
    pub fn release(&mut self, mbuf: Mbuf, path: &ReleasePath) -> usize {
        self.mbufs.push(mbuf);
        if self.mbufs.len() >= self.threshold {
            self.flush(path)
        } else {
            0
        }
    }

    /// Release everything pending through `path`.
    pub fn flush(&mut self, path: &ReleasePath) -> usize {
        if self.mbufs.is_empty() {
            return 0;
        }
        self.flushes += 1;
        match path {
            ReleasePath::Pool => free_bulk(self.mbufs.drain(..)),
            ReleasePath::Transmit(txq) => {
                tag_for_release(&mut self.mbufs);
                transmit_for_release(txq, &mut self.mbufs)
            }
        }
    }
}
