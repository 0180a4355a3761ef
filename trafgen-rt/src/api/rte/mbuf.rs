// Packet buffer (mbuf).
//
// An `Mbuf` exclusively owns one slot of a pool. Dropping it returns the slot
// to the pool, unless the buffer has been stamped for zero-copy release: such
// a buffer belongs to the transport from then on and never re-enters the pool
// through this path.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::pktmbuf::{PKTMBUF_HEADROOM, PoolInner};

/// Release state carried in a buffer's auxiliary tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleaseState {
    /// Owned locally; dropping returns it to its pool.
    #[default]
    Free,
    /// Handed to transmission so the zero-copy peer can reclaim it.
    PendingTransmitRelease,
}

/// Backing storage of one buffer.
pub(crate) struct MbufSlot {
    buf: Box<[u8]>,
    data_off: u16,
    data_len: u16,
    port: u16,
    state: ReleaseState,
}

impl MbufSlot {
    pub(crate) fn new(buf_size: u16) -> Self {
        Self {
            buf: vec![0u8; buf_size as usize].into_boxed_slice(),
            data_off: PKTMBUF_HEADROOM,
            data_len: 0,
            port: 0,
            state: ReleaseState::Free,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.data_off = PKTMBUF_HEADROOM.min(self.buf.len() as u16);
        self.data_len = 0;
        self.port = 0;
        self.state = ReleaseState::Free;
    }
}

/// A packet buffer allocated from a [`MemPool`](super::pktmbuf::MemPool).
pub struct Mbuf {
    slot: ManuallyDrop<Box<MbufSlot>>,
    pool: Arc<PoolInner>,
}

impl Mbuf {
    pub(crate) fn from_slot(slot: Box<MbufSlot>, pool: Arc<PoolInner>) -> Self {
        Self {
            slot: ManuallyDrop::new(slot),
            pool,
        }
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Get the current data length (bytes of valid data).
    #[inline]
    pub fn data_len(&self) -> usize {
        self.slot.data_len as usize
    }

    /// Get the headroom (unused space at the front of the buffer).
    #[inline]
    pub fn headroom(&self) -> usize {
        self.slot.data_off as usize
    }

    /// Get the tailroom (unused space at the end of the buffer).
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.slot.buf.len() - self.headroom() - self.data_len()
    }

    /// Get the total capacity (data_len + tailroom).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data_len() + self.tailroom()
    }

    /// Get an immutable slice of the packet data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        let start = self.headroom();
        &self.slot.buf[start..start + self.data_len()]
    }

    /// Get a mutable slice of the packet data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.headroom();
        let end = start + self.data_len();
        &mut self.slot.buf[start..end]
    }

    /// Append space to the end of the packet data.
    ///
    /// Returns a mutable slice to the newly appended region,
    /// or `None` if there's not enough tailroom.
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.tailroom() {
            return None;
        }
        let start = self.headroom() + self.data_len();
        self.slot.data_len += len as u16;
        Some(&mut self.slot.buf[start..start + len])
    }

    /// Reset the buffer to its initial state (empty, with default headroom).
    #[inline]
    pub fn reset(&mut self) {
        let state = self.slot.state;
        self.slot.reset();
        self.slot.state = state;
    }

    /// Copy data from a slice, resetting the buffer first.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> bool {
        self.reset();
        if let Some(buf) = self.append(data.len()) {
            buf.copy_from_slice(data);
            true
        } else {
            false
        }
    }

    /// Port the buffer was received on or is destined for.
    #[inline]
    pub fn port(&self) -> u16 {
        self.slot.port
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) {
        self.slot.port = port;
    }

    /// Release state tag.
    #[inline]
    pub fn state(&self) -> ReleaseState {
        self.slot.state
    }

    #[inline]
    pub fn set_state(&mut self, state: ReleaseState) {
        self.slot.state = state;
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        // SAFETY: the slot is taken exactly once, here.
        let slot = unsafe { ManuallyDrop::take(&mut self.slot) };
        match slot.state {
            ReleaseState::Free => self.pool.put(slot),
            ReleaseState::PendingTransmitRelease => {
                tracing::trace!("Dropping buffer owned by the zero-copy transport");
            }
        }
    }
}

impl AsRef<[u8]> for Mbuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for Mbuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl std::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mbuf")
            .field("data_len", &self.data_len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .field("port", &self.port())
            .field("state", &self.state())
            .finish()
    }
}

/// Return a set of buffers to their pools in one pass.
///
/// Buffers may come from different pools; each goes back to its own.
pub fn free_bulk<I>(mbufs: I) -> usize
where
    I: IntoIterator<Item = Mbuf>,
{
    mbufs.into_iter().map(drop).count()
}
