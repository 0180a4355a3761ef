// Packet buffer pools.
//
// A pool is a fixed set of equally sized buffers allocated up front and kept
// on a lock-free ring. Allocation pops a slot, dropping an `Mbuf` pushes it
// back. Capacity never changes after creation.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use super::eal::Environment;
use super::mbuf::{Mbuf, MbufSlot};
use crate::api::{Errno, Result};

/// Headroom reserved at the front of each buffer.
pub const PKTMBUF_HEADROOM: u16 = 128;

/// Default usable data room (without headroom).
pub const MBUF_DEFAULT_DATAROOM: u16 = 2048;

/// Default buffer size: data room plus headroom.
pub const MBUF_DEFAULT_BUF_SIZE: u16 = MBUF_DEFAULT_DATAROOM + PKTMBUF_HEADROOM;

/// Buffer size for jumbo frames: 9 KiB of data plus headroom.
pub const JUMBO_MBUF_SIZE: u16 = 9216 + PKTMBUF_HEADROOM;

/// Largest per-core cache a pool accepts.
pub const MEMPOOL_CACHE_MAX_SIZE: u32 = 512;

/// Pool names must be shorter than this (terminator included).
pub const MEMPOOL_NAMESIZE: usize = 29;

/// Per-buffer metadata overhead charged against socket memory.
const MBUF_HEADER_SIZE: usize = 128;

/// Configuration for creating a MemPool
#[derive(Debug, Clone)]
pub struct MemPoolConfig {
    /// Number of buffers in the pool
    pub num_mbufs: u32,
    /// Per-core cache size (0 to disable caching)
    pub cache_size: u32,
    /// Data room size including PKTMBUF_HEADROOM
    pub data_room_size: u16,
    /// NUMA socket ID (-1 for any socket)
    pub socket_id: i32,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            num_mbufs: 8191, // 2^13 - 1
            cache_size: 256,
            data_room_size: MBUF_DEFAULT_BUF_SIZE,
            socket_id: -1,
        }
    }
}

impl MemPoolConfig {
    /// Create a new MemPoolConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of buffers in the pool.
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    /// Set the per-core cache size.
    pub fn cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the data room size (including PKTMBUF_HEADROOM).
    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }

    /// Socket memory needed to back a pool with this configuration.
    pub fn memory_size(&self) -> usize {
        self.num_mbufs as usize * (self.data_room_size as usize + MBUF_HEADER_SIZE)
    }
}

pub(crate) struct PoolInner {
    name: String,
    ring: ArrayQueue<Box<MbufSlot>>,
    capacity: u32,
    cache_size: u32,
    data_room_size: u16,
    socket_id: i32,
}

impl PoolInner {
    /// Return a slot to the ring in its pristine state.
    pub(crate) fn put(&self, mut slot: Box<MbufSlot>) {
        slot.reset();
        if self.ring.push(slot).is_err() {
            tracing::error!(pool = %self.name, "Buffer returned to a full pool");
        }
    }
}

/// A fixed-capacity pool of packet buffers bound to one NUMA socket.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<PoolInner>,
}

impl MemPool {
    /// Create a new pool and allocate every buffer up front.
    ///
    /// The environment is asked to reserve the backing memory first, so a
    /// duplicate name (`EEXIST`) or an exhausted socket (`ENOMEM`) fails
    /// without allocating anything.
    pub fn create(env: &dyn Environment, name: &str, config: &MemPoolConfig) -> Result<Self> {
        if name.is_empty() || name.len() >= MEMPOOL_NAMESIZE {
            return Err(Errno::ENAMETOOLONG);
        }
        if config.num_mbufs == 0
            || config.cache_size > MEMPOOL_CACHE_MAX_SIZE
            || config.data_room_size <= PKTMBUF_HEADROOM
        {
            return Err(Errno::EINVAL);
        }

        env.reserve_memory(name, config.socket_id, config.memory_size())?;

        let ring = ArrayQueue::new(config.num_mbufs as usize);
        for _ in 0..config.num_mbufs {
            let _ = ring.push(Box::new(MbufSlot::new(config.data_room_size)));
        }

        Ok(MemPool {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                ring,
                capacity: config.num_mbufs,
                cache_size: config.cache_size,
                data_room_size: config.data_room_size,
                socket_id: config.socket_id,
            }),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of buffers the pool was created with.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Get the number of available (free) buffers in the pool
    #[inline]
    pub fn avail_count(&self) -> u32 {
        self.inner.ring.len() as u32
    }

    /// Number of buffers currently handed out.
    #[inline]
    pub fn in_use_count(&self) -> u32 {
        self.inner.capacity - self.avail_count()
    }

    /// NUMA socket the pool was created on.
    #[inline]
    pub fn socket_id(&self) -> i32 {
        self.inner.socket_id
    }

    /// Per-core cache size requested at creation.
    #[inline]
    pub fn cache_size(&self) -> u32 {
        self.inner.cache_size
    }

    /// Get the data room size for buffers in this pool.
    #[inline]
    pub fn data_room_size(&self) -> u16 {
        self.inner.data_room_size
    }

    /// Try to allocate a buffer from this pool.
    ///
    /// Returns `None` if the pool is exhausted.
    #[inline]
    pub fn try_alloc(&self) -> Option<Mbuf> {
        let slot = self.inner.ring.pop()?;
        Some(Mbuf::from_slot(slot, self.inner.clone()))
    }

    /// Fill a batch of buffers up to the remaining capacity of the ArrayVec.
    ///
    /// Returns the number of buffers allocated.
    #[inline]
    pub fn fill_batch<const N: usize>(&self, batch: &mut arrayvec::ArrayVec<Mbuf, N>) -> usize {
        let mut count = 0;
        while batch.len() < batch.capacity() {
            if let Some(mbuf) = self.try_alloc() {
                batch.push(mbuf);
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// Whether `mbuf` was allocated from this pool.
    #[inline]
    pub fn owns(&self, mbuf: &Mbuf) -> bool {
        mbuf.belongs_to(&self.inner)
    }
}

impl std::fmt::Debug for MemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("avail", &self.avail_count())
            .field("socket_id", &self.inner.socket_id)
            .field("data_room_size", &self.inner.data_room_size)
            .finish()
    }
}
