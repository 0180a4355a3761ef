// RX/TX queue handles over an `EthDriver`.

use std::sync::Arc;

use arrayvec::ArrayVec;

use super::eth::{EthDriver, PortId, QueueId};
use super::mbuf::Mbuf;

/// Maximum burst size for RX/TX operations
pub const MAX_BURST_SIZE: usize = 64;

/// A burst of buffers moving through one RX or TX call.
pub type Burst = ArrayVec<Mbuf, MAX_BURST_SIZE>;

/// RX Queue handle for receiving packets
#[derive(Clone)]
pub struct RxQueue {
    driver: Arc<dyn EthDriver>,
    port_id: PortId,
    queue_id: QueueId,
}

impl RxQueue {
    /// Create a new RX queue handle.
    ///
    /// Note: The queue must already be set up on the driver.
    #[inline]
    pub fn new(driver: Arc<dyn EthDriver>, port_id: PortId, queue_id: QueueId) -> Self {
        Self {
            driver,
            port_id,
            queue_id,
        }
    }

    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Receive up to `max` packets (0 = fill the burst).
    ///
    /// Returns the number of packets received.
    #[inline]
    pub fn rx(&self, mbufs: &mut Burst, max: usize) -> usize {
        if mbufs.is_full() {
            return 0;
        }
        self.driver.rx_burst(self.port_id, self.queue_id, mbufs, max)
    }
}

/// TX Queue handle for transmitting packets
#[derive(Clone)]
pub struct TxQueue {
    driver: Arc<dyn EthDriver>,
    port_id: PortId,
    queue_id: QueueId,
}

impl TxQueue {
    /// Create a new TX queue handle.
    ///
    /// Note: The queue must already be set up on the driver.
    #[inline]
    pub fn new(driver: Arc<dyn EthDriver>, port_id: PortId, queue_id: QueueId) -> Self {
        Self {
            driver,
            port_id,
            queue_id,
        }
    }

    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Transmit a burst of packets from the provided buffer.
    ///
    /// Successfully transmitted packets are removed from the front of `mbufs`.
    /// Packets that fail to transmit remain in the buffer (caller must handle).
    #[inline]
    pub fn tx(&self, mbufs: &mut Burst) -> usize {
        if mbufs.is_empty() {
            return 0;
        }
        self.driver.tx_burst(self.port_id, self.queue_id, mbufs)
    }
}

impl std::fmt::Debug for RxQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

impl std::fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}
