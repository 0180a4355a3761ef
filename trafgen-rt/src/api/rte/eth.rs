// Ethernet device API
//
// `EthDriver` is the port/queue side of the poll-mode provider; `EthDev` and
// `EthDevBuilder` are thin per-port handles over it.

use std::sync::Arc;

use super::pktmbuf::MemPool;
use super::queue::Burst;
use crate::api::Result;

/// Ethernet device port ID
pub type PortId = u16;

/// Queue ID for RX/TX queues
pub type QueueId = u16;

/// Default MTU
pub const DEFAULT_MTU: u32 = 1500;

/// MTU used when jumbo frames are enabled
pub const JUMBO_MTU: u32 = 9000;

/// Default number of descriptors per queue
pub const DEFAULT_NB_DESC: u16 = 1024;

/// Ethernet device configuration
#[derive(Debug, Clone)]
pub struct EthConf {
    /// Maximum Transfer Unit
    pub mtu: u32,
    /// Spread flows across RX queues by hash
    pub rss: bool,
}

impl Default for EthConf {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            rss: false,
        }
    }
}

impl EthConf {
    /// Create a simple configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Enable RSS mode
    pub fn rss(mut self) -> Self {
        self.rss = true;
        self
    }
}

/// RX queue configuration
#[derive(Debug, Clone)]
pub struct RxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for the device's socket)
    pub socket_id: i32,
}

impl Default for RxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: DEFAULT_NB_DESC,
            socket_id: -1,
        }
    }
}

impl RxQueueConf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the RX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }
}

/// TX queue configuration
#[derive(Debug, Clone)]
pub struct TxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for the device's socket)
    pub socket_id: i32,
}

impl Default for TxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: DEFAULT_NB_DESC,
            socket_id: -1,
        }
    }
}

impl TxQueueConf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the TX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }
}

/// Port and queue operations of a poll-mode driver.
///
/// Burst calls are made from the lcore that owns the queue and must not
/// block.
pub trait EthDriver: Send + Sync {
    /// NUMA socket the port is attached to (-1 if unknown).
    fn socket_id(&self, port: PortId) -> i32;

    /// Configure queue counts and device settings.
    fn configure(&self, port: PortId, nb_rx: u16, nb_tx: u16, conf: &EthConf) -> Result<()>;

    /// Set up an RX queue that fills buffers from `pool`.
    fn rx_queue_setup(
        &self,
        port: PortId,
        queue: QueueId,
        conf: &RxQueueConf,
        pool: &MemPool,
    ) -> Result<()>;

    /// Set up a TX queue.
    fn tx_queue_setup(&self, port: PortId, queue: QueueId, conf: &TxQueueConf) -> Result<()>;

    /// Start the port.
    fn start(&self, port: PortId) -> Result<()>;

    /// Stop the port. Must tolerate a port that was never started.
    fn stop(&self, port: PortId) -> Result<()>;

    /// Receive up to `max` buffers, appended to `pkts`.
    ///
    /// A `max` of 0 asks for the driver default, which is the remaining
    /// capacity of `pkts`. Returns the number received.
    fn rx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Burst, max: usize) -> usize;

    /// Transmit buffers from the front of `pkts`.
    ///
    /// Accepted buffers are removed from `pkts` and owned by the driver;
    /// the rest stay in order. Returns the number accepted.
    fn tx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Burst) -> usize;
}

/// Ethernet device handle
#[derive(Clone)]
pub struct EthDev {
    driver: Arc<dyn EthDriver>,
    port_id: PortId,
}

impl EthDev {
    /// Create a handle for an existing port
    ///
    /// Does not configure or start the device.
    pub fn new(driver: Arc<dyn EthDriver>, port_id: PortId) -> Self {
        Self { driver, port_id }
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the NUMA socket ID of the device
    pub fn socket_id(&self) -> i32 {
        self.driver.socket_id(self.port_id)
    }

    /// Start the device
    pub fn start(&self) -> Result<()> {
        self.driver.start(self.port_id)
    }

    /// Stop the device
    pub fn stop(&self) -> Result<()> {
        self.driver.stop(self.port_id)
    }
}

impl std::fmt::Debug for EthDev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthDev").field("port_id", &self.port_id).finish()
    }
}

/// Builder for configuring an Ethernet device
pub struct EthDevBuilder {
    port_id: PortId,
    eth_conf: EthConf,
    rx_queue_conf: RxQueueConf,
    tx_queue_conf: TxQueueConf,
}

impl EthDevBuilder {
    /// Create a new builder for the given port
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            eth_conf: EthConf::default(),
            rx_queue_conf: RxQueueConf::default(),
            tx_queue_conf: TxQueueConf::default(),
        }
    }

    /// Set device configuration
    pub fn eth_conf(mut self, conf: EthConf) -> Self {
        self.eth_conf = conf;
        self
    }

    /// Set RX queue configuration (applied to all queues)
    pub fn rx_queue_conf(mut self, conf: RxQueueConf) -> Self {
        self.rx_queue_conf = conf;
        self
    }

    /// Set TX queue configuration (applied to all queues)
    pub fn tx_queue_conf(mut self, conf: TxQueueConf) -> Self {
        self.tx_queue_conf = conf;
        self
    }

    /// Configure the device with one RX/TX queue pair per pool.
    ///
    /// RX queue `q` is bound to `pools[q]`. The device is left stopped.
    pub fn setup(self, driver: Arc<dyn EthDriver>, pools: &[MemPool]) -> Result<EthDev> {
        let nb_queues = pools.len() as u16;
        driver.configure(self.port_id, nb_queues, nb_queues, &self.eth_conf)?;

        for (q, pool) in pools.iter().enumerate() {
            driver.rx_queue_setup(self.port_id, q as QueueId, &self.rx_queue_conf, pool)?;
        }

        for q in 0..nb_queues {
            driver.tx_queue_setup(self.port_id, q, &self.tx_queue_conf)?;
        }

        Ok(EthDev::new(driver, self.port_id))
    }
}
