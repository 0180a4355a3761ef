//! Process-wide runtime configuration.
//!
//! A [`Config`] is built once, validated, and then passed by reference to
//! every component. Bootstrap writes back two things: the per-queue pools of
//! each port and the measured cycle frequency.

use std::collections::HashSet;

use crate::api::rte::eal::{LogLevel, SimdWidth};
use crate::api::rte::eth::PortId;
use crate::api::rte::lcore::MAX_LCORE;
use crate::api::rte::pktmbuf::MemPool;
use crate::error::Error;

/// Default buffers per pool (8192 per queue times an 8x burst margin).
pub const DEFAULT_MBUFS_PER_POOL: u32 = 8192 * 8;

/// Size at which a core's pending free batch is flushed, and its upper bound.
pub const FREE_BATCH_MAX: usize = 64;

/// Default tick rate of the simulated clock.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 1000;

/// Flow-steering mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowMode {
    /// No steering; queues are fed by RSS.
    #[default]
    None,
    /// Traffic flows one way only, so no return path needs steering.
    OneWay,
    /// Directed steering rules program flows onto queues.
    Fdir,
}

impl FlowMode {
    /// Whether bootstrap has to initialize flow steering.
    pub fn needs_steering(&self) -> bool {
        matches!(self, FlowMode::Fdir)
    }
}

/// How a port's devices are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    /// One or more physical functions by PCI address (`-a <addr>` each).
    Pci(Vec<String>),
    /// A single virtual device parameter string (`--vdev=<param>`).
    Vdev(String),
}

impl DeviceSpec {
    fn is_empty(&self) -> bool {
        match self {
            DeviceSpec::Pci(addrs) => addrs.is_empty(),
            DeviceSpec::Vdev(param) => param.is_empty(),
        }
    }
}

/// One network port.
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub id: PortId,
    pub devices: DeviceSpec,
    /// RX/TX queue pairs; one pool is created per queue.
    pub queues: u16,
    /// Buffers are shared with an external zero-copy peer.
    pub zero_copy_client: bool,
    /// NUMA socket, resolved from the driver at bring-up (-1 until then).
    pub socket_id: i32,
    /// Per-queue pools, indexed by queue id. Filled by bootstrap.
    pub pools: Vec<MemPool>,
}

impl PortConfig {
    /// A port with one queue on the given devices.
    pub fn new(id: PortId, devices: DeviceSpec) -> Self {
        Self {
            id,
            devices,
            queues: 1,
            zero_copy_client: false,
            socket_id: -1,
            pools: Vec::new(),
        }
    }

    pub fn queues(mut self, queues: u16) -> Self {
        self.queues = queues;
        self
    }

    pub fn zero_copy_client(mut self, enabled: bool) -> Self {
        self.zero_copy_client = enabled;
        self
    }

    /// Pool backing RX queue `queue`, once bootstrap has created it.
    pub fn pool(&self, queue: u16) -> Option<&MemPool> {
        self.pools.get(queue as usize)
    }
}

/// Runtime configuration.
///
/// # Example
/// ```
/// use trafgen_rt::{Config, DeviceSpec, FlowMode, PortConfig};
///
/// let config = Config::new(vec![2, 3])
///     .port(PortConfig::new(0, DeviceSpec::Vdev("net_ring0".into())).queues(2))
///     .flow(FlowMode::OneWay);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Physical CPUs; lcore `i` runs on `cpus[i]` and lcore 0 is the control core.
    ///
    /// Lcore indices are positional, so several lcores may share one CPU.
    pub cpus: Vec<u32>,
    pub ports: Vec<PortConfig>,
    /// Per-socket memory in MB, e.g. `"1024,1024"`.
    pub socket_mem: Option<String>,
    /// Backing-file prefix; derived from the process id when unset.
    pub file_prefix: Option<String>,
    pub jumbo: bool,
    pub log_level: LogLevel,
    pub simd512: bool,
    pub flow: FlowMode,
    pub no_pci: bool,
    pub ticks_per_second: u64,
    /// Cycle counter frequency, published by bootstrap.
    pub tsc_per_second: u64,
    pub mbufs_per_pool: u32,
    pub free_batch_size: usize,
}

impl Config {
    /// A configuration running on `cpus` with no ports.
    pub fn new(cpus: Vec<u32>) -> Self {
        Self {
            cpus,
            ports: Vec::new(),
            socket_mem: None,
            file_prefix: None,
            jumbo: false,
            log_level: LogLevel::Info,
            simd512: false,
            flow: FlowMode::None,
            no_pci: false,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            tsc_per_second: 0,
            mbufs_per_pool: DEFAULT_MBUFS_PER_POOL,
            free_batch_size: FREE_BATCH_MAX,
        }
    }

    pub fn port(mut self, port: PortConfig) -> Self {
        self.ports.push(port);
        self
    }

    pub fn socket_mem(mut self, mem: impl Into<String>) -> Self {
        self.socket_mem = Some(mem.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    pub fn jumbo(mut self, enabled: bool) -> Self {
        self.jumbo = enabled;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn simd512(mut self, enabled: bool) -> Self {
        self.simd512 = enabled;
        self
    }

    pub fn flow(mut self, mode: FlowMode) -> Self {
        self.flow = mode;
        self
    }

    pub fn no_pci(mut self, enabled: bool) -> Self {
        self.no_pci = enabled;
        self
    }

    pub fn ticks_per_second(mut self, ticks: u64) -> Self {
        self.ticks_per_second = ticks;
        self
    }

    pub fn mbufs_per_pool(mut self, n: u32) -> Self {
        self.mbufs_per_pool = n;
        self
    }

    pub fn free_batch_size(mut self, n: usize) -> Self {
        self.free_batch_size = n;
        self
    }

    /// SIMD width to fix before environment startup.
    pub fn simd_width(&self) -> SimdWidth {
        if self.simd512 {
            SimdWidth::Bits512
        } else {
            SimdWidth::Default
        }
    }

    /// Look up a port by id.
    pub fn find_port(&self, id: PortId) -> Option<&PortConfig> {
        self.ports.iter().find(|p| p.id == id)
    }

    /// Check the configuration for values the runtime cannot honor.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cpus.is_empty() {
            return Err(Error::InvalidConfig("no CPUs configured".into()));
        }
        if self.cpus.len() > MAX_LCORE {
            return Err(Error::InvalidConfig(format!(
                "{} CPUs configured, at most {} supported",
                self.cpus.len(),
                MAX_LCORE
            )));
        }
        let mut ids = HashSet::new();
        for port in &self.ports {
            if !ids.insert(port.id) {
                return Err(Error::InvalidConfig(format!("port {} listed twice", port.id)));
            }
            if port.devices.is_empty() {
                return Err(Error::InvalidConfig(format!("port {} has no devices", port.id)));
            }
            if port.queues == 0 {
                return Err(Error::InvalidConfig(format!("port {} has no queues", port.id)));
            }
        }
        if self.free_batch_size == 0 || self.free_batch_size > FREE_BATCH_MAX {
            return Err(Error::InvalidConfig(format!(
                "free batch size {} outside 1..={}",
                self.free_batch_size, FREE_BATCH_MAX
            )));
        }
        if self.mbufs_per_pool == 0 {
            return Err(Error::InvalidConfig("pool size is 0".into()));
        }
        Ok(())
    }
}
