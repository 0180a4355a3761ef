//! Environment bootstrap and teardown.
//!
//! [`Runtime`] owns the provider and the auxiliary subsystems. `initialize`
//! brings the data plane up in stages and stops at the first failure without
//! unwinding; `shutdown` tears down every stage unconditionally, so it must
//! always be called, whether or not `initialize` succeeded.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::api::Errno;
use crate::api::rte::eal::{EalBuilder, Environment};
use crate::api::rte::eth::{
    DEFAULT_MTU, EthConf, EthDev, EthDevBuilder, EthDriver, JUMBO_MTU, PortId, QueueId,
    RxQueueConf, TxQueueConf,
};
use crate::api::rte::lcore::Lcore;
use crate::config::{Config, DeviceSpec, PortConfig};
use crate::error::Error;
use crate::launch::{self, LaunchReport};
use crate::pool::{self, RX_POOL_HINT};
use crate::subsys::{CaptureHooks, Disabled, FlowSteering, KernelMirror, TickSource};
use crate::workspace::WorkSpace;

/// Builder for [`Runtime`]. Subsystems not given default to [`Disabled`].
pub struct RuntimeBuilder {
    env: Arc<dyn Environment>,
    driver: Arc<dyn EthDriver>,
    flow: Arc<dyn FlowSteering>,
    kni: Arc<dyn KernelMirror>,
    ticks: Arc<dyn TickSource>,
    capture: Arc<dyn CaptureHooks>,
}

impl RuntimeBuilder {
    pub fn flow(mut self, flow: Arc<dyn FlowSteering>) -> Self {
        self.flow = flow;
        self
    }

    pub fn kni(mut self, kni: Arc<dyn KernelMirror>) -> Self {
        self.kni = kni;
        self
    }

    pub fn ticks(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn capture(mut self, capture: Arc<dyn CaptureHooks>) -> Self {
        self.capture = capture;
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            env: self.env,
            driver: self.driver,
            flow: self.flow,
            kni: self.kni,
            ticks: self.ticks,
            capture: self.capture,
        }
    }
}

/// The data-plane runtime: environment, ports, and auxiliary subsystems.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use trafgen_rt::soft::{SoftEnv, SoftNet};
/// use trafgen_rt::{Config, DeviceSpec, PortConfig, Runtime};
///
/// let env = Arc::new(SoftEnv::new().pin_threads(false));
/// let net = Arc::new(SoftNet::new().port(0, 0));
/// let runtime = Runtime::builder(env, net).build();
///
/// let mut config = Config::new(vec![0])
///     .file_prefix("doc")
///     .mbufs_per_pool(256)
///     .port(PortConfig::new(0, DeviceSpec::Vdev("net_ring0".into())));
/// let started = runtime.initialize(&mut config, "trafgen");
/// runtime.shutdown(&mut config);
/// assert!(started.is_ok());
/// ```
pub struct Runtime {
    env: Arc<dyn Environment>,
    driver: Arc<dyn EthDriver>,
    flow: Arc<dyn FlowSteering>,
    kni: Arc<dyn KernelMirror>,
    ticks: Arc<dyn TickSource>,
    capture: Arc<dyn CaptureHooks>,
}

impl Runtime {
    pub fn builder(env: Arc<dyn Environment>, driver: Arc<dyn EthDriver>) -> RuntimeBuilder {
        RuntimeBuilder {
            env,
            driver,
            flow: Arc::new(Disabled),
            kni: Arc::new(Disabled),
            ticks: Arc::new(Disabled),
            capture: Arc::new(Disabled),
        }
    }

    pub fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    pub fn driver(&self) -> &Arc<dyn EthDriver> {
        &self.driver
    }

    pub fn ticks(&self) -> &Arc<dyn TickSource> {
        &self.ticks
    }

    /// Startup arguments for `config`, in the order the environment gets them.
    pub fn eal_builder(&self, config: &Config, argv0: &str) -> EalBuilder {
        let file_prefix = config
            .file_prefix
            .clone()
            .unwrap_or_else(|| format!("trafgen-{}", nix::unistd::getpid()));

        let mut builder = EalBuilder::new().program_name(argv0).lcores(&config.cpus);
        if let Some(mem) = &config.socket_mem {
            builder = builder.socket_mem(mem.clone());
        }
        builder = builder
            .file_prefix(file_prefix)
            .log_level(config.log_level);
        if self.env.supports_telemetry() {
            builder = builder.no_telemetry();
        }
        if config.no_pci {
            builder = builder.no_pci();
        }
        for port in &config.ports {
            match &port.devices {
                DeviceSpec::Pci(addrs) => {
                    for addr in addrs {
                        builder = builder.allow(addr.clone());
                    }
                }
                DeviceSpec::Vdev(param) => builder = builder.vdev(param.clone()),
            }
        }
        builder
    }

    /// Bring the data plane up.
    ///
    /// On success every port is started and `config.tsc_per_second` holds
    /// the cycle counter frequency. On failure, stages already done are left
    /// as they are; call [`shutdown`](Self::shutdown) either way.
    pub fn initialize(&self, config: &mut Config, argv0: &str) -> Result<(), Error> {
        config.validate()?;

        // Startup arguments are checked before the environment sees them.
        let eal = self.eal_builder(config, argv0);
        eal.build_args()?;

        self.env.set_max_simd_bitwidth(config.simd_width());
        eal.init(self.env.as_ref())?;

        if let Err(e) = self.capture.init() {
            warn!(error = %e, "Capture hooks unavailable");
        }

        // Ports are set up against the rest of the config, then put back.
        let mut ports = std::mem::take(&mut config.ports);
        let brought_up = ports
            .iter_mut()
            .try_for_each(|port| self.port_init(port, config));
        config.ports = ports;
        brought_up?;
        for port in &config.ports {
            self.port_start(port)?;
        }

        self.kni.start(config).map_err(Error::KniStart)?;

        // One-way traffic needs neither RSS nor FDIR.
        if config.flow.needs_steering() {
            self.flow.init(config).map_err(Error::FlowInit)?;
        }

        self.ticks.init(config.ticks_per_second);
        config.tsc_per_second = self.env.tsc_hz();

        info!(
            ports = config.ports.len(),
            lcores = config.cpus.len(),
            tsc_hz = config.tsc_per_second,
            "Runtime initialized"
        );
        Ok(())
    }

    /// Tear everything down, regardless of how far `initialize` got.
    ///
    /// Safe to call more than once, and before `initialize`.
    pub fn shutdown(&self, config: &mut Config) {
        self.capture.uninit();
        self.flow.flush(config);
        for port in &config.ports {
            if let Err(e) = EthDev::new(self.driver.clone(), port.id).stop() {
                debug!(port_id = port.id, error = %e, "Port stop failed");
            }
        }
        self.kni.stop(config);
        if let Err(e) = self.env.cleanup() {
            error!(error = %e, "Environment cleanup failed");
        }
        for port in config.ports.iter_mut() {
            port.pools.clear();
        }
        info!("Runtime shut down");
    }

    /// Run `entry` on every lcore. See [`launch::run`].
    pub fn run<T, F>(&self, entry: F, ctx: Arc<T>) -> Result<LaunchReport, Error>
    where
        T: Send + Sync + 'static,
        F: Fn(Lcore, &T) -> i32 + Send + Sync + 'static,
    {
        launch::run(self.env.as_ref(), entry, ctx)
    }

    /// Per-core context for `queue` of `port`, stamped with this runtime's clock.
    pub fn workspace(
        &self,
        config: &Config,
        port: PortId,
        queue: QueueId,
    ) -> Result<WorkSpace, Error> {
        let port = config
            .find_port(port)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown port {port}")))?;
        Ok(WorkSpace::new(self.driver.clone(), config, port, queue)?.with_ticks(self.ticks.clone()))
    }

    fn port_init(&self, port: &mut PortConfig, config: &Config) -> Result<(), Error> {
        let mtu = if config.jumbo { JUMBO_MTU } else { DEFAULT_MTU };
        port.socket_id = self.driver.socket_id(port.id);
        port.pools.clear();

        for queue in 0..port.queues {
            let pool = pool::create_pool(
                self.env.as_ref(),
                self.driver.as_ref(),
                config,
                RX_POOL_HINT,
                port.id,
                queue,
            )
            .ok_or(Error::PortBringup {
                port: port.id,
                source: Errno::ENOMEM,
            })?;
            port.pools.push(pool);
        }

        let mut eth_conf = EthConf::new().mtu(mtu);
        if port.queues > 1 {
            eth_conf = eth_conf.rss();
        }
        EthDevBuilder::new(port.id)
            .eth_conf(eth_conf)
            .rx_queue_conf(RxQueueConf::new().socket_id(port.socket_id))
            .tx_queue_conf(TxQueueConf::new().socket_id(port.socket_id))
            .setup(self.driver.clone(), &port.pools)
            .map_err(|source| Error::PortBringup {
                port: port.id,
                source,
            })?;

        info!(
            port_id = port.id,
            socket_id = port.socket_id,
            queues = port.queues,
            mtu,
            zero_copy = port.zero_copy_client,
            "Port configured"
        );
        Ok(())
    }

    fn port_start(&self, port: &PortConfig) -> Result<(), Error> {
        EthDev::new(self.driver.clone(), port.id)
            .start()
            .map_err(|source| Error::PortStart {
                port: port.id,
                source,
            })?;
        debug!(port_id = port.id, "Port started");
        Ok(())
    }
}
