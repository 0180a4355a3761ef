//! Per-core work context.
//!
//! A [`WorkSpace`] is built at the start of a core's loop and owns everything
//! the hot path needs for one port/queue: the queue handles, the pending free
//! batch, the allocation pool and the trace sink. It is `Send` so it can be
//! built on the core that uses it, but it is never shared.
//!
//! Dropping a workspace flushes its batch, which on a zero-copy port waits
//! for the TX queue. Drop it before the ports are stopped.

use std::io;
use std::sync::Arc;

use crate::api::rte::eth::{EthDriver, PortId, QueueId};
use crate::api::rte::mbuf::Mbuf;
use crate::api::rte::pktmbuf::MemPool;
use crate::api::rte::queue::{Burst, RxQueue, TxQueue};
use crate::config::{Config, PortConfig};
use crate::diag::{self, LogSink};
use crate::error::Error;
use crate::lifecycle::{self, FreeBatch, ReleasePath};
use crate::subsys::{Disabled, SimTime, TickSource};

pub struct WorkSpace {
    port_id: PortId,
    queue_id: QueueId,
    rxq: RxQueue,
    txq: TxQueue,
    path: ReleasePath,
    batch: FreeBatch,
    pool: MemPool,
    log: LogSink,
    ticks: Arc<dyn TickSource>,
}

impl WorkSpace {
    /// Context for `queue` of `port`, whose pools bootstrap has created.
    pub fn new(
        driver: Arc<dyn EthDriver>,
        config: &Config,
        port: &PortConfig,
        queue: QueueId,
    ) -> Result<Self, Error> {
        let pool = port.pool(queue).cloned().ok_or_else(|| {
            Error::InvalidConfig(format!("port {} has no pool for queue {}", port.id, queue))
        })?;
        let rxq = RxQueue::new(driver.clone(), port.id, queue);
        let txq = TxQueue::new(driver, port.id, queue);
        let path = if port.zero_copy_client {
            ReleasePath::Transmit(txq.clone())
        } else {
            ReleasePath::Pool
        };

        Ok(Self {
            port_id: port.id,
            queue_id: queue,
            rxq,
            txq,
            path,
            batch: FreeBatch::new(config.free_batch_size),
            pool,
            log: LogSink::stdout(),
            ticks: Arc::new(Disabled),
        })
    }

    /// Send buffer traces to `sink` instead of stdout.
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log = sink;
        self
    }

    /// Stamp traces with `ticks`.
    pub fn with_ticks(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = ticks;
        self
    }

    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    #[inline]
    pub fn is_zero_copy(&self) -> bool {
        self.path.is_zero_copy()
    }

    /// Allocation context used by [`duplicate`](Self::duplicate).
    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    /// Buffers waiting in the free batch.
    #[inline]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn batch(&self) -> &FreeBatch {
        &self.batch
    }

    pub fn now(&self) -> SimTime {
        self.ticks.now()
    }

    // ==================== I/O ====================

    #[inline]
    pub fn rx(&self, pkts: &mut Burst) -> usize {
        self.rxq.rx(pkts, 0)
    }

    #[inline]
    pub fn tx(&self, pkts: &mut Burst) -> usize {
        self.txq.tx(pkts)
    }

    /// Allocate one buffer from the core's pool.
    #[inline]
    pub fn alloc(&self) -> Option<Mbuf> {
        self.pool.try_alloc()
    }

    /// Request `requested` buffers from the zero-copy peer (padded).
    pub fn alloc_zero_copy(&self, pkts: &mut Burst, requested: usize) -> usize {
        lifecycle::alloc_zero_copy(&self.rxq, pkts, requested)
    }

    /// Hand `pkts` to the TX queue until every buffer is taken.
    pub fn transmit_for_release(&self, pkts: &mut Burst) -> usize {
        lifecycle::transmit_for_release(&self.txq, pkts)
    }

    // ==================== Release ====================

    /// Defer the release of `mbuf`; the batch is flushed when full.
    ///
    /// Returns the number of buffers flushed by this call.
    #[inline]
    pub fn release(&mut self, mbuf: Mbuf) -> usize {
        self.batch.release(mbuf, &self.path)
    }

    /// Free `mbuf`: straight back to the pool for a locally owned port,
    /// through the release batch for a zero-copy port.
    #[inline]
    pub fn free(&mut self, mbuf: Mbuf) {
        if self.is_zero_copy() {
            self.release(mbuf);
        } else {
            drop(mbuf);
        }
    }

    /// Flush the pending partial batch.
    pub fn flush(&mut self) -> usize {
        self.batch.flush(&self.path)
    }

    /// Copy `mbuf` into a new buffer from this core's pool.
    pub fn duplicate(&self, mbuf: &Mbuf) -> Option<Mbuf> {
        lifecycle::duplicate(&self.pool, mbuf)
    }

    // ==================== Diagnostics ====================

    /// Trace `mbuf` to the log sink.
    pub fn log_buffer(&mut self, mbuf: &Mbuf, tag: &str) -> io::Result<()> {
        let now = self.ticks.now();
        diag::log_buffer(&mut self.log, now, mbuf, tag)
    }

    /// Trace `mbuf` to stdout, leaving the log sink in place.
    pub fn print_buffer(&mut self, mbuf: &Mbuf, tag: &str) -> io::Result<()> {
        let now = self.ticks.now();
        diag::print_buffer(&mut self.log, now, mbuf, tag)
    }

    /// Temporarily swap the log sink, e.g. to capture traces.
    pub fn redirect_log(&mut self, out: Box<dyn io::Write + Send>) -> diag::Redirect<'_> {
        self.log.redirect(out)
    }
}

impl Drop for WorkSpace {
    fn drop(&mut self) {
        let flushed = self.flush();
        if flushed > 0 {
            tracing::debug!(
                port_id = self.port_id,
                queue_id = self.queue_id,
                flushed,
                "Flushed pending releases"
            );
        }
    }
}

impl std::fmt::Debug for WorkSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkSpace")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .field("zero_copy", &self.is_zero_copy())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rte::eal::Environment;
    use crate::api::rte::eth::{EthConf, EthDevBuilder};
    use crate::config::DeviceSpec;
    use crate::pool;
    use crate::soft::{SoftEnv, SoftNet};

    fn bring_up(env: &SoftEnv, net: &Arc<SoftNet>, config: &Config, port: &mut PortConfig) {
        let pool = pool::create_pool(env, net.as_ref(), config, "ws", port.id, 0).unwrap();
        port.pools.push(pool);
        let dev = EthDevBuilder::new(port.id)
            .eth_conf(EthConf::new())
            .setup(net.clone(), &port.pools)
            .unwrap();
        dev.start().unwrap();
    }

    #[test]
    fn test_free_and_drop_flush() {
        let env = SoftEnv::new().pin_threads(false);
        env.init(&["t".to_string()]).unwrap();
        let net = Arc::new(SoftNet::new().port(0, 0).zero_copy_port(1, 0));
        let config = Config::new(vec![0]).mbufs_per_pool(64).free_batch_size(16);

        let mut owned = PortConfig::new(0, DeviceSpec::Vdev("net_ring0".into()));
        let mut shared =
            PortConfig::new(1, DeviceSpec::Vdev("net_ring1".into())).zero_copy_client(true);
        bring_up(&env, &net, &config, &mut owned);
        bring_up(&env, &net, &config, &mut shared);

        let mut ws = WorkSpace::new(net.clone(), &config, &owned, 0).unwrap();
        assert!(!ws.is_zero_copy());
        let m = ws.alloc().unwrap();
        ws.free(m);
        assert_eq!(ws.pending(), 0);
        assert_eq!(ws.pool().in_use_count(), 0);

        let mut zc = WorkSpace::new(net.clone(), &config, &shared, 0).unwrap();
        assert!(zc.is_zero_copy());
        let mut burst = Burst::new();
        assert_eq!(zc.alloc_zero_copy(&mut burst, 5), 32);
        for m in burst.drain(..) {
            zc.free(m);
        }
        // Two full batches went out, none pending.
        assert_eq!(zc.batch().flushes(), 2);
        assert_eq!(zc.pending(), 0);

        let m = zc.alloc().unwrap();
        zc.release(m);
        assert_eq!(zc.pending(), 1);
        let pool = zc.pool().clone();
        drop(zc);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(net.stats(1).map(|s| s.reclaimed), Some(33));
        env.cleanup().unwrap();
    }

    #[test]
    fn test_missing_pool() {
        let net = Arc::new(SoftNet::new().port(0, 0));
        let config = Config::new(vec![0]);
        let port = PortConfig::new(0, DeviceSpec::Vdev("net_ring0".into()));
        assert!(matches!(
            WorkSpace::new(net, &config, &port, 0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
