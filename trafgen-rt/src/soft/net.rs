//! Loopback ports for the software provider.
//!
//! Each queue owns one ring sized by the RX descriptor count. TX pushes onto
//! the ring and RX pops from it, so a port receives exactly what it sent.
//! A full ring stops a TX burst short, which is how back-pressure shows up.
//!
//! Buffers stamped [`ReleaseState::PendingTransmitRelease`] never reach the
//! ring: the simulated zero-copy peer takes them on TX, clears the tag and
//! hands them back to their pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossbeam::queue::ArrayQueue;

use crate::api::rte::eth::{
    EthConf, EthDriver, JUMBO_MTU, PortId, QueueId, RxQueueConf, TxQueueConf,
};
use crate::api::rte::mbuf::{Mbuf, ReleaseState};
use crate::api::rte::pktmbuf::MemPool;
use crate::api::rte::queue::Burst;
use crate::api::{Errno, Result};

/// Per-port counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub ipackets: u64,
    pub opackets: u64,
    /// Buffers taken back by the zero-copy peer.
    pub reclaimed: u64,
}

#[derive(Default)]
struct Counters {
    ipackets: AtomicU64,
    opackets: AtomicU64,
    reclaimed: AtomicU64,
}

#[derive(Default)]
struct SoftQueue {
    ring: Option<ArrayQueue<Mbuf>>,
    pool: Option<MemPool>,
    tx_ready: bool,
}

struct SoftPort {
    socket_id: i32,
    zero_copy: bool,
    mtu: u32,
    queues: Vec<SoftQueue>,
    started: bool,
    counters: Counters,
}

impl SoftPort {
    fn new(socket_id: i32, zero_copy: bool) -> Self {
        Self {
            socket_id,
            zero_copy,
            mtu: 0,
            queues: Vec::new(),
            started: false,
            counters: Counters::default(),
        }
    }

    fn queue_mut(&mut self, queue: QueueId) -> Result<&mut SoftQueue> {
        if self.started {
            return Err(Errno::EBUSY);
        }
        self.queues.get_mut(queue as usize).ok_or(Errno::EINVAL)
    }
}

/// Software [`EthDriver`] with loopback ports.
///
/// # Example
/// ```
/// use trafgen_rt::soft::SoftNet;
///
/// let net = SoftNet::new().port(0, 0).zero_copy_port(1, 0);
/// assert_eq!(net.port_ids(), vec![0, 1]);
/// ```
#[derive(Default)]
pub struct SoftNet {
    ports: RwLock<HashMap<PortId, SoftPort>>,
}

impl SoftNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loopback port attached to `socket_id`.
    pub fn port(self, id: PortId, socket_id: i32) -> Self {
        self.write().insert(id, SoftPort::new(socket_id, false));
        self
    }

    /// Add a port whose RX path is the zero-copy peer's allocator.
    pub fn zero_copy_port(self, id: PortId, socket_id: i32) -> Self {
        self.write().insert(id, SoftPort::new(socket_id, true));
        self
    }

    /// Known port ids in ascending order.
    pub fn port_ids(&self) -> Vec<PortId> {
        let mut ids: Vec<PortId> = self.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_started(&self, port: PortId) -> bool {
        self.read().get(&port).is_some_and(|p| p.started)
    }

    /// Configured MTU (0 before configure).
    pub fn mtu(&self, port: PortId) -> Option<u32> {
        self.read().get(&port).map(|p| p.mtu)
    }

    pub fn stats(&self, port: PortId) -> Option<PortStats> {
        self.read().get(&port).map(|p| PortStats {
            ipackets: p.counters.ipackets.load(Ordering::Relaxed),
            opackets: p.counters.opackets.load(Ordering::Relaxed),
            reclaimed: p.counters.reclaimed.load(Ordering::Relaxed),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PortId, SoftPort>> {
        self.ports.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PortId, SoftPort>> {
        self.ports.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EthDriver for SoftNet {
    fn socket_id(&self, port: PortId) -> i32 {
        self.read().get(&port).map_or(-1, |p| p.socket_id)
    }

    fn configure(&self, port: PortId, nb_rx: u16, nb_tx: u16, conf: &EthConf) -> Result<()> {
        let mut ports = self.write();
        let p = ports.get_mut(&port).ok_or(Errno::ENODEV)?;
        if p.started {
            return Err(Errno::EBUSY);
        }
        if nb_rx == 0 || nb_rx != nb_tx || conf.mtu == 0 || conf.mtu > JUMBO_MTU {
            return Err(Errno::EINVAL);
        }
        p.mtu = conf.mtu;
        p.queues = (0..nb_rx).map(|_| SoftQueue::default()).collect();
        tracing::debug!(port, nb_rx, nb_tx, mtu = conf.mtu, "Configured loopback port");
        Ok(())
    }

    fn rx_queue_setup(
        &self,
        port: PortId,
        queue: QueueId,
        conf: &RxQueueConf,
        pool: &MemPool,
    ) -> Result<()> {
        if conf.nb_desc == 0 {
            return Err(Errno::EINVAL);
        }
        let mut ports = self.write();
        let q = ports.get_mut(&port).ok_or(Errno::ENODEV)?.queue_mut(queue)?;
        q.ring = Some(ArrayQueue::new(conf.nb_desc as usize));
        q.pool = Some(pool.clone());
        Ok(())
    }

    fn tx_queue_setup(&self, port: PortId, queue: QueueId, conf: &TxQueueConf) -> Result<()> {
        if conf.nb_desc == 0 {
            return Err(Errno::EINVAL);
        }
        let mut ports = self.write();
        let q = ports.get_mut(&port).ok_or(Errno::ENODEV)?.queue_mut(queue)?;
        q.tx_ready = true;
        Ok(())
    }

    fn start(&self, port: PortId) -> Result<()> {
        let mut ports = self.write();
        let p = ports.get_mut(&port).ok_or(Errno::ENODEV)?;
        if p.queues.is_empty() || p.queues.iter().any(|q| q.ring.is_none() || !q.tx_ready) {
            return Err(Errno::EINVAL);
        }
        p.started = true;
        Ok(())
    }

    fn stop(&self, port: PortId) -> Result<()> {
        let mut ports = self.write();
        let p = ports.get_mut(&port).ok_or(Errno::ENODEV)?;
        p.started = false;
        // Frames still in flight go back to their pools.
        for q in &p.queues {
            if let Some(ring) = &q.ring {
                while ring.pop().is_some() {}
            }
        }
        Ok(())
    }

    fn rx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Burst, max: usize) -> usize {
        let ports = self.read();
        let Some(p) = ports.get(&port).filter(|p| p.started) else {
            return 0;
        };
        let Some(q) = p.queues.get(queue as usize) else {
            return 0;
        };

        let room = pkts.remaining_capacity();
        let want = if max == 0 { room } else { max.min(room) };
        let mut received = 0;

        if let Some(ring) = &q.ring {
            while received < want {
                let Some(mbuf) = ring.pop() else { break };
                pkts.push(mbuf);
                received += 1;
            }
        }
        if let (true, Some(pool)) = (p.zero_copy, &q.pool) {
            while received < want {
                let Some(mut mbuf) = pool.try_alloc() else {
                    break;
                };
                mbuf.set_port(port);
                pkts.push(mbuf);
                received += 1;
            }
        }

        p.counters
            .ipackets
            .fetch_add(received as u64, Ordering::Relaxed);
        received
    }

    fn tx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Burst) -> usize {
        let ports = self.read();
        let Some(p) = ports.get(&port).filter(|p| p.started) else {
            return 0;
        };
        let Some(ring) = p.queues.get(queue as usize).and_then(|q| q.ring.as_ref()) else {
            return 0;
        };

        // Accept the longest prefix the ring has room for.
        let mut free = ring.capacity() - ring.len();
        let mut accepted = 0;
        for mbuf in pkts.iter() {
            if mbuf.state() != ReleaseState::PendingTransmitRelease {
                if free == 0 {
                    break;
                }
                free -= 1;
            }
            accepted += 1;
        }

        let mut reclaimed = 0u64;
        for mut mbuf in pkts.drain(..accepted) {
            if mbuf.state() == ReleaseState::PendingTransmitRelease {
                mbuf.set_state(ReleaseState::Free);
                reclaimed += 1;
                continue;
            }
            if let Err(mbuf) = ring.push(mbuf) {
                tracing::warn!(port, queue, "Loopback ring overrun, dropping frame");
                drop(mbuf);
            }
        }

        p.counters
            .opackets
            .fetch_add(accepted as u64, Ordering::Relaxed);
        p.counters.reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
        accepted
    }
}
