//! A scripted [`EthDriver`] that records what the runtime asks of it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use trafgen_rt::api::Errno;
use trafgen_rt::api::rte::eth::{EthConf, EthDriver, PortId, QueueId, RxQueueConf, TxQueueConf};
use trafgen_rt::api::rte::mbuf::ReleaseState;
use trafgen_rt::api::rte::pktmbuf::MemPool;
use trafgen_rt::api::rte::queue::Burst;

/// One call seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Configure { port: PortId, queues: u16, mtu: u32, rss: bool },
    RxSetup { port: PortId, queue: QueueId, pool: String },
    TxSetup { port: PortId, queue: QueueId },
    Start(PortId),
    Stop(PortId),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    pools: HashMap<(PortId, QueueId), MemPool>,
    /// Buffers to accept per `tx_burst` call; everything once exhausted.
    tx_script: VecDeque<usize>,
    tx_calls: Vec<usize>,
    rx_requests: Vec<usize>,
    transmitted: usize,
    tagged: usize,
    fail_start: Option<PortId>,
}

/// Driver whose RX path allocates from the queue's pool and whose TX path
/// follows a script of partial acceptances.
#[derive(Default)]
pub struct RecordingDriver {
    socket_id: i32,
    state: Mutex<State>,
}

impl RecordingDriver {
    pub fn new(socket_id: i32) -> Self {
        Self {
            socket_id,
            state: Mutex::default(),
        }
    }

    /// Accept `counts[i]` buffers on the i-th following `tx_burst` call.
    pub fn script_tx(&self, counts: &[usize]) {
        self.lock().tx_script.extend(counts);
    }

    /// Make `start` fail for `port`.
    pub fn fail_start(&self, port: PortId) {
        self.lock().fail_start = Some(port);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Accepted count of every `tx_burst` call, in order.
    pub fn tx_calls(&self) -> Vec<usize> {
        self.lock().tx_calls.clone()
    }

    /// The `max` passed to every `rx_burst` call, in order.
    pub fn rx_requests(&self) -> Vec<usize> {
        self.lock().rx_requests.clone()
    }

    pub fn transmitted(&self) -> usize {
        self.lock().transmitted
    }

    /// Transmitted buffers that carried the release tag.
    pub fn tagged(&self) -> usize {
        self.lock().tagged
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EthDriver for RecordingDriver {
    fn socket_id(&self, _port: PortId) -> i32 {
        self.socket_id
    }

    fn configure(&self, port: PortId, nb_rx: u16, _nb_tx: u16, conf: &EthConf) -> Result<(), Errno> {
        self.lock().calls.push(Call::Configure {
            port,
            queues: nb_rx,
            mtu: conf.mtu,
            rss: conf.rss,
        });
        Ok(())
    }

    fn rx_queue_setup(
        &self,
        port: PortId,
        queue: QueueId,
        _conf: &RxQueueConf,
        pool: &MemPool,
    ) -> Result<(), Errno> {
        let mut state = self.lock();
        state.calls.push(Call::RxSetup {
            port,
            queue,
            pool: pool.name().to_string(),
        });
        state.pools.insert((port, queue), pool.clone());
        Ok(())
    }

    fn tx_queue_setup(&self, port: PortId, queue: QueueId, _conf: &TxQueueConf) -> Result<(), Errno> {
        self.lock().calls.push(Call::TxSetup { port, queue });
        Ok(())
    }

    fn start(&self, port: PortId) -> Result<(), Errno> {
        let mut state = self.lock();
        state.calls.push(Call::Start(port));
        if state.fail_start == Some(port) {
            return Err(Errno::EIO);
        }
        Ok(())
    }

    fn stop(&self, port: PortId) -> Result<(), Errno> {
        self.lock().calls.push(Call::Stop(port));
        Ok(())
    }

    fn rx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Burst, max: usize) -> usize {
        let mut state = self.lock();
        state.rx_requests.push(max);
        let Some(pool) = state.pools.get(&(port, queue)).cloned() else {
            return 0;
        };
        drop(state);

        let room = pkts.remaining_capacity();
        let want = if max == 0 { room } else { max.min(room) };
        let mut received = 0;
        while received < want {
            let Some(mut mbuf) = pool.try_alloc() else {
                break;
            };
            mbuf.set_port(port);
            pkts.push(mbuf);
            received += 1;
        }
        received
    }

    fn tx_burst(&self, _port: PortId, _queue: QueueId, pkts: &mut Burst) -> usize {
        let mut state = self.lock();
        let accept = state
            .tx_script
            .pop_front()
            .unwrap_or(pkts.len())
            .min(pkts.len());
        state.tx_calls.push(accept);
        state.transmitted += accept;

        for mut mbuf in pkts.drain(..accept) {
            if mbuf.state() == ReleaseState::PendingTransmitRelease {
                state.tagged += 1;
                // The peer reclaims the buffer.
                mbuf.set_state(ReleaseState::Free);
            }
        }
        accept
    }
}
