//! Buffer lifecycle tests: free batching, zero-copy release and allocation.

use std::sync::Arc;

use trafgen_rt::api::rte::eth::{EthConf, EthDevBuilder};
use trafgen_rt::api::rte::mbuf::ReleaseState;
use trafgen_rt::api::rte::queue::{Burst, TxQueue};
use trafgen_rt::lifecycle::{self, FreeBatch, ReleasePath};
use trafgen_rt::soft::SoftEnv;
use trafgen_rt::{Config, DeviceSpec, PortConfig, WorkSpace};
use trafgen_rt_test::driver::RecordingDriver;
use trafgen_rt_test::packet::{TcpSegment, to_mbuf};
use trafgen_rt_test::util::{soft_env, test_pool};

struct Fixture {
    env: SoftEnv,
    driver: Arc<RecordingDriver>,
    config: Config,
    port: PortConfig,
}

impl Fixture {
    fn new(zero_copy: bool) -> Self {
        let env = soft_env(&[]);
        let driver = Arc::new(RecordingDriver::new(0));
        let config = Config::new(vec![0]);
        let mut port =
            PortConfig::new(0, DeviceSpec::Vdev("net_ring0".into())).zero_copy_client(zero_copy);
        port.pools.push(test_pool(&env, "lifecycle"));
        EthDevBuilder::new(0)
            .eth_conf(EthConf::new())
            .setup(driver.clone(), &port.pools)
            .unwrap()
            .start()
            .unwrap();
        Self {
            env,
            driver,
            config,
            port,
        }
    }

    fn workspace(&self) -> WorkSpace {
        WorkSpace::new(self.driver.clone(), &self.config, &self.port, 0).unwrap()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = trafgen_rt::api::rte::eal::Environment::cleanup(&self.env);
    }
}

/// Test: 64 releases flush once; a 65th stays pending
#[test]
fn test_release_batch_of_64() {
    let fx = Fixture::new(false);
    let mut ws = fx.workspace();
    let pool = ws.pool().clone();

    for i in 0..63 {
        assert_eq!(ws.release(ws.alloc().unwrap()), 0, "release {i}");
    }
    assert_eq!(ws.pending(), 63);
    assert_eq!(pool.in_use_count(), 63);

    assert_eq!(ws.release(ws.alloc().unwrap()), 64);
    assert_eq!(ws.pending(), 0);
    assert_eq!(ws.batch().flushes(), 1);
    assert_eq!(pool.in_use_count(), 0);

    ws.release(ws.alloc().unwrap());
    assert_eq!(ws.pending(), 1);
    assert_eq!(ws.batch().flushes(), 1);
    // Locally owned buffers never touch the TX queue.
    assert_eq!(fx.driver.transmitted(), 0);

    drop(ws);
    assert_eq!(pool.in_use_count(), 0);
}

/// Test: Zero-copy frees are tagged and transmitted, never pooled directly
#[test]
fn test_zero_copy_release_transmits() {
    let fx = Fixture::new(true);
    let mut ws = fx.workspace();
    assert!(ws.is_zero_copy());
    let pool = ws.pool().clone();

    let mut burst = Burst::new();
    assert_eq!(ws.alloc_zero_copy(&mut burst, 64), 64);
    for m in burst.drain(..) {
        ws.free(m);
    }

    assert_eq!(fx.driver.tx_calls(), vec![64]);
    assert_eq!(fx.driver.tagged(), 64);
    assert_eq!(pool.in_use_count(), 0);

    let m = ws.alloc().unwrap();
    ws.free(m);
    assert_eq!(ws.pending(), 1);
    assert_eq!(fx.driver.tagged(), 64);

    drop(ws);
    assert_eq!(fx.driver.tagged(), 65);
    assert_eq!(pool.in_use_count(), 0);
}

/// Test: Transmit-for-release keeps retrying until every buffer is taken
#[test]
fn test_transmit_for_release_partial_acceptance() {
    let fx = Fixture::new(true);
    let txq = TxQueue::new(fx.driver.clone(), 0, 0);
    let pool = fx.port.pools[0].clone();

    let mut burst = Burst::new();
    pool.fill_batch(&mut burst);
    burst.truncate(10);
    lifecycle::tag_for_release(&mut burst);
    assert!(
        burst
            .iter()
            .all(|m| m.state() == ReleaseState::PendingTransmitRelease)
    );

    fx.driver.script_tx(&[3, 5, 2]);
    assert_eq!(lifecycle::transmit_for_release(&txq, &mut burst), 10);
    assert!(burst.is_empty());
    assert_eq!(fx.driver.tx_calls(), vec![3, 5, 2]);
    assert_eq!(fx.driver.tagged(), 10);
    assert_eq!(pool.in_use_count(), 0);
}

/// Test: A stalled queue is retried rather than dropped
#[test]
fn test_transmit_for_release_rides_out_stalls() {
    let fx = Fixture::new(true);
    let path = ReleasePath::Transmit(TxQueue::new(fx.driver.clone(), 0, 0));
    let pool = fx.port.pools[0].clone();

    fx.driver.script_tx(&[0, 0, 4, 0, 0, 0, 4]);
    let mut batch = FreeBatch::new(8);
    let mut flushed = 0;
    for _ in 0..8 {
        flushed += batch.release(pool.try_alloc().unwrap(), &path);
    }
    assert_eq!(flushed, 8);
    assert_eq!(fx.driver.tx_calls(), vec![0, 0, 4, 0, 0, 0, 4]);
    assert_eq!(pool.in_use_count(), 0);
}

/// Test: Zero-copy allocation requests are padded
#[test]
fn test_alloc_zero_copy_padding() {
    let fx = Fixture::new(true);
    let ws = fx.workspace();

    // Above the threshold: the driver picks the count.
    let mut burst = Burst::new();
    assert_eq!(ws.alloc_zero_copy(&mut burst, 40000), 64);
    burst.clear();

    // 100 rounds up to 128; one burst holds 64.
    assert_eq!(ws.alloc_zero_copy(&mut burst, 100), 64);
    burst.clear();

    assert_eq!(ws.alloc_zero_copy(&mut burst, 5), 32);
    assert_eq!(fx.driver.rx_requests(), vec![0, 128, 32]);
    assert!(burst.iter().all(|m| m.port() == 0));
}

/// Test: A duplicate is an independent copy from the core's pool
#[test]
fn test_duplicate() {
    let fx = Fixture::new(false);
    let ws = fx.workspace();

    let frame = TcpSegment {
        syn: true,
        payload_len: 32,
        ..Default::default()
    }
    .build();
    let mut src = to_mbuf(ws.pool(), &frame).unwrap();
    src.set_port(3);

    let mut copy = ws.duplicate(&src).unwrap();
    assert_eq!(copy.data(), &frame[..]);
    assert_eq!(copy.port(), 3);
    assert!(ws.pool().owns(&copy));

    copy.data_mut()[0] ^= 0xff;
    assert_eq!(src.data(), &frame[..]);
    assert_eq!(ws.pool().in_use_count(), 2);
}

/// Test: Duplicating from an exhausted pool fails cleanly
#[test]
fn test_duplicate_exhausted() {
    let fx = Fixture::new(false);
    let ws = fx.workspace();
    let mut held = Vec::new();
    while let Some(m) = ws.alloc() {
        held.push(m);
    }
    assert!(ws.duplicate(&held[0]).is_none());
}
