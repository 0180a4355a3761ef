//! Buffer pool factory: one NUMA-local pool per port and queue.

use crate::api::rte::eal::Environment;
use crate::api::rte::eth::{EthDriver, PortId, QueueId};
use crate::api::rte::pktmbuf::{
    JUMBO_MBUF_SIZE, MBUF_DEFAULT_BUF_SIZE, MEMPOOL_CACHE_MAX_SIZE, MemPool, MemPoolConfig,
};
use crate::config::Config;

/// Name hint used for the per-queue receive pools.
pub const RX_POOL_HINT: &str = "mbuf_pool";

/// Pool name for a port/queue pair.
pub fn pool_name(hint: &str, port: PortId, queue: QueueId) -> String {
    format!("{hint}_{port}_{queue}")
}

/// Pool settings for the configured frame mode on `socket_id`.
pub fn pool_config(config: &Config, socket_id: i32) -> MemPoolConfig {
    let data_room = if config.jumbo {
        JUMBO_MBUF_SIZE
    } else {
        MBUF_DEFAULT_BUF_SIZE
    };
    MemPoolConfig::new()
        .num_mbufs(config.mbufs_per_pool)
        .cache_size(MEMPOOL_CACHE_MAX_SIZE)
        .data_room_size(data_room)
        .socket_id(socket_id)
}

/// Create the pool for `port`/`queue` on the port's socket.
///
/// Returns `None` (after logging) when the environment cannot back it.
pub fn create_pool(
    env: &dyn Environment,
    driver: &dyn EthDriver,
    config: &Config,
    hint: &str,
    port: PortId,
    queue: QueueId,
) -> Option<MemPool> {
    let socket_id = driver.socket_id(port);
    let name = pool_name(hint, port, queue);
    let pool_conf = pool_config(config, socket_id);

    match MemPool::create(env, &name, &pool_conf) {
        Ok(pool) => {
            tracing::debug!(
                name = %name,
                socket_id,
                num_mbufs = pool_conf.num_mbufs,
                data_room = pool_conf.data_room_size,
                "Created buffer pool"
            );
            Some(pool)
        }
        Err(e) => {
            tracing::error!(name = %name, socket_id, error = %e, "Buffer pool creation failed");
            None
        }
    }
}
