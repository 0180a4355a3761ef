//! Loopback traffic generator
//!
//! Drives the poll-mode runtime end to end on the software provider: every
//! lcore builds TCP SYN frames, transmits them on its queue of each port,
//! receives the looped-back frames and releases them through its free batch.
//!
//! # Usage
//!
//! ```bash
//! # Two lcores, one port, run for 5 seconds
//! trafgen-loopback --cpus 0,1 --duration 5
//!
//! # Zero-copy client ports, trace the first 4 frames per lcore
//! trafgen-loopback --cpus 0,1,2 --ports 2 --zero-copy --trace 4
//!
//! # Until Ctrl+C
//! trafgen-loopback --duration 0
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Address, Ipv4Packet,
    TcpPacket, TcpSeqNumber,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trafgen_rt::api::rte::eal::LogLevel;
use trafgen_rt::api::rte::lcore::Lcore;
use trafgen_rt::api::rte::mbuf::Mbuf;
use trafgen_rt::api::rte::queue::Burst;
use trafgen_rt::soft::{SoftEnv, SoftNet, SoftTicks};
use trafgen_rt::{Config, DeviceSpec, FlowMode, PortConfig, Runtime, WorkSpace, diag};

const FRAME_LEN: usize = 14 + 20 + 20;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Flow {
    /// No steering
    None,
    /// One-way traffic, no return-path steering
    OneWay,
    /// Directed flow steering
    Fdir,
}

impl From<Flow> for FlowMode {
    fn from(flow: Flow) -> Self {
        match flow {
            Flow::None => FlowMode::None,
            Flow::OneWay => FlowMode::OneWay,
            Flow::Fdir => FlowMode::Fdir,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "trafgen-loopback")]
#[command(about = "Loopback traffic generator on the software poll-mode provider")]
struct Args {
    /// CPUs to run on; lcore i runs on the i-th CPU and serves queue i
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    cpus: Vec<u32>,

    /// Number of loopback ports
    #[arg(short, long, default_value = "1")]
    ports: u16,

    /// Treat ports as zero-copy clients
    #[arg(long)]
    zero_copy: bool,

    /// Seconds to run; 0 runs until Ctrl+C
    #[arg(short, long, default_value = "2")]
    duration: u64,

    /// Buffers per pool
    #[arg(long, default_value = "4096")]
    mbufs_per_pool: u32,

    /// Per-socket memory in MB, e.g. "512,512"
    #[arg(long)]
    socket_mem: Option<String>,

    /// Backing-file prefix (derived from the pid when unset)
    #[arg(long)]
    file_prefix: Option<String>,

    /// Use jumbo frames
    #[arg(long)]
    jumbo: bool,

    /// Allow 512-bit SIMD paths
    #[arg(long)]
    simd512: bool,

    /// Flow-steering mode
    #[arg(long, value_enum, default_value = "none")]
    flow: Flow,

    /// Environment log level (1-8)
    #[arg(long, default_value = "7")]
    log_level: u8,

    /// Trace the first N received frames on each lcore
    #[arg(long, default_value = "0")]
    trace: u32,

    /// Pin lcore threads to their CPUs
    #[arg(long)]
    pin: bool,
}

impl Args {
    fn config(&self) -> Config {
        let queues = self.cpus.len() as u16;
        let mut config = Config::new(self.cpus.clone())
            .mbufs_per_pool(self.mbufs_per_pool)
            .jumbo(self.jumbo)
            .simd512(self.simd512)
            .flow(self.flow.into())
            .log_level(LogLevel::Level(self.log_level));
        if let Some(mem) = &self.socket_mem {
            config = config.socket_mem(mem.clone());
        }
        if let Some(prefix) = &self.file_prefix {
            config = config.file_prefix(prefix.clone());
        }
        for id in 0..self.ports {
            config = config.port(
                PortConfig::new(id, DeviceSpec::Vdev(format!("net_ring{id}")))
                    .queues(queues)
                    .zero_copy_client(self.zero_copy),
            );
        }
        config
    }
}

/// State shared by every lcore's loop.
struct Generator {
    runtime: Arc<Runtime>,
    config: Config,
    running: Arc<AtomicBool>,
    deadline: Option<Instant>,
    trace: u32,
    sent: AtomicU64,
    received: AtomicU64,
    neighbor: AtomicU64,
}

impl Generator {
    fn keep_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.deadline.is_none_or(|d| Instant::now() < d)
    }
}

/// Write a TCP SYN from `src_port` into `buf`.
fn write_syn(buf: &mut [u8], src_port: u16, seq: u32) {
    let mut frame = EthernetFrame::new_unchecked(&mut *buf);
    frame.set_src_addr(EthernetAddress([0x02, 0, 0, 0, 0, 0x01]));
    frame.set_dst_addr(EthernetAddress([0x02, 0, 0, 0, 0, 0x02]));
    frame.set_ethertype(EthernetProtocol::Ipv4);

    let mut ip = Ipv4Packet::new_unchecked(frame.payload_mut());
    ip.set_version(4);
    ip.set_header_len(20);
    ip.set_total_len(40);
    ip.set_ident(seq as u16);
    ip.clear_flags();
    ip.set_hop_limit(64);
    ip.set_next_header(IpProtocol::Tcp);
    ip.set_src_addr(Ipv4Address::new(10, 0, 0, 1));
    ip.set_dst_addr(Ipv4Address::new(10, 0, 0, 2));
    ip.fill_checksum();

    let mut tcp = TcpPacket::new_unchecked(ip.payload_mut());
    tcp.set_src_port(src_port);
    tcp.set_dst_port(80);
    tcp.set_seq_number(TcpSeqNumber(seq as i32));
    tcp.set_header_len(20);
    tcp.clear_flags();
    tcp.set_syn(true);
    tcp.set_window_len(65535);
}

/// Fill `burst` with fresh frames for `ws`.
fn fill(ws: &WorkSpace, burst: &mut Burst, src_port: u16, seq: &mut u32) {
    if ws.is_zero_copy() {
        let want = burst.remaining_capacity();
        ws.alloc_zero_copy(burst, want);
    } else {
        ws.pool().fill_batch(burst);
    }
    for mbuf in burst.iter_mut() {
        mbuf.reset();
        if let Some(buf) = mbuf.append(FRAME_LEN) {
            write_syn(buf, src_port, *seq);
            *seq = seq.wrapping_add(1);
        }
    }
}

/// Poll `ws` once, handing each received frame to `on_frame` before it is
/// released. Returns the number of frames.
///
/// A zero-copy port tops the burst up with empty peer buffers; those are
/// released without being counted.
fn receive(
    ws: &mut WorkSpace,
    rx: &mut Burst,
    mut on_frame: impl FnMut(&mut WorkSpace, &Mbuf),
) -> u64 {
    ws.rx(rx);
    let mut frames = 0;
    for mbuf in rx.drain(..) {
        if mbuf.data_len() > 0 {
            frames += 1;
            on_frame(ws, &mbuf);
        }
        ws.release(mbuf);
    }
    frames
}

/// Per-lcore generator loop.
fn generate(lcore: Lcore, g: &Generator) -> i32 {
    let queue = lcore.id() as u16;
    let mut spaces = Vec::with_capacity(g.config.ports.len());
    for port in &g.config.ports {
        match g.runtime.workspace(&g.config, port.id, queue) {
            Ok(ws) => spaces.push(ws),
            Err(e) => {
                error!(%lcore, port_id = port.id, error = %e, "No workspace");
                return -1;
            }
        }
    }

    let src_port = 1024 + lcore.id() as u16;
    let mut seq = 0u32;
    let mut traced = 0;
    let (mut sent, mut received, mut neighbor) = (0u64, 0u64, 0u64);
    let mut tx = Burst::new();
    let mut rx = Burst::new();

    while g.keep_running() {
        for ws in spaces.iter_mut() {
            fill(ws, &mut tx, src_port, &mut seq);
            sent += ws.tx(&mut tx) as u64;
            // What the queue did not take goes back.
            for mbuf in tx.drain(..) {
                ws.free(mbuf);
            }

            received += receive(ws, &mut rx, |ws, mbuf| {
                if diag::is_neighbor_discovery(mbuf) {
                    neighbor += 1;
                }
                if traced < g.trace {
                    traced += 1;
                    if let Err(e) = ws.print_buffer(mbuf, "rx") {
                        warn!(%lcore, error = %e, "Trace failed");
                    }
                }
            });
        }
        std::hint::spin_loop();
    }

    g.sent.fetch_add(sent, Ordering::Relaxed);
    g.received.fetch_add(received, Ordering::Relaxed);
    g.neighbor.fetch_add(neighbor, Ordering::Relaxed);
    info!(%lcore, sent, received, "Generator loop done");
    0
}

fn main() -> ExitCode {
    // Initialize tracing - respects RUST_LOG, defaults to info if not set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let mut config = args.config();

    let env = Arc::new(SoftEnv::new().pin_threads(args.pin));
    let mut net = SoftNet::new();
    for id in 0..args.ports {
        net = if args.zero_copy {
            net.zero_copy_port(id, 0)
        } else {
            net.port(id, 0)
        };
    }
    let net = Arc::new(net);
    let runtime = Arc::new(
        Runtime::builder(env, net.clone())
            .ticks(Arc::new(SoftTicks::new()))
            .build(),
    );

    info!(
        cpus = ?args.cpus,
        ports = args.ports,
        zero_copy = args.zero_copy,
        duration = args.duration,
        "Starting loopback generator"
    );

    if let Err(e) = runtime.initialize(&mut config, "trafgen-loopback") {
        error!(error = %e, "Bootstrap failed");
        runtime.shutdown(&mut config);
        return ExitCode::FAILURE;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, shutting down");
        running_clone.store(false, Ordering::Release);
    }) {
        warn!(error = %e, "Failed to set Ctrl+C handler");
    }

    let generator = Arc::new(Generator {
        runtime: runtime.clone(),
        config: config.clone(),
        running,
        deadline: (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration)),
        trace: args.trace,
        sent: AtomicU64::new(0),
        received: AtomicU64::new(0),
        neighbor: AtomicU64::new(0),
    });

    let report = runtime.run(generate, generator.clone());
    let ok = match &report {
        Ok(report) => {
            for (lcore, ret) in report.results() {
                if *ret != 0 {
                    error!(%lcore, ret, "Lcore failed");
                }
            }
            report.all_ok()
        }
        Err(e) => {
            error!(error = %e, "Launch failed");
            false
        }
    };

    info!(
        sent = generator.sent.load(Ordering::Relaxed),
        received = generator.received.load(Ordering::Relaxed),
        neighbor_discovery = generator.neighbor.load(Ordering::Relaxed),
        "Totals"
    );
    for id in net.port_ids() {
        if let Some(stats) = net.stats(id) {
            println!(
                "port {}: ipackets {} opackets {} reclaimed {}",
                id, stats.ipackets, stats.opackets, stats.reclaimed
            );
        }
    }

    // Pools are shared with the generator's config copy.
    drop(generator);
    runtime.shutdown(&mut config);

    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: Only looped-back frames count on a zero-copy port
    #[test]
    fn test_receive_skips_peer_buffers() {
        let env = Arc::new(SoftEnv::new().pin_threads(false));
        let net = Arc::new(SoftNet::new().zero_copy_port(0, 0));
        let runtime = Runtime::builder(env, net).build();
        let mut config = Config::new(vec![0])
            .file_prefix("loopback-rx")
            .mbufs_per_pool(256)
            .port(
                PortConfig::new(0, DeviceSpec::Vdev("net_ring0".into())).zero_copy_client(true),
            );
        runtime.initialize(&mut config, "trafgen-loopback").unwrap();

        let mut ws = runtime.workspace(&config, 0, 0).unwrap();
        let mut tx = Burst::new();
        ws.pool().fill_batch(&mut tx);
        tx.truncate(5);
        for (seq, mbuf) in tx.iter_mut().enumerate() {
            write_syn(mbuf.append(FRAME_LEN).unwrap(), 1024, seq as u32);
        }
        assert_eq!(ws.tx(&mut tx), 5);

        let mut rx = Burst::new();
        let mut lens = Vec::new();
        let frames = receive(&mut ws, &mut rx, |_, mbuf| lens.push(mbuf.data_len()));
        assert_eq!(frames, 5);
        assert_eq!(lens, vec![FRAME_LEN; 5]);
        assert!(rx.is_empty());

        drop(ws);
        runtime.shutdown(&mut config);
    }
}
