//! In-process environment: one OS thread per worker lcore.
//!
//! The thread that calls [`Environment::init`] becomes lcore 0. Every other
//! lcore named in `--lcores` gets a thread (pinned to its CPU unless pinning
//! is turned off) that waits on a channel for jobs from
//! [`Environment::remote_launch`].

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::api::rte::eal::{Environment, SimdWidth};
use crate::api::rte::lcore::{LCORE_ID_ANY, Lcore, LcoreJob, MAX_LCORE, State};
use crate::api::{Errno, Result};

/// Cycle counter frequency reported by the software clock (nanoseconds).
pub const SOFT_TSC_HZ: u64 = 1_000_000_000;

const MB: usize = 1024 * 1024;

thread_local! {
    static CURRENT_LCORE: Cell<u32> = const { Cell::new(LCORE_ID_ANY) };
}

struct LcoreSlot {
    lcore: Lcore,
    cpu: u32,
    state: Arc<AtomicI32>,
    /// `None` for the main lcore, which runs on the caller's thread.
    jobs: Option<Sender<LcoreJob>>,
    results: Option<Receiver<i32>>,
}

/// Settings parsed from the startup arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftArgs {
    /// `(lcore id, cpu)` in the order given.
    pub lcores: Vec<(u32, u32)>,
    /// Per-socket budget in MB.
    pub socket_mem: Option<Vec<usize>>,
    pub file_prefix: Option<String>,
    pub log_level: Option<u8>,
    pub no_telemetry: bool,
    pub no_pci: bool,
    pub pci: Vec<String>,
    pub vdevs: Vec<String>,
}

impl SoftArgs {
    /// Parse an argument vector; `args[0]` is the program path.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = SoftArgs::default();
        let mut iter = args.iter().skip(1);

        while let Some(arg) = iter.next() {
            if let Some(value) = arg.strip_prefix("--lcores=") {
                parsed.lcores = parse_lcores(value)?;
            } else if let Some(value) = arg.strip_prefix("--socket-mem=") {
                let amounts = value
                    .split(',')
                    .map(|mb| mb.trim().parse::<usize>().map_err(|_| Errno::EINVAL))
                    .collect::<Result<Vec<_>>>()?;
                parsed.socket_mem = Some(amounts);
            } else if let Some(value) = arg.strip_prefix("--file-prefix=") {
                if value.is_empty() {
                    return Err(Errno::EINVAL);
                }
                parsed.file_prefix = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("--log-level=") {
                parsed.log_level = Some(value.parse().map_err(|_| Errno::EINVAL)?);
            } else if let Some(value) = arg.strip_prefix("--vdev=") {
                parsed.vdevs.push(value.to_string());
            } else if arg == "-a" {
                let addr = iter.next().ok_or(Errno::EINVAL)?;
                parsed.pci.push(addr.clone());
            } else if arg == "--no-telemetry" {
                parsed.no_telemetry = true;
            } else if arg == "--no-pci" {
                parsed.no_pci = true;
            } else {
                tracing::error!(arg = %arg, "Unknown environment argument");
                return Err(Errno::EINVAL);
            }
        }

        if parsed.lcores.is_empty() {
            parsed.lcores.push((0, 0));
        }
        Ok(parsed)
    }
}

fn parse_lcores(value: &str) -> Result<Vec<(u32, u32)>> {
    let mut lcores = Vec::new();
    for entry in value.split(',') {
        let (id, cpu) = entry.split_once('@').ok_or(Errno::EINVAL)?;
        let cpu = cpu
            .strip_prefix('(')
            .and_then(|c| c.strip_suffix(')'))
            .unwrap_or(cpu);
        let id: u32 = id.parse().map_err(|_| Errno::EINVAL)?;
        let cpu: u32 = cpu.parse().map_err(|_| Errno::EINVAL)?;
        if id as usize >= MAX_LCORE || lcores.iter().any(|(i, _)| *i == id) {
            return Err(Errno::EINVAL);
        }
        lcores.push((id, cpu));
    }
    Ok(lcores)
}

struct Running {
    args: Vec<String>,
    parsed: SoftArgs,
    lcores: Vec<LcoreSlot>,
    threads: Vec<JoinHandle<()>>,
    reservations: HashMap<String, (usize, usize)>,
    used: Vec<usize>,
}

impl Running {
    fn slot(&self, lcore: Lcore) -> Option<&LcoreSlot> {
        self.lcores.iter().find(|s| s.lcore == lcore)
    }
}

/// Software [`Environment`].
pub struct SoftEnv {
    pin: bool,
    simd: Mutex<SimdWidth>,
    running: Mutex<Option<Running>>,
}

impl Default for SoftEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftEnv {
    pub fn new() -> Self {
        Self {
            pin: true,
            simd: Mutex::new(SimdWidth::Default),
            running: Mutex::new(None),
        }
    }

    /// Whether lcore threads are pinned to their CPUs (default `true`).
    pub fn pin_threads(mut self, pin: bool) -> Self {
        self.pin = pin;
        self
    }

    /// Arguments of the current run, if initialized.
    pub fn args(&self) -> Option<Vec<String>> {
        self.lock().as_ref().map(|r| r.args.clone())
    }

    /// Parsed settings of the current run, if initialized.
    pub fn settings(&self) -> Option<SoftArgs> {
        self.lock().as_ref().map(|r| r.parsed.clone())
    }

    /// SIMD width fixed before startup.
    pub fn simd_width(&self) -> SimdWidth {
        *self.simd.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bytes reserved on a socket.
    pub fn reserved_bytes(&self, socket_id: usize) -> usize {
        self.lock()
            .as_ref()
            .and_then(|r| r.used.get(socket_id).copied())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(&self, lcore: Lcore, cpu: u32) -> Result<(LcoreSlot, JoinHandle<()>)> {
        let (job_tx, job_rx) = unbounded::<LcoreJob>();
        let (ret_tx, ret_rx) = unbounded::<i32>();
        let state = Arc::new(AtomicI32::new(State::Wait as i32));
        let thread_state = state.clone();
        let pin = self.pin;

        let handle = std::thread::Builder::new()
            .name(format!("lcore-worker-{}", lcore.id()))
            .spawn(move || {
                CURRENT_LCORE.with(|c| c.set(lcore.id()));
                if pin {
                    pin_to_cpu(cpu);
                }
                for job in job_rx.iter() {
                    let ret = match catch_unwind(AssertUnwindSafe(job)) {
                        Ok(ret) => ret,
                        Err(_) => {
                            tracing::error!(lcore = lcore.id(), "Lcore job panicked");
                            -1
                        }
                    };
                    thread_state.store(State::Finished as i32, Ordering::Release);
                    if ret_tx.send(ret).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| {
                tracing::error!(lcore = lcore.id(), error = %e, "Failed to spawn lcore thread");
                Errno::EAGAIN
            })?;

        Ok((
            LcoreSlot {
                lcore,
                cpu,
                state,
                jobs: Some(job_tx),
                results: Some(ret_rx),
            },
            handle,
        ))
    }
}

fn pin_to_cpu(cpu: u32) {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    let pinned = set
        .set(cpu as usize)
        .and_then(|_| sched_setaffinity(Pid::from_raw(0), &set));
    if let Err(e) = pinned {
        tracing::warn!(cpu, error = %e, "Failed to pin thread, running unpinned");
    }
}

impl Environment for SoftEnv {
    fn init(&self, args: &[String]) -> Result<()> {
        let mut running = self.lock();
        if running.is_some() {
            return Err(Errno::EALREADY);
        }

        let parsed = SoftArgs::parse(args)?;
        let sockets = parsed.socket_mem.as_ref().map_or(1, |m| m.len().max(1));

        let mut lcores = Vec::with_capacity(parsed.lcores.len());
        let mut threads = Vec::new();
        for (index, &(id, cpu)) in parsed.lcores.iter().enumerate() {
            let lcore = Lcore::new(id);
            if index == 0 {
                CURRENT_LCORE.with(|c| c.set(id));
                if self.pin {
                    pin_to_cpu(cpu);
                }
                lcores.push(LcoreSlot {
                    lcore,
                    cpu,
                    state: Arc::new(AtomicI32::new(State::Wait as i32)),
                    jobs: None,
                    results: None,
                });
                continue;
            }
            match self.spawn_worker(lcore, cpu) {
                Ok((slot, handle)) => {
                    lcores.push(slot);
                    threads.push(handle);
                }
                Err(e) => {
                    // Closing the job channels lets the spawned threads exit.
                    drop(lcores);
                    for t in threads {
                        let _ = t.join();
                    }
                    CURRENT_LCORE.with(|c| c.set(LCORE_ID_ANY));
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            lcores = lcores.len(),
            file_prefix = ?parsed.file_prefix,
            "Software environment up"
        );

        *running = Some(Running {
            args: args.to_vec(),
            parsed,
            lcores,
            threads,
            reservations: HashMap::new(),
            used: vec![0; sockets],
        });
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let Some(running) = self.lock().take() else {
            return Ok(());
        };
        let Running { lcores, threads, .. } = running;
        drop(lcores);
        for t in threads {
            if t.join().is_err() {
                tracing::warn!("Lcore thread exited abnormally");
            }
        }
        CURRENT_LCORE.with(|c| c.set(LCORE_ID_ANY));
        Ok(())
    }

    fn set_max_simd_bitwidth(&self, width: SimdWidth) {
        *self.simd.lock().unwrap_or_else(PoisonError::into_inner) = width;
    }

    fn main_lcore(&self) -> Lcore {
        self.lock()
            .as_ref()
            .and_then(|r| r.lcores.first().map(|s| s.lcore))
            .unwrap_or(Lcore::new(0))
    }

    fn lcores(&self) -> Vec<Lcore> {
        let mut lcores: Vec<Lcore> = self
            .lock()
            .as_ref()
            .map(|r| r.lcores.iter().map(|s| s.lcore).collect())
            .unwrap_or_default();
        lcores.sort();
        lcores
    }

    fn current_lcore(&self) -> Option<Lcore> {
        let id = CURRENT_LCORE.with(|c| c.get());
        (id != LCORE_ID_ANY).then(|| Lcore::new(id))
    }

    fn lcore_socket_id(&self, _lcore: Lcore) -> u32 {
        0
    }

    fn lcore_cpu_id(&self, lcore: Lcore) -> Option<u32> {
        self.lock().as_ref()?.slot(lcore).map(|s| s.cpu)
    }

    fn lcore_state(&self, lcore: Lcore) -> State {
        self.lock()
            .as_ref()
            .and_then(|r| r.slot(lcore))
            .map(|s| State::from(s.state.load(Ordering::Acquire)))
            .unwrap_or(State::Wait)
    }

    fn remote_launch(&self, lcore: Lcore, job: LcoreJob) -> Result<()> {
        let running = self.lock();
        let slot = running
            .as_ref()
            .ok_or(Errno::ENODEV)?
            .slot(lcore)
            .ok_or(Errno::EINVAL)?;
        let jobs = slot.jobs.as_ref().ok_or(Errno::EINVAL)?;

        if slot
            .state
            .compare_exchange(
                State::Wait as i32,
                State::Running as i32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Errno::EBUSY);
        }

        if jobs.send(job).is_err() {
            slot.state.store(State::Wait as i32, Ordering::Release);
            return Err(Errno::EPIPE);
        }
        Ok(())
    }

    fn wait_lcore(&self, lcore: Lcore) -> i32 {
        let (state, results) = {
            let running = self.lock();
            let Some(slot) = running.as_ref().and_then(|r| r.slot(lcore)) else {
                return 0;
            };
            let Some(results) = slot.results.clone() else {
                return 0;
            };
            (slot.state.clone(), results)
        };

        if State::from(state.load(Ordering::Acquire)) == State::Wait {
            return 0;
        }
        let ret = results.recv().unwrap_or_else(|_| {
            tracing::error!(lcore = lcore.id(), "Lcore thread is gone");
            -1
        });
        state.store(State::Wait as i32, Ordering::Release);
        ret
    }

    fn tsc_hz(&self) -> u64 {
        SOFT_TSC_HZ
    }

    fn reserve_memory(&self, name: &str, socket_id: i32, bytes: usize) -> Result<()> {
        let mut running = self.lock();
        let running = running.as_mut().ok_or(Errno::ENODEV)?;
        if running.reservations.contains_key(name) {
            return Err(Errno::EEXIST);
        }

        let socket = socket_id.max(0) as usize;
        if let Some(budget) = &running.parsed.socket_mem {
            let limit = budget.get(socket).copied().unwrap_or(0) * MB;
            let used = running.used.get(socket).copied().unwrap_or(0);
            if used + bytes > limit {
                tracing::debug!(name, socket, bytes, used, limit, "Socket memory exhausted");
                return Err(Errno::ENOMEM);
            }
        }

        if running.used.len() <= socket {
            running.used.resize(socket + 1, 0);
        }
        running.used[socket] += bytes;
        running.reservations.insert(name.to_string(), (socket, bytes));
        Ok(())
    }
}

impl Drop for SoftEnv {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
