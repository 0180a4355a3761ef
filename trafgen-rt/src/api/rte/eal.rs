// Environment (EAL) startup options and the provider seam.
//
// The argument vector is assembled from typed options and length-checked
// against the fixed-size buffers the environment parses them into, so an
// oversized value is rejected before anything is handed to the provider.

use std::fmt::Write as _;

use super::lcore::{Lcore, LcoreJob, State};
use crate::api::Result;

/// Buffer size for single-value flags (`--socket-mem`, `--file-prefix`, `--log-level`).
pub const ARG_LEN: usize = 64;

/// Buffer size for the core-mapping flag (`--lcores`).
pub const LCORES_ARG_LEN: usize = 2048;

/// Well-known startup options as strongly-typed enum variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EalOption {
    /// Core mapping (--lcores=0@(c0),1@(c1),...); index i runs on physical core cpus[i]
    Lcores(Vec<u32>),
    /// Memory per socket in MB (--socket-mem=<amounts>)
    SocketMem(String),
    /// File prefix for backing files (--file-prefix=<prefix>)
    FilePrefix(String),
    /// Log level (--log-level=<level>)
    LogLevel(LogLevel),
    /// Disable the telemetry socket (--no-telemetry)
    NoTelemetry,
    /// Don't scan PCI bus (--no-pci)
    NoPci,
    /// Allow a PCI device (-a <pci_addr>)
    Allow(String),
    /// Add a virtual device (--vdev=<device>)
    Vdev(String),
}

impl EalOption {
    /// Convert to command-line argument strings
    fn to_args(&self) -> Vec<String> {
        match self {
            EalOption::Lcores(cpus) => vec![format_lcores(cpus)],
            EalOption::SocketMem(mem) => vec![format!("--socket-mem={}", mem)],
            EalOption::FilePrefix(prefix) => vec![format!("--file-prefix={}", prefix)],
            EalOption::LogLevel(level) => vec![format!("--log-level={}", level.as_str())],
            EalOption::NoTelemetry => vec!["--no-telemetry".to_string()],
            EalOption::NoPci => vec!["--no-pci".to_string()],
            EalOption::Allow(pci_addr) => vec!["-a".to_string(), pci_addr.clone()],
            EalOption::Vdev(dev) => vec![format!("--vdev={}", dev)],
        }
    }

    /// Flag name and buffer size for options formatted into a fixed buffer.
    fn limit(&self) -> Option<(&'static str, usize)> {
        match self {
            EalOption::Lcores(_) => Some(("--lcores", LCORES_ARG_LEN)),
            EalOption::SocketMem(_) => Some(("--socket-mem", ARG_LEN)),
            EalOption::FilePrefix(_) => Some(("--file-prefix", ARG_LEN)),
            EalOption::LogLevel(_) => Some(("--log-level", ARG_LEN)),
            _ => None,
        }
    }
}

fn format_lcores(cpus: &[u32]) -> String {
    let mut arg = String::from("--lcores=");
    for (index, cpu) in cpus.iter().enumerate() {
        if index > 0 {
            arg.push(',');
        }
        let _ = write!(arg, "{}@({})", index, cpu);
    }
    arg
}

/// Environment log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    /// Custom numeric level (1-8)
    Level(u8),
}

impl LogLevel {
    fn as_str(&self) -> String {
        self.as_u8().to_string()
    }

    /// Numeric level as understood by the environment.
    pub fn as_u8(&self) -> u8 {
        match self {
            LogLevel::Emergency => 1,
            LogLevel::Alert => 2,
            LogLevel::Critical => 3,
            LogLevel::Error => 4,
            LogLevel::Warning => 5,
            LogLevel::Notice => 6,
            LogLevel::Info => 7,
            LogLevel::Debug => 8,
            LogLevel::Level(n) => *n,
        }
    }
}

/// Maximum SIMD register width the environment may select code paths for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimdWidth {
    /// Leave the environment's own choice in place
    #[default]
    Default,
    /// Allow 512-bit vector paths
    Bits512,
}

/// A formatted flag did not fit its fixed-size buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgOverflow {
    pub flag: &'static str,
    pub len: usize,
    pub limit: usize,
}

/// The poll-mode environment: startup, lcore threads, memory, clock.
///
/// This is the seam between the runtime and whatever provides kernel-bypass
/// I/O. [`crate::soft::SoftEnv`] is the in-process implementation.
pub trait Environment: Send + Sync {
    /// Start the environment from an argument vector (`args[0]` is the program path).
    fn init(&self, args: &[String]) -> Result<()>;

    /// Release the environment. Must tolerate being called without `init`.
    fn cleanup(&self) -> Result<()>;

    /// Whether `--no-telemetry` is understood.
    fn supports_telemetry(&self) -> bool {
        true
    }

    /// Fix the SIMD width. Called before `init`.
    fn set_max_simd_bitwidth(&self, width: SimdWidth);

    /// The control lcore (the thread that called `init`).
    fn main_lcore(&self) -> Lcore;

    /// All enabled lcores in id order, main included.
    fn lcores(&self) -> Vec<Lcore>;

    /// The lcore the calling thread runs on, if any.
    fn current_lcore(&self) -> Option<Lcore>;

    /// NUMA socket of an lcore.
    fn lcore_socket_id(&self, lcore: Lcore) -> u32;

    /// Physical CPU an lcore is bound to.
    fn lcore_cpu_id(&self, lcore: Lcore) -> Option<u32>;

    /// Current state of an lcore.
    fn lcore_state(&self, lcore: Lcore) -> State;

    /// Dispatch a job onto a worker lcore. Fails with `EBUSY` if it is running.
    fn remote_launch(&self, lcore: Lcore, job: LcoreJob) -> Result<()>;

    /// Block until the lcore finishes its job and return the job's value.
    fn wait_lcore(&self, lcore: Lcore) -> i32;

    /// Cycle counter frequency.
    fn tsc_hz(&self) -> u64;

    /// Reserve backing memory for a named pool on a socket.
    ///
    /// Fails with `EEXIST` for a name already in use and `ENOMEM` when the
    /// socket cannot supply `bytes`.
    fn reserve_memory(&self, name: &str, socket_id: i32, bytes: usize) -> Result<()>;
}

/// Builder for the startup argument vector.
///
/// # Example
/// ```
/// use trafgen_rt::api::rte::eal::{EalBuilder, LogLevel};
///
/// let args = EalBuilder::new()
///     .program_name("trafgen")
///     .lcores(&[2, 3])
///     .file_prefix("trafgen-1")
///     .log_level(LogLevel::Level(7))
///     .build_args()
///     .unwrap();
/// assert_eq!(args[1], "--lcores=0@(2),1@(3)");
/// ```
#[derive(Debug, Clone, Default)]
pub struct EalBuilder {
    program_name: Option<String>,
    options: Vec<EalOption>,
}

impl EalBuilder {
    /// Create a new builder.
    ///
    /// Program name is auto-detected from `std::env::args()` unless set.
    pub fn new() -> Self {
        Self {
            program_name: None,
            options: Vec::new(),
        }
    }

    /// Set the program name (first argument)
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = Some(name.into());
        self
    }

    /// Map lcore index i onto physical core `cpus[i]` (--lcores)
    pub fn lcores(mut self, cpus: &[u32]) -> Self {
        self.options.push(EalOption::Lcores(cpus.to_vec()));
        self
    }

    /// Set memory per socket in MB (--socket-mem=<amounts>)
    pub fn socket_mem(mut self, mem: impl Into<String>) -> Self {
        self.options.push(EalOption::SocketMem(mem.into()));
        self
    }

    /// Set file prefix (--file-prefix=<prefix>)
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.push(EalOption::FilePrefix(prefix.into()));
        self
    }

    /// Set log level (--log-level=<level>)
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.options.push(EalOption::LogLevel(level));
        self
    }

    /// Add --no-telemetry
    pub fn no_telemetry(mut self) -> Self {
        self.options.push(EalOption::NoTelemetry);
        self
    }

    /// Add --no-pci option (don't scan PCI bus)
    pub fn no_pci(mut self) -> Self {
        self.options.push(EalOption::NoPci);
        self
    }

    /// Allow a PCI device (-a <pci_addr>)
    pub fn allow(mut self, pci_addr: impl Into<String>) -> Self {
        self.options.push(EalOption::Allow(pci_addr.into()));
        self
    }

    /// Add a virtual device (--vdev=<device>)
    pub fn vdev(mut self, device: impl Into<String>) -> Self {
        self.options.push(EalOption::Vdev(device.into()));
        self
    }

    /// The options added so far, in order.
    pub fn options(&self) -> &[EalOption] {
        &self.options
    }

    /// Build and validate the argument list.
    ///
    /// A flag formatted into a fixed buffer must leave room for the
    /// terminator, so a length equal to the buffer size is an overflow.
    pub fn build_args(&self) -> std::result::Result<Vec<String>, ArgOverflow> {
        let mut args = Vec::with_capacity(self.options.len() + 1);

        let program_name = self.program_name.clone().unwrap_or_else(|| {
            std::env::args()
                .next()
                .unwrap_or_else(|| "trafgen".to_string())
        });
        args.push(program_name);

        for opt in &self.options {
            let formatted = opt.to_args();
            if let Some((flag, limit)) = opt.limit() {
                let len = formatted.iter().map(String::len).sum::<usize>();
                if len >= limit {
                    return Err(ArgOverflow { flag, len, limit });
                }
            }
            args.extend(formatted);
        }

        Ok(args)
    }

    /// Validate the arguments and start the environment with them.
    pub fn init(self, env: &dyn Environment) -> std::result::Result<(), crate::Error> {
        let args = self.build_args()?;
        tracing::info!(args = ?args, "Initializing environment");
        env.init(&args).map_err(crate::Error::EnvironmentInit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcores_mapping() {
        for n in 1..=128u32 {
            let cpus: Vec<u32> = (0..n).map(|i| i * 2 + 1).collect();
            let arg = format_lcores(&cpus);
            let entries: Vec<&str> = arg.trim_start_matches("--lcores=").split(',').collect();
            assert_eq!(entries.len(), n as usize);
            for (i, entry) in entries.iter().enumerate() {
                assert_eq!(*entry, format!("{}@({})", i, cpus[i]));
            }
        }
    }

    #[test]
    fn test_build_args_order() {
        let args = EalBuilder::new()
            .program_name("/usr/bin/trafgen")
            .lcores(&[4, 5])
            .socket_mem("1024,1024")
            .file_prefix("run-7")
            .log_level(LogLevel::Level(6))
            .no_telemetry()
            .no_pci()
            .allow("0000:01:00.0")
            .vdev("net_ring0")
            .build_args()
            .unwrap();

        assert_eq!(
            args,
            vec![
                "/usr/bin/trafgen",
                "--lcores=0@(4),1@(5)",
                "--socket-mem=1024,1024",
                "--file-prefix=run-7",
                "--log-level=6",
                "--no-telemetry",
                "--no-pci",
                "-a",
                "0000:01:00.0",
                "--vdev=net_ring0",
            ]
        );
    }

    #[test]
    fn test_socket_mem_overflow() {
        // "--socket-mem=" is 13 bytes; 50 more makes 63 which still fits.
        let fits = "1".repeat(50);
        assert!(EalBuilder::new().socket_mem(fits).build_args().is_ok());

        let too_long = "1".repeat(51);
        let err = EalBuilder::new()
            .socket_mem(too_long)
            .build_args()
            .unwrap_err();
        assert_eq!(
            err,
            ArgOverflow {
                flag: "--socket-mem",
                len: 64,
                limit: ARG_LEN
            }
        );
    }

    #[test]
    fn test_lcores_overflow() {
        let cpus: Vec<u32> = (0..400).map(|i| 1000 + i).collect();
        let err = EalBuilder::new().lcores(&cpus).build_args().unwrap_err();
        assert_eq!(err.flag, "--lcores");
        assert!(err.len >= LCORES_ARG_LEN);
    }

    #[test]
    fn test_log_level_numeric() {
        assert_eq!(LogLevel::Debug.as_u8(), 8);
        assert_eq!(LogLevel::Level(3).as_u8(), 3);
        assert_eq!(LogLevel::Warning.as_str(), "5");
    }
}
