//! Poll-mode packet I/O runtime for a multi-core traffic generator.
//!
//! The crate covers two things:
//! - bootstrapping the data plane ([`bootstrap::Runtime`]): startup arguments,
//!   port bring-up, auxiliary subsystems, and launching a per-core routine on
//!   every lcore ([`launch`]);
//! - the buffer lifecycle: NUMA-local pools per port/queue ([`pool`]), per-core
//!   deferred freeing with a zero-copy release path ([`lifecycle`],
//!   [`workspace`]) and packet diagnostics ([`diag`]).
//!
//! The NIC side is reached through the [`api::rte::eal::Environment`] and
//! [`api::rte::eth::EthDriver`] traits. [`soft`] provides an in-process
//! implementation of both.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod diag;
pub mod error;
pub mod launch;
pub mod lifecycle;
pub mod pool;
pub mod soft;
pub mod subsys;
pub mod workspace;

pub use bootstrap::Runtime;
pub use config::{Config, DeviceSpec, FlowMode, PortConfig};
pub use error::Error;
pub use workspace::WorkSpace;

/// A boxed error type for collaborator subsystems.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A Result type using BoxError.
pub type Result<T> = std::result::Result<T, BoxError>;
