//! In-process poll-mode provider.
//!
//! Runs the whole runtime without a kernel-bypass NIC: lcores are OS
//! threads, ports are loopback rings, and the clock is `Instant`.

mod env;
mod net;
mod tick;

pub use env::{SOFT_TSC_HZ, SoftArgs, SoftEnv};
pub use net::{PortStats, SoftNet};
pub use tick::SoftTicks;
