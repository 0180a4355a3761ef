//! Auxiliary subsystems the bootstrapper drives but does not implement.
//!
//! Each one is a trait object owned by the [`Runtime`](crate::Runtime).
//! [`Disabled`] stands in for any subsystem a deployment does not use.

use crate::config::Config;

/// Hardware flow steering (FDIR).
pub trait FlowSteering: Send + Sync {
    /// Program steering for the configured ports. Only called in FDIR mode.
    fn init(&self, config: &Config) -> crate::Result<()>;

    /// Remove any programmed state. Called at every teardown.
    fn flush(&self, config: &Config);
}

/// Kernel-mirror interfaces exposing traffic to the host stack.
pub trait KernelMirror: Send + Sync {
    fn start(&self, config: &Config) -> crate::Result<()>;

    /// Must tolerate being called without a successful `start`.
    fn stop(&self, config: &Config);
}

/// Current simulated time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimTime {
    pub seconds: u64,
    pub ticks: u64,
}

/// Periodic tick subsystem; the clock diagnostics are stamped with.
pub trait TickSource: Send + Sync {
    fn init(&self, ticks_per_second: u64);

    fn now(&self) -> SimTime;
}

/// Packet capture hooks. Failures are logged and otherwise ignored.
pub trait CaptureHooks: Send + Sync {
    fn init(&self) -> crate::Result<()>;

    fn uninit(&self);
}

/// A subsystem that is not in use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl FlowSteering for Disabled {
    fn init(&self, _config: &Config) -> crate::Result<()> {
        Ok(())
    }

    fn flush(&self, _config: &Config) {}
}

impl KernelMirror for Disabled {
    fn start(&self, _config: &Config) -> crate::Result<()> {
        Ok(())
    }

    fn stop(&self, _config: &Config) {}
}

impl TickSource for Disabled {
    fn init(&self, _ticks_per_second: u64) {}

    fn now(&self) -> SimTime {
        SimTime::default()
    }
}

impl CaptureHooks for Disabled {
    fn init(&self) -> crate::Result<()> {
        Ok(())
    }

    fn uninit(&self) {}
}
