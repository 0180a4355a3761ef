//! Lcore (logical core) handles.
//!
//! An lcore is an environment-managed thread pinned to one physical CPU. The
//! handle here is only an id; properties and launching go through the
//! [`Environment`](super::eal::Environment) that owns the lcore.

use super::eal::Environment;

/// Special value indicating "any lcore" or "not an lcore thread"
pub const LCORE_ID_ANY: u32 = u32::MAX;

/// Upper bound on configured lcores.
pub const MAX_LCORE: usize = 128;

/// Work dispatched onto a remote lcore.
pub type LcoreJob = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// State of an lcore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum State {
    /// Lcore is waiting for new command
    Wait = 0,
    /// Lcore is running a function
    Running = 1,
    /// Lcore has finished, waiting for ack
    Finished = 2,
}

impl From<i32> for State {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Wait,
            1 => Self::Running,
            2 => Self::Finished,
            _ => Self::Wait,
        }
    }
}

/// A handle to a logical core.
///
/// This type is `Copy`, `Send`, and `Sync` - it's just a lightweight
/// handle to an lcore, not the lcore itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lcore {
    id: u32,
}

impl Lcore {
    /// Create an Lcore handle from an ID.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self { id }
    }

    /// Get this lcore's ID.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Check if this is the environment's control lcore.
    #[inline]
    pub fn is_main(&self, env: &dyn Environment) -> bool {
        *self == env.main_lcore()
    }

    /// Get the NUMA socket ID for this lcore.
    #[inline]
    pub fn socket_id(&self, env: &dyn Environment) -> u32 {
        env.lcore_socket_id(*self)
    }

    /// Check if this lcore is currently available (in Wait state).
    #[inline]
    pub fn is_available(&self, env: &dyn Environment) -> bool {
        env.lcore_state(*self) == State::Wait
    }
}

impl std::fmt::Display for Lcore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lcore{}", self.id)
    }
}
