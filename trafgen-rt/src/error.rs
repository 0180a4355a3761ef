use std::fmt;

use crate::BoxError;
use crate::api::Errno;
use crate::api::rte::eal::ArgOverflow;
use crate::api::rte::eth::PortId;
use crate::api::rte::lcore::Lcore;

/// Error type for runtime bootstrap and launch.
///
/// Buffer exhaustion is never reported here: allocation returns `None` or a
/// reduced count instead.
#[derive(Debug)]
pub enum Error {
    /// The configuration was rejected before startup.
    InvalidConfig(String),
    /// A formatted startup flag did not fit its fixed-size buffer.
    ConfigFormatOverflow {
        flag: &'static str,
        len: usize,
        limit: usize,
    },
    /// The environment rejected the startup arguments.
    EnvironmentInit(Errno),
    /// Pool creation, configure or queue setup failed for a port.
    PortBringup { port: PortId, source: Errno },
    /// A configured port failed to start.
    PortStart { port: PortId, source: Errno },
    /// The kernel-mirror interfaces failed to start.
    KniStart(BoxError),
    /// Flow steering failed to initialize.
    FlowInit(BoxError),
    /// A worker lcore could not be dispatched.
    Launch { lcore: Lcore, source: Errno },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::ConfigFormatOverflow { flag, len, limit } => {
                write!(f, "{flag} is {len} bytes, buffer holds {limit}")
            }
            Error::EnvironmentInit(e) => write!(f, "environment init failed: {e}"),
            Error::PortBringup { port, source } => {
                write!(f, "port {port} bring-up failed: {source}")
            }
            Error::PortStart { port, source } => write!(f, "port {port} start failed: {source}"),
            Error::KniStart(e) => write!(f, "kernel-mirror start failed: {e}"),
            Error::FlowInit(e) => write!(f, "flow steering init failed: {e}"),
            Error::Launch { lcore, source } => write!(f, "launch on {lcore} failed: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::EnvironmentInit(e) => Some(e),
            Error::PortBringup { source, .. }
            | Error::PortStart { source, .. }
            | Error::Launch { source, .. } => Some(source),
            Error::KniStart(e) | Error::FlowInit(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ArgOverflow> for Error {
    fn from(e: ArgOverflow) -> Self {
        Error::ConfigFormatOverflow {
            flag: e.flag,
            len: e.len,
            limit: e.limit,
        }
    }
}
