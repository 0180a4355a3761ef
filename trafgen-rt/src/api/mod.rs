//! Provider-facing API: typed wrappers around the poll-mode environment.

mod error;
pub mod rte;

pub use error::{Errno, Result};
