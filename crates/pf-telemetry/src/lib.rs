//! Logging bootstrap shared by the daemon binary and tests.

pub mod logging;

pub use logging::{init_logging, LogFormat};
