//! Shared plumbing for the drip binaries: logging setup, layered
//! configuration loading and shutdown handling.

pub mod utils;

pub use utils::config::load_config;
pub use utils::logging::{init_logging, init_test_logging, LogFormat, LoggingConfig};
pub use utils::shutdown::shutdown_signal;
