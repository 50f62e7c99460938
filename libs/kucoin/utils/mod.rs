//! Common utilities for stream binaries

mod logging;
mod shutdown;

pub use logging::init_tracing;
pub use shutdown::ShutdownManager;
