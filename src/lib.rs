//! KuCoin market-data stream - main library
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (config paths, CLI args)
//! - **kucoin**: Token bootstrap, protocol, subscriptions and the stream client (re-exported from workspace)
//! - **feedsockets**: Exchange-agnostic WebSocket session core (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use kucoin_stream::bin_common::{load_config_from_env, ConfigType};
//! use kucoin_stream::kucoin::{KucoinStreamClient, StreamConfig};
//! ```

// Re-export workspace libraries for convenience
pub use feedsockets;
pub use kucoin;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
}
