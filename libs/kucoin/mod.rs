//! KuCoin streaming market-data client
//!
//! One authenticated session to KuCoin's WebSocket feed, kept alive
//! indefinitely: token bootstrap, keepalive pings, subscription tracking and
//! transparent reconnect with subscription replay.

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod supervisor;
pub mod token;
pub mod utils;

// Re-export commonly used items
pub use auth::Credentials;
pub use client::{ClientEvent, ClientOptions, KucoinStreamClient, SubscribeOutcome, UnsubscribeOutcome};
pub use config::{ConfigError, StreamConfig, TopicConfig};
pub use dispatcher::{DataMessage, DispatchOutcome, FrameDispatcher, MarketDataHandler};
pub use protocol::{Frame, MessageId};
pub use registry::{Subscription, SubscriptionRegistry};
pub use supervisor::{SupervisorError, SupervisorState};
pub use token::{AuthError, ChannelMode, InstanceServer, RestTokenProvider, SessionGrant, SessionTokenProvider};
pub use utils::{init_tracing, ShutdownManager};
