//! Client side of the progress protocol.
//!
//! A client follows one job over a push stream and falls back to the pull
//! query when the stream drops, reconnecting with exponential backoff.

pub mod client;
pub mod local;
pub mod reconnect;

pub use client::{MessageStream, ProgressClient, ProgressTransport};
pub use local::LocalTransport;
pub use reconnect::ReconnectPolicy;
