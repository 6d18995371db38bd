//! Guestbook Server - real-time hub for live refresh
//!
//! This crate implements the server side of live refresh: browsers
//! connect to the hub endpoint and get told to reload whenever the
//! guestbook database changes on disk.
//!
//! The server supports:
//! - Multiple concurrent connections
//! - Handshake, keep-alive pings and close messages
//! - Fire-and-forget broadcasts with no replay for late joiners

mod broadcast;
mod hub;
mod lifecycle;
pub mod protocol;

pub use broadcast::{dispatch, BroadcastError, Broadcaster};
pub use hub::{HubConfig, HubHandle, HubServer, ServerError};
pub use lifecycle::{relay, LifecycleController, LifecycleState};
pub use protocol::{HandshakeRequest, HandshakeResponse, HubMessage, ProtocolError};
