//! peerlink: signaling hub and relay data plane for peer-to-peer messaging.
//!
//! Peers connect to the hub over WebSocket, register an identity, discover
//! each other through the peer directory, and negotiate direct data channels
//! through brokered offer/answer/candidate exchange. When direct connectivity
//! is unavailable, an authenticated relay path carries application payloads
//! through the hub itself.

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod protocol;

pub use client::{ClientEvent, ConnectionState, PeerClient, RelayState};
pub use config::{ClientConfig, HubConfig};
pub use error::{Error, Result};
pub use hub::Hub;
