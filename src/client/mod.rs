//! The peer's side of the protocol: registration, peer discovery, session
//! negotiation, and the relay data path.

mod actor;
pub mod transport;

pub use actor::{ClientEvent, ConnectionState, PeerClient, RelayState};
pub use transport::{NoDirectTransport, PeerSession, PeerTransport, SessionEvent};
