//! The seam to an external direct peer transport.
//!
//! The negotiation strings (session descriptions and candidates) are opaque
//! here: the actor routes them between the hub and the session without
//! interpreting them. Production deployments plug in an ICE data-channel
//! stack; tests use an in-memory link.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Events a live session reports back into the client actor, tagged with the
/// remote identity of the session that produced them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A locally gathered candidate to relay to the remote side.
    LocalCandidate { candidate: String, mid: String },
    /// The bidirectional data channel is open.
    ChannelOpen,
    ChannelClosed,
    Text(String),
    Binary(Vec<u8>),
}

pub type SessionEvents = mpsc::UnboundedSender<(String, SessionEvent)>;

/// One negotiation plus data channel with a single remote peer.
#[async_trait]
pub trait PeerSession: Send {
    /// Produce the local session description that opens the exchange.
    async fn create_offer(&mut self) -> Result<String>;

    /// Apply a remote offer and produce the answering description.
    async fn accept_offer(&mut self, description: &str) -> Result<String>;

    /// Apply the remote answer to a locally initiated exchange.
    async fn accept_answer(&mut self, description: &str) -> Result<()>;

    /// Feed a remotely gathered candidate.
    async fn add_candidate(&mut self, candidate: &str, mid: &str) -> Result<()>;

    async fn send_text(&mut self, text: &str) -> Result<()>;

    async fn send_binary(&mut self, data: &[u8]) -> Result<()>;

    async fn close(&mut self);
}

/// Factory for peer sessions.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_session(
        &self,
        remote: &str,
        events: SessionEvents,
    ) -> Result<Box<dyn PeerSession>>;
}

/// Placeholder transport for deployments that use the relay path only.
/// Every direct connection attempt reports `InternalError`.
pub struct NoDirectTransport;

#[async_trait]
impl PeerTransport for NoDirectTransport {
    async fn create_session(
        &self,
        remote: &str,
        _events: SessionEvents,
    ) -> Result<Box<dyn PeerSession>> {
        Err(Error::InternalError(format!(
            "no peer transport configured for {remote}"
        )))
    }
}
