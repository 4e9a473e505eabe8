//! In-memory peer transport for exercising the client actor without a real
//! ICE stack. Session descriptions carry a rendezvous token; candidates are
//! accepted and ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use peerlink::client::transport::{PeerSession, PeerTransport, SessionEvent, SessionEvents};
use peerlink::error::{Error, Result};

/// Delivery side of a linked session: the peer actor's event channel and the
/// identity that actor knows this end by.
type Link = (SessionEvents, String);

#[derive(Default)]
struct Registry {
    next_token: AtomicU64,
    offers: Mutex<HashMap<u64, Link>>,
    answers: Mutex<HashMap<u64, Link>>,
}

/// Shared "network": every client holding a clone of the same transport can
/// negotiate sessions with the others.
#[derive(Default)]
pub struct MemoryTransport {
    registry: Arc<Registry>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn create_session(
        &self,
        remote: &str,
        events: SessionEvents,
    ) -> Result<Box<dyn PeerSession>> {
        Ok(Box::new(MemorySession {
            remote: remote.to_string(),
            events,
            registry: self.registry.clone(),
            peer: None,
        }))
    }
}

struct MemorySession {
    remote: String,
    events: SessionEvents,
    registry: Arc<Registry>,
    peer: Option<Link>,
}

fn description(kind: &str, token: u64) -> String {
    serde_json::json!({ "type": kind, "sdp": format!("mem:{token}") }).to_string()
}

fn parse_token(description: &str) -> Result<u64> {
    let value: serde_json::Value = serde_json::from_str(description)
        .map_err(|e| Error::InvalidData(format!("bad session description: {e}")))?;
    value["sdp"]
        .as_str()
        .and_then(|sdp| sdp.strip_prefix("mem:"))
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| Error::InvalidData("no rendezvous token in description".to_string()))
}

impl MemorySession {
    fn deliver(&self, event: SessionEvent) -> Result<()> {
        let (events, tag) = self
            .peer
            .as_ref()
            .ok_or_else(|| Error::ChannelNotOpen(self.remote.clone()))?;
        events
            .send((tag.clone(), event))
            .map_err(|_| Error::ChannelNotOpen(self.remote.clone()))
    }
}

#[async_trait]
impl PeerSession for MemorySession {
    async fn create_offer(&mut self) -> Result<String> {
        let token = self.registry.next_token.fetch_add(1, Ordering::Relaxed);
        self.registry
            .offers
            .lock()
            .unwrap()
            .insert(token, (self.events.clone(), self.remote.clone()));
        Ok(description("offer", token))
    }

    async fn accept_offer(&mut self, description_json: &str) -> Result<String> {
        let token = parse_token(description_json)?;
        let initiator = self
            .registry
            .offers
            .lock()
            .unwrap()
            .remove(&token)
            .ok_or_else(|| Error::InvalidData(format!("unknown offer token {token}")))?;
        self.peer = Some(initiator);
        self.registry
            .answers
            .lock()
            .unwrap()
            .insert(token, (self.events.clone(), self.remote.clone()));
        Ok(description("answer", token))
    }

    async fn accept_answer(&mut self, description_json: &str) -> Result<()> {
        let token = parse_token(description_json)?;
        let responder = self
            .registry
            .answers
            .lock()
            .unwrap()
            .remove(&token)
            .ok_or_else(|| Error::InvalidData(format!("unknown answer token {token}")))?;
        self.peer = Some(responder);

        // Negotiation complete: both channels open.
        let _ = self.events.send((self.remote.clone(), SessionEvent::ChannelOpen));
        self.deliver(SessionEvent::ChannelOpen)?;
        Ok(())
    }

    async fn add_candidate(&mut self, _candidate: &str, _mid: &str) -> Result<()> {
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.deliver(SessionEvent::Text(text.to_string()))
    }

    async fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.deliver(SessionEvent::Binary(data.to_vec()))
    }

    async fn close(&mut self) {
        if self.peer.is_some() {
            let _ = self.deliver(SessionEvent::ChannelClosed);
            self.peer = None;
        }
    }
}
