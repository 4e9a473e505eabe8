//! Stateless brokerage of session negotiation frames between named peers.

use tracing::debug;

use super::connection::ConnectionHandle;
use super::directory::Directory;
use crate::protocol::{Envelope, MessageType};

/// Stamp `from` with the originator's registered identity, look up `to`, and
/// forward the envelope verbatim. Unknown targets bounce an `error` back to
/// the originator. The payload is never inspected.
pub fn route(
    directory: &Directory,
    origin: &ConnectionHandle,
    from: &str,
    mut envelope: Envelope,
) {
    envelope.from = from.to_string();
    if envelope.kind == MessageType::Connect {
        envelope.payload = "connect_request".to_string();
    }
    match directory.get(&envelope.to) {
        Some(target) => {
            debug!(
                "forwarded {} from {} to {}",
                envelope.kind, envelope.from, envelope.to
            );
            target.sender.send(&envelope);
        }
        None => {
            debug!("{} target not found: {}", envelope.kind, envelope.to);
            origin.send(&Envelope::error(format!("Peer not found: {}", envelope.to)));
        }
    }
}
