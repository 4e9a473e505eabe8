//! The live registry mapping identities to connections.

use std::collections::HashMap;

use super::connection::ConnectionHandle;

pub struct PeerEntry {
    pub sender: ConnectionHandle,
    pub relay_authenticated: bool,
}

/// Identity to connection registry. Identities are unique; a request for an
/// empty or taken identity gets a synthesized `peer_<N>` where N strictly
/// increases for the process lifetime.
#[derive(Default)]
pub struct Directory {
    peers: HashMap<String, PeerEntry>,
    next_serial: u64,
}

impl Directory {
    /// Bind an identity to a connection and return the assigned name.
    pub fn register(
        &mut self,
        requested: &str,
        sender: ConnectionHandle,
        relay_authenticated: bool,
    ) -> String {
        let id = if requested.is_empty() || self.peers.contains_key(requested) {
            loop {
                self.next_serial += 1;
                let candidate = format!("peer_{}", self.next_serial);
                if !self.peers.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            requested.to_string()
        };
        self.peers.insert(
            id.clone(),
            PeerEntry {
                sender,
                relay_authenticated,
            },
        );
        id
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        self.peers.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    pub fn set_relay_authenticated(&mut self, id: &str) {
        if let Some(entry) = self.peers.get_mut(id) {
            entry.relay_authenticated = true;
        }
    }

    /// Snapshot of registered identities minus `exclude`.
    pub fn list_excluding(&self, exclude: &str) -> Vec<String> {
        self.peers
            .keys()
            .filter(|id| id.as_str() != exclude)
            .cloned()
            .collect()
    }

    /// Admin snapshot: every identity with its relay auth flag.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .map(|(id, entry)| (id.clone(), entry.relay_authenticated))
            .collect();
        peers.sort();
        peers
    }
}
