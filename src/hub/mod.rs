//! The signaling hub: connection lifecycle, frame dispatch, and the relay
//! data plane.

mod connection;
mod console;
mod directory;
mod relay;
mod session;

pub use connection::ConnectionHandle;
pub use console::run_console;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::protocol::{encode_peer_list, AuthResult, Envelope, MessageType};
use directory::Directory;
use relay::RelayGraph;

/// Directory + relay graph form one protected region: every
/// lookup-decide-dispatch sequence for one inbound frame runs under this
/// lock. Socket I/O happens in per-connection writer tasks, so the lock is
/// never held across a wait on another connection.
struct HubState {
    directory: Directory,
    relay: RelayGraph,
    relay_password: Option<String>,
}

/// Per-connection context, owned by the connection's reader task. The
/// identity is bound once at registration; the auth flag is raised at most
/// once and never reset.
struct ConnCtx {
    identity: Option<String>,
    relay_authenticated: bool,
}

/// Shared handle to the signaling hub, used by the WebSocket route and the
/// admin console.
#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    bind_address: String,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                directory: Directory::default(),
                relay: RelayGraph::default(),
                relay_password: config.relay_password,
            })),
            bind_address: config.bind_address,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", any(ws_handler))
            .with_state(self.clone())
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_address))?;
        info!("signaling hub listening on {}", self.bind_address);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Bind the configured address and serve in a background task. Returns
    /// the bound address; binding port 0 yields an ephemeral port.
    pub async fn start(&self) -> Result<std::net::SocketAddr> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_address))?;
        let addr = listener.local_addr()?;
        let router = self.router();
        info!("signaling hub listening on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!("hub server stopped: {}", e);
            }
        });
        Ok(addr)
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn relay_enabled(&self) -> bool {
        self.lock().relay_password.is_some()
    }

    /// Registered identities with their relay auth flag.
    pub fn peers(&self) -> Vec<(String, bool)> {
        self.lock().directory.snapshot()
    }

    /// Active relay pairs.
    pub fn relay_pairs(&self) -> Vec<(String, String)> {
        self.lock().relay.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, conn: &mut ConnCtx, handle: &ConnectionHandle, envelope: Envelope) {
        match envelope.kind {
            MessageType::Register => self.handle_register(conn, handle, envelope),
            MessageType::PeerList => self.handle_peer_list(conn, handle),
            MessageType::Offer
            | MessageType::Answer
            | MessageType::Candidate
            | MessageType::Connect => self.handle_signal(conn, handle, envelope),
            MessageType::RelayAuth => self.handle_relay_auth(conn, handle, envelope),
            MessageType::RelayConnect => self.handle_relay_connect(conn, handle, envelope),
            MessageType::RelayData => self.handle_relay_data(conn, handle, envelope),
            MessageType::RelayDisconnect => self.handle_relay_disconnect(conn, envelope),
            // Reserved for data channels; the hub does not route it.
            MessageType::Chat => {}
            MessageType::Error | MessageType::RelayAuthResult => {
                debug!("discarding unexpected {} frame", envelope.kind);
            }
        }
    }

    fn handle_register(&self, conn: &mut ConnCtx, handle: &ConnectionHandle, envelope: Envelope) {
        if conn.identity.is_some() {
            // The identity is bound once; later register frames are no-ops.
            return;
        }
        // Bind and echo under the same lock acquisition so the registration
        // response is queued before any frame another connection may already
        // be addressing to the new identity.
        let mut state = self.lock();
        let assigned =
            state
                .directory
                .register(&envelope.payload, handle.clone(), conn.relay_authenticated);
        handle.send(&Envelope::with_payload(MessageType::Register, assigned.clone()));
        drop(state);
        info!("client registered: {}", assigned);
        conn.identity = Some(assigned);
    }

    fn handle_peer_list(&self, conn: &ConnCtx, handle: &ConnectionHandle) {
        let exclude = conn.identity.as_deref().unwrap_or("");
        let peers = self.lock().directory.list_excluding(exclude);
        handle.send(&Envelope::with_payload(
            MessageType::PeerList,
            encode_peer_list(&peers),
        ));
    }

    fn handle_signal(&self, conn: &ConnCtx, handle: &ConnectionHandle, envelope: Envelope) {
        let from = conn.identity.as_deref().unwrap_or("");
        let state = self.lock();
        session::route(&state.directory, handle, from, envelope);
    }

    fn handle_relay_auth(&self, conn: &mut ConnCtx, handle: &ConnectionHandle, envelope: Envelope) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let result = match &state.relay_password {
            None => AuthResult::new(false, "Relay is not configured on this server"),
            Some(secret) if *secret == envelope.payload => {
                if !conn.relay_authenticated {
                    conn.relay_authenticated = true;
                    if let Some(id) = &conn.identity {
                        state.directory.set_relay_authenticated(id);
                    }
                }
                AuthResult::new(true, "Authentication successful")
            }
            Some(_) => AuthResult::new(false, "Invalid relay password"),
        };
        if result.success {
            info!(
                "relay auth granted to {}",
                conn.identity.as_deref().unwrap_or("<unregistered>")
            );
        } else {
            debug!("relay auth refused: {}", result.message);
        }
        handle.send(&Envelope::with_payload(
            MessageType::RelayAuthResult,
            result.to_json(),
        ));
    }

    fn handle_relay_connect(&self, conn: &ConnCtx, handle: &ConnectionHandle, envelope: Envelope) {
        if !conn.relay_authenticated {
            handle.send(&Envelope::error("Not authenticated for relay"));
            return;
        }
        let Some(from) = conn.identity.as_deref() else {
            debug!("relay_connect from unregistered connection ignored");
            return;
        };
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(target) = state.directory.get(&envelope.to) else {
            handle.send(&Envelope::error(format!("Peer not found: {}", envelope.to)));
            return;
        };
        state.relay.insert(from, &envelope.to);
        let mut notice = Envelope::new(MessageType::RelayConnect);
        notice.from = from.to_string();
        notice.to = envelope.to.clone();
        target.sender.send(&notice);
        debug!("relay pair {} <-> {}", from, envelope.to);
    }

    fn handle_relay_data(&self, conn: &ConnCtx, handle: &ConnectionHandle, envelope: Envelope) {
        let Some(from) = conn.identity.as_deref() else {
            debug!("relay_data from unregistered connection ignored");
            return;
        };
        let state = self.lock();
        if !state.relay.contains(from, &envelope.to) {
            handle.send(&Envelope::error(format!(
                "No relay connection with {}",
                envelope.to
            )));
            return;
        }
        match state.directory.get(&envelope.to) {
            Some(target) => {
                let mut forwarded = envelope;
                forwarded.from = from.to_string();
                target.sender.send(&forwarded);
            }
            None => handle.send(&Envelope::error(format!("Peer not found: {}", envelope.to))),
        }
    }

    fn handle_relay_disconnect(&self, conn: &ConnCtx, envelope: Envelope) {
        let Some(from) = conn.identity.as_deref() else {
            return;
        };
        let mut guard = self.lock();
        let state = &mut *guard;
        state.relay.remove(from, &envelope.to);
        if let Some(target) = state.directory.get(&envelope.to) {
            let mut notice = Envelope::new(MessageType::RelayDisconnect);
            notice.from = from.to_string();
            notice.to = envelope.to.clone();
            target.sender.send(&notice);
        }
        debug!("relay pair {} <-> {} removed", from, envelope.to);
    }

    /// Runs exactly once when a connection's reader terminates: drop every
    /// relay pair the identity participated in, notify the surviving
    /// counterparts, then release the directory entry for reuse.
    fn evict(&self, conn: &mut ConnCtx) {
        let Some(id) = conn.identity.take() else {
            debug!("connection closed before registering");
            return;
        };
        let mut guard = self.lock();
        let state = &mut *guard;
        let counterparts = state.relay.remove_peer(&id);
        state.directory.unregister(&id);
        for other in counterparts {
            if let Some(entry) = state.directory.get(&other) {
                let mut notice = Envelope::new(MessageType::RelayDisconnect);
                notice.from = id.clone();
                notice.to = other.clone();
                entry.sender.send(&notice);
            }
        }
        drop(guard);
        info!("client disconnected: {}", id);
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (sink, mut stream) = socket.split();
    let (handle, writer) = connection::spawn_writer(sink);

    let mut conn = ConnCtx {
        identity: None,
        relay_authenticated: false,
    };
    info!("new connection");

    while let Some(result) = stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("socket error: {}", e);
                break;
            }
        };

        match Envelope::decode(&text) {
            Ok(envelope) => hub.dispatch(&mut conn, &handle, envelope),
            // A malformed frame is dropped; the connection stays open.
            Err(e) => warn!("ignoring malformed frame: {}", e),
        }
    }

    hub.evict(&mut conn);
    writer.abort();
}
