//! The client protocol actor: a state machine driven by inbound envelopes,
//! application commands, transport session events, and timers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::transport::{PeerSession, PeerTransport, SessionEvent};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    parse_peer_list, AuthResult, CandidateRecord, Envelope, MessageType, RelayPayload,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Signaling connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Relay authentication state, orthogonal to the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    #[default]
    NotAuthenticated,
    Authenticating,
    Authenticated,
    AuthFailed,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayState::NotAuthenticated => write!(f, "not_authenticated"),
            RelayState::Authenticating => write!(f, "authenticating"),
            RelayState::Authenticated => write!(f, "authenticated"),
            RelayState::AuthFailed => write!(f, "auth_failed"),
        }
    }
}

/// Events delivered to the application.
#[derive(Debug)]
pub enum ClientEvent {
    /// Registered with the hub under the given identity.
    Connected { identity: String },
    Disconnected,
    StateChanged(ConnectionState),
    PeerList(Vec<String>),
    /// Direct data channel opened.
    PeerConnected(String),
    PeerDisconnected(String),
    TextMessage { from: String, text: String },
    BinaryMessage { from: String, data: Vec<u8> },
    RelayAuthenticated,
    RelayAuthFailed { message: String },
    RelayConnected(String),
    RelayDisconnected(String),
    RelayText { from: String, text: String },
    RelayBinary { from: String, data: Vec<u8> },
    /// `error` envelope payload from the hub.
    SignalingError(String),
    Error(Error),
}

enum Command {
    RequestPeerList,
    ConnectToPeer(String),
    DisconnectFromPeer(String),
    SendText(String, String),
    SendBinary(String, Vec<u8>),
    BroadcastText(String),
    BroadcastBinary(Vec<u8>),
    AuthenticateRelay(String),
    ConnectViaRelay(String),
    DisconnectViaRelay(String),
    RelayText(String, String),
    RelayBinary(String, Vec<u8>),
    RelayBroadcastText(String),
    RelayBroadcastBinary(Vec<u8>),
    Shutdown,
}

/// Queryable actor state, mirrored for the handle's snapshot accessors.
#[derive(Default)]
struct Shared {
    identity: Option<String>,
    state: ConnectionState,
    relay_state: RelayState,
    open_channels: HashSet<String>,
    relay_peers: HashSet<String>,
}

/// Handle to a running client actor. Dropping the handle shuts the actor
/// down.
pub struct PeerClient {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
}

impl PeerClient {
    /// Connect to the signaling hub and spawn the protocol actor. Returns
    /// once the socket is established; registration completes asynchronously
    /// and is reported as [`ClientEvent::Connected`].
    pub async fn connect(
        config: ClientConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let socket = open_signaling(&config).await?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let actor = Actor {
            config,
            transport,
            events: event_tx,
            shared: shared.clone(),
            auth_deadline: None,
            sessions: HashMap::new(),
            pending_connects: HashMap::new(),
            session_events_tx: session_tx,
        };
        tokio::spawn(actor.run(socket, cmd_rx, session_rx));

        Ok((
            Self {
                commands: cmd_tx,
                shared,
            },
            event_rx,
        ))
    }

    /// The identity assigned by the hub, once registered.
    pub fn identity(&self) -> Option<String> {
        self.shared().identity.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn relay_state(&self) -> RelayState {
        self.shared().relay_state
    }

    pub fn is_relay_authenticated(&self) -> bool {
        self.relay_state() == RelayState::Authenticated
    }

    /// Peers with an open direct data channel.
    pub fn connected_peers(&self) -> Vec<String> {
        self.shared().open_channels.iter().cloned().collect()
    }

    pub fn is_peer_connected(&self, id: &str) -> bool {
        self.shared().open_channels.contains(id)
    }

    /// Peers in the local relay set.
    pub fn relay_connected_peers(&self) -> Vec<String> {
        self.shared().relay_peers.iter().cloned().collect()
    }

    pub fn is_peer_relay_connected(&self, id: &str) -> bool {
        self.shared().relay_peers.contains(id)
    }

    pub fn request_peer_list(&self) {
        self.command(Command::RequestPeerList);
    }

    /// Initiate direct negotiation with a peer through the configured
    /// transport.
    pub fn connect_to_peer(&self, id: &str) {
        self.command(Command::ConnectToPeer(id.to_string()));
    }

    pub fn disconnect_from_peer(&self, id: &str) {
        self.command(Command::DisconnectFromPeer(id.to_string()));
    }

    pub fn send_text(&self, id: &str, text: impl Into<String>) {
        self.command(Command::SendText(id.to_string(), text.into()));
    }

    pub fn send_binary(&self, id: &str, data: Vec<u8>) {
        self.command(Command::SendBinary(id.to_string(), data));
    }

    /// Send to every open direct channel.
    pub fn broadcast_text(&self, text: impl Into<String>) {
        self.command(Command::BroadcastText(text.into()));
    }

    pub fn broadcast_binary(&self, data: Vec<u8>) {
        self.command(Command::BroadcastBinary(data));
    }

    pub fn authenticate_relay(&self, password: impl Into<String>) {
        self.command(Command::AuthenticateRelay(password.into()));
    }

    /// Request a relay pair with `id`. Requires prior relay authentication;
    /// the `RelayConnected` event fires locally at send time.
    pub fn connect_to_peer_via_relay(&self, id: &str) {
        self.command(Command::ConnectViaRelay(id.to_string()));
    }

    pub fn disconnect_from_peer_via_relay(&self, id: &str) {
        self.command(Command::DisconnectViaRelay(id.to_string()));
    }

    pub fn send_text_via_relay(&self, id: &str, text: impl Into<String>) {
        self.command(Command::RelayText(id.to_string(), text.into()));
    }

    pub fn send_binary_via_relay(&self, id: &str, data: Vec<u8>) {
        self.command(Command::RelayBinary(id.to_string(), data));
    }

    /// Send to every peer in the local relay set.
    pub fn broadcast_text_via_relay(&self, text: impl Into<String>) {
        self.command(Command::RelayBroadcastText(text.into()));
    }

    pub fn broadcast_binary_via_relay(&self, data: Vec<u8>) {
        self.command(Command::RelayBroadcastBinary(data));
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, cmd: Command) {
        let _ = self.commands.send(cmd);
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn open_signaling(config: &ClientConfig) -> Result<WsStream> {
    let connect = connect_async(config.signaling_url.as_str());
    match timeout(Duration::from_millis(config.connection_timeout_ms), connect).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(Error::ConnectionFailed(e.to_string())),
        Err(_) => Err(Error::Timeout("signaling connection".to_string())),
    }
}

enum DriveEnd {
    Quit,
    Lost,
}

struct Actor {
    config: ClientConfig,
    transport: Arc<dyn PeerTransport>,
    events: mpsc::UnboundedSender<ClientEvent>,
    shared: Arc<Mutex<Shared>>,

    auth_deadline: Option<Instant>,
    sessions: HashMap<String, Box<dyn PeerSession>>,
    pending_connects: HashMap<String, Instant>,

    session_events_tx: mpsc::UnboundedSender<(String, SessionEvent)>,
}

impl Actor {
    async fn run(
        mut self,
        socket: WsStream,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut session_events: mpsc::UnboundedReceiver<(String, SessionEvent)>,
    ) {
        let mut socket = Some(socket);
        'connection: while let Some(s) = socket.take() {
            let end = self.drive(s, &mut commands, &mut session_events).await;
            self.reset_after_disconnect().await;
            self.set_state(ConnectionState::Disconnected);
            self.emit(ClientEvent::Disconnected);
            match end {
                DriveEnd::Quit => break,
                DriveEnd::Lost => {
                    if !self.config.auto_reconnect {
                        break;
                    }
                    loop {
                        tokio::select! {
                            _ = sleep(Duration::from_millis(self.config.reconnect_interval_ms)) => {
                                match open_signaling(&self.config).await {
                                    Ok(s) => {
                                        info!("reconnected to signaling hub");
                                        socket = Some(s);
                                        continue 'connection;
                                    }
                                    Err(e) => {
                                        warn!("reconnect failed: {}", e);
                                        self.emit(ClientEvent::Error(e));
                                    }
                                }
                            }
                            cmd = commands.recv() => match cmd {
                                None | Some(Command::Shutdown) => break 'connection,
                                Some(_) => self.emit(ClientEvent::Error(Error::ConnectionFailed(
                                    "not connected to signaling hub".to_string(),
                                ))),
                            },
                        }
                    }
                }
            }
        }
        debug!("client actor stopped");
    }

    async fn drive(
        &mut self,
        socket: WsStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        session_events: &mut mpsc::UnboundedReceiver<(String, SessionEvent)>,
    ) -> DriveEnd {
        let (mut sink, mut stream) = socket.split();
        self.set_state(ConnectionState::Connecting);

        // On reconnect, ask for the previously assigned identity back.
        let requested = {
            let shared = self.shared();
            shared
                .identity
                .clone()
                .or_else(|| self.config.peer_id.clone())
                .unwrap_or_default()
        };
        if send_frame(&mut sink, &Envelope::with_payload(MessageType::Register, requested))
            .await
            .is_err()
        {
            self.set_state(ConnectionState::Failed);
            return DriveEnd::Lost;
        }

        let mut tick = interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.handle_frame(&mut sink, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("signaling connection closed");
                        return DriveEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("signaling socket error: {}", e);
                        self.set_state(ConnectionState::Failed);
                        return DriveEnd::Lost;
                    }
                },
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return DriveEnd::Quit;
                    }
                    Some(cmd) => self.handle_command(&mut sink, cmd).await,
                },
                Some((peer, event)) = session_events.recv() => {
                    self.handle_session_event(&mut sink, peer, event).await;
                }
                _ = tick.tick() => self.handle_tick().await,
            }
        }
    }

    async fn handle_frame(&mut self, sink: &mut WsSink, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("ignoring malformed frame from hub: {}", e);
                return;
            }
        };

        match envelope.kind {
            MessageType::Register => {
                if self.shared().state != ConnectionState::Connected {
                    let identity = envelope.payload;
                    info!("registered as {}", identity);
                    self.shared().identity = Some(identity.clone());
                    self.set_state(ConnectionState::Connected);
                    self.emit(ClientEvent::Connected { identity });
                    // Refresh the directory snapshot right away.
                    let _ = send_frame(sink, &Envelope::new(MessageType::PeerList)).await;
                }
            }
            MessageType::PeerList => match parse_peer_list(&envelope.payload) {
                Ok(peers) => self.emit(ClientEvent::PeerList(peers)),
                Err(e) => self.emit(ClientEvent::Error(e)),
            },
            MessageType::Offer => self.handle_offer(sink, envelope).await,
            MessageType::Answer => {
                if let Some(session) = self.sessions.get_mut(&envelope.from) {
                    if let Err(e) = session.accept_answer(&envelope.payload).await {
                        self.emit(ClientEvent::Error(e));
                    }
                } else {
                    debug!("answer from {} without a session", envelope.from);
                }
            }
            MessageType::Candidate => match CandidateRecord::from_json(&envelope.payload) {
                Ok(record) => {
                    if let Some(session) = self.sessions.get_mut(&envelope.from) {
                        if let Err(e) = session.add_candidate(&record.candidate, &record.mid).await
                        {
                            self.emit(ClientEvent::Error(e));
                        }
                    } else {
                        debug!("candidate from {} without a session", envelope.from);
                    }
                }
                Err(e) => self.emit(ClientEvent::Error(e)),
            },
            MessageType::Connect => {
                debug!("connect request from {}", envelope.from);
            }
            MessageType::Error => {
                if envelope.payload.is_empty() {
                    debug!("unrecognized frame from hub");
                } else {
                    self.emit(ClientEvent::SignalingError(envelope.payload));
                }
            }
            MessageType::RelayAuthResult => self.handle_auth_result(envelope),
            MessageType::RelayConnect => {
                self.shared().relay_peers.insert(envelope.from.clone());
                self.emit(ClientEvent::RelayConnected(envelope.from));
            }
            MessageType::RelayData => self.handle_relay_data(envelope),
            MessageType::RelayDisconnect => {
                self.shared().relay_peers.remove(&envelope.from);
                self.emit(ClientEvent::RelayDisconnected(envelope.from));
            }
            MessageType::Chat | MessageType::RelayAuth => {
                debug!("discarding unexpected {} frame", envelope.kind);
            }
        }
    }

    async fn handle_offer(&mut self, sink: &mut WsSink, envelope: Envelope) {
        let from = envelope.from;
        match self
            .transport
            .create_session(&from, self.session_events_tx.clone())
            .await
        {
            Ok(mut session) => match session.accept_offer(&envelope.payload).await {
                Ok(answer) => {
                    self.sessions.insert(from.clone(), session);
                    let reply = Envelope::request(MessageType::Answer, &from, answer);
                    if let Err(e) = send_frame(sink, &reply).await {
                        self.emit(ClientEvent::Error(e));
                    }
                }
                Err(e) => self.emit(ClientEvent::Error(e)),
            },
            Err(e) => self.emit(ClientEvent::Error(e)),
        }
    }

    fn handle_auth_result(&mut self, envelope: Envelope) {
        self.auth_deadline = None;
        match AuthResult::from_json(&envelope.payload) {
            Ok(result) if result.success => {
                info!("relay authentication granted");
                self.shared().relay_state = RelayState::Authenticated;
                self.emit(ClientEvent::RelayAuthenticated);
            }
            Ok(result) => {
                self.shared().relay_state = RelayState::AuthFailed;
                self.emit(ClientEvent::RelayAuthFailed {
                    message: result.message,
                });
            }
            Err(e) => self.emit(ClientEvent::Error(e)),
        }
    }

    fn handle_relay_data(&mut self, envelope: Envelope) {
        match RelayPayload::from_json(&envelope.payload) {
            Ok(payload) if payload.is_binary => match payload.decode_binary() {
                Ok(data) => self.emit(ClientEvent::RelayBinary {
                    from: envelope.from,
                    data,
                }),
                Err(e) => self.emit(ClientEvent::Error(e)),
            },
            Ok(payload) => self.emit(ClientEvent::RelayText {
                from: envelope.from,
                text: payload.data,
            }),
            Err(e) => self.emit(ClientEvent::Error(e)),
        }
    }

    async fn handle_command(&mut self, sink: &mut WsSink, cmd: Command) {
        match cmd {
            Command::RequestPeerList => {
                if let Err(e) = send_frame(sink, &Envelope::new(MessageType::PeerList)).await {
                    self.emit(ClientEvent::Error(e));
                }
            }
            Command::ConnectToPeer(id) => self.start_connect(sink, id).await,
            Command::DisconnectFromPeer(id) => {
                if let Some(mut session) = self.sessions.remove(&id) {
                    session.close().await;
                }
                self.pending_connects.remove(&id);
                if self.shared().open_channels.remove(&id) {
                    self.emit(ClientEvent::PeerDisconnected(id));
                }
            }
            Command::SendText(id, text) => {
                if !self.shared().open_channels.contains(&id) {
                    self.emit(ClientEvent::Error(Error::ChannelNotOpen(id)));
                    return;
                }
                if let Some(session) = self.sessions.get_mut(&id) {
                    if let Err(e) = session.send_text(&text).await {
                        self.emit(ClientEvent::Error(e));
                    }
                }
            }
            Command::SendBinary(id, data) => {
                if !self.shared().open_channels.contains(&id) {
                    self.emit(ClientEvent::Error(Error::ChannelNotOpen(id)));
                    return;
                }
                if let Some(session) = self.sessions.get_mut(&id) {
                    if let Err(e) = session.send_binary(&data).await {
                        self.emit(ClientEvent::Error(e));
                    }
                }
            }
            Command::BroadcastText(text) => {
                let targets: Vec<String> = self.shared().open_channels.iter().cloned().collect();
                for id in targets {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        if let Err(e) = session.send_text(&text).await {
                            debug!("broadcast to {} failed: {}", id, e);
                        }
                    }
                }
            }
            Command::BroadcastBinary(data) => {
                let targets: Vec<String> = self.shared().open_channels.iter().cloned().collect();
                for id in targets {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        if let Err(e) = session.send_binary(&data).await {
                            debug!("broadcast to {} failed: {}", id, e);
                        }
                    }
                }
            }
            Command::AuthenticateRelay(password) => {
                self.shared().relay_state = RelayState::Authenticating;
                self.auth_deadline = Some(
                    Instant::now() + Duration::from_millis(self.config.connection_timeout_ms),
                );
                let frame = Envelope::with_payload(MessageType::RelayAuth, password);
                if let Err(e) = send_frame(sink, &frame).await {
                    self.emit(ClientEvent::Error(e));
                }
            }
            Command::ConnectViaRelay(id) => {
                if self.shared().relay_state != RelayState::Authenticated {
                    self.emit(ClientEvent::Error(Error::RelayNotAuthenticated));
                    return;
                }
                let frame = Envelope::request(MessageType::RelayConnect, &id, "");
                if let Err(e) = send_frame(sink, &frame).await {
                    self.emit(ClientEvent::Error(e));
                    return;
                }
                // Fires locally at send time; the hub does not acknowledge
                // pair creation. A failed pair surfaces later as an error
                // envelope.
                self.shared().relay_peers.insert(id.clone());
                self.emit(ClientEvent::RelayConnected(id));
            }
            Command::DisconnectViaRelay(id) => {
                let frame = Envelope::request(MessageType::RelayDisconnect, &id, "");
                if let Err(e) = send_frame(sink, &frame).await {
                    self.emit(ClientEvent::Error(e));
                }
                if self.shared().relay_peers.remove(&id) {
                    self.emit(ClientEvent::RelayDisconnected(id));
                }
            }
            Command::RelayText(id, text) => {
                let frame = Envelope::request(
                    MessageType::RelayData,
                    &id,
                    RelayPayload::text(text).to_json(),
                );
                if let Err(e) = send_frame(sink, &frame).await {
                    self.emit(ClientEvent::Error(e));
                }
            }
            Command::RelayBinary(id, data) => {
                let frame = Envelope::request(
                    MessageType::RelayData,
                    &id,
                    RelayPayload::binary(&data).to_json(),
                );
                if let Err(e) = send_frame(sink, &frame).await {
                    self.emit(ClientEvent::Error(e));
                }
            }
            Command::RelayBroadcastText(text) => {
                // Snapshot, then iterate: the set may change while sending.
                let peers: Vec<String> = self.shared().relay_peers.iter().cloned().collect();
                let payload = RelayPayload::text(text).to_json();
                for id in peers {
                    let frame = Envelope::request(MessageType::RelayData, &id, payload.clone());
                    if let Err(e) = send_frame(sink, &frame).await {
                        self.emit(ClientEvent::Error(e));
                        break;
                    }
                }
            }
            Command::RelayBroadcastBinary(data) => {
                let peers: Vec<String> = self.shared().relay_peers.iter().cloned().collect();
                let payload = RelayPayload::binary(&data).to_json();
                for id in peers {
                    let frame = Envelope::request(MessageType::RelayData, &id, payload.clone());
                    if let Err(e) = send_frame(sink, &frame).await {
                        self.emit(ClientEvent::Error(e));
                        break;
                    }
                }
            }
            // Intercepted by the select loop before reaching here.
            Command::Shutdown => {}
        }
    }

    async fn start_connect(&mut self, sink: &mut WsSink, id: String) {
        if self.shared().state != ConnectionState::Connected {
            self.emit(ClientEvent::Error(Error::ConnectionFailed(
                "not connected to signaling hub".to_string(),
            )));
            return;
        }
        match self
            .transport
            .create_session(&id, self.session_events_tx.clone())
            .await
        {
            Ok(mut session) => match session.create_offer().await {
                Ok(offer) => {
                    self.sessions.insert(id.clone(), session);
                    self.pending_connects.insert(
                        id.clone(),
                        Instant::now()
                            + Duration::from_millis(self.config.peer_connect_timeout_ms),
                    );
                    let frame = Envelope::request(MessageType::Offer, &id, offer);
                    if let Err(e) = send_frame(sink, &frame).await {
                        self.emit(ClientEvent::Error(e));
                    }
                }
                Err(e) => self.emit(ClientEvent::Error(e)),
            },
            Err(e) => self.emit(ClientEvent::Error(e)),
        }
    }

    async fn handle_session_event(&mut self, sink: &mut WsSink, peer: String, event: SessionEvent) {
        match event {
            SessionEvent::LocalCandidate { candidate, mid } => {
                let record = CandidateRecord { candidate, mid };
                let frame = Envelope::request(MessageType::Candidate, &peer, record.to_json());
                if let Err(e) = send_frame(sink, &frame).await {
                    self.emit(ClientEvent::Error(e));
                }
            }
            SessionEvent::ChannelOpen => {
                self.pending_connects.remove(&peer);
                self.shared().open_channels.insert(peer.clone());
                info!("data channel open with {}", peer);
                self.emit(ClientEvent::PeerConnected(peer));
            }
            SessionEvent::ChannelClosed => {
                self.sessions.remove(&peer);
                self.pending_connects.remove(&peer);
                if self.shared().open_channels.remove(&peer) {
                    self.emit(ClientEvent::PeerDisconnected(peer));
                }
            }
            SessionEvent::Text(text) => {
                self.emit(ClientEvent::TextMessage { from: peer, text });
            }
            SessionEvent::Binary(data) => {
                self.emit(ClientEvent::BinaryMessage { from: peer, data });
            }
        }
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();

        if let Some(deadline) = self.auth_deadline {
            if now >= deadline {
                self.auth_deadline = None;
                self.shared().relay_state = RelayState::AuthFailed;
                self.emit(ClientEvent::RelayAuthFailed {
                    message: "relay authentication timed out".to_string(),
                });
            }
        }

        let expired: Vec<String> = self
            .pending_connects
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.pending_connects.remove(&id);
            if let Some(mut session) = self.sessions.remove(&id) {
                session.close().await;
            }
            self.emit(ClientEvent::Error(Error::Timeout(format!(
                "connection to {id}"
            ))));
        }
    }

    /// Tear down per-connection state after the signaling socket is gone:
    /// sessions, relay peers, and both state machines.
    async fn reset_after_disconnect(&mut self) {
        let sessions: Vec<(String, Box<dyn PeerSession>)> = self.sessions.drain().collect();
        for (id, mut session) in sessions {
            session.close().await;
            if self.shared().open_channels.remove(&id) {
                self.emit(ClientEvent::PeerDisconnected(id));
            }
        }
        self.pending_connects.clear();
        self.auth_deadline = None;

        let lost_auth = {
            let mut shared = self.shared();
            shared.open_channels.clear();
            shared.relay_peers.clear();
            let lost = shared.relay_state == RelayState::Authenticating;
            shared.relay_state = RelayState::NotAuthenticated;
            lost
        };
        if lost_auth {
            self.emit(ClientEvent::RelayAuthFailed {
                message: "signaling connection lost".to_string(),
            });
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        let changed = {
            let mut shared = self.shared();
            let changed = shared.state != state;
            shared.state = state;
            changed
        };
        if changed {
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn send_frame(sink: &mut WsSink, envelope: &Envelope) -> Result<()> {
    sink.send(WsMessage::Text(envelope.encode()))
        .await
        .map_err(|e| Error::SignalingError(e.to_string()))
}
