//! Wire protocol: the signaling envelope and its payload records.
//!
//! Every frame is one JSON object `{type, from, to, payload}`. Nested
//! structures (peer lists, relay data records, auth results) are themselves
//! JSON serialized into the `payload` string.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire tags. The enumeration is open for growth: unknown tags decode to
/// `Error` rather than failing the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Register,
    PeerList,
    Offer,
    Answer,
    Candidate,
    Connect,
    Error,
    Chat,
    RelayAuth,
    RelayAuthResult,
    RelayConnect,
    RelayData,
    RelayDisconnect,
}

impl MessageType {
    pub fn tag(&self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::PeerList => "peer_list",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::Candidate => "candidate",
            MessageType::Connect => "connect",
            MessageType::Error => "error",
            MessageType::Chat => "chat",
            MessageType::RelayAuth => "relay_auth",
            MessageType::RelayAuthResult => "relay_auth_result",
            MessageType::RelayConnect => "relay_connect",
            MessageType::RelayData => "relay_data",
            MessageType::RelayDisconnect => "relay_disconnect",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "register" => MessageType::Register,
            "peer_list" => MessageType::PeerList,
            "offer" => MessageType::Offer,
            "answer" => MessageType::Answer,
            "candidate" => MessageType::Candidate,
            "connect" => MessageType::Connect,
            "error" => MessageType::Error,
            "chat" => MessageType::Chat,
            "relay_auth" => MessageType::RelayAuth,
            "relay_auth_result" => MessageType::RelayAuthResult,
            "relay_connect" => MessageType::RelayConnect,
            "relay_data" => MessageType::RelayData,
            "relay_disconnect" => MessageType::RelayDisconnect,
            _ => return None,
        })
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Inbound frame before tag resolution. Missing fields default to empty, the
/// same tolerance the wire has always had.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    payload: String,
}

/// The four-field record carrying every control and relay frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    pub to: String,
    pub payload: String,
}

impl Envelope {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            from: String::new(),
            to: String::new(),
            payload: String::new(),
        }
    }

    /// A client-originated frame addressed to `to`.
    pub fn request(kind: MessageType, to: &str, payload: impl Into<String>) -> Self {
        Self {
            kind,
            from: String::new(),
            to: to.to_string(),
            payload: payload.into(),
        }
    }

    pub fn with_payload(kind: MessageType, payload: impl Into<String>) -> Self {
        Self {
            kind,
            from: String::new(),
            to: String::new(),
            payload: payload.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::with_payload(MessageType::Error, text)
    }

    /// Encode to a single text frame.
    pub fn encode(&self) -> String {
        // Serialization of a string-only struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode one text frame. Unknown tags are quarantined into the `error`
    /// type with empty fields; outer parse failure is `MalformedFrame`.
    pub fn decode(frame: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(frame).map_err(Error::MalformedFrame)?;
        match MessageType::from_tag(&raw.kind) {
            Some(kind) => Ok(Self {
                kind,
                from: raw.from,
                to: raw.to,
                payload: raw.payload,
            }),
            None => Ok(Self::new(MessageType::Error)),
        }
    }
}

/// Payload record of `relay_data` frames. Binary data travels as standard
/// base64 with `=` padding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPayload {
    pub is_binary: bool,
    pub data: String,
}

impl RelayPayload {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            is_binary: false,
            data: data.into(),
        }
    }

    pub fn binary(data: &[u8]) -> Self {
        Self {
            is_binary: true,
            data: BASE64.encode(data),
        }
    }

    /// Decode the base64 `data` of a binary record.
    pub fn decode_binary(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.data)
            .map_err(|e| Error::InvalidData(format!("bad base64 in relay payload: {e}")))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::InvalidData(format!("bad relay payload: {e}")))
    }
}

/// Payload record of `relay_auth_result` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    pub message: String,
}

impl AuthResult {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::InvalidData(format!("bad auth result: {e}")))
    }
}

/// Payload record of `candidate` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate: String,
    pub mid: String,
}

impl CandidateRecord {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::InvalidData(format!("bad candidate record: {e}")))
    }
}

/// Serialize a peer-list snapshot for the `peer_list` payload.
pub fn encode_peer_list(peers: &[String]) -> String {
    serde_json::to_string(peers).unwrap_or_default()
}

/// Parse a `peer_list` payload.
pub fn parse_peer_list(payload: &str) -> Result<Vec<String>> {
    serde_json::from_str(payload).map_err(|e| Error::InvalidData(format!("bad peer list: {e}")))
}
