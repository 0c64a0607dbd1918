//! Wire envelope, command taxonomy and the JSON datagram codec
//!
//! A datagram carries exactly one envelope:
//!
//! ```text
//! {"peerAddr": "127.0.0.1:3000", "data": {"cmd": "updatePaddleY", "value": 42.5}}
//! ```
//!
//! `cmd` is always the stable string name of a [`Command`], never its
//! ordinal, so reordering the enum does not break peers running an older
//! build. The payload shape is checked here; what the payload *means* is the
//! dispatcher's business.

use crate::error::CodecError;
use crate::state::MatchState;
use crate::MAX_DATAGRAM_SIZE;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;

/// Closed set of commands understood by both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Advisory text, no state effect
    Notify,
    /// Liveness probe request
    Ping,
    /// Local fan-out trigger raised by the ticker, never sent on the wire
    PingAll,
    /// Liveness probe reply carrying the peer's build version
    Pong,
    /// Readiness handshake before a match starts
    Ready,
    /// Graceful or forced disconnect notice
    Shutdown,
    /// Registration request, or its `accepted` / `refused` reply
    Subscribe,
    /// Authoritative match-state transition
    UpdateCurrentState,
    /// High-frequency paddle position
    UpdatePaddleY,
    /// Anything a newer or foreign peer sent that this build does not know
    Unknown,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Notify => "notify",
            Command::Ping => "ping",
            Command::PingAll => "pingAll",
            Command::Pong => "pong",
            Command::Ready => "ready",
            Command::Shutdown => "shutdown",
            Command::Subscribe => "subscribe",
            Command::UpdateCurrentState => "updateCurrentState",
            Command::UpdatePaddleY => "updatePaddleY",
            Command::Unknown => "unknown",
        }
    }

    /// Maps a wire name back to its command. Unrecognised names yield
    /// [`Command::Unknown`] rather than an error.
    pub fn from_name(name: &str) -> Self {
        match name {
            "notify" => Command::Notify,
            "ping" => Command::Ping,
            "pingAll" => Command::PingAll,
            "pong" => Command::Pong,
            "ready" => Command::Ready,
            "shutdown" => Command::Shutdown,
            "subscribe" => Command::Subscribe,
            "updateCurrentState" => Command::UpdateCurrentState,
            "updatePaddleY" => Command::UpdatePaddleY,
            _ => Command::Unknown,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a `subscribe` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeReply {
    Accepted,
    Refused,
}

impl SubscribeReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscribeReply::Accepted => "accepted",
            SubscribeReply::Refused => "refused",
        }
    }
}

/// Command-typed payload, one concrete shape per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Notify(String),
    Ping,
    PingAll,
    /// Build version of the answering peer
    Pong(String),
    Ready(bool),
    Shutdown,
    /// `None` for the request, `Some` for the reply
    Subscribe(Option<SubscribeReply>),
    UpdateCurrentState(MatchState),
    UpdatePaddleY(f64),
    /// Wire name of a command this build does not know
    Unknown(String),
}

impl Payload {
    pub fn command(&self) -> Command {
        match self {
            Payload::Notify(_) => Command::Notify,
            Payload::Ping => Command::Ping,
            Payload::PingAll => Command::PingAll,
            Payload::Pong(_) => Command::Pong,
            Payload::Ready(_) => Command::Ready,
            Payload::Shutdown => Command::Shutdown,
            Payload::Subscribe(_) => Command::Subscribe,
            Payload::UpdateCurrentState(_) => Command::UpdateCurrentState,
            Payload::UpdatePaddleY(_) => Command::UpdatePaddleY,
            Payload::Unknown(_) => Command::Unknown,
        }
    }

    fn wire_name(&self) -> &str {
        match self {
            Payload::Unknown(name) => name,
            other => other.command().as_str(),
        }
    }

    fn to_value(&self) -> Result<Option<Value>, CodecError> {
        let value = match self {
            Payload::Notify(text) => Some(Value::String(text.clone())),
            Payload::Pong(version) => Some(Value::String(version.clone())),
            Payload::Ready(ready) => Some(Value::Bool(*ready)),
            Payload::Subscribe(reply) => reply.map(|r| Value::String(r.as_str().to_string())),
            Payload::UpdateCurrentState(state) => Some(Value::String(state.as_str().to_string())),
            Payload::UpdatePaddleY(y) => {
                let number = serde_json::Number::from_f64(*y).ok_or_else(|| {
                    CodecError::InvalidPayload {
                        command: Command::UpdatePaddleY,
                        reason: format!("{} is not a finite number", y),
                    }
                })?;
                Some(Value::Number(number))
            }
            Payload::Ping | Payload::PingAll | Payload::Shutdown | Payload::Unknown(_) => None,
        };
        Ok(value)
    }

    fn from_wire(cmd: &str, value: Option<Value>) -> Result<Self, CodecError> {
        let command = Command::from_name(cmd);
        let payload = match command {
            Command::Notify => Payload::Notify(optional(command, value)?.unwrap_or_default()),
            Command::Ping => Payload::Ping,
            Command::PingAll => return Err(CodecError::LocalOnly(command)),
            Command::Pong => Payload::Pong(optional(command, value)?.unwrap_or_default()),
            Command::Ready => Payload::Ready(required(command, value)?),
            Command::Shutdown => Payload::Shutdown,
            Command::Subscribe => Payload::Subscribe(optional(command, value)?),
            Command::UpdateCurrentState => Payload::UpdateCurrentState(required(command, value)?),
            Command::UpdatePaddleY => Payload::UpdatePaddleY(required(command, value)?),
            Command::Unknown => Payload::Unknown(cmd.to_string()),
        };
        Ok(payload)
    }
}

fn optional<T: DeserializeOwned>(
    command: Command,
    value: Option<Value>,
) -> Result<Option<T>, CodecError> {
    value
        .map(|value| {
            serde_json::from_value(value).map_err(|e| CodecError::InvalidPayload {
                command,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn required<T: DeserializeOwned>(command: Command, value: Option<Value>) -> Result<T, CodecError> {
    optional(command, value)?.ok_or_else(|| CodecError::InvalidPayload {
        command,
        reason: "missing value".to_string(),
    })
}

/// The wire message unit: who it is for (or from) and what it says.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// `None` means "whoever is listening"
    pub peer_addr: Option<SocketAddr>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            peer_addr: None,
            payload,
        }
    }

    pub fn to(peer_addr: SocketAddr, payload: Payload) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            payload,
        }
    }

    /// Stamps the envelope with the address it was received from.
    pub fn with_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    pub fn command(&self) -> Command {
        self.payload.command()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.payload.wire_name())?;
        match &self.payload {
            Payload::Notify(text) => write!(f, " {:?}", text)?,
            Payload::Pong(version) => write!(f, " {}", version)?,
            Payload::Ready(ready) => write!(f, " {}", ready)?,
            Payload::Subscribe(Some(reply)) => write!(f, " {}", reply.as_str())?,
            Payload::UpdateCurrentState(state) => write!(f, " {}", state)?,
            Payload::UpdatePaddleY(y) => write!(f, " {:.2}", y)?,
            _ => {}
        }
        if let Some(addr) = self.peer_addr {
            write!(f, " @{}", addr)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(default)]
    peer_addr: String,
    data: WireData,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireData {
    cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

/// Serializes an envelope into a single datagram.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    if let Payload::PingAll = envelope.payload {
        return Err(CodecError::LocalOnly(Command::PingAll));
    }

    let wire = WireEnvelope {
        peer_addr: envelope
            .peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_default(),
        data: WireData {
            cmd: envelope.payload.wire_name().to_string(),
            value: envelope.payload.to_value()?,
        },
    };

    let bytes = serde_json::to_vec(&wire)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(bytes)
}

/// Parses a datagram. Never panics; malformed input is an error the caller
/// logs and discards.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)?;

    // Receivers overwrite this with the datagram's source address
    let peer_addr = if wire.peer_addr.is_empty() {
        None
    } else {
        match wire.peer_addr.parse::<SocketAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                debug!("ignoring unparsable peerAddr {:?}", wire.peer_addr);
                None
            }
        }
    };

    Ok(Envelope {
        peer_addr,
        payload: Payload::from_wire(&wire.data.cmd, wire.data.value)?,
    })
}
