//! Error types for the wire codec and the transport connections

use crate::protocol::Command;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures turning bytes into envelopes and back.
///
/// None of these are fatal: a read loop logs the error and drops the
/// datagram.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {command} payload: {reason}")]
    InvalidPayload { command: Command, reason: String },

    #[error("{0} is a local command and never crosses the wire")]
    LocalOnly(Command),

    #[error("encoded envelope is {size} bytes, datagrams are limited to {max}")]
    TooLarge { size: usize, max: usize },
}

/// Failures of a transport connection.
///
/// `Bind` and `Resolve` happen at startup and are meant to stop the process.
/// The others end a single `listen_and_serve` call.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("fail to listen on udp://{addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("fail to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("subscription refused by udp://{0}")]
    Refused(SocketAddr),

    #[error("no subscribe reply from udp://{addr} after {attempts} attempts")]
    HandshakeTimeout { addr: SocketAddr, attempts: u32 },

    #[error("connection is already serving")]
    AlreadyServing,
}
