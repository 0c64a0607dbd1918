//! # Pong Client Library
//!
//! The joining end of a two-peer pong session. A [`network::Client`]
//! subscribes to a server, probes it on a fixed cadence and hands every
//! envelope the server sends to a [`shared::Dispatcher`] running in the
//! client role, which mirrors the server's match state.
//!
//! ## Network Module (`network`)
//! - ephemeral UDP socket and server address resolution
//! - subscribe handshake, retried a few times since datagrams get lost
//! - read loop that only listens to the server it subscribed to
//! - non-blocking sends and a best-effort `shutdown` notice on teardown

pub mod network;

pub use network::Client;
