//! # Pong Server Library
//!
//! The authoritative end of a two-peer pong session. It owns the canonical
//! match state (through a [`shared::Dispatcher`] running in the server
//! role), accepts at most one remote subscriber, and tells that subscriber
//! about every state transition.
//!
//! ## Module Organization
//!
//! ### Hub (`hub`)
//! The subscriber registry. A single task owns the table of subscribers and
//! serializes registration, removal and fan-out. Every subscriber has a
//! bounded outbound queue and a writer task; a queue that overflows gets its
//! subscriber evicted instead of slowing anyone else down.
//!
//! ### Network (`network`)
//! The UDP side of the server: binding, the read loop that decodes datagrams
//! and answers subscribe requests, the writers that drain subscriber queues,
//! and the liveness ticker. [`network::Server`] implements
//! [`shared::Transport`] so the dispatcher can reply and evict without
//! knowing about sockets.
//!
//! ## Teardown
//!
//! [`network::Server::shutdown`] stops the ticker first, then drains the hub
//! (each writer sends the peer a final `shutdown`), then ends the read loop.
//! Calling it again is a no-op.

pub mod hub;
pub mod network;

pub use hub::{Hub, HubHandle, Registration};
pub use network::Server;
