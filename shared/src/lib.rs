//! # Peer Synchronization Shared Library
//!
//! Everything both peers of a networked pong match agree on: the wire
//! envelope and its command taxonomy, the match-state vocabulary, and the
//! role-independent machinery that runs on top of a transport connection.
//!
//! ## Module Organization
//!
//! ### Protocol (`protocol`)
//! The [`Envelope`] wire unit, the closed [`Command`] set and its typed
//! [`Payload`] union, and the JSON datagram codec ([`encode`] / [`decode`]).
//!
//! ### Match State (`state`)
//! The [`MatchState`] machine shared with the game-rules module, including
//! which transitions the authoritative peer is allowed to take.
//!
//! ### Liveness (`liveness`) and Ticker (`ticker`)
//! Per-peer ping/pong bookkeeping and the periodic prober that drives it.
//! A peer that misses more than `missed_pings_max` consecutive probes is
//! treated exactly like a peer that announced its own shutdown.
//!
//! ### Dispatcher (`dispatcher`)
//! Maps inbound envelopes onto local state transitions and local
//! application events onto outbound envelopes. The server role is
//! authoritative and echoes every transition; the client mirrors them.
//!
//! ### Transport (`transport`) and Session (`session`)
//! The seam both connection variants implement, and the owner that cancels
//! and joins a connection's background tasks on teardown.
//!
//! ### Console (`console`)
//! Stdin commands and logged events, standing in for the game module in the
//! headless binaries.
//!
//! ## Usage Example
//!
//! ```rust
//! use shared::{decode, encode, Envelope, MatchState, Payload};
//!
//! let envelope = Envelope::new(Payload::UpdateCurrentState(MatchState::Play));
//! let bytes = encode(&envelope).expect("fits in a datagram");
//! assert_eq!(decode(&bytes).expect("valid envelope"), envelope);
//! ```

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod protocol;
pub mod session;
pub mod state;
pub mod ticker;
pub mod transport;

use std::time::Duration;

pub use config::SyncConfig;
pub use dispatcher::{AppEvent, Dispatcher, Notice, NoticeLevel, Role, SyncEvent};
pub use error::{CodecError, NetError};
pub use liveness::{Liveness, PeerLiveness, PeerStatus};
pub use protocol::{decode, encode, Command, Envelope, Payload, SubscribeReply};
pub use session::Session;
pub use state::MatchState;
pub use ticker::Ticker;
pub use transport::Transport;

/// Largest datagram either peer reads or writes.
pub const MAX_DATAGRAM_SIZE: usize = 1024;
/// Capacity of a subscriber's outbound queue before it is evicted.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 16;
/// Consecutive unanswered pings tolerated before a peer is declared gone.
pub const MISSED_PINGS_MAX: u32 = 3;
/// The client probes eagerly so the server can afford a slower cadence.
pub const CLIENT_PING_INTERVAL: Duration = Duration::from_secs(5);
pub const SERVER_PING_INTERVAL: Duration = Duration::from_secs(15);
/// Only one remote peer may be registered at a time.
pub const MAX_SUBSCRIBERS: usize = 1;
