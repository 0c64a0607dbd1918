//! Ping/pong bookkeeping for the remote peer
//!
//! Every probe counts as missed the moment it is sent and is forgiven when
//! the matching pong arrives. A peer whose count climbs past
//! `missed_pings_max` is reported once and then forgotten by the caller.

use log::debug;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Responsiveness record for one remote peer.
#[derive(Debug, Clone)]
pub struct PeerLiveness {
    pub peer_addr: SocketAddr,
    pub last_ping_sent_at: Option<Instant>,
    pub last_pong_at: Option<Instant>,
    pub missed_pings: u32,
    pub missed_pings_max: u32,
    pub peer_version: String,
}

impl PeerLiveness {
    pub fn new(peer_addr: SocketAddr, missed_pings_max: u32, now: Instant) -> Self {
        Self {
            peer_addr,
            last_ping_sent_at: Some(now),
            last_pong_at: None,
            missed_pings: 0,
            missed_pings_max,
            peer_version: String::new(),
        }
    }

    /// Counts a probe as missed until proven otherwise. Returns true once
    /// the peer has missed more probes than it is allowed.
    pub fn record_ping(&mut self, now: Instant) -> bool {
        self.last_ping_sent_at = Some(now);
        self.missed_pings += 1;
        self.is_unresponsive()
    }

    pub fn record_pong(&mut self, peer_version: String, now: Instant) {
        self.last_pong_at = Some(now);
        self.missed_pings = 0;
        self.peer_version = peer_version;
    }

    pub fn is_unresponsive(&self) -> bool {
        self.missed_pings > self.missed_pings_max
    }

    /// Time between the latest ping and the pong that followed it. Zero when
    /// no pong has arrived since the latest ping.
    pub fn rtt(&self) -> Duration {
        match (self.last_ping_sent_at, self.last_pong_at) {
            (Some(ping), Some(pong)) if pong > ping => pong - ping,
            _ => Duration::ZERO,
        }
    }

    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            peer_addr: self.peer_addr,
            rtt: self.rtt(),
            missed_pings: self.missed_pings,
            peer_version: self.peer_version.clone(),
        }
    }
}

/// Value copy of a peer's liveness, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub peer_addr: SocketAddr,
    pub rtt: Duration,
    pub missed_pings: u32,
    pub peer_version: String,
}

/// Liveness records of every tracked peer, keyed by address.
#[derive(Debug)]
pub struct Liveness {
    peers: HashMap<SocketAddr, PeerLiveness>,
    missed_pings_max: u32,
}

impl Liveness {
    pub fn new(missed_pings_max: u32) -> Self {
        Self {
            peers: HashMap::new(),
            missed_pings_max,
        }
    }

    /// Starts tracking a peer. Tracking an already known peer keeps its
    /// existing record.
    pub fn track(&mut self, peer_addr: SocketAddr, now: Instant) {
        let max = self.missed_pings_max;
        self.peers
            .entry(peer_addr)
            .or_insert_with(|| PeerLiveness::new(peer_addr, max, now));
    }

    pub fn forget(&mut self, peer_addr: &SocketAddr) -> Option<PeerLiveness> {
        self.peers.remove(peer_addr)
    }

    pub fn contains(&self, peer_addr: &SocketAddr) -> bool {
        self.peers.contains_key(peer_addr)
    }

    /// Records a probe sent to every tracked peer and returns the peers that
    /// just crossed the threshold, in address order.
    pub fn record_ping(&mut self, now: Instant) -> Vec<SocketAddr> {
        let mut expired: Vec<SocketAddr> = self
            .peers
            .values_mut()
            .filter_map(|peer| peer.record_ping(now).then_some(peer.peer_addr))
            .collect();
        expired.sort();
        expired
    }

    /// Returns false if the pong came from a peer nobody is tracking.
    pub fn record_pong(&mut self, peer_addr: &SocketAddr, peer_version: String, now: Instant) -> bool {
        match self.peers.get_mut(peer_addr) {
            Some(peer) => {
                peer.record_pong(peer_version, now);
                debug!("pong from {} after {:?}", peer_addr, peer.rtt());
                true
            }
            None => false,
        }
    }

    pub fn statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self.peers.values().map(PeerLiveness::status).collect();
        statuses.sort_by_key(|status| status.peer_addr);
        statuses
    }
}
