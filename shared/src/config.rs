//! Tunables for one side of a synchronized session

use crate::ticker::MIN_PING_INTERVAL;
use crate::{
    CLIENT_PING_INTERVAL, MISSED_PINGS_MAX, OUTBOUND_QUEUE_CAPACITY, SERVER_PING_INTERVAL,
};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Cadence of the liveness prober
    pub ping_interval: Duration,
    /// Unanswered pings tolerated before the peer is evicted
    pub missed_pings_max: u32,
    /// Envelopes a subscriber may have queued before it counts as congested
    pub outbound_queue_capacity: usize,
    /// How long the client waits for a subscribe reply per attempt
    pub handshake_timeout: Duration,
    pub handshake_attempts: u32,
    /// Upper bound on writing the final shutdown notice
    pub shutdown_grace: Duration,
}

impl SyncConfig {
    pub fn for_server() -> Self {
        Self {
            ping_interval: SERVER_PING_INTERVAL,
            ..Self::default()
        }
    }

    pub fn for_client() -> Self {
        Self::default()
    }

    /// Never below [`MIN_PING_INTERVAL`].
    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval.max(MIN_PING_INTERVAL);
        self
    }

    pub fn with_missed_pings_max(mut self, missed_pings_max: u32) -> Self {
        self.missed_pings_max = missed_pings_max;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ping_interval: CLIENT_PING_INTERVAL,
            missed_pings_max: MISSED_PINGS_MAX,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            handshake_timeout: Duration::from_millis(500),
            handshake_attempts: 3,
            shutdown_grace: Duration::from_millis(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults() {
        let server = SyncConfig::for_server();
        let client = SyncConfig::for_client();

        assert_eq!(server.ping_interval, Duration::from_secs(15));
        assert_eq!(client.ping_interval, Duration::from_secs(5));
        assert_eq!(server.missed_pings_max, 3);
        assert_eq!(client.outbound_queue_capacity, 16);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SyncConfig::for_server()
            .with_ping_interval(Duration::from_millis(50))
            .with_missed_pings_max(1);

        assert_eq!(config.ping_interval, Duration::from_millis(50));
        assert_eq!(config.missed_pings_max, 1);
        assert_eq!(config.handshake_attempts, 3);
    }

    #[test]
    fn test_zero_ping_interval_is_raised() {
        let config = SyncConfig::for_client().with_ping_interval(Duration::ZERO);
        assert_eq!(config.ping_interval, MIN_PING_INTERVAL);
    }
}
