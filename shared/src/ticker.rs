//! Periodic liveness prober

use crate::protocol::{Envelope, Payload};
use crate::transport::Transport;
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest cadence the prober will run at.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Sends a `ping` to the remote side every `interval` and raises a local
/// `pingAll` so the dispatcher can account for the probe.
pub struct Ticker {
    interval: Duration,
    cancel: CancellationToken,
}

impl Ticker {
    /// A zero `interval` is raised to [`MIN_PING_INTERVAL`]; tokio refuses
    /// to build a zero-period interval.
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        if interval.is_zero() {
            warn!("ping interval of zero, probing every {:?} instead", MIN_PING_INTERVAL);
        }
        Self {
            interval: interval.max(MIN_PING_INTERVAL),
            cancel,
        }
    }

    /// Runs until the cancellation token fires or the inbound channel closes.
    pub async fn run<T: Transport>(self, transport: T, inbound: mpsc::UnboundedSender<Envelope>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("ticker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if !ping(&transport, &inbound) {
                        debug!("inbound channel closed, stopping ticker");
                        break;
                    }
                }
            }
        }
    }
}

/// One probe round, also used for the out-of-cadence ping right after a
/// subscription. Returns false once nobody is listening for `pingAll`.
pub fn ping<T: Transport + ?Sized>(transport: &T, inbound: &mpsc::UnboundedSender<Envelope>) -> bool {
    transport.send(Envelope::new(Payload::Ping));
    inbound.send(Envelope::new(Payload::PingAll)).is_ok()
}
