//! Line-oriented stand-in for the game and UI layers
//!
//! The binaries have no renderer. Commands typed on stdin become
//! [`AppEvent`]s and every [`SyncEvent`] is written to the log.

use crate::dispatcher::{AppEvent, Notice, NoticeLevel, SyncEvent};
use log::{debug, info, warn};
use std::io::BufRead;
use tokio::sync::mpsc;

/// Feeds parsed commands to the dispatcher until the input ends or the
/// dispatcher goes away. Blocks, so run it on its own thread: a runtime
/// would otherwise wait on stdin at shutdown.
pub fn read_commands<R: BufRead>(input: R, app: mpsc::UnboundedSender<AppEvent>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<AppEvent>() {
            Ok(event) => {
                if app.send(event).is_err() {
                    break;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
    debug!("console input closed");
}

pub async fn print_events(mut events: mpsc::UnboundedReceiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Notice(Notice { level, text }) => match level {
                NoticeLevel::Warning => warn!("{}", text),
                NoticeLevel::Info | NoticeLevel::Log => info!("{}", text),
            },
            SyncEvent::StateChanged(state) => info!("match state: {}", state),
            SyncEvent::ReadyChanged(ready) => info!("ready: {}", ready),
            SyncEvent::RemotePaddleMoved(y) => debug!("remote paddle at {:.2}", y),
            SyncEvent::PeerConnected(addr) => info!("peer {} connected", addr),
            SyncEvent::PeerDisconnected(addr) => info!("peer {} disconnected", addr),
            SyncEvent::Refused(addr) => warn!("{} refused the subscription", addr),
        }
    }
}
