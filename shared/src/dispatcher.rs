//! Routing between the network and the local match
//!
//! The dispatcher is the only task that owns the local view of the session:
//! the match state, the readiness flag, the last paddle position received,
//! and the liveness record of the remote peer. It consumes two inputs:
//!
//! - decoded envelopes from the connection's read loop (plus the ticker's
//!   local `pingAll`), and
//! - [`AppEvent`]s raised by the game module,
//!
//! and produces outbound envelopes on the [`Transport`] and [`SyncEvent`]s
//! for the game/UI layer.
//!
//! The server role is authoritative: it validates and applies transitions
//! and echoes each one as `updateCurrentState`. The client role only mirrors
//! those echoes, apart from toggling a local pause before a match starts.

use crate::config::SyncConfig;
use crate::liveness::{Liveness, PeerStatus};
use crate::protocol::{Envelope, Payload, SubscribeReply};
use crate::state::MatchState;
use crate::transport::Transport;
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Hosts the session and owns the canonical match state
    Server,
    /// Joins a session and mirrors the server's match state
    Client,
}

impl Role {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Local happenings the game module reports to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The game rules want to move the match to a new state
    Transition(MatchState),
    /// The host asked to start the match
    StartMatch,
    /// The joining player flipped their readiness
    ToggleReady,
    /// The local paddle moved
    PaddleMoved(f64),
    /// Free text for the remote player
    Notify(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAppEventError(String);

impl fmt::Display for ParseAppEventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised command {:?}", self.0)
    }
}

impl std::error::Error for ParseAppEventError {}

/// Console syntax used by the headless binaries:
/// `start`, `ready`, `y <position>`, `say <text>`, or a state name.
impl FromStr for AppEvent {
    type Err = ParseAppEventError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match word {
            "start" => Ok(AppEvent::StartMatch),
            "ready" => Ok(AppEvent::ToggleReady),
            "y" => rest
                .parse::<f64>()
                .map(AppEvent::PaddleMoved)
                .map_err(|_| ParseAppEventError(line.to_string())),
            "say" if !rest.is_empty() => Ok(AppEvent::Notify(rest.to_string())),
            other => MatchState::from_name(other)
                .map(AppEvent::Transition)
                .ok_or_else(|| ParseAppEventError(line.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Log,
    Warning,
}

/// Advisory line for the player, like "Lost connection...".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// What the dispatcher reports to the game/UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(MatchState),
    RemotePaddleMoved(f64),
    ReadyChanged(bool),
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
    Refused(SocketAddr),
    Notice(Notice),
}

pub struct Dispatcher<T: Transport> {
    role: Role,
    transport: T,
    version: String,
    liveness: Liveness,
    current_state: MatchState,
    ready: bool,
    local_pause: bool,
    remote_paddle_y: Option<f64>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        role: Role,
        transport: T,
        version: impl Into<String>,
        config: &SyncConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            role,
            transport,
            version: version.into(),
            liveness: Liveness::new(config.missed_pings_max),
            current_state: MatchState::Start,
            ready: false,
            local_pause: false,
            remote_paddle_y: None,
            events,
        }
    }

    pub fn current_state(&self) -> MatchState {
        self.current_state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn remote_paddle_y(&self) -> Option<f64> {
        self.remote_paddle_y
    }

    pub fn peers(&self) -> Vec<PeerStatus> {
        self.liveness.statuses()
    }

    /// Processes both inputs until cancelled or until the connection drops
    /// its end of `inbound`. Envelopes already queued are handled first, so
    /// a final `shutdown` still reaches the game.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
        mut app: mpsc::UnboundedReceiver<AppEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => {
                        debug!("inbound channel closed");
                        break;
                    }
                },
                Some(event) = app.recv() => self.handle_app_event(event),
                _ = cancel.cancelled() => break,
            }
        }
        debug!("dispatcher stopped");
    }

    /// Applies one envelope received from the network (or the ticker).
    pub fn handle_envelope(&mut self, envelope: Envelope) {
        match &envelope.payload {
            Payload::PingAll => return self.probe_peers(),
            Payload::Subscribe(reply) => return self.handle_subscribe(envelope.peer_addr, *reply),
            Payload::Unknown(name) => {
                debug!("ignoring unknown command {:?} from {:?}", name, envelope.peer_addr);
                return;
            }
            _ => {}
        }

        let Some(addr) = envelope
            .peer_addr
            .filter(|addr| self.liveness.contains(addr))
        else {
            debug!("ignoring {} from an untracked peer", envelope);
            return;
        };

        match envelope.payload {
            Payload::Notify(text) => self.notice(NoticeLevel::Info, text),
            Payload::Ping => self
                .transport
                .send(Envelope::to(addr, Payload::Pong(self.version.clone()))),
            Payload::Pong(version) => {
                self.liveness.record_pong(&addr, version, Instant::now());
            }
            Payload::Ready(ready) => self.handle_ready(addr, ready),
            Payload::Shutdown => self.disconnect(addr),
            Payload::UpdateCurrentState(state) => self.mirror_state(state),
            Payload::UpdatePaddleY(y) => {
                if !y.is_finite() {
                    warn!("dropping non-finite paddle position from {}", addr);
                    return;
                }
                self.remote_paddle_y = Some(y);
                self.emit(SyncEvent::RemotePaddleMoved(y));
            }
            Payload::PingAll | Payload::Subscribe(_) | Payload::Unknown(_) => {}
        }
    }

    /// Applies one event raised by the local game module.
    pub fn handle_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Transition(next) => self.request_transition(next),
            AppEvent::StartMatch => self.start_match(),
            AppEvent::ToggleReady => self.toggle_ready(),
            AppEvent::PaddleMoved(y) => {
                if y.is_finite() {
                    self.transport.send(Envelope::new(Payload::UpdatePaddleY(y)));
                } else {
                    warn!("not sending non-finite paddle position");
                }
            }
            AppEvent::Notify(text) => self.transport.send(Envelope::new(Payload::Notify(text))),
        }
    }

    fn probe_peers(&mut self) {
        for addr in self.liveness.record_ping(Instant::now()) {
            warn!("{} is not responding, evicting", addr);
            self.handle_envelope(Envelope::to(addr, Payload::Shutdown));
        }
    }

    fn handle_subscribe(&mut self, peer_addr: Option<SocketAddr>, reply: Option<SubscribeReply>) {
        let (Some(addr), Some(reply)) = (peer_addr, reply) else {
            debug!("ignoring subscribe request, the connection answers those");
            return;
        };

        match (self.role, reply) {
            (Role::Server, SubscribeReply::Accepted) => {
                if self.liveness.contains(&addr) {
                    debug!("{} subscribed again", addr);
                    return;
                }
                self.liveness.track(addr, Instant::now());
                self.set_ready(false);
                self.notice(NoticeLevel::Log, "New subscriber...");
                self.notice(NoticeLevel::Log, format!("{} connected", addr));
                self.emit(SyncEvent::PeerConnected(addr));
            }
            (Role::Client, SubscribeReply::Accepted) => {
                self.liveness.track(addr, Instant::now());
                self.notice(NoticeLevel::Info, "Toggle ready to start...");
                self.emit(SyncEvent::PeerConnected(addr));
            }
            (Role::Client, SubscribeReply::Refused) => {
                self.notice(NoticeLevel::Warning, "Connection refused...");
                self.emit(SyncEvent::Refused(addr));
            }
            (Role::Server, SubscribeReply::Refused) => {
                debug!("ignoring refusal echoed back by {}", addr);
            }
        }
    }

    fn handle_ready(&mut self, addr: SocketAddr, ready: bool) {
        if !self.role.is_authoritative() {
            debug!("ignoring readiness from the server");
            return;
        }
        self.set_ready(ready);
        if ready {
            self.notice(NoticeLevel::Info, format!("{} ready to play", addr));
        } else {
            self.notice(NoticeLevel::Warning, format!("{} not ready anymore", addr));
        }
    }

    fn disconnect(&mut self, addr: SocketAddr) {
        if self.liveness.forget(&addr).is_none() {
            return;
        }
        info!("{} disconnected", addr);
        self.transport.evict(addr);
        self.notice(NoticeLevel::Warning, "Lost connection...");
        self.notice(NoticeLevel::Warning, format!("{} disconnected", addr));
        self.emit(SyncEvent::PeerDisconnected(addr));
        self.local_pause = false;
        self.apply_state(MatchState::Start);
    }

    fn mirror_state(&mut self, state: MatchState) {
        if self.role.is_authoritative() {
            warn!("ignoring state {} pushed by the client", state);
            return;
        }
        self.local_pause = false;
        self.apply_state(state);
    }

    fn request_transition(&mut self, next: MatchState) {
        match self.role {
            Role::Server => {
                if self.current_state.can_transition_to(next) {
                    self.apply_state(next);
                } else {
                    warn!("rejecting transition {} -> {}", self.current_state, next);
                }
            }
            Role::Client => match (self.current_state, next) {
                (MatchState::Start, MatchState::Pause) => {
                    self.local_pause = true;
                    self.apply_state(next);
                }
                (MatchState::Pause, MatchState::Start) if self.local_pause => {
                    self.local_pause = false;
                    self.apply_state(next);
                }
                (current, next) => {
                    debug!("client cannot move {} -> {}, the server decides", current, next)
                }
            },
        }
    }

    fn start_match(&mut self) {
        if !self.role.is_authoritative() {
            debug!("only the server starts a match");
            return;
        }
        if self.current_state != MatchState::Start {
            warn!("cannot start a match from {}", self.current_state);
            return;
        }
        if !self.ready {
            self.notice(NoticeLevel::Warning, "Remote player is not ready");
            return;
        }
        self.notice(NoticeLevel::Log, "Start a new game");
        self.apply_state(MatchState::Resume);
    }

    fn toggle_ready(&mut self) {
        if self.role.is_authoritative() || self.current_state != MatchState::Start {
            debug!("readiness can only be toggled by the client before a match");
            return;
        }
        let ready = !self.ready;
        self.set_ready(ready);
        self.transport.send(Envelope::new(Payload::Ready(ready)));
    }

    fn apply_state(&mut self, state: MatchState) {
        self.current_state = state;
        match state {
            MatchState::Start | MatchState::MatchOver => self.set_ready(false),
            _ => {}
        }
        match state {
            MatchState::Pause => self.notice(NoticeLevel::Log, "Pause game..."),
            MatchState::PointLostLeft => self.notice(NoticeLevel::Log, "Player R wins the point"),
            MatchState::PointLostRight => self.notice(NoticeLevel::Log, "Player L wins the point"),
            MatchState::MatchOver => self.notice(NoticeLevel::Log, "End of the game"),
            _ => {}
        }
        self.emit(SyncEvent::StateChanged(state));

        if self.role.is_authoritative() {
            self.transport
                .send(Envelope::new(Payload::UpdateCurrentState(state)));
        }
    }

    fn set_ready(&mut self, ready: bool) {
        if self.ready != ready {
            self.ready = ready;
            self.emit(SyncEvent::ReadyChanged(ready));
        }
    }

    fn notice(&self, level: NoticeLevel, text: impl Into<String>) {
        self.emit(SyncEvent::Notice(Notice {
            level,
            text: text.into(),
        }));
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("no one is listening for sync events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Envelope>>,
        evicted: Mutex<Vec<SocketAddr>>,
    }

    impl RecordingTransport {
        fn take_sent(&self) -> Vec<Envelope> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, envelope: Envelope) {
            self.sent.lock().unwrap().push(envelope);
        }

        fn evict(&self, peer_addr: SocketAddr) {
            self.evicted.lock().unwrap().push(peer_addr);
        }
    }

    type TestDispatcher = Dispatcher<Arc<RecordingTransport>>;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn stranger() -> SocketAddr {
        "127.0.0.1:50001".parse().unwrap()
    }

    fn dispatcher(
        role: Role,
    ) -> (
        TestDispatcher,
        Arc<RecordingTransport>,
        mpsc::UnboundedReceiver<SyncEvent>,
    ) {
        let transport = Arc::new(RecordingTransport::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            role,
            Arc::clone(&transport),
            "test-1.0",
            &SyncConfig::default(),
            events_tx,
        );
        (dispatcher, transport, events_rx)
    }

    fn connected(role: Role) -> (TestDispatcher, Arc<RecordingTransport>, mpsc::UnboundedReceiver<SyncEvent>) {
        let (mut dispatcher, transport, mut events) = dispatcher(role);
        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::Subscribe(Some(SubscribeReply::Accepted)),
        ));
        while events.try_recv().is_ok() {}
        transport.take_sent();
        (dispatcher, transport, events)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test]
    async fn test_server_tracks_accepted_subscriber() {
        let (mut dispatcher, _transport, mut events) = dispatcher(Role::Server);

        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::Subscribe(Some(SubscribeReply::Accepted)),
        ));

        assert_eq!(dispatcher.peers().len(), 1);
        assert!(drain(&mut events).contains(&SyncEvent::PeerConnected(peer())));
    }

    #[tokio::test]
    async fn test_client_reports_refusal() {
        let (mut dispatcher, _transport, mut events) = dispatcher(Role::Client);

        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::Subscribe(Some(SubscribeReply::Refused)),
        ));

        assert!(dispatcher.peers().is_empty());
        let events = drain(&mut events);
        assert!(events.contains(&SyncEvent::Refused(peer())));
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::Notice(Notice { level: NoticeLevel::Warning, text }) if text == "Connection refused..."
        )));
    }

    #[tokio::test]
    async fn test_ping_from_peer_is_answered_with_version() {
        let (mut dispatcher, transport, _events) = connected(Role::Server);

        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Ping));

        let sent = transport.take_sent();
        assert_eq!(sent, vec![Envelope::to(peer(), Payload::Pong("test-1.0".to_string()))]);
    }

    #[tokio::test]
    async fn test_traffic_from_untracked_peer_is_ignored() {
        let (mut dispatcher, transport, mut events) = connected(Role::Server);

        dispatcher.handle_envelope(Envelope::to(stranger(), Payload::Ping));
        dispatcher.handle_envelope(Envelope::to(stranger(), Payload::Ready(true)));
        dispatcher.handle_envelope(Envelope::to(stranger(), Payload::Shutdown));

        assert!(transport.take_sent().is_empty());
        assert!(drain(&mut events).is_empty());
        assert!(!dispatcher.is_ready());
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let (mut dispatcher, transport, mut events) = connected(Role::Client);

        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::Unknown("updateBallPosition".to_string()),
        ));

        assert!(transport.take_sent().is_empty());
        assert!(drain(&mut events).is_empty());
        assert_eq!(dispatcher.current_state(), MatchState::Start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_after_missed_pings() {
        let (mut dispatcher, transport, mut events) = connected(Role::Server);

        for _ in 0..3 {
            dispatcher.handle_envelope(Envelope::new(Payload::PingAll));
            assert_eq!(dispatcher.peers().len(), 1);
        }
        assert!(transport.evicted.lock().unwrap().is_empty());

        dispatcher.handle_envelope(Envelope::new(Payload::PingAll));

        assert!(dispatcher.peers().is_empty());
        assert_eq!(*transport.evicted.lock().unwrap(), vec![peer()]);
        assert_eq!(
            transport.take_sent(),
            vec![Envelope::new(Payload::UpdateCurrentState(MatchState::Start))]
        );
        assert!(drain(&mut events).contains(&SyncEvent::PeerDisconnected(peer())));

        dispatcher.handle_envelope(Envelope::new(Payload::PingAll));
        assert_eq!(transport.evicted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_peer_alive_and_measures_rtt() {
        let (mut dispatcher, _transport, _events) = connected(Role::Client);

        for _ in 0..10 {
            dispatcher.handle_envelope(Envelope::new(Payload::PingAll));
            tokio::time::advance(std::time::Duration::from_millis(25)).await;
            dispatcher.handle_envelope(Envelope::to(peer(), Payload::Pong("server-2.0".to_string())));
        }

        let peers = dispatcher.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].missed_pings, 0);
        assert_eq!(peers[0].peer_version, "server-2.0");
        assert_eq!(peers[0].rtt, std::time::Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_shutdown_resets_match() {
        let (mut dispatcher, transport, mut events) = connected(Role::Server);
        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Ready(true)));
        dispatcher.handle_app_event(AppEvent::StartMatch);
        dispatcher.handle_app_event(AppEvent::Transition(MatchState::Play));
        transport.take_sent();
        drain(&mut events);

        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Shutdown));

        assert_eq!(dispatcher.current_state(), MatchState::Start);
        assert!(!dispatcher.is_ready());
        assert_eq!(*transport.evicted.lock().unwrap(), vec![peer()]);
        let events = drain(&mut events);
        assert!(events.contains(&SyncEvent::PeerDisconnected(peer())));
        assert!(events.contains(&SyncEvent::StateChanged(MatchState::Start)));
    }

    #[tokio::test]
    async fn test_start_requires_ready_peer() {
        let (mut dispatcher, transport, mut events) = connected(Role::Server);

        dispatcher.handle_app_event(AppEvent::StartMatch);
        assert_eq!(dispatcher.current_state(), MatchState::Start);
        assert!(transport.take_sent().is_empty());
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            SyncEvent::Notice(Notice { level: NoticeLevel::Warning, .. })
        )));

        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Ready(true)));
        assert!(dispatcher.is_ready());

        dispatcher.handle_app_event(AppEvent::StartMatch);
        assert_eq!(dispatcher.current_state(), MatchState::Resume);
        assert_eq!(
            transport.take_sent(),
            vec![Envelope::new(Payload::UpdateCurrentState(MatchState::Resume))]
        );
    }

    #[tokio::test]
    async fn test_server_echoes_every_transition() {
        let (mut dispatcher, transport, _events) = connected(Role::Server);
        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Ready(true)));
        dispatcher.handle_app_event(AppEvent::StartMatch);

        for state in [
            MatchState::Play,
            MatchState::Pause,
            MatchState::Play,
            MatchState::PointLostLeft,
            MatchState::MatchOver,
        ] {
            dispatcher.handle_app_event(AppEvent::Transition(state));
        }

        let echoed: Vec<MatchState> = transport
            .take_sent()
            .into_iter()
            .filter_map(|e| match e.payload {
                Payload::UpdateCurrentState(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            echoed,
            vec![
                MatchState::Resume,
                MatchState::Play,
                MatchState::Pause,
                MatchState::Play,
                MatchState::PointLostLeft,
                MatchState::MatchOver,
            ]
        );
        assert!(!dispatcher.is_ready());
    }

    #[tokio::test]
    async fn test_server_rejects_invalid_transition() {
        let (mut dispatcher, transport, _events) = connected(Role::Server);

        dispatcher.handle_app_event(AppEvent::Transition(MatchState::Play));

        assert_eq!(dispatcher.current_state(), MatchState::Start);
        assert!(transport.take_sent().is_empty());
    }

    #[tokio::test]
    async fn test_server_ignores_state_from_client() {
        let (mut dispatcher, _transport, _events) = connected(Role::Server);

        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::UpdateCurrentState(MatchState::MatchOver),
        ));

        assert_eq!(dispatcher.current_state(), MatchState::Start);
    }

    #[tokio::test]
    async fn test_client_mirrors_server_state() {
        let (mut dispatcher, transport, mut events) = connected(Role::Client);

        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::UpdateCurrentState(MatchState::Resume),
        ));

        assert_eq!(dispatcher.current_state(), MatchState::Resume);
        assert!(transport.take_sent().is_empty());
        assert!(drain(&mut events).contains(&SyncEvent::StateChanged(MatchState::Resume)));
    }

    #[tokio::test]
    async fn test_client_only_toggles_local_pause() {
        let (mut dispatcher, transport, _events) = connected(Role::Client);

        dispatcher.handle_app_event(AppEvent::Transition(MatchState::Resume));
        assert_eq!(dispatcher.current_state(), MatchState::Start);

        dispatcher.handle_app_event(AppEvent::Transition(MatchState::Pause));
        assert_eq!(dispatcher.current_state(), MatchState::Pause);
        dispatcher.handle_app_event(AppEvent::Transition(MatchState::Start));
        assert_eq!(dispatcher.current_state(), MatchState::Start);

        assert!(transport.take_sent().is_empty());
    }

    #[tokio::test]
    async fn test_client_cannot_unpause_a_server_pause() {
        let (mut dispatcher, _transport, _events) = connected(Role::Client);

        dispatcher.handle_envelope(Envelope::to(
            peer(),
            Payload::UpdateCurrentState(MatchState::Pause),
        ));
        dispatcher.handle_app_event(AppEvent::Transition(MatchState::Start));

        assert_eq!(dispatcher.current_state(), MatchState::Pause);
    }

    #[tokio::test]
    async fn test_client_toggles_ready() {
        let (mut dispatcher, transport, _events) = connected(Role::Client);

        dispatcher.handle_app_event(AppEvent::ToggleReady);
        dispatcher.handle_app_event(AppEvent::ToggleReady);

        let sent: Vec<Command> = transport.take_sent().iter().map(Envelope::command).collect();
        assert_eq!(sent, vec![Command::Ready, Command::Ready]);
        assert!(!dispatcher.is_ready());
    }

    #[tokio::test]
    async fn test_ready_is_reset_for_a_new_subscriber() {
        let (mut dispatcher, _transport, _events) = connected(Role::Server);
        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Ready(true)));
        dispatcher.handle_envelope(Envelope::to(peer(), Payload::Shutdown));

        dispatcher.handle_envelope(Envelope::to(
            stranger(),
            Payload::Subscribe(Some(SubscribeReply::Accepted)),
        ));

        assert!(!dispatcher.is_ready());
        assert_eq!(dispatcher.peers()[0].peer_addr, stranger());
    }

    #[tokio::test]
    async fn test_paddle_position_is_overwritten() {
        let (mut dispatcher, _transport, mut events) = connected(Role::Server);

        dispatcher.handle_envelope(Envelope::to(peer(), Payload::UpdatePaddleY(120.0)));
        dispatcher.handle_envelope(Envelope::to(peer(), Payload::UpdatePaddleY(80.5)));
        dispatcher.handle_envelope(Envelope::to(peer(), Payload::UpdatePaddleY(f64::INFINITY)));

        assert_eq!(dispatcher.remote_paddle_y(), Some(80.5));
        let moves: Vec<SyncEvent> = drain(&mut events);
        assert_eq!(
            moves,
            vec![
                SyncEvent::RemotePaddleMoved(120.0),
                SyncEvent::RemotePaddleMoved(80.5),
            ]
        );
    }

    #[tokio::test]
    async fn test_local_paddle_and_notify_are_sent() {
        let (mut dispatcher, transport, _events) = connected(Role::Client);

        dispatcher.handle_app_event(AppEvent::PaddleMoved(33.0));
        dispatcher.handle_app_event(AppEvent::PaddleMoved(f64::NAN));
        dispatcher.handle_app_event(AppEvent::Notify("gg".to_string()));

        assert_eq!(
            transport.take_sent(),
            vec![
                Envelope::new(Payload::UpdatePaddleY(33.0)),
                Envelope::new(Payload::Notify("gg".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (dispatcher, _transport, _events) = dispatcher(Role::Server);
        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (_app_tx, app_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(dispatcher.run(inbound_rx, app_rx, cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_drains_inbound_after_connection_closes() {
        let (dispatcher, _transport, mut events) = dispatcher(Role::Client);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (_app_tx, app_rx) = mpsc::unbounded_channel();

        inbound_tx
            .send(Envelope::to(peer(), Payload::Subscribe(Some(SubscribeReply::Accepted))))
            .unwrap();
        inbound_tx.send(Envelope::to(peer(), Payload::Shutdown)).unwrap();
        drop(inbound_tx);

        dispatcher.run(inbound_rx, app_rx, CancellationToken::new()).await;

        let events = drain(&mut events);
        assert!(events.contains(&SyncEvent::PeerConnected(peer())));
        assert!(events.contains(&SyncEvent::PeerDisconnected(peer())));
    }

    #[test]
    fn test_parse_app_events() {
        assert_eq!("start".parse(), Ok(AppEvent::StartMatch));
        assert_eq!(" ready ".parse(), Ok(AppEvent::ToggleReady));
        assert_eq!("y 42.5".parse(), Ok(AppEvent::PaddleMoved(42.5)));
        assert_eq!("say good game".parse(), Ok(AppEvent::Notify("good game".to_string())));
        assert_eq!("Pause".parse(), Ok(AppEvent::Transition(MatchState::Pause)));
        assert!("y high".parse::<AppEvent>().is_err());
        assert!("say".parse::<AppEvent>().is_err());
        assert!("jump".parse::<AppEvent>().is_err());
    }
}
