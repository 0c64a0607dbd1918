//! Server transport connection: UDP read loop, subscriber writers and the
//! server-side liveness prober

use crate::hub::{Hub, HubHandle, Registration, WriterParts};
use log::{debug, error, info, warn};
use shared::ticker::{self, Ticker};
use shared::{
    decode, encode, Envelope, NetError, Payload, Session, SubscribeReply, SyncConfig, Transport,
    MAX_DATAGRAM_SIZE,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Authoritative end of a session. Cheap to clone; every clone drives the
/// same socket and hub.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    hub: HubHandle,
    /// Taken by the first `listen_and_serve`
    idle_hub: Mutex<Option<Hub>>,
    config: SyncConfig,
    cancel: CancellationToken,
    ticker_cancel: CancellationToken,
    closed: AtomicBool,
}

impl Server {
    /// Binds the listening socket. Failing to bind is the one fatal error of
    /// the server connection.
    pub async fn bind(addr: &str, config: SyncConfig) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let writer_socket = Arc::clone(&socket);
        let grace = config.shutdown_grace;
        let (hub, handle) = Hub::new(
            config.outbound_queue_capacity,
            Box::new(move |parts: WriterParts| {
                tokio::spawn(write_loop(Arc::clone(&writer_socket), parts, grace))
            }),
        );

        let cancel = CancellationToken::new();
        let ticker_cancel = cancel.child_token();

        Ok(Server {
            inner: Arc::new(ServerInner {
                socket,
                local_addr,
                hub: handle,
                idle_hub: Mutex::new(Some(hub)),
                config,
                cancel,
                ticker_cancel,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Currently registered peers.
    pub async fn subscribers(&self) -> Vec<SocketAddr> {
        self.inner.hub.subscribers().await
    }

    /// Runs the hub, the ticker and the read loop, forwarding every decoded
    /// envelope to `out`. Returns after `shutdown` once every task has
    /// stopped.
    pub async fn listen_and_serve(&self, out: mpsc::UnboundedSender<Envelope>) -> Result<(), NetError> {
        let idle_hub = self
            .inner
            .idle_hub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(hub) = idle_hub else {
            return if self.is_closed() {
                Ok(())
            } else {
                Err(NetError::AlreadyServing)
            };
        };

        let mut session = Session::new(self.inner.cancel.clone());
        session.spawn("hub", hub.run());
        session.spawn(
            "ticker",
            Ticker::new(self.inner.config.ping_interval, self.inner.ticker_cancel.clone())
                .run(self.clone(), out.clone()),
        );

        info!("Server listening on udp://{}", self.local_addr());
        self.read_loop(&out).await;

        self.shutdown().await;
        session.close().await;
        info!("Server on udp://{} stopped", self.local_addr());
        Ok(())
    }

    async fn read_loop(&self, out: &mpsc::UnboundedSender<Envelope>) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, addr) = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                result = self.inner.socket.recv_from(&mut buffer) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                },
            };

            let envelope = match decode(&buffer[..len]) {
                Ok(envelope) => envelope.with_addr(addr),
                Err(e) => {
                    warn!("Failed to decode datagram from {}: {}", addr, e);
                    continue;
                }
            };
            debug!("received {}", envelope);

            let forwarded = match envelope.payload {
                Payload::Subscribe(_) => self.subscribe(addr, out).await,
                Payload::Shutdown => {
                    self.inner.hub.unregister(addr);
                    out.send(envelope).is_ok()
                }
                _ => out.send(envelope).is_ok(),
            };
            if !forwarded {
                info!("Inbound channel closed, stopping read loop");
                break;
            }
        }
    }

    /// Returns false once the envelope consumer or the hub is gone.
    async fn subscribe(&self, addr: SocketAddr, out: &mpsc::UnboundedSender<Envelope>) -> bool {
        match self.inner.hub.register(addr).await {
            Some(Registration::Accepted) => {
                let accepted = Envelope::to(addr, Payload::Subscribe(Some(SubscribeReply::Accepted)));
                self.send(accepted.clone());
                if out.send(accepted).is_err() {
                    return false;
                }
                ticker::ping(self, out)
            }
            Some(Registration::Refused { current }) => {
                warn!("Refusing {}, {} is already subscribed", addr, current);
                let refused = Envelope::new(Payload::Subscribe(Some(SubscribeReply::Refused)));
                send_envelope(&self.inner.socket, &refused, addr).await;
                true
            }
            None => false,
        }
    }

    /// Stops the ticker, drains the hub (each writer says goodbye to its
    /// peer) and ends the read loop. Safe to call any number of times.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down server on udp://{}", self.local_addr());

        self.inner.ticker_cancel.cancel();
        let idle_hub = self
            .inner
            .idle_hub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if idle_hub.is_none() {
            self.inner.hub.shutdown().await;
        }
        self.inner.cancel.cancel();
    }
}

impl Transport for Server {
    fn send(&self, envelope: Envelope) {
        debug!("queueing {}", envelope);
        self.inner.hub.send(envelope);
    }

    fn evict(&self, peer_addr: SocketAddr) {
        self.inner.hub.unregister(peer_addr);
    }
}

/// Drains one subscriber's queue onto the socket, then tells the peer the
/// server is done with it.
async fn write_loop(socket: Arc<UdpSocket>, parts: WriterParts, grace: Duration) {
    let WriterParts {
        peer_addr,
        mut outbound,
        mut shutdown,
    } = parts;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = outbound.recv() => match next {
                Some(envelope) => send_envelope(&socket, &envelope, peer_addr).await,
                None => break,
            },
        }
    }

    let goodbye = Envelope::new(Payload::Shutdown);
    if tokio::time::timeout(grace, send_envelope(&socket, &goodbye, peer_addr))
        .await
        .is_err()
    {
        warn!("Timed out sending shutdown notice to {}", peer_addr);
    }
    debug!("writer for {} stopped", peer_addr);
}

async fn send_envelope(socket: &UdpSocket, envelope: &Envelope, addr: SocketAddr) {
    let data = match encode(envelope) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to encode {}: {}", envelope, e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&data, addr).await {
        error!("Failed to send {} to {}: {}", envelope.command(), addr, e);
    }
}
