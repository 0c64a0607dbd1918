use log::{debug, error, info, warn};
use shared::ticker::{self, Ticker};
use shared::{
    decode, encode, Envelope, NetError, Payload, Session, SubscribeReply, SyncConfig, Transport,
    MAX_DATAGRAM_SIZE,
};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// Joining end of a session, talking to exactly one server.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: SyncConfig,
    cancel: CancellationToken,
    ticker_cancel: CancellationToken,
    serving: AtomicBool,
    closed: AtomicBool,
}

impl Client {
    /// Resolves `server` and binds an ephemeral local port. Nothing is sent
    /// until `listen_and_serve`.
    pub async fn connect(server: &str, config: SyncConfig) -> Result<Self, NetError> {
        let server_addr = lookup_host(server)
            .await
            .map_err(|source| NetError::Resolve {
                addr: server.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| NetError::Resolve {
                addr: server.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no address found"),
            })?;

        let bind_addr = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| NetError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        debug!("client bound to {}", socket.local_addr()?);

        let cancel = CancellationToken::new();
        let ticker_cancel = cancel.child_token();

        Ok(Client {
            inner: Arc::new(ClientInner {
                socket,
                server_addr,
                config,
                cancel,
                ticker_cancel,
                serving: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Subscribes to the server, then probes it and forwards everything it
    /// says to `out` until either side shuts down.
    ///
    /// A refusal is forwarded too, so the dispatcher can tell the player,
    /// and then returned as [`NetError::Refused`].
    pub async fn listen_and_serve(&self, out: mpsc::UnboundedSender<Envelope>) -> Result<(), NetError> {
        if self.inner.serving.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyServing);
        }

        let reply = tokio::select! {
            _ = self.inner.cancel.cancelled() => return Ok(()),
            reply = self.handshake() => match reply {
                Ok(reply) => reply,
                Err(e) => {
                    self.inner.serving.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            },
        };
        let server_addr = self.server_addr();
        let _ = out.send(Envelope::to(server_addr, Payload::Subscribe(Some(reply))));

        if reply == SubscribeReply::Refused {
            warn!("Subscription refused by udp://{}", server_addr);
            self.inner.closed.store(true, Ordering::SeqCst);
            self.inner.cancel.cancel();
            return Err(NetError::Refused(server_addr));
        }
        info!("Subscribed to udp://{}", server_addr);

        let mut session = Session::new(self.inner.cancel.clone());
        session.spawn(
            "ticker",
            Ticker::new(self.inner.config.ping_interval, self.inner.ticker_cancel.clone())
                .run(self.clone(), out.clone()),
        );
        ticker::ping(self, &out);

        self.read_loop(&out).await;

        self.shutdown().await;
        session.close().await;
        Ok(())
    }

    /// Sends `subscribe` until the server answers, retrying because the
    /// request or the reply may be lost.
    async fn handshake(&self) -> Result<SubscribeReply, NetError> {
        let server_addr = self.server_addr();
        let attempts = self.inner.config.handshake_attempts.max(1);
        let request = encode(&Envelope::new(Payload::Subscribe(None)))?;
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        for attempt in 1..=attempts {
            debug!("subscribe attempt {}/{} to {}", attempt, attempts, server_addr);
            self.inner.socket.send_to(&request, server_addr).await?;

            let deadline = Instant::now() + self.inner.config.handshake_timeout;
            loop {
                let (len, from) = match timeout_at(deadline, self.inner.socket.recv_from(&mut buffer)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        warn!("Error waiting for subscribe reply: {}", e);
                        break;
                    }
                    Err(_) => break,
                };
                if from != server_addr {
                    debug!("ignoring datagram from {} during handshake", from);
                    continue;
                }
                match decode(&buffer[..len]) {
                    Ok(Envelope {
                        payload: Payload::Subscribe(Some(reply)),
                        ..
                    }) => return Ok(reply),
                    Ok(other) => debug!("ignoring {} before the subscribe reply", other),
                    Err(e) => warn!("Failed to decode datagram from {}: {}", from, e),
                }
            }
        }

        Err(NetError::HandshakeTimeout {
            addr: server_addr,
            attempts,
        })
    }

    async fn read_loop(&self, out: &mpsc::UnboundedSender<Envelope>) {
        let server_addr = self.server_addr();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = tokio::select! {
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
            if from != server_addr {
                warn!("Dropping datagram from unknown peer {}", from);
                continue;
            }

            let envelope = match decode(&buffer[..len]) {
                Ok(envelope) => envelope.with_addr(from),
                Err(e) => {
                    warn!("Failed to decode datagram from {}: {}", from, e);
                    continue;
                }
            };
            debug!("received {}", envelope);

            match envelope.payload {
                Payload::Subscribe(_) => {
                    debug!("ignoring late subscribe reply");
                }
                Payload::Shutdown => {
                    info!("Server at udp://{} shut down", from);
                    let _ = out.send(envelope);
                    break;
                }
                _ => {
                    if out.send(envelope).is_err() {
                        info!("Inbound channel closed, stopping read loop");
                        break;
                    }
                }
            }
        }
    }

    /// Stops the ticker, tells the server we are leaving and ends the read
    /// loop. Safe to call any number of times.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disconnecting from udp://{}", self.server_addr());

        self.inner.ticker_cancel.cancel();
        match encode(&Envelope::new(Payload::Shutdown)) {
            Ok(notice) => {
                let sent = timeout(
                    self.inner.config.shutdown_grace,
                    self.inner.socket.send_to(&notice, self.inner.server_addr),
                )
                .await;
                match sent {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Failed to send shutdown notice: {}", e),
                    Err(_) => warn!("Timed out sending shutdown notice"),
                }
            }
            Err(e) => warn!("Failed to encode shutdown notice: {}", e),
        }
        self.inner.cancel.cancel();
    }
}

impl Transport for Client {
    fn send(&self, envelope: Envelope) {
        if self.is_closed() {
            debug!("connection closed, dropping {}", envelope);
            return;
        }
        let data = match encode(&envelope) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode {}: {}", envelope, e);
                return;
            }
        };
        match self.inner.socket.try_send_to(&data, self.inner.server_addr) {
            Ok(_) => debug!("sent {}", envelope),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!("Socket busy, dropping {}", envelope)
            }
            Err(e) => error!("Failed to send {}: {}", envelope.command(), e),
        }
    }

    /// The only peer of a client is its server, so losing it ends the
    /// session just as a `shutdown` from the server would.
    fn evict(&self, peer_addr: SocketAddr) {
        if peer_addr != self.inner.server_addr {
            debug!("ignoring eviction of unknown peer {}", peer_addr);
            return;
        }
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Server at udp://{} stopped answering, disconnecting", peer_addr);
        self.inner.ticker_cancel.cancel();
        self.inner.cancel.cancel();
    }
}
