//! Subscriber registry
//!
//! The hub task is the only owner of the subscriber table. Everyone else
//! talks to it through a cloneable [`HubHandle`] whose calls never block on
//! the network: registrations, removals and outbound envelopes are queued
//! on unbounded channels and applied in the order below.
//!
//! 1. register
//! 2. unregister
//! 3. broadcast
//! 4. control (snapshot, shutdown)
//!
//! Each subscriber gets a bounded outbound queue drained by its own writer
//! task. A queue that fills up means the peer cannot keep up, and the
//! subscriber is evicted on the spot rather than stalling the hub.

use log::{debug, info, warn};
use shared::{Envelope, MAX_SUBSCRIBERS};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Everything a writer task needs to serve one subscriber.
pub struct WriterParts {
    pub peer_addr: SocketAddr,
    pub outbound: mpsc::Receiver<Envelope>,
    /// Fires (or closes) when the subscriber is removed
    pub shutdown: oneshot::Receiver<()>,
}

/// Spawns the writer of a newly accepted subscriber.
pub type SpawnWriter = Box<dyn Fn(WriterParts) -> JoinHandle<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    /// Another peer already holds the only slot
    Refused { current: SocketAddr },
}

struct Subscriber {
    outbound: mpsc::Sender<Envelope>,
    shutdown: oneshot::Sender<()>,
    writer: JoinHandle<()>,
}

struct RegisterRequest {
    peer_addr: SocketAddr,
    reply: oneshot::Sender<Registration>,
}

struct Outbound {
    to: Option<SocketAddr>,
    envelope: Envelope,
}

enum Control {
    Snapshot(oneshot::Sender<Vec<SocketAddr>>),
    Shutdown(oneshot::Sender<()>),
}

pub struct Hub {
    subscribers: HashMap<SocketAddr, Subscriber>,
    retired: Vec<JoinHandle<()>>,
    queue_capacity: usize,
    spawn_writer: SpawnWriter,
    register_rx: mpsc::UnboundedReceiver<RegisterRequest>,
    unregister_rx: mpsc::UnboundedReceiver<SocketAddr>,
    broadcast_rx: mpsc::UnboundedReceiver<Outbound>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<RegisterRequest>,
    unregister_tx: mpsc::UnboundedSender<SocketAddr>,
    broadcast_tx: mpsc::UnboundedSender<Outbound>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl Hub {
    pub fn new(queue_capacity: usize, spawn_writer: SpawnWriter) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let hub = Self {
            subscribers: HashMap::new(),
            retired: Vec::new(),
            queue_capacity: queue_capacity.max(1),
            spawn_writer,
            register_rx,
            unregister_rx,
            broadcast_rx,
            control_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            control_tx,
        };
        (hub, handle)
    }

    /// Serves requests until shut down or until every handle is dropped.
    /// Either way all writers have stopped when this returns.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                Some(request) = self.register_rx.recv() => {
                    let registration = self.register(request.peer_addr);
                    let _ = request.reply.send(registration);
                }
                Some(peer_addr) = self.unregister_rx.recv() => self.unregister(peer_addr),
                Some(outbound) = self.broadcast_rx.recv() => self.broadcast(outbound),
                Some(control) = self.control_rx.recv() => match control {
                    Control::Snapshot(reply) => {
                        let _ = reply.send(self.addresses());
                    }
                    Control::Shutdown(reply) => {
                        self.drain().await;
                        let _ = reply.send(());
                        break;
                    }
                },
                else => {
                    self.drain().await;
                    break;
                }
            }
        }
        debug!("hub stopped");
    }

    fn register(&mut self, peer_addr: SocketAddr) -> Registration {
        if self.subscribers.contains_key(&peer_addr) {
            debug!("{} is already subscribed", peer_addr);
            return Registration::Accepted;
        }
        if self.subscribers.len() >= MAX_SUBSCRIBERS {
            if let Some(current) = self.addresses().into_iter().next() {
                return Registration::Refused { current };
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let writer = (self.spawn_writer)(WriterParts {
            peer_addr,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        });

        self.subscribers.insert(
            peer_addr,
            Subscriber {
                outbound: outbound_tx,
                shutdown: shutdown_tx,
                writer,
            },
        );
        info!("Registered subscriber {}", peer_addr);
        Registration::Accepted
    }

    fn unregister(&mut self, peer_addr: SocketAddr) {
        let Some(subscriber) = self.subscribers.remove(&peer_addr) else {
            debug!("{} is not subscribed", peer_addr);
            return;
        };

        let _ = subscriber.shutdown.send(());
        self.retired.retain(|writer| !writer.is_finished());
        self.retired.push(subscriber.writer);
        info!("Unregistered subscriber {}", peer_addr);
    }

    fn broadcast(&mut self, outbound: Outbound) {
        let targets = match outbound.to {
            Some(addr) if self.subscribers.contains_key(&addr) => vec![addr],
            _ => self.addresses(),
        };

        for addr in targets {
            let Some(subscriber) = self.subscribers.get(&addr) else {
                continue;
            };
            match subscriber.outbound.try_send(outbound.envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue of {} is full, evicting", addr);
                    self.unregister(addr);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Writer of {} is gone, evicting", addr);
                    self.unregister(addr);
                }
            }
        }
    }

    async fn drain(&mut self) {
        for peer_addr in self.addresses() {
            self.unregister(peer_addr);
        }
        for writer in self.retired.drain(..) {
            if let Err(e) = writer.await {
                warn!("Subscriber writer failed: {}", e);
            }
        }
    }

    fn addresses(&self) -> Vec<SocketAddr> {
        let mut addresses: Vec<SocketAddr> = self.subscribers.keys().copied().collect();
        addresses.sort();
        addresses
    }
}

impl HubHandle {
    /// Asks the hub to accept `peer_addr`. Returns `None` once the hub has
    /// stopped.
    pub async fn register(&self, peer_addr: SocketAddr) -> Option<Registration> {
        let (reply, response) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { peer_addr, reply })
            .ok()?;
        response.await.ok()
    }

    pub fn unregister(&self, peer_addr: SocketAddr) {
        if self.unregister_tx.send(peer_addr).is_err() {
            debug!("hub stopped, cannot unregister {}", peer_addr);
        }
    }

    /// Queues an envelope for the subscriber it is addressed to, or for every
    /// subscriber when it is not addressed to a registered one.
    pub fn send(&self, envelope: Envelope) {
        let outbound = Outbound {
            to: envelope.peer_addr,
            envelope,
        };
        if let Err(e) = self.broadcast_tx.send(outbound) {
            debug!("hub stopped, dropping {}", e.0.envelope);
        }
    }

    /// Addresses registered at the time the request is served.
    pub async fn subscribers(&self) -> Vec<SocketAddr> {
        let (reply, response) = oneshot::channel();
        if self.control_tx.send(Control::Snapshot(reply)).is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    /// Removes every subscriber and waits for their writers. A no-op once
    /// the hub has stopped.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.control_tx.send(Control::Shutdown(reply)).is_err() {
            return;
        }
        let _ = response.await;
    }
}
