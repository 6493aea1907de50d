//! Networking primitives.
//!
//! Goals:
//! - Provide the message types exchanged by scene servers and clients.
//! - Keep serialization explicit and versionable (JSON frames).
//! - Hide the transport behind a trait so the same client code runs over UDP
//!   or over an in-memory link with simulated latency.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    time::{self, Instant},
};
use tracing::trace;

use crate::{
    actor::{Actor, ActorId},
    input::InputFrame,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram we expect to receive.
const MAX_DATAGRAM: usize = 64 * 1024;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Server accepts a client and names the pawn it controls.
    Welcome {
        client_id: ClientId,
        pawn: ActorId,
        /// Server clock at the time of sending (ms).
        timestamp: i64,
    },

    // ─── Gameplay ───
    /// Client -> server: one input frame for the client's pawn.
    Input {
        client_id: ClientId,
        frame: InputFrame,
    },
    /// Server -> client: actor states at a tick.
    SceneTick(SceneTick),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Actor states replicated for one server tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SceneTick {
    /// Server clock (ms).
    pub timestamp: i64,
    /// Actors that changed since the previous tick (or all, for a full tick).
    pub actors: Vec<Actor>,
    /// Actors dropped from the scene.
    pub removed: Vec<ActorId>,
    /// Whether `actors` lists every actor in the scene.
    #[serde(default)]
    pub full: bool,
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

/// Message channel between one client and a server.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()>;

    /// Receives a message within the given timeout.
    async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>>;
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Ok(Some(decode_from_bytes(&buf[..n])?)),
            Ok(Err(e)) => Err(e).context("udp recv"),
            Err(_) => Ok(None),
        }
    }
}

/// Simulated network conditions for `ChannelTransport`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkConditions {
    /// One-way delay (ms).
    pub latency_ms: u64,
    /// Extra random delay, uniform in `0..=jitter_ms`.
    pub jitter_ms: u64,
    /// Drop probability in `[0, 1]`.
    pub loss: f64,
}

/// In-memory transport that delays, reorders and drops frames like a real
/// network would.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(Instant, u64, Bytes)>,
    rx: mpsc::UnboundedReceiver<(Instant, u64, Bytes)>,
    /// Frames received but not yet due, ordered by delivery time.
    pending: BinaryHeap<Reverse<(Instant, u64, Bytes)>>,
    conditions: LinkConditions,
    rng: StdRng,
    seq: u64,
}

impl ChannelTransport {
    /// Creates both ends of a link. Each direction gets its own RNG stream.
    pub fn pair(conditions: LinkConditions, seed: u64) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self::new(a_tx, a_rx, conditions, seed);
        let b = Self::new(b_tx, b_rx, conditions, seed.wrapping_add(1));
        (a, b)
    }

    fn new(
        tx: mpsc::UnboundedSender<(Instant, u64, Bytes)>,
        rx: mpsc::UnboundedReceiver<(Instant, u64, Bytes)>,
        conditions: LinkConditions,
        seed: u64,
    ) -> Self {
        Self {
            tx,
            rx,
            pending: BinaryHeap::new(),
            conditions,
            rng: StdRng::seed_from_u64(seed),
            seq: 0,
        }
    }

    fn drain_channel(&mut self) {
        while let Ok(frame) = self.rx.try_recv() {
            self.pending.push(Reverse(frame));
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<Bytes> {
        let due = self
            .pending
            .peek()
            .is_some_and(|Reverse((due, _, _))| *due <= now);
        if due {
            self.pending.pop().map(|Reverse((_, _, payload))| payload)
        } else {
            None
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        if self.conditions.loss > 0.0 && self.rng.gen_bool(self.conditions.loss.min(1.0)) {
            trace!("Dropped frame");
            return Ok(());
        }
        let jitter = if self.conditions.jitter_ms > 0 {
            self.rng.gen_range(0..=self.conditions.jitter_ms)
        } else {
            0
        };
        let due = Instant::now() + Duration::from_millis(self.conditions.latency_ms + jitter);
        self.seq += 1;
        // A closed peer is indistinguishable from a lossy link.
        let _ = self.tx.send((due, self.seq, payload));
        Ok(())
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_channel();
            if let Some(payload) = self.pop_due(Instant::now()) {
                return decode_from_bytes(&payload).map(Some);
            }
            let wake = match self.pending.peek() {
                Some(Reverse((due, _, _))) => (*due).min(deadline),
                None => deadline,
            };
            if wake <= Instant::now() && wake == deadline {
                return Ok(None);
            }
            tokio::select! {
                frame = self.rx.recv() => match frame {
                    Some(frame) => self.pending.push(Reverse(frame)),
                    None if self.pending.is_empty() => return Ok(None),
                    None => time::sleep_until(wake).await,
                },
                _ = time::sleep_until(wake) => {}
            }
        }
    }
}
