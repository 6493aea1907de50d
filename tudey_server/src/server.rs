//! Server implementation.
//!
//! An authoritative fixed-tick loop around a `SceneServer`. It supports:
//! - Client handshake over UDP (`Hello` -> `Welcome`, pawn spawn)
//! - Input frames queued per client pawn
//! - Scene tick replication (full tick for newly joined clients)
//!
//! Determinism notes:
//! - The scene only ever sees tick timestamps, never the wall clock directly.
//! - Clients are served in id order.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, info, warn};
use tudey_shared::{
    config::SimConfig,
    environment::{TileEnvironment, TileMap},
    net::{decode_from_bytes, encode_to_bytes, ClientId, NetMsg, PROTOCOL_VERSION},
};

use crate::scene::SceneServer;

/// Connected client state.
struct ClientState {
    udp_peer: SocketAddr,
    /// Needs every actor on the next send.
    needs_full: bool,
}

/// Game server.
pub struct GameServer {
    pub cfg: SimConfig,
    scene: SceneServer,
    clients: BTreeMap<ClientId, ClientState>,
    udp: UdpSocket,
    /// Server clock origin.
    epoch: Instant,
    tick: u32,
}

impl GameServer {
    /// Binds the server socket and builds the scene from `map`.
    pub async fn new(cfg: SimConfig, map: TileMap) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;
        let env = Arc::new(TileEnvironment::new(map));
        let scene = SceneServer::new(env, cfg.advancer, 0);
        Ok(Self {
            cfg,
            scene,
            clients: BTreeMap::new(),
            udp,
            epoch: Instant::now(),
            tick: 0,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn scene(&self) -> &SceneServer {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneServer {
        &mut self.scene
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    /// Milliseconds since the server started.
    pub fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_millis(self.cfg.tick_ms() as u64);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one simulation tick at the current server time.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.recv_messages().await?;
        let now = self.now_ms();
        let tick = self.scene.tick(now);
        if !self.clients.is_empty() {
            let delta = encode_to_bytes(&NetMsg::SceneTick(tick))?;
            let mut full = None;
            for client in self.clients.values_mut() {
                let payload = if client.needs_full {
                    client.needs_full = false;
                    if full.is_none() {
                        full = Some(encode_to_bytes(&NetMsg::SceneTick(self.scene.full_tick()))?);
                    }
                    full.as_ref().unwrap_or(&delta)
                } else {
                    &delta
                };
                // Lost datagrams are expected; the next tick carries on.
                if let Err(e) = self.udp.send_to(payload, client.udp_peer).await {
                    debug!(peer = %client.udp_peer, error = %e, "Tick send failed");
                }
            }
        }
        self.tick += 1;
        Ok(())
    }

    async fn recv_messages(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => match decode_from_bytes(&buf[..n]) {
                    Ok(msg) => self.handle_message(from, msg).await?,
                    Err(e) => debug!(%from, error = %e, "Dropping malformed datagram"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv"),
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, from: SocketAddr, msg: NetMsg) -> anyhow::Result<()> {
        match msg {
            NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                self.on_hello(from).await?;
            }
            NetMsg::Hello { protocol } => {
                warn!(%from, protocol, "Protocol mismatch");
                let reply = NetMsg::Disconnect {
                    reason: format!("protocol {protocol} unsupported"),
                };
                self.udp
                    .send_to(&encode_to_bytes(&reply)?, from)
                    .await
                    .context("udp send")?;
            }
            NetMsg::Input { client_id, frame } => match self.clients.get_mut(&client_id) {
                Some(client) => {
                    client.udp_peer = from;
                    self.scene.queue_input(client_id, frame);
                }
                None => debug!(client_id = ?client_id, "Input from unknown client"),
            },
            NetMsg::Disconnect { reason } => {
                let leaving = self
                    .clients
                    .iter()
                    .find(|(_, c)| c.udp_peer == from)
                    .map(|(id, _)| *id);
                if let Some(client_id) = leaving {
                    self.clients.remove(&client_id);
                    self.scene.leave(client_id);
                    info!(client_id = ?client_id, %reason, "Client disconnected");
                }
            }
            other => debug!(?other, "Unexpected message"),
        }
        Ok(())
    }

    async fn on_hello(&mut self, from: SocketAddr) -> anyhow::Result<()> {
        // Retransmitted hello: answer again with the same identity.
        let existing = self
            .clients
            .iter()
            .find(|(_, c)| c.udp_peer == from)
            .map(|(id, _)| *id);
        let client_id = existing.unwrap_or_else(ClientId::new_unique);
        let pawn = self.scene.join(client_id);
        self.clients.insert(
            client_id,
            ClientState {
                udp_peer: from,
                needs_full: true,
            },
        );

        let welcome = NetMsg::Welcome {
            client_id,
            pawn,
            timestamp: self.now_ms(),
        };
        self.udp
            .send_to(&encode_to_bytes(&welcome)?, from)
            .await
            .context("udp send")?;
        info!(client_id = ?client_id, pawn = ?pawn, udp_peer = %from, "Client connected");
        Ok(())
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32, map: TileMap) -> anyhow::Result<(GameServer, SimConfig)> {
    let cfg = SimConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        ..Default::default()
    };
    let server = GameServer::new(cfg, map).await?;
    let mut cfg = server.cfg.clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
