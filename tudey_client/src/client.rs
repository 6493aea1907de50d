//! Client implementation.
//!
//! The client maintains:
//! - One message transport to the server (UDP, or an in-memory link in tests)
//! - An estimate of the server clock, taken from the `Welcome`
//! - A `SceneView` fed with scene ticks and local input frames

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tudey_shared::{
    actor::ActorId,
    config::SimConfig,
    environment::Environment,
    input::InputFrame,
    net::{ClientId, NetMsg, Transport, UdpTransport, PROTOCOL_VERSION},
};

use crate::{input::InputState, view::SceneView};

/// Hello retransmissions before giving up.
const HELLO_ATTEMPTS: u32 = 5;
const HELLO_TIMEOUT: Duration = Duration::from_millis(500);

/// High-level game client.
pub struct GameClient {
    pub client_id: ClientId,
    pub pawn_id: ActorId,
    pub view: SceneView,
    transport: Box<dyn Transport>,
    epoch: Instant,
    /// Server clock minus local clock (ms).
    clock_offset: i64,
    /// Set once the server says goodbye.
    pub disconnect_reason: Option<String>,
}

impl GameClient {
    /// Performs the handshake over `transport`.
    pub async fn connect(
        mut transport: Box<dyn Transport>,
        cfg: &SimConfig,
        env: Arc<dyn Environment>,
    ) -> anyhow::Result<Self> {
        let epoch = Instant::now();
        for attempt in 1..=HELLO_ATTEMPTS {
            transport
                .send(&NetMsg::Hello {
                    protocol: PROTOCOL_VERSION,
                })
                .await?;
            let deadline = Instant::now() + HELLO_TIMEOUT;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let Some(msg) = transport.recv_timeout(remaining).await? else {
                    break;
                };
                match msg {
                    NetMsg::Welcome {
                        client_id,
                        pawn,
                        timestamp,
                    } => {
                        let local = epoch.elapsed().as_millis() as i64;
                        let mut view = SceneView::new(env, cfg.history, cfg.advancer);
                        view.set_pawn(pawn);
                        info!(client_id = ?client_id, pawn = ?pawn, "Connected to server");
                        return Ok(Self {
                            client_id,
                            pawn_id: pawn,
                            view,
                            transport,
                            epoch,
                            clock_offset: timestamp - local,
                            disconnect_reason: None,
                        });
                    }
                    NetMsg::Disconnect { reason } => bail!("server refused: {reason}"),
                    other => debug!(?other, "Ignoring message before welcome"),
                }
            }
            warn!(attempt, "No welcome from server, retrying");
        }
        bail!("no welcome after {HELLO_ATTEMPTS} attempts")
    }

    /// Connects over UDP to `cfg.server_addr`.
    pub async fn connect_udp(cfg: &SimConfig, env: Arc<dyn Environment>) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %server_addr, "Connecting to server");
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let transport = UdpTransport::connect(bind, server_addr).await?;
        Self::connect(Box::new(transport), cfg, env).await
    }

    /// Estimated server clock (ms).
    pub fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64 + self.clock_offset
    }

    /// Samples `input` now, predicts it locally and sends it to the server.
    pub async fn send_input(&mut self, input: InputState) -> anyhow::Result<InputFrame> {
        let frame = input.frame(self.now_ms());
        self.view.input(frame);
        self.transport
            .send(&NetMsg::Input {
                client_id: self.client_id,
                frame,
            })
            .await?;
        Ok(frame)
    }

    /// Receives messages, waiting up to `timeout` for the first one.
    /// Returns the number of scene ticks accepted.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<usize> {
        let mut accepted = 0;
        let mut wait = timeout;
        loop {
            let Some(msg) = self.transport.recv_timeout(wait).await? else {
                break;
            };
            wait = Duration::ZERO;
            match msg {
                NetMsg::SceneTick(tick) => {
                    if self.view.receive(&tick) {
                        accepted += 1;
                    }
                }
                NetMsg::Disconnect { reason } => {
                    info!(%reason, "Disconnected by server");
                    self.disconnect_reason = Some(reason);
                    break;
                }
                other => debug!(?other, "Unexpected message"),
            }
        }
        Ok(accepted)
    }

    /// Brings the view to the current server time.
    pub fn advance(&mut self) {
        let now = self.now_ms();
        self.view.advance(now);
    }

    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        self.transport
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await
    }
}
