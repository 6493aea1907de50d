//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p tudey_server -- [--addr 127.0.0.1:40000] [--tick-hz 20] [--config sim.json]
//!
//! The server accepts clients over UDP, spawns a pawn for each, runs a fixed
//! tick simulation and replicates changed actors every tick.

use std::{env, f32::consts::FRAC_PI_2, sync::Arc};

use anyhow::Context;
use tracing::info;
use tudey_server::server::GameServer;
use tudey_shared::{actor::ActorConfig, config::SimConfig, math::Vec2};

fn parse_args() -> anyhow::Result<SimConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SimConfig::load(&args[i + 1])?,
        _ => SimConfig::default(),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(20);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let map = cfg.tile_map()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, width = map.width, height = map.height, "Starting server");

    let mut server = GameServer::new(cfg.clone(), map)
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // A few wanderers and a crate so observers have something to watch.
    let wanderer = Arc::new(ActorConfig {
        start_moving: true,
        ..ActorConfig::mobile(2.0)
    });
    let scene = server.scene_mut();
    for (i, pos) in [(4.0, 4.0), (27.0, 4.0), (4.0, 19.0), (27.0, 19.0)].into_iter().enumerate() {
        scene.spawn(wanderer.clone(), Vec2::new(pos.0, pos.1), i as f32 * FRAC_PI_2);
    }
    scene.spawn(Arc::new(ActorConfig::default()), Vec2::new(16.0, 8.0), 0.0);

    // Main server loop.
    let tick_interval = std::time::Duration::from_millis(cfg.tick_ms() as u64);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        server.step().await?;

        if server.tick_count() % (cfg.tick_hz.max(1) * 10) == 0 {
            info!(
                tick = server.tick_count(),
                clients = server.client_count(),
                actors = server.scene().len(),
                "Status"
            );
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
