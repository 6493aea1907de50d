//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p tudey_client -- [--addr 127.0.0.1:40000] [--tick-hz 20] [--config sim.json]
//!
//! The client connects to the server, walks its pawn in a slow circle,
//! and logs what it sees.

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use tracing::info;
use tudey_client::{client::GameClient, input::InputState};
use tudey_shared::{config::SimConfig, environment::TileEnvironment};

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
    info!(server = %cfg.server_addr, "Starting client");

    // Prediction must collide against the same map the server runs.
    let env = Arc::new(TileEnvironment::new(cfg.tile_map()?));
    let mut client = GameClient::connect_udp(&cfg, env).await.context("connect")?;

    let frame_interval = Duration::from_millis(cfg.tick_ms() as u64);
    let mut frames: u64 = 0;

    loop {
        // Fake input for now; a real client would read keyboard/mouse.
        let angle = frames as f32 * 0.05;
        let input = InputState {
            move_x: angle.cos(),
            move_y: angle.sin(),
            aim: angle,
            action: frames % 100 == 0,
        };
        client.send_input(input).await?;

        client.poll(frame_interval).await?;
        if let Some(reason) = &client.disconnect_reason {
            info!(%reason, "Disconnected from server");
            break;
        }
        client.advance();

        if frames % 50 == 0 {
            let pawn = client.view.pawn().map(|p| p.translation());
            info!(
                now = client.now_ms(),
                visible = client.view.visible().count(),
                ?pawn,
                "View"
            );
        }
        frames += 1;
    }

    Ok(())
}
