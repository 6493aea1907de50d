//! Observer-side tracking of server actors.

use std::{sync::Arc, time::Duration};

use anyhow::bail;
use tudey_client::{client::GameClient, view::SceneView};
use tudey_server::scene::SceneServer;
use tudey_shared::{
    config::{AdvancerConfig, HistoryConfig, SimConfig},
    environment::{TileEnvironment, TileMap},
    math::Vec2,
    net::{ChannelTransport, ClientId, LinkConditions, NetMsg, Transport},
};
use tudey_tests::{init_tracing, wanderer};

/// Walker x on the server at `t`, spawned at x = 5 and t = 0.
fn walker_x(t: i64) -> f32 {
    5.0 + 2.0 * t as f32 / 1000.0
}

#[test]
fn observer_tracks_server_trajectory_at_delayed_time() {
    init_tracing();
    let env = Arc::new(TileEnvironment::new(TileMap::arena(40, 10)));
    let mut scene = SceneServer::new(env.clone(), AdvancerConfig::default(), 0);
    let walker = scene.spawn(wanderer(2.0), Vec2::new(5.0, 5.0), 0.0);
    let history = HistoryConfig {
        duration_ms: 1000,
        buffer_delay_ms: 100,
    };
    let mut view = SceneView::new(env, history, AdvancerConfig::default());

    for t in (0..=2000).step_by(50) {
        let tick = scene.tick(t);
        assert!(view.receive(&tick));
        // Display at several frame times between ticks.
        for now in [t, t + 20, t + 40] {
            view.advance(now);
            let delayed = now - history.buffer_delay_ms;
            let shown = view.actor(walker).expect("walker known");
            if delayed < 0 {
                assert_eq!(view.visible().count(), 0);
                continue;
            }
            assert_eq!(view.visible().count(), 1);
            let x = shown.translation().x;
            assert!((x - walker_x(delayed)).abs() < 1e-3, "now = {now}, x = {x}");
            assert!((shown.translation().y - 5.0).abs() < 1e-5);
        }
    }
}

#[tokio::test]
async fn client_over_jittery_link_tracks_remote_actor() -> anyhow::Result<()> {
    init_tracing();
    let conditions = LinkConditions {
        latency_ms: 20,
        jitter_ms: 10,
        loss: 0.0,
    };
    let (client_end, mut server_end) = ChannelTransport::pair(conditions, 7);
    let map = TileMap::arena(40, 10);

    let server_env = Arc::new(TileEnvironment::new(map.clone()));
    let server = tokio::spawn(async move {
        let mut scene = SceneServer::new(server_env, AdvancerConfig::default(), 0);
        let walker = scene.spawn(wanderer(2.0), Vec2::new(5.0, 5.0), 0.0);

        let Some(NetMsg::Hello { .. }) = server_end.recv_timeout(Duration::from_secs(1)).await? else {
            bail!("expected hello");
        };
        let client_id = ClientId::new_unique();
        let pawn = scene.join(client_id);
        server_end
            .send(&NetMsg::Welcome {
                client_id,
                pawn,
                timestamp: 0,
            })
            .await?;

        // Ticks are spaced well beyond the jitter, so they arrive in order.
        for t in (0..=1000).step_by(50) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let tick = if t == 0 {
                scene.full_tick()
            } else {
                scene.tick(t)
            };
            server_end.send(&NetMsg::SceneTick(tick)).await?;
        }
        Ok::<_, anyhow::Error>(walker)
    });

    let env = Arc::new(TileEnvironment::new(map));
    let mut client = GameClient::connect(Box::new(client_end), &SimConfig::default(), env).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.view.last_tick() != Some(1000) && tokio::time::Instant::now() < deadline {
        client.poll(Duration::from_millis(20)).await?;
    }
    let walker = server.await??;
    assert_eq!(client.view.last_tick(), Some(1000));
    assert!(client.view.pawn().is_some());

    // Deterministic display time, independent of the client clock.
    client.view.advance(900);
    let x = client.view.actor(walker).expect("walker known").translation().x;
    assert!((x - walker_x(800)).abs() < 1e-3, "x = {x}");
    Ok(())
}
