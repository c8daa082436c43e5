use deepmine_client::{ClientPhase, MultiplayerClient};
use deepmine_core::{BlockGrid, BlockPos, BlockType, PlayerTeam};
use deepmine_net::{GameEvent, QuicClientTransport, QuicHostTransport, RejectReason};
use deepmine_server::{Host, HostSettings};
use std::time::Duration;

const STEP: Duration = Duration::from_millis(10);

async fn run_until(
    host: &mut Host<QuicHostTransport>,
    client: &mut MultiplayerClient<QuicClientTransport>,
    grid: &mut BlockGrid,
    events: &mut Vec<GameEvent>,
    done: impl Fn(&MultiplayerClient<QuicClientTransport>, &[GameEvent]) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(client, events) {
            host.tick();
            client.update(STEP.as_secs_f64(), events, grid, &mut ());
            tokio::time::sleep(STEP).await;
        }
    })
    .await
    .expect("timed out waiting for the session");
}

#[tokio::test]
async fn client_downloads_world_over_quic() {
    let transport = QuicHostTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = transport.local_addr();
    let mut host = Host::new(
        transport,
        HostSettings {
            map_size: 16,
            ..HostSettings::default()
        },
    );
    host.world_mut().set(BlockPos::new(15, 15, 15), BlockType::Diamond);

    let mut client = MultiplayerClient::with_map_size(QuicClientTransport::new(), "digger", 16);
    let mut grid = BlockGrid::new(16);
    let mut events = Vec::new();
    client.join(addr).unwrap();

    run_until(&mut host, &mut client, &mut grid, &mut events, |c, _| {
        c.phase() == ClientPhase::TeamSelection && c.my_id().is_some()
    })
    .await;
    assert_eq!(grid.get(BlockPos::new(15, 15, 15)), BlockType::Diamond);
    assert_eq!(host.player_count(), 1);

    client.select_team(PlayerTeam::Blue);
    tokio::time::timeout(Duration::from_secs(10), async {
        while host.players().get(&1).map(|p| p.team) != Some(PlayerTeam::Blue) {
            host.tick();
            client.update(STEP.as_secs_f64(), &mut events, &mut grid, &mut ());
            tokio::time::sleep(STEP).await;
        }
    })
    .await
    .expect("team change never reached the host");

    client.disconnect("done");
    tokio::time::timeout(Duration::from_secs(10), async {
        while host.player_count() > 0 {
            host.tick();
            tokio::time::sleep(STEP).await;
        }
    })
    .await
    .expect("host never saw the disconnect");
}

#[tokio::test]
async fn banned_address_is_rejected_over_quic() {
    let transport = QuicHostTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = transport.local_addr();
    let mut host = Host::new(
        transport,
        HostSettings {
            map_size: 16,
            banned: ["127.0.0.1".parse().unwrap()].into_iter().collect(),
            ..HostSettings::default()
        },
    );

    let mut client = MultiplayerClient::with_map_size(QuicClientTransport::new(), "outcast", 16);
    let mut grid = BlockGrid::new(16);
    let mut events = Vec::new();
    client.join(addr).unwrap();

    run_until(&mut host, &mut client, &mut grid, &mut events, |_, events| {
        events.iter().any(|e| matches!(e, GameEvent::Rejected(_)))
    })
    .await;
    assert!(events.contains(&GameEvent::Rejected(RejectReason::Banned)));
    assert_eq!(client.phase(), ClientPhase::ServerBrowser);
    assert_eq!(host.player_count(), 0);
}
