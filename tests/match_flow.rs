//! End-to-end flows over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use clash_server::network::protocol::MatchFound;
use clash_server::{BattleConfig, GameServer, JoinQueueRequest, ServerConfig, ServerResponse};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        battle: BattleConfig {
            tick_period: Duration::from_millis(20),
            start_delay: Duration::from_millis(50),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn start_server() -> (Arc<GameServer>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(GameServer::new(test_config()));

    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    (server, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn join(ws: &mut Client, player_id: &str, trophies: i32) {
    let request = JoinQueueRequest {
        player_id: player_id.to_string(),
        trophies,
    };
    ws.send(Message::Binary(request.encode().unwrap())).await.unwrap();
}

async fn next_response(ws: &mut Client) -> ServerResponse {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => return ServerResponse::decode(&data).unwrap(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected a response, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a response")
}

/// Read until the server closes the connection. Data frames are ignored.
async fn expect_closed(ws: &mut Client) {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("server did not close the connection");
}

#[derive(Debug, Clone, Copy)]
enum Gauge {
    Queue,
    Sessions,
    Battles,
}

async fn read_gauge(server: &GameServer, gauge: Gauge) -> usize {
    match gauge {
        Gauge::Queue => server.queue_size().await,
        Gauge::Sessions => server.session_count().await,
        Gauge::Battles => server.battle_count().await,
    }
}

async fn wait_for(server: &GameServer, gauge: Gauge, expected: usize) {
    let reached = timeout(WAIT, async {
        while read_gauge(server, gauge).await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "{:?} never reached {}", gauge, expected);
}

#[tokio::test]
async fn test_players_in_range_are_matched() {
    let (server, addr) = start_server().await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice", 1000).await;
    wait_for(&server, Gauge::Queue, 1).await;

    let mut bob = connect(addr).await;
    join(&mut bob, "bob", 1050).await;

    assert_eq!(
        next_response(&mut bob).await,
        ServerResponse::MatchFound(MatchFound {
            opponent_id: "alice".to_string(),
            opponent_trophies: 1000,
            room_id: "room_bob_alice".to_string(),
        })
    );
    assert_eq!(
        next_response(&mut alice).await,
        ServerResponse::MatchFound(MatchFound {
            opponent_id: "bob".to_string(),
            opponent_trophies: 1050,
            room_id: "room_bob_alice".to_string(),
        })
    );

    assert_eq!(server.queue_size().await, 0);
    assert_eq!(server.session_count().await, 2);
    wait_for(&server, Gauge::Battles, 1).await;

    for ws in [&mut alice, &mut bob] {
        match next_response(ws).await {
            ServerResponse::GameState(update) => {
                assert_eq!(update.server_tick, 1);
                assert_eq!(update.hand.len(), 4);
                assert!(update.elixir > 5.0 && update.elixir < 5.1);
                assert!(!update.hand.contains(&update.next_card));
            }
            other => panic!("expected game state, got {:?}", other),
        }
    }

    // Ticks keep coming and the counter only moves forward
    let mut last = 1;
    for _ in 0..5 {
        if let ServerResponse::GameState(update) = next_response(&mut alice).await {
            assert!(update.server_tick > last);
            last = update.server_tick;
        }
    }
}

#[tokio::test]
async fn test_players_out_of_range_keep_waiting() {
    let (server, addr) = start_server().await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice", 1000).await;
    let mut bob = connect(addr).await;
    join(&mut bob, "bob", 1200).await;

    wait_for(&server, Gauge::Queue, 2).await;
    assert_eq!(server.battle_count().await, 0);

    // Nothing is sent to a waiting player
    assert!(timeout(Duration::from_millis(200), alice.next()).await.is_err());
}

#[tokio::test]
async fn test_reconnect_evicts_old_session() {
    let (server, addr) = start_server().await;

    let mut first = connect(addr).await;
    join(&mut first, "alice", 1000).await;
    wait_for(&server, Gauge::Queue, 1).await;

    let mut second = connect(addr).await;
    join(&mut second, "alice", 1000).await;

    expect_closed(&mut first).await;
    wait_for(&server, Gauge::Queue, 1).await;
    assert_eq!(server.session_count().await, 1);

    // Only the newer connection can be matched
    let mut bob = connect(addr).await;
    join(&mut bob, "bob", 1000).await;

    assert!(matches!(
        next_response(&mut second).await,
        ServerResponse::MatchFound(found) if found.opponent_id == "bob"
    ));
}

#[tokio::test]
async fn test_invalid_handshake_closes_connection() {
    let (server, addr) = start_server().await;

    let mut garbage = connect(addr).await;
    garbage.send(Message::Binary(vec![0xff, 0x01])).await.unwrap();
    expect_closed(&mut garbage).await;

    let mut text = connect(addr).await;
    text.send(Message::Text("alice".to_string())).await.unwrap();
    expect_closed(&mut text).await;

    let mut nameless = connect(addr).await;
    join(&mut nameless, "", 1000).await;
    expect_closed(&mut nameless).await;

    assert_eq!(server.session_count().await, 0);
    assert_eq!(server.queue_size().await, 0);
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let (_server, addr) = start_server().await;

    assert!(connect_async(format!("ws://{}/lobby", addr)).await.is_err());
}

#[tokio::test]
async fn test_disconnect_mid_battle_notifies_opponent() {
    let (server, addr) = start_server().await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice", 1000).await;
    wait_for(&server, Gauge::Queue, 1).await;
    let mut bob = connect(addr).await;
    join(&mut bob, "bob", 1000).await;

    next_response(&mut alice).await;
    next_response(&mut bob).await;

    alice.close(None).await.unwrap();

    let notice = timeout(WAIT, async {
        loop {
            match next_response(&mut bob).await {
                ServerResponse::OpponentLeft(notice) => return notice,
                ServerResponse::GameState(_) => continue,
                other => panic!("unexpected response {:?}", other),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(notice.opponent_id, "alice");

    wait_for(&server, Gauge::Battles, 0).await;
    wait_for(&server, Gauge::Sessions, 1).await;
}

#[tokio::test]
async fn test_leaving_queue_removes_entry() {
    let (server, addr) = start_server().await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice", 1000).await;
    wait_for(&server, Gauge::Queue, 1).await;

    drop(alice);

    wait_for(&server, Gauge::Queue, 0).await;
    wait_for(&server, Gauge::Sessions, 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let (server, addr) = start_server().await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice", 1000).await;
    wait_for(&server, Gauge::Sessions, 1).await;

    server.shutdown();
    expect_closed(&mut alice).await;
}
