//! WebSocket Game Server
//!
//! Accepts WebSocket connections on `/ws` and runs one supervisor task per
//! connection. The supervisor drives the handshake, session registration,
//! matchmaking and the keep-alive read loop, then cleans up on every exit
//! path.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::battle::{Battle, Participant, StateSink};
use crate::network::connection::{ConnectionHandle, PlayerIdentity};
use crate::network::matchmaking::{MatchmakingQueue, QueueEntry};
use crate::network::protocol::{DecodeError, JoinQueueRequest, MatchFound, ServerResponse};
use crate::network::registry::SessionRegistry;

/// The only path that is upgraded to a WebSocket.
pub const WS_PATH: &str = "/ws";

/// Game server errors.
#[derive(Debug, Error)]
pub enum GameServerError {
    /// Failed to bind or inspect the listener.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Why a handshake was rejected. Always fatal for that connection only.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Peer went away before sending the handshake.
    #[error("connection closed before handshake")]
    Closed,
    /// No handshake within the read deadline.
    #[error("handshake timed out")]
    Timeout,
    /// First data frame was not binary.
    #[error("expected a binary handshake frame")]
    UnexpectedFrame,
    /// Handshake frame did not decode.
    #[error("invalid handshake: {0}")]
    Decode(#[from] DecodeError),
    /// Handshake carried an empty player id.
    #[error("empty player id")]
    EmptyPlayerId,
    /// Transport failed while reading.
    #[error("transport error: {0}")]
    Transport(#[from] WsError),
}

/// Why a keep-alive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,
    /// Nothing arrived within the read deadline.
    TimedOut,
    /// Read failed.
    TransportError,
    /// The handle was closed (eviction or a failed write).
    Closed,
    /// The server is shutting down.
    Shutdown,
}

/// Shared state behind every supervisor.
pub struct ServerState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Live session per player id.
    pub sessions: SessionRegistry,
    /// Players waiting for an opponent.
    pub queue: MatchmakingQueue,
    battles: RwLock<BTreeMap<Uuid, Arc<Battle>>>,
    connections: AtomicUsize,
}

impl ServerState {
    fn new(config: ServerConfig) -> Self {
        Self {
            queue: MatchmakingQueue::new(config.trophy_range),
            sessions: SessionRegistry::new(),
            battles: RwLock::new(BTreeMap::new()),
            connections: AtomicUsize::new(0),
            config,
        }
    }

    /// Pair `seeker` with a dequeued opponent and start their battle.
    async fn start_match(
        self: &Arc<Self>,
        seeker: &PlayerIdentity,
        seeker_handle: &ConnectionHandle,
        opponent: QueueEntry,
    ) {
        let room_id = room_id_for(&seeker.id, &opponent.identity.id);
        let waited_ms = u64::try_from(opponent.waited().as_millis()).unwrap_or(u64::MAX);
        info!(room = %room_id, waited_ms, "Match start: {} vs {}", seeker.id, opponent.identity.id);

        notify_match_found(seeker_handle, &opponent.identity, &room_id);
        notify_match_found(&opponent.handle, seeker, &room_id);

        let seeker_sink: Arc<dyn StateSink> = Arc::new(seeker_handle.clone());
        let opponent_sink: Arc<dyn StateSink> = Arc::new(opponent.handle.clone());
        let battle = Arc::new(Battle::new(
            room_id,
            Participant::new(seeker.id.clone(), seeker_sink),
            Participant::new(opponent.identity.id.clone(), opponent_sink),
            self.config.battle.clone(),
        ));

        seeker_handle.attach_battle(&battle).await;
        opponent.handle.attach_battle(&battle).await;

        let task = match battle.start() {
            Ok(task) => task,
            Err(e) => {
                error!(battle = %battle.id(), "Failed to start battle: {}", e);
                return;
            }
        };

        let battle_id = battle.id();
        self.battles.write().await.insert(battle_id, battle);

        let state = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(battle = %battle_id, "Battle task failed: {}", e);
            }
            state.battles.write().await.remove(&battle_id);
        });
    }

    async fn stop_all_battles(&self) {
        let battles = self.battles.read().await;
        for battle in battles.values() {
            battle.stop();
        }
    }
}

/// Holds one slot of the connection limit until dropped.
struct ConnectionSlot(Arc<ServerState>);

impl ConnectionSlot {
    fn try_acquire(state: &Arc<ServerState>) -> Option<Self> {
        let previous = state.connections.fetch_add(1, Ordering::AcqRel);
        if previous >= state.config.max_connections {
            state.connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self(Arc::clone(state)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The game server.
pub struct GameServer {
    state: Arc<ServerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            state: Arc::new(ServerState::new(config)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}{}", listener.local_addr()?, WS_PATH);

        let stats_handle = tokio::spawn(run_stats_loop(Arc::clone(&self.state)));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Some(slot) = ConnectionSlot::try_acquire(&self.state) else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            debug!("New connection from {}", addr);
                            let state = Arc::clone(&self.state);
                            let shutdown = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(state, stream, addr, shutdown).await;
                                drop(slot);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        stats_handle.abort();
        self.state.stop_all_battles().await;
        self.state.sessions.close_all().await;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Shared server state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Acquire)
    }

    /// Get registered session count.
    pub async fn session_count(&self) -> usize {
        self.state.sessions.count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.state.queue.len().await
    }

    /// Get running battle count.
    pub async fn battle_count(&self) -> usize {
        self.state.battles.read().await.len()
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Room identifier for a pair, seeker first.
pub fn room_id_for(seeker_id: &str, opponent_id: &str) -> String {
    format!("room_{}_{}", seeker_id, opponent_id)
}

fn notify_match_found(to: &ConnectionHandle, opponent: &PlayerIdentity, room_id: &str) {
    let response = ServerResponse::MatchFound(MatchFound {
        opponent_id: opponent.id.clone(),
        opponent_trophies: opponent.trophies,
        room_id: room_id.to_string(),
    });
    if let Err(e) = to.send(&response) {
        warn!(connection = to.id(), "Failed to send match found: {}", e);
    }
}

fn websocket_config(config: &ServerConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_frame_bytes);
    ws_config.max_frame_size = Some(config.max_frame_bytes);
    ws_config
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        Ok(response)
    } else {
        let mut rejection = ErrorResponse::new(Some("not found".to_string()));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    }
}

/// Supervise one connection from upgrade to cleanup.
async fn handle_connection(
    state: Arc<ServerState>,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = &state.config;
    let ws_stream =
        match accept_hdr_async_with_config(stream, check_path, Some(websocket_config(config))).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
        };

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (handle, outbound_rx) = ConnectionHandle::channel();
    let writer = tokio::spawn(run_writer(
        ws_sender,
        outbound_rx,
        handle.clone(),
        config.write_wait,
        config.ping_period,
    ));

    let handshake = read_handshake(&mut ws_receiver, config.pong_wait, config.max_frame_bytes);
    let identity = match handshake.await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Handshake rejected for {}: {}", addr, e);
            handle.close();
            let _ = writer.await;
            return;
        }
    };

    info!(player = %identity.id, trophies = identity.trophies, %addr, "Player joined");

    state.sessions.register(&identity, handle.clone()).await;

    match state.queue.find_and_remove_opponent(&identity).await {
        Some(opponent) => state.start_match(&identity, &handle, opponent).await,
        None => {
            state.queue.add(QueueEntry::new(identity.clone(), handle.clone())).await;
            info!(player = %identity.id, "Player added to queue");
        }
    }

    let reason = keep_alive(&mut ws_receiver, &handle, config.pong_wait, &mut shutdown).await;
    debug!(player = %identity.id, ?reason, "Connection loop ended");

    // Cleanup
    state.queue.remove(&handle).await;
    if let Some(battle) = handle.take_battle().await {
        battle.forfeit(&identity.id);
    }
    state.sessions.unregister(&identity, &handle).await;
    handle.close();
    let _ = writer.await;

    info!(player = %identity.id, "Player cleaned up");
}

/// Wait for the single handshake frame and validate it.
///
/// Control frames before the handshake are skipped.
pub async fn read_handshake<S>(
    stream: &mut S,
    wait: Duration,
    max_bytes: usize,
) -> Result<PlayerIdentity, HandshakeError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let deadline = Instant::now() + wait;

    let data = loop {
        let frame = tokio::time::timeout_at(deadline, stream.next())
            .await
            .map_err(|_| HandshakeError::Timeout)?;

        match frame {
            None | Some(Ok(Message::Close(_))) => return Err(HandshakeError::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Binary(data))) => break data,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) => return Err(HandshakeError::UnexpectedFrame),
        }
    };

    let request = JoinQueueRequest::decode_with_limit(&data, max_bytes)?;
    if request.player_id.trim().is_empty() {
        return Err(HandshakeError::EmptyPlayerId);
    }

    Ok(PlayerIdentity::new(request.player_id, request.trophies))
}

/// Read until disconnect. Every inbound frame refreshes the read deadline.
pub async fn keep_alive<S>(
    stream: &mut S,
    handle: &ConnectionHandle,
    pong_wait: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> DisconnectReason
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            frame = timeout(pong_wait, stream.next()) => match frame {
                Err(_) => return DisconnectReason::TimedOut,
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return DisconnectReason::PeerClosed,
                Ok(Some(Err(e))) => {
                    debug!(connection = handle.id(), "Read error: {}", e);
                    return DisconnectReason::TransportError;
                }
                // Inbound gameplay messages are not part of the protocol yet
                Ok(Some(Ok(_))) => continue,
            },
            _ = handle.closed() => return DisconnectReason::Closed,
            _ = shutdown_requested(shutdown) => return DisconnectReason::Shutdown,
        }
    }
}

/// Own the write half: drain queued frames, send pings, enforce the write deadline.
async fn run_writer<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    handle: ConnectionHandle,
    write_wait: Duration,
    ping_period: Duration,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Binary(frame),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
            _ = handle.closed() => break,
        };

        match timeout(write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = handle.id(), "Write failed: {}", e);
                break;
            }
            Err(_) => {
                debug!(connection = handle.id(), "Write timed out");
                break;
            }
        }
    }

    handle.close();
    let _ = timeout(write_wait, sink.close()).await;
}

async fn run_stats_loop(state: Arc<ServerState>) {
    let mut ticker = interval(state.config.stats_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let sessions = state.sessions.count().await;
        let queued = state.queue.len().await;
        let battles = state.battles.read().await.len();
        info!(
            sessions,
            queued,
            battles,
            connections = state.connections.load(Ordering::Acquire),
            "Server stats"
        );
    }
}
