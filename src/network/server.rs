//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections.
//! Routes room actions to the registry, broadcasts room state, schedules
//! delayed pair resolution, and feeds finished matches to the leaderboard.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::game::leaderboard::{Leaderboard, DEFAULT_LEADERBOARD_LIMIT};
use crate::game::state::{ConnectionId, FlipOutcome, Resolution, ResolveTicket, SessionPhase};
use crate::network::protocol::{
    AckInfo, ClientMessage, ErrorCode, FlipRequest, GameOverInfo, JoinRequest,
    LeaderboardSnapshot, MatchInfo, RoomRequest, ServerMessage,
};
use crate::network::session::{
    deliver, env_var, Leave, RegistryError, RoomRegistry, Seat, SessionConfig, SharedRoom,
};

/// Time allowed for a closing connection to flush queued messages.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Default leaderboard snapshot size.
    pub leaderboard_limit: usize,
    /// Server version string.
    pub version: String,
    /// Room defaults.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            leaderboard_limit: DEFAULT_LEADERBOARD_LIMIT,
            version: env!("CARGO_PKG_VERSION").to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `BIND_ADDR` wins over `PORT`; `PORT` alone binds every interface.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = env_var::<SocketAddr>("BIND_ADDR")
            .or_else(|| env_var::<u16>("PORT").map(|port| SocketAddr::from(([0, 0, 0, 0], port))))
            .unwrap_or(defaults.bind_addr);

        Self {
            bind_addr,
            max_connections: env_var("MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            leaderboard_limit: env_var("LEADERBOARD_LIMIT").unwrap_or(defaults.leaderboard_limit),
            version: defaults.version,
            session: SessionConfig::from_env(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Registry refused a request.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GameServerError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            GameServerError::Registry(RegistryError::RoomExists) => ErrorCode::RoomExists,
            GameServerError::Registry(RegistryError::RoomNotFound | RegistryError::Closed) => {
                ErrorCode::RoomNotFound
            }
            GameServerError::Registry(RegistryError::RoomFull) => ErrorCode::RoomFull,
            GameServerError::Registry(RegistryError::NotInRoom) => ErrorCode::NotInRoom,
            _ => ErrorCode::InternalError,
        }
    }
}

/// Connected client state.
struct ConnectedClient {
    /// Remote address.
    addr: SocketAddr,
    /// Connection time.
    connected_at: Instant,
    /// Message sender (for leaderboard broadcasts).
    sender: mpsc::Sender<ServerMessage>,
}

/// Services shared by every connection task.
#[derive(Clone)]
struct ServerContext {
    config: Arc<ServerConfig>,
    registry: Arc<RoomRegistry>,
    leaderboard: Arc<RwLock<Leaderboard>>,
    clients: Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>,
}

/// The game server.
pub struct GameServer {
    /// Shared services.
    ctx: ServerContext,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = RoomRegistry::new(config.session.clone());

        Self {
            ctx: ServerContext {
                config: Arc::new(config),
                registry: Arc::new(registry),
                leaderboard: Arc::new(RwLock::new(Leaderboard::new())),
                clients: Arc::new(RwLock::new(BTreeMap::new())),
            },
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on a bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Memory match server v{} listening on {}",
            self.ctx.config.version,
            listener.local_addr()?
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.ctx.clients.read().await.len();
                            if clients_count >= self.ctx.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                Self::reject_connection(stream, addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = self.ctx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::serve_connection(ctx, stream, addr, shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }
        });
    }

    /// Tell an over-limit client why it is refused, then close.
    fn reject_connection(stream: TcpStream, addr: SocketAddr) {
        tokio::spawn(async move {
            let refusal = async {
                let mut ws_stream = accept_async(stream).await?;
                let msg = ServerMessage::error(ErrorCode::ServerOverloaded, "Server is at capacity");
                let text = msg.to_json().map_err(|e| GameServerError::Internal(e.to_string()))?;
                ws_stream.send(Message::Text(text)).await?;
                ws_stream.close(None).await?;
                Ok::<(), GameServerError>(())
            };
            if let Err(e) = tokio::time::timeout(FLUSH_TIMEOUT, refusal).await.unwrap_or_else(|_| {
                Err(GameServerError::Internal("refusal timed out".to_string()))
            }) {
                debug!("Refusing {} failed: {}", addr, e);
            }
        });
    }

    async fn serve_connection(
        ctx: ServerContext,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

        let connection_id = ConnectionId::random();

        // Register client
        {
            let mut clients = ctx.clients.write().await;
            clients.insert(connection_id, ConnectedClient {
                addr,
                connected_at: Instant::now(),
                sender: msg_tx.clone(),
            });
        }
        info!("Client {} connected from {}", connection_id.short(), addr);

        // Spawn message sender task
        let mut sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Greet with the current standings
        let snapshot = Self::leaderboard_snapshot(&ctx, None).await;
        let _ = msg_tx.send(snapshot).await;

        // Handle incoming messages
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match ClientMessage::from_json(&text) {
                                Ok(client_msg) => {
                                    Self::handle_client_message(&ctx, connection_id, client_msg, &msg_tx).await;
                                }
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", connection_id.short(), e);
                                    let _ = msg_tx.send(ServerMessage::error(
                                        ErrorCode::InvalidInput,
                                        "Invalid message format",
                                    )).await;
                                }
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match ClientMessage::from_bytes(&data) {
                                Ok(client_msg) => {
                                    Self::handle_client_message(&ctx, connection_id, client_msg, &msg_tx).await;
                                }
                                Err(e) => {
                                    debug!("Invalid binary frame from {}: {}", connection_id.short(), e);
                                    let _ = msg_tx.send(ServerMessage::error(
                                        ErrorCode::InvalidInput,
                                        "Invalid message format",
                                    )).await;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", connection_id.short());
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", connection_id.short(), e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    }).await;
                    break;
                }
            }
        }

        // Cleanup
        let leaves = ctx.registry.disconnect(&connection_id).await;
        for leave in leaves {
            Self::announce_departure(&leave).await;
        }

        let session_length = {
            let mut clients = ctx.clients.write().await;
            clients.remove(&connection_id).map(|c| (c.addr, c.connected_at.elapsed()))
        };

        drop(msg_tx);
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut sender_task).await.is_err() {
            sender_task.abort();
        }

        if let Some((addr, elapsed)) = session_length {
            info!(
                "Client {} ({}) cleaned up after {:.1}s",
                connection_id.short(),
                addr,
                elapsed.as_secs_f64()
            );
        }
        Ok(())
    }

    /// Handle a client message.
    async fn handle_client_message(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        if msg.room_id().is_some_and(|id| id.trim().is_empty()) {
            let _ = sender.send(ServerMessage::error(ErrorCode::InvalidInput, "room_id is required")).await;
            return;
        }

        match msg {
            ClientMessage::CreateRoom(req) => {
                Self::handle_create(ctx, connection_id, req, sender).await;
            }
            ClientMessage::JoinRoom(req) => {
                Self::handle_join(ctx, connection_id, req, sender).await;
            }
            ClientMessage::Start { room_id } => {
                Self::handle_start(ctx, connection_id, &room_id, sender).await;
            }
            ClientMessage::Flip(req) => {
                Self::handle_flip(ctx, connection_id, req, sender).await;
            }
            ClientMessage::Restart { room_id } => {
                Self::handle_restart(ctx, connection_id, &room_id, sender).await;
            }
            ClientMessage::Leave { room_id } => {
                Self::handle_leave(ctx, connection_id, &room_id, sender).await;
            }
            ClientMessage::Leaderboard { limit } => {
                let snapshot = Self::leaderboard_snapshot(ctx, limit).await;
                let _ = sender.send(snapshot).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: server_time_ms(),
                }).await;
            }
        }
    }

    /// Handle create room request.
    async fn handle_create(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        req: RoomRequest,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        if req.username.trim().is_empty() {
            let _ = sender.send(ServerMessage::Ack(AckInfo::failure(
                &req.room_id,
                ErrorCode::InvalidInput,
                "username is required",
            ))).await;
            return;
        }

        let result = ctx.registry
            .create_room(&req.room_id, connection_id, req.username.trim(), req.card_count, sender.clone())
            .await;
        Self::acknowledge_seat(connection_id, &req.room_id, result, sender).await;
    }

    /// Handle join room request.
    async fn handle_join(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        req: JoinRequest,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        if req.username.trim().is_empty() {
            let _ = sender.send(ServerMessage::Ack(AckInfo::failure(
                &req.room_id,
                ErrorCode::InvalidInput,
                "username is required",
            ))).await;
            return;
        }

        let result = ctx.registry
            .join_room(
                &req.room_id,
                connection_id,
                req.username.trim(),
                req.create_if_missing,
                req.card_count,
                sender.clone(),
            )
            .await;
        Self::acknowledge_seat(connection_id, &req.room_id, result, sender).await;
    }

    /// Ack a create/join and broadcast the new roster.
    async fn acknowledge_seat(
        connection_id: ConnectionId,
        room_id: &str,
        result: Result<Seat, RegistryError>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match result {
            Ok(seat) => {
                let session = seat.room.read().await;
                deliver(&connection_id, sender, ServerMessage::Ack(AckInfo::success(
                    room_id,
                    connection_id.to_string(),
                    session.usernames(),
                )));
                if seat.joined {
                    session.broadcast_state().await;
                } else {
                    deliver(&connection_id, sender, ServerMessage::State(session.state_update()));
                }
            }
            Err(e) => {
                debug!("Room request from {} for {} refused: {}", connection_id.short(), room_id, e);
                let err = GameServerError::from(e);
                let _ = sender.send(ServerMessage::Ack(AckInfo::failure(
                    room_id,
                    err.code(),
                    room_error_message(&err, room_id),
                ))).await;
            }
        }
    }

    /// Look up a room, reporting an explicit error when it is missing.
    async fn find_room(
        ctx: &ServerContext,
        room_id: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Option<SharedRoom> {
        let room = ctx.registry.get(room_id).await;
        if room.is_none() {
            let _ = sender.send(ServerMessage::error(
                ErrorCode::RoomNotFound,
                format!("Room {} not found", room_id),
            )).await;
        }
        room
    }

    /// Handle start request.
    async fn handle_start(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        room_id: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(room) = Self::find_room(ctx, room_id, sender).await else {
            return;
        };

        let mut session = room.write().await;
        if session.is_closed() || !session.is_member(&connection_id) {
            debug!("Ignoring start for {} from non-member {}", room_id, connection_id.short());
            return;
        }

        if session.game_mut().start() {
            info!("Room {} started with {} players", room_id, session.game().players().len());
            session.broadcast_state().await;
        } else if session.game().phase() == SessionPhase::Waiting {
            let needed = session.game().config().min_players;
            session.broadcast(ServerMessage::Info {
                room_id: room_id.to_string(),
                message: format!("Need at least {} players to start.", needed),
            }).await;
        }
    }

    /// Handle flip request.
    async fn handle_flip(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        req: FlipRequest,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(room) = Self::find_room(ctx, &req.room_id, sender).await else {
            return;
        };

        let mut session = room.write().await;
        if session.is_closed() {
            return;
        }

        match session.game_mut().flip(connection_id, req.card_index) {
            Some(FlipOutcome::Revealed(_)) => {
                session.broadcast_state().await;
            }
            Some(FlipOutcome::PairRevealed(_, ticket)) => {
                session.broadcast_state().await;
                Self::schedule_resolution(ctx.clone(), req.room_id.clone(), room.clone(), ticket);
            }
            None => {
                debug!(
                    "Ignoring flip of {} in {} from {}",
                    req.card_index,
                    req.room_id,
                    connection_id.short()
                );
            }
        }
    }

    /// Resolve a revealed pair after the reveal delay.
    fn schedule_resolution(ctx: ServerContext, room_id: String, room: SharedRoom, ticket: ResolveTicket) {
        let delay = ctx.config.session.reveal_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::resolve_pair(&ctx, &room_id, &room, ticket).await;
        });
    }

    async fn resolve_pair(ctx: &ServerContext, room_id: &str, room: &SharedRoom, ticket: ResolveTicket) {
        if !ctx.registry.is_current(room_id, room).await {
            debug!("Room {} gone before resolution", room_id);
            return;
        }

        let winners = {
            let mut session = room.write().await;
            if session.is_closed() {
                return;
            }

            let resolution = match session.game_mut().resolve(ticket) {
                Ok(Some(resolution)) => resolution,
                Ok(None) => {
                    debug!("Stale resolution for room {} (generation {})", room_id, ticket.generation);
                    return;
                }
                Err(e) => {
                    error!("Room {} refused resolution: {}", room_id, e);
                    return;
                }
            };

            let event = match resolution {
                Resolution::Matched { by, symbol, cards } => ServerMessage::Match(MatchInfo {
                    room_id: room_id.to_string(),
                    by,
                    symbol: symbol.glyph().to_string(),
                    cards,
                }),
                Resolution::Mismatched { next_player } => ServerMessage::NoMatch {
                    room_id: room_id.to_string(),
                    next_player,
                },
            };
            session.broadcast(event).await;
            session.broadcast_state().await;

            if !session.game().is_finished() {
                return;
            }

            let winners = session.game().winners().to_vec();
            info!("Room {} finished, winners: {:?}", room_id, winners);
            session.broadcast(ServerMessage::GameOver(GameOverInfo {
                room_id: room_id.to_string(),
                winners: winners.clone(),
                finished_at: Utc::now(),
            })).await;
            winners
        };

        Self::record_win(ctx, &winners).await;
    }

    /// Credit winners and push the new standings to every client.
    async fn record_win(ctx: &ServerContext, winners: &[String]) {
        {
            let mut leaderboard = ctx.leaderboard.write().await;
            leaderboard.record_win(winners);
        }

        let snapshot = Self::leaderboard_snapshot(ctx, None).await;
        let clients = ctx.clients.read().await;
        for (connection_id, client) in clients.iter() {
            deliver(connection_id, &client.sender, snapshot.clone());
        }
    }

    /// Handle restart request.
    async fn handle_restart(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        room_id: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(room) = Self::find_room(ctx, room_id, sender).await else {
            return;
        };

        let mut session = room.write().await;
        if session.is_closed() || !session.is_member(&connection_id) {
            debug!("Ignoring restart for {} from non-member {}", room_id, connection_id.short());
            return;
        }

        session.game_mut().restart();
        info!("Room {} restarted", room_id);
        session.broadcast(ServerMessage::Restarted { room_id: room_id.to_string() }).await;
        session.broadcast_state().await;
    }

    /// Handle leave request.
    async fn handle_leave(
        ctx: &ServerContext,
        connection_id: ConnectionId,
        room_id: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match ctx.registry.leave(room_id, &connection_id).await {
            Ok(leave) => {
                let players = leave.room.read().await.usernames();
                let _ = sender.send(ServerMessage::Ack(AckInfo::success(
                    room_id,
                    connection_id.to_string(),
                    players,
                ))).await;
                Self::announce_departure(&leave).await;
            }
            Err(e) => {
                let err = GameServerError::from(e);
                let _ = sender.send(ServerMessage::error(err.code(), room_error_message(&err, room_id))).await;
            }
        }
    }

    /// Tell the remaining players about a departure.
    async fn announce_departure(leave: &Leave) {
        if leave.departure.room_empty {
            return;
        }

        let session = leave.room.read().await;
        if leave.departure.paused {
            let needed = session.game().config().min_players;
            session.broadcast(ServerMessage::Info {
                room_id: leave.room_id.clone(),
                message: format!("Paused: need at least {} players to continue.", needed),
            }).await;
        }
        session.broadcast_state().await;
    }

    async fn leaderboard_snapshot(ctx: &ServerContext, limit: Option<usize>) -> ServerMessage {
        let limit = limit.unwrap_or(ctx.config.leaderboard_limit);
        let leaderboard = ctx.leaderboard.read().await;
        ServerMessage::Leaderboard(LeaderboardSnapshot { entries: leaderboard.top(limit) })
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.ctx.clients.read().await.len()
    }

    /// Get active room count.
    pub async fn room_count(&self) -> usize {
        self.ctx.registry.room_count().await
    }

    /// Room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.ctx.registry
    }

    /// Process-wide leaderboard.
    pub fn leaderboard(&self) -> &Arc<RwLock<Leaderboard>> {
        &self.ctx.leaderboard
    }
}

fn room_error_message(err: &GameServerError, room_id: &str) -> String {
    match err {
        GameServerError::Registry(RegistryError::RoomExists) => format!("Room {} already exists", room_id),
        GameServerError::Registry(RegistryError::RoomNotFound | RegistryError::Closed) => {
            format!("Room {} not found", room_id)
        }
        GameServerError::Registry(RegistryError::RoomFull) => format!("Room {} is full", room_id),
        GameServerError::Registry(RegistryError::NotInRoom) => format!("Not in room {}", room_id),
        other => other.to_string(),
    }
}

fn server_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
