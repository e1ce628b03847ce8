//! WebSocket Round Server
//!
//! Accept loop, one task per observer connection, and a single engine task
//! that owns all round state. Connection tasks reach the engine only through
//! an `mpsc` channel of [`EngineCommand`]s.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::account::AccountService;
use crate::core::env::{env_flag, env_parse};
use crate::game::crash_point::FairCrashPoints;
use crate::game::round::{RoundConfig, RoundEngine};
use crate::network::http::serve_http;
use crate::network::hub::ObserverId;
use crate::network::lifecycle::{BootstrapPolicy, ConnectionManager, EngineCommand, InboundFrame};
use crate::network::protocol::ServerMessage;

/// Capacity of the engine command channel.
const COMMAND_BUFFER: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket bind address.
    pub bind_addr: SocketAddr,
    /// Account HTTP API bind address.
    pub http_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue length per observer.
    pub send_buffer: usize,
    /// When the first round starts.
    pub bootstrap: BootstrapPolicy,
    /// Publish seed commitments and reveals on the wire.
    pub publish_commitment: bool,
    /// Round timing.
    pub round: RoundConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            max_connections: 1000,
            send_buffer: 64,
            bootstrap: BootstrapPolicy::FirstConnection,
            publish_commitment: false,
            round: RoundConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables. Unset or unparsable values
    /// keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("PORT", defaults.bind_addr.port());
        let http_port = env_parse("HTTP_PORT", defaults.http_addr.port());

        Self {
            bind_addr: socket_addr(&host, port),
            http_addr: socket_addr(&host, http_port),
            max_connections: env_parse("MAX_CONNECTIONS", defaults.max_connections),
            send_buffer: env_parse("SEND_BUFFER", defaults.send_buffer).max(1),
            bootstrap: env_parse("ROUND_BOOTSTRAP", defaults.bootstrap),
            publish_commitment: env_flag("PUBLISH_COMMITMENT"),
            round: RoundConfig::from_env(),
            ..defaults
        }
    }
}

fn socket_addr(host: &str, port: u16) -> SocketAddr {
    match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Ignoring BIND_HOST={}: {}", host, e);
            SocketAddr::from(([0, 0, 0, 0], port))
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

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// The engine task is no longer running.
    #[error("Round engine stopped")]
    EngineStopped,
}

/// The round server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ObserverId>>>,
    /// One permit per connection, taken at accept and held by its task.
    connection_slots: Arc<Semaphore>,
    /// Account service served over HTTP on `http_addr`, when attached.
    accounts: Option<Arc<AccountService>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        let slots = config.max_connections.min(Semaphore::MAX_PERMITS);

        Self {
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            connection_slots: Arc::new(Semaphore::new(slots)),
            accounts: None,
            shutdown_tx,
        }
    }

    /// Attach the account service; [`run`](Self::run) then also serves the
    /// account API.
    pub fn with_accounts(mut self, accounts: Arc<AccountService>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Bind the configured addresses and serve until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let http = match &self.accounts {
            Some(accounts) => {
                let http_listener = TcpListener::bind(&self.config.http_addr).await?;
                Some(tokio::spawn(serve_http(
                    http_listener,
                    accounts.clone(),
                    self.shutdown_tx.subscribe(),
                )))
            }
            None => None,
        };

        let result = self.serve(listener).await;
        if result.is_err() {
            self.shutdown();
        }

        if let Some(handle) = http {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Account API failed: {}", e),
                Err(e) => error!("Account API task failed: {}", e),
            }
        }
        result
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Crash round server {} listening on {}",
            self.config.version,
            listener.local_addr()?
        );

        let engine = RoundEngine::new(
            self.config.round.clone(),
            Box::new(FairCrashPoints::from_entropy()),
        );
        let manager =
            ConnectionManager::new(engine, self.config.bootstrap, self.config.publish_commitment);
        let (engine_tx, engine_rx) = mpsc::channel(COMMAND_BUFFER);
        let engine_handle =
            tokio::spawn(run_engine_loop(manager, engine_rx, self.shutdown_tx.subscribe()));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Reserved before the handshake so pending
                            // handshakes count against the limit.
                            let permit = match self.connection_slots.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("{}, rejecting {}", GameServerError::ConnectionLimitReached, addr);
                                    drop(stream);
                                    continue;
                                }
                            };

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr, engine_tx.clone(), permit);
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

        drop(engine_tx);
        if let Err(e) = engine_handle.await {
            error!("Engine task failed: {}", e);
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        engine_tx: mpsc::Sender<EngineCommand>,
        permit: OwnedSemaphorePermit,
    ) {
        let clients = self.clients.clone();
        let send_buffer = self.config.send_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(send_buffer);
            let id = ObserverId::new();

            clients.write().await.insert(addr, id);

            if engine_tx.send(EngineCommand::Connect { id, tx: msg_tx }).await.is_err() {
                warn!("{} for {}", GameServerError::EngineStopped, addr);
                clients.write().await.remove(&addr);
                return;
            }

            // Spawn message sender task. Ends when the engine drops the session.
            let sender_task = tokio::spawn(async move {
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

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let frame = match msg {
                            Some(Ok(Message::Text(text))) => InboundFrame::Text(text),
                            Some(Ok(Message::Binary(data))) => InboundFrame::Binary(data.len()),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };
                        if engine_tx.send(EngineCommand::Inbound { id, frame }).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            let _ = engine_tx.send(EngineCommand::Disconnect { id }).await;
            sender_task.abort();
            clients.write().await.remove(&addr);

            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Sender that triggers shutdown when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Connections that can still be accepted.
    pub fn available_slots(&self) -> usize {
        self.connection_slots.available_permits()
    }
}

/// Drive the connection manager until shutdown or until every command sender
/// is gone. Returns the manager, shut down.
pub async fn run_engine_loop(
    mut manager: ConnectionManager,
    mut commands: mpsc::Receiver<EngineCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ConnectionManager {
    manager.on_startup(now());

    loop {
        let deadline = manager.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => manager.handle_command(command, now()),
                None => {
                    debug!("Command channel closed");
                    break;
                }
            },
            _ = sleep_until(deadline) => manager.advance(now()),
            _ = shutdown_rx.recv() => {
                info!("Engine task stopping");
                break;
            }
        }
    }

    manager.shutdown();
    manager
}

/// Loop clock. Follows tokio's clock so paused-time tests drive it.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::crash_point::{CrashPoint, ScriptedCrashPoints};
    use crate::game::round::RoundPhase;
    use crate::network::protocol::ConnectedInfo;

    fn scripted_manager(hundredths: &[u32]) -> ConnectionManager {
        let points = hundredths.iter().map(|h| CrashPoint::from_hundredths(*h)).collect();
        let engine = RoundEngine::new(RoundConfig::default(), Box::new(ScriptedCrashPoints::new(points)));
        ConnectionManager::new(engine, BootstrapPolicy::FirstConnection, false)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.http_addr.port(), 5001);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.send_buffer, 64);
        assert_eq!(config.bootstrap, BootstrapPolicy::FirstConnection);
        assert!(!config.publish_commitment);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = GameServer::new(ServerConfig::default());
        server.shutdown();
        // Should not panic
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_loop_runs_full_round() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        let engine = tokio::spawn(run_engine_loop(
            scripted_manager(&[130]),
            cmd_rx,
            shutdown_tx.subscribe(),
        ));

        let (tx, mut rx) = mpsc::channel(256);
        cmd_tx
            .send(EngineCommand::Connect { id: ObserverId::new(), tx })
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(msg) = rx.recv().await {
            let done = matches!(msg, ServerMessage::Crash(_));
            seen.push(msg);
            if done {
                break;
            }
        }

        assert!(matches!(
            seen[0],
            ServerMessage::Connected(ConnectedInfo { phase: RoundPhase::Idle, .. })
        ));
        let countdowns: Vec<u32> = seen
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Waiting(w) => Some(w.countdown),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![8, 7, 6, 5, 4, 3, 2, 1]);

        let starts = seen.iter().filter(|m| matches!(m, ServerMessage::GameStart(_))).count();
        assert_eq!(starts, 1);

        // 10 * ln(1.3) = 2.62s: 26 progress ticks, crash on the 27th.
        let progress: Vec<&str> = seen
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Progress(p) => Some(p.multiplier.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 26);
        assert_eq!(progress[0], "1.01");
        assert_eq!(progress[9], "1.11");
        assert!(matches!(seen.last(), Some(ServerMessage::Crash(c)) if c.multiplier == "1.30"));

        // Next round starts after the cooldown without any new connection.
        let next = rx.recv().await.unwrap();
        assert_eq!(next, ServerMessage::Waiting(crate::network::protocol::WaitingInfo { countdown: 8 }));

        shutdown_tx.send(()).unwrap();
        let manager = engine.await.unwrap();
        assert_eq!(manager.phase(), RoundPhase::Idle);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_loop_snapshot_and_shutdown_on_close() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        let engine = tokio::spawn(run_engine_loop(
            scripted_manager(&[200]),
            cmd_rx,
            shutdown_tx.subscribe(),
        ));

        let (reply, answer) = tokio::sync::oneshot::channel();
        cmd_tx.send(EngineCommand::Snapshot { reply }).await.unwrap();
        assert_eq!(answer.await.unwrap().phase, RoundPhase::Idle);

        drop(cmd_tx);
        let manager = engine.await.unwrap();
        assert_eq!(manager.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_websocket_observer_receives_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = GameServer::new(ServerConfig::default());
        let shutdown = server.shutdown_handle();
        let serving = tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
            .await
            .unwrap();

        let first = match ws.next().await {
            Some(Ok(Message::Text(text))) => ServerMessage::from_json(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        };
        assert!(matches!(first, ServerMessage::Connected(ConnectedInfo { game_active: false, .. })));

        let second = match ws.next().await {
            Some(Ok(Message::Text(text))) => ServerMessage::from_json(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        };
        assert!(matches!(second, ServerMessage::Waiting(w) if w.countdown == 8));

        ws.send(Message::Text("garbage".into())).await.unwrap();
        let reply = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text).unwrap() {
                    ServerMessage::Waiting(_) => continue,
                    other => break other,
                },
                other => panic!("unexpected frame {:?}", other),
            }
        };
        assert_eq!(reply, ServerMessage::error("Invalid message format"));

        shutdown.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_reserved_at_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ServerConfig {
            max_connections: 1,
            ..Default::default()
        }));
        assert_eq!(server.available_slots(), 1);
        let shutdown = server.shutdown_handle();
        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        // A raw TCP connection that never handshakes still holds the slot.
        let idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while server.available_slots() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(server.connection_count().await, 0);

        let url = format!("ws://{}", addr);
        assert!(tokio_tungstenite::connect_async(&url).await.is_err());

        // Closing the idle socket fails its handshake and frees the slot.
        drop(idle);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while server.available_slots() == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert!(matches!(ws.next().await, Some(Ok(Message::Text(_)))));
        assert_eq!(server.available_slots(), 0);

        shutdown.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_serves_account_api() {
        use crate::account::{AccountConfig, Ledger};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Reserve two free ports, then release them for the server to bind.
        let ws_free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_free.local_addr().unwrap();
        let http_addr = http_free.local_addr().unwrap();
        drop((ws_free, http_free));

        let accounts = Arc::new(AccountService::new(
            &AccountConfig {
                password_cost: 4,
                ..Default::default()
            },
            Arc::new(Ledger::new()),
        ));
        let server = GameServer::new(ServerConfig {
            bind_addr: ws_addr,
            http_addr,
            ..Default::default()
        })
        .with_accounts(accounts.clone());
        let shutdown = server.shutdown_handle();
        let running = tokio::spawn(async move { server.run().await });

        let body = r#"{"username":"zoe","password":"secret1"}"#;
        let request = format!(
            "POST /register HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let mut stream = loop {
            match TcpStream::connect(http_addr).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 201"));
        assert!(response.contains("\"username\":\"zoe\""));
        assert_eq!(accounts.ledger().len().await, 1);

        shutdown.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
