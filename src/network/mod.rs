//! Network Layer
//!
//! WebSocket transport for observers and the account HTTP API. All round
//! state lives in `game/`; this layer moves it onto the wire.

pub mod http;
pub mod hub;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use http::{create_router, serve_http, ApiError, AppState};
pub use hub::{BroadcastHub, BroadcastReport, ObserverId};
pub use lifecycle::{BootstrapPolicy, ConnectionManager, EngineCommand, InboundFrame};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use server::{run_engine_loop, GameServer, GameServerError, ServerConfig};
