//! Protocol Messages
//!
//! Wire format for the observer WebSocket. Every message is a JSON object
//! with an `event` discriminant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::multiplier::format_multiplier;
use crate::game::events::RoundEvent;
use crate::game::round::{RoundPhase, RoundSnapshot};

/// Sent for JSON that does not decode to a known client message.
pub const INVALID_FORMAT_MESSAGE: &str = "Invalid message format";
/// Sent for a `placeBet` that fails validation.
pub const INVALID_BET_MESSAGE: &str = "Invalid bet data";

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from observer to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMessage {
    /// Bet intent. Validated and logged; settlement is not implemented.
    #[serde(rename = "placeBet")]
    PlaceBet(BetRequest),
}

/// User reference as clients send it: numeric id or string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    /// Numeric user id.
    Id(u64),
    /// String user id or name.
    Name(String),
}

impl UserRef {
    fn is_blank(&self) -> bool {
        match self {
            UserRef::Id(id) => *id == 0,
            UserRef::Name(name) => name.trim().is_empty(),
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Id(id) => write!(f, "{}", id),
            UserRef::Name(name) => f.write_str(name),
        }
    }
}

/// Raw `placeBet` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    /// Bettor.
    #[serde(default)]
    pub user_id: Option<UserRef>,
    /// Stake.
    #[serde(default)]
    pub bet_amount: Option<f64>,
    /// Optional automatic cash-out multiplier.
    #[serde(default)]
    pub auto_cash_out: Option<f64>,
}

/// A bet that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidBet {
    /// Bettor.
    pub user_id: UserRef,
    /// Stake, finite and positive.
    pub amount: f64,
    /// Automatic cash-out multiplier, if given.
    pub auto_cash_out: Option<f64>,
}

impl BetRequest {
    /// Require a user and a positive, finite amount.
    pub fn validate(&self) -> Result<ValidBet, ProtocolError> {
        let user_id = match &self.user_id {
            Some(user) if !user.is_blank() => user.clone(),
            _ => return Err(ProtocolError::InvalidBet),
        };
        let amount = match self.bet_amount {
            Some(amount) if amount.is_finite() && amount > 0.0 => amount,
            _ => return Err(ProtocolError::InvalidBet),
        };
        Ok(ValidBet {
            user_id,
            amount,
            auto_cash_out: self.auto_cash_out,
        })
    }
}

/// Errors decoding or validating inbound messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or not a known client message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    Binary,

    /// `placeBet` failed validation.
    #[error("invalid bet data")]
    InvalidBet,
}

impl ProtocolError {
    /// Human-readable text for the `error` event.
    pub fn client_message(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) | ProtocolError::Binary => INVALID_FORMAT_MESSAGE,
            ProtocolError::InvalidBet => INVALID_BET_MESSAGE,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot sent once to each new session.
    Connected(ConnectedInfo),

    /// Countdown tick.
    Waiting(WaitingInfo),

    /// Round started.
    GameStart(GameStartInfo),

    /// Multiplier tick.
    Progress(ProgressInfo),

    /// Round crashed.
    Crash(CrashInfo),

    /// Error reply to the sending session.
    Error(ServerError),
}

/// Connection snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    /// True while the multiplier is running.
    pub game_active: bool,
    /// Revealed crash point, `null` until the round has crashed.
    pub crash_point: Option<f64>,
    /// Current round phase.
    pub phase: RoundPhase,
    /// Remaining countdown during Waiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown: Option<u32>,
    /// Seed commitment of the current round (when published).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
}

/// Countdown tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingInfo {
    /// Seconds until start.
    pub countdown: u32,
}

/// Round start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStartInfo {
    /// Hex SHA-256 seed commitment (when published).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
}

/// Multiplier tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Two-decimal multiplier string.
    pub multiplier: String,
}

/// Round crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashInfo {
    /// The committed crash point, two decimals.
    pub multiplier: String,
    /// Hex server seed opening the commitment (when published).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

/// Error event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable message.
    pub message: String,
}

impl ServerMessage {
    /// Wire form of a round event.
    ///
    /// `publish_commitment` adds the seed commitment to `game_start` and the
    /// seed to `crash`.
    pub fn from_round_event(event: &RoundEvent, publish_commitment: bool) -> Self {
        match event {
            RoundEvent::Waiting { countdown, .. } => {
                ServerMessage::Waiting(WaitingInfo { countdown: *countdown })
            }
            RoundEvent::GameStart { commitment, .. } => ServerMessage::GameStart(GameStartInfo {
                commitment: publish_commitment.then(|| commitment.to_hex()),
            }),
            RoundEvent::Progress { multiplier, .. } => ServerMessage::Progress(ProgressInfo {
                multiplier: format_multiplier(*multiplier),
            }),
            RoundEvent::Crash { crash_point, reveal, .. } => ServerMessage::Crash(CrashInfo {
                multiplier: crash_point.to_string(),
                seed: if publish_commitment {
                    reveal.map(|r| r.seed_hex())
                } else {
                    None
                },
            }),
        }
    }

    /// Snapshot for a newly connected session.
    pub fn connected(snapshot: &RoundSnapshot, publish_commitment: bool) -> Self {
        ServerMessage::Connected(ConnectedInfo {
            game_active: snapshot.game_active(),
            crash_point: snapshot.crash_point.map(|c| c.as_f64()),
            phase: snapshot.phase,
            countdown: snapshot.countdown,
            commitment: if publish_commitment {
                snapshot.commitment.map(|c| c.to_hex())
            } else {
                None
            },
        })
    }

    /// Error event.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { message: message.into() })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
