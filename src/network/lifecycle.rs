//! Connection Lifecycle
//!
//! Owns the round engine together with the broadcast hub. Sessions join and
//! leave here, and this is where the first round gets started.

use std::str::FromStr;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::game::events::RoundEvent;
use crate::game::round::{RoundEngine, RoundPhase, RoundSnapshot};
use crate::network::hub::{BroadcastHub, ObserverId};
use crate::network::protocol::{ClientMessage, ProtocolError, ServerMessage, ValidBet};

/// When the first round is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// On the first observer connection while the engine is idle.
    #[default]
    FirstConnection,
    /// As soon as the server starts.
    Startup,
}

impl FromStr for BootstrapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first_connection" | "first-connection" | "connection" => {
                Ok(BootstrapPolicy::FirstConnection)
            }
            "startup" => Ok(BootstrapPolicy::Startup),
            other => Err(format!("unknown bootstrap policy '{}'", other)),
        }
    }
}

/// Frame received from an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame.
    Text(String),
    /// Binary frame of the given length.
    Binary(usize),
}

/// Requests from connection tasks to the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    /// A session completed its handshake.
    Connect {
        /// Session id.
        id: ObserverId,
        /// Outbound queue of the session.
        tx: mpsc::Sender<ServerMessage>,
    },
    /// A session closed.
    Disconnect {
        /// Session id.
        id: ObserverId,
    },
    /// A session sent a frame.
    Inbound {
        /// Session id.
        id: ObserverId,
        /// The frame.
        frame: InboundFrame,
    },
    /// Read the current round snapshot.
    Snapshot {
        /// Reply channel.
        reply: oneshot::Sender<RoundSnapshot>,
    },
}

/// Round engine plus the sessions observing it.
pub struct ConnectionManager {
    engine: RoundEngine,
    hub: BroadcastHub,
    policy: BootstrapPolicy,
    publish_commitment: bool,
}

impl ConnectionManager {
    /// Wrap an idle engine.
    pub fn new(engine: RoundEngine, policy: BootstrapPolicy, publish_commitment: bool) -> Self {
        Self {
            engine,
            hub: BroadcastHub::new(),
            policy,
            publish_commitment,
        }
    }

    /// Bootstrap policy in effect.
    pub fn policy(&self) -> BootstrapPolicy {
        self.policy
    }

    /// Current phase of the round.
    pub fn phase(&self) -> RoundPhase {
        self.engine.phase()
    }

    /// Current round snapshot.
    pub fn snapshot(&self) -> RoundSnapshot {
        self.engine.snapshot()
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.hub.len()
    }

    /// Start the round cycle if the policy says so.
    pub fn on_startup(&mut self, now: Instant) {
        if self.policy == BootstrapPolicy::Startup {
            info!("Starting round cycle at startup");
            let events = self.engine.start(now);
            self.publish(&events);
        }
    }

    /// Register a session, send it the snapshot, and bootstrap if it is the
    /// first one while idle.
    pub fn connect(&mut self, id: ObserverId, tx: mpsc::Sender<ServerMessage>, now: Instant) {
        self.hub.register(id, tx);
        let snapshot = self.engine.snapshot();
        self.hub
            .send_to(&id, ServerMessage::connected(&snapshot, self.publish_commitment));
        info!(
            "Observer {} connected ({} online, round {} {:?})",
            id,
            self.hub.len(),
            snapshot.round_id,
            snapshot.phase
        );

        if self.policy == BootstrapPolicy::FirstConnection
            && self.hub.len() == 1
            && self.engine.phase() == RoundPhase::Idle
        {
            let events = self.engine.start(now);
            self.publish(&events);
        }
    }

    /// Remove a session. The round keeps running with no observers.
    pub fn disconnect(&mut self, id: &ObserverId) {
        if self.hub.deregister(id) {
            info!("Observer {} disconnected ({} online)", id, self.hub.len());
        } else {
            debug!("Disconnect for unknown observer {}", id);
        }
    }

    /// Decode one inbound frame. Failures are answered with an `error` event
    /// to the sender only.
    pub fn handle_inbound(
        &mut self,
        id: &ObserverId,
        frame: InboundFrame,
    ) -> Result<ValidBet, ProtocolError> {
        let result = match frame {
            InboundFrame::Text(text) => ClientMessage::from_json(&text).and_then(|msg| match msg {
                ClientMessage::PlaceBet(bet) => bet.validate(),
            }),
            InboundFrame::Binary(_) => Err(ProtocolError::Binary),
        };

        match &result {
            Ok(bet) => info!(
                "Bet from {} by user {}: {} (auto cash-out {:?}), not settled",
                id, bet.user_id, bet.amount, bet.auto_cash_out
            ),
            Err(e) => {
                debug!("Rejected message from {}: {}", id, e);
                self.hub.send_to(id, ServerMessage::error(e.client_message()));
            }
        }
        result
    }

    /// When [`advance`](Self::advance) must next be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.engine.next_deadline()
    }

    /// Fire due timers and broadcast the resulting events.
    pub fn advance(&mut self, now: Instant) {
        let events = self.engine.advance(now);
        self.publish(&events);
    }

    /// Stop the engine and close every session queue.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
        info!("Closing {} observer sessions", self.hub.len());
        self.hub.clear();
    }

    /// Apply one command from a connection task.
    pub fn handle_command(&mut self, command: EngineCommand, now: Instant) {
        match command {
            EngineCommand::Connect { id, tx } => self.connect(id, tx, now),
            EngineCommand::Disconnect { id } => self.disconnect(&id),
            EngineCommand::Inbound { id, frame } => {
                let _ = self.handle_inbound(&id, frame);
            }
            EngineCommand::Snapshot { reply } => {
                if reply.send(self.engine.snapshot()).is_err() {
                    debug!("Snapshot requester went away");
                }
            }
        }
    }

    fn publish(&mut self, events: &[RoundEvent]) {
        for event in events {
            let msg = ServerMessage::from_round_event(event, self.publish_commitment);
            let report = self.hub.broadcast(&msg);
            if report.skipped > 0 {
                debug!(
                    "{} of round {} skipped {} observers",
                    event.name(),
                    event.round_id(),
                    report.skipped
                );
            }
        }
    }
}
