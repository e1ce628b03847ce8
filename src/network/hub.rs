//! Broadcast Hub
//!
//! Registry of live observer sessions. Fan-out never blocks: a session whose
//! outbound queue is full or closed misses the message and the others still
//! get it.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::network::protocol::ServerMessage;

/// Unique observer session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered session.
#[derive(Debug)]
struct ObserverSession {
    tx: mpsc::Sender<ServerMessage>,
    dropped: u64,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the message was queued for.
    pub delivered: usize,
    /// Sessions that were full or already closed.
    pub skipped: usize,
}

/// Holds every live session.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    sessions: BTreeMap<ObserverId, ObserverSession>,
}

impl BroadcastHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Replaces any session already under `id`.
    pub fn register(&mut self, id: ObserverId, tx: mpsc::Sender<ServerMessage>) {
        if self.sessions.insert(id, ObserverSession { tx, dropped: 0 }).is_some() {
            debug!("Observer {} re-registered", id);
        }
    }

    /// Remove a session. Returns false if it was not registered.
    pub fn deregister(&mut self, id: &ObserverId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ObserverId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Queue `msg` for every session.
    pub fn broadcast(&mut self, msg: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (id, session) in self.sessions.iter_mut() {
            match session.tx.try_send(msg.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    session.dropped += 1;
                    report.skipped += 1;
                    trace!("Observer {} queue full, dropped {} so far", id, session.dropped);
                }
                Err(TrySendError::Closed(_)) => {
                    report.skipped += 1;
                    trace!("Observer {} closed, skipping", id);
                }
            }
        }
        report
    }

    /// Queue `msg` for one session. Returns false if it could not be queued.
    pub fn send_to(&mut self, id: &ObserverId, msg: ServerMessage) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => match session.tx.try_send(msg) {
                Ok(()) => true,
                Err(_) => {
                    session.dropped += 1;
                    false
                }
            },
            None => false,
        }
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session, closing their queues.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
