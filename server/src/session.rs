//! Session bookkeeping for one world: which connections are bound to
//! which players, plus the buffered movement intent for each.
//!
//! Intents are a last-write-wins slot, not a queue: only the most
//! recent target received before a tick is honored, and it keeps
//! applying until replaced. The registry records activity timestamps
//! for diagnostics only — liveness policy (heartbeats, timeouts)
//! belongs to the transport layer.

use log::info;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub player_id: u64,
    /// Latest movement target; overwritten on every update.
    pub intent: Option<(f32, f32)>,
    /// Last intent update, for diagnostics. Never used to drop sessions.
    pub last_activity: Instant,
    /// Set when the bound player was absorbed. The session stays open
    /// and may rejoin fresh, but its intents no longer apply.
    pub eliminated: bool,
}

pub struct SessionRegistry {
    sessions: HashMap<u64, Session>,
    next_session_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
        }
    }

    /// Binds a new session to a freshly spawned player.
    pub fn bind(&mut self, player_id: u64) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(
            id,
            Session {
                id,
                player_id,
                intent: None,
                last_activity: Instant::now(),
                eliminated: false,
            },
        );
        info!("session {} bound to player {}", id, player_id);
        id
    }

    /// Unbinds a session, returning the player id that must be removed
    /// from the world in the same tick boundary. Idempotent.
    pub fn release(&mut self, session_id: u64) -> Option<u64> {
        let session = self.sessions.remove(&session_id)?;
        info!("session {} released", session_id);
        Some(session.player_id)
    }

    /// Stores the latest movement target for a session (last-write-wins).
    /// Returns false when the session is unknown or eliminated, in which
    /// case the intent is ignored.
    pub fn set_intent(&mut self, session_id: u64, x: f32, y: f32) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) if !session.eliminated => {
                session.intent = Some((x, y));
                session.last_activity = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Current intents keyed by player id, read once per tick by the
    /// simulation. Targets persist across ticks until replaced.
    pub fn intents(&self) -> HashMap<u64, (f32, f32)> {
        self.sessions
            .values()
            .filter(|s| !s.eliminated)
            .filter_map(|s| s.intent.map(|target| (s.player_id, target)))
            .collect()
    }

    /// Flags the session bound to an absorbed player. Further intents
    /// from it are dropped; the connection itself is left alone.
    pub fn mark_eliminated(&mut self, player_id: u64) {
        for session in self.sessions.values_mut() {
            if session.player_id == player_id {
                session.eliminated = true;
                session.intent = None;
                info!("session {} flagged eliminated", session.id);
            }
        }
    }

    pub fn get(&self, session_id: u64) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
