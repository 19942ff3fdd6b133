use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::LedgerError;
use crate::types::UserId;

#[derive(Debug, Clone)]
struct Session {
    token: u64,
    game: String,
    deadline: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    pub user_id: UserId,
    pub game: String,
}

/// In-progress games keyed by user. A user has at most one live session;
/// a second start while one is live is rejected rather than queued.
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<Mutex<HashMap<UserId, Session>>>,
    next_token: Arc<AtomicU64>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        // Entries are replaced whole, so a poisoned table is still consistent
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(
        &self,
        user_id: UserId,
        game: &str,
        timeout: Duration,
    ) -> Result<SessionGuard, LedgerError> {
        let now = Instant::now();
        let mut sessions = self.lock();

        if let Some(existing) = sessions.get(&user_id) {
            if existing.deadline > now {
                return Err(LedgerError::SessionActive {
                    user_id: user_id.0,
                    game: existing.game.clone(),
                });
            }
            tracing::info!(
                "Replacing expired {} session for user {}",
                existing.game,
                user_id
            );
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        sessions.insert(
            user_id,
            Session {
                token,
                game: game.to_string(),
                deadline: now + timeout,
            },
        );

        Ok(SessionGuard {
            table: self.clone(),
            user_id,
            token,
        })
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.lock()
            .get(&user_id)
            .is_some_and(|session| session.deadline > Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every session past its deadline and hands them back to the
    /// owner. An expired round is forfeited.
    pub fn reap_expired(&self, now: Instant) -> Vec<ExpiredSession> {
        let mut sessions = self.lock();
        let mut expired = Vec::new();
        sessions.retain(|user_id, session| {
            if session.deadline > now {
                return true;
            }
            expired.push(ExpiredSession {
                user_id: *user_id,
                game: session.game.clone(),
            });
            false
        });
        expired
    }

    fn finish(&self, user_id: UserId, token: u64) {
        let mut sessions = self.lock();
        // Only remove our own session, not one that replaced it after expiry
        if sessions.get(&user_id).is_some_and(|s| s.token == token) {
            sessions.remove(&user_id);
        }
    }
}

/// Ends the session when dropped, on success and error paths alike.
#[must_use]
pub struct SessionGuard {
    table: SessionTable,
    user_id: UserId,
    token: u64,
}

impl SessionGuard {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.finish(self.user_id, self.token);
    }
}
