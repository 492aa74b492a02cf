// Process-wide identity registry.
//
// A record reserves a player name for the lifetime of its connection and
// carries two pieces of reconnect state:
//
// - a **token**, minted from a strictly increasing sequence every time a
//   transport is bound to the name. A session remembers the token it was
//   given and removes its record only through `remove_if_token`. When a
//   reconnect has rebound the name in the meantime, the stale session's
//   token no longer matches and the successor's record survives — without
//   this, a rapid reconnect ends with the old session evicting the new one.
// - a **pending-back flag**, set by the match task when the player asked to
//   return to lobby selection mid-match, consumed by the session afterwards.
//
// Compound operations (`reserve`, `register`) exist because check-then-add
// must be atomic; every method takes the one registry mutex exactly once.

use std::sync::{Mutex, PoisonError};

use log::{debug, info};

use crate::transport::ConnId;

/// Upper bound on simultaneous name reservations.
pub const REGISTRY_CAPACITY: usize = 256;

struct Record {
    name: String,
    conn: Option<ConnId>,
    token: u64,
    back_requested: bool,
}

struct Inner {
    records: Vec<Record>,
    /// Next token to mint; strictly increasing, never 0.
    next_token: u64,
}

/// Outcome of a fresh-login reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    Reserved { token: u64 },
    NameTaken,
    Full,
}

pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            inner: Mutex::new(Inner {
                records: Vec::new(),
                next_token: 1,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().records.iter().any(|r| r.name == name)
    }

    /// Reserve `name` for a new login and bind it to `conn`. Refused when the
    /// name is already reserved or the table is full.
    pub fn reserve(&self, name: &str, conn: ConnId) -> Reservation {
        let mut inner = self.lock();
        if inner.records.iter().any(|r| r.name == name) {
            return Reservation::NameTaken;
        }
        if inner.records.len() >= REGISTRY_CAPACITY {
            return Reservation::Full;
        }
        inner.records.push(Record {
            name: name.to_string(),
            conn: None,
            token: 0,
            back_requested: false,
        });
        let token = Self::bind_locked(&mut inner, name, conn);
        debug!("registry: reserved '{name}' for {conn} (token {token})");
        Reservation::Reserved { token }
    }

    /// Bind `conn` to `name`, creating the record if absent (reconnect
    /// paths). Returns the fresh token, or `None` when the table is full.
    pub fn register(&self, name: &str, conn: ConnId) -> Option<u64> {
        let mut inner = self.lock();
        if !inner.records.iter().any(|r| r.name == name) {
            if inner.records.len() >= REGISTRY_CAPACITY {
                return None;
            }
            inner.records.push(Record {
                name: name.to_string(),
                conn: None,
                token: 0,
                back_requested: false,
            });
        }
        let token = Self::bind_locked(&mut inner, name, conn);
        debug!("registry: bound '{name}' to {conn} (token {token})");
        Some(token)
    }

    /// The only place tokens are minted.
    fn bind_locked(inner: &mut Inner, name: &str, conn: ConnId) -> u64 {
        let token = inner.next_token;
        inner.next_token += 1;
        if let Some(record) = inner.records.iter_mut().find(|r| r.name == name) {
            record.conn = Some(conn);
            record.token = token;
        }
        token
    }

    /// Unconditional removal.
    pub fn remove(&self, name: &str) {
        self.lock().records.retain(|r| r.name != name);
    }

    /// Remove only when the record still carries `token`. Sessions exit
    /// through this so a reconnected successor is never unregistered.
    pub fn remove_if_token(&self, name: &str, token: u64) {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|r| r.name != name || r.token != token);
        if inner.records.len() < before {
            info!("registry: released '{name}'");
        } else {
            debug!("registry: kept '{name}' (token moved on)");
        }
    }

    /// Flag a pending back-to-lobby request. With `conn` given, the record's
    /// current transport must match; pass `None` to bypass the check.
    pub fn mark_back(&self, name: &str, conn: Option<ConnId>) {
        let mut inner = self.lock();
        if let Some(record) = inner.records.iter_mut().find(|r| r.name == name) {
            if conn.is_none() || record.conn == conn {
                record.back_requested = true;
            }
        }
    }

    /// Test-and-clear the pending back flag, with the same transport guard
    /// as `mark_back`.
    pub fn take_back(&self, name: &str, conn: Option<ConnId>) -> bool {
        let mut inner = self.lock();
        if let Some(record) = inner.records.iter_mut().find(|r| r.name == name) {
            if record.back_requested && (conn.is_none() || record.conn == conn) {
                record.back_requested = false;
                return true;
            }
        }
        false
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
