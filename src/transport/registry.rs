//! # Session Registry
//!
//! In-memory lookup of live connections by `SessionId`, for carriers that do not
//! hold one socket per session (HTTP long-poll keys sessions by cookie).
//!
//! ## Features
//! - **Thread-safe**: `Arc<Mutex<>>` around the table, cheap to clone
//! - **Idle expiry**: entries unused for longer than the TTL are evicted
//! - **Memory-bounded**: inserting past capacity evicts the least recently used entry
//!
//! Evicted and removed connections are closed, which aborts their open batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::protocol::connection::Connection;
use crate::protocol::session::SessionId;

struct RegistryEntry {
    connection: Arc<Connection>,
    last_seen: Instant,
}

impl RegistryEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() > ttl
    }
}

struct RegistryInner {
    sessions: HashMap<SessionId, RegistryEntry>,
    total_inserts: u64,
}

#[derive(Clone)]
pub struct SessionRegistry {
    max_entries: usize,
    ttl: Duration,
    inner: Arc<Mutex<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            inner: Arc::new(Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                total_inserts: 0,
            })),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.max_sessions, config.session_ttl)
    }

    /// Register `connection` under its session id, replacing any previous entry
    pub async fn insert(&self, connection: Arc<Connection>) {
        let mut inner = self.inner.lock().await;
        self.evict_expired(&mut inner);

        let id = connection.session_id().clone();
        let entry = RegistryEntry {
            connection: Arc::clone(&connection),
            last_seen: Instant::now(),
        };
        if let Some(previous) = inner.sessions.insert(id, entry) {
            if !Arc::ptr_eq(&previous.connection, &connection) {
                previous.connection.close();
            }
        }
        inner.total_inserts += 1;

        if inner.sessions.len() > self.max_entries {
            self.evict_oldest(&mut inner);
        }
        trace!(session_count = inner.sessions.len(), "Session registered");
    }

    /// Look up a live session and mark it as used
    pub async fn get(&self, id: &SessionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.lock().await;
        self.lookup(&mut inner, id)
    }

    /// Return the live session `id`, or register the one built by `make`.
    ///
    /// Lookup and insert happen under one lock, so concurrent first uses of
    /// an id share a single connection.
    pub async fn get_or_insert_with<F>(&self, id: &SessionId, make: F) -> Arc<Connection>
    where
        F: FnOnce() -> Arc<Connection>,
    {
        let mut inner = self.inner.lock().await;
        if let Some(connection) = self.lookup(&mut inner, id) {
            return connection;
        }

        self.evict_expired(&mut inner);
        if inner.sessions.len() >= self.max_entries {
            self.evict_oldest(&mut inner);
        }

        let connection = make();
        inner.sessions.insert(
            id.clone(),
            RegistryEntry {
                connection: Arc::clone(&connection),
                last_seen: Instant::now(),
            },
        );
        inner.total_inserts += 1;
        trace!(session = %id, session_count = inner.sessions.len(), "Session registered");
        connection
    }

    fn lookup(&self, inner: &mut RegistryInner, id: &SessionId) -> Option<Arc<Connection>> {
        match inner.sessions.get_mut(id) {
            Some(entry) if !entry.is_expired(self.ttl) && !entry.connection.is_closed() => {
                entry.last_seen = Instant::now();
                return Some(Arc::clone(&entry.connection));
            }
            Some(_) => {}
            None => return None,
        }

        if let Some(stale) = inner.sessions.remove(id) {
            stale.connection.close();
            trace!(session = %id, "Stale session dropped");
        }
        None
    }

    /// Remove and close a session
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Connection>> {
        let removed = self.inner.lock().await.sessions.remove(id);
        removed.map(|entry| {
            entry.connection.close();
            entry.connection
        })
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let count = inner.sessions.len();
        for (_, entry) in inner.sessions.drain() {
            entry.connection.close();
        }
        debug!(cleared_count = count, "Session registry cleared");
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        let expired_count = inner
            .sessions
            .values()
            .filter(|e| e.is_expired(self.ttl))
            .count();

        RegistryStats {
            total_entries: inner.sessions.len(),
            max_entries: self.max_entries,
            expired_count,
            total_inserts: inner.total_inserts,
        }
    }

    fn evict_expired(&self, inner: &mut RegistryInner) {
        let before = inner.sessions.len();
        let ttl = self.ttl;
        inner.sessions.retain(|_, entry| {
            let keep = !entry.is_expired(ttl);
            if !keep {
                entry.connection.close();
            }
            keep
        });
        let after = inner.sessions.len();

        if before != after {
            debug!(
                removed_count = before - after,
                remaining_count = after,
                "Idle sessions evicted"
            );
        }
    }

    fn evict_oldest(&self, inner: &mut RegistryInner) {
        if let Some(oldest) = inner
            .sessions
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(k, _)| k.clone())
        {
            if let Some(entry) = inner.sessions.remove(&oldest) {
                entry.connection.close();
            }
            debug!(session = %oldest, "Least recently used session evicted");
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    pub total_entries: usize,
    pub max_entries: usize,
    /// Expired but not yet evicted
    pub expired_count: usize,
    pub total_inserts: u64,
}
