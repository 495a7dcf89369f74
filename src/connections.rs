//! Connection admission and lifecycle tracking.
//!
//! The registry holds an id-keyed set of live connections behind one mutex;
//! the check-and-insert at admission time is the only serialized step in the
//! request path. Membership is a RAII guard owned by the serving task, so an
//! entry disappears as soon as the task releases it. The registry never owns
//! a connection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

#[derive(Debug)]
struct RegistryInner {
    live: HashSet<u64>,
    next_id: u64,
}

/// Process-wide live-connection tracker with an admission ceiling.
/// `live <= limit` is enforced at admission, never retroactively.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    limit: usize,
}

impl ConnectionRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                live: HashSet::new(),
                next_id: 0,
            })),
            limit,
        }
    }

    /// Admit one connection. Returns `None` when the ceiling is reached;
    /// the caller must refuse the connection without queueing it.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        let mut inner = self.inner.lock().expect("connection registry poisoned");
        if inner.live.len() >= self.limit {
            return None;
        }
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.live.insert(id);
        Some(ConnectionGuard {
            id,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .expect("connection registry poisoned")
            .live
            .len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Registry membership for one admitted connection. Dropping the guard
/// removes the entry, which is the lifecycle hook that keeps the registry
/// non-owning.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    inner: Arc<Mutex<RegistryInner>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.live.remove(&self.id);
        }
    }
}

/// Periodic housekeeping: logs live-connection count and uptime on a fixed
/// interval. Advisory only; correctness never depends on it. The task ends
/// when the returned handle is aborted at shutdown.
pub fn spawn_housekeeping(
    registry: ConnectionRegistry,
    interval: Duration,
    started: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so logs start one interval in.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let active = registry.active();
            if active >= registry.limit() {
                tracing::warn!(active, limit = registry.limit(), "connection ceiling reached");
            }
            tracing::info!(
                active_connections = active,
                uptime_secs = started.elapsed().as_secs(),
                "housekeeping pass"
            );
        }
    })
}
