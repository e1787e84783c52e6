//! Session registry: maps session identifiers to held datasets.
//!
//! The identifier→session mapping is the only globally shared mutable
//! structure in the service. Expiry is enforced both lazily on access and by
//! a periodic sweep; either path skips sessions with a non-zero in-use count,
//! so eviction never destroys a session under an in-flight query. An explicit
//! delete removes the map entry immediately — a running query keeps the
//! underlying `Arc` alive until it finishes.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use csvq_common::errors::SessionError;
use csvq_common::id::SessionId;
use csvq_data::Dataset;

/// One stored session: an exclusively owned dataset plus metadata.
pub struct SessionEntry {
    pub dataset: Dataset,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    last_access: std::sync::RwLock<Instant>,
    in_use: AtomicUsize,
}

impl SessionEntry {
    fn touch(&self) {
        *self
            .last_access
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_access
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire) > 0
    }
}

/// Holds a session checked out for one orchestration run; releases the
/// in-use count on drop, even if the run is cancelled.
pub struct SessionHandle {
    entry: Arc<SessionEntry>,
}

impl Deref for SessionHandle {
    type Target = SessionEntry;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.entry.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Thread-safe session store with idle expiry.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<SessionEntry>>>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Store a dataset under a fresh session id.
    pub async fn create(&self, dataset: Dataset, filename: impl Into<String>) -> String {
        let id: String = SessionId::new().into();
        let entry = Arc::new(SessionEntry {
            dataset,
            filename: filename.into(),
            created_at: Utc::now(),
            last_access: std::sync::RwLock::new(Instant::now()),
            in_use: AtomicUsize::new(0),
        });
        self.sessions.write().await.insert(id.clone(), entry);
        info!(session_id = %id, "session created");
        id
    }

    /// Look up a session, refreshing its idle clock. An entry past its TTL
    /// is evicted here rather than waiting for the next sweep.
    pub async fn get(&self, id: &str) -> Result<Arc<SessionEntry>, SessionError> {
        let entry = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(SessionError::NotFound)?;

        if entry.idle() > self.ttl && !entry.in_use() {
            self.sessions.write().await.remove(id);
            debug!(session_id = %id, "session expired on access");
            return Err(SessionError::NotFound);
        }

        entry.touch();
        Ok(entry)
    }

    /// Look up a session and mark it in use for the duration of a query run.
    pub async fn checkout(&self, id: &str) -> Result<SessionHandle, SessionError> {
        let entry = self.get(id).await?;
        entry.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(SessionHandle { entry })
    }

    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(SessionError::NotFound)
    }

    /// Remove sessions idle past the TTL. Sessions held by an in-flight
    /// query are skipped; they are reaped once released.
    pub async fn sweep(&self) {
        let ttl = self.ttl;
        let mut map = self.sessions.write().await;
        map.retain(|id, entry| {
            let stale = !entry.in_use() && entry.idle() > ttl;
            if stale {
                info!(session_id = %id, "evicting idle session");
            }
            !stale
        });
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
