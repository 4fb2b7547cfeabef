//! Admission Token Store
//!
//! Short-lived, single-use tokens handed out at login and redeemed exactly
//! once when a WebSocket connection is admitted. Verification consumes the
//! token so a captured value cannot be replayed; a background sweep evicts
//! entries that expire unredeemed, bounding memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::trace;
use uuid::Uuid;

struct TokenEntry {
    subject: String,
    issued_at: Instant,
}

/// Time-windowed store of issued admission tokens.
///
/// All operations are synchronous and safe under concurrent callers; the
/// inner mutex is never held across an await point.
pub struct TokenStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, TokenEntry>>,
}

impl TokenStore {
    /// Create a store whose tokens expire `ttl` after issue.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token bound to `subject`.
    pub fn issue(&self, subject: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.entries.lock().insert(
            token.clone(),
            TokenEntry {
                subject: subject.to_string(),
                issued_at: Instant::now(),
            },
        );
        token
    }

    /// Redeem a token, returning its subject.
    ///
    /// Succeeds only for a known token younger than the TTL, and removes the
    /// entry atomically with the check, so a token verifies at most once no
    /// matter how many callers race on it. Unknown and expired tokens report
    /// `None`; an expired entry seen here is dropped as a side effect.
    pub fn verify(&self, token: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.remove(token) {
            Some(entry) if entry.issued_at.elapsed() < self.ttl => Some(entry.subject),
            _ => None,
        }
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.issued_at.elapsed() < ttl);
        before - entries.len()
    }

    /// Number of live (possibly expired but unswept) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Spawn the periodic sweep task for `store`.
    ///
    /// The task runs until aborted; the owning lobby aborts it on teardown.
    pub fn spawn_sweeper(store: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(period);
            loop {
                tick.tick().await;
                let removed = store.sweep();
                if removed > 0 {
                    trace!(removed, "swept expired admission tokens");
                }
            }
        })
    }
}
