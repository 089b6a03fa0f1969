use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::{CaptureRecord, Exchange, SessionStats};
use crate::persist::{self, MemoryStore, PersistError, SnapshotStore, WriteBehind};
use crate::routes::{DEFAULT_DEDUP_WINDOW_MS, RouteIndex};
use crate::rules::{self, RuleOptions};
use crate::store::{DEFAULT_CAPACITY, DEFAULT_SLOW_CALL_MS, Session, SessionSnapshot};

/// Identifier of one inspected browsing context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = !s.is_empty()
            && s.len() <= 128
            && !s.starts_with('.')
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(format!(
                "invalid session id {s:?} (use letters, digits, '_', '-' or '.')"
            ))
        }
    }
}

impl TryFrom<String> for SessionId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a capture record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Trusted path without session affinity; routed to the focused session.
    Direct,
    /// Tagged with the context that produced it.
    Context(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Reload,
    SameDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("no session is being inspected")]
    NoActiveSession,
    #[error("session {0} is not the inspected session")]
    NotInspected(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub session: SessionId,
    pub findings: usize,
    pub stored: usize,
}

/// Focused session contents plus aggregate stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session: SessionId,
    pub exchanges: Vec<Exchange>,
    pub routes: RouteIndex,
    pub stats: SessionStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub capacity: usize,
    pub dedup_window_ms: u64,
    pub slow_call_ms: u64,
    pub rules: RuleOptions,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            slow_call_ms: DEFAULT_SLOW_CALL_MS,
            rules: RuleOptions::default(),
        }
    }
}

type SessionRef = Arc<Mutex<Session>>;

/// Owns every live session and keeps the persisted snapshots in step.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionRef>>,
    focused: RwLock<Option<SessionId>>,
    store: Arc<dyn SnapshotStore>,
    writer: WriteBehind,
    opts: ManagerOptions,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SnapshotStore>, opts: ManagerOptions) -> Result<Self, PersistError> {
        let writer = WriteBehind::spawn(store.clone())?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            focused: RwLock::new(None),
            store,
            writer,
            opts,
        })
    }

    pub fn in_memory(opts: ManagerOptions) -> Result<Self, PersistError> {
        Self::new(Arc::new(MemoryStore::new()), opts)
    }

    /// Makes `id` the inspected session, hydrating it on first sight.
    pub fn register(&self, id: &SessionId) {
        self.session(id);
        *self.focused.write() = Some(id.clone());
        tracing::debug!(session = %id, "session focused");
    }

    pub fn ingest(&self, record: CaptureRecord, source: Source) -> Result<Accepted, IngestError> {
        let id = self.route(source)?;

        let mut exchange = Exchange::from_capture(record, now_ms());
        exchange.findings = rules::evaluate_with(&exchange, &self.opts.rules);
        let findings = exchange.findings.len();

        let session = self.session(&id);
        let mut guard = session.lock();
        guard.append(exchange);
        let stored = guard.len();
        self.enqueue_snapshot(&id, &guard);
        drop(guard);

        tracing::debug!(session = %id, findings, stored, "exchange ingested");
        Ok(Accepted {
            session: id,
            findings,
            stored,
        })
    }

    /// Empties the session and deletes its persisted snapshot.
    pub fn clear(&self, id: &SessionId) {
        let existing = self.sessions.read().get(id).cloned();
        match existing {
            Some(session) => {
                let mut guard = session.lock();
                guard.reset();
                self.enqueue_remove(id);
            }
            None => self.enqueue_remove(id),
        }
        tracing::debug!(session = %id, "session cleared");
    }

    pub fn navigated(&self, id: &SessionId, navigation: Navigation) {
        match navigation {
            Navigation::Reload => self.clear(id),
            Navigation::SameDocument => {}
        }
    }

    /// Releases the session from memory. Its persisted snapshot is kept.
    pub fn close(&self, id: &SessionId) {
        self.sessions.write().remove(id);
        let mut focused = self.focused.write();
        if focused.as_ref() == Some(id) {
            *focused = None;
        }
        tracing::debug!(session = %id, "session closed");
    }

    pub fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let session = self.sessions.read().get(id).cloned()?;
        let guard = session.lock();
        Some(guard.snapshot())
    }

    pub fn view(&self) -> Option<SessionView> {
        let id = self.focused()?;
        let session = self.sessions.read().get(&id).cloned()?;
        let guard = session.lock();
        let snapshot = guard.snapshot();
        Some(SessionView {
            session: id,
            exchanges: snapshot.exchanges,
            routes: snapshot.routes,
            stats: guard.stats(self.opts.slow_call_ms),
        })
    }

    pub fn focused(&self) -> Option<SessionId> {
        self.focused.read().clone()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Waits for queued snapshot writes to land.
    pub fn flush(&self) -> Result<(), PersistError> {
        self.writer.flush()
    }

    fn route(&self, source: Source) -> Result<SessionId, IngestError> {
        let focused = self.focused.read();
        match source {
            Source::Direct => focused.clone().ok_or(IngestError::NoActiveSession),
            Source::Context(id) if focused.as_ref() == Some(&id) => Ok(id),
            Source::Context(id) => {
                tracing::debug!(session = %id, "capture from uninspected context dropped");
                Err(IngestError::NotInspected(id))
            }
        }
    }

    fn session(&self, id: &SessionId) -> SessionRef {
        if let Some(existing) = self.sessions.read().get(id) {
            return existing.clone();
        }
        let hydrated = self.hydrate(id);
        let mut sessions = self.sessions.write();
        sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(hydrated)))
            .clone()
    }

    /// Loads the persisted snapshot once every queued write for it has landed.
    fn hydrate(&self, id: &SessionId) -> Session {
        let (capacity, window) = (self.opts.capacity, self.opts.dedup_window_ms);
        if let Err(err) = self.writer.flush() {
            tracing::warn!(
                session = %id,
                error = %err,
                "pending writes not drained; starting empty"
            );
            return Session::new(capacity, window);
        }
        match persist::load_snapshot(self.store.as_ref(), id.as_str()) {
            Ok(Some(snapshot)) => {
                let session = Session::restore(snapshot, capacity, window);
                tracing::debug!(session = %id, exchanges = session.len(), "session hydrated");
                session
            }
            Ok(None) => Session::new(capacity, window),
            Err(err) => {
                tracing::warn!(session = %id, error = %err, "ignoring unreadable snapshot");
                Session::new(capacity, window)
            }
        }
    }

    fn enqueue_snapshot(&self, id: &SessionId, session: &Session) {
        match persist::encode_snapshot(id.as_str(), &session.snapshot()) {
            Ok(writes) => {
                for (key, value) in writes {
                    self.writer.put(key, value);
                }
            }
            Err(err) => tracing::warn!(session = %id, error = %err, "snapshot not persisted"),
        }
    }

    fn enqueue_remove(&self, id: &SessionId) {
        self.writer.remove(persist::calls_key(id.as_str()));
        self.writer.remove(persist::map_key(id.as_str()));
    }
}

fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}
