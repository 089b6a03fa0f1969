use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use thiserror::Error;

use crate::core::Exchange;
use crate::routes::RouteIndex;
use crate::store::SessionSnapshot;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt snapshot {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("persistence worker unavailable")]
    WorkerGone,
}

/// Durable key/value transport for session snapshots. Values are JSON text.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn put(&self, key: &str, value: &str) -> Result<(), PersistError>;
    fn remove(&self, key: &str) -> Result<(), PersistError>;
}

pub fn calls_key(session: &str) -> String {
    format!("session_{session}_calls")
}

pub fn map_key(session: &str) -> String {
    format!("session_{session}_map")
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistError> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
            && !key.starts_with('.');
        if !valid {
            return Err(PersistError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Reads both snapshot keys of a session. `Ok(None)` when nothing was saved.
pub fn load_snapshot(
    store: &dyn SnapshotStore,
    session: &str,
) -> Result<Option<SessionSnapshot>, PersistError> {
    let calls_key = calls_key(session);
    let map_key = map_key(session);
    let calls = store.get(&calls_key)?;
    let map = store.get(&map_key)?;
    if calls.is_none() && map.is_none() {
        return Ok(None);
    }

    let exchanges: Vec<Exchange> = match calls {
        Some(text) => serde_json::from_str(&text).map_err(|source| PersistError::Decode {
            key: calls_key,
            source,
        })?,
        None => Vec::new(),
    };
    let routes: RouteIndex = match map {
        Some(text) => serde_json::from_str(&text).map_err(|source| PersistError::Decode {
            key: map_key,
            source,
        })?,
        None => RouteIndex::new(),
    };
    Ok(Some(SessionSnapshot { exchanges, routes }))
}

/// Encodes a snapshot into its `(key, json)` writes.
pub fn encode_snapshot(
    session: &str,
    snapshot: &SessionSnapshot,
) -> Result<[(String, String); 2], PersistError> {
    let calls_key = calls_key(session);
    let map_key = map_key(session);
    let calls = serde_json::to_string(&snapshot.exchanges).map_err(|source| PersistError::Encode {
        key: calls_key.clone(),
        source,
    })?;
    let map = serde_json::to_string(&snapshot.routes).map_err(|source| PersistError::Encode {
        key: map_key.clone(),
        source,
    })?;
    Ok([(calls_key, calls), (map_key, map)])
}

enum WriteOp {
    Put { key: String, value: String },
    Remove { key: String },
    Flush(Sender<()>),
}

/// Serializes snapshot writes onto one background thread.
///
/// Operations are applied in the order they were enqueued. Dropping the
/// handle drains the queue and joins the worker.
pub struct WriteBehind {
    tx: Option<Sender<WriteOp>>,
    worker: Option<JoinHandle<()>>,
}

impl WriteBehind {
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Result<Self, PersistError> {
        let (tx, rx) = unbounded::<WriteOp>();
        let worker = thread::Builder::new()
            .name("apiwatch-persist".to_string())
            .spawn(move || worker_loop(rx, store))
            .map_err(|source| PersistError::Io {
                path: PathBuf::from("<persist worker>"),
                source,
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn put(&self, key: String, value: String) {
        self.send(WriteOp::Put { key, value });
    }

    pub fn remove(&self, key: String) {
        self.send(WriteOp::Remove { key });
    }

    /// Blocks until every write enqueued before this call has been applied.
    pub fn flush(&self) -> Result<(), PersistError> {
        let (done_tx, done_rx) = bounded(1);
        let tx = self.tx.as_ref().ok_or(PersistError::WorkerGone)?;
        tx.send(WriteOp::Flush(done_tx))
            .map_err(|_| PersistError::WorkerGone)?;
        done_rx.recv().map_err(|_| PersistError::WorkerGone)
    }

    fn send(&self, op: WriteOp) {
        let sent = self.tx.as_ref().is_some_and(|tx| tx.send(op).is_ok());
        if !sent {
            tracing::warn!("persistence worker unavailable; snapshot write dropped");
        }
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("persistence worker panicked");
            }
        }
    }
}

fn worker_loop(rx: Receiver<WriteOp>, store: Arc<dyn SnapshotStore>) {
    for op in rx {
        match op {
            WriteOp::Put { key, value } => {
                if let Err(err) = store.put(&key, &value) {
                    tracing::warn!(key = %key, error = %err, "snapshot write failed");
                } else {
                    tracing::trace!(key = %key, bytes = value.len(), "snapshot written");
                }
            }
            WriteOp::Remove { key } => {
                if let Err(err) = store.remove(&key) {
                    tracing::warn!(key = %key, error = %err, "snapshot delete failed");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_dir() -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let n = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "apiwatch-persist-{}-{}",
            std::process::id(),
            n
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn file_store_round_trips_and_removes() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        assert_eq!(store.get("session_a_calls").expect("get"), None);

        store.put("session_a_calls", "[]").expect("put");
        assert_eq!(store.get("session_a_calls").expect("get").as_deref(), Some("[]"));
        assert!(dir.join("session_a_calls.json").exists());
        assert!(!dir.join("session_a_calls.json.tmp").exists());

        store.remove("session_a_calls").expect("remove");
        store.remove("session_a_calls").expect("remove twice");
        assert_eq!(store.get("session_a_calls").expect("get"), None);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let store = FileStore::new(temp_dir());
        for key in ["../etc", "a/b", "", ".hidden"] {
            assert!(
                matches!(store.put(key, "{}"), Err(PersistError::InvalidKey(_))),
                "key={key:?}"
            );
        }
    }

    #[test]
    fn corrupt_snapshot_is_a_decode_error() {
        let store = MemoryStore::new();
        store.put(&calls_key("s1"), "{not json").expect("put");
        let err = load_snapshot(&store, "s1").expect_err("corrupt");
        assert!(matches!(err, PersistError::Decode { .. }));
        assert_eq!(load_snapshot(&store, "other").expect("load"), None);
    }

    #[test]
    fn write_behind_applies_in_order_before_flush_returns() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::spawn(store.clone()).expect("spawn");
        writer.put("k".to_string(), "1".to_string());
        writer.put("k".to_string(), "2".to_string());
        writer.put("gone".to_string(), "x".to_string());
        writer.remove("gone".to_string());
        writer.flush().expect("flush");

        assert_eq!(store.get("k").expect("get").as_deref(), Some("2"));
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn drop_drains_pending_writes() {
        let store = Arc::new(MemoryStore::new());
        {
            let writer = WriteBehind::spawn(store.clone()).expect("spawn");
            for n in 0..50 {
                writer.put(format!("k{n}"), n.to_string());
            }
        }
        assert_eq!(store.keys().len(), 50);
    }
}
