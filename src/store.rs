use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::normalize::EventRecord;

/// Unified retention cap for both backends.
pub const DEFAULT_MAX_EVENTS: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("event file is not valid json: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage settings resolved once at startup and injected into the store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path of the persistent event file. `None` means memory-only.
    pub data_file: Option<PathBuf>,
    pub max_events: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: None,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

/// An [`EventRecord`] with its store-assigned id. Ids are strictly
/// increasing per store instance and keep counting after a clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: u64,
    #[serde(flatten)]
    pub record: EventRecord,
}

/// The three operations every backend serves. Callers never learn which
/// backend is active; [`EventStore`] hides the switch.
trait EventBackend: Send + Sync {
    fn append(&self, record: EventRecord) -> Result<StoredEvent, StoreError>;
    /// Newest first.
    fn list(&self) -> Result<Vec<StoredEvent>, StoreError>;
    /// Returns the number of events removed.
    fn clear(&self) -> Result<usize, StoreError>;
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// In-memory fallback backend
// ---------------------------------------------------------------------------

struct MemoryState {
    events: VecDeque<StoredEvent>,
    next_id: u64,
}

struct MemoryBackend {
    max_events: usize,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    fn new(max_events: usize) -> Self {
        Self {
            max_events,
            state: Mutex::new(MemoryState {
                events: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // a poisoned lock only means another request panicked mid-append;
        // the data itself is still a valid queue
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl EventBackend for MemoryBackend {
    fn append(&self, record: EventRecord) -> Result<StoredEvent, StoreError> {
        let mut state = self.lock();
        let event = StoredEvent {
            id: state.next_id,
            record,
        };
        state.next_id += 1;
        state.events.push_back(event.clone());
        while state.events.len() > self.max_events {
            state.events.pop_front();
        }
        Ok(event)
    }

    fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.lock().events.iter().rev().cloned().collect())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let removed = state.events.len();
        state.events.clear();
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Persistent file backend
// ---------------------------------------------------------------------------

/// On-disk document wrapper. `doc_id` and `created_at` are internal; only
/// the flattened event crosses the store boundary.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDoc {
    doc_id: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    event: StoredEvent,
}

struct FileBackend {
    path: PathBuf,
    max_events: usize,
    /// Next id to assign; also serializes file access.
    next_id: Mutex<u64>,
}

impl FileBackend {
    /// Opens the event file, creating it if absent. Fails when the location
    /// is unreadable or unwritable, which routes the store to the fallback.
    fn open(path: &Path, max_events: usize) -> Result<Self, StoreError> {
        let next_id = match fs::read(path) {
            Ok(bytes) => {
                let docs = parse_docs(&bytes)?;
                docs.iter().map(|doc| doc.event.id).max().unwrap_or(0) + 1
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::write(path, b"[]")?;
                1
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            max_events,
            next_id: Mutex::new(next_id),
        })
    }

    fn load(&self) -> Result<Vec<StoredDoc>, StoreError> {
        parse_docs(&fs::read(&self.path)?)
    }

    fn save(&self, docs: &[StoredDoc]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(docs)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn parse_docs(bytes: &[u8]) -> Result<Vec<StoredDoc>, StoreError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(bytes)?)
}

impl EventBackend for FileBackend {
    fn append(&self, record: EventRecord) -> Result<StoredEvent, StoreError> {
        let mut next_id = self
            .next_id
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut docs = self.load()?;

        let created_at = Utc::now();
        let event = StoredEvent {
            id: *next_id,
            record,
        };
        docs.push(StoredDoc {
            doc_id: format!("{:x}-{:08x}", created_at.timestamp_millis(), event.id),
            created_at,
            event: event.clone(),
        });

        // retention: drop oldest documents until within the cap
        docs.sort_by_key(|doc| doc.created_at);
        while docs.len() > self.max_events {
            docs.remove(0);
        }

        self.save(&docs)?;
        *next_id += 1;
        Ok(event)
    }

    fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let mut docs = self.load()?;
        docs.sort_by_key(|doc| doc.created_at);
        Ok(docs.into_iter().rev().map(|doc| doc.event).collect())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let _next_id = self
            .next_id
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let removed = self.load()?.len();
        self.save(&[])?;
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ---------------------------------------------------------------------------
// Fallback-switching store
// ---------------------------------------------------------------------------

/// Bounded event store with a persistent primary backend and an in-memory
/// fallback.
///
/// The file backend is tried once at startup; if it cannot be opened, or any
/// operation against it later fails, the store logs the failure and serves
/// from memory for the rest of the process lifetime. Errors only escape this
/// boundary when the fallback itself fails.
pub struct EventStore {
    primary: Option<FileBackend>,
    fallback: MemoryBackend,
    degraded: AtomicBool,
}

impl EventStore {
    pub fn open(config: &StorageConfig) -> Self {
        let primary = config.data_file.as_deref().and_then(|path| {
            match FileBackend::open(path, config.max_events) {
                Ok(backend) => {
                    info!("event file store ready at {}", path.display());
                    Some(backend)
                }
                Err(err) => {
                    warn!(
                        "event file store unavailable ({err}), serving from memory"
                    );
                    None
                }
            }
        });

        Self {
            primary,
            fallback: MemoryBackend::new(config.max_events),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn append(&self, record: EventRecord) -> Result<StoredEvent, StoreError> {
        self.run(|backend| backend.append(record.clone()))
    }

    pub fn list(&self) -> Result<Vec<StoredEvent>, StoreError> {
        self.run(|backend| backend.list())
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.run(|backend| backend.clear())
    }

    /// Name of the backend currently serving operations.
    pub fn backend_name(&self) -> &'static str {
        match &self.primary {
            Some(primary) if !self.degraded.load(Ordering::Relaxed) => primary.name(),
            _ => self.fallback.name(),
        }
    }

    fn run<T>(
        &self,
        op: impl Fn(&dyn EventBackend) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if let Some(primary) = &self.primary {
            if !self.degraded.load(Ordering::Relaxed) {
                match op(primary) {
                    Ok(value) => return Ok(value),
                    Err(err) => {
                        error!(
                            "{} backend failed ({err}), switching to in-memory fallback",
                            primary.name()
                        );
                        self.degraded.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        op(&self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::EventKind;

    fn push_record(branch: &str) -> EventRecord {
        EventRecord {
            kind: EventKind::Push {
                branch: branch.to_string(),
            },
            message: format!("\"octocat\" pushed to \"{branch}\" on 1st April 2021 - 9:30 PM UTC"),
            author: "octocat".to_string(),
            repository: "hello-world".to_string(),
            timestamp: "1st April 2021 - 9:30 PM UTC".to_string(),
            raw_timestamp: "2021-04-01T21:30:00Z".to_string(),
        }
    }

    fn memory_store(max_events: usize) -> EventStore {
        EventStore::open(&StorageConfig {
            data_file: None,
            max_events,
        })
    }

    fn file_config(dir: &tempfile::TempDir, max_events: usize) -> StorageConfig {
        StorageConfig {
            data_file: Some(dir.path().join("events.json")),
            max_events,
        }
    }

    #[test]
    fn list_returns_newest_first_with_increasing_ids() {
        let store = memory_store(100);
        for branch in ["one", "two", "three"] {
            store.append(push_record(branch)).unwrap();
        }

        let events = store.list().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, 3);
        assert_eq!(events[1].id, 2);
        assert_eq!(events[2].id, 1);
        assert_eq!(
            events[0].record.kind,
            EventKind::Push {
                branch: "three".to_string()
            }
        );
    }

    #[test]
    fn retention_evicts_oldest() {
        let store = memory_store(3);
        for i in 0..5 {
            store.append(push_record(&format!("branch-{i}"))).unwrap();
        }

        let events = store.list().unwrap();
        assert_eq!(events.len(), 3);
        // ids 1 and 2 were evicted
        assert_eq!(
            events.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![5, 4, 3]
        );
    }

    #[test]
    fn clear_empties_and_ids_keep_counting() {
        let store = memory_store(100);
        store.append(push_record("main")).unwrap();
        store.append(push_record("dev")).unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());

        // ids continue the prior sequence after a clear
        let event = store.append(push_record("main")).unwrap();
        assert_eq!(event.id, 3);
    }

    #[test]
    fn clear_on_empty_store_removes_nothing() {
        let store = memory_store(100);
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, 100);

        {
            let store = EventStore::open(&config);
            assert_eq!(store.backend_name(), "file");
            store.append(push_record("main")).unwrap();
            store.append(push_record("dev")).unwrap();
        }

        let store = EventStore::open(&config);
        let events = store.list().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, 2);

        // id sequence resumes past what is on disk
        let event = store.append(push_record("next")).unwrap();
        assert_eq!(event.id, 3);
    }

    #[test]
    fn file_backend_enforces_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&file_config(&dir, 2));
        for i in 0..4 {
            store.append(push_record(&format!("branch-{i}"))).unwrap();
        }

        let events = store.list().unwrap();
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[test]
    fn internal_document_fields_stay_internal() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, 100);
        let store = EventStore::open(&config);
        let event = store.append(push_record("main")).unwrap();

        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("doc_id").is_none());
        assert!(value.get("created_at").is_none());

        // but they are present in the on-disk documents
        let raw = std::fs::read_to_string(config.data_file.unwrap()).unwrap();
        let docs: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(docs[0].get("doc_id").is_some());
        assert!(docs[0].get("created_at").is_some());
    }

    #[test]
    fn unopenable_data_file_falls_back_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            // parent directory does not exist, so the file cannot be created
            data_file: Some(dir.path().join("missing").join("events.json")),
            max_events: 100,
        };

        let store = EventStore::open(&config);
        assert_eq!(store.backend_name(), "memory");
        let event = store.append(push_record("main")).unwrap();
        assert_eq!(event.id, 1);
    }

    #[test]
    fn operation_failure_switches_to_fallback_silently() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, 100);
        let store = EventStore::open(&config);
        assert_eq!(store.backend_name(), "file");
        store.append(push_record("main")).unwrap();

        // the event file disappearing is a backend failure mid-flight
        std::fs::remove_file(config.data_file.as_ref().unwrap()).unwrap();

        let event = store.append(push_record("dev")).unwrap();
        assert_eq!(event.id, 1); // fallback assigns its own sequence
        assert_eq!(store.backend_name(), "memory");

        // once demoted, the store stays on the fallback
        std::fs::write(config.data_file.unwrap(), b"[]").unwrap();
        store.append(push_record("again")).unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_event_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, 100);
        let store = EventStore::open(&config);

        std::fs::write(config.data_file.unwrap(), b"not json").unwrap();

        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.backend_name(), "memory");
    }
}
