use crate::domain::models::TimerStateSnapshot;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TIMER_STATE_KEY: &str = "timer_state";

/// Device-local storage for the single timer snapshot. Implementations must
/// have finished writing when `save` returns.
pub trait TimerSnapshotStore: Send + Sync {
    fn save(&self, snapshot: &TimerStateSnapshot) -> Result<(), InfraError>;
    /// `Err(InfraError::PersistenceCorrupt)` when something was stored but
    /// cannot be read back as a valid snapshot.
    fn load(&self) -> Result<Option<TimerStateSnapshot>, InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

pub fn decode_snapshot(raw: &str) -> Result<TimerStateSnapshot, InfraError> {
    let snapshot = serde_json::from_str::<TimerStateSnapshot>(raw)
        .map_err(|error| InfraError::PersistenceCorrupt(format!("unreadable snapshot: {error}")))?;
    snapshot
        .validate()
        .map_err(InfraError::PersistenceCorrupt)?;
    Ok(snapshot)
}

#[derive(Debug, Clone)]
pub struct SqliteTimerSnapshotStore {
    db_path: PathBuf,
}

impl SqliteTimerSnapshotStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl TimerSnapshotStore for SqliteTimerSnapshotStore {
    fn save(&self, snapshot: &TimerStateSnapshot) -> Result<(), InfraError> {
        let payload = serde_json::to_string(snapshot)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![TIMER_STATE_KEY, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn load(&self) -> Result<Option<TimerStateSnapshot>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![TIMER_STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        raw.as_deref().map(decode_snapshot).transpose()
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM kv_store WHERE key = ?1",
            params![TIMER_STATE_KEY],
        )?;
        Ok(())
    }
}

/// Keeps the serialized form so corrupt payloads can be simulated.
#[derive(Debug, Default)]
pub struct InMemoryTimerSnapshotStore {
    payload: Mutex<Option<String>>,
}

impl InMemoryTimerSnapshotStore {
    pub fn with_raw_payload(raw: impl Into<String>) -> Self {
        Self {
            payload: Mutex::new(Some(raw.into())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, InfraError> {
        self.payload
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("snapshot lock poisoned: {error}")))
    }
}

impl TimerSnapshotStore for InMemoryTimerSnapshotStore {
    fn save(&self, snapshot: &TimerStateSnapshot) -> Result<(), InfraError> {
        let payload = serde_json::to_string(snapshot)?;
        *self.lock()? = Some(payload);
        Ok(())
    }

    fn load(&self) -> Result<Option<TimerStateSnapshot>, InfraError> {
        let payload = self.lock()?;
        payload.as_deref().map(decode_snapshot).transpose()
    }

    fn clear(&self) -> Result<(), InfraError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DurationConfig, TimerState};
    use crate::infrastructure::storage::initialize_database;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_snapshot() -> TimerStateSnapshot {
        let mut state = TimerState::idle(&DurationConfig::default());
        state
            .begin(
                crate::domain::models::TimerPhase::Focus,
                1_500,
                Some("prio-3".to_string()),
                Some("fs-3".to_string()),
            )
            .expect("begin focus");
        TimerStateSnapshot::new(state, fixed_time("2026-02-16T09:00:00Z"))
    }

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "focus-engine-snapshot-{}-{}.sqlite",
                std::process::id(),
                sequence
            ));
            initialize_database(&path).expect("initialize database");
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn sqlite_store_saves_loads_and_clears() {
        let db = TempDb::new();
        let store = SqliteTimerSnapshotStore::new(&db.path);
        assert_eq!(store.load().expect("empty load"), None);

        let snapshot = sample_snapshot();
        store.save(&snapshot).expect("save");
        store.save(&snapshot).expect("overwrite");
        assert_eq!(store.load().expect("load"), Some(snapshot));

        store.clear().expect("clear");
        assert_eq!(store.load().expect("load after clear"), None);
    }

    #[test]
    fn sqlite_store_reports_corrupt_payload() {
        let db = TempDb::new();
        let connection = open_database(&db.path).expect("open");
        connection
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![TIMER_STATE_KEY, "{not json", "2026-02-16T09:00:00Z"],
            )
            .expect("insert garbage");

        let store = SqliteTimerSnapshotStore::new(&db.path);
        assert!(matches!(store.load(), Err(InfraError::PersistenceCorrupt(_))));
    }

    #[test]
    fn decode_rejects_snapshot_violating_invariants() {
        let mut snapshot = sample_snapshot();
        snapshot.state.remaining_seconds = snapshot.state.target_duration_seconds + 1;
        let raw = serde_json::to_string(&snapshot).expect("serialize");
        let store = InMemoryTimerSnapshotStore::with_raw_payload(raw);
        assert!(matches!(store.load(), Err(InfraError::PersistenceCorrupt(_))));
    }
}
