//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use sesame_types::{HistoryEntry, LockDevice, LockState};

use crate::error::{Error, Result};
use crate::models::{StoredHistoryEntry, StoredLock, StoredState};
use crate::queries::HistoryQuery;
use crate::schema;

/// SQLite-based store for lock state and history.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

fn timestamp(value: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Lock operations
impl Store {
    /// Record a discovered lock, refreshing its nickname and serial.
    pub fn upsert_lock(&self, device: &LockDevice) -> Result<StoredLock> {
        self.conn.execute(
            "INSERT INTO locks (device_id, nickname, serial, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(device_id) DO UPDATE SET
                nickname = ?2,
                serial = ?3,
                last_seen = ?4",
            rusqlite::params![device.device_id, device.nickname, device.serial, now()],
        )?;

        self.get_lock(&device.device_id)?
            .ok_or(Error::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Get a lock by device ID.
    pub fn get_lock(&self, device_id: &str) -> Result<Option<StoredLock>> {
        let lock = self
            .conn
            .query_row(
                "SELECT device_id, nickname, serial, first_seen, last_seen
                 FROM locks WHERE device_id = ?",
                [device_id],
                |row| {
                    Ok(StoredLock {
                        device_id: row.get(0)?,
                        nickname: row.get(1)?,
                        serial: row.get(2)?,
                        first_seen: timestamp(row.get(3)?)?,
                        last_seen: timestamp(row.get(4)?)?,
                    })
                },
            )
            .optional()?;

        Ok(lock)
    }

    /// List all known locks, most recently seen first.
    pub fn list_locks(&self) -> Result<Vec<StoredLock>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_id, nickname, serial, first_seen, last_seen
             FROM locks ORDER BY last_seen DESC, nickname ASC",
        )?;

        let locks = stmt
            .query_map([], |row| {
                Ok(StoredLock {
                    device_id: row.get(0)?,
                    nickname: row.get(1)?,
                    serial: row.get(2)?,
                    first_seen: timestamp(row.get(3)?)?,
                    last_seen: timestamp(row.get(4)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(locks)
    }

    /// Make sure a row exists for `device_id` without touching an existing one.
    fn ensure_lock(&self, device_id: &str) -> Result<()> {
        let now = now();
        self.conn.execute(
            "INSERT OR IGNORE INTO locks (device_id, nickname, serial, first_seen, last_seen)
             VALUES (?1, ?1, '', ?2, ?2)",
            rusqlite::params![device_id, now],
        )?;
        Ok(())
    }
}

// State snapshot operations
impl Store {
    /// Load the snapshot of a lock.
    pub fn load_state(&self, device_id: &str) -> Result<Option<LockState>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM lock_states WHERE device_id = ?",
                [device_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Replace the snapshot of a lock.
    pub fn save_state(&self, device: &LockDevice, state: &LockState) -> Result<()> {
        self.upsert_lock(device)?;
        let json = serde_json::to_string(state)?;

        self.conn.execute(
            "INSERT INTO lock_states (device_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(device_id) DO UPDATE SET state = ?2, updated_at = ?3",
            rusqlite::params![device.device_id, json, now()],
        )?;

        debug!("Saved state of {}", device.nickname);
        Ok(())
    }

    /// Get the snapshot of a lock with its display name.
    pub fn get_state(&self, device_id: &str) -> Result<Option<StoredState>> {
        Ok(self
            .query_states(Some(device_id))?
            .into_iter()
            .next())
    }

    /// List every snapshot, ordered by nickname.
    pub fn list_states(&self) -> Result<Vec<StoredState>> {
        self.query_states(None)
    }

    fn query_states(&self, device_id: Option<&str>) -> Result<Vec<StoredState>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.device_id, l.nickname, s.state, s.updated_at
             FROM lock_states s JOIN locks l ON l.device_id = s.device_id
             WHERE ?1 IS NULL OR s.device_id = ?1
             ORDER BY l.nickname ASC",
        )?;

        let rows = stmt
            .query_map([device_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    timestamp(row.get(3)?)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(device_id, nickname, json, updated_at)| {
                Ok(StoredState {
                    device_id,
                    nickname,
                    state: serde_json::from_str(&json)?,
                    updated_at,
                })
            })
            .collect()
    }
}

// History operations
impl Store {
    /// Append an entry to the history log of a lock.
    pub fn append_history(&self, device_id: &str, entry: &HistoryEntry) -> Result<i64> {
        self.ensure_lock(device_id)?;

        self.conn.execute(
            "INSERT INTO history (device_id, time, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![device_id, entry.time, entry.status],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Time of the first history entry of a lock.
    pub fn history_initial_time(&self, device_id: &str) -> Result<Option<i64>> {
        let time = self
            .conn
            .query_row(
                "SELECT time FROM history WHERE device_id = ? ORDER BY id ASC LIMIT 1",
                [device_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(time)
    }

    /// Query history entries with filters.
    pub fn query_history(&self, query: &HistoryQuery) -> Result<Vec<StoredHistoryEntry>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(StoredHistoryEntry {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    timestamp: timestamp(row.get(2)?)?,
                    status: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Count history entries, optionally for one lock.
    pub fn count_history(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM history WHERE ?1 IS NULL OR device_id = ?1",
            [device_id],
            |row| row.get(0),
        )?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> LockDevice {
        LockDevice::new("abc", "Front Door", "SN1")
    }

    fn entry(time: i64, status: u8) -> HistoryEntry {
        HistoryEntry { time, status }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_locks().unwrap().is_empty());
        assert!(store.list_states().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_lock_refreshes_nickname() {
        let store = Store::open_in_memory().unwrap();

        let lock = store.upsert_lock(&device()).unwrap();
        assert_eq!(lock.nickname, "Front Door");

        let renamed = LockDevice::new("abc", "Back Door", "SN1");
        let lock = store.upsert_lock(&renamed).unwrap();
        assert_eq!(lock.nickname, "Back Door");
        assert_eq!(store.list_locks().unwrap().len(), 1);
        assert_eq!(lock.to_device(), renamed);
    }

    #[test]
    fn test_state_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_state("abc").unwrap().is_none());

        let mut state = LockState::new(1_700_000_000);
        state.current_locked = Some(true);
        state.target_locked = Some(false);
        state.times_opened = 3;
        state.reset_baseline = Some(500);
        store.save_state(&device(), &state).unwrap();

        assert_eq!(store.load_state("abc").unwrap(), Some(state.clone()));

        state.times_opened = 4;
        store.save_state(&device(), &state).unwrap();
        assert_eq!(store.load_state("abc").unwrap().unwrap().times_opened, 4);
    }

    #[test]
    fn test_list_states_includes_nickname() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_state(&device(), &LockState::new(0))
            .unwrap();
        store
            .save_state(&LockDevice::new("def", "Garage", "SN2"), &LockState::new(0))
            .unwrap();

        let states = store.list_states().unwrap();
        let names: Vec<_> = states.iter().map(|s| s.nickname.as_str()).collect();
        assert_eq!(names, vec!["Front Door", "Garage"]);

        let single = store.get_state("def").unwrap().unwrap();
        assert_eq!(single.device_id, "def");
        assert!(store.get_state("nope").unwrap().is_none());
    }

    #[test]
    fn test_history_initial_time_is_first_entry() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.history_initial_time("abc").unwrap(), None);

        store.append_history("abc", &entry(200, 0)).unwrap();
        store.append_history("abc", &entry(100, 1)).unwrap();

        assert_eq!(store.history_initial_time("abc").unwrap(), Some(200));
        assert_eq!(store.count_history(Some("abc")).unwrap(), 2);
        assert_eq!(store.count_history(None).unwrap(), 2);
    }

    #[test]
    fn test_history_before_discovery_keeps_placeholder_lock() {
        let store = Store::open_in_memory().unwrap();
        store.append_history("abc", &entry(1, 0)).unwrap();

        let lock = store.get_lock("abc").unwrap().unwrap();
        assert_eq!(lock.nickname, "abc");

        store.upsert_lock(&device()).unwrap();
        assert_eq!(store.get_lock("abc").unwrap().unwrap().nickname, "Front Door");
    }

    #[test]
    fn test_query_history_ordering_and_limit() {
        let store = Store::open_in_memory().unwrap();
        for (time, status) in [(10, 0), (20, 1), (20, 0), (30, 1)] {
            store.append_history("abc", &entry(time, status)).unwrap();
        }
        store.append_history("def", &entry(15, 1)).unwrap();

        let newest = store
            .query_history(&HistoryQuery::new().device("abc").limit(2))
            .unwrap();
        assert_eq!(
            newest.iter().map(|e| e.to_entry()).collect::<Vec<_>>(),
            vec![entry(30, 1), entry(20, 0)]
        );

        let oldest = store
            .query_history(&HistoryQuery::new().device("abc").oldest_first())
            .unwrap();
        assert_eq!(oldest.len(), 4);
        assert_eq!(oldest[0].to_entry(), entry(10, 0));

        let all = store.query_history(&HistoryQuery::new()).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        {
            let store = Store::open(&path).unwrap();
            store.save_state(&device(), &LockState::new(5)).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.load_state("abc").unwrap(), Some(LockState::new(5)));
    }
}
