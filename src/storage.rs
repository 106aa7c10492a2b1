use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capacity of the published stream when nothing else is configured.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One published frame with its per-region count document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRecord {
    /// Monotonic per log. Never reused after eviction.
    pub sequence: u64,
    pub created_at: i64,
    pub metadata: String,
    /// Base64 JPEG.
    pub image: String,
}

/// Append-only, capacity-bounded log of published frames.
///
/// Once `capacity()` records are held, every append evicts the oldest one in
/// the same atomic step. Readers never observe the log over capacity.
pub trait FrameLog {
    fn append(&mut self, metadata_json: &str, image_b64: &str) -> Result<u64>;

    fn latest(&self) -> Result<Option<FrameRecord>>;

    /// All retained records, oldest first.
    fn records(&self) -> Result<Vec<FrameRecord>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn capacity(&self) -> usize;

    /// Make every appended record durable.
    fn flush(&mut self) -> Result<()>;
}

pub(crate) fn now_s() -> Result<i64> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    i64::try_from(secs).map_err(|_| anyhow!("system time exceeds i64 range"))
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(anyhow!("frame log capacity must be at least 1"));
    }
    Ok(())
}

pub(crate) fn open_shared_db(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // journal_mode returns a row, so it cannot go through execute_batch
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    Ok(conn)
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteFrameLog {
    conn: Connection,
    stream: String,
    capacity: usize,
}

impl SqliteFrameLog {
    /// Open (or create) the log for `stream` inside `db_path`.
    ///
    /// The capacity is stored next to the records and enforced by an insert
    /// trigger. Reopening with a smaller capacity trims the log immediately.
    pub fn open(db_path: &str, stream: &str, capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        let conn = open_shared_db(db_path)?;
        let mut log = Self {
            conn,
            stream: stream.to_string(),
            capacity,
        };
        log.ensure_schema()?;
        log.install_capacity()?;
        Ok(log)
    }

    /// Open a stream some producer already created, keeping its capacity.
    pub fn open_existing(db_path: &str, stream: &str) -> Result<Self> {
        let conn = open_shared_db(db_path)?;
        let mut log = Self {
            conn,
            stream: stream.to_string(),
            capacity: DEFAULT_LOG_CAPACITY,
        };
        log.ensure_schema()?;
        let cap: Option<i64> = log
            .conn
            .query_row(
                "SELECT cap FROM frame_log_caps WHERE stream = ?1",
                params![stream],
                |row| row.get(0),
            )
            .optional()?;
        let cap = cap.ok_or_else(|| anyhow!("no frame log for stream {} in {}", stream, db_path))?;
        log.capacity = cap as usize;
        Ok(log)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS frame_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              stream TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              metadata_json TEXT NOT NULL,
              image_b64 TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS frame_log_caps (
              stream TEXT PRIMARY KEY,
              cap INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_frame_log_stream ON frame_log(stream, id);

            CREATE TRIGGER IF NOT EXISTS frame_log_evict
            AFTER INSERT ON frame_log
            BEGIN
              DELETE FROM frame_log
              WHERE stream = NEW.stream
                AND id NOT IN (
                  SELECT id FROM frame_log
                  WHERE stream = NEW.stream
                  ORDER BY id DESC
                  LIMIT COALESCE((SELECT cap FROM frame_log_caps WHERE stream = NEW.stream), -1)
                );
            END;
            "#,
        )?;
        Ok(())
    }

    fn install_capacity(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO frame_log_caps(stream, cap) VALUES (?1, ?2)
            ON CONFLICT(stream) DO UPDATE SET cap = excluded.cap
            "#,
            params![self.stream, self.capacity as i64],
        )?;
        let trimmed = tx.execute(
            r#"
            DELETE FROM frame_log
            WHERE stream = ?1
              AND id NOT IN (
                SELECT id FROM frame_log WHERE stream = ?1 ORDER BY id DESC LIMIT ?2
              )
            "#,
            params![self.stream, self.capacity as i64],
        )?;
        tx.commit()?;
        if trimmed > 0 {
            log::info!(
                "trimmed {} records from stream {} to capacity {}",
                trimmed,
                self.stream,
                self.capacity
            );
        }
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FrameRecord> {
        let id: i64 = row.get(0)?;
        Ok(FrameRecord {
            sequence: id as u64,
            created_at: row.get(1)?,
            metadata: row.get(2)?,
            image: row.get(3)?,
        })
    }
}

impl FrameLog for SqliteFrameLog {
    fn append(&mut self, metadata_json: &str, image_b64: &str) -> Result<u64> {
        let created_at = now_s()?;
        // the eviction trigger runs inside this statement
        self.conn.execute(
            r#"
            INSERT INTO frame_log(stream, created_at, metadata_json, image_b64)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![self.stream, created_at, metadata_json, image_b64],
        )?;
        Ok(self.conn.last_insert_rowid() as u64)
    }

    fn latest(&self) -> Result<Option<FrameRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT id, created_at, metadata_json, image_b64 FROM frame_log
                WHERE stream = ?1 ORDER BY id DESC LIMIT 1
                "#,
                params![self.stream],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn records(&self) -> Result<Vec<FrameRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, metadata_json, image_b64 FROM frame_log
            WHERE stream = ?1 ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![self.stream], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM frame_log WHERE stream = ?1",
            params![self.stream],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn flush(&mut self) -> Result<()> {
        // autocommit already made each append durable; fold the WAL back in
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(PASSIVE);")
            .context("failed to checkpoint frame log")?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In memory
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InMemoryFrames {
    records: VecDeque<FrameRecord>,
    next_sequence: u64,
}

/// Shared in-process log. Clones are handles onto the same records.
#[derive(Clone, Debug)]
pub struct InMemoryFrameLog {
    inner: Arc<Mutex<InMemoryFrames>>,
    capacity: usize,
}

impl InMemoryFrameLog {
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(InMemoryFrames {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                next_sequence: 1,
            })),
            capacity,
        })
    }

    fn with_frames<T>(&self, f: impl FnOnce(&mut InMemoryFrames) -> T) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame log lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl FrameLog for InMemoryFrameLog {
    fn append(&mut self, metadata_json: &str, image_b64: &str) -> Result<u64> {
        let created_at = now_s()?;
        let capacity = self.capacity;
        self.with_frames(|frames| {
            let sequence = frames.next_sequence;
            frames.next_sequence += 1;
            frames.records.push_back(FrameRecord {
                sequence,
                created_at,
                metadata: metadata_json.to_string(),
                image: image_b64.to_string(),
            });
            while frames.records.len() > capacity {
                frames.records.pop_front();
            }
            sequence
        })
    }

    fn latest(&self) -> Result<Option<FrameRecord>> {
        self.with_frames(|frames| frames.records.back().cloned())
    }

    fn records(&self) -> Result<Vec<FrameRecord>> {
        self.with_frames(|frames| frames.records.iter().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        self.with_frames(|frames| frames.records.len())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
