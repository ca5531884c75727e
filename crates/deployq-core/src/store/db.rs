//! Durable deploy store on redb.
//!
//! # Table design
//!
//! ```text
//! queues     channel (&str)                         -> JSON Queue
//! sequences  channel (&str)                         -> last history sequence (u64)
//! history    [ len: u32 BE | channel | seq: u64 BE ] -> JSON Deploy
//! ```
//!
//! The history key is length-prefixed so one channel's keys never share a
//! prefix with another's, and the big-endian sequence makes byte order equal
//! insertion order. A range scan over one channel's prefix returns its
//! history in order.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use redb::{Database, DatabaseError, ReadableTable, TableDefinition, WriteTransaction};

use super::{started_after, Commit, Store, StoreResult};
use crate::deploy::Deploy;
use crate::error::StoreError;
use crate::queue::Queue;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
const HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("history");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn history_key(channel: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + channel.len() + 8);
    key.extend_from_slice(&(channel.len() as u32).to_be_bytes());
    key.extend_from_slice(channel.as_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

/// How long [`RedbStore::open`] waits for another process to release the
/// database file.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

const OPEN_BACKOFF_START: Duration = Duration::from_millis(5);
const OPEN_BACKOFF_MAX: Duration = Duration::from_millis(200);

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating parent directories
    /// and all tables up front so reads never hit a missing table.
    ///
    /// redb locks the file for as long as it is open; while another process
    /// holds it, retry with backoff for up to [`OPEN_TIMEOUT`].
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_within(path, OPEN_TIMEOUT)
    }

    pub fn open_within(path: &Path, timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::db)?;
        }
        let db = create_when_unlocked(path, timeout)?;
        let wt = db.begin_write().map_err(StoreError::db)?;
        wt.open_table(QUEUES).map_err(StoreError::db)?;
        wt.open_table(SEQUENCES).map_err(StoreError::db)?;
        wt.open_table(HISTORY).map_err(StoreError::db)?;
        wt.commit().map_err(StoreError::db)?;
        tracing::debug!(path = %path.display(), "opened deploy database");
        Ok(Self { db })
    }

    fn scan_history(
        &self,
        key: &str,
        mut keep: impl FnMut(&Deploy) -> bool,
    ) -> StoreResult<Vec<Deploy>> {
        let lower = history_key(key, 0);
        let upper = history_key(key, u64::MAX);
        let rt = self.db.begin_read().map_err(StoreError::db)?;
        let table = rt.open_table(HISTORY).map_err(StoreError::db)?;

        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(StoreError::db)?
        {
            let (_, v) = entry.map_err(StoreError::db)?;
            let deploy: Deploy = serde_json::from_slice(v.value())?;
            if keep(&deploy) {
                result.push(deploy);
            }
        }
        Ok(result)
    }
}

fn create_when_unlocked(path: &Path, timeout: Duration) -> StoreResult<Database> {
    let deadline = Instant::now() + timeout;
    let mut backoff = OPEN_BACKOFF_START;
    loop {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(DatabaseError::DatabaseAlreadyOpen) if Instant::now() < deadline => {
                tracing::debug!(path = %path.display(), ?backoff, "deploy database busy, retrying");
                std::thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
                backoff = (backoff * 2).min(OPEN_BACKOFF_MAX);
            }
            Err(e) => return Err(StoreError::db(e)),
        }
    }
}

fn read_queue(wt: &WriteTransaction, key: &str) -> StoreResult<Queue> {
    let table = wt.open_table(QUEUES).map_err(StoreError::db)?;
    let queue = match table.get(key).map_err(StoreError::db)? {
        Some(v) => serde_json::from_slice(v.value())?,
        None => Queue::new(),
    };
    Ok(queue)
}

fn write_queue(wt: &WriteTransaction, key: &str, queue: &Queue) -> StoreResult<()> {
    let value = serde_json::to_vec(queue)?;
    let mut table = wt.open_table(QUEUES).map_err(StoreError::db)?;
    table
        .insert(key, value.as_slice())
        .map_err(StoreError::db)?;
    Ok(())
}

fn append_history(wt: &WriteTransaction, key: &str, deploy: &Deploy) -> StoreResult<u64> {
    let value = serde_json::to_vec(deploy)?;
    let seq = {
        let mut sequences = wt.open_table(SEQUENCES).map_err(StoreError::db)?;
        let last = sequences
            .get(key)
            .map_err(StoreError::db)?
            .map(|v| v.value())
            .unwrap_or(0);
        sequences.insert(key, last + 1).map_err(StoreError::db)?;
        last + 1
    };
    let mut table = wt.open_table(HISTORY).map_err(StoreError::db)?;
    table
        .insert(history_key(key, seq).as_slice(), value.as_slice())
        .map_err(StoreError::db)?;
    Ok(seq)
}

impl Store for RedbStore {
    fn get_queue(&self, key: &str) -> StoreResult<Queue> {
        let rt = self.db.begin_read().map_err(StoreError::db)?;
        let table = rt.open_table(QUEUES).map_err(StoreError::db)?;
        let queue = match table.get(key).map_err(StoreError::db)? {
            Some(v) => serde_json::from_slice(v.value())?,
            None => Queue::new(),
        };
        Ok(queue)
    }

    fn set_queue(&self, key: &str, queue: &Queue) -> StoreResult<()> {
        let wt = self.db.begin_write().map_err(StoreError::db)?;
        write_queue(&wt, key, queue)?;
        wt.commit().map_err(StoreError::db)?;
        Ok(())
    }

    fn add_to_history(&self, key: &str, deploy: &Deploy) -> StoreResult<u64> {
        let wt = self.db.begin_write().map_err(StoreError::db)?;
        let seq = append_history(&wt, key, deploy)?;
        wt.commit().map_err(StoreError::db)?;
        Ok(seq)
    }

    fn all(&self, key: &str) -> StoreResult<Vec<Deploy>> {
        self.scan_history(key, |_| true)
    }

    fn since(&self, key: &str, cutoff: DateTime<Utc>) -> StoreResult<Vec<Deploy>> {
        self.scan_history(key, |d| started_after(d, cutoff))
    }

    /// redb admits one write transaction at a time, so the read inside it is
    /// never stale by the time the write commits.
    fn transact(&self, key: &str, f: &mut dyn FnMut(&mut Queue) -> Commit) -> StoreResult<()> {
        let wt = self.db.begin_write().map_err(StoreError::db)?;
        let mut queue = read_queue(&wt, key)?;
        match f(&mut queue) {
            Commit::Nothing => {
                wt.abort().map_err(StoreError::db)?;
                return Ok(());
            }
            Commit::Queue => write_queue(&wt, key, &queue)?,
            Commit::QueueAndHistory(deploy) => {
                append_history(&wt, key, &deploy)?;
                write_queue(&wt, key, &queue)?;
            }
        }
        wt.commit().map_err(StoreError::db)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
