//! Progress Tracker (C7): the durable state machine over `ingest_progress`,
//! `processed_files`, and `ingest_checkpoints`. The Progress row plus the
//! Processed-Member set are the authoritative resume unit; checkpoints are
//! advisory.

use crate::fingerprint::fingerprint;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Stamp the current instant the same way `date::parse_utc` reads it back;
/// `OffsetDateTime`'s `Display` is not one of `parse_utc`'s accepted forms.
fn now_stamp() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).expect("RFC 3339 formatting of a valid UTC instant cannot fail")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Downloading,
    Processing,
    Completed,
    Failed,
    Paused,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Downloading => "downloading",
            State::Processing => "processing",
            State::Completed => "completed",
            State::Failed => "failed",
            State::Paused => "paused",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "downloading" => State::Downloading,
            "processing" => State::Processing,
            "completed" => State::Completed,
            "failed" => State::Failed,
            "paused" => State::Paused,
            other => anyhow::bail!("unrecognized progress state {other:?}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Progress {
    pub id: i64,
    pub source_url: String,
    pub source_hash: String,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub processed_bytes: u64,
    pub last_tar_position: u64,
    pub last_xml_file: Option<String>,
    pub records_processed: u64,
    pub state: State,
    pub started_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeInfo {
    pub downloaded_bytes: u64,
    pub processed_bytes: u64,
    pub tar_position: u64,
    pub last_member: Option<String>,
    pub records_processed: u64,
    pub processed_members: Vec<String>,
}

pub struct ProgressTracker {
    conn: Mutex<Connection>,
    /// Cache of processed member names for the current session, populated
    /// on `start_or_resume` and kept current by `record_member_processed`.
    processed_cache: Mutex<HashSet<String>>,
    current_id: Mutex<Option<i64>>,
}

impl ProgressTracker {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening progress database at {}", path.as_ref().display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "busy_timeout", 30_000i64)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ingest_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_url TEXT NOT NULL,
                source_hash TEXT NOT NULL UNIQUE,
                total_bytes INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                processed_bytes INTEGER NOT NULL DEFAULT 0,
                last_tar_position INTEGER NOT NULL DEFAULT 0,
                last_xml_file TEXT,
                records_processed INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ingest_progress_source_hash ON ingest_progress(source_hash);

            CREATE TABLE IF NOT EXISTS processed_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                progress_id INTEGER NOT NULL REFERENCES ingest_progress(id),
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                records_count INTEGER NOT NULL,
                processed_at TEXT NOT NULL,
                checksum TEXT NOT NULL,
                UNIQUE(progress_id, file_name)
            );
            CREATE INDEX IF NOT EXISTS idx_processed_files_progress_id ON processed_files(progress_id);

            CREATE TABLE IF NOT EXISTS ingest_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                progress_id INTEGER NOT NULL REFERENCES ingest_progress(id),
                checkpoint_time TEXT NOT NULL,
                tar_position INTEGER NOT NULL,
                bytes_processed INTEGER NOT NULL,
                records_processed INTEGER NOT NULL,
                last_transaction_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ingest_checkpoints_progress_id ON ingest_checkpoints(progress_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            processed_cache: Mutex::new(HashSet::new()),
            current_id: Mutex::new(None),
        })
    }

    fn row_by_hash(conn: &Connection, source_hash: &str) -> Result<Option<Progress>> {
        conn.query_row(
            "SELECT id, source_url, source_hash, total_bytes, downloaded_bytes, processed_bytes,
                    last_tar_position, last_xml_file, records_processed, state,
                    started_at, updated_at, completed_at, error_message
             FROM ingest_progress WHERE source_hash = ?1",
            params![source_hash],
            Self::row_to_progress,
        )
        .optional()
        .map_err(Into::into)
    }

    fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<Progress> {
        let state_raw: String = row.get(9)?;
        let started_raw: String = row.get(10)?;
        let updated_raw: String = row.get(11)?;
        let completed_raw: Option<String> = row.get(12)?;
        Ok(Progress {
            id: row.get(0)?,
            source_url: row.get(1)?,
            source_hash: row.get(2)?,
            total_bytes: row.get::<_, i64>(3)? as u64,
            downloaded_bytes: row.get::<_, i64>(4)? as u64,
            processed_bytes: row.get::<_, i64>(5)? as u64,
            last_tar_position: row.get::<_, i64>(6)? as u64,
            last_xml_file: row.get(7)?,
            records_processed: row.get::<_, i64>(8)? as u64,
            state: State::parse(&state_raw).unwrap_or(State::Failed),
            started_at: crate::date::parse_utc(&started_raw).unwrap_or(OffsetDateTime::UNIX_EPOCH),
            updated_at: crate::date::parse_utc(&updated_raw).unwrap_or(OffsetDateTime::UNIX_EPOCH),
            completed_at: completed_raw.as_deref().and_then(crate::date::parse_utc),
            error_message: row.get(13)?,
        })
    }

    fn load_processed_members(conn: &Connection, progress_id: i64) -> Result<HashSet<String>> {
        let mut stmt = conn.prepare("SELECT file_name FROM processed_files WHERE progress_id = ?1")?;
        let names = stmt
            .query_map(params![progress_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(names)
    }

    /// Create a fresh row, or resume/force-reset an existing one, per the
    /// state machine: completed/failed rows reset in place on resume;
    /// downloading/processing/paused rows are loaded as-is.
    pub fn start_or_resume(&self, source_url: &str, force: bool) -> Result<Progress> {
        let source_hash = fingerprint(source_url);
        let conn = self.conn.lock();
        let now = now_stamp();
        let existing = Self::row_by_hash(&conn, &source_hash)?;

        let progress = match existing {
            None => {
                conn.execute(
                    "INSERT INTO ingest_progress (source_url, source_hash, state, started_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![source_url, source_hash, State::Downloading.as_str(), now],
                )?;
                let id = conn.last_insert_rowid();
                Self::row_by_hash(&conn, &source_hash)?
                    .filter(|p| p.id == id)
                    .context("progress row vanished immediately after insert")?
            }
            Some(row) if force || matches!(row.state, State::Completed | State::Failed) => {
                conn.execute("DELETE FROM processed_files WHERE progress_id = ?1", params![row.id])?;
                conn.execute("DELETE FROM ingest_checkpoints WHERE progress_id = ?1", params![row.id])?;
                conn.execute(
                    "UPDATE ingest_progress SET
                        total_bytes = 0, downloaded_bytes = 0, processed_bytes = 0,
                        last_tar_position = 0, last_xml_file = NULL, records_processed = 0,
                        state = ?2, started_at = ?3, updated_at = ?3, completed_at = NULL, error_message = NULL
                     WHERE id = ?1",
                    params![row.id, State::Downloading.as_str(), now],
                )?;
                Self::row_by_hash(&conn, &source_hash)?.context("progress row vanished after reset")?
            }
            Some(row) => row,
        };

        let cache = Self::load_processed_members(&conn, progress.id)?;
        *self.processed_cache.lock() = cache;
        *self.current_id.lock() = Some(progress.id);
        Ok(progress)
    }

    fn require_id(&self) -> Result<i64> {
        self.current_id.lock().context("no active progress session; call start_or_resume first")
    }

    /// Idempotent, monotonic update of download progress.
    pub fn update_download(&self, downloaded_bytes: u64, total_bytes: u64) -> Result<()> {
        let id = self.require_id()?;
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE ingest_progress SET
                downloaded_bytes = MAX(downloaded_bytes, ?2),
                total_bytes = ?3,
                updated_at = ?4
             WHERE id = ?1",
            params![id, downloaded_bytes as i64, total_bytes as i64, now_stamp()],
        )?;
        Ok(())
    }

    /// Advance processing progress and, when `checkpoint` is true, record a
    /// checkpoint in the same logical update.
    pub fn update_processing(
        &self,
        tar_position: u64,
        bytes_processed: u64,
        last_member: &str,
        records_processed: u64,
        checkpoint: bool,
    ) -> Result<()> {
        let id = self.require_id()?;
        let mut conn = self.conn.lock();
        let now = now_stamp();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE ingest_progress SET
                state = ?2, last_tar_position = ?3, processed_bytes = ?4,
                last_xml_file = ?5, records_processed = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                State::Processing.as_str(),
                tar_position as i64,
                bytes_processed as i64,
                last_member,
                records_processed as i64,
                now,
            ],
        )?;
        if checkpoint {
            tx.execute(
                "INSERT INTO ingest_checkpoints (progress_id, checkpoint_time, tar_position, bytes_processed, records_processed, last_transaction_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![id, now, tar_position as i64, bytes_processed as i64, records_processed as i64],
            )?;
        }
        tx.commit()?;
        drop(conn);
        Ok(())
    }

    /// Upsert a processed-member row; idempotent on replay.
    pub fn record_member_processed(&self, name: &str, size: u64, records: u64, checksum: &str) -> Result<()> {
        let id = self.require_id()?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO processed_files (progress_id, file_name, file_size, records_count, processed_at, checksum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(progress_id, file_name) DO UPDATE SET
                file_size = excluded.file_size, records_count = excluded.records_count,
                processed_at = excluded.processed_at, checksum = excluded.checksum",
            params![id, name, size as i64, records as i64, now_stamp(), checksum],
        )?;
        self.processed_cache.lock().insert(name.to_string());
        Ok(())
    }

    /// Cache-first membership test; falls back to the sink so a cold cache
    /// (e.g. a freshly constructed tracker pointed at an existing file)
    /// never misses a previously-recorded member.
    pub fn is_member_processed(&self, name: &str) -> Result<bool> {
        if self.processed_cache.lock().contains(name) {
            return Ok(true);
        }
        let id = self.require_id()?;
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_files WHERE progress_id = ?1 AND file_name = ?2",
                params![id, name],
                |r| r.get(0),
            )
            .optional()?;
        if found.is_some() {
            drop(conn);
            self.processed_cache.lock().insert(name.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn mark_completed(&self) -> Result<()> {
        let id = self.require_id()?;
        let conn = self.conn.lock();
        let now = now_stamp();
        conn.execute(
            "UPDATE ingest_progress SET state = ?2, completed_at = ?3, updated_at = ?3 WHERE id = ?1",
            params![id, State::Completed.as_str(), now],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, message: &str) -> Result<()> {
        let id = self.require_id()?;
        let conn = self.conn.lock();
        let now = now_stamp();
        conn.execute(
            "UPDATE ingest_progress SET state = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, State::Failed.as_str(), message, now],
        )?;
        Ok(())
    }

    pub fn get_resume_info(&self) -> Result<ResumeInfo> {
        let id = self.require_id()?;
        let conn = self.conn.lock();
        let (downloaded_bytes, processed_bytes, tar_position, last_member, records_processed): (
            i64,
            i64,
            i64,
            Option<String>,
            i64,
        ) = conn.query_row(
            "SELECT downloaded_bytes, processed_bytes, last_tar_position, last_xml_file, records_processed
             FROM ingest_progress WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )?;
        drop(conn);
        let processed_members = self.processed_cache.lock().iter().cloned().collect();
        Ok(ResumeInfo {
            downloaded_bytes: downloaded_bytes as u64,
            processed_bytes: processed_bytes as u64,
            tar_position: tar_position as u64,
            last_member,
            records_processed: records_processed as u64,
            processed_members,
        })
    }

    /// Purge completed/failed rows (and their dependents) older than
    /// `retention` relative to `now`.
    pub fn purge_expired(&self, retention: time::Duration, now: OffsetDateTime) -> Result<u64> {
        let cutoff = (now - retention)
            .format(&Rfc3339)
            .context("formatting purge cutoff as RFC 3339")?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM ingest_progress
             WHERE state IN ('completed', 'failed') AND updated_at < ?1",
        )?;
        let ids: Vec<i64> = stmt.query_map(params![cutoff], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        for id in &ids {
            conn.execute("DELETE FROM ingest_checkpoints WHERE progress_id = ?1", params![id])?;
            conn.execute("DELETE FROM processed_files WHERE progress_id = ?1", params![id])?;
            conn.execute("DELETE FROM ingest_progress WHERE id = ?1", params![id])?;
        }
        Ok(ids.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_source_starts_downloading() {
        let tracker = ProgressTracker::open_in_memory().unwrap();
        let progress = tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        assert_eq!(progress.state, State::Downloading);
        assert_eq!(progress.records_processed, 0);
    }

    #[test]
    fn resume_loads_existing_non_terminal_row_and_cache() {
        let tracker = ProgressTracker::open_in_memory().unwrap();
        tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        tracker.update_processing(100, 1000, "study.xml", 1, false).unwrap();
        tracker.record_member_processed("study.xml", 500, 1, "abc").unwrap();

        let resumed = tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        assert_eq!(resumed.state, State::Processing);
        assert!(tracker.is_member_processed("study.xml").unwrap());
    }

    #[test]
    fn completed_row_resets_on_resume() {
        let tracker = ProgressTracker::open_in_memory().unwrap();
        tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        tracker.record_member_processed("study.xml", 500, 1, "abc").unwrap();
        tracker.mark_completed().unwrap();

        let resumed = tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        assert_eq!(resumed.state, State::Downloading);
        assert!(!tracker.is_member_processed("study.xml").unwrap());
    }

    #[test]
    fn force_restart_clears_processed_members() {
        let tracker = ProgressTracker::open_in_memory().unwrap();
        tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        tracker.record_member_processed("study.xml", 500, 1, "abc").unwrap();
        tracker.update_processing(10, 500, "study.xml", 1, false).unwrap();

        let reset = tracker.start_or_resume("file:///tmp/a.tar.gz", true).unwrap();
        assert_eq!(reset.state, State::Downloading);
        assert_eq!(reset.records_processed, 0);
        assert!(!tracker.is_member_processed("study.xml").unwrap());
    }

    #[test]
    fn member_processed_is_idempotent_on_replay() {
        let tracker = ProgressTracker::open_in_memory().unwrap();
        tracker.start_or_resume("file:///tmp/a.tar.gz", false).unwrap();
        tracker.record_member_processed("study.xml", 500, 1, "abc").unwrap();
        tracker.record_member_processed("study.xml", 500, 1, "abc").unwrap();
        let info = tracker.get_resume_info().unwrap();
        assert_eq!(info.processed_members.len(), 1);
    }

    #[test]
    fn purge_expired_removes_only_old_terminal_rows() {
        let tracker = ProgressTracker::open_in_memory().unwrap();

        tracker.start_or_resume("file:///tmp/stale-completed.tar.gz", false).unwrap();
        tracker.record_member_processed("study.xml", 500, 1, "abc").unwrap();
        tracker.mark_completed().unwrap();

        tracker.start_or_resume("file:///tmp/still-processing.tar.gz", false).unwrap();
        tracker.update_processing(1, 100, "study.xml", 1, false).unwrap();

        let far_future = OffsetDateTime::now_utc() + time::Duration::days(30);
        let purged = tracker.purge_expired(time::Duration::days(7), far_future).unwrap();
        assert_eq!(purged, 1, "only the completed row is eligible; the in-flight one is not");

        let conn = tracker.conn.lock();
        let hash = fingerprint("file:///tmp/stale-completed.tar.gz");
        assert!(ProgressTracker::row_by_hash(&conn, &hash).unwrap().is_none());
        drop(conn);

        let resumed = tracker.start_or_resume("file:///tmp/still-processing.tar.gz", false).unwrap();
        assert_eq!(resumed.state, State::Processing, "untouched row keeps its prior state");
    }
}
