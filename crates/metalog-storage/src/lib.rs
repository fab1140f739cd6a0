use chrono::NaiveDateTime;
use metalog_core::aggregate::{
    collect_runs, is_newer, latest_per_task, parse_metadata, summarize_status_counts,
};
use metalog_core::{
    parse_ingested, IdSummary, MetalogSource, ProcessRow, QueryError, RunInfo, TaskRecord,
    TaskStatus,
};
use rusqlite::{params, Connection, InterruptHandle, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database file not found: {}", .0.display())]
    MissingDatabase(PathBuf),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        QueryError::unavailable(err.to_string())
    }
}

/// Read-only view of a `metalog` table.
pub struct MetalogStore {
    conn: Connection,
}

impl MetalogStore {
    /// Opens an existing database file read-only. A missing file, or one
    /// that is not an SQLite database, fails here rather than on first query.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StorageError::MissingDatabase(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Handle that aborts whatever statement is running on this connection.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.conn.close().map_err(|(_, err)| StorageError::Sqlite(err))
    }

    /// Counts are grouped per distinct ingested text so each value is parsed
    /// once. The latest time is picked after parsing because text order is
    /// not time order once offsets and separators are mixed.
    pub fn runs(&self) -> Result<Vec<RunInfo>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT run_name, ingested, COUNT(*) AS tasks
            FROM metalog
            WHERE run_name IS NOT NULL
            GROUP BY run_name, ingested
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut grouped = Vec::new();
        for row in rows {
            let (run_name, ingested, tasks) = row?;
            grouped.push((
                run_name,
                parse_timestamp(ingested)?,
                u64::try_from(tasks).unwrap_or(0),
            ));
        }
        Ok(collect_runs(grouped))
    }

    pub fn id_summaries(&self, run: &str) -> Result<Vec<IdSummary>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT COALESCE(id, '') AS group_id, status, COUNT(*) AS tasks
            FROM metalog
            WHERE run_name = ?1
            GROUP BY group_id, status
            ",
        )?;
        let rows = stmt.query_map(params![run], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut counted = Vec::new();
        for row in rows {
            let (id, status, tasks) = row?;
            counted.push((id, status, u64::try_from(tasks).unwrap_or(0)));
        }
        Ok(summarize_status_counts(counted))
    }

    pub fn processes(&self, run: &str, id: &str) -> Result<Vec<ProcessRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT COALESCE(process, ''), COALESCE(task_id, ''), status, ingested
            FROM metalog
            WHERE run_name = ?1 AND COALESCE(id, '') = ?2
            ",
        )?;
        let rows = stmt.query_map(params![run, id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut processes = Vec::new();
        for row in rows {
            let (process, task_id, raw_status, ingested) = row?;
            processes.push(ProcessRow {
                process,
                task_id,
                status: TaskStatus::from_raw(&raw_status),
                raw_status,
                ingested: parse_timestamp(ingested)?,
            });
        }
        Ok(latest_per_task(processes))
    }

    /// Latest-ingested row for the task, if any. Agrees with the row
    /// [`MetalogStore::processes`] keeps for the same task id.
    pub fn task(
        &self,
        run: &str,
        id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT
                run_name,
                COALESCE(id, ''),
                ingested,
                COALESCE(process, ''),
                COALESCE(task_id, ''),
                status,
                metadata
            FROM metalog
            WHERE run_name = ?1 AND COALESCE(id, '') = ?2 AND COALESCE(task_id, '') = ?3
            ",
        )?;
        let rows = stmt.query_map(params![run, id, task_id], |row| {
            Ok(RawTaskRow {
                run_name: row.get(0)?,
                id: row.get(1)?,
                ingested: row.get(2)?,
                process: row.get(3)?,
                task_id: row.get(4)?,
                status: row.get(5)?,
                metadata: row.get(6)?,
            })
        })?;

        let mut latest: Option<TaskRecord> = None;
        for row in rows {
            let record = row?.into_record()?;
            let newer = latest.as_ref().map_or(true, |current| {
                is_newer(
                    (record.ingested, record.raw_status.as_str(), record.process.as_str()),
                    (current.ingested, current.raw_status.as_str(), current.process.as_str()),
                )
            });
            if newer {
                latest = Some(record);
            }
        }
        Ok(latest)
    }
}

impl MetalogSource for MetalogStore {
    fn list_runs(&self) -> Result<Vec<RunInfo>, QueryError> {
        Ok(self.runs()?)
    }

    fn summarize_ids(&self, run: &str) -> Result<Vec<IdSummary>, QueryError> {
        Ok(self.id_summaries(run)?)
    }

    fn list_processes(&self, run: &str, id: &str) -> Result<Vec<ProcessRow>, QueryError> {
        Ok(self.processes(run, id)?)
    }

    fn fetch_task(
        &self,
        run: &str,
        id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, QueryError> {
        Ok(self.task(run, id, task_id)?)
    }
}

struct RawTaskRow {
    run_name: String,
    id: String,
    ingested: Option<String>,
    process: String,
    task_id: String,
    status: Option<String>,
    metadata: Option<String>,
}

impl RawTaskRow {
    fn into_record(self) -> Result<TaskRecord, StorageError> {
        let raw_status = self.status.unwrap_or_default();
        Ok(TaskRecord {
            run_name: self.run_name,
            id: self.id,
            ingested: parse_timestamp(self.ingested)?,
            process: self.process,
            task_id: self.task_id,
            status: TaskStatus::from_raw(&raw_status),
            raw_status,
            metadata: parse_metadata(self.metadata.as_deref()),
        })
    }
}

fn parse_timestamp(value: Option<String>) -> Result<NaiveDateTime, StorageError> {
    let value = value.ok_or_else(|| StorageError::Timestamp("missing ingested value".to_string()))?;
    parse_ingested(&value).ok_or_else(|| StorageError::Timestamp(value))
}
