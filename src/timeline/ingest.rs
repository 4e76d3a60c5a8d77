//! Bulk ingest of timeline rows
//!
//! An ingest session collapses the pool to its designated connection and
//! keeps one transaction open until `commit`. Events are staged unsorted;
//! committing orders them newest first, assigns ids after the current
//! maximum and lays out their lines in the export files.

use super::{Action, LINE_OVERHEAD_JSON, LINE_OVERHEAD_UTF8, TIMELINE_ALL};
use crate::context::ForensicContext;
use crate::storage::{bind_multi_i64, PooledConnection};
use crate::strings::{StrRecord, SQL_INSERT_STR};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;

const SQL_STAGE_EVENT: &str =
    "INSERT INTO timeline_raw (tp, ft, ac, pid, data64, id_str) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const SQL_INSERT_ROW: &str = r#"
INSERT INTO timeline (id, tp, ft, ac, pid, data64, id_str, oln_u, oln_j, oln_utp, oln_jtp)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
"#;

const SQL_STAGED_ORDERED: &str = r#"
SELECT r.tp, r.ft, r.ac, r.pid, r.data64, r.id_str, s.cbu, s.cbj
FROM timeline_raw r JOIN str s ON s.id = r.id_str
ORDER BY r.ft DESC, r.rowid
"#;

/// A forensic event handed in by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub tp: u32,
    /// Windows FILETIME (100 ns ticks since 1601-01-01 UTC)
    pub timestamp: u64,
    pub action: Action,
    pub pid: u32,
    pub data64: u64,
    pub text: String,
    /// UTF-16 offset of a sub-string inside `text`, 0 for none
    #[serde(default)]
    pub sub_offset: usize,
}

/// A fully laid-out timeline row, for producers that place lines themselves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineRow {
    pub id: u64,
    pub timestamp: u64,
    pub tp: u32,
    pub action: Action,
    pub pid: u32,
    pub data64: u64,
    pub text: StrRecord,
    /// Line offsets in the per-type files
    pub utf8_offset: u64,
    pub json_offset: u64,
    /// Line offsets in the aggregate files
    pub all_utf8_offset: u64,
    pub all_json_offset: u64,
}

struct StagedRow {
    tp: u32,
    timestamp: i64,
    action: i64,
    pid: i64,
    data64: i64,
    id_str: i64,
    utf8_len: u64,
    json_len: u64,
}

/// Single-threaded bulk ingest over the pool's designated connection
pub struct IngestSession<'a> {
    ctx: &'a ForensicContext,
    conn: Option<PooledConnection<'a>>,
    sizes: Vec<(u64, u64)>,
    staged: u64,
    finished: bool,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> IngestSession<'a> {
    pub(crate) fn begin(ctx: &'a ForensicContext, lock: MutexGuard<'a, ()>) -> Result<Self> {
        ctx.pool().set_single_thread(true)?;
        let mut session = Self {
            ctx,
            conn: None,
            sizes: ctx.timeline_registry().sizes(),
            staged: 0,
            finished: false,
            _lock: lock,
        };
        let conn = ctx.pool().reserve()?;
        conn.execute_batch("BEGIN")?;
        session.conn = Some(conn);
        tracing::info!("Timeline ingest started");
        Ok(session)
    }

    fn conn(&self) -> Result<&PooledConnection<'a>> {
        self.conn.as_ref().ok_or(Error::PoolClosed)
    }

    /// Register a timeline type and return its id
    pub fn register_type(&mut self, short_name: &str, stem: &str) -> Result<u32> {
        let id = self.ctx.timeline_registry().register(short_name, stem)?;
        if self.sizes.len() <= id as usize {
            self.sizes.resize(id as usize + 1, (0, 0));
        }
        Ok(id)
    }

    fn check_type(&self, tp: u32) -> Result<()> {
        if tp == TIMELINE_ALL || tp as usize >= self.sizes.len() {
            return Err(Error::UnknownTimelineType(tp));
        }
        Ok(())
    }

    /// Intern a string through the session's connection
    pub fn insert_str(&mut self, text: &str, sub_offset: usize) -> Result<StrRecord> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(SQL_INSERT_STR)?;
        self.ctx.strings().insert(&mut stmt, text, sub_offset)
    }

    /// Stage an event. Its id and line offsets are assigned on commit.
    pub fn add_event(&mut self, event: &TimelineEvent) -> Result<StrRecord> {
        self.check_type(event.tp)?;
        let record = self.insert_str(&event.text, event.sub_offset)?;

        {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(SQL_STAGE_EVENT)?;
            bind_multi_i64(
                &mut stmt,
                1,
                &[
                    i64::from(event.tp),
                    event.timestamp as i64,
                    i64::from(event.action.code()),
                    i64::from(event.pid),
                    event.data64 as i64,
                    record.id as i64,
                ],
            )?;
            stmt.raw_execute()?;
        }
        self.staged += 1;
        Ok(record)
    }

    /// Append a row whose id and offsets are chosen by the caller.
    ///
    /// The tracked export file sizes grow to cover the row's lines.
    pub fn insert_entry(&mut self, row: &TimelineRow) -> Result<()> {
        self.check_type(row.tp)?;
        let utf8_len = LINE_OVERHEAD_UTF8 + u64::from(row.text.utf8_len);
        let json_len = LINE_OVERHEAD_JSON + u64::from(row.text.json_len);
        let tp_end = (line_end(row.utf8_offset, utf8_len)?, line_end(row.json_offset, json_len)?);
        let all_end = (
            line_end(row.all_utf8_offset, utf8_len)?,
            line_end(row.all_json_offset, json_len)?,
        );

        self.write_row(row)?;
        grow(&mut self.sizes[row.tp as usize], tp_end.0, tp_end.1);
        grow(&mut self.sizes[TIMELINE_ALL as usize], all_end.0, all_end.1);
        Ok(())
    }

    fn write_row(&self, row: &TimelineRow) -> Result<()> {
        self.insert_row_values(&[
            row.id as i64,
            i64::from(row.tp),
            row.timestamp as i64,
            i64::from(row.action.code()),
            i64::from(row.pid),
            row.data64 as i64,
            row.text.id as i64,
            row.all_utf8_offset as i64,
            row.all_json_offset as i64,
            row.utf8_offset as i64,
            row.json_offset as i64,
        ])
    }

    fn insert_row_values(&self, values: &[i64; 11]) -> Result<()> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(SQL_INSERT_ROW)?;
        bind_multi_i64(&mut stmt, 1, values)?;
        stmt.raw_execute()?;
        Ok(())
    }

    /// Number of events staged so far
    pub fn staged(&self) -> u64 {
        self.staged
    }

    /// Lay out staged events, commit, and return the pool to full
    /// concurrency. Returns the number of rows appended from staging.
    pub fn commit(mut self) -> Result<u64> {
        let staged = self.load_staged()?;
        let mut next_id: u64 = {
            let conn = self.conn()?;
            let max: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM timeline", [], |r| r.get(0))?;
            max as u64 + 1
        };

        let appended = staged.len() as u64;
        for s in staged {
            let (all_utf8, all_json) = self.sizes[TIMELINE_ALL as usize];
            let (tp_utf8, tp_json) = self.sizes[s.tp as usize];
            let utf8_len = LINE_OVERHEAD_UTF8 + s.utf8_len;
            let json_len = LINE_OVERHEAD_JSON + s.json_len;

            self.insert_row_values(&[
                next_id as i64,
                i64::from(s.tp),
                s.timestamp,
                s.action,
                s.pid,
                s.data64,
                s.id_str,
                all_utf8 as i64,
                all_json as i64,
                tp_utf8 as i64,
                tp_json as i64,
            ])?;

            self.sizes[TIMELINE_ALL as usize] = (all_utf8 + utf8_len, all_json + json_len);
            self.sizes[s.tp as usize] = (tp_utf8 + utf8_len, tp_json + json_len);
            next_id += 1;
        }

        {
            let conn = self.conn()?;
            conn.execute_batch("DELETE FROM timeline_raw; COMMIT;")?;
        }
        self.finished = true;
        self.ctx.timeline_registry().set_sizes(&self.sizes);
        self.conn = None;
        self.ctx.pool().set_single_thread(false)?;

        let (all_utf8, all_json) = self.sizes[TIMELINE_ALL as usize];
        tracing::info!(
            "Timeline ingest committed: {} events, aggregate files {} / {} bytes",
            appended,
            all_utf8,
            all_json
        );
        Ok(appended)
    }

    fn load_staged(&self) -> Result<Vec<StagedRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(SQL_STAGED_ORDERED)?;
        let rows = stmt
            .query_map([], |row| {
                let utf8_len: i64 = row.get(6)?;
                let json_len: i64 = row.get(7)?;
                Ok(StagedRow {
                    tp: row.get(0)?,
                    timestamp: row.get(1)?,
                    action: row.get(2)?,
                    pid: row.get(3)?,
                    data64: row.get(4)?,
                    id_str: row.get(5)?,
                    utf8_len: utf8_len as u64,
                    json_len: json_len as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for row in &rows {
            self.check_type(row.tp)?;
        }
        Ok(rows)
    }
}

/// End of a line starting at `offset`. Offsets are stored as SQLite
/// integers, so the whole line must fit below `i64::MAX`.
fn line_end(offset: u64, len: u64) -> Result<u64> {
    offset
        .checked_add(len)
        .filter(|end| i64::try_from(*end).is_ok())
        .ok_or(Error::LineOffsetOutOfRange(offset))
}

fn grow(size: &mut (u64, u64), utf8_end: u64, json_end: u64) {
    size.0 = size.0.max(utf8_end);
    size.1 = size.1.max(json_end);
}

impl Drop for IngestSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("Timeline ingest rollback failed: {}", e);
            }
        }
        if let Err(e) = self.ctx.pool().set_single_thread(false) {
            tracing::warn!("Failed to restore pool concurrency: {}", e);
        }
        tracing::info!("Timeline ingest rolled back ({} staged events dropped)", self.staged);
    }
}
