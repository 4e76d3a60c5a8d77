//! Timeline maps - a range of timeline rows packed into one text buffer

use super::{Action, TimelineRegistry, TIMELINE_ALL};
use crate::storage::{query_numeric, SqlPool};
use crate::strings::utf16_to_byte_offset;
use crate::{Error, Result};
use std::ops::Range;
use std::sync::Arc;

const SQL_MAP_BY_TYPE: &str = r#"
SELECT t.id, t.ft, t.tp, t.ac, t.pid, t.data64, t.oln_utp, t.oln_jtp, s.csz, s.osz, s.sz
FROM timeline t JOIN str s ON s.id = t.id_str
WHERE t.tp = ?1 AND t.id >= ?2
ORDER BY t.id
LIMIT ?3
"#;

const SQL_MAP_ALL: &str = r#"
SELECT t.id, t.ft, t.tp, t.ac, t.pid, t.data64, t.oln_u, t.oln_j, s.csz, s.osz, s.sz
FROM timeline t JOIN str s ON s.id = t.id_str
WHERE t.id >= ?1
ORDER BY t.id
LIMIT ?2
"#;

const SQL_ID_BY_TYPE_UTF8: &str =
    "SELECT id FROM timeline WHERE tp = ?1 AND oln_utp <= ?2 ORDER BY oln_utp DESC, id LIMIT 1";
const SQL_ID_BY_TYPE_JSON: &str =
    "SELECT id FROM timeline WHERE tp = ?1 AND oln_jtp <= ?2 ORDER BY oln_jtp DESC, id LIMIT 1";
const SQL_ID_ALL_UTF8: &str =
    "SELECT id FROM timeline WHERE oln_u <= ?1 ORDER BY oln_u DESC, id LIMIT 1";
const SQL_ID_ALL_JSON: &str =
    "SELECT id FROM timeline WHERE oln_j <= ?1 ORDER BY oln_j DESC, id LIMIT 1";

/// One timeline row inside a [`TimelineMap`].
///
/// Offsets refer to the file the map was built for: the per-type file for a
/// real type, the aggregate file for type 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub id: u64,
    /// Windows FILETIME (100 ns ticks since 1601-01-01 UTC)
    pub timestamp: u64,
    pub tp: u32,
    pub action: Action,
    pub pid: u32,
    pub data64: u64,
    pub utf8_offset: u64,
    pub json_offset: u64,
    /// Text length in UTF-16 code units
    pub text_len: u32,
    text: Range<usize>,
    sub_text: Range<usize>,
}

impl TimelineEntry {
    /// Start of this entry's line in the UTF-8 or JSON file
    pub fn offset(&self, is_json: bool) -> u64 {
        if is_json { self.json_offset } else { self.utf8_offset }
    }

    /// Byte range of the text inside the owning map's buffer
    pub fn text_range(&self) -> Range<usize> {
        self.text.clone()
    }

    /// Byte range of the sub-text (a suffix of the text)
    pub fn sub_text_range(&self) -> Range<usize> {
        self.sub_text.clone()
    }
}

/// Borrowed view of an entry together with its text
#[derive(Debug, Clone, Copy)]
pub struct EntryView<'a> {
    pub entry: &'a TimelineEntry,
    pub text: &'a str,
    pub sub_text: &'a str,
}

/// Immutable, request-scoped view over a range of timeline rows.
///
/// All entry texts live in a single buffer owned by the map; entries only
/// hold ranges into it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TimelineMap {
    text: String,
    entries: Vec<TimelineEntry>,
}

impl TimelineMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// The shared text buffer
    pub fn buffer(&self) -> &str {
        &self.text
    }

    pub fn get(&self, index: usize) -> Option<EntryView<'_>> {
        self.entries.get(index).map(|entry| self.view(entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = EntryView<'_>> {
        self.entries.iter().map(|entry| self.view(entry))
    }

    pub fn last(&self) -> Option<&TimelineEntry> {
        self.entries.last()
    }

    /// Text of an entry; empty for an entry that belongs to another map
    pub fn text(&self, entry: &TimelineEntry) -> &str {
        self.text.get(entry.text.clone()).unwrap_or("")
    }

    /// Sub-text of an entry. Without a sub-string offset this is the whole text.
    pub fn sub_text(&self, entry: &TimelineEntry) -> &str {
        self.text.get(entry.sub_text.clone()).unwrap_or("")
    }

    fn view<'a>(&'a self, entry: &'a TimelineEntry) -> EntryView<'a> {
        EntryView {
            entry,
            text: self.text(entry),
            sub_text: self.sub_text(entry),
        }
    }
}

struct RawRow {
    id: u64,
    timestamp: u64,
    tp: u32,
    action: Action,
    pid: u32,
    data64: u64,
    utf8_offset: u64,
    json_offset: u64,
    text_len: u32,
    sub_offset: usize,
    text: String,
}

/// Fetch up to `count` rows of type `tp` (any type for 0) with `id >= min_id`,
/// in ascending id order.
pub fn get_map_from_id_range(pool: &SqlPool, tp: u32, min_id: u64, count: u64) -> Result<Arc<TimelineMap>> {
    if count == 0 {
        return Ok(Arc::new(TimelineMap::default()));
    }
    let min_id = min_id.min(i64::MAX as u64) as i64;
    let limit = count.min(i64::MAX as u64) as i64;

    let rows: Vec<RawRow> = {
        let conn = pool.reserve()?;
        let mut stmt = if tp == TIMELINE_ALL {
            conn.prepare_cached(SQL_MAP_ALL)?
        } else {
            conn.prepare_cached(SQL_MAP_BY_TYPE)?
        };
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<RawRow> {
            let id: i64 = row.get(0)?;
            let timestamp: i64 = row.get(1)?;
            let ac: u32 = row.get(3)?;
            let data64: i64 = row.get(5)?;
            let utf8_offset: i64 = row.get(6)?;
            let json_offset: i64 = row.get(7)?;
            let osz: i64 = row.get(9)?;
            Ok(RawRow {
                id: id as u64,
                timestamp: timestamp as u64,
                tp: row.get(2)?,
                action: Action::from_code(ac),
                pid: row.get(4)?,
                data64: data64 as u64,
                utf8_offset: utf8_offset as u64,
                json_offset: json_offset as u64,
                text_len: row.get(8)?,
                sub_offset: osz as usize,
                text: row.get(10)?,
            })
        };
        let rows = if tp == TIMELINE_ALL {
            stmt.query_map([min_id, limit], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([tp as i64, min_id, limit], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows
    };

    let total: usize = rows.iter().map(|r| r.text.len()).sum();
    let mut text = String::with_capacity(total);
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let start = text.len();
        text.push_str(&row.text);
        let end = text.len();
        let sub_start = utf16_to_byte_offset(&row.text, row.sub_offset)
            .map(|o| start + o)
            .unwrap_or(end);
        entries.push(TimelineEntry {
            id: row.id,
            timestamp: row.timestamp,
            tp: row.tp,
            action: row.action,
            pid: row.pid,
            data64: row.data64,
            utf8_offset: row.utf8_offset,
            json_offset: row.json_offset,
            text_len: row.text_len,
            text: start..end,
            sub_text: sub_start..end,
        });
    }

    tracing::debug!(
        "Timeline map type {} from id {}: {} entries, {} text bytes",
        tp,
        min_id,
        entries.len(),
        text.len()
    );
    Ok(Arc::new(TimelineMap { text, entries }))
}

/// Id of the row whose line contains byte `file_pos` of the export file of
/// type `tp`: the row with the greatest line offset not above `file_pos`.
pub fn get_id_from_position(
    pool: &SqlPool,
    registry: &TimelineRegistry,
    tp: u32,
    is_json: bool,
    file_pos: u64,
) -> Result<u64> {
    let size = registry.file_size(tp, is_json)?;
    let out_of_range = Error::PositionOutOfRange {
        tp,
        pos: file_pos,
        size,
    };
    if file_pos >= size {
        return Err(out_of_range);
    }

    let values = match (tp == TIMELINE_ALL, is_json) {
        (true, false) => query_numeric(pool, SQL_ID_ALL_UTF8, &[file_pos], 1)?,
        (true, true) => query_numeric(pool, SQL_ID_ALL_JSON, &[file_pos], 1)?,
        (false, false) => query_numeric(pool, SQL_ID_BY_TYPE_UTF8, &[tp as u64, file_pos], 1)?,
        (false, true) => query_numeric(pool, SQL_ID_BY_TYPE_JSON, &[tp as u64, file_pos], 1)?,
    };
    values.first().copied().ok_or(out_of_range)
}
