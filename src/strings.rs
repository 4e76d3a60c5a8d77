//! String table - registers text into the `str` table
//!
//! Every string gets the next id from a strictly increasing counter along
//! with its UTF-16 length, UTF-8 byte length and JSON-escaped byte length.
//! Identical strings are not deduplicated.

use crate::storage::bind_multi_i64;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Statement};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Longest string accepted, in UTF-16 code units
pub const MAX_STR_WCHARS: usize = 2048;

/// Statement expected by [`StringTable::insert`]
pub const SQL_INSERT_STR: &str =
    "INSERT INTO str (id, osz, csz, cbu, cbj, sz) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Lengths and id of an interned string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrRecord {
    pub id: u64,
    /// UTF-16 code units
    pub wchar_count: u32,
    /// UTF-8 bytes
    pub utf8_len: u32,
    /// UTF-8 bytes once JSON-escaped (no surrounding quotes)
    pub json_len: u32,
}

/// Monotonic id source for the `str` table.
///
/// The counter is only advanced once the row is written, so a failed insert
/// consumes no id.
#[derive(Debug, Default)]
pub struct StringTable {
    last_id: Mutex<u64>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last id handed out (0 before the first insert)
    pub fn last_id(&self) -> u64 {
        *self.last_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert `text` through a statement prepared from [`SQL_INSERT_STR`].
    ///
    /// A non-zero `sub_offset` marks a second string starting at that UTF-16
    /// offset inside `text`; both live in the same row.
    pub fn insert(&self, stmt: &mut Statement<'_>, text: &str, sub_offset: usize) -> Result<StrRecord> {
        let wchar_count = text.encode_utf16().count();
        if wchar_count > MAX_STR_WCHARS {
            return Err(Error::StringTooLong {
                len: wchar_count,
                max: MAX_STR_WCHARS,
            });
        }
        if sub_offset != 0 && (sub_offset >= wchar_count || utf16_to_byte_offset(text, sub_offset).is_none()) {
            return Err(Error::InvalidSubOffset {
                offset: sub_offset,
                len: wchar_count,
            });
        }
        let utf8_len = text.len();
        let json_len = json_escaped_len(text);

        let mut last_id = self.last_id.lock().unwrap_or_else(|e| e.into_inner());
        let id = *last_id + 1;
        bind_multi_i64(
            stmt,
            1,
            &[
                id as i64,
                sub_offset as i64,
                wchar_count as i64,
                utf8_len as i64,
                json_len as i64,
            ],
        )?;
        stmt.raw_bind_parameter(6, text)?;
        stmt.raw_execute()?;
        *last_id = id;

        Ok(StrRecord {
            id,
            wchar_count: wchar_count as u32,
            utf8_len: utf8_len as u32,
            json_len: json_len as u32,
        })
    }
}

/// Read back a stored string and its sub-string offset
pub fn fetch(conn: &Connection, id: u64) -> Result<Option<(String, usize)>> {
    conn.query_row("SELECT sz, osz FROM str WHERE id = ?1", [id as i64], |row| {
        let sz: String = row.get(0)?;
        let osz: i64 = row.get(1)?;
        Ok((sz, osz as usize))
    })
    .optional()
    .map_err(Into::into)
}

/// JSON-escaped form of `text` without the surrounding quotes
pub fn json_escape(text: &str) -> String {
    let quoted = serde_json::Value::from(text).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Byte length of [`json_escape`]`(text)`
pub fn json_escaped_len(text: &str) -> usize {
    if text.bytes().all(|b| b >= 0x20 && b != b'"' && b != b'\\') {
        return text.len();
    }
    json_escape(text).len()
}

/// Convert a UTF-16 offset into a byte offset, if it falls on a char boundary
pub fn utf16_to_byte_offset(text: &str, utf16_offset: usize) -> Option<usize> {
    let mut units = 0;
    for (byte_offset, c) in text.char_indices() {
        if units == utf16_offset {
            return Some(byte_offset);
        }
        if units > utf16_offset {
            return None;
        }
        units += c.len_utf16();
    }
    (units == utf16_offset).then_some(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    fn conn_with_schema() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, []).unwrap();
        }
        conn
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let conn = conn_with_schema();
        let table = StringTable::new();
        let mut stmt = conn.prepare(SQL_INSERT_STR).unwrap();

        let cre = table.insert(&mut stmt, "CRE", 0).unwrap();
        let modified = table.insert(&mut stmt, "MOD", 0).unwrap();
        let again = table.insert(&mut stmt, "CRE", 0).unwrap();

        assert_eq!(cre, StrRecord { id: 1, wchar_count: 3, utf8_len: 3, json_len: 3 });
        assert_eq!(modified.id, 2);
        assert_eq!(again.id, 3);
        assert_eq!(table.last_id(), 3);
    }

    #[test]
    fn test_lengths_for_non_ascii_and_escapes() {
        let conn = conn_with_schema();
        let table = StringTable::new();
        let mut stmt = conn.prepare(SQL_INSERT_STR).unwrap();

        let rec = table.insert(&mut stmt, "C:\\temp\\\"ä\"\t😀", 0).unwrap();
        assert_eq!(rec.wchar_count, 14);
        assert_eq!(rec.utf8_len, 17);
        // two backslashes, two quotes and a tab gain one byte each
        assert_eq!(rec.json_len, 17 + 5);
        assert_eq!(rec.json_len as usize, json_escape("C:\\temp\\\"ä\"\t😀").len());

        let ctrl = table.insert(&mut stmt, "a\u{1}b", 0).unwrap();
        assert_eq!(ctrl.json_len, 8);
    }

    #[test]
    fn test_sub_offset_is_stored() {
        let conn = conn_with_schema();
        let table = StringTable::new();
        let mut stmt = conn.prepare(SQL_INSERT_STR).unwrap();

        let rec = table.insert(&mut stmt, "\\Device\\file.txt", 8).unwrap();
        let (text, osz) = fetch(&conn, rec.id).unwrap().unwrap();
        assert_eq!(text, "\\Device\\file.txt");
        assert_eq!(osz, 8);
        assert!(fetch(&conn, 999).unwrap().is_none());
    }

    #[test]
    fn test_rejects_too_long_without_consuming_id() {
        let conn = conn_with_schema();
        let table = StringTable::new();
        let mut stmt = conn.prepare(SQL_INSERT_STR).unwrap();

        let max = "x".repeat(MAX_STR_WCHARS);
        assert!(table.insert(&mut stmt, &max, 0).is_ok());

        let too_long = "x".repeat(MAX_STR_WCHARS + 1);
        let err = table.insert(&mut stmt, &too_long, 0).unwrap_err();
        assert!(matches!(err, Error::StringTooLong { len: 2049, max: 2048 }));
        assert_eq!(table.last_id(), 1);

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM str", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_rejects_bad_sub_offset() {
        let conn = conn_with_schema();
        let table = StringTable::new();
        let mut stmt = conn.prepare(SQL_INSERT_STR).unwrap();

        assert!(matches!(table.insert(&mut stmt, "abc", 3), Err(Error::InvalidSubOffset { .. })));
        // inside a surrogate pair
        assert!(matches!(table.insert(&mut stmt, "a😀b", 2), Err(Error::InvalidSubOffset { .. })));
        assert_eq!(table.last_id(), 0);
    }

    #[test]
    fn test_failed_execute_consumes_no_id() {
        let conn = conn_with_schema();
        let table = StringTable::new();
        let mut stmt = conn.prepare(SQL_INSERT_STR).unwrap();
        table.insert(&mut stmt, "one", 0).unwrap();

        conn.execute("INSERT INTO str VALUES (2, 0, 3, 3, 3, 'two')", []).unwrap();
        assert!(matches!(table.insert(&mut stmt, "dup", 0), Err(Error::Storage(_))));
        assert_eq!(table.last_id(), 1);
    }

    #[test]
    fn test_utf16_offsets() {
        assert_eq!(utf16_to_byte_offset("abc", 0), Some(0));
        assert_eq!(utf16_to_byte_offset("abc", 3), Some(3));
        assert_eq!(utf16_to_byte_offset("äb", 1), Some(2));
        assert_eq!(utf16_to_byte_offset("😀b", 1), None);
        assert_eq!(utf16_to_byte_offset("😀b", 2), Some(4));
        assert_eq!(utf16_to_byte_offset("ab", 5), None);
    }
}
