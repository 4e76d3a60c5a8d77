//! Virtual export files
//!
//! Renders timeline rows as fixed-overhead UTF-8 or JSON lines and serves
//! arbitrary byte windows of the resulting files. Nothing is materialized:
//! a read seeks to the row owning the first byte and renders forward.

use super::{Action, EntryView, LINE_OVERHEAD_JSON, LINE_OVERHEAD_UTF8, MAX_SHORT_NAME};
use crate::context::ForensicContext;
use crate::strings::json_escape;
use crate::Result;
use chrono::DateTime;
use std::io::Write;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_DIFF_SECS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;
const TIME_WIDTH: usize = 23;
const MAX_BATCH: u64 = 0x1000;

/// Render a FILETIME as `YYYY-MM-DD HH:MM:SS UTC`.
///
/// Zero and unrepresentable timestamps render as a blank field ending in
/// `***`, always 23 characters wide.
pub fn format_time(filetime: u64) -> String {
    let placeholder = || format!("{:>width$}", "***", width = TIME_WIDTH);
    if filetime == 0 {
        return placeholder();
    }
    let secs = (filetime / FILETIME_TICKS_PER_SEC) as i64 - FILETIME_UNIX_DIFF_SECS;
    match DateTime::from_timestamp(secs, 0) {
        Some(dt) => {
            let text = dt.format("%Y-%m-%d %H:%M:%S UTC").to_string();
            if text.len() == TIME_WIDTH { text } else { placeholder() }
        }
        None => placeholder(),
    }
}

/// Append one export line for `view` to `out`.
///
/// `short_name` is the short name of the entry's own type, also in the
/// aggregate file.
pub fn render_line(out: &mut Vec<u8>, view: EntryView<'_>, short_name: &str, is_json: bool) {
    let entry = view.entry;
    write_line(
        out,
        short_name,
        entry.action,
        entry.timestamp,
        entry.pid,
        entry.data64,
        view.text,
        is_json,
    );
}

#[allow(clippy::too_many_arguments)]
fn write_line(
    out: &mut Vec<u8>,
    short_name: &str,
    action: Action,
    timestamp: u64,
    pid: u32,
    data64: u64,
    text: &str,
    is_json: bool,
) {
    let short: String = short_name.chars().take(MAX_SHORT_NAME).collect();
    let time = format_time(timestamp);
    // Writing into a Vec cannot fail.
    let _ = if is_json {
        writeln!(
            out,
            "{{\"ty\":\"{:<6}\",\"ac\":\"{}\",\"time\":\"{}\",\"pid\":{:>8},\"hex\":\"{:016x}\",\"desc\":\"{}\"}}",
            short,
            action.as_str(),
            time,
            pid % 100_000_000,
            data64,
            json_escape(text)
        )
    } else {
        writeln!(
            out,
            "{}  {:<6} {} {:>9} {:016x} {}",
            time,
            short,
            action.as_str(),
            pid % 1_000_000_000,
            data64,
            text
        )
    };
}

/// Fixed bytes per line for the given flavour
pub fn line_overhead(is_json: bool) -> u64 {
    if is_json { LINE_OVERHEAD_JSON } else { LINE_OVERHEAD_UTF8 }
}

/// Read up to `len` bytes starting at `offset` from the export file of
/// type `tp`. Reads at or past the end of the file return nothing.
pub fn read(ctx: &ForensicContext, tp: u32, is_json: bool, offset: u64, len: u64) -> Result<Vec<u8>> {
    let size = ctx.file_size(tp, is_json)?;
    if len == 0 || offset >= size {
        return Ok(Vec::new());
    }
    let end = offset.saturating_add(len).min(size);
    let short_names: Vec<String> = ctx.timeline_types().into_iter().map(|t| t.short_name).collect();
    let batch = (len / line_overhead(is_json) + 2).min(MAX_BATCH);

    let mut out = Vec::with_capacity((end - offset) as usize);
    let mut line = Vec::with_capacity(512);
    let mut next_id = ctx.get_id_from_position(tp, is_json, offset)?;

    'batches: loop {
        let map = ctx.get_map_from_id_range(tp, next_id, batch)?;
        let Some(last) = map.last() else {
            break;
        };
        next_id = last.id + 1;

        for view in map.iter() {
            let line_start = view.entry.offset(is_json);
            if line_start >= end {
                break 'batches;
            }
            line.clear();
            let short = short_names
                .get(view.entry.tp as usize)
                .map(String::as_str)
                .unwrap_or("");
            render_line(&mut line, view, short, is_json);

            let line_end = line_start + line.len() as u64;
            if line_end <= offset {
                continue;
            }
            let from = offset.saturating_sub(line_start) as usize;
            let to = (end.min(line_end) - line_start) as usize;
            out.extend_from_slice(&line[from..to]);
        }
    }

    tracing::debug!(
        "Export read type {} ({}) at {}: {} of {} bytes",
        tp,
        if is_json { "json" } else { "utf8" },
        offset,
        out.len(),
        len
    );
    Ok(out)
}

/// Render a complete export file
pub fn render_file(ctx: &ForensicContext, tp: u32, is_json: bool) -> Result<Vec<u8>> {
    let size = ctx.file_size(tp, is_json)?;
    read(ctx, tp, is_json, 0, size)
}
