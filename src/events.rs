//! JSON-lines event input
//!
//! One event per line:
//!
//! ```json
//! {"type":"NTFS","time":132539328000000000,"action":"CRE","pid":4,"data":0,"text":"C:\\x.txt","sub_offset":0}
//! ```
//!
//! `type` is the short name of the timeline type; its export files are
//! named after the lowercased short name.

use crate::context::ForensicContext;
use crate::timeline::{Action, TimelineEvent};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

/// One line of event input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub data: u64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sub_offset: usize,
}

/// Parse event records from JSON lines. Blank lines are skipped.
pub fn parse_events(reader: impl BufRead, origin: &str) -> Result<Vec<EventRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EventRecord = serde_json::from_str(&line)
            .map_err(|e| Error::Config(format!("{}:{}: {}", origin, index + 1, e)))?;
        records.push(record);
    }
    Ok(records)
}

/// Load event records from a JSON-lines file
pub fn load_events(path: &Path) -> Result<Vec<EventRecord>> {
    let file = std::fs::File::open(path)?;
    let records = parse_events(std::io::BufReader::new(file), &path.display().to_string())?;
    tracing::info!("Loaded {} events from {}", records.len(), path.display());
    Ok(records)
}

/// Ingest records in one session, registering types on first sight.
///
/// `on_progress` is called with the number of events staged so far.
/// Returns the number of rows appended to the timeline.
pub fn ingest(
    ctx: &ForensicContext,
    records: &[EventRecord],
    mut on_progress: impl FnMut(u64),
) -> Result<u64> {
    let mut session = ctx.begin_ingest()?;
    let mut types: HashMap<String, u32> = HashMap::new();

    for record in records {
        let tp = match types.get(&record.kind) {
            Some(tp) => *tp,
            None => {
                let tp = session.register_type(&record.kind, &record.kind.to_lowercase())?;
                types.insert(record.kind.clone(), tp);
                tp
            }
        };
        let event = TimelineEvent {
            tp,
            timestamp: record.time,
            action: record.action.parse::<Action>()?,
            pid: record.pid,
            data64: record.data,
            text: record.text.clone(),
            sub_offset: record.sub_offset,
        };
        session.add_event(&event)?;
        on_progress(session.staged());
    }

    session.commit()
}
