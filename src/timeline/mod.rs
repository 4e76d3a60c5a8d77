//! Timeline - forensic events laid out as virtual export files
//!
//! Every timeline type has two virtual files, one with plain UTF-8 lines and
//! one with JSON lines. Type 0 is the aggregate view over all types. Rows
//! store the byte offset of their line in both the per-type and the
//! aggregate files, so any byte position maps back to a row without
//! rendering the file.

pub mod export;
pub mod ingest;
pub mod map;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::RwLock;

pub use ingest::{IngestSession, TimelineEvent, TimelineRow};
pub use map::{EntryView, TimelineEntry, TimelineMap};

/// Type id of the aggregate view over every timeline type
pub const TIMELINE_ALL: u32 = 0;

/// Fixed bytes per UTF-8 line in addition to the text
pub const LINE_OVERHEAD_UTF8: u64 = 64;

/// Fixed bytes per JSON line in addition to the escaped text
pub const LINE_OVERHEAD_JSON: u64 = 110;

/// Longest short name of a timeline type
pub const MAX_SHORT_NAME: usize = 6;

/// What happened to the object an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    None,
    Create,
    Modify,
    Read,
    Delete,
}

impl Action {
    pub fn code(&self) -> u32 {
        match self {
            Action::None => 0,
            Action::Create => 1,
            Action::Modify => 2,
            Action::Read => 3,
            Action::Delete => 4,
        }
    }

    /// Three-character code used in export lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "---",
            Action::Create => "CRE",
            Action::Modify => "MOD",
            Action::Read => "RD ",
            Action::Delete => "DEL",
        }
    }

    /// Unknown codes read back as `None`
    pub fn from_code(code: u32) -> Self {
        Action::all()
            .iter()
            .copied()
            .find(|a| a.code() == code)
            .unwrap_or(Action::None)
    }

    pub fn all() -> &'static [Action] {
        &[
            Action::None,
            Action::Create,
            Action::Modify,
            Action::Read,
            Action::Delete,
        ]
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "---" | "none" => Ok(Action::None),
            "cre" | "create" => Ok(Action::Create),
            "mod" | "modify" => Ok(Action::Modify),
            "rd" | "read" => Ok(Action::Read),
            "del" | "delete" => Ok(Action::Delete),
            _ => Err(Error::Config(format!("Unknown timeline action: {}", s))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered timeline type and the current size of its export files
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineTypeInfo {
    pub id: u32,
    pub short_name: String,
    pub utf8_file_name: String,
    pub json_file_name: String,
    pub utf8_size: u64,
    pub json_size: u64,
}

impl TimelineTypeInfo {
    fn new(id: u32, short_name: &str, stem: &str) -> Self {
        Self {
            id,
            short_name: short_name.to_string(),
            utf8_file_name: format!("timeline_{}.txt", stem),
            json_file_name: format!("timeline_{}.json", stem),
            utf8_size: 0,
            json_size: 0,
        }
    }

    pub fn file_size(&self, is_json: bool) -> u64 {
        if is_json { self.json_size } else { self.utf8_size }
    }

    pub fn file_name(&self, is_json: bool) -> &str {
        if is_json { &self.json_file_name } else { &self.utf8_file_name }
    }
}

/// Registered timeline types, indexed by type id
#[derive(Debug)]
pub struct TimelineRegistry {
    types: RwLock<Vec<TimelineTypeInfo>>,
}

impl Default for TimelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineRegistry {
    /// A registry holding only the aggregate type
    pub fn new() -> Self {
        Self {
            types: RwLock::new(vec![TimelineTypeInfo::new(TIMELINE_ALL, "ALL", "all")]),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<TimelineTypeInfo>> {
        self.types.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<TimelineTypeInfo>> {
        self.types.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a type; registering an existing short name returns its id.
    ///
    /// `short_name` is at most six ASCII characters and `stem` names the
    /// export files (`timeline_<stem>.txt` / `.json`).
    pub fn register(&self, short_name: &str, stem: &str) -> Result<u32> {
        let short_ok = !short_name.is_empty()
            && short_name.len() <= MAX_SHORT_NAME
            && short_name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        let stem_ok = !stem.is_empty()
            && stem.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !short_ok || !stem_ok {
            return Err(Error::InvalidTimelineName(format!("{} ({})", short_name, stem)));
        }

        let mut types = self.write();
        let reserved = types
            .get(TIMELINE_ALL as usize)
            .is_some_and(|all| all.short_name.eq_ignore_ascii_case(short_name));
        if reserved {
            return Err(Error::InvalidTimelineName(format!("{} ({})", short_name, stem)));
        }
        if let Some(existing) = types
            .iter()
            .find(|t| t.short_name.eq_ignore_ascii_case(short_name))
        {
            return Ok(existing.id);
        }
        if types
            .iter()
            .any(|t| t.utf8_file_name == format!("timeline_{}.txt", stem))
        {
            return Err(Error::InvalidTimelineName(format!("{} ({})", short_name, stem)));
        }
        let id = types.len() as u32;
        types.push(TimelineTypeInfo::new(id, short_name, stem));
        tracing::debug!("Registered timeline type {} ({}) as {}", short_name, stem, id);
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<TimelineTypeInfo> {
        self.read().get(id as usize).cloned()
    }

    /// Look up by short name, file stem or export file name
    pub fn by_name(&self, name: &str) -> Option<TimelineTypeInfo> {
        let stem = name
            .strip_prefix("timeline_")
            .map(|rest| rest.trim_end_matches(".txt").trim_end_matches(".json"))
            .unwrap_or(name);
        self.read()
            .iter()
            .find(|t| {
                t.short_name.eq_ignore_ascii_case(name)
                    || t.utf8_file_name == name
                    || t.json_file_name == name
                    || t.utf8_file_name == format!("timeline_{}.txt", stem)
            })
            .cloned()
    }

    pub fn all(&self) -> Vec<TimelineTypeInfo> {
        self.read().clone()
    }

    pub fn contains(&self, id: u32) -> bool {
        (id as usize) < self.read().len()
    }

    pub fn file_size(&self, id: u32, is_json: bool) -> Result<u64> {
        self.read()
            .get(id as usize)
            .map(|t| t.file_size(is_json))
            .ok_or(Error::UnknownTimelineType(id))
    }

    /// Current `(utf8_size, json_size)` of every type, indexed by type id
    pub fn sizes(&self) -> Vec<(u64, u64)> {
        self.read().iter().map(|t| (t.utf8_size, t.json_size)).collect()
    }

    /// Replace file sizes with the ones computed by an ingest session
    pub fn set_sizes(&self, sizes: &[(u64, u64)]) {
        let mut types = self.write();
        for (info, (utf8_size, json_size)) in types.iter_mut().zip(sizes) {
            info.utf8_size = *utf8_size;
            info.json_size = *json_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        for action in Action::all() {
            assert_eq!(Action::from_code(action.code()), *action);
            assert_eq!(action.as_str().len(), 3);
        }
        assert_eq!(Action::from_code(99), Action::None);
        assert_eq!("RD".parse::<Action>().unwrap(), Action::Read);
        assert_eq!("create".parse::<Action>().unwrap(), Action::Create);
        assert!("explode".parse::<Action>().is_err());
    }

    #[test]
    fn test_registry_starts_with_aggregate() {
        let registry = TimelineRegistry::new();
        let all = registry.get(TIMELINE_ALL).unwrap();
        assert_eq!(all.utf8_file_name, "timeline_all.txt");
        assert_eq!(all.json_file_name, "timeline_all.json");
        assert_eq!(registry.file_size(TIMELINE_ALL, false).unwrap(), 0);
        assert!(matches!(registry.file_size(1, true), Err(Error::UnknownTimelineType(1))));
    }

    #[test]
    fn test_register_is_idempotent_per_short_name() {
        let registry = TimelineRegistry::new();
        let ntfs = registry.register("NTFS", "ntfs").unwrap();
        let proc = registry.register("Proc", "process").unwrap();
        assert_eq!(ntfs, 1);
        assert_eq!(proc, 2);
        assert_eq!(registry.register("ntfs", "ntfs").unwrap(), ntfs);

        assert_eq!(registry.by_name("timeline_process.json").unwrap().id, proc);
        assert_eq!(registry.by_name("process").unwrap().id, proc);
        assert_eq!(registry.by_name("NTFS").unwrap().id, ntfs);
        assert!(registry.by_name("web").is_none());
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let registry = TimelineRegistry::new();
        assert!(registry.register("", "x").is_err());
        assert!(registry.register("TOOLONG", "x").is_err());
        assert!(registry.register("A\"B", "x").is_err());
        assert!(registry.register("OK", "../x").is_err());
        assert!(registry.register("DUP", "all").is_err());
    }

    #[test]
    fn test_register_rejects_aggregate_short_name() {
        let registry = TimelineRegistry::new();
        for name in ["ALL", "all", "All"] {
            assert!(matches!(
                registry.register(name, "everything"),
                Err(Error::InvalidTimelineName(_))
            ));
        }
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn test_sizes_round_trip() {
        let registry = TimelineRegistry::new();
        registry.register("NTFS", "ntfs").unwrap();
        registry.set_sizes(&[(130, 220), (130, 220)]);
        assert_eq!(registry.sizes(), vec![(130, 220), (130, 220)]);
        assert_eq!(registry.get(1).unwrap().file_size(true), 220);
    }
}
