//! # fcindex - Forensic timeline index
//!
//! Indexing and retrieval layer that sits on top of an embedded SQLite store.
//!
//! fcindex provides:
//! - A fixed-size pool of SQLite connections with scoped reserve/return
//! - A single-threaded bulk ingest phase followed by concurrent serving
//! - A string table with strictly increasing ids
//! - Timeline maps over id ranges, packed into one text buffer per request
//! - Byte-addressable virtual export files (UTF-8 and JSON lines) with
//!   offset to row id lookup

pub mod config;
pub mod context;
pub mod events;
pub mod server;
pub mod storage;
pub mod strings;
pub mod timeline;
pub mod ui;

// Re-exports for convenient access
pub use config::FcConfig;
pub use context::{ForensicContext, Forensics};
pub use storage::{PooledConnection, SqlPool, StoreType, POOL_SIZE};
pub use strings::StrRecord;
pub use timeline::{
    Action, IngestSession, TimelineEntry, TimelineEvent, TimelineMap, TimelineRow,
    TimelineTypeInfo,
};

/// Result type alias for fcindex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for fcindex operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Forensic subsystem is not initialized")]
    NotInitialized,

    #[error("Unsupported store type: {0}")]
    UnsupportedStoreType(u32),

    #[error("Failed to open store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("String too long: {len} UTF-16 units (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("Invalid sub-string offset {offset} for string of {len} UTF-16 units")]
    InvalidSubOffset { offset: usize, len: usize },

    #[error("Unknown timeline type: {0}")]
    UnknownTimelineType(u32),

    #[error("Invalid timeline name: {0}")]
    InvalidTimelineName(String),

    #[error("File position {pos} out of range for timeline type {tp} (size {size})")]
    PositionOutOfRange { tp: u32, pos: u64, size: u64 },

    #[error("Line offset {0} does not fit in the export file")]
    LineOffsetOutOfRange(u64),

    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Extended SQLite result code carried by a store error, if any
    pub fn sqlite_code(&self) -> Option<i32> {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(e, _))
            | Error::Open {
                source: rusqlite::Error::SqliteFailure(e, _),
                ..
            } => Some(e.extended_code),
            _ => None,
        }
    }
}
