//! Store types and on-disk location resolution

use crate::config::{self, FcConfig};
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static STORE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Backing store flavours selectable at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreType {
    /// In-memory database shared by the pool's connections, lost on close
    Memory,
    /// Unique temp file, deleted on close
    TempFileClose,
    /// Unique temp file, left on disk after close
    TempFileNoClose,
    /// Fixed temp-file path, recreated at init and left on disk after close
    TempFileStatic,
}

impl StoreType {
    pub fn code(&self) -> u32 {
        match self {
            StoreType::Memory => 1,
            StoreType::TempFileClose => 2,
            StoreType::TempFileNoClose => 3,
            StoreType::TempFileStatic => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Memory => "memory",
            StoreType::TempFileClose => "temp-file-close",
            StoreType::TempFileNoClose => "temp-file-no-close",
            StoreType::TempFileStatic => "temp-file-static",
        }
    }

    pub fn all() -> &'static [StoreType] {
        &[
            StoreType::Memory,
            StoreType::TempFileClose,
            StoreType::TempFileNoClose,
            StoreType::TempFileStatic,
        ]
    }
}

impl TryFrom<u32> for StoreType {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        StoreType::all()
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or(Error::UnsupportedStoreType(code))
    }
}

impl FromStr for StoreType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreType::Memory),
            "temp-file-close" | "temp" => Ok(StoreType::TempFileClose),
            "temp-file-no-close" | "keep" => Ok(StoreType::TempFileNoClose),
            "temp-file-static" | "static" => Ok(StoreType::TempFileStatic),
            other => match other.parse::<u32>() {
                Ok(code) => StoreType::try_from(code),
                Err(_) => Err(Error::Config(format!("Unknown store type: {}", s))),
            },
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved location of a store. Removes its file on drop when asked to.
#[derive(Debug)]
pub struct StoreLocation {
    store_type: StoreType,
    uri: String,
    path: Option<PathBuf>,
    remove_on_drop: bool,
}

impl StoreLocation {
    /// Resolve where a store of the given type lives.
    ///
    /// Static stores are deleted first so every initialization starts empty.
    /// The location removes its file on drop until [`StoreLocation::commit`]
    /// is called, so a failed initialization leaves nothing behind.
    pub fn resolve(store_type: StoreType, config: &FcConfig) -> Result<Self> {
        let seq = STORE_SEQ.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();

        let path = match store_type {
            StoreType::Memory => {
                return Ok(Self {
                    store_type,
                    // memdb databases named with a leading '/' are shared per process
                    // and lock like files, so busy timeouts apply between connections.
                    uri: format!("file:/fcindex-{}-{}?vfs=memdb", pid, seq),
                    path: None,
                    remove_on_drop: false,
                });
            }
            StoreType::TempFileClose | StoreType::TempFileNoClose => config
                .temp_dir()
                .join(format!("fcindex-{}-{}.sqlite3", pid, seq)),
            StoreType::TempFileStatic => config.temp_dir().join(&config.static_file_name),
        };

        if let Some(dir) = path.parent() {
            config::ensure_dir(dir)?;
        }
        remove_store_files(&path);

        Ok(Self {
            store_type,
            uri: path.to_string_lossy().to_string(),
            path: Some(path),
            remove_on_drop: true,
        })
    }

    /// Mark initialization as successful; from now on only
    /// `TempFileClose` stores are removed on drop.
    pub fn commit(&mut self) {
        self.remove_on_drop = self.store_type == StoreType::TempFileClose;
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Open a new connection to this store
    pub fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(&self.uri, flags).map_err(|source| Error::Open {
            path: self.uri.clone(),
            source,
        })
    }
}

impl Drop for StoreLocation {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        if let Some(path) = &self.path {
            tracing::debug!("Removing store file {}", path.display());
            remove_store_files(path);
        }
    }
}

fn remove_store_files(path: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let candidate = PathBuf::from(name);
        if candidate.exists() {
            if let Err(e) = std::fs::remove_file(&candidate) {
                tracing::warn!("Failed to remove {}: {}", candidate.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_type_codes() {
        for store_type in StoreType::all() {
            assert_eq!(StoreType::try_from(store_type.code()).unwrap(), *store_type);
        }
        assert!(matches!(StoreType::try_from(0), Err(Error::UnsupportedStoreType(0))));
        assert!(matches!(StoreType::try_from(5), Err(Error::UnsupportedStoreType(5))));
    }

    #[test]
    fn test_store_type_parse() {
        assert_eq!("static".parse::<StoreType>().unwrap(), StoreType::TempFileStatic);
        assert_eq!("2".parse::<StoreType>().unwrap(), StoreType::TempFileClose);
        assert!("9".parse::<StoreType>().is_err());
    }

    #[test]
    fn test_memory_locations_are_distinct() {
        let config = FcConfig::default();
        let a = StoreLocation::resolve(StoreType::Memory, &config).unwrap();
        let b = StoreLocation::resolve(StoreType::Memory, &config).unwrap();
        assert_ne!(a.uri(), b.uri());
        assert!(a.path().is_none());
    }

    #[test]
    fn test_memory_connections_share_one_database() {
        let location = StoreLocation::resolve(StoreType::Memory, &FcConfig::default()).unwrap();
        let first = location.connect().unwrap();
        let second = location.connect().unwrap();
        first.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7)").unwrap();
        let x: i64 = second.query_row("SELECT x FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(x, 7);

        let other = StoreLocation::resolve(StoreType::Memory, &FcConfig::default()).unwrap();
        let isolated = other.connect().unwrap();
        assert!(isolated.query_row("SELECT x FROM t", [], |row| row.get::<_, i64>(0)).is_err());
    }

    #[test]
    fn test_memory_writer_waits_for_reader_instead_of_failing() {
        let location = StoreLocation::resolve(StoreType::Memory, &FcConfig::default()).unwrap();
        let reader = location.connect().unwrap();
        let writer = location.connect().unwrap();
        writer.busy_timeout(std::time::Duration::from_secs(5)).unwrap();
        reader.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1)").unwrap();

        let handle = std::thread::spawn(move || {
            reader.execute_batch("BEGIN").unwrap();
            let _: i64 = reader.query_row("SELECT x FROM t", [], |row| row.get(0)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(100));
            reader.execute_batch("COMMIT").unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        writer.execute("INSERT INTO t VALUES (2)", []).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_uncommitted_location_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = FcConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..FcConfig::default()
        };

        let location = StoreLocation::resolve(StoreType::TempFileNoClose, &config).unwrap();
        let path = location.path().unwrap().to_path_buf();
        location.connect().unwrap().execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        assert!(path.exists());

        drop(location);
        assert!(!path.exists());
    }

    #[test]
    fn test_committed_no_close_location_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = FcConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..FcConfig::default()
        };

        let mut location = StoreLocation::resolve(StoreType::TempFileNoClose, &config).unwrap();
        let path = location.path().unwrap().to_path_buf();
        location.connect().unwrap().execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        location.commit();
        drop(location);
        assert!(path.exists());
    }
}
