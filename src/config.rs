use crate::storage::StoreType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FcConfig {
    /// Store used when the caller does not pick one explicitly
    pub store: StoreType,
    /// Directory for temp-file stores (defaults to the system temp dir)
    pub temp_dir: Option<PathBuf>,
    /// File name used by the static temp-file store
    pub static_file_name: String,
    /// Upper bound on waiting for a pooled connection; unset waits forever
    pub reserve_timeout_ms: Option<u64>,
    /// SQLite busy timeout applied to every pooled connection
    pub busy_timeout_ms: u64,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            store: StoreType::Memory,
            temp_dir: None,
            static_file_name: "fcindex.sqlite3".to_string(),
            reserve_timeout_ms: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl FcConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn reserve_timeout(&self) -> Option<Duration> {
        self.reserve_timeout_ms.map(Duration::from_millis)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("fcindex.toml")
}

pub fn load_config(path: Option<&Path>) -> Result<Option<FcConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: FcConfig = toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(config))
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
