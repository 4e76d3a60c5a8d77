//! Forensic context and its lifecycle
//!
//! A [`ForensicContext`] owns everything a store needs: its location, the
//! connection pool, the string-id counter and the timeline type registry.
//! [`Forensics`] publishes at most one context at a time and implements
//! initialize / re-initialize / close.

use crate::config::FcConfig;
use crate::storage::{self, schema, SqlPool, StoreLocation, StoreType, POOL_SIZE};
use crate::strings::{StrRecord, StringTable};
use crate::timeline::{map, IngestSession, TimelineMap, TimelineRegistry, TimelineTypeInfo};
use crate::{Error, Result};
use rusqlite::{Connection, Statement};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// An open forensic store.
///
/// Dropping the context closes its connections and, for
/// [`StoreType::TempFileClose`], removes the store file.
pub struct ForensicContext {
    // Connections must close before the location removes the file.
    pool: SqlPool,
    strings: StringTable,
    registry: TimelineRegistry,
    lock: Mutex<()>,
    config: FcConfig,
    location: StoreLocation,
}

impl ForensicContext {
    /// Open a fresh store of the given type.
    ///
    /// Schema creation runs on the first connection while the pool is in
    /// single-thread mode; the remaining connections are opened afterwards.
    /// Any failure drops what was built so far, including the store file.
    pub fn open(config: &FcConfig, store_type: StoreType) -> Result<Self> {
        let mut location = StoreLocation::resolve(store_type, config)?;
        let pool = SqlPool::new(config.reserve_timeout());
        pool.set_single_thread(true)?;

        let first = open_connection(&location, config)?;
        for stmt in schema::all_schema_statements() {
            first.execute(stmt, [])?;
        }
        pool.add(first)?;
        for _ in 1..POOL_SIZE {
            pool.add(open_connection(&location, config)?)?;
        }
        pool.set_single_thread(false)?;
        location.commit();

        tracing::info!(
            "Forensic store opened: {} at {} ({} connections)",
            store_type,
            location.uri(),
            pool.opened()
        );

        Ok(Self {
            pool,
            strings: StringTable::new(),
            registry: TimelineRegistry::new(),
            lock: Mutex::new(()),
            config: config.clone(),
            location,
        })
    }

    pub fn pool(&self) -> &SqlPool {
        &self.pool
    }

    pub fn store_type(&self) -> StoreType {
        self.location.store_type()
    }

    /// Store file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.location.path()
    }

    pub fn config(&self) -> &FcConfig {
        &self.config
    }

    pub(crate) fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub(crate) fn timeline_registry(&self) -> &TimelineRegistry {
        &self.registry
    }

    // ========== SQL Operations ==========

    /// Execute SQL that returns no rows on a pooled connection
    pub fn exec(&self, sql: &str) -> Result<()> {
        storage::exec(&self.pool, sql)
    }

    /// See [`storage::query_numeric`]
    pub fn query_numeric(&self, sql: &str, inputs: &[u64], max_outputs: usize) -> Result<Vec<u64>> {
        storage::query_numeric(&self.pool, sql, inputs, max_outputs)
    }

    /// Intern a string through a statement prepared from
    /// [`crate::strings::SQL_INSERT_STR`] on a connection of this store.
    pub fn insert_str(&self, stmt: &mut Statement<'_>, text: &str, sub_offset: usize) -> Result<StrRecord> {
        self.strings.insert(stmt, text, sub_offset)
    }

    /// Last string id handed out
    pub fn last_str_id(&self) -> u64 {
        self.strings.last_id()
    }

    // ========== Timeline Operations ==========

    /// Start a bulk ingest. Blocks until other ingest sessions finish and
    /// every outstanding connection has been returned.
    pub fn begin_ingest(&self) -> Result<IngestSession<'_>> {
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        IngestSession::begin(self, guard)
    }

    /// Up to `count` rows of type `tp` (all types for 0) with `id >= min_id`
    pub fn get_map_from_id_range(&self, tp: u32, min_id: u64, count: u64) -> Result<Arc<TimelineMap>> {
        if !self.registry.contains(tp) {
            return Err(Error::UnknownTimelineType(tp));
        }
        map::get_map_from_id_range(&self.pool, tp, min_id, count)
    }

    /// Id of the row whose export line contains byte `file_pos`
    pub fn get_id_from_position(&self, tp: u32, is_json: bool, file_pos: u64) -> Result<u64> {
        map::get_id_from_position(&self.pool, &self.registry, tp, is_json, file_pos)
    }

    pub fn timeline_types(&self) -> Vec<TimelineTypeInfo> {
        self.registry.all()
    }

    pub fn timeline_type(&self, tp: u32) -> Option<TimelineTypeInfo> {
        self.registry.get(tp)
    }

    /// Look up a type by short name, file stem or export file name
    pub fn timeline_type_by_name(&self, name: &str) -> Option<TimelineTypeInfo> {
        self.registry.by_name(name)
    }

    /// Current size of an export file
    pub fn file_size(&self, tp: u32, is_json: bool) -> Result<u64> {
        self.registry.file_size(tp, is_json)
    }

    /// Close the pool. Holders of this context get `PoolClosed` from now on.
    pub fn shutdown(&self) {
        self.pool.close();
    }
}

impl Drop for ForensicContext {
    fn drop(&mut self) {
        self.pool.close();
        tracing::info!("Forensic store closed: {}", self.location.uri());
    }
}

fn open_connection(location: &StoreLocation, config: &FcConfig) -> Result<Connection> {
    let conn = location.connect()?;
    conn.busy_timeout(config.busy_timeout())?;
    if location.path().is_some() {
        conn.execute_batch(schema::FILE_PRAGMAS)?;
    }
    Ok(conn)
}

/// Holder of the single published context
pub struct Forensics {
    config: FcConfig,
    current: Mutex<Option<Arc<ForensicContext>>>,
}

impl Forensics {
    pub fn new(config: FcConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Option<Arc<ForensicContext>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Initialize the subsystem.
    ///
    /// Without `force_reinit` an existing context is returned unchanged.
    /// Otherwise the previous context is closed first; if opening the new
    /// one fails the subsystem stays uninitialized.
    pub fn initialize(&self, store_type: StoreType, force_reinit: bool) -> Result<Arc<ForensicContext>> {
        self.initialize_with(|| Ok(store_type), force_reinit)
    }

    /// [`Forensics::initialize`] with a numeric store type code
    pub fn initialize_code(&self, code: u32, force_reinit: bool) -> Result<Arc<ForensicContext>> {
        self.initialize_with(|| StoreType::try_from(code), force_reinit)
    }

    fn initialize_with(
        &self,
        store_type: impl FnOnce() -> Result<StoreType>,
        force_reinit: bool,
    ) -> Result<Arc<ForensicContext>> {
        let mut current = self.current();
        if let Some(ctx) = current.as_ref() {
            if !force_reinit {
                return Ok(Arc::clone(ctx));
            }
        }
        if let Some(previous) = current.take() {
            previous.shutdown();
            tracing::info!("Forensic subsystem re-initializing");
        }

        let ctx = Arc::new(ForensicContext::open(&self.config, store_type()?)?);
        *current = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Initialize with the configured store type
    pub fn initialize_default(&self) -> Result<Arc<ForensicContext>> {
        self.initialize(self.config.store, false)
    }

    /// The published context, or `NotInitialized`
    pub fn get(&self) -> Result<Arc<ForensicContext>> {
        self.current().as_ref().map(Arc::clone).ok_or(Error::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Unpublish and close the context. Safe to call repeatedly.
    pub fn close(&self) {
        if let Some(ctx) = self.current().take() {
            ctx.shutdown();
            tracing::info!("Forensic subsystem closed");
        }
    }
}

impl Drop for Forensics {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &Path) -> FcConfig {
        FcConfig {
            temp_dir: Some(dir.to_path_buf()),
            ..FcConfig::default()
        }
    }

    #[test]
    fn test_open_memory_store() {
        let ctx = ForensicContext::open(&FcConfig::default(), StoreType::Memory).unwrap();
        assert_eq!(ctx.pool().opened(), POOL_SIZE);
        assert_eq!(ctx.pool().available(), POOL_SIZE);
        assert!(!ctx.pool().is_single_thread());
        assert!(ctx.path().is_none());

        let tables = ctx
            .query_numeric(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('str', 'timeline', 'timeline_raw')",
                &[],
                1,
            )
            .unwrap();
        assert_eq!(tables, vec![3]);
    }

    #[test]
    fn test_memory_store_is_shared_between_connections() {
        let ctx = ForensicContext::open(&FcConfig::default(), StoreType::Memory).unwrap();
        let held: Vec<_> = (0..POOL_SIZE).map(|_| ctx.pool().reserve().unwrap()).collect();
        held[0].execute_batch("CREATE TABLE probe (x INTEGER); INSERT INTO probe VALUES (7)").unwrap();
        let x: i64 = held[POOL_SIZE - 1]
            .query_row("SELECT x FROM probe", [], |r| r.get(0))
            .unwrap();
        assert_eq!(x, 7);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let forensics = Forensics::new(FcConfig::default());
        assert!(matches!(forensics.get(), Err(Error::NotInitialized)));

        let a = forensics.initialize(StoreType::Memory, false).unwrap();
        let b = forensics.initialize(StoreType::Memory, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &forensics.get().unwrap()));
    }

    #[test]
    fn test_initialize_default_uses_configured_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = FcConfig {
            store: StoreType::TempFileNoClose,
            ..temp_config(dir.path())
        };
        let forensics = Forensics::new(config);
        let ctx = forensics.initialize_default().unwrap();
        assert_eq!(ctx.store_type(), StoreType::TempFileNoClose);
        assert!(ctx.path().unwrap().starts_with(dir.path()));
        assert!(Arc::ptr_eq(&ctx, &forensics.initialize_default().unwrap()));
        forensics.close();
    }

    #[test]
    fn test_force_reinit_replaces_context() {
        let forensics = Forensics::new(FcConfig::default());
        let a = forensics.initialize(StoreType::Memory, false).unwrap();
        let b = forensics.initialize(StoreType::Memory, true).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(matches!(a.pool().reserve(), Err(Error::PoolClosed)));
        assert!(b.pool().reserve().is_ok());
    }

    #[test]
    fn test_unsupported_store_type_leaves_uninitialized() {
        let forensics = Forensics::new(FcConfig::default());
        assert!(matches!(
            forensics.initialize_code(7, false),
            Err(Error::UnsupportedStoreType(7))
        ));
        assert!(!forensics.is_initialized());

        forensics.initialize_code(1, false).unwrap();
        assert!(matches!(
            forensics.initialize_code(0, true),
            Err(Error::UnsupportedStoreType(0))
        ));
        assert!(!forensics.is_initialized());
    }

    #[test]
    fn test_open_failure_leaves_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let forensics = Forensics::new(temp_config(&blocker));
        assert!(forensics.initialize(StoreType::TempFileClose, false).is_err());
        assert!(!forensics.is_initialized());
    }

    #[test]
    fn test_close_is_idempotent() {
        let forensics = Forensics::new(FcConfig::default());
        forensics.close();

        let ctx = forensics.initialize(StoreType::Memory, false).unwrap();
        forensics.close();
        forensics.close();
        assert!(!forensics.is_initialized());
        assert!(matches!(forensics.get(), Err(Error::NotInitialized)));
        assert!(matches!(ctx.exec("SELECT 1"), Err(Error::PoolClosed)));
    }

    #[test]
    fn test_temp_file_close_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let forensics = Forensics::new(temp_config(dir.path()));
        let path = {
            let ctx = forensics.initialize(StoreType::TempFileClose, false).unwrap();
            ctx.path().unwrap().to_path_buf()
        };
        assert!(path.exists());
        forensics.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_static_store_is_kept_and_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let forensics = Forensics::new(temp_config(dir.path()));

        let ctx = forensics.initialize(StoreType::TempFileStatic, false).unwrap();
        let path = ctx.path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("fcindex.sqlite3"));
        ctx.exec("INSERT INTO timeline_raw VALUES (1, 1, 1, 1, 1, 1)").unwrap();
        drop(ctx);
        forensics.close();
        assert!(path.exists());

        let ctx = forensics.initialize(StoreType::TempFileStatic, false).unwrap();
        let staged = ctx.query_numeric("SELECT COUNT(*) FROM timeline_raw", &[], 1).unwrap();
        assert_eq!(staged, vec![0]);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let ctx = ForensicContext::open(&FcConfig::default(), StoreType::Memory).unwrap();
        assert!(matches!(ctx.get_map_from_id_range(3, 0, 10), Err(Error::UnknownTimelineType(3))));
        assert!(matches!(ctx.get_id_from_position(3, false, 0), Err(Error::UnknownTimelineType(3))));
        assert!(ctx.get_map_from_id_range(0, 0, 10).unwrap().is_empty());
    }
}
