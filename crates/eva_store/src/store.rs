use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use log::{debug, info};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

use eva_core::{Block, BlockClockApi, EntityKey, EvaError, EvaResult, SchemaManifest};

use crate::config::{DatabaseConfig, EvaConfig, IndexProfile, InsertMode, SchemaConfig};
use crate::db::LastBlock;
use crate::schema::SchemaBuilder;

const DEFAULT_READERS: u32 = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BATCH_ROWS: usize = 400;

/// SQLite-backed bi-temporal attribute store.
///
/// All writes go through one connection. File databases also open a small
/// set of read-only connections so that queries run against WAL snapshots
/// without waiting on the writer.
pub struct EvaStore {
    writer: Arc<Mutex<Connection>>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    schema: SchemaBuilder,
    pub(crate) settings: StoreSettings,
    horizon: Arc<ReadHorizon>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct StoreSettings {
    pub(crate) temporal: bool,
    pub(crate) insert_mode: InsertMode,
    pub(crate) batch_rows: usize,
    pub(crate) default_query_limit: u32,
    pub(crate) max_query_limit: u32,
    pub(crate) sweep_batch_size: u32,
    pub(crate) warn_on_overlap: bool,
}

impl StoreSettings {
    fn from_config(config: &EvaConfig) -> Self {
        let defaults = crate::LimitsConfig::with_defaults();
        let limits = config.limits.clone().unwrap_or(defaults);
        let write = config.write.as_ref();
        Self {
            temporal: config.schema.temporal,
            insert_mode: write.and_then(|cfg| cfg.insert_mode).unwrap_or_default(),
            batch_rows: write
                .and_then(|cfg| cfg.batch_rows)
                .unwrap_or(DEFAULT_BATCH_ROWS)
                .max(1),
            default_query_limit: limits.default_query_limit.unwrap_or(100),
            max_query_limit: limits.max_query_limit.unwrap_or(10_000),
            sweep_batch_size: limits.sweep_batch_size.unwrap_or(5_000).max(1),
            warn_on_overlap: config
                .integrity
                .as_ref()
                .and_then(|cfg| cfg.warn_on_overlap)
                .unwrap_or(true),
        }
    }
}

impl EvaStore {
    pub fn connect(config: &EvaConfig, base_dir: &Path) -> EvaResult<Self> {
        config.validate()?;
        let settings = StoreSettings::from_config(config);
        let schema = SchemaBuilder::new(config.schema);
        let busy_timeout = Duration::from_millis(
            config
                .pool
                .as_ref()
                .and_then(|pool| pool.busy_timeout_ms)
                .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
        );
        let (writer, readers) = match &config.database {
            DatabaseConfig::Memory => {
                let conn = Connection::open_in_memory()?;
                conn.busy_timeout(busy_timeout)?;
                apply_tuning(&conn, config, false)?;
                schema.apply(&conn)?;
                (conn, Vec::new())
            }
            DatabaseConfig::Sqlite { .. } => {
                let path = config.sqlite_path(base_dir)?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|err| EvaError::storage(format!("create db dir: {err}")))?;
                }
                let conn = Connection::open(&path)?;
                conn.busy_timeout(busy_timeout)?;
                apply_tuning(&conn, config, true)?;
                schema.apply(&conn)?;
                let count = config
                    .pool
                    .as_ref()
                    .and_then(|pool| pool.reader_connections)
                    .unwrap_or(DEFAULT_READERS);
                let mut readers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let reader = Connection::open_with_flags(
                        &path,
                        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                    )?;
                    reader.busy_timeout(busy_timeout)?;
                    apply_tuning(&reader, config, false)?;
                    readers.push(Mutex::new(reader));
                }
                info!(
                    "opened {} with {} reader connections",
                    path.display(),
                    readers.len()
                );
                (conn, readers)
            }
        };
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers,
            next_reader: AtomicUsize::new(0),
            schema,
            settings,
            horizon: Arc::new(ReadHorizon::default()),
        })
    }

    pub fn open_in_memory(schema: SchemaConfig) -> EvaResult<Self> {
        Self::connect(&EvaConfig::in_memory().with_schema(schema), Path::new("."))
    }

    pub fn schema_config(&self) -> SchemaConfig {
        self.schema.config()
    }

    pub fn schema_manifest(&self) -> SchemaManifest {
        self.schema.manifest()
    }

    pub fn is_temporal(&self) -> bool {
        self.settings.temporal
    }

    /// Drops every secondary index; primary keys stay. Pair with
    /// [`EvaStore::create_secondary_indexes`] around bulk loads.
    pub fn drop_secondary_indexes(&self) -> EvaResult<()> {
        self.with_writer(|conn| {
            for statement in self.schema.drop_index_statements() {
                conn.execute_batch(&statement)?;
            }
            Ok(())
        })
    }

    pub fn create_secondary_indexes(&self) -> EvaResult<()> {
        self.with_writer(|conn| {
            for statement in self.schema.create_index_statements() {
                conn.execute_batch(&statement)?;
            }
            conn.execute_batch("ANALYZE")?;
            Ok(())
        })?;
        info!(
            "rebuilt secondary indexes for {}",
            self.schema.variant_name()
        );
        Ok(())
    }

    /// Names of the secondary indexes present in the database file.
    pub fn existing_indexes(&self) -> EvaResult<Vec<String>> {
        self.with_writer(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'index' \
                 AND sql IS NOT NULL ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    pub fn index_profile(&self) -> IndexProfile {
        self.schema.config().index_profile
    }

    /// Registers `at` as an in-flight read horizon until the pin drops.
    pub fn pin_block(&self, at: Block) -> EvaResult<ReadPin> {
        ReadHorizon::pin(&self.horizon, at)
    }

    /// Runs `func` with the oldest pinned block while no new pin can be taken.
    /// Lock order is horizon then writer; pins never wait on the writer.
    pub(crate) fn with_horizon_held<T>(
        &self,
        func: impl FnOnce(Option<Block>) -> EvaResult<T>,
    ) -> EvaResult<T> {
        self.horizon.hold(func)
    }

    /// Row limit applied by callers that do not choose one.
    pub fn default_query_limit(&self) -> u32 {
        self.settings.default_query_limit
    }

    pub(crate) fn effective_limit(&self, limit: u32) -> u32 {
        limit.min(self.settings.max_query_limit)
    }

    pub(crate) fn with_writer<T>(
        &self,
        func: impl FnOnce(&mut Connection) -> EvaResult<T>,
    ) -> EvaResult<T> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| EvaError::storage("writer connection poisoned"))?;
        func(&mut guard)
    }

    /// Runs `func` in an immediate transaction on the writer connection.
    pub(crate) fn with_write_tx<T>(
        &self,
        func: impl FnOnce(&Connection) -> EvaResult<T>,
    ) -> EvaResult<T> {
        self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = func(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Runs `func` in a deferred read transaction so multi-statement reads
    /// observe one snapshot.
    pub(crate) fn with_read_tx<T>(
        &self,
        func: impl FnOnce(&Connection) -> EvaResult<T>,
    ) -> EvaResult<T> {
        if self.readers.is_empty() {
            return self.with_writer(|conn| read_tx(conn, func));
        }
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.readers.len() {
            let slot = &self.readers[(start + offset) % self.readers.len()];
            match slot.try_lock() {
                Ok(mut guard) => return read_tx(&mut guard, func),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => {
                    return Err(EvaError::storage("reader connection poisoned"));
                }
            }
        }
        let slot = &self.readers[start % self.readers.len()];
        let mut guard = slot
            .lock()
            .map_err(|_| EvaError::storage("reader connection poisoned"))?;
        read_tx(&mut guard, func)
    }
}

fn read_tx<T>(
    conn: &mut Connection,
    func: impl FnOnce(&Connection) -> EvaResult<T>,
) -> EvaResult<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
    let value = func(&tx)?;
    tx.commit()?;
    Ok(value)
}

fn apply_tuning(conn: &Connection, config: &EvaConfig, writer: bool) -> EvaResult<()> {
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    let Some(tuning) = &config.tuning else {
        return Ok(());
    };
    if writer {
        if let Some(mode) = &tuning.journal_mode {
            let applied: String =
                conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
            debug!("journal_mode={applied}");
        }
    }
    if let Some(synchronous) = &tuning.synchronous {
        conn.pragma_update(None, "synchronous", synchronous)?;
    }
    if let Some(cache_kib) = tuning.cache_size_kib {
        // Negative values are KiB rather than pages.
        conn.pragma_update(None, "cache_size", -cache_kib.abs())?;
    }
    if let Some(mmap) = tuning.mmap_size_bytes {
        let _: i64 = conn.pragma_update_and_check(None, "mmap_size", mmap, |row| row.get(0))?;
    }
    Ok(())
}

/// Blocks of reads in flight. Sweeps never pass the oldest one.
#[derive(Debug, Default)]
pub(crate) struct ReadHorizon {
    active: Mutex<BTreeMap<i64, usize>>,
}

impl ReadHorizon {
    fn pin(horizon: &Arc<Self>, at: Block) -> EvaResult<ReadPin> {
        let mut active = horizon
            .active
            .lock()
            .map_err(|_| EvaError::storage("read horizon poisoned"))?;
        *active.entry(at.as_i64()).or_insert(0) += 1;
        Ok(ReadPin {
            horizon: Arc::clone(horizon),
            block: at,
        })
    }

    fn hold<T>(&self, func: impl FnOnce(Option<Block>) -> EvaResult<T>) -> EvaResult<T> {
        let active = self
            .active
            .lock()
            .map_err(|_| EvaError::storage("read horizon poisoned"))?;
        func(active.keys().next().copied().map(Block))
    }
}

#[derive(Debug)]
pub struct ReadPin {
    horizon: Arc<ReadHorizon>,
    block: Block,
}

impl ReadPin {
    pub fn block(&self) -> Block {
        self.block
    }
}

impl Drop for ReadPin {
    fn drop(&mut self) {
        if let Ok(mut active) = self.horizon.active.lock() {
            let key = self.block.as_i64();
            if let Some(count) = active.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    active.remove(&key);
                }
            }
        }
    }
}

impl BlockClockApi for EvaStore {
    fn last_block(&self) -> EvaResult<Option<Block>> {
        self.with_read_tx(read_last_block)
    }

    fn advance_block(&self, block: Block) -> EvaResult<()> {
        self.with_write_tx(|conn| store_last_block(conn, block))
    }
}

pub(crate) fn read_last_block(conn: &Connection) -> EvaResult<Option<Block>> {
    let select = Query::select()
        .from(LastBlock::Table)
        .column(LastBlock::Block)
        .and_where(Expr::col(LastBlock::Id).eq(1))
        .to_owned();
    query_opt(conn, &select, |row| row.get::<_, i64>(0)).map(|value| value.map(Block))
}

/// Upserts the singleton; the clock never moves backwards.
pub(crate) fn store_last_block(conn: &Connection, block: Block) -> EvaResult<()> {
    if let Some(current) = read_last_block(conn)? {
        if block < current {
            return Err(EvaError::constraint(format!(
                "block clock at {current}, refusing to move back to {block}"
            )));
        }
    }
    let upsert = Query::insert()
        .into_table(LastBlock::Table)
        .columns([LastBlock::Id, LastBlock::Block])
        .values_panic([1.into(), block.as_i64().into()])
        .on_conflict(
            OnConflict::column(LastBlock::Id)
                .update_column(LastBlock::Block)
                .to_owned(),
        )
        .to_owned();
    exec(conn, &upsert)?;
    Ok(())
}

pub(crate) fn exec<S: RusqliteBinder>(conn: &Connection, stmt: &S) -> EvaResult<usize> {
    let (sql, values) = stmt.build_rusqlite(SqliteQueryBuilder);
    let mut prepared = conn.prepare_cached(&sql)?;
    Ok(prepared.execute(&*values.as_params())?)
}

pub(crate) fn query_all<S, T, F>(conn: &Connection, stmt: &S, map: F) -> EvaResult<Vec<T>>
where
    S: RusqliteBinder,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let (sql, values) = stmt.build_rusqlite(SqliteQueryBuilder);
    let mut prepared = conn.prepare_cached(&sql)?;
    let rows = prepared.query_map(&*values.as_params(), map)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn query_opt<S, T, F>(conn: &Connection, stmt: &S, map: F) -> EvaResult<Option<T>>
where
    S: RusqliteBinder,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    let (sql, values) = stmt.build_rusqlite(SqliteQueryBuilder);
    let mut prepared = conn.prepare_cached(&sql)?;
    Ok(prepared.query_row(&*values.as_params(), map).optional()?)
}

pub(crate) fn entity_key(bytes: Vec<u8>) -> EvaResult<EntityKey> {
    EntityKey::from_slice(&bytes)
        .map_err(|err| EvaError::storage(format!("corrupt entity key column: {err}")))
}

#[cfg(test)]
mod tests {
    use eva_core::{Block, BlockClockApi, EvaError};

    use super::EvaStore;
    use crate::config::SchemaConfig;

    #[test]
    fn block_clock_is_monotonic() {
        let store = EvaStore::open_in_memory(SchemaConfig::default()).expect("store");
        assert_eq!(store.last_block().expect("read"), None);
        store.advance_block(Block(5)).expect("advance");
        store.advance_block(Block(5)).expect("same block");
        store.advance_block(Block(9)).expect("advance");
        assert_eq!(store.last_block().expect("read"), Some(Block(9)));
        let err = store.advance_block(Block(3)).expect_err("regress");
        assert!(matches!(err, EvaError::ConstraintViolation { .. }));
    }

    #[test]
    fn pins_track_oldest_block() {
        let store = EvaStore::open_in_memory(SchemaConfig::default()).expect("store");
        let early = store.pin_block(Block(3)).expect("pin");
        let late = store.pin_block(Block(8)).expect("pin");
        assert_eq!(store.with_horizon_held(Ok).expect("oldest"), Some(Block(3)));
        drop(early);
        assert_eq!(store.with_horizon_held(Ok).expect("oldest"), Some(Block(8)));
        drop(late);
        assert_eq!(store.with_horizon_held(Ok).expect("oldest"), None);
    }

    #[test]
    fn limits_come_from_config() {
        let store = EvaStore::open_in_memory(SchemaConfig::default()).expect("store");
        assert_eq!(store.default_query_limit(), 100);
        assert_eq!(store.effective_limit(50), 50);
        assert_eq!(store.effective_limit(u32::MAX), 10_000);
    }
}
