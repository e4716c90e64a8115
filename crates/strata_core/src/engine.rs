//! Storage engine facade.
//!
//! [`StorageEngine`] wires the disk manager, log manager, buffer pool,
//! recovery and transaction manager together and keeps the object
//! directory: a chain of header pages, starting at page 0, mapping each
//! table or index oid to its first page (tables) or root (indexes).
//!
//! Directory entries are not logged. Creating a table or an index forces
//! the log and then writes the affected pages straight to disk, so the
//! entry is durable when the call returns.

use crate::buffer::BufferPoolManager;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::disk::{DiskManager, DiskStats};
use crate::error::{CoreError, CoreResult};
use crate::index::BPlusTree;
use crate::page::{HeaderPage, Page, PageKind};
use crate::recovery::{Recovery, RecoveryReport};
use crate::table::TableHeap;
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{Oid, PageId};
use crate::wal::LogManager;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Page id of the first directory page.
pub const HEADER_PAGE_ID: PageId = PageId::new(0);

/// The main engine handle.
///
/// # Opening an Engine
///
/// ```rust,ignore
/// use strata_core::{Config, MemoryCatalog, StorageEngine};
/// use std::sync::Arc;
///
/// let catalog = Arc::new(MemoryCatalog::new().with_table(users, schema));
/// let engine = StorageEngine::open(Path::new("my_db"), Config::default(), catalog)?;
///
/// let mut txn = engine.begin()?;
/// let table = engine.create_table(users, &mut txn)?;
/// table.insert_tuple(&tuple, &mut txn)?;
/// engine.commit(&mut txn)?;
///
/// engine.close()?;
/// ```
///
/// Opening always runs recovery before the engine accepts work.
pub struct StorageEngine {
    config: Config,
    /// Directory lock; `None` for in-memory engines.
    dir: Option<DatabaseDir>,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
    bpm: Arc<BufferPoolManager>,
    txn_manager: TransactionManager,
    catalog: Arc<dyn Catalog>,
    recovery: RecoveryReport,
    /// Serializes directory changes.
    ddl: Mutex<()>,
    is_open: RwLock<bool>,
}

impl StorageEngine {
    /// Opens or creates an engine in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the directory (`DatabaseLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - The log or a page is corrupt, or recovery fails
    /// - I/O errors occur
    pub fn open(path: &Path, config: Config, catalog: Arc<dyn Catalog>) -> CoreResult<Self> {
        use strata_storage::FileBackend;

        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let data = FileBackend::open_with_create_dirs(&dir.data_path())?;
        let log = FileBackend::open_with_create_dirs(&dir.log_path())?;
        let disk = Arc::new(DiskManager::new(Box::new(data), Box::new(log)));
        Self::open_with_disk(disk, Some(dir), config, catalog)
    }

    /// Opens an engine that lives entirely in memory.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus the directory errors.
    pub fn open_in_memory(config: Config, catalog: Arc<dyn Catalog>) -> CoreResult<Self> {
        Self::open_with_disk(Arc::new(DiskManager::in_memory()), None, config, catalog)
    }

    /// Opens an engine over an existing disk manager.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_with_disk(
        disk: Arc<DiskManager>,
        dir: Option<DatabaseDir>,
        config: Config,
        catalog: Arc<dyn Catalog>,
    ) -> CoreResult<Self> {
        disk.bootstrap()?;
        let log = Arc::new(LogManager::new(
            Arc::clone(&disk),
            config.log_buffer_capacity,
        ));
        let records = log.bootstrap()?;
        let bpm = Arc::new(
            BufferPoolManager::new(config.pool_size, Arc::clone(&disk), config.replacer)
                .with_log(Arc::clone(&log)),
        );

        if disk.is_empty()? {
            let guard = bpm.new_page(|id| Page::Header(HeaderPage::new(id)))?;
            if guard.page_id() != HEADER_PAGE_ID {
                return Err(CoreError::page_corruption(format!(
                    "directory bootstrapped at {} instead of {HEADER_PAGE_ID}",
                    guard.page_id()
                )));
            }
            drop(guard);
            bpm.flush_page(HEADER_PAGE_ID)?;
            disk.sync_data()?;
            info!("initialized empty database");
        }

        let recovery = Recovery::new(&bpm, &log).run(&records)?;

        let txn_manager = TransactionManager::new(Arc::clone(&log), config.sync_on_commit);
        txn_manager.resume_after(recovery.max_txn_id);

        info!(
            pool_size = config.pool_size,
            pages = disk.num_pages()?,
            "storage engine opened"
        );
        Ok(Self {
            config,
            dir,
            disk,
            log,
            bpm,
            txn_manager,
            catalog,
            recovery,
            ddl: Mutex::new(()),
            is_open: RwLock::new(true),
        })
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EngineClosed`] after [`close`](Self::close), or
    /// a log error.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txn_manager.begin()
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.txn_manager.commit(txn)
    }

    /// Rolls a transaction back.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::abort`].
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.txn_manager.abort(txn)
    }

    /// Creates table `oid`, whose schema must be known to the catalog.
    ///
    /// The first page is created under `txn`, but the table itself is not
    /// rolled back if `txn` aborts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotFound`] if the catalog has no schema for
    /// `oid`, [`CoreError::TableExists`] if the oid is taken, or buffer,
    /// log and disk errors.
    pub fn create_table(&self, oid: Oid, txn: &mut Transaction) -> CoreResult<TableHeap> {
        self.ensure_open()?;
        let schema = self
            .catalog
            .schema(oid)
            .ok_or(CoreError::TableNotFound { oid })?;

        let _ddl = self.ddl.lock();
        if self.lookup(oid)?.is_some() {
            return Err(CoreError::TableExists { oid });
        }
        let heap = TableHeap::create(
            Arc::clone(&self.bpm),
            Arc::clone(&self.log),
            oid,
            schema,
            txn,
        )?;
        let header_page_id = self.register(oid, heap.first_page_id())?;

        self.log.flush()?;
        self.bpm.flush_page(heap.first_page_id())?;
        self.bpm.flush_page(header_page_id)?;
        self.disk.sync_data()?;
        info!(%oid, first_page_id = %heap.first_page_id(), "table created");
        Ok(heap)
    }

    /// Opens table `oid`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotFound`] if the oid is not in the
    /// directory or the catalog.
    pub fn open_table(&self, oid: Oid) -> CoreResult<TableHeap> {
        self.ensure_open()?;
        let schema = self
            .catalog
            .schema(oid)
            .ok_or(CoreError::TableNotFound { oid })?;
        let (_, first_page_id) = self.lookup(oid)?.ok_or(CoreError::TableNotFound { oid })?;
        Ok(TableHeap::open(
            Arc::clone(&self.bpm),
            Arc::clone(&self.log),
            oid,
            first_page_id,
            schema,
        ))
    }

    /// Creates an empty index registered under `oid`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableExists`] if the oid is taken, or buffer
    /// and disk errors.
    pub fn create_index(&self, oid: Oid) -> CoreResult<BPlusTree> {
        self.ensure_open()?;
        let _ddl = self.ddl.lock();
        if self.lookup(oid)?.is_some() {
            return Err(CoreError::TableExists { oid });
        }
        let header_page_id = self.register(oid, PageId::INVALID)?;
        self.bpm.flush_page(header_page_id)?;
        self.disk.sync_data()?;
        info!(%oid, "index created");
        Ok(BPlusTree::new(Arc::clone(&self.bpm), oid).with_directory(header_page_id))
    }

    /// Opens index `oid`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotFound`] if the oid is not in the
    /// directory.
    pub fn open_index(&self, oid: Oid) -> CoreResult<BPlusTree> {
        self.ensure_open()?;
        let (header_page_id, root) = self.lookup(oid)?.ok_or(CoreError::TableNotFound { oid })?;
        Ok(BPlusTree::open(Arc::clone(&self.bpm), oid, root).with_directory(header_page_id))
    }

    /// Every directory entry as `(oid, first page or root)`.
    ///
    /// # Errors
    ///
    /// Returns buffer pool errors.
    pub fn objects(&self) -> CoreResult<Vec<(Oid, PageId)>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        self.walk_directory(|header| {
            out.extend_from_slice(header.records());
            false
        })?;
        Ok(out)
    }

    /// Forces the log, then writes every dirty page.
    ///
    /// # Errors
    ///
    /// Propagates log and disk failures.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.log.flush()?;
        self.bpm.flush_all_pages()?;
        debug!(next_lsn = %self.log.next_lsn(), "checkpoint");
        Ok(())
    }

    /// Checkpoints and closes the engine. Further calls fail with
    /// [`CoreError::EngineClosed`]; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates the checkpoint failure; the engine stays open then.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.log.flush()?;
        self.bpm.flush_all_pages()?;
        *is_open = false;
        info!("storage engine closed");
        Ok(())
    }

    /// Drops the engine without flushing the log buffer or any page, as if
    /// the process died.
    pub fn simulate_crash(self) {
        *self.is_open.write() = false;
        debug!("simulated crash");
    }

    /// Returns true until the engine is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory of a persistent engine.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// What recovery did when the engine was opened.
    #[must_use]
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Disk I/O counters.
    #[must_use]
    pub fn stats(&self) -> DiskStats {
        self.disk.stats()
    }

    /// The buffer pool.
    #[must_use]
    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// The log manager.
    #[must_use]
    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Transactions begun but not finished.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.txn_manager.active_count()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::EngineClosed)
        }
    }

    /// Finds `oid` in the directory. Returns the header page holding the
    /// entry and the entry's page id.
    fn lookup(&self, oid: Oid) -> CoreResult<Option<(PageId, PageId)>> {
        let mut found = None;
        self.walk_directory(|header| {
            found = header
                .get_record(oid)
                .map(|page_id| (header.page_id(), page_id));
            found.is_some()
        })?;
        Ok(found)
    }

    /// Visits header pages in chain order until `visit` returns true.
    fn walk_directory<F>(&self, mut visit: F) -> CoreResult<()>
    where
        F: FnMut(&HeaderPage) -> bool,
    {
        let mut page_id = HEADER_PAGE_ID;
        while page_id.is_valid() {
            let guard = self.bpm.fetch_page(page_id, PageKind::Header)?;
            let page = guard.read();
            let header = page.as_header()?;
            if visit(header) {
                return Ok(());
            }
            page_id = header.next_page_id();
        }
        Ok(())
    }

    /// Adds a directory entry, extending the chain when every header page
    /// is full. Returns the header page that received the entry.
    fn register(&self, oid: Oid, page_id: PageId) -> CoreResult<PageId> {
        let mut current = HEADER_PAGE_ID;
        loop {
            let guard = self.bpm.fetch_page(current, PageKind::Header)?;
            let next = {
                let page = guard.read();
                let header = page.as_header()?;
                if !header.is_full() {
                    None
                } else {
                    Some(header.next_page_id())
                }
            };
            match next {
                None => {
                    guard.write().as_header_mut()?.insert_record(oid, page_id);
                    return Ok(current);
                }
                Some(next) if next.is_valid() => current = next,
                Some(_) => {
                    let fresh = self.bpm.new_page(|id| {
                        let mut header = HeaderPage::new(id);
                        header.insert_record(oid, page_id);
                        Page::Header(header)
                    })?;
                    let fresh_id = fresh.page_id();
                    guard.write().as_header_mut()?.set_next_page_id(fresh_id);
                    drop(fresh);
                    drop(guard);
                    self.bpm.flush_page(fresh_id)?;
                    self.bpm.flush_page(current)?;
                    debug!(header = %fresh_id, "directory extended");
                    return Ok(fresh_id);
                }
            }
        }
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}
