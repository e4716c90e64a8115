//! Crash recovery testing for strata.
//!
//! A [`CrashHarness`] keeps the data and log bytes outside any engine. An
//! engine opened through it can be dropped without flushing
//! ([`StorageEngine::simulate_crash`]) and a new engine opened against
//! whatever had reached storage, which runs recovery.
//!
//! The log goes through a [`CrashableBackend`], so a test can also tear a
//! log write part-way through.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::crash::CrashHarness;
//!
//! let harness = CrashHarness::new();
//! let engine = harness.open().unwrap();
//! // ... work
//! harness.crash(engine);
//! let engine = harness.open().unwrap();
//! ```

use crate::fixtures::sample_catalog;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{Config, CoreResult, DiskManager, MemoryCatalog, StorageEngine};
use strata_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

/// Crash trigger shared between a [`CrashableBackend`] and the test
/// driving it.
#[derive(Debug)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }
}

impl CrashSwitch {
    /// Creates a disarmed switch.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Crashes once `bytes` more bytes have been written. The write that
    /// crosses the limit lands only up to it.
    pub fn arm(&self, bytes: u64) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Makes every flush and sync fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Disarms the switch and clears the crashed state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes of `len` that may still be written, or an error once crashed.
    fn admit(&self, len: usize) -> StorageResult<usize> {
        if self.has_crashed() {
            return Err(crash_error("write after simulated crash"));
        }
        let current = self.bytes_written.fetch_add(len as u64, Ordering::SeqCst);
        let limit = self.crash_after_bytes.load(Ordering::SeqCst);
        if current.saturating_add(len as u64) > limit {
            self.crashed.store(true, Ordering::SeqCst);
            return Ok(limit.saturating_sub(current) as usize);
        }
        Ok(len)
    }

    fn check_sync(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(crash_error("sync after simulated crash"));
        }
        if self.fail_on_sync.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(crash_error("simulated crash during sync"));
        }
        Ok(())
    }
}

fn crash_error(message: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Wraps `inner`, crashing when `switch` says so.
    pub fn new(inner: Box<dyn StorageBackend>, switch: Arc<CrashSwitch>) -> Self {
        Self { inner, switch }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let allowed = self.switch.admit(data.len())?;
        if allowed < data.len() {
            if allowed > 0 {
                self.inner.write_at(offset, &data[..allowed])?;
            }
            return Err(crash_error("simulated crash during partial write"));
        }
        self.inner.write_at(offset, data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let allowed = self.switch.admit(data.len())?;
        if allowed < data.len() {
            if allowed > 0 {
                self.inner.append(&data[..allowed])?;
            }
            return Err(crash_error("simulated crash during partial append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.switch.check_sync()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.switch.check_sync()?;
        self.inner.sync()
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(crash_error("resize after simulated crash"));
        }
        self.inner.set_len(new_size)
    }
}

/// Opens engines over storage that outlives them.
pub struct CrashHarness {
    data: InMemoryBackend,
    log: InMemoryBackend,
    log_switch: Arc<CrashSwitch>,
    config: Config,
    catalog: Arc<MemoryCatalog>,
}

impl Default for CrashHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashHarness {
    /// Creates a harness with empty storage, the default configuration and
    /// the sample catalog.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a harness whose engines use `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            data: InMemoryBackend::new(),
            log: InMemoryBackend::new(),
            log_switch: CrashSwitch::new(),
            config,
            catalog: sample_catalog(),
        }
    }

    /// Opens an engine over the harness storage, running recovery. The log
    /// switch is reset first.
    ///
    /// # Errors
    ///
    /// Propagates open and recovery failures.
    pub fn open(&self) -> CoreResult<StorageEngine> {
        self.log_switch.reset();
        self.open_armed()
    }

    /// Opens an engine without resetting the log switch, so a tear armed
    /// beforehand hits recovery itself.
    ///
    /// # Errors
    ///
    /// Propagates open and recovery failures.
    pub fn open_armed(&self) -> CoreResult<StorageEngine> {
        let log = CrashableBackend::new(Box::new(self.log.share()), Arc::clone(&self.log_switch));
        let disk = DiskManager::new(Box::new(self.data.share()), Box::new(log));
        StorageEngine::open_with_disk(
            Arc::new(disk),
            None,
            self.config.clone(),
            self.catalog.clone(),
        )
    }

    /// Kills `engine` without flushing anything.
    pub fn crash(&self, engine: StorageEngine) {
        engine.simulate_crash();
    }

    /// Crashes `engine` and opens a new one.
    ///
    /// # Errors
    ///
    /// Propagates open and recovery failures.
    pub fn crash_and_reopen(&self, engine: StorageEngine) -> CoreResult<StorageEngine> {
        self.crash(engine);
        self.open()
    }

    /// Trigger for tearing log writes.
    pub fn log_switch(&self) -> &CrashSwitch {
        &self.log_switch
    }

    /// Bytes currently in the log.
    pub fn log_len(&self) -> usize {
        self.log.data().len()
    }

    /// Bytes currently in the data file.
    pub fn data_len(&self) -> usize {
        self.data.data().len()
    }
}
