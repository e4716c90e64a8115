//! Engine configuration.

/// Default number of buffer pool frames.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default number of buffered log bytes before an automatic flush.
pub const DEFAULT_LOG_BUFFER_CAPACITY: usize = 64 * 1024;

/// Replacement policy used by the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacerKind {
    /// Evict the least-recently-unpinned frame.
    #[default]
    Lru,
}

/// Configuration for opening a storage engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of frames in the buffer pool.
    pub pool_size: usize,

    /// Replacement policy for unpinned frames.
    pub replacer: ReplacerKind,

    /// Whether to force the log to disk on every commit and abort.
    pub sync_on_commit: bool,

    /// Buffered log bytes that trigger an automatic flush.
    pub log_buffer_capacity: usize,

    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            replacer: ReplacerKind::Lru,
            sync_on_commit: true,
            log_buffer_capacity: DEFAULT_LOG_BUFFER_CAPACITY,
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of buffer pool frames.
    #[must_use]
    pub const fn pool_size(mut self, frames: usize) -> Self {
        self.pool_size = frames;
        self
    }

    /// Sets the replacement policy.
    #[must_use]
    pub const fn replacer(mut self, kind: ReplacerKind) -> Self {
        self.replacer = kind;
        self
    }

    /// Sets whether to force the log on commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic log flush threshold.
    #[must_use]
    pub const fn log_buffer_capacity(mut self, bytes: usize) -> Self {
        self.log_buffer_capacity = bytes;
        self
    }

    /// Sets whether to create the database directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}
