//! Page cache.
//!
//! The [`BufferPoolManager`] owns every in-memory page. Callers borrow pages
//! through pinned [`PageGuard`]s; frames with no pins are tracked by a
//! [`Replacer`] and may be evicted, written back first if dirty.

mod pool;
mod replacer;

pub use pool::{BufferPoolManager, PageGuard};
pub use replacer::{make_replacer, LruReplacer, Replacer};
