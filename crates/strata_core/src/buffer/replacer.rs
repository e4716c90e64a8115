//! Eviction policies for unpinned frames.

use crate::config::ReplacerKind;
use crate::types::FrameId;
use std::collections::{BTreeMap, HashMap};

/// Tracks frames whose pin count is zero and picks eviction victims.
///
/// The buffer pool calls [`unpin`](Replacer::unpin) when a frame's pin count
/// drops to zero and [`pin`](Replacer::pin) when it is pinned again, so the
/// replacer only ever holds frames that are safe to evict.
pub trait Replacer: Send {
    /// Removes a frame from eviction eligibility.
    fn pin(&mut self, frame_id: FrameId);

    /// Makes a frame eligible for eviction.
    fn unpin(&mut self, frame_id: FrameId);

    /// Removes and returns the frame to evict next.
    fn victim(&mut self) -> Option<FrameId>;

    /// Number of evictable frames.
    fn size(&self) -> usize;
}

/// Builds the replacer selected in the configuration.
pub fn make_replacer(kind: ReplacerKind) -> Box<dyn Replacer> {
    match kind {
        ReplacerKind::Lru => Box::new(LruReplacer::new()),
    }
}

/// Least-recently-unpinned replacement.
///
/// Each unpin stamps the frame with a logical clock; the victim is the frame
/// with the oldest stamp.
#[derive(Debug, Default)]
pub struct LruReplacer {
    clock: u64,
    by_frame: HashMap<FrameId, u64>,
    by_stamp: BTreeMap<u64, FrameId>,
}

impl LruReplacer {
    /// Creates an empty replacer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn pin(&mut self, frame_id: FrameId) {
        if let Some(stamp) = self.by_frame.remove(&frame_id) {
            self.by_stamp.remove(&stamp);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        // re-unpinning an evictable frame keeps its original position
        if self.by_frame.contains_key(&frame_id) {
            return;
        }
        self.clock += 1;
        self.by_frame.insert(frame_id, self.clock);
        self.by_stamp.insert(self.clock, frame_id);
    }

    fn victim(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.by_stamp.pop_first()?;
        self.by_frame.remove(&frame_id);
        Some(frame_id)
    }

    fn size(&self) -> usize {
        self.by_frame.len()
    }
}
