use super::replacer::{FrameId, Replacer};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Frames by recency of access (least recently used at front)
    lru_list: VecDeque<FrameId>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru_list: VecDeque::with_capacity(capacity),
        }
    }

    fn position(&self, frame_id: FrameId) -> Option<usize> {
        self.lru_list.iter().position(|&f| f == frame_id)
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        if let Some(idx) = self.position(frame_id) {
            self.lru_list.remove(idx);
        }
        self.lru_list.push_back(frame_id);
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(idx) = self.position(frame_id) {
            self.lru_list.remove(idx);
        }
    }

    fn victim(&mut self, candidates: &[FrameId]) -> Option<FrameId> {
        self.lru_list
            .iter()
            .copied()
            .find(|f| candidates.contains(f))
            // Frames never accessed rank oldest of all.
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|f| !self.lru_list.contains(f))
            })
    }
}
