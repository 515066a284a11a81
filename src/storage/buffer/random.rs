use super::replacer::{FrameId, Replacer};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Picks a victim uniformly at random among the candidates.
#[derive(Debug)]
pub struct RandomReplacer {
    rng: StdRng,
}

impl RandomReplacer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic choices, for tests.
    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for RandomReplacer {
    fn record_access(&mut self, _frame_id: FrameId) {}

    fn remove(&mut self, _frame_id: FrameId) {}

    fn victim(&mut self, candidates: &[FrameId]) -> Option<FrameId> {
        candidates.choose(&mut self.rng).copied()
    }
}
