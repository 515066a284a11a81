use std::fmt::Debug;

pub type FrameId = usize;

/// Victim selection for the buffer pool.
///
/// The pool decides which frames may be evicted (unpinned, clean before
/// dirty); the replacer only picks among the frames it is offered.
pub trait Replacer: Send + Debug {
    /// Note that the page in `frame_id` was just fetched.
    fn record_access(&mut self, frame_id: FrameId);

    /// Forget `frame_id`; it no longer holds a page.
    fn remove(&mut self, frame_id: FrameId);

    /// Choose one of `candidates`. Returns None if `candidates` is empty.
    fn victim(&mut self, candidates: &[FrameId]) -> Option<FrameId>;
}
