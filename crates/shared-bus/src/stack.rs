//! # Event Stack
//!
//! Bounded stack of extent-tracking frames carried by every [`Event`].
//!
//! Each delivery hop pushes one frame describing the sub-range it is working
//! on and the completion to run once that hop returns. Completion pops frames
//! one at a time; a completion may ask for more processing, in which case the
//! service re-queues the event instead of unwinding further.

use std::fmt;
use std::sync::Arc;

use shared_types::{BlockCount, Lba, LBA_INVALID};
use thiserror::Error;

use crate::events::Event;

/// Maximum number of frames an event may carry.
pub const EVENT_STACK_DEPTH: usize = 8;

/// Errors from stack manipulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("Event stack overflow: depth {depth} reached")]
    Overflow { depth: usize },

    #[error("Event stack is empty")]
    Empty,
}

/// What a completion asks the service to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Keep unwinding to the frame below.
    Done,
    /// Stop unwinding and put the event back on the run queue.
    MoreProcessingRequired,
}

/// Completion target for one stack frame.
pub trait EventCompletion: Send + Sync {
    /// Called after `frame` has been popped off `event`.
    fn on_complete(&self, event: &mut Event, frame: &EventStackFrame) -> CompletionStatus;
}

impl<F> EventCompletion for F
where
    F: Fn(&mut Event, &EventStackFrame) -> CompletionStatus + Send + Sync,
{
    fn on_complete(&self, event: &mut Event, frame: &EventStackFrame) -> CompletionStatus {
        self(event, frame)
    }
}

/// One level of the event stack.
#[derive(Clone)]
pub struct EventStackFrame {
    /// First block of the extent this hop covers.
    pub lba: Lba,
    /// Number of blocks in the extent.
    pub block_count: BlockCount,
    /// End of the edge extent the hop was delivered on (server coordinates).
    pub current_offset: Lba,
    /// Start of the edge extent the hop was delivered on (server coordinates).
    pub previous_offset: Lba,
    /// Opaque value handed back to the completion.
    pub context: u64,
    completion: Option<Arc<dyn EventCompletion>>,
}

impl EventStackFrame {
    /// A frame covering `[lba, lba + block_count)` with no completion.
    #[must_use]
    pub fn new(lba: Lba, block_count: BlockCount) -> Self {
        Self {
            lba,
            block_count,
            current_offset: 0,
            previous_offset: 0,
            context: 0,
            completion: None,
        }
    }

    /// Attach a completion and its context.
    #[must_use]
    pub fn with_completion(mut self, completion: Arc<dyn EventCompletion>, context: u64) -> Self {
        self.completion = Some(completion);
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_offsets(mut self, previous_offset: Lba, current_offset: Lba) -> Self {
        self.previous_offset = previous_offset;
        self.current_offset = current_offset;
        self
    }

    pub fn set_extent(&mut self, lba: Lba, block_count: BlockCount) {
        self.lba = lba;
        self.block_count = block_count;
    }

    #[must_use]
    pub fn extent(&self) -> (Lba, BlockCount) {
        (self.lba, self.block_count)
    }

    /// Exclusive end of the extent, saturating.
    #[must_use]
    pub fn end_lba(&self) -> Lba {
        self.lba.saturating_add(self.block_count)
    }

    /// Invalid start address or empty extent.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.lba == LBA_INVALID || self.block_count == 0
    }

    pub(crate) fn completion(&self) -> Option<Arc<dyn EventCompletion>> {
        self.completion.clone()
    }

    #[must_use]
    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }
}

impl fmt::Debug for EventStackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStackFrame")
            .field("lba", &self.lba)
            .field("block_count", &self.block_count)
            .field("current_offset", &self.current_offset)
            .field("previous_offset", &self.previous_offset)
            .field("context", &self.context)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

/// Fixed-capacity stack of frames.
#[derive(Debug, Clone)]
pub struct EventStack {
    frames: Vec<EventStackFrame>,
}

impl Default for EventStack {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: Vec::with_capacity(EVENT_STACK_DEPTH),
        }
    }

    /// Push a frame, refusing to grow past [`EVENT_STACK_DEPTH`].
    pub fn push(&mut self, frame: EventStackFrame) -> Result<(), StackError> {
        if self.frames.len() >= EVENT_STACK_DEPTH {
            return Err(StackError::Overflow {
                depth: EVENT_STACK_DEPTH,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<EventStackFrame> {
        self.frames.pop()
    }

    /// The frame the current hop is working on.
    #[must_use]
    pub fn current(&self) -> Option<&EventStackFrame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut EventStackFrame> {
        self.frames.last_mut()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_balanced() {
        let mut stack = EventStack::new();
        stack.push(EventStackFrame::new(0, 10)).unwrap();
        stack.push(EventStackFrame::new(5, 2)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().unwrap().extent(), (5, 2));

        assert_eq!(stack.pop().unwrap().extent(), (5, 2));
        assert_eq!(stack.current().unwrap().extent(), (0, 10));
        stack.pop();
        assert!(stack.is_empty());
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut stack = EventStack::new();
        for i in 0..EVENT_STACK_DEPTH {
            stack.push(EventStackFrame::new(i as u64, 1)).unwrap();
        }
        let err = stack.push(EventStackFrame::new(99, 1)).unwrap_err();
        assert_eq!(
            err,
            StackError::Overflow {
                depth: EVENT_STACK_DEPTH
            }
        );
        assert_eq!(stack.depth(), EVENT_STACK_DEPTH);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(EventStackFrame::new(LBA_INVALID, 8).is_malformed());
        assert!(EventStackFrame::new(0, 0).is_malformed());
        assert!(!EventStackFrame::new(0, 1).is_malformed());
    }

    #[test]
    fn test_end_lba_saturates() {
        let frame = EventStackFrame::new(u64::MAX - 1, 10);
        assert_eq!(frame.end_lba(), u64::MAX);
        assert_eq!(EventStackFrame::new(100, 156).end_lba(), 256);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn depth_never_exceeds_limit(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
                let mut stack = EventStack::new();
                let mut expected = 0usize;
                for push in ops {
                    if push {
                        let pushed = stack.push(EventStackFrame::new(expected as u64, 1)).is_ok();
                        prop_assert_eq!(pushed, expected < EVENT_STACK_DEPTH);
                        if pushed {
                            expected += 1;
                        }
                    } else {
                        prop_assert_eq!(stack.pop().is_some(), expected > 0);
                        expected = expected.saturating_sub(1);
                    }
                    prop_assert_eq!(stack.depth(), expected);
                    prop_assert!(stack.depth() <= EVENT_STACK_DEPTH);
                }
            }
        }
    }
}
