//! Ping/pong frame buffers.
//!
//! Two [`FrameQueue`]s exist per stream: reads consume the *active* queue
//! while the decode pump fills the *fill* queue; the stream swaps them (by
//! exchanging ownership, never by copying) when the active queue runs dry.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::DecodedPicture;
use crate::frame::Frame;

/// An ordered run of decoded frames awaiting the cursor.
pub struct FrameQueue<P> {
    frames: VecDeque<Arc<Frame<P>>>,
}

impl<P: DecodedPicture> FrameQueue<P> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The frame the cursor will observe next.
    #[inline]
    pub fn front(&self) -> Option<&Arc<Frame<P>>> {
        self.frames.front()
    }

    /// The most recently decoded frame still buffered.
    #[inline]
    pub fn back(&self) -> Option<&Arc<Frame<P>>> {
        self.frames.back()
    }

    pub fn push(&mut self, frame: Arc<Frame<P>>) {
        self.frames.push_back(frame);
    }

    /// Drop the front frame, releasing its picture unless a client still
    /// holds a reference.
    pub fn pop(&mut self) -> Option<Arc<Frame<P>>> {
        self.frames.pop_front()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
