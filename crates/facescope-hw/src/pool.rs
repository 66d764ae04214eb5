//! Preview buffer pool with explicit hand-back.
//!
//! Capture takes a buffer, fills it, hands it to the consumer, and the
//! consumer gives it back once the frame is fully processed. Buffers of the
//! wrong size are dropped on hand-back, so a resolution change drains the
//! pool naturally.

/// Fixed-size pool of reusable byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<Vec<u8>>,
    buffer_len: usize,
    max_buffers: usize,
    allocated: usize,
}

impl BufferPool {
    pub fn new(buffer_len: usize, max_buffers: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_buffers),
            buffer_len,
            max_buffers: max_buffers.max(1),
            allocated: 0,
        }
    }

    /// Total buffers allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Take a buffer of `buffer_len` bytes, reusing a returned one if possible.
    pub fn take(&mut self) -> Vec<u8> {
        match self.free.pop() {
            Some(buf) => buf,
            None => {
                self.allocated += 1;
                vec![0u8; self.buffer_len]
            }
        }
    }

    /// Return a buffer for reuse. Wrong-sized or surplus buffers are dropped.
    pub fn give_back(&mut self, buf: Vec<u8>) {
        if buf.len() != self.buffer_len || self.free.len() >= self.max_buffers {
            return;
        }
        self.free.push(buf);
    }
}
