use bytes::BytesMut;
use std::sync::{Mutex, PoisonError};

const DEFAULT_CAPACITY: usize = 4 * 1024;
const DEFAULT_MAX_POOLED: usize = 256;
const DEFAULT_MAX_RETAINED: usize = 1024 * 1024;

/// Reusable body buffers shared by all requests of a layer.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
    max_retained: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_POOLED, DEFAULT_MAX_RETAINED)
    }

    /// `max_pooled` caps the idle buffers kept; buffers whose capacity grew
    /// past `max_retained` bytes are dropped instead of pooled.
    pub fn with_limits(max_pooled: usize, max_retained: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
            max_retained,
        }
    }

    /// Borrows an empty buffer.
    pub fn get(&self) -> BytesMut {
        let pooled = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => BytesMut::with_capacity(DEFAULT_CAPACITY),
        }
    }

    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_retained {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    /// Number of idle buffers waiting to be borrowed.
    pub fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
