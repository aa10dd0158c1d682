//! Bounded FIFO of received byte chunks between the reader thread and the
//! consumer. Neither side ever blocks on it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::error::QueueFull;

/// Capacity used by [`crate::session::Session`].
pub const RECEIVE_QUEUE_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct ReceiveQueue {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl ReceiveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends a chunk, or fails without touching the queue when full.
    pub fn push(&self, chunk: Vec<u8>) -> Result<(), QueueFull> {
        let mut chunks = self.lock();
        if chunks.len() >= self.capacity {
            return Err(QueueFull);
        }
        chunks.push_back(chunk);
        Ok(())
    }

    /// Removes the oldest chunk, `None` when empty.
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ReceiveQueue {
    fn default() -> Self {
        Self::new(RECEIVE_QUEUE_CAPACITY)
    }
}
