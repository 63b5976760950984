//! Bounded FIFO of tasks waiting for an agent to pick them up.

use std::collections::VecDeque;

use parking_lot::Mutex;
use relay_common::SendTask;

use crate::error::QueueError;

#[derive(Debug)]
struct Slots {
    tasks: VecDeque<SendTask>,
    remaining: usize,
}

/// A fixed-capacity, non-blocking dispatch queue.
///
/// The task list and the remaining-capacity counter change under the same
/// lock, so `occupied() + remaining() == capacity()` holds at every point
/// another caller can observe. Concurrent dequeuers never receive the same
/// task.
#[derive(Debug)]
pub struct DispatchQueue {
    capacity: usize,
    slots: Mutex<Slots>,
}

impl DispatchQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Slots {
                tasks: VecDeque::with_capacity(capacity),
                remaining: capacity,
            }),
        }
    }

    /// Append a task at the tail.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when at capacity; the queue is left unchanged.
    pub fn enqueue(&self, task: SendTask) -> Result<(), QueueError> {
        let mut slots = self.slots.lock();
        if slots.remaining == 0 {
            return Err(QueueError::Full);
        }

        slots.tasks.push_back(task);
        slots.remaining -= 1;
        Ok(())
    }

    /// Remove and return the head.
    ///
    /// # Errors
    ///
    /// [`QueueError::Empty`] when there is nothing queued.
    pub fn dequeue(&self) -> Result<SendTask, QueueError> {
        let mut slots = self.slots.lock();
        let task = slots.tasks.pop_front().ok_or(QueueError::Empty)?;
        slots.remaining += 1;
        Ok(task)
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupied(&self) -> usize {
        self.slots.lock().tasks.len()
    }

    pub fn remaining(&self) -> usize {
        self.slots.lock().remaining
    }

    pub fn is_full(&self) -> bool {
        self.slots.lock().remaining == 0
    }

    /// Occupied and remaining read under one lock.
    pub fn snapshot(&self) -> (usize, usize) {
        let slots = self.slots.lock();
        (slots.tasks.len(), slots.remaining)
    }
}
