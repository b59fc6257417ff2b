//! Bounded message queues.
//!
//! Every bank and controller port talks through [`MessageQueue`]s. Producers
//! must check [`MessageQueue::available`] before pushing; a push into a full
//! queue is a contract violation and returns an error. Reservations let a bank
//! claim output space when it schedules a process and fill it once the
//! process's pipeline latency has elapsed.

use std::collections::VecDeque;

use crate::common::{DirectoryError, Result};

/// Bounded FIFO with slot reservations.
#[derive(Debug, Clone)]
pub struct MessageQueue<T> {
    name: &'static str,
    items: VecDeque<T>,
    capacity: usize,
    reserved: usize,
}

impl<T> MessageQueue<T> {
    /// Creates an empty queue.
    ///
    /// # Arguments
    ///
    /// * `name` - Name used in overflow diagnostics.
    /// * `capacity` - Maximum number of held plus reserved items.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self { name, items: VecDeque::with_capacity(capacity), capacity, reserved: 0 }
    }

    /// Returns the queue's name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no item is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of outstanding reservations.
    pub const fn reserved(&self) -> usize {
        self.reserved
    }

    /// Returns the number of free, unreserved slots.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.items.len() + self.reserved)
    }

    /// Returns true if at least `n` free, unreserved slots remain.
    pub fn has_space(&self, n: usize) -> bool {
        self.available() >= n
    }

    /// Claims `n` slots for later [`push_reserved`](Self::push_reserved) calls.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        if !self.has_space(n) {
            return Err(DirectoryError::QueueFull { queue: self.name });
        }
        self.reserved += n;
        Ok(())
    }

    /// Releases `n` reservations without filling them.
    pub fn unreserve(&mut self, n: usize) {
        self.reserved = self.reserved.saturating_sub(n);
    }

    /// Appends an item into unreserved space.
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.available() == 0 {
            return Err(DirectoryError::QueueFull { queue: self.name });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Appends an item into a previously reserved slot.
    pub fn push_reserved(&mut self, item: T) -> Result<()> {
        if self.reserved == 0 {
            return self.push(item);
        }
        self.reserved -= 1;
        self.items.push_back(item);
        Ok(())
    }

    /// Removes the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Returns the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Iterates over the queued items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Removes and returns every queued item.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}
