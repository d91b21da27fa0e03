//! Priority queue for pending requests.
//!
//! A binary max-heap ordered by priority, with FIFO order among entries of
//! equal priority. The tie-break uses the entry's monotonic sequence number
//! so dequeue order is deterministic regardless of insertion interleaving.

use thiserror::Error;

/// Returned by [`PriorityQueue::dequeue`] when the queue holds no entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("queue is empty")]
pub struct EmptyQueueError;

/// Ordering contract for queue entries. Higher `priority` dequeues first;
/// among equal priorities, lower `sequence` (older) dequeues first.
pub trait Prioritized {
    fn priority(&self) -> i32;
    fn sequence(&self) -> u64;
}

/// Binary max-heap over [`Prioritized`] entries.
#[derive(Debug)]
pub struct PriorityQueue<T: Prioritized> {
    heap: Vec<T>,
}

impl<T: Prioritized> PriorityQueue<T> {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts an entry, sifting it up to its heap position.
    pub fn enqueue(&mut self, item: T) {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    /// Removes and returns the highest-priority entry.
    pub fn dequeue(&mut self) -> Result<T, EmptyQueueError> {
        if self.heap.is_empty() {
            return Err(EmptyQueueError);
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop().ok_or(EmptyQueueError)?;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Ok(top)
    }

    /// Returns the highest-priority entry without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Removes and returns every entry, unordered. Used on shutdown to
    /// resolve queued requests without repeated sift work.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.heap)
    }

    /// True when `a` should dequeue before `b`.
    fn before(a: &T, b: &T) -> bool {
        match a.priority().cmp(&b.priority()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => a.sequence() < b.sequence(),
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if Self::before(&self.heap[idx], &self.heap[parent]) {
                self.heap.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut best = idx;
            if left < len && Self::before(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < len && Self::before(&self.heap[right], &self.heap[best]) {
                best = right;
            }
            if best == idx {
                break;
            }
            self.heap.swap(idx, best);
            idx = best;
        }
    }
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
