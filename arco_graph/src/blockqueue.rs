//! Block queue (C3), grounded on `original_source/arco/src/blockqueue.h`: a
//! circular FIFO of fixed-size raw byte blocks, sized in whole blocks so
//! `enqueue`/`dequeue` are always a single contiguous `copy_from_slice`
//! with no wraparound splitting.
//!
//! `arco_core::ringbuf::RingBuf` is the per-sample circular buffer `Delay`/
//! `Allpass` read and write one frame at a time; this is the
//! block-at-a-time counterpart used where whole blocks move between
//! threads, as [`crate::fileio_worker`] uses it to absorb bursts of
//! `FilerecWrite` requests without forcing every one through a blocking
//! disk write before the worker can drain its next request.

/// Capacity is `(count + 1)` blocks, matching the original's reservation of
/// one block it never fills so `head == tail` is unambiguously "empty".
pub struct BlockQueue {
    storage: Vec<u8>,
    blocksize: usize,
    head: usize,
    tail: usize,
}

impl BlockQueue {
    /// `count` is the number of blocks the queue can hold before `enqueue`
    /// starts returning `false`. `zero_filled` pre-fills the queue with
    /// `count` blocks of zeros instead of starting empty, mirroring the
    /// original's `z` constructor argument.
    pub fn new(blocksize: usize, count: usize, zero_filled: bool) -> Self {
        let slots = count + 1;
        Self {
            storage: vec![0u8; slots * blocksize],
            blocksize,
            head: 0,
            tail: if zero_filled { count } else { 0 },
        }
    }

    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    fn slots(&self) -> usize {
        self.storage.len() / self.blocksize
    }

    /// Number of whole blocks currently queued.
    pub fn len(&self) -> usize {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.slots() + self.tail - self.head
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn capacity(&self) -> usize {
        self.slots() - 1
    }

    /// Copies `bytes` in as one block. `bytes.len()` must equal
    /// `blocksize()`. Returns `false` without modifying the queue if it is
    /// already at capacity, where the original would instead assert.
    pub fn enqueue(&mut self, bytes: &[u8]) -> bool {
        debug_assert_eq!(bytes.len(), self.blocksize);
        if self.len() >= self.capacity() {
            return false;
        }
        let at = self.tail * self.blocksize;
        self.storage[at..at + self.blocksize].copy_from_slice(bytes);
        self.tail += 1;
        if self.tail == self.slots() {
            self.tail = 0;
        }
        true
    }

    /// Enqueues one block of zero bytes, used to pad out underruns the way
    /// the original's `enqueue_zeros` pads a jittery source.
    pub fn enqueue_zeros(&mut self) -> bool {
        if self.len() >= self.capacity() {
            return false;
        }
        let at = self.tail * self.blocksize;
        self.storage[at..at + self.blocksize].fill(0);
        self.tail += 1;
        if self.tail == self.slots() {
            self.tail = 0;
        }
        true
    }

    /// Copies the oldest block out into `dst`, which must be exactly
    /// `blocksize()` long. Returns `false` without modifying `dst` if the
    /// queue is empty.
    pub fn dequeue(&mut self, dst: &mut [u8]) -> bool {
        debug_assert_eq!(dst.len(), self.blocksize);
        if self.is_empty() {
            return false;
        }
        let at = self.head * self.blocksize;
        dst.copy_from_slice(&self.storage[at..at + self.blocksize]);
        self.head += 1;
        if self.head == self.slots() {
            self.head = 0;
        }
        true
    }

    /// Discards the oldest block without reading it.
    pub fn toss(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.head += 1;
        if self.head == self.slots() {
            self.head = 0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_round_trips_in_order() {
        let mut q = BlockQueue::new(4, 2, false);
        assert!(q.enqueue(&[1, 2, 3, 4]));
        assert!(q.enqueue(&[5, 6, 7, 8]));
        assert_eq!(q.len(), 2);
        let mut out = [0u8; 4];
        assert!(q.dequeue(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(q.dequeue(&mut out));
        assert_eq!(out, [5, 6, 7, 8]);
        assert!(!q.dequeue(&mut out));
    }

    #[test]
    fn enqueue_fails_at_capacity() {
        let mut q = BlockQueue::new(2, 1, false);
        assert!(q.enqueue(&[9, 9]));
        assert!(!q.enqueue(&[1, 1]));
    }

    #[test]
    fn wraps_around_the_circular_storage() {
        let mut q = BlockQueue::new(1, 2, false);
        let mut out = [0u8; 1];
        for i in 0..10u8 {
            assert!(q.enqueue(&[i]));
            assert!(q.dequeue(&mut out));
            assert_eq!(out, [i]);
        }
    }

    #[test]
    fn zero_filled_queue_starts_full_of_zeros() {
        let mut q = BlockQueue::new(2, 3, true);
        assert_eq!(q.len(), 3);
        let mut out = [9u8; 2];
        assert!(q.dequeue(&mut out));
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn toss_discards_without_reading() {
        let mut q = BlockQueue::new(1, 2, false);
        q.enqueue(&[1]).then_some(()).unwrap();
        q.enqueue(&[2]).then_some(()).unwrap();
        assert!(q.toss());
        let mut out = [0u8; 1];
        assert!(q.dequeue(&mut out));
        assert_eq!(out, [2]);
    }
}
