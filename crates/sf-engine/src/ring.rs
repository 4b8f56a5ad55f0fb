//! Bounded single-producer single-consumer ring
//!
//! Carries async events from the mixer thread to the control thread.
//! Wait-free on both sides; a full ring drops (the caller decides how).
//! Indices are monotonic counters masked into a power-of-two slot array,
//! with acquire/release pairing on the opposite side's index.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct SpscRing<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    mask: usize,
    /// Only advanced by the producer.
    write_pos: AtomicUsize,
    /// Only advanced by the consumer.
    read_pos: AtomicUsize,
}

// SAFETY: each slot is written only by the producer before publishing via
// the release store on write_pos, and taken only by the consumer after the
// matching acquire load. The two sides never touch the same slot
// concurrently.
unsafe impl<T: Send> Sync for SpscRing<T> {}
unsafe impl<T: Send> Send for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring holding at least `min_capacity` entries.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        let slots = (0..capacity).map(|_| UnsafeCell::new(None)).collect();
        Self {
            slots,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Free slots available to the producer.
    #[inline]
    pub fn write_space(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.slots.len() - write.wrapping_sub(read)
    }

    /// Entries available to the consumer.
    #[inline]
    pub fn read_space(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Producer side: enqueue one entry, or hand it back if full.
    pub fn try_write(&self, value: T) -> Result<(), T> {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.slots.len() {
            return Err(value);
        }

        let idx = write & self.mask;
        // SAFETY: this slot is outside the readable region, and we are the
        // only producer.
        unsafe {
            *self.slots[idx].get() = Some(value);
        }
        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side: take the next entry.
    pub fn pop(&self) -> Option<T> {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        if write == read {
            return None;
        }

        let idx = read & self.mask;
        // SAFETY: the producer released this slot with the write_pos
        // store, and we are the only consumer.
        let value = unsafe { (*self.slots[idx].get()).take() };
        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        value
    }

    /// Consumer side: drain everything currently readable.
    pub fn drain<F: FnMut(T)>(&self, mut handler: F) {
        while let Some(v) = self.pop() {
            handler(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let ring: SpscRing<u32> = SpscRing::new(8);
        for i in 0..5 {
            ring.try_write(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_full_ring_rejects() {
        let ring: SpscRing<u32> = SpscRing::new(4);
        for i in 0..4 {
            ring.try_write(i).unwrap();
        }
        assert_eq!(ring.write_space(), 0);
        assert_eq!(ring.try_write(99), Err(99));

        assert_eq!(ring.pop(), Some(0));
        assert!(ring.try_write(99).is_ok());
    }

    #[test]
    fn test_wrapping() {
        let ring: SpscRing<u32> = SpscRing::new(4);
        for round in 0..10u32 {
            ring.try_write(round).unwrap();
            ring.try_write(round + 100).unwrap();
            assert_eq!(ring.pop(), Some(round));
            assert_eq!(ring.pop(), Some(round + 100));
        }
    }

    #[test]
    fn test_cross_thread() {
        use std::sync::Arc;
        let ring: Arc<SpscRing<usize>> = Arc::new(SpscRing::new(64));
        let producer = Arc::clone(&ring);

        let handle = std::thread::spawn(move || {
            for i in 0..10_000 {
                while producer.try_write(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expect = 0;
        while expect < 10_000 {
            if let Some(v) = ring.pop() {
                assert_eq!(v, expect);
                expect += 1;
            }
        }
        handle.join().unwrap();
    }
}
