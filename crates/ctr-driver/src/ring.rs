//! Single-producer/single-consumer sample ring.
//!
//! The ring is an index-based arena of 32-bit samples with a read cursor and
//! a write cursor. Interrupt context is the only writer, process context the
//! only reader.
//!
//! # Publication order
//!
//! The writer stores the sample, then publishes the write cursor with
//! `Release`. The reader loads the write cursor with `Acquire` before
//! touching any slot, so every slot it reads is fully written. The reader
//! publishes its own cursor with `Release` after copying out, which hands the
//! slots back to the writer.
//!
//! # Modes
//!
//! - [`RingMode::Bounded`]: the write cursor never wraps; the ring is full
//!   once `capacity` samples have been written.
//! - [`RingMode::Continuous`]: cursors wrap modulo `capacity`. A write may
//!   never make the write cursor equal the read cursor, so at most
//!   `capacity - 1` samples are ever readable.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::{CounterError, Result};

const WORD_BYTES: usize = std::mem::size_of::<u32>();

/// Ring buffer filling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingMode {
    /// Fill once, then stop
    Bounded,
    /// Wrap around, overflow if the reader falls behind
    Continuous,
}

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// A bounded ring has no room left
    Full,
    /// A continuous ring would overwrite unread samples
    Overflow,
}

/// Lock-free SPSC ring of 32-bit samples.
#[derive(Debug)]
pub struct SampleRing {
    slots: Box<[AtomicU32]>,
    mode: RingMode,
    read: AtomicUsize,
    write: AtomicUsize,
}

impl SampleRing {
    /// Allocate a ring of `capacity` samples.
    ///
    /// Allocation failure is reported instead of aborting.
    pub fn new(capacity: usize, mode: RingMode) -> Result<Self> {
        let min = match mode {
            RingMode::Bounded => 1,
            // one slot of slack is always kept free
            RingMode::Continuous => 2,
        };
        if capacity < min {
            return Err(CounterError::invalid_argument(format!(
                "ring capacity {capacity} below minimum {min} for {mode:?} mode"
            )));
        }

        let mut slots: Vec<AtomicU32> = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| CounterError::AllocationFailed { capacity })?;
        slots.extend((0..capacity).map(|_| AtomicU32::new(0)));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mode,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Filling policy.
    pub fn mode(&self) -> RingMode {
        self.mode
    }

    /// Samples currently readable.
    pub fn available(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        match self.mode {
            RingMode::Bounded => write - read,
            RingMode::Continuous => (write + self.capacity() - read) % self.capacity(),
        }
    }

    /// Whether a bounded ring has received its last sample.
    pub fn is_full(&self) -> bool {
        self.mode == RingMode::Bounded && self.write.load(Ordering::Acquire) == self.capacity()
    }

    /// Append one sample. Writer side only.
    pub fn push(&self, sample: u32) -> std::result::Result<(), PushError> {
        let write = self.write.load(Ordering::Relaxed);
        let next = match self.mode {
            RingMode::Bounded => {
                if write == self.capacity() {
                    return Err(PushError::Full);
                }
                write + 1
            }
            RingMode::Continuous => {
                let next = (write + 1) % self.capacity();
                if next == self.read.load(Ordering::Acquire) {
                    return Err(PushError::Overflow);
                }
                next
            }
        };
        self.slots[write].store(sample, Ordering::Relaxed);
        self.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Copy up to `out.len()` samples out of the ring. Reader side only.
    ///
    /// Returns the number of samples copied.
    pub fn pop_into(&self, out: &mut [u32]) -> usize {
        self.pop_each(out.len(), |i, sample| out[i] = sample)
    }

    /// Pop samples straight into `out` as little-endian 4-byte words.
    ///
    /// Trailing bytes that cannot hold a whole word are left untouched.
    /// Returns the number of samples written.
    pub fn pop_le_bytes(&self, out: &mut [u8]) -> usize {
        let words = out.len() / WORD_BYTES;
        self.pop_each(words, |i, sample| {
            out[i * WORD_BYTES..(i + 1) * WORD_BYTES].copy_from_slice(&sample.to_le_bytes());
        })
    }

    fn pop_each(&self, max: usize, mut store: impl FnMut(usize, u32)) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let mut read = self.read.load(Ordering::Relaxed);
        let mut copied = 0;
        while copied < max && read != write {
            store(copied, self.slots[read].load(Ordering::Relaxed));
            copied += 1;
            read = match self.mode {
                RingMode::Bounded => read + 1,
                RingMode::Continuous => (read + 1) % self.capacity(),
            };
        }
        self.read.store(read, Ordering::Release);
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bounded_fills_once() {
        let ring = SampleRing::new(3, RingMode::Bounded).unwrap();
        for i in 0..3 {
            ring.push(i).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(99), Err(PushError::Full));

        let mut out = [0u32; 2];
        assert_eq!(ring.pop_into(&mut out), 2);
        assert_eq!(out, [0, 1]);
        // Draining never makes room in bounded mode
        assert_eq!(ring.push(99), Err(PushError::Full));
        assert_eq!(ring.available(), 1);
    }

    #[test]
    fn test_continuous_keeps_one_slot_slack() {
        let capacity = 8;
        let ring = SampleRing::new(capacity, RingMode::Continuous).unwrap();
        for i in 0..(capacity as u32 - 1) {
            ring.push(i).unwrap();
            assert!(ring.available() < capacity);
        }
        assert_eq!(ring.available(), capacity - 1);
        assert_eq!(ring.push(1000), Err(PushError::Overflow));

        let mut out = vec![0u32; capacity];
        assert_eq!(ring.pop_into(&mut out), capacity - 1);
        assert_eq!(&out[..capacity - 1], &[0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_continuous_wraps() {
        let ring = SampleRing::new(4, RingMode::Continuous).unwrap();
        let mut out = [0u32; 1];
        for i in 0..20u32 {
            ring.push(i).unwrap();
            assert_eq!(ring.pop_into(&mut out), 1);
            assert_eq!(out[0], i);
        }
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_pop_le_bytes_whole_words_only() {
        let ring = SampleRing::new(4, RingMode::Bounded).unwrap();
        ring.push(0x0403_0201).unwrap();
        ring.push(0x0807_0605).unwrap();

        let mut out = [0xffu8; 7];
        assert_eq!(ring.pop_le_bytes(&mut out), 1);
        assert_eq!(out, [1, 2, 3, 4, 0xff, 0xff, 0xff]);
        assert_eq!(ring.available(), 1);

        let mut short = [0u8; 3];
        assert_eq!(ring.pop_le_bytes(&mut short), 0);
        assert_eq!(ring.available(), 1);
    }

    #[test]
    fn test_capacity_validation() {
        assert!(SampleRing::new(0, RingMode::Bounded).is_err());
        assert!(SampleRing::new(1, RingMode::Continuous).is_err());
        assert!(SampleRing::new(1, RingMode::Bounded).is_ok());
    }

    #[test]
    fn test_spsc_threads_preserve_order() {
        let ring = Arc::new(SampleRing::new(16, RingMode::Continuous).unwrap());
        let total = 10_000u32;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut next = 0;
                while next < total {
                    if ring.push(next).is_ok() {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0;
        let mut out = [0u32; 5];
        while expected < total {
            let n = ring.pop_into(&mut out);
            for sample in &out[..n] {
                assert_eq!(*sample, expected);
                expected += 1;
            }
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
