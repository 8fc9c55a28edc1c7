//! Fixed-capacity sliding window of per-tick usage samples.
//!
//! One sample is appended per collection tick. When the window is full the
//! oldest sample is evicted, so the buffer always holds the most recent
//! `capacity` ticks (canonically 60 ticks of 5 seconds, i.e. 5 minutes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{PoisonError, RwLock};

/// Default number of samples in a full window.
pub const DEFAULT_CAPACITY: usize = 60;

/// One fixed-tick observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Capture instant
    pub timestamp: DateTime<Utc>,
    /// Seconds the screen was on during the tick (never more than the tick length)
    pub screen_on_secs: u32,
    /// Scroll distance accrued since the previous tick
    pub scroll_pixels: u64,
    /// Unlock events during the tick
    pub unlock_count: u32,
    /// Foreground app changes during the tick
    pub app_switches: u32,
    /// Apps observed running during the tick
    pub active_app_ids: BTreeSet<String>,
}

impl Sample {
    /// A zero-valued sample, produced for ticks with no activity.
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            screen_on_secs: 0,
            scroll_pixels: 0,
            unlock_count: 0,
            app_switches: 0,
            active_app_ids: BTreeSet::new(),
        }
    }

    /// Whether anything at all was observed during the tick.
    pub fn is_idle(&self) -> bool {
        self.screen_on_secs == 0
            && self.scroll_pixels == 0
            && self.unlock_count == 0
            && self.app_switches == 0
            && self.active_app_ids.is_empty()
    }
}

/// Bounded FIFO of samples shared between the collection and prediction tasks.
///
/// All mutation happens under a write lock, so readers never observe a
/// partially evicted window.
#[derive(Debug)]
pub struct SlidingWindowBuffer {
    capacity: usize,
    samples: RwLock<VecDeque<Sample>>,
}

impl SlidingWindowBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a sample, evicting from the head until the window fits.
    pub fn add_sample(&self, sample: Sample) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Point-in-time copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.iter().cloned().collect()
    }

    /// Current number of samples (0..=capacity).
    pub fn size(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every sample (manual reset of the window).
    pub fn clear(&self) {
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for SlidingWindowBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use std::thread;

    fn sample_at(offset_secs: i64, unlocks: u32) -> Sample {
        let mut sample = Sample::idle(Utc::now() + Duration::seconds(offset_secs));
        sample.unlock_count = unlocks;
        sample
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = SlidingWindowBuffer::new(60);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.is_empty());
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn test_evicts_oldest_first() {
        let buffer = SlidingWindowBuffer::new(3);
        for i in 0..5 {
            buffer.add_sample(sample_at(i as i64 * 5, i));
        }

        assert_eq!(buffer.size(), 3);
        assert!(buffer.is_full());
        let unlocks: Vec<u32> = buffer.snapshot().iter().map(|s| s.unlock_count).collect();
        assert_eq!(unlocks, vec![2, 3, 4]);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let buffer = SlidingWindowBuffer::new(60);
        for i in 0..500 {
            buffer.add_sample(sample_at(i, 0));
            assert!(buffer.size() <= 60);
        }
        assert_eq!(buffer.size(), 60);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let buffer = SlidingWindowBuffer::new(10);
        buffer.add_sample(sample_at(0, 1));
        let snapshot = buffer.snapshot();
        buffer.add_sample(sample_at(5, 2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.size(), 2);
    }

    #[test]
    fn test_clear() {
        let buffer = SlidingWindowBuffer::new(10);
        buffer.add_sample(sample_at(0, 1));
        buffer.clear();
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = SlidingWindowBuffer::new(0);
        buffer.add_sample(sample_at(0, 1));
        buffer.add_sample(sample_at(5, 2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot()[0].unlock_count, 2);
    }

    #[test]
    fn test_concurrent_writer_and_readers() {
        let buffer = Arc::new(SlidingWindowBuffer::new(60));

        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    buffer.add_sample(sample_at(i as i64, i));
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = buffer.snapshot();
                        assert!(snapshot.len() <= 60);
                        // Insertion order is preserved in every snapshot
                        assert!(snapshot
                            .windows(2)
                            .all(|pair| pair[0].unlock_count < pair[1].unlock_count));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.size(), 60);
    }
}
