//! Bounded handoff between the device link and the session task
//!
//! The link tasks push raw samples as packets arrive; the session drains a
//! small batch every tick. The queue is lock-free and bounded: when a burst
//! outruns the consumer the oldest pending samples are dropped, never the
//! newest, so the display stays close to real time.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;

/// Matches the pending window the sensor firmware can burst
pub const DEFAULT_QUEUE_CAPACITY: usize = 4000;

pub struct TransferQueue {
    queue: ArrayQueue<u16>,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl TransferQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append one sample, evicting the oldest pending sample when full
    pub fn push(&self, sample: u16) {
        if self.queue.force_push(sample).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 1000 == 1 {
                warn!("transfer queue overflow, {} samples dropped so far", dropped);
            }
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Append a batch of samples in order
    pub fn extend(&self, samples: &[u16]) {
        for &sample in samples {
            self.push(sample);
        }
    }

    /// Pop up to `max` samples, oldest first
    pub fn drain(&self, max: usize) -> Vec<u16> {
        let mut out = Vec::with_capacity(max.min(self.queue.len()));
        while out.len() < max {
            match self.queue.pop() {
                Some(sample) => out.push(sample),
                None => break,
            }
        }
        out
    }

    /// Discard everything currently pending
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Samples pushed since creation, dropped ones included
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Samples evicted by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
