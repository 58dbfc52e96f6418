//! Bounded per-pipeline ring buffer with a drop-oldest overload policy
//! (spec §5): bar ingress must never block indefinitely, and if it falls
//! behind, it is the queued *work* that is dropped, never the in-memory
//! model already applied to prior bars.

use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::bar::Bar;

/// Policy applied when the ring buffer is full and a new bar arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadPolicy {
    /// Drop the incoming bar; keep what is already queued.
    DropNewest,
    /// Drop the oldest queued bar to make room for the incoming one.
    DropOldest,
}

impl Default for OverloadPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// Outcome of a single `push`, so the pipeline can log/count drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressPushResult {
    Enqueued,
    DroppedNewest,
    DroppedOldest,
}

/// Bounded lock-free queue of bars awaiting processing by one
/// (symbol, timeframe) pipeline.
#[derive(Debug)]
pub struct RingBuffer {
    queue: Arc<ArrayQueue<Bar>>,
    capacity: usize,
    overload_policy: OverloadPolicy,
    dropped: std::sync::atomic::AtomicU64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverloadPolicy::default())
    }

    pub fn with_policy(capacity: usize, overload_policy: OverloadPolicy) -> Self {
        let bounded_capacity = capacity.max(1);
        Self {
            queue: Arc::new(ArrayQueue::new(bounded_capacity)),
            capacity: bounded_capacity,
            overload_policy,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn push(&self, bar: Bar) -> IngressPushResult {
        match self.queue.push(bar) {
            Ok(()) => IngressPushResult::Enqueued,
            Err(returned) => match self.overload_policy {
                OverloadPolicy::DropNewest => {
                    self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    IngressPushResult::DroppedNewest
                }
                OverloadPolicy::DropOldest => {
                    let _ = self.queue.pop();
                    self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if self.queue.push(returned).is_ok() {
                        IngressPushResult::DroppedOldest
                    } else {
                        IngressPushResult::DroppedNewest
                    }
                }
            },
        }
    }

    pub fn pop(&self) -> Option<Bar> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Monotonic count of bars dropped since construction (used for
    /// logging/diagnostics, not correctness).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Timeframe;
    use chrono::Utc;

    fn bar(c: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M5,
            t: Utc::now(),
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 1.0,
        }
    }

    #[test]
    fn drop_oldest_keeps_capacity_and_newest_bar() {
        let ring = RingBuffer::with_policy(2, OverloadPolicy::DropOldest);
        assert_eq!(ring.push(bar(1.0)), IngressPushResult::Enqueued);
        assert_eq!(ring.push(bar(2.0)), IngressPushResult::Enqueued);
        assert_eq!(ring.push(bar(3.0)), IngressPushResult::DroppedOldest);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.dropped_count(), 1);

        let first = ring.pop().unwrap();
        assert!((first.close - 2.0).abs() < 1e-9);
    }

    #[test]
    fn drop_newest_rejects_incoming_bar() {
        let ring = RingBuffer::with_policy(1, OverloadPolicy::DropNewest);
        assert_eq!(ring.push(bar(1.0)), IngressPushResult::Enqueued);
        assert_eq!(ring.push(bar(2.0)), IngressPushResult::DroppedNewest);
        let kept = ring.pop().unwrap();
        assert!((kept.close - 1.0).abs() < 1e-9);
    }
}
