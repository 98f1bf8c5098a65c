//! Per-partition admission control.
//!
//! Each decoder owns one throttling queue. At most `limit` records are
//! admitted per fixed window; the rest are dropped back to their pool. The
//! limit is the configured throttle split evenly across partitions, so a
//! skewed partition can drop while its siblings stay under their share.

use crate::core::{FlowLogId, IngestError, Result};
use crate::record::{Pooled, Record};
use crate::writer::Writer;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ThrottleCounters {
    pub arrivals: AtomicU64,
    pub admitted: AtomicU64,
    pub dropped: AtomicU64,
    /// Admitted records the writer refused
    pub write_rejected: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThrottleStats {
    pub arrivals: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub write_rejected: u64,
}

impl ThrottleCounters {
    pub fn snapshot(&self) -> ThrottleStats {
        ThrottleStats {
            arrivals: self.arrivals.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            write_rejected: self.write_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-window rate limiter in front of the writer.
pub struct ThrottlingQueue<R: Record> {
    name: String,
    limit: usize,
    window: Duration,
    window_start: Instant,
    in_window: usize,
    writer: Arc<dyn Writer<R>>,
    counters: Arc<ThrottleCounters>,
}

impl<R: Record> ThrottlingQueue<R> {
    /// Admit `throttle / partitions` records per `window`.
    pub fn new(
        name: impl Into<String>,
        throttle: usize,
        partitions: usize,
        window: Duration,
        writer: Arc<dyn Writer<R>>,
    ) -> Result<Self> {
        if partitions == 0 || throttle < partitions {
            return Err(IngestError::InvalidThrottle {
                throttle,
                partitions,
            });
        }
        if window.is_zero() {
            return Err(IngestError::config("throttle window must be positive"));
        }

        Ok(Self {
            name: name.into(),
            limit: throttle / partitions,
            window,
            window_start: Instant::now(),
            in_window: 0,
            writer,
            counters: Arc::new(ThrottleCounters::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn counters(&self) -> Arc<ThrottleCounters> {
        Arc::clone(&self.counters)
    }

    /// Admit or drop `record`, forwarding admitted ones to the writer.
    pub fn send(&mut self, flow_log_id: FlowLogId, record: Pooled<R>) -> bool {
        self.send_at(flow_log_id, record, Instant::now())
    }

    pub fn send_at(&mut self, flow_log_id: FlowLogId, record: Pooled<R>, now: Instant) -> bool {
        match self.admit_at(record, now) {
            Some(record) => {
                self.forward(flow_log_id, record);
                true
            },
            None => false,
        }
    }

    /// Count `record` against the current window.
    ///
    /// Returns the record when admitted; a dropped record goes back to its
    /// pool.
    pub fn admit_at(&mut self, record: Pooled<R>, now: Instant) -> Option<Pooled<R>> {
        self.counters.arrivals.fetch_add(1, Ordering::Relaxed);
        self.roll_window(now);

        if self.in_window >= self.limit {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.in_window += 1;
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        Some(record)
    }

    pub fn admit(&mut self, record: Pooled<R>) -> Option<Pooled<R>> {
        self.admit_at(record, Instant::now())
    }

    /// Hand an admitted record to the writer.
    pub fn forward(&self, flow_log_id: FlowLogId, record: Pooled<R>) {
        if !self.writer.write(flow_log_id, record) {
            self.counters.write_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Advance the window on a flush tick.
    pub fn tick(&mut self) {
        self.roll_window(Instant::now());
    }

    // windows only move forward, in whole steps from the first one
    fn roll_window(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return;
        }
        let steps = elapsed.as_nanos() / self.window.as_nanos();
        let advance = self
            .window
            .checked_mul(u32::try_from(steps).unwrap_or(u32::MAX))
            .unwrap_or(elapsed);
        self.window_start += advance.min(elapsed);
        self.in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MessageType;
    use crate::record::{FillContext, FlowLogInput, FlowLogRecord, RecordPool};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl Writer<FlowLogRecord> for Count {
        fn write(&self, _id: FlowLogId, _row: Pooled<FlowLogRecord>) -> bool {
            self.0.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    fn record(pool: &RecordPool<FlowLogRecord>) -> Pooled<FlowLogRecord> {
        let ctx = FillContext::new(MessageType::TaggedFlow, 1, chrono::Utc::now());
        let mut out = Vec::new();
        FlowLogRecord::decode_into(FlowLogInput::default(), &ctx, pool, &mut out);
        out.pop().unwrap()
    }

    fn queue(throttle: usize, partitions: usize) -> (ThrottlingQueue<FlowLogRecord>, Arc<Count>) {
        let count = Arc::new(Count::default());
        let writer: Arc<dyn Writer<FlowLogRecord>> = Arc::clone(&count) as Arc<dyn Writer<FlowLogRecord>>;
        let queue = ThrottlingQueue::new("l4-0", throttle, partitions, Duration::from_secs(1), writer).unwrap();
        (queue, count)
    }

    #[test]
    fn test_limit_split_across_partitions() {
        let (queue, _) = queue(100, 3);
        assert_eq!(queue.limit(), 33);
        assert!(ThrottlingQueue::<FlowLogRecord>::new(
            "x",
            1,
            2,
            Duration::from_secs(1),
            Arc::new(Count::default()),
        )
        .is_err());
    }

    #[test]
    fn test_admitted_never_exceeds_limit_in_window() {
        let (mut queue, count) = queue(100, 1);
        let pool = RecordPool::new(256);
        let start = Instant::now();

        for i in 0..150 {
            queue.send_at(FlowLogId::L4Flow, record(&pool), start + Duration::from_micros(i));
        }

        let stats = queue.counters().snapshot();
        assert_eq!(stats.arrivals, 150);
        assert_eq!(stats.admitted, 100);
        assert_eq!(stats.dropped, 50);
        assert_eq!(count.0.load(Ordering::Relaxed), 100);
        // dropped records went back to the pool
        assert_eq!(pool.stats().returns, 150);
    }

    #[test]
    fn test_next_window_admits_again() {
        let (mut queue, _) = queue(2, 1);
        let pool = RecordPool::new(8);
        let start = queue.window_start;

        assert!(queue.send_at(FlowLogId::L4Flow, record(&pool), start));
        assert!(queue.send_at(FlowLogId::L4Flow, record(&pool), start));
        assert!(!queue.send_at(FlowLogId::L4Flow, record(&pool), start));

        let later = start + Duration::from_millis(2500);
        assert!(queue.send_at(FlowLogId::L4Flow, record(&pool), later));
        // the window start moved by whole windows
        assert_eq!(queue.window_start, start + Duration::from_secs(2));

        // an older timestamp never rewinds the window
        assert!(queue.send_at(FlowLogId::L4Flow, record(&pool), start));
        assert!(!queue.send_at(FlowLogId::L4Flow, record(&pool), start));
        assert_eq!(queue.window_start, start + Duration::from_secs(2));
    }
}
