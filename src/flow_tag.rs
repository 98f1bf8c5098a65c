//! Custom tag dictionary rows.
//!
//! Every distinct `(table, vpc, namespace, tag name, tag value)` seen in
//! admitted records is written once to the flow tag table so queries can
//! list tag names and values without scanning the flow logs. A bounded LRU
//! cache suppresses repeats until the entry expires.

use crate::core::config::FlowTagConfig;
use crate::core::{IngestError, Result};
use crate::record::{assign, Poolable, Record, RecordPool};
use crate::writer::Writer;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Table flow tag rows are written to.
pub const FLOW_TAG_TABLE: &str = "custom_field_value";

/// One row of `flow_tag.custom_field_value`.
#[derive(Debug, Default, Serialize)]
pub struct FlowTag {
    pub time: u32,
    /// Flow-log table the tag was seen in
    pub table: String,
    pub vpc_id: i32,
    pub pod_ns_id: u16,
    pub field_name: String,
    pub field_value: String,
}

impl Poolable for FlowTag {
    fn reset(&mut self) {
        self.time = 0;
        self.table.clear();
        self.vpc_id = 0;
        self.pod_ns_id = 0;
        self.field_name.clear();
        self.field_value.clear();
    }
}

#[derive(Debug, Default)]
pub struct FlowTagCounters {
    pub seen: AtomicU64,
    pub cache_hits: AtomicU64,
    pub written: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowTagStats {
    pub seen: u64,
    pub cache_hits: u64,
    pub written: u64,
}

impl FlowTagCounters {
    pub fn snapshot(&self) -> FlowTagStats {
        FlowTagStats {
            seen: self.seen.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
        }
    }
}

/// Per-decoder flow tag extractor. Not shared between threads.
pub struct FlowTagWriter {
    name: String,
    cache: LruCache<u64, u32>,
    hasher: ahash::RandomState,
    expiry_secs: u32,
    pool: RecordPool<FlowTag>,
    writer: Arc<dyn Writer<FlowTag>>,
    counters: Arc<FlowTagCounters>,
}

impl FlowTagWriter {
    pub fn new(
        name: impl Into<String>,
        config: &FlowTagConfig,
        pool: RecordPool<FlowTag>,
        writer: Arc<dyn Writer<FlowTag>>,
    ) -> Result<Self> {
        let name = name.into();
        let capacity = NonZeroUsize::new(config.cache_size)
            .ok_or_else(|| IngestError::flow_tag(format!("{}: flow_tag.cache_size must be positive", name)))?;
        let expiry_secs = config.cache_flush_timeout.as_secs();
        if expiry_secs == 0 {
            return Err(IngestError::flow_tag(format!(
                "{}: flow_tag.cache_flush_timeout must be at least one second",
                name
            )));
        }

        Ok(Self {
            name,
            cache: LruCache::new(capacity),
            hasher: ahash::RandomState::new(),
            expiry_secs: expiry_secs.min(u64::from(u32::MAX)) as u32,
            pool,
            writer,
            counters: Arc::new(FlowTagCounters::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counters(&self) -> Arc<FlowTagCounters> {
        Arc::clone(&self.counters)
    }

    /// Emit the tags of `record` not written within the expiry period.
    pub fn write_record<R: Record>(&mut self, record: &R) {
        let table = record.flow_log_id();
        let time = record.time();
        let (vpc_id, pod_ns_id) = record
            .universal_tag()
            .map_or((0, 0), |tag| (tag.l3_epc_id, tag.pod_ns_id));

        for (name, value) in record.tags().iter() {
            self.counters.seen.fetch_add(1, Ordering::Relaxed);
            let key = self.hasher.hash_one((table, vpc_id, pod_ns_id, name, value));
            if let Some(written_at) = self.cache.get_mut(&key) {
                // a row time earlier than the cached one counts as fresh
                if time.saturating_sub(*written_at) < self.expiry_secs {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                *written_at = time;
            } else {
                self.cache.put(key, time);
            }

            let mut row = self.pool.acquire();
            row.time = time;
            assign(&mut row.table, table.table_name());
            row.vpc_id = vpc_id;
            row.pod_ns_id = pod_ns_id;
            assign(&mut row.field_name, name);
            assign(&mut row.field_value, value);
            if self.writer.write(table, row) {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
