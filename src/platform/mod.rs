//! Platform (topology) lookups used to enrich records.
//!
//! A [`PlatformDataManager`] holds the newest [`PlatformSnapshot`] and hands
//! out named [`PlatformInfoTable`]s, one per decoder. Publishing a snapshot
//! swaps it into every started table; decoders read through an atomic
//! pointer load and never wait on a refresh.

pub mod snapshot;

pub use snapshot::{AgentView, PlatformSnapshot, ResourceInfo, ServiceQuery, SnapshotBuilder};

use crate::core::{IngestError, Result};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Read-only topology queries.
///
/// Implementations must be safe to call from every decoder at once and
/// must not block.
pub trait PlatformLookup: Send + Sync {
    /// View of the agent reporting as `stream_tag`.
    fn query_agent(&self, stream_tag: u16) -> Option<AgentView>;

    /// Resource owning `ip` inside `epc_id`.
    fn query_ipv4(&self, epc_id: i32, ip: Ipv4Addr) -> Option<ResourceInfo>;

    /// Resource owning `ip` inside `epc_id`.
    fn query_ipv6(&self, epc_id: i32, ip: Ipv6Addr) -> Option<ResourceInfo>;

    /// Service id behind `query`, 0 when unknown.
    fn query_service(&self, query: &ServiceQuery) -> u32;
}

/// Lookup counters of one table.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PlatformTableStats {
    pub name: String,
    pub version: u64,
    pub hits: u64,
    pub misses: u64,
}

/// One decoder's binding to the platform snapshot.
pub struct PlatformInfoTable {
    name: String,
    current: ArcSwap<PlatformSnapshot>,
    source: Arc<ArcSwap<PlatformSnapshot>>,
    subscribed: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlatformInfoTable {
    fn new(name: String, source: Arc<ArcSwap<PlatformSnapshot>>) -> Self {
        Self {
            name,
            current: ArcSwap::new(source.load_full()),
            source,
            subscribed: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to published snapshots, catching up with the newest one.
    pub fn start(&self) {
        let seen = self.source.load_full();
        self.current.store(Arc::clone(&seen));
        self.subscribed.store(true, Ordering::SeqCst);
        // a publish that ran before the flag flipped skipped this table
        let latest = self.source.load_full();
        if !Arc::ptr_eq(&latest, &seen) {
            let _ = self.current.compare_and_swap(&seen, latest);
        }
        tracing::debug!(table = %self.name, "platform table started");
    }

    /// Stop receiving snapshots; lookups keep using the last one.
    pub fn close(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
        tracing::debug!(table = %self.name, "platform table closed");
    }

    pub fn is_started(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Version of the snapshot lookups currently use.
    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    fn update(&self, snapshot: &Arc<PlatformSnapshot>) {
        if self.is_started() {
            self.current.store(Arc::clone(snapshot));
        }
    }

    #[inline]
    fn count<T>(&self, found: Option<T>) -> Option<T> {
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn stats(&self) -> PlatformTableStats {
        PlatformTableStats {
            name: self.name.clone(),
            version: self.version(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl PlatformLookup for PlatformInfoTable {
    fn query_agent(&self, stream_tag: u16) -> Option<AgentView> {
        self.current.load().agent(stream_tag)
    }

    fn query_ipv4(&self, epc_id: i32, ip: Ipv4Addr) -> Option<ResourceInfo> {
        self.count(self.current.load().ipv4(epc_id, ip))
    }

    fn query_ipv6(&self, epc_id: i32, ip: Ipv6Addr) -> Option<ResourceInfo> {
        self.count(self.current.load().ipv6(epc_id, ip))
    }

    fn query_service(&self, query: &ServiceQuery) -> u32 {
        self.current.load().service(query)
    }
}

/// Owner of the newest snapshot and of every table built from it.
pub struct PlatformDataManager {
    latest: Arc<ArcSwap<PlatformSnapshot>>,
    tables: DashMap<String, Arc<PlatformInfoTable>>,
}

impl Default for PlatformDataManager {
    fn default() -> Self {
        Self::new(PlatformSnapshot::default())
    }
}

impl PlatformDataManager {
    pub fn new(initial: PlatformSnapshot) -> Self {
        Self {
            latest: Arc::new(ArcSwap::from_pointee(initial)),
            tables: DashMap::new(),
        }
    }

    /// Create the table called `name`; names are unique per manager.
    pub fn new_table(&self, name: impl Into<String>) -> Result<Arc<PlatformInfoTable>> {
        let name = name.into();
        match self.tables.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(IngestError::platform(format!(
                "platform table {} already exists",
                name
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let table = Arc::new(PlatformInfoTable::new(name, Arc::clone(&self.latest)));
                slot.insert(Arc::clone(&table));
                Ok(table)
            },
        }
    }

    /// Forget the table called `name`. Returns `false` when there was none.
    pub fn remove_table(&self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Make `snapshot` the newest one and push it to every started table.
    pub fn publish(&self, snapshot: PlatformSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.latest.store(Arc::clone(&snapshot));

        let mut delivered = 0;
        for table in self.tables.iter() {
            if table.is_started() {
                table.update(&snapshot);
                delivered += 1;
            }
        }
        tracing::info!(
            version = snapshot.version(),
            resources = snapshot.resource_count(),
            tables = delivered,
            "published platform snapshot"
        );
    }

    pub fn version(&self) -> u64 {
        self.latest.load().version()
    }

    pub fn table_stats(&self) -> Vec<PlatformTableStats> {
        let mut stats: Vec<_> = self.tables.iter().map(|t| t.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reload `path` every `interval` and publish it.
    ///
    /// A file that fails to load is logged and the previous snapshot stays.
    pub fn spawn_file_refresher(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately; the initial snapshot is already loaded
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let version = manager.version() + 1;
                let load_path = path.clone();
                let loaded = tokio::task::spawn_blocking(move || {
                    PlatformSnapshot::from_file(&load_path, version)
                })
                .await;

                match loaded {
                    Ok(Ok(snapshot)) => manager.publish(snapshot),
                    Ok(Err(e)) => tracing::warn!("Failed to reload platform snapshot {:?}: {}", path, e),
                    Err(e) => tracing::error!("Platform snapshot reload task failed: {}", e),
                }
            }
        })
    }
}
