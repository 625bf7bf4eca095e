//! Per-source rejection tracking.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scorer::window_start;
use crate::telemetry::counters;

/// Rejection history for one source address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousSource {
    pub source: IpAddr,
    /// Rejected attempts
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Insertion order, used to break ties
    #[serde(skip)]
    order: u64,
}

/// Tracks repeat offenders.
///
/// Records are retained until the distinct-source cap is reached; past the
/// cap the least recently seen source is evicted.
#[derive(Debug)]
pub struct SuspiciousSourceTracker {
    records: LruCache<IpAddr, SuspiciousSource>,
    next_order: u64,
    evicted: u64,
}

impl SuspiciousSourceTracker {
    /// `max_sources` of 0 leaves the tracker unbounded.
    pub fn new(max_sources: usize) -> Self {
        let records = match NonZeroUsize::new(max_sources) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            records,
            next_order: 0,
            evicted: 0,
        }
    }

    /// Upsert the record for `source` and return its attempt count.
    pub fn record_rejection(&mut self, source: IpAddr, now: DateTime<Utc>) -> u64 {
        if let Some(record) = self.records.get_mut(&source) {
            record.count += 1;
            record.last_seen = now;
            return record.count;
        }

        let order = self.next_order;
        self.next_order += 1;
        let record = SuspiciousSource {
            source,
            count: 1,
            first_seen: now,
            last_seen: now,
            order,
        };

        if let Some((evicted, _)) = self.records.push(source, record) {
            self.evicted += 1;
            counters::source_evicted();
            debug!(source = %evicted, "evicted suspicious source");
        }
        1
    }

    /// Sources first seen within `window` of `now`.
    pub fn count_new_since(&self, now: DateTime<Utc>, window: Duration) -> usize {
        match window_start(now, window) {
            Some(start) => self.records.iter().filter(|(_, r)| r.first_seen > start).count(),
            None => self.records.len(),
        }
    }

    /// Up to `n` sources by attempt count, ties broken by insertion order.
    pub fn top_sources(&self, n: usize) -> Vec<(IpAddr, u64)> {
        let mut ranked: Vec<&SuspiciousSource> = self.records.iter().map(|(_, r)| r).collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.order.cmp(&b.order)));
        ranked.into_iter().take(n).map(|r| (r.source, r.count)).collect()
    }

    /// Copy of every record in insertion order.
    pub fn snapshot(&self) -> Vec<SuspiciousSource> {
        let mut records: Vec<SuspiciousSource> =
            self.records.iter().map(|(_, r)| r.clone()).collect();
        records.sort_by_key(|r| r.order);
        records
    }

    /// Look up a source without refreshing its recency.
    pub fn get(&self, source: &IpAddr) -> Option<&SuspiciousSource> {
        self.records.peek(source)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sources dropped by the distinct-source cap.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
