//! Per-query fetch statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Accumulates what a query pulled from the replicas.
///
/// Shared by reference between the engine and whoever reports on the query;
/// all updates are relaxed atomic adds.
#[derive(Debug, Default)]
pub struct QueryStats {
    fetched_series: AtomicU64,
    fetched_chunk_bytes: AtomicU64,
    fetched_data_bytes: AtomicU64,
    fetched_chunks: AtomicU64,
    fetched_samples: AtomicU64,
}

/// Point-in-time copy of [`QueryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatsSnapshot {
    pub fetched_series: u64,
    pub fetched_chunk_bytes: u64,
    pub fetched_data_bytes: u64,
    pub fetched_chunks: u64,
    pub fetched_samples: u64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fetched_series(&self, n: u64) {
        self.fetched_series.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fetched_chunk_bytes(&self, n: u64) {
        self.fetched_chunk_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fetched_data_bytes(&self, n: u64) {
        self.fetched_data_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fetched_chunks(&self, n: u64) {
        self.fetched_chunks.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_fetched_samples(&self, n: u64) {
        self.fetched_samples.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueryStatsSnapshot {
        QueryStatsSnapshot {
            fetched_series: self.fetched_series.load(Ordering::Relaxed),
            fetched_chunk_bytes: self.fetched_chunk_bytes.load(Ordering::Relaxed),
            fetched_data_bytes: self.fetched_data_bytes.load(Ordering::Relaxed),
            fetched_chunks: self.fetched_chunks.load(Ordering::Relaxed),
            fetched_samples: self.fetched_samples.load(Ordering::Relaxed),
        }
    }
}
