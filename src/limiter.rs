//! Per-query resource limits
//!
//! A [`QueryLimiter`] is created once per query and shared by every replica
//! task of that query. Each `add_*` call increments a running total and
//! fails as soon as the total goes over its configured limit. A limit of
//! zero disables that check.

use crate::model::{Label, SeriesKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Limits applied to a single query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Maximum distinct series fetched across all replicas
    pub max_series: u64,
    /// Maximum encoded size of all fetched chunks
    pub max_chunk_bytes: u64,
    /// Maximum encoded size of all fetched responses
    pub max_data_bytes: u64,
    /// Maximum number of fetched chunks
    pub max_chunks: u64,
}

impl QueryLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Reason a query was rejected by its limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitError {
    MaxSeries { limit: u64 },
    MaxChunkBytes { limit: u64 },
    MaxDataBytes { limit: u64 },
    MaxChunks { limit: u64 },
}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitError::MaxSeries { limit } => write!(
                f,
                "the query hit the max number of series limit (limit: {} series)",
                limit
            ),
            LimitError::MaxChunkBytes { limit } => write!(
                f,
                "the query hit the aggregated chunks size limit (limit: {} bytes)",
                limit
            ),
            LimitError::MaxDataBytes { limit } => write!(
                f,
                "the query hit the aggregated data size limit (limit: {} bytes)",
                limit
            ),
            LimitError::MaxChunks { limit } => write!(
                f,
                "the query hit the max number of chunks limit (limit: {} chunks)",
                limit
            ),
        }
    }
}

impl std::error::Error for LimitError {}

/// Running totals for one query
#[derive(Debug, Default)]
pub struct QueryLimiter {
    limits: QueryLimits,
    series: Mutex<HashSet<SeriesKey>>,
    chunk_bytes: AtomicU64,
    data_bytes: AtomicU64,
    chunks: AtomicU64,
}

impl QueryLimiter {
    pub fn new(limits: QueryLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn unlimited() -> Self {
        Self::new(QueryLimits::unlimited())
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Record a series. Series already seen by this query are free.
    pub fn add_series(&self, labels: &[Label]) -> Result<(), LimitError> {
        if self.limits.max_series == 0 {
            return Ok(());
        }
        let mut series = self.series.lock();
        series.insert(SeriesKey::from_labels(labels));
        if series.len() as u64 > self.limits.max_series {
            return Err(LimitError::MaxSeries {
                limit: self.limits.max_series,
            });
        }
        Ok(())
    }

    pub fn add_chunk_bytes(&self, bytes: usize) -> Result<(), LimitError> {
        add_checked(&self.chunk_bytes, bytes, self.limits.max_chunk_bytes).map_err(|limit| {
            LimitError::MaxChunkBytes { limit }
        })
    }

    pub fn add_data_bytes(&self, bytes: usize) -> Result<(), LimitError> {
        add_checked(&self.data_bytes, bytes, self.limits.max_data_bytes)
            .map_err(|limit| LimitError::MaxDataBytes { limit })
    }

    pub fn add_chunks(&self, count: usize) -> Result<(), LimitError> {
        add_checked(&self.chunks, count, self.limits.max_chunks)
            .map_err(|limit| LimitError::MaxChunks { limit })
    }

    /// Distinct series recorded so far (only tracked when a series limit is set)
    pub fn series_count(&self) -> usize {
        self.series.lock().len()
    }
}

fn add_checked(counter: &AtomicU64, delta: usize, limit: u64) -> Result<(), u64> {
    if limit == 0 {
        return Ok(());
    }
    let total = counter.fetch_add(delta as u64, Ordering::AcqRel) + delta as u64;
    if total > limit {
        return Err(limit);
    }
    Ok(())
}
