//! Samples, exemplars, chunks and the series containers carrying them.

use super::labels::Label;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single `(timestamp, value)` point.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp_ms: i64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            value,
            timestamp_ms,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct Exemplar {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(double, tag = "2")]
    pub value: f64,
    #[prost(int64, tag = "3")]
    pub timestamp_ms: i64,
}

impl Exemplar {
    pub fn new(timestamp_ms: i64, value: f64, labels: Vec<Label>) -> Self {
        Self {
            labels,
            value,
            timestamp_ms,
        }
    }
}

/// Raw series as returned by the sample and exemplar query paths.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
    #[prost(message, repeated, tag = "3")]
    pub exemplars: Vec<Exemplar>,
}

/// Encoding of a chunk payload.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, prost::Enumeration,
)]
#[repr(i32)]
pub enum ChunkEncoding {
    Unknown = 0,
    DoubleDelta = 1,
    Varbit = 2,
    Bigchunk = 3,
    PrometheusXor = 4,
}

/// Opaque compressed block of consecutive samples.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct Chunk {
    #[prost(int64, tag = "1")]
    pub start_timestamp_ms: i64,
    #[prost(int64, tag = "2")]
    pub end_timestamp_ms: i64,
    #[prost(enumeration = "ChunkEncoding", tag = "3")]
    pub encoding: i32,
    #[prost(bytes = "bytes", tag = "4")]
    pub data: Bytes,
}

impl Chunk {
    /// Number of samples in the chunk, when the encoding exposes it.
    ///
    /// XOR chunks start with a big-endian u16 sample count; other encodings
    /// are opaque and count as zero.
    pub fn samples_count(&self) -> usize {
        match ChunkEncoding::try_from(self.encoding) {
            Ok(ChunkEncoding::PrometheusXor) if self.data.len() >= 2 => {
                u16::from_be_bytes([self.data[0], self.data[1]]) as usize
            }
            _ => 0,
        }
    }
}

/// A series identity plus its chunk payloads.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct TimeSeriesChunk {
    #[prost(string, tag = "1")]
    pub from_ingester_id: String,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(message, repeated, tag = "3")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "4")]
    pub chunks: Vec<Chunk>,
}

/// Samples of one series in the non-streaming matrix result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    pub labels: Vec<Label>,
    pub samples: Vec<Sample>,
}

pub type Matrix = Vec<SampleStream>;
