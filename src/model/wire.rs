//! Request/response messages exchanged with ingesters.

use super::matchers::{MatchType, Matcher};
use super::series::{Matrix, SampleStream, TimeSeries, TimeSeriesChunk};
use crate::{Error, Result};
use prost::Message;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct LabelMatcher {
    #[prost(enumeration = "MatchType", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub value: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct LabelMatchers {
    #[prost(message, repeated, tag = "1")]
    pub matchers: Vec<LabelMatcher>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct QueryRequest {
    #[prost(int64, tag = "1")]
    pub start_timestamp_ms: i64,
    #[prost(int64, tag = "2")]
    pub end_timestamp_ms: i64,
    #[prost(message, repeated, tag = "3")]
    pub matchers: Vec<LabelMatcher>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct QueryResponse {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct ExemplarQueryRequest {
    #[prost(int64, tag = "1")]
    pub start_timestamp_ms: i64,
    #[prost(int64, tag = "2")]
    pub end_timestamp_ms: i64,
    #[prost(message, repeated, tag = "3")]
    pub matchers: Vec<LabelMatchers>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct ExemplarQueryResponse {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

/// One partial message of a streamed query.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct QueryStreamResponse {
    #[prost(message, repeated, tag = "1")]
    pub chunkseries: Vec<TimeSeriesChunk>,
    #[prost(message, repeated, tag = "2")]
    pub timeseries: Vec<TimeSeries>,
}

impl QueryStreamResponse {
    pub fn chunks_count(&self) -> usize {
        self.chunkseries.iter().map(|cs| cs.chunks.len()).sum()
    }

    /// Encoded size of every chunk in the message.
    pub fn chunks_size(&self) -> usize {
        self.chunkseries
            .iter()
            .flat_map(|cs| cs.chunks.iter())
            .map(|c| c.encoded_len())
            .sum()
    }

    /// Encoded size of the whole message.
    pub fn size(&self) -> usize {
        self.encoded_len()
    }

    pub fn samples_count(&self) -> usize {
        let raw: usize = self.timeseries.iter().map(|ts| ts.samples.len()).sum();
        let chunked: usize = self
            .chunkseries
            .iter()
            .flat_map(|cs| cs.chunks.iter())
            .map(|c| c.samples_count())
            .sum();
        raw + chunked
    }
}

impl From<&Matcher> for LabelMatcher {
    fn from(m: &Matcher) -> Self {
        Self {
            r#type: m.match_type as i32,
            name: m.name.clone(),
            value: m.value.clone(),
        }
    }
}

impl TryFrom<&LabelMatcher> for Matcher {
    type Error = Error;

    fn try_from(m: &LabelMatcher) -> Result<Self> {
        let match_type = MatchType::try_from(m.r#type)
            .map_err(|_| Error::InvalidRequest(format!("invalid matcher type {}", m.r#type)))?;
        Matcher::new(match_type, m.name.clone(), m.value.clone())
    }
}

fn check_time_range(from: i64, to: i64) -> Result<()> {
    if to < from {
        return Err(Error::InvalidRequest(format!(
            "end timestamp {} is before start timestamp {}",
            to, from
        )));
    }
    Ok(())
}

pub fn to_query_request(from: i64, to: i64, matchers: &[Matcher]) -> Result<QueryRequest> {
    check_time_range(from, to)?;
    Ok(QueryRequest {
        start_timestamp_ms: from,
        end_timestamp_ms: to,
        matchers: matchers.iter().map(LabelMatcher::from).collect(),
    })
}

pub fn to_exemplar_query_request(
    from: i64,
    to: i64,
    matcher_sets: &[Vec<Matcher>],
) -> Result<ExemplarQueryRequest> {
    check_time_range(from, to)?;
    Ok(ExemplarQueryRequest {
        start_timestamp_ms: from,
        end_timestamp_ms: to,
        matchers: matcher_sets
            .iter()
            .map(|set| LabelMatchers {
                matchers: set.iter().map(LabelMatcher::from).collect(),
            })
            .collect(),
    })
}

/// Decode the matchers of a request, rejecting unknown operators and bad regexes.
pub fn from_query_request(req: &QueryRequest) -> Result<(i64, i64, Vec<Matcher>)> {
    let matchers = req
        .matchers
        .iter()
        .map(Matcher::try_from)
        .collect::<Result<Vec<_>>>()?;
    Ok((req.start_timestamp_ms, req.end_timestamp_ms, matchers))
}

pub fn from_query_response(resp: QueryResponse) -> Matrix {
    resp.timeseries
        .into_iter()
        .map(|ts| SampleStream {
            labels: ts.labels,
            samples: ts.samples,
        })
        .collect()
}
