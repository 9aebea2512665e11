//! In-process fake ingesters shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use ringquery::client::{ClientPool, IngesterClient, QueryStream};
use ringquery::clock::{Clock, ManualClock};
use ringquery::config::{DistributorConfig, TenantLimits, TenantLimitsConfig};
use ringquery::context::QueryContext;
use ringquery::distributor::{Distributor, QueryMetrics, QueryRecorder};
use ringquery::model::{
    labels_from_pairs, Chunk, ChunkEncoding, Exemplar, ExemplarQueryRequest,
    ExemplarQueryResponse, Label, QueryRequest, QueryResponse, QueryStreamResponse, Sample,
    TimeSeries, TimeSeriesChunk,
};
use ringquery::ring::{HashRing, InstanceDesc, RingConfig};
use ringquery::{Error, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a fake ingester answers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Respond,
    /// Transport failure
    Fail,
    /// Never answers
    Hang,
    /// Answers after the delay
    Delay(Duration),
    /// Reports that the call was canceled
    Canceled,
    /// Streams: send the first message, then fail
    BreakStream,
}

pub struct FakeIngester {
    pub addr: String,
    behavior: Mutex<Behavior>,
    series: Mutex<Vec<TimeSeries>>,
    stream: Mutex<Vec<QueryStreamResponse>>,
    pub calls: AtomicUsize,
    pub closed_streams: Arc<AtomicUsize>,
}

impl FakeIngester {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            behavior: Mutex::new(Behavior::Respond),
            series: Mutex::new(Vec::new()),
            stream: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            closed_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// Series returned by `query` (samples) and `query_exemplars` (exemplars).
    pub fn set_series(&self, series: Vec<TimeSeries>) {
        *self.series.lock() = series;
    }

    pub fn set_stream(&self, messages: Vec<QueryStreamResponse>) {
        *self.stream.lock() = messages;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock();
        match behavior {
            Behavior::Respond | Behavior::BreakStream => Ok(()),
            Behavior::Fail => Err(Error::Transport(tonic::Status::unavailable(format!(
                "{} is down",
                self.addr
            )))),
            Behavior::Hang => std::future::pending().await,
            Behavior::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Behavior::Canceled => Err(Error::Canceled),
        }
    }
}

#[async_trait]
impl IngesterClient for FakeIngester {
    async fn query(&self, _: &QueryContext, _: QueryRequest) -> Result<QueryResponse> {
        self.answer().await?;
        let timeseries = self
            .series
            .lock()
            .iter()
            .map(|ts| TimeSeries {
                labels: ts.labels.clone(),
                samples: ts.samples.clone(),
                exemplars: vec![],
            })
            .collect();
        Ok(QueryResponse { timeseries })
    }

    async fn query_exemplars(
        &self,
        _: &QueryContext,
        _: ExemplarQueryRequest,
    ) -> Result<ExemplarQueryResponse> {
        self.answer().await?;
        let timeseries = self
            .series
            .lock()
            .iter()
            .map(|ts| TimeSeries {
                labels: ts.labels.clone(),
                samples: vec![],
                exemplars: ts.exemplars.clone(),
            })
            .collect();
        Ok(ExemplarQueryResponse { timeseries })
    }

    async fn query_stream(
        &self,
        _: &QueryContext,
        _: QueryRequest,
    ) -> Result<Box<dyn QueryStream>> {
        self.answer().await?;
        let mut messages: VecDeque<_> = self.stream.lock().iter().cloned().collect();
        let break_after = if *self.behavior.lock() == Behavior::BreakStream {
            messages.truncate(1);
            true
        } else {
            false
        };
        Ok(Box::new(FakeStream {
            addr: self.addr.clone(),
            messages,
            break_after,
            closed: self.closed_streams.clone(),
        }))
    }
}

struct FakeStream {
    addr: String,
    messages: VecDeque<QueryStreamResponse>,
    break_after: bool,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl QueryStream for FakeStream {
    async fn recv(&mut self) -> Result<Option<QueryStreamResponse>> {
        match self.messages.pop_front() {
            Some(msg) => Ok(Some(msg)),
            None if self.break_after => Err(Error::Transport(tonic::Status::unavailable(
                format!("{} reset the stream", self.addr),
            ))),
            None => Ok(None),
        }
    }

    fn close_send(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakePool {
    ingesters: HashMap<String, Arc<FakeIngester>>,
}

impl ClientPool for FakePool {
    fn client_for(&self, addr: &str) -> Result<Arc<dyn IngesterClient>> {
        self.ingesters
            .get(addr)
            .map(|i| i.clone() as Arc<dyn IngesterClient>)
            .ok_or_else(|| Error::Internal(format!("no fake ingester at {addr}")))
    }
}

/// Recorder keeping every call in memory
#[derive(Default)]
pub struct CountingRecorder {
    pub queries: Mutex<BTreeMap<String, usize>>,
    pub failures: Mutex<BTreeMap<String, usize>>,
    pub completed: Mutex<Vec<QueryMetrics>>,
}

impl CountingRecorder {
    pub fn total_queries(&self) -> usize {
        self.queries.lock().values().sum()
    }

    pub fn total_failures(&self) -> usize {
        self.failures.lock().values().sum()
    }
}

impl QueryRecorder for CountingRecorder {
    fn record_ingester_query(&self, addr: &str) {
        *self.queries.lock().entry(addr.to_string()).or_default() += 1;
    }

    fn record_ingester_query_failure(&self, addr: &str) {
        *self.failures.lock().entry(addr.to_string()).or_default() += 1;
    }

    fn record_query(&self, metrics: QueryMetrics) {
        self.completed.lock().push(metrics);
    }
}

/// A ring of `n` healthy instances, each backed by a fake ingester.
pub struct Cluster {
    pub clock: Arc<ManualClock>,
    pub ring: Arc<HashRing>,
    pub ingesters: Vec<Arc<FakeIngester>>,
    pub recorder: Arc<CountingRecorder>,
}

impl Cluster {
    pub fn new(n: usize) -> Self {
        Self::with_config(n, RingConfig::default())
    }

    pub fn with_config(n: usize, config: RingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let ring = Arc::new(HashRing::new(config, clock.clone()));
        let mut ingesters = Vec::with_capacity(n);
        for i in 0..n {
            let addr = format!("10.0.0.{i}:9095");
            ring.register(InstanceDesc::new(format!("ingester-{i}"), addr.clone(), clock.now()));
            ingesters.push(Arc::new(FakeIngester::new(addr)));
        }
        Self {
            clock,
            ring,
            ingesters,
            recorder: Arc::new(CountingRecorder::default()),
        }
    }

    pub fn by_addr(&self, addr: &str) -> &Arc<FakeIngester> {
        self.ingesters
            .iter()
            .find(|i| i.addr == addr)
            .expect("unknown ingester address")
    }

    /// Same behavior for every ingester.
    pub fn set_all(&self, f: impl Fn(&FakeIngester)) {
        for ingester in &self.ingesters {
            f(ingester);
        }
    }

    pub fn total_calls(&self) -> usize {
        self.ingesters.iter().map(|i| i.calls()).sum()
    }

    pub fn distributor(&self, cfg: DistributorConfig) -> Distributor {
        self.distributor_with_limits(cfg, TenantLimitsConfig::default())
    }

    pub fn distributor_with_limits(
        &self,
        cfg: DistributorConfig,
        limits: TenantLimitsConfig,
    ) -> Distributor {
        let pool = FakePool {
            ingesters: self
                .ingesters
                .iter()
                .map(|i| (i.addr.clone(), i.clone()))
                .collect(),
        };
        Distributor::new(
            cfg,
            Arc::new(TenantLimits::new(limits)),
            self.ring.clone(),
            Arc::new(pool),
        )
        .with_recorder(self.recorder.clone())
        .with_clock(self.clock.clone())
    }
}

pub fn series(pairs: &[(&str, &str)], points: &[(i64, f64)]) -> TimeSeries {
    TimeSeries {
        labels: labels_from_pairs(pairs.iter().copied()),
        samples: points.iter().map(|&(t, v)| Sample::new(t, v)).collect(),
        exemplars: vec![],
    }
}

pub fn exemplar_series(pairs: &[(&str, &str)], exemplars: Vec<Exemplar>) -> TimeSeries {
    TimeSeries {
        labels: labels_from_pairs(pairs.iter().copied()),
        samples: vec![],
        exemplars,
    }
}

pub fn exemplar(ts: i64, value: f64, trace_id: &str) -> Exemplar {
    Exemplar::new(ts, value, vec![Label::new("trace_id", trace_id)])
}

/// XOR chunk advertising `samples` samples, padded to `len` bytes.
pub fn xor_chunk(start: i64, end: i64, samples: u16, len: usize) -> Chunk {
    let mut data = samples.to_be_bytes().to_vec();
    data.resize(len.max(2), 0xAB);
    Chunk {
        start_timestamp_ms: start,
        end_timestamp_ms: end,
        encoding: ChunkEncoding::PrometheusXor as i32,
        data: Bytes::from(data),
    }
}

pub fn chunk_series(ingester: &str, pairs: &[(&str, &str)], chunks: Vec<Chunk>) -> TimeSeriesChunk {
    TimeSeriesChunk {
        from_ingester_id: ingester.to_string(),
        user_id: "tenant-1".to_string(),
        labels: labels_from_pairs(pairs.iter().copied()),
        chunks,
    }
}
