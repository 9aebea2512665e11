//! Distributor read path
//!
//! Picks the replicas that hold a tenant's series, asks all of them
//! concurrently and reconciles their overlapping answers into one result.
//!
//! # Usage
//!
//! ```ignore
//! let distributor = Distributor::new(cfg, limits, ring, pool);
//! let ctx = distributor.query_context("tenant-1");
//! let matrix = distributor.query(&ctx, from, to, &matchers).await?;
//! ```

pub mod merge;
pub mod stream;
pub mod telemetry;

pub use merge::{merge_exemplar_query_responses, merge_exemplars, merge_matrices, merge_samples};
pub use stream::{enforce_stream_limits, receive_stream, AggregatorHandle, BatchSender};
pub use telemetry::{OtelQueryRecorder, QueryMetrics, QueryRecorder};

use crate::client::ClientPool;
use crate::clock::{Clock, SystemClock};
use crate::config::{DistributorConfig, ShardingStrategy, TenantLimits};
use crate::context::QueryContext;
use crate::limiter::QueryLimiter;
use crate::model::{
    from_query_response, metric_name_matcher, to_exemplar_query_request, to_query_request,
    ExemplarQueryRequest, ExemplarQueryResponse, MatchType, Matcher, Matrix, QueryRequest,
    QueryStreamResponse,
};
use crate::ring::token::shard_by_metric_name;
use crate::ring::{InstanceDesc, Operation, ReadRing, ReplicationSet};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Front end fanning reads out to ingester replicas
pub struct Distributor {
    cfg: DistributorConfig,
    limits: Arc<TenantLimits>,
    ring: Arc<dyn ReadRing>,
    clients: Arc<dyn ClientPool>,
    recorder: Arc<dyn QueryRecorder>,
    clock: Arc<dyn Clock>,
}

impl Distributor {
    pub fn new(
        cfg: DistributorConfig,
        limits: Arc<TenantLimits>,
        ring: Arc<dyn ReadRing>,
        clients: Arc<dyn ClientPool>,
    ) -> Self {
        Self {
            cfg,
            limits,
            ring,
            clients,
            recorder: Arc::new(OtelQueryRecorder),
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn QueryRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.cfg
    }

    /// A fresh context for `tenant` carrying the tenant's configured
    /// per-query limits.
    pub fn query_context(&self, tenant: &str) -> QueryContext {
        let limiter = QueryLimiter::new(self.limits.query_limits(tenant));
        QueryContext::new(tenant).with_limiter(Arc::new(limiter))
    }

    /// Replicas to ask for series matching `matchers`.
    pub fn ingesters_for_query(&self, ctx: &QueryContext, matchers: &[Matcher]) -> Result<ReplicationSet> {
        let tenant = ctx.tenant_id()?;

        if let Some(subring) = self.shuffle_subring(tenant) {
            return subring.replication_set_for_operation(Operation::Read);
        }

        // Without all-label sharding a metric's series live on the replicas
        // owning the tenant + metric name token.
        if !self.cfg.shard_by_all_labels {
            if let Some((name, _)) = metric_name_matcher(matchers) {
                if name.match_type == MatchType::Equal {
                    let key = shard_by_metric_name(tenant, &name.value);
                    return self.ring.get(key, Operation::Read);
                }
            }
        }

        self.ring.replication_set_for_operation(Operation::Read)
    }

    /// Replicas to ask for metadata-style reads, which cannot be routed by
    /// metric name.
    pub fn ingesters_for_metadata(&self, ctx: &QueryContext) -> Result<ReplicationSet> {
        let tenant = ctx.tenant_id()?;
        match self.shuffle_subring(tenant) {
            Some(subring) => subring.replication_set_for_operation(Operation::Read),
            None => self.ring.replication_set_for_operation(Operation::Read),
        }
    }

    fn shuffle_subring(&self, tenant: &str) -> Option<Arc<dyn ReadRing>> {
        if self.cfg.sharding_strategy != ShardingStrategy::ShuffleSharding {
            return None;
        }
        let size = self.limits.ingestion_tenant_shard_size(tenant);
        if size == 0 || self.cfg.shuffle_sharding_lookback.is_zero() {
            return None;
        }
        Some(self.ring.shuffle_shard_with_lookback(
            tenant,
            size,
            self.cfg.shuffle_sharding_lookback,
            self.clock.now(),
        ))
    }

    /// Samples for every series matching `matchers` in `[from, to]`.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        from: i64,
        to: i64,
        matchers: &[Matcher],
    ) -> Result<Matrix> {
        let span = query_span("query", ctx, from, to);
        let run = self.run_query(ctx, from, to, matchers).instrument(span);
        self.observe("query", run, |m| m.len()).await
    }

    /// Exemplars for every series matching any of `matcher_sets`.
    pub async fn query_exemplars(
        &self,
        ctx: &QueryContext,
        from: i64,
        to: i64,
        matcher_sets: &[Vec<Matcher>],
    ) -> Result<ExemplarQueryResponse> {
        let span = query_span("query_exemplars", ctx, from, to);
        let run = self
            .run_query_exemplars(ctx, from, to, matcher_sets)
            .instrument(span);
        self.observe("query_exemplars", run, |r| r.timeseries.len())
            .await
    }

    /// Streamed chunks and samples for every series matching `matchers`,
    /// merged across replicas. On any error nothing partial is returned.
    pub async fn query_stream(
        &self,
        ctx: &QueryContext,
        from: i64,
        to: i64,
        matchers: &[Matcher],
    ) -> Result<QueryStreamResponse> {
        let span = query_span("query_stream", ctx, from, to);
        let run = self
            .run_query_stream(ctx, from, to, matchers)
            .instrument(span);
        self.observe("query_stream", run, |r| {
            r.chunkseries.len() + r.timeseries.len()
        })
        .await
    }

    async fn run_query(
        &self,
        ctx: &QueryContext,
        from: i64,
        to: i64,
        matchers: &[Matcher],
    ) -> Result<(Matrix, usize)> {
        let req = to_query_request(from, to, matchers)?;
        let replicas = self.ingesters_for_query(ctx, matchers)?;
        let ctx = self.bounded(ctx);

        let results = replicas
            .do_with(&ctx, self.cfg.extra_query_delay, |call_ctx, inst| {
                self.query_ingester(call_ctx, inst, req.clone())
            })
            .await?;
        Ok((merge_matrices(results), replicas.instances.len()))
    }

    async fn run_query_exemplars(
        &self,
        ctx: &QueryContext,
        from: i64,
        to: i64,
        matcher_sets: &[Vec<Matcher>],
    ) -> Result<(ExemplarQueryResponse, usize)> {
        let req = to_exemplar_query_request(from, to, matcher_sets)?;
        let replicas = self.ingesters_for_metadata(ctx)?;
        let ctx = self.bounded(ctx);

        let results = replicas
            .do_with(&ctx, self.cfg.extra_query_delay, |call_ctx, inst| {
                self.query_ingester_exemplars(call_ctx, inst, req.clone())
            })
            .await?;
        Ok((
            merge_exemplar_query_responses(results),
            replicas.instances.len(),
        ))
    }

    async fn run_query_stream(
        &self,
        ctx: &QueryContext,
        from: i64,
        to: i64,
        matchers: &[Matcher],
    ) -> Result<(QueryStreamResponse, usize)> {
        let req = to_query_request(from, to, matchers)?;
        let replicas = self.ingesters_for_query(ctx, matchers)?;
        let ctx = self.bounded(ctx);

        let aggregator = AggregatorHandle::spawn();
        let sender = aggregator.sender();
        let fanout = replicas
            .do_with(&ctx, self.cfg.extra_query_delay, |call_ctx, inst| {
                self.stream_ingester(call_ctx, inst, req.clone(), sender.clone())
            })
            .await;
        drop(sender);

        // The aggregator is stopped on every path; its result only counts
        // when the fan-out succeeded.
        let merged = aggregator.finish().await;
        fanout?;
        let resp = merged?;

        let stats = ctx.stats();
        let series = resp.chunkseries.len() + resp.timeseries.len();
        let chunk_bytes = resp.chunks_size();
        let data_bytes = resp.size();
        let chunks = resp.chunks_count();
        let samples = resp.samples_count();
        stats.add_fetched_series(series as u64);
        stats.add_fetched_chunk_bytes(chunk_bytes as u64);
        stats.add_fetched_data_bytes(data_bytes as u64);
        stats.add_fetched_chunks(chunks as u64);
        stats.add_fetched_samples(samples as u64);
        info!(
            fetched_series = series,
            fetched_chunk_bytes = chunk_bytes,
            fetched_data_bytes = data_bytes,
            fetched_chunks = chunks,
            fetched_samples = samples,
            "Streamed query result"
        );

        Ok((resp, replicas.instances.len()))
    }

    async fn query_ingester(
        &self,
        ctx: QueryContext,
        inst: InstanceDesc,
        req: QueryRequest,
    ) -> Result<Matrix> {
        let client = self.clients.client_for(&inst.addr)?;
        self.recorder.record_ingester_query(&inst.addr);
        let resp = self.track_failure(&inst.addr, client.query(&ctx, req).await)?;
        Ok(from_query_response(resp))
    }

    async fn query_ingester_exemplars(
        &self,
        ctx: QueryContext,
        inst: InstanceDesc,
        req: ExemplarQueryRequest,
    ) -> Result<ExemplarQueryResponse> {
        let client = self.clients.client_for(&inst.addr)?;
        self.recorder.record_ingester_query(&inst.addr);
        self.track_failure(&inst.addr, client.query_exemplars(&ctx, req).await)
    }

    async fn stream_ingester(
        &self,
        ctx: QueryContext,
        inst: InstanceDesc,
        req: QueryRequest,
        sink: BatchSender,
    ) -> Result<()> {
        let client = self.clients.client_for(&inst.addr)?;
        self.recorder.record_ingester_query(&inst.addr);
        let stream = self.track_failure(&inst.addr, client.query_stream(&ctx, req).await)?;
        let received = receive_stream(ctx.limiter(), stream, &sink).await;
        self.track_failure(&inst.addr, received)
    }

    fn track_failure<T>(&self, addr: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !e.aborts_query() {
                self.recorder.record_ingester_query_failure(addr);
            }
            debug!(ingester = addr, error = %e, "Ingester query failed");
        }
        result
    }

    fn bounded(&self, ctx: &QueryContext) -> QueryContext {
        if self.cfg.query_timeout.is_zero() {
            ctx.clone()
        } else {
            ctx.clone().with_timeout(self.cfg.query_timeout)
        }
    }

    async fn observe<T, Fut>(
        &self,
        operation: &'static str,
        run: Fut,
        series_of: impl Fn(&T) -> usize,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<(T, usize)>>,
    {
        let started = Instant::now();
        let result = run.await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok((value, replicas)) => {
                let series = series_of(&value);
                self.recorder.record_query(QueryMetrics {
                    operation,
                    outcome: "success",
                    error_class: None,
                    duration_seconds: elapsed,
                    series_returned: series as u64,
                    replicas_queried: replicas as u64,
                });
                debug!(operation, series, replicas, elapsed, "Query completed");
                Ok(value)
            }
            Err(error) => {
                self.recorder.record_query(QueryMetrics {
                    operation,
                    outcome: "error",
                    error_class: Some(error.class()),
                    duration_seconds: elapsed,
                    series_returned: 0,
                    replicas_queried: 0,
                });
                if error.is_context_error() {
                    debug!(operation, error = %error, "Query aborted");
                } else {
                    warn!(operation, error = %error, "Query failed");
                }
                Err(error)
            }
        }
    }
}

fn query_span(operation: &'static str, ctx: &QueryContext, from: i64, to: i64) -> Span {
    let tenant = ctx.tenant_id().unwrap_or("none");
    info_span!("distributor.query", operation, tenant_id = %tenant, from, to)
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("cfg", &self.cfg)
            .field("replication_factor", &self.ring.replication_factor())
            .field("instances", &self.ring.instances_count())
            .finish()
    }
}
