//! Streaming aggregation under concurrent replica loops

use async_trait::async_trait;
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringquery::client::QueryStream;
use ringquery::distributor::{receive_stream, AggregatorHandle};
use ringquery::limiter::QueryLimiter;
use ringquery::model::{
    labels_from_pairs, Chunk, ChunkEncoding, QueryStreamResponse, Sample, TimeSeries,
    TimeSeriesChunk,
};
use ringquery::Result;
use std::collections::VecDeque;
use std::sync::Arc;

struct ReplayStream {
    messages: VecDeque<QueryStreamResponse>,
}

#[async_trait]
impl QueryStream for ReplayStream {
    async fn recv(&mut self) -> Result<Option<QueryStreamResponse>> {
        Ok(self.messages.pop_front())
    }

    fn close_send(&mut self) -> Result<()> {
        Ok(())
    }
}

fn replica_messages(replica: usize, series: usize, batch: usize) -> Vec<QueryStreamResponse> {
    (0..series)
        .collect::<Vec<_>>()
        .chunks(batch)
        .map(|ids| QueryStreamResponse {
            chunkseries: ids
                .iter()
                .map(|s| TimeSeriesChunk {
                    from_ingester_id: format!("ingester-{replica}"),
                    user_id: "bench".to_string(),
                    labels: labels_from_pairs([
                        ("__name__", "node_cpu_seconds_total".to_string()),
                        ("cpu", format!("{s}")),
                    ]),
                    chunks: vec![Chunk {
                        start_timestamp_ms: 0,
                        end_timestamp_ms: 7_200_000,
                        encoding: ChunkEncoding::PrometheusXor as i32,
                        data: Bytes::from(vec![0u8; 256]),
                    }],
                })
                .collect(),
            timeseries: ids
                .iter()
                .map(|s| TimeSeries {
                    labels: labels_from_pairs([
                        ("__name__", "up".to_string()),
                        ("instance", format!("{s}")),
                    ]),
                    samples: (0..16).map(|i| Sample::new(i * 15_000, 1.0)).collect(),
                    exemplars: vec![],
                })
                .collect(),
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("stream_aggregate");

    for series in [1_000, 10_000] {
        let replicas: Vec<Vec<QueryStreamResponse>> =
            (0..3).map(|r| replica_messages(r, series, 128)).collect();
        group.throughput(Throughput::Elements((series * 3) as u64));

        group.bench_with_input(BenchmarkId::new("three_replicas", series), &series, |b, _| {
            b.to_async(&rt).iter(|| {
                let replicas = replicas.clone();
                async move {
                    let limiter = Arc::new(QueryLimiter::unlimited());
                    let aggregator = AggregatorHandle::spawn();
                    let loops: Vec<_> = replicas
                        .into_iter()
                        .map(|messages| {
                            let sender = aggregator.sender();
                            let limiter = limiter.clone();
                            tokio::spawn(async move {
                                let stream = Box::new(ReplayStream {
                                    messages: messages.into(),
                                });
                                receive_stream(&limiter, stream, &sender).await
                            })
                        })
                        .collect();
                    for handle in loops {
                        handle.await.unwrap().unwrap();
                    }
                    aggregator.finish().await.unwrap()
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
