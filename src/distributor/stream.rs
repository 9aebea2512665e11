//! Streaming merge: per-replica receive loops feeding one aggregator task
//!
//! The aggregator task is the only owner of the accumulation maps. Replica
//! loops hand it batches over unbounded channels; once every loop is done
//! the distributor sends the stop signal and the aggregator drains whatever
//! is still queued before handing its maps back.

use super::merge::merge_samples;
use crate::client::QueryStream;
use crate::limiter::{LimitError, QueryLimiter};
use crate::model::{QueryStreamResponse, SeriesKey, TimeSeries, TimeSeriesChunk};
use crate::{Error, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Apply the per-message limit checks, in the order that decides which
/// limit a query is reported as violating.
pub fn enforce_stream_limits(
    limiter: &QueryLimiter,
    resp: &QueryStreamResponse,
) -> std::result::Result<(), LimitError> {
    limiter.add_chunks(resp.chunks_count())?;
    for series in &resp.chunkseries {
        limiter.add_series(&series.labels)?;
    }
    limiter.add_chunk_bytes(resp.chunks_size())?;
    limiter.add_data_bytes(resp.size())?;
    for series in &resp.timeseries {
        limiter.add_series(&series.labels)?;
    }
    Ok(())
}

/// Producer side of the aggregator channels, cloned into every replica loop.
#[derive(Clone)]
pub struct BatchSender {
    chunks: mpsc::UnboundedSender<Vec<TimeSeriesChunk>>,
    series: mpsc::UnboundedSender<Vec<TimeSeries>>,
}

impl BatchSender {
    /// Forward a checked message. Empty batches are not sent.
    pub fn push(&self, resp: QueryStreamResponse) -> Result<()> {
        if !resp.chunkseries.is_empty() {
            self.chunks
                .send(resp.chunkseries)
                .map_err(|_| Error::Internal("stream aggregator stopped".to_string()))?;
        }
        if !resp.timeseries.is_empty() {
            self.series
                .send(resp.timeseries)
                .map_err(|_| Error::Internal("stream aggregator stopped".to_string()))?;
        }
        Ok(())
    }
}

/// Receive from one replica until end of stream, checking limits on every
/// message before it reaches the aggregator. The stream is closed on return.
pub async fn receive_stream(
    limiter: &QueryLimiter,
    mut stream: Box<dyn QueryStream>,
    sink: &BatchSender,
) -> Result<()> {
    let result: Result<()> = async {
        while let Some(resp) = stream.recv().await? {
            enforce_stream_limits(limiter, &resp)?;
            sink.push(resp)?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = stream.close_send() {
        debug!(error = %e, "Failed to close ingester stream");
    }
    result
}

#[derive(Default)]
struct Aggregator {
    chunkseries: HashMap<SeriesKey, TimeSeriesChunk>,
    timeseries: HashMap<SeriesKey, TimeSeries>,
}

impl Aggregator {
    fn add_chunkseries(&mut self, batch: Vec<TimeSeriesChunk>) {
        for series in batch {
            match self.chunkseries.entry(SeriesKey::from_labels(&series.labels)) {
                Entry::Vacant(slot) => {
                    slot.insert(series);
                }
                Entry::Occupied(mut slot) => {
                    slot.get_mut().chunks.extend(series.chunks);
                }
            }
        }
    }

    fn add_timeseries(&mut self, batch: Vec<TimeSeries>) {
        for series in batch {
            match self.timeseries.entry(SeriesKey::from_labels(&series.labels)) {
                Entry::Vacant(slot) => {
                    slot.insert(series);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    let samples = std::mem::take(&mut existing.samples);
                    existing.samples = merge_samples(samples, series.samples);
                }
            }
        }
    }

    async fn run(
        mut self,
        mut chunk_rx: mpsc::UnboundedReceiver<Vec<TimeSeriesChunk>>,
        mut series_rx: mpsc::UnboundedReceiver<Vec<TimeSeries>>,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> Self {
        loop {
            tokio::select! {
                biased;
                Some(batch) = chunk_rx.recv() => self.add_chunkseries(batch),
                Some(batch) = series_rx.recv() => self.add_timeseries(batch),
                _ = &mut stop_rx => break,
            }
        }

        // Producers are done by the time stop arrives; take what they queued.
        while let Ok(batch) = chunk_rx.try_recv() {
            self.add_chunkseries(batch);
        }
        while let Ok(batch) = series_rx.try_recv() {
            self.add_timeseries(batch);
        }
        self
    }

    fn into_response(self) -> QueryStreamResponse {
        QueryStreamResponse {
            chunkseries: self.chunkseries.into_values().collect(),
            timeseries: self.timeseries.into_values().collect(),
        }
    }
}

/// Running aggregator task
pub struct AggregatorHandle {
    sender: BatchSender,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Aggregator>,
}

impl AggregatorHandle {
    pub fn spawn() -> Self {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (series_tx, series_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(Aggregator::default().run(chunk_rx, series_rx, stop_rx));
        Self {
            sender: BatchSender {
                chunks: chunk_tx,
                series: series_tx,
            },
            stop_tx,
            task,
        }
    }

    pub fn sender(&self) -> BatchSender {
        self.sender.clone()
    }

    /// Signal stop and wait for the aggregator to drain. Call only after
    /// every producer has returned.
    pub async fn finish(self) -> Result<QueryStreamResponse> {
        let _ = self.stop_tx.send(());
        let aggregator = self
            .task
            .await
            .map_err(|e| Error::Internal(format!("stream aggregator failed: {}", e)))?;
        Ok(aggregator.into_response())
    }
}
