//! Reconciling overlapping replica answers
//!
//! Every series is normally returned by several replicas. These helpers
//! fold the copies into one sorted, duplicate-free result.

use crate::model::{Exemplar, ExemplarQueryResponse, Matrix, Sample, SampleStream, SeriesKey, TimeSeries};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Merge two timestamp-sorted sample sequences of the same series.
///
/// Equal timestamps produce a single sample taken from `a`.
pub fn merge_samples(a: Vec<Sample>, b: Vec<Sample>) -> Vec<Sample> {
    if b.is_empty() || a == b {
        return a;
    }
    if a.is_empty() {
        return b;
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (l, r) = (a[i], b[j]);
        if l.timestamp_ms < r.timestamp_ms {
            out.push(l);
            i += 1;
        } else if l.timestamp_ms > r.timestamp_ms {
            out.push(r);
            j += 1;
        } else {
            out.push(l);
            i += 1;
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Merge two timestamp-sorted exemplar lists of the same series.
///
/// Exemplars are dropped only when identical in timestamp, value and
/// labels. Distinct exemplars sharing a timestamp are all kept, those from
/// `a` first.
pub fn merge_exemplars(a: Vec<Exemplar>, b: Vec<Exemplar>) -> Vec<Exemplar> {
    if b.is_empty() || a == b {
        return a;
    }
    if a.is_empty() {
        return b;
    }

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        let (ts_a, ts_b) = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => (x.timestamp_ms, y.timestamp_ms),
            _ => break,
        };
        if ts_a < ts_b {
            out.extend(a.next());
        } else if ts_a > ts_b {
            out.extend(b.next());
        } else {
            let start = out.len();
            while let Some(e) = a.next_if(|e| e.timestamp_ms == ts_a) {
                if !out[start..].iter().any(|kept| same_exemplar(kept, &e)) {
                    out.push(e);
                }
            }
            while let Some(e) = b.next_if(|e| e.timestamp_ms == ts_a) {
                if !out[start..].iter().any(|kept| same_exemplar(kept, &e)) {
                    out.push(e);
                }
            }
        }
    }
    out.extend(a);
    out.extend(b);
    out
}

fn same_exemplar(a: &Exemplar, b: &Exemplar) -> bool {
    a.timestamp_ms == b.timestamp_ms
        && a.value.to_bits() == b.value.to_bits()
        && a.labels == b.labels
}

/// Fold per-replica matrices into one matrix with a single entry per series.
/// Output order is unspecified.
pub fn merge_matrices<I>(results: I) -> Matrix
where
    I: IntoIterator<Item = Matrix>,
{
    let mut by_series: HashMap<SeriesKey, SampleStream> = HashMap::new();
    for matrix in results {
        for stream in matrix {
            match by_series.entry(SeriesKey::from_labels(&stream.labels)) {
                Entry::Vacant(slot) => {
                    slot.insert(stream);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    let samples = std::mem::take(&mut existing.samples);
                    existing.samples = merge_samples(samples, stream.samples);
                }
            }
        }
    }
    by_series.into_values().collect()
}

/// Fold per-replica exemplar responses into one response, series ordered
/// by their [`SeriesKey`].
pub fn merge_exemplar_query_responses<I>(responses: I) -> ExemplarQueryResponse
where
    I: IntoIterator<Item = ExemplarQueryResponse>,
{
    let mut by_series: BTreeMap<SeriesKey, TimeSeries> = BTreeMap::new();
    for resp in responses {
        for ts in resp.timeseries {
            let key = SeriesKey::from_labels(&ts.labels);
            match by_series.get_mut(&key) {
                None => {
                    by_series.insert(key, ts);
                }
                Some(existing) => {
                    let exemplars = std::mem::take(&mut existing.exemplars);
                    existing.exemplars = merge_exemplars(exemplars, ts.exemplars);
                }
            }
        }
    }
    ExemplarQueryResponse {
        timeseries: by_series.into_values().collect(),
    }
}
