//! Series model and wire messages
//!
//! Everything a replica returns is expressed with these types. Series
//! identity is always derived from the full label set via [`SeriesKey`].

mod labels;
mod matchers;
mod series;
mod wire;

pub use labels::{format_labels, labels_from_pairs, metric_name, Label, SeriesKey, METRIC_NAME_LABEL};
pub use matchers::{metric_name_matcher, parse_selector, MatchType, Matcher};
pub use series::{
    Chunk, ChunkEncoding, Exemplar, Matrix, Sample, SampleStream, TimeSeries, TimeSeriesChunk,
};
pub use wire::{
    from_query_request, from_query_response, to_exemplar_query_request, to_query_request,
    ExemplarQueryRequest, ExemplarQueryResponse, LabelMatcher, LabelMatchers, QueryRequest,
    QueryResponse, QueryStreamResponse,
};
