//! Label sets and the canonical series identity key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label carrying the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

const NAME_VALUE_SEPARATOR: u8 = 0xfe;
const LABEL_SEPARATOR: u8 = 0xff;

/// A single `name="value"` pair.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, prost::Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Build a label set from `(name, value)` pairs, sorted by name.
pub fn labels_from_pairs<I, N, V>(pairs: I) -> Vec<Label>
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<String>,
{
    let mut labels: Vec<Label> = pairs.into_iter().map(|(n, v)| Label::new(n, v)).collect();
    labels.sort_by(|a, b| a.name.cmp(&b.name));
    labels
}

/// Value of the `__name__` label, if present.
pub fn metric_name(labels: &[Label]) -> Option<&str> {
    labels
        .iter()
        .find(|l| l.name == METRIC_NAME_LABEL)
        .map(|l| l.value.as_str())
}

/// Render a label set the way selectors are written: `{a="1", b="2"}`.
pub fn format_labels(labels: &[Label]) -> String {
    let body = sorted(labels)
        .iter()
        .map(|l| format!("{}={:?}", l.name, l.value))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

fn sorted(labels: &[Label]) -> Vec<&Label> {
    let mut refs: Vec<&Label> = labels.iter().collect();
    if !labels.windows(2).all(|w| w[0].name <= w[1].name) {
        refs.sort_by(|a, b| a.name.cmp(&b.name));
    }
    refs
}

/// Canonical identity of a series.
///
/// Labels are written as `name 0xFE value` in name order, separated by
/// `0xFF`. A label set that is a prefix of another sorts first. Valid UTF-8
/// never contains the bytes `0xFE` or `0xFF`, so two keys are equal exactly
/// when the label sets are equal. Keys order bytewise, which is the output
/// order exemplar responses are sorted by.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(Vec<u8>);

impl SeriesKey {
    pub fn from_labels(labels: &[Label]) -> Self {
        let size = labels
            .iter()
            .map(|l| l.name.len() + l.value.len() + 2)
            .sum();
        let mut buf = Vec::with_capacity(size);
        for (i, label) in sorted(labels).into_iter().enumerate() {
            if i > 0 {
                buf.push(LABEL_SEPARATOR);
            }
            buf.extend_from_slice(label.name.as_bytes());
            buf.push(NAME_VALUE_SEPARATOR);
            buf.extend_from_slice(label.value.as_bytes());
        }
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let readable: String = self
            .0
            .iter()
            .map(|&b| match b {
                NAME_VALUE_SEPARATOR => '=',
                LABEL_SEPARATOR => ';',
                other => other as char,
            })
            .collect();
        f.debug_tuple("SeriesKey").field(&readable).finish()
    }
}
