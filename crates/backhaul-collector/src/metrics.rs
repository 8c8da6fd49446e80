//! Metric sample types and their JSON shape.
//!
//! Samples serialize the way the broker expects them:
//!
//! ```json
//! { "cpu`used_pct": { "_type": "n", "_value": 12.5 } }
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

/// Separator between a collector id and a metric name in a flattened name.
pub const METRIC_NAME_SEPARATOR: char = '`';

/// Broker-side type tag of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    /// Signed 64-bit integer.
    #[serde(rename = "l")]
    Int64,
    /// Unsigned 64-bit integer.
    #[serde(rename = "L")]
    UInt64,
    /// Double precision float.
    #[serde(rename = "n")]
    Double,
    /// Text.
    #[serde(rename = "s")]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

/// One metric value with its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "_type")]
    pub kind: SampleType,
    #[serde(rename = "_value")]
    pub value: SampleValue,
}

impl Sample {
    pub fn double(value: f64) -> Self {
        Self {
            kind: SampleType::Double,
            value: SampleValue::Float(value),
        }
    }

    pub fn uint(value: u64) -> Self {
        Self {
            kind: SampleType::UInt64,
            value: SampleValue::UInt(value),
        }
    }

    pub fn int(value: i64) -> Self {
        Self {
            kind: SampleType::Int64,
            value: SampleValue::Int(value),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: SampleType::Text,
            value: SampleValue::Text(value.into()),
        }
    }
}

/// An ordered set of named samples.
///
/// Ordering is by name so serialized output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, Sample>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, sample: Sample) {
        self.0.insert(name.into(), sample);
    }

    pub fn add_double(&mut self, name: impl Into<String>, value: f64) {
        self.insert(name, Sample::double(value));
    }

    pub fn add_uint(&mut self, name: impl Into<String>, value: u64) {
        self.insert(name, Sample::uint(value));
    }

    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Sample> {
        self.0.iter()
    }

    /// Keeps only the samples for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|name, _| keep(name));
    }

    /// Copies `other` into `self`, prefixing every name with `namespace`.
    pub fn extend_namespaced(&mut self, namespace: &str, other: &Metrics) {
        for (name, sample) in other.iter() {
            self.0.insert(
                format!("{namespace}{METRIC_NAME_SEPARATOR}{name}"),
                sample.clone(),
            );
        }
    }
}

impl<'a> IntoIterator for &'a Metrics {
    type Item = (&'a String, &'a Sample);
    type IntoIter = btree_map::Iter<'a, String, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, Sample)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (String, Sample)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
