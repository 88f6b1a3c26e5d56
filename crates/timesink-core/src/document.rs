//! Data buckets and data points.
//!
//! A data document holds every sample of one measurement over a fixed,
//! aligned window `[start, end)` whose width is
//! `interval * HIGH_RESOLUTION_DOCUMENT_SIZE`. Point identity within a bucket
//! is `(time, value_type)`; a later write replaces an earlier one.

use crate::ids;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Samples per bucket: a bucket spans `interval * HIGH_RESOLUTION_DOCUMENT_SIZE`
/// seconds, i.e. 1000 sample slots at the measurement's native interval.
pub const HIGH_RESOLUTION_DOCUMENT_SIZE: i64 = 1000;

/// Width in seconds of a bucket for measurements sampled at `interval`.
pub fn document_length(interval: i64) -> i64 {
    interval * HIGH_RESOLUTION_DOCUMENT_SIZE
}

/// The aligned `[start, end)` bucket covering `time` at `interval`.
///
/// `start` is always a multiple of the bucket width, so every worker maps a
/// timestamp to the same bucket.
pub fn bucket_bounds(time: i64, interval: i64) -> (i64, i64) {
    let length = document_length(interval);
    let start = time.div_euclid(length) * length;
    (start, start + length)
}

/// One sample: a value (or explicit absence) for one value type at one time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time: i64,
    pub interval: i64,
    pub value_type: String,
    pub value: Option<f64>,
}

/// A time bucket of one measurement's samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDocument {
    /// Store document id; deterministic so redelivered batches hit the same
    /// document.
    pub id: String,
    pub data_type: String,
    pub identifier: String,
    pub interval: i64,
    pub start: i64,
    pub end: i64,
    pub value_types: BTreeSet<String>,
    pub points: Vec<DataPoint>,
}

impl DataDocument {
    /// An empty bucket with the given bounds.
    pub fn empty(data_type: &str, identifier: &str, interval: i64, start: i64, end: i64) -> Self {
        Self {
            id: ids::data_document_key(data_type, identifier, start, end),
            data_type: data_type.to_string(),
            identifier: identifier.to_string(),
            interval,
            start,
            end,
            value_types: BTreeSet::new(),
            points: Vec::new(),
        }
    }

    /// An empty bucket aligned to cover `time` at `interval`.
    pub fn covering(data_type: &str, identifier: &str, interval: i64, time: i64) -> Self {
        let (start, end) = bucket_bounds(time, interval);
        Self::empty(data_type, identifier, interval, start, end)
    }

    /// The cache key for this bucket.
    pub fn cache_key(&self) -> String {
        ids::data_document_key(&self.data_type, &self.identifier, self.start, self.end)
    }

    pub fn covers(&self, time: i64) -> bool {
        self.start <= time && time < self.end
    }

    /// Half-open overlap with `[start, end)`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start < end && self.end > start
    }

    /// Insert a point, replacing any existing point with the same
    /// `(time, value_type)` and declaring its value type on the bucket.
    pub fn upsert_point(&mut self, point: DataPoint) {
        self.value_types.insert(point.value_type.clone());
        if let Some(existing) = self
            .points
            .iter_mut()
            .find(|p| p.time == point.time && p.value_type == point.value_type)
        {
            *existing = point;
        } else {
            self.points.push(point);
        }
    }

    /// The `(time, value_type)` identities currently present.
    pub fn point_keys(&self) -> HashSet<(i64, String)> {
        self.points
            .iter()
            .map(|p| (p.time, p.value_type.clone()))
            .collect()
    }
}
