//! Batch coalescer.
//!
//! Groups a decoded batch by target bucket so the writers touch each bucket
//! once. Data messages are sorted by ascending `time` first: the earliest
//! sample fixes a new measurement's `start` even when the batch arrived out
//! of order, and later samples win ties on `(time, value_type)`.
//!
//! The maps are keyed on tuples and iterate in key order, which keeps the
//! writers' lock acquisition deterministic across workers.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use timesink_core::{
    bucket_bounds, event_bucket_bounds, DataDocument, DataMessage, DataPoint, EventDocument,
    EventMessage,
};

/// What the measurement upserter needs to know about one series seen in the
/// batch: the earliest sample time and the latest metadata and interval.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSeed {
    pub data_type: String,
    pub identifier: String,
    pub start: i64,
    pub interval: i64,
    pub meta: Map<String, Value>,
}

/// One batch grouped by target bucket.
#[derive(Debug, Default)]
pub struct CoalescedBatch {
    /// `(data_type, identifier)` → seed.
    pub measurements: BTreeMap<(String, String), MeasurementSeed>,
    /// `(data_type, identifier, start, end)` → the bucket to write.
    pub documents: BTreeMap<(String, String, i64, i64), DataDocument>,
    /// `data_type` → every value type seen in the batch.
    pub value_types: BTreeMap<String, BTreeSet<String>>,
    /// `(data_type, event_type, start, end)` → the event bucket to write.
    pub events: BTreeMap<(String, String, i64, i64), EventDocument>,
}

impl CoalescedBatch {
    pub fn from_messages(
        mut data_messages: Vec<DataMessage>,
        event_messages: Vec<EventMessage>,
    ) -> Self {
        let mut batch = Self::default();

        // Stable sort: equal times keep batch order, so the tie-break stays
        // "later in the batch wins".
        data_messages.sort_by_key(|message| message.time);

        for message in data_messages {
            let measurement_key = (message.data_type.clone(), message.identifier.clone());
            batch
                .measurements
                .entry(measurement_key)
                .and_modify(|seed| {
                    seed.start = seed.start.min(message.time);
                    seed.interval = message.interval;
                    seed.meta = message.meta.clone();
                })
                .or_insert_with(|| MeasurementSeed {
                    data_type: message.data_type.clone(),
                    identifier: message.identifier.clone(),
                    start: message.time,
                    interval: message.interval,
                    meta: message.meta.clone(),
                });

            let (start, end) = bucket_bounds(message.time, message.interval);
            let document_key = (
                message.data_type.clone(),
                message.identifier.clone(),
                start,
                end,
            );
            let document = batch.documents.entry(document_key).or_insert_with(|| {
                DataDocument::empty(
                    &message.data_type,
                    &message.identifier,
                    message.interval,
                    start,
                    end,
                )
            });

            for (value_type, value) in &message.values {
                document.upsert_point(DataPoint {
                    time: message.time,
                    interval: message.interval,
                    value_type: value_type.clone(),
                    value: *value,
                });
                batch
                    .value_types
                    .entry(message.data_type.clone())
                    .or_default()
                    .insert(value_type.clone());
            }
        }

        for message in event_messages {
            let (start, end) = event_bucket_bounds(message.start);
            let key = (
                message.data_type.clone(),
                message.event_type.clone(),
                start,
                end,
            );
            let document = batch.events.entry(key).or_insert_with(|| {
                EventDocument::empty(&message.data_type, &message.event_type, start, end)
            });
            let existing = mem::take(&mut document.events);
            document.events = EventDocument::merge_events(existing, vec![message.to_event()]);
        }

        batch
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(time: i64, interval: i64, values: &[(&str, Option<f64>)]) -> DataMessage {
        DataMessage {
            data_type: "cpu".to_string(),
            time,
            interval,
            identifier: "host1".to_string(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            meta: json!({"host": "host1"}).as_object().unwrap().clone(),
        }
    }

    fn event(start: i64, identifier: &str, text: &str) -> EventMessage {
        EventMessage {
            data_type: "interface".to_string(),
            event_type: "outage".to_string(),
            start,
            end: start + 60,
            identifier: identifier.to_string(),
            affected: Value::Null,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_empty_batch() {
        let batch = CoalescedBatch::from_messages(Vec::new(), Vec::new());
        assert!(batch.is_empty());
        assert!(batch.measurements.is_empty());
        assert!(batch.value_types.is_empty());
    }

    #[test]
    fn test_bucket_placement() {
        let batch = CoalescedBatch::from_messages(
            vec![message(61_000, 60, &[("load", Some(1.0))])],
            Vec::new(),
        );
        let keys: Vec<_> = batch.documents.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![("cpu".to_string(), "host1".to_string(), 60_000, 120_000)]
        );
        let doc = batch.documents.values().next().unwrap();
        assert_eq!(doc.points.len(), 1);
        assert!(doc.value_types.contains("load"));
    }

    #[test]
    fn test_points_in_same_bucket_accumulate() {
        let batch = CoalescedBatch::from_messages(
            vec![
                message(61_000, 60, &[("load", Some(1.0))]),
                message(61_060, 60, &[("load", Some(2.0)), ("idle", None)]),
            ],
            Vec::new(),
        );
        assert_eq!(batch.documents.len(), 1);
        let doc = batch.documents.values().next().unwrap();
        assert_eq!(doc.points.len(), 3);
        assert_eq!(doc.value_types.len(), 2);
    }

    #[test]
    fn test_late_arrival_fixes_measurement_start() {
        // Batch order: the later sample first. The sort puts 61_000 first,
        // so the measurement start is the earliest sample.
        let batch = CoalescedBatch::from_messages(
            vec![
                message(61_120, 60, &[("load", Some(2.0))]),
                message(61_000, 60, &[("load", Some(1.0))]),
            ],
            Vec::new(),
        );
        let seed = batch.measurements.values().next().unwrap();
        assert_eq!(seed.start, 61_000);
    }

    #[test]
    fn test_repeat_measurement_keeps_latest_meta_and_interval() {
        let mut early = message(61_000, 60, &[("load", Some(1.0))]);
        early.meta = json!({"host": "host1", "rack": "old"})
            .as_object()
            .unwrap()
            .clone();
        let mut late = message(61_300, 30, &[("load", Some(2.0))]);
        late.meta = json!({"host": "host1", "rack": "new"})
            .as_object()
            .unwrap()
            .clone();

        let batch = CoalescedBatch::from_messages(vec![late, early], Vec::new());
        let seed = batch.measurements.values().next().unwrap();
        assert_eq!(seed.start, 61_000);
        assert_eq!(seed.interval, 30);
        assert_eq!(seed.meta.get("rack").unwrap(), "new");
    }

    #[test]
    fn test_same_time_later_in_batch_wins() {
        let batch = CoalescedBatch::from_messages(
            vec![
                message(61_000, 60, &[("load", Some(1.0))]),
                message(61_000, 60, &[("load", Some(9.0))]),
            ],
            Vec::new(),
        );
        let doc = batch.documents.values().next().unwrap();
        assert_eq!(doc.points.len(), 1);
        assert_eq!(doc.points[0].value, Some(9.0));
    }

    #[test]
    fn test_value_types_collect_null_samples_too() {
        let batch = CoalescedBatch::from_messages(
            vec![message(61_000, 60, &[("load", None)])],
            Vec::new(),
        );
        assert!(batch.value_types.get("cpu").unwrap().contains("load"));
    }

    #[test]
    fn test_interval_change_within_batch_targets_two_buckets() {
        let batch = CoalescedBatch::from_messages(
            vec![
                message(61_000, 60, &[("load", Some(1.0))]),
                message(121_000, 30, &[("load", Some(2.0))]),
            ],
            Vec::new(),
        );
        // 60s interval -> [60_000, 120_000); 30s interval -> [120_000, 150_000)
        assert_eq!(batch.documents.len(), 2);
    }

    #[test]
    fn test_events_bucketed_and_merged_by_identity() {
        let batch = CoalescedBatch::from_messages(
            Vec::new(),
            vec![
                event(100, "rtr_a", "first"),
                event(100, "rtr_a", "second"),
                event(100, "rtr_b", "other"),
                event(90_000, "rtr_a", "next-day"),
            ],
        );
        assert_eq!(batch.events.len(), 2);
        let first_bucket = batch
            .events
            .get(&("interface".to_string(), "outage".to_string(), 0, 86_400))
            .unwrap();
        assert_eq!(first_bucket.events.len(), 2);
        let overwritten = first_bucket
            .events
            .iter()
            .find(|e| e.identifier == "rtr_a")
            .unwrap();
        assert_eq!(overwritten.text, "second");
    }
}
