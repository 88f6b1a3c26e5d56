//! Event buckets and events.
//!
//! Events are bucketed into fixed `EVENT_DOCUMENT_DURATION`-wide documents
//! keyed by `(data_type, event_type, start, end)`. Within a bucket, event
//! identity is `(start, identifier)`; a later write replaces an earlier one.

use crate::ids;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Width in seconds of an event bucket (one day).
pub const EVENT_DOCUMENT_DURATION: i64 = 86_400;

/// The aligned `[start, end)` event bucket covering `time`.
pub fn event_bucket_bounds(time: i64) -> (i64, i64) {
    let start = time.div_euclid(EVENT_DOCUMENT_DURATION) * EVENT_DOCUMENT_DURATION;
    (start, start + EVENT_DOCUMENT_DURATION)
}

/// One event as stored inside an event document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub start: i64,
    pub end: i64,
    pub identifier: String,
    pub affected: Value,
    pub text: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// A time bucket of events of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDocument {
    pub id: String,
    pub data_type: String,
    pub event_type: String,
    pub start: i64,
    pub end: i64,
    pub events: Vec<Event>,
}

impl EventDocument {
    pub fn empty(data_type: &str, event_type: &str, start: i64, end: i64) -> Self {
        Self {
            id: ids::event_document_key(data_type, event_type, start, end),
            data_type: data_type.to_string(),
            event_type: event_type.to_string(),
            start,
            end,
            events: Vec::new(),
        }
    }

    pub fn cache_key(&self) -> String {
        ids::event_document_key(&self.data_type, &self.event_type, self.start, self.end)
    }

    /// Overlay `incoming` onto `existing` under the `(start, identifier)`
    /// identity; incoming events replace existing ones. The result is sorted
    /// by identity so every worker writes the same list.
    pub fn merge_events(existing: Vec<Event>, incoming: Vec<Event>) -> Vec<Event> {
        let mut index: BTreeMap<(i64, String), Event> = BTreeMap::new();
        for event in existing.into_iter().chain(incoming) {
            index.insert((event.start, event.identifier.clone()), event);
        }
        index.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(start: i64, identifier: &str, text: &str) -> Event {
        Event {
            start,
            end: start + 60,
            identifier: identifier.to_string(),
            affected: json!(["rtr_a"]),
            text: text.to_string(),
            event_type: "outage".to_string(),
        }
    }

    #[test]
    fn test_event_bucket_bounds() {
        assert_eq!(event_bucket_bounds(0), (0, 86_400));
        assert_eq!(event_bucket_bounds(86_399), (0, 86_400));
        assert_eq!(event_bucket_bounds(86_400), (86_400, 172_800));
        let (start, end) = event_bucket_bounds(123_456);
        assert_eq!(start.rem_euclid(EVENT_DOCUMENT_DURATION), 0);
        assert_eq!(end - start, EVENT_DOCUMENT_DURATION);
    }

    #[test]
    fn test_merge_events_incoming_wins() {
        let existing = vec![event(100, "a", "old"), event(200, "b", "keep")];
        let incoming = vec![event(100, "a", "new")];
        let merged = EventDocument::merge_events(existing, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "new");
        assert_eq!(merged[1].text, "keep");
    }

    #[test]
    fn test_merge_events_distinct_identities_union() {
        let existing = vec![event(100, "a", "one")];
        let incoming = vec![event(100, "b", "two"), event(300, "a", "three")];
        let merged = EventDocument::merge_events(existing, incoming);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_events_within_batch_last_wins() {
        let incoming = vec![event(100, "a", "first"), event(100, "a", "second")];
        let merged = EventDocument::merge_events(Vec::new(), incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "second");
    }

    #[test]
    fn test_event_serde_uses_type_field() {
        let json = serde_json::to_value(event(1, "a", "t")).unwrap();
        assert_eq!(json.get("type").unwrap(), "outage");
        assert!(json.get("event_type").is_none());
    }

    #[test]
    fn test_document_id_is_cache_key() {
        let doc = EventDocument::empty("interface", "outage", 86_400, 172_800);
        assert_eq!(doc.id, "interface__event__outage__86400__172800");
        assert_eq!(doc.id, doc.cache_key());
    }
}
