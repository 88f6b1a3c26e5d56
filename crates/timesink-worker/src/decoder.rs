//! Batch decoder.
//!
//! Validates the batch envelope item by item and constructs typed messages.
//! Per-item policy: anything malformed (non-object, missing `type`, failed
//! construction, unknown data type after one refresh attempt) is logged and
//! skipped. Only a failed registry refresh aborts the batch, since that is a
//! store problem redelivery can fix.

use crate::error::Result;
use crate::registry::DataTypeRegistry;
use serde_json::Value;
use std::sync::Arc;
use timesink_core::{classify, DataMessage, EventMessage, MessageKind};

/// The typed messages decoded from one batch, in arrival order.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub data_messages: Vec<DataMessage>,
    pub event_messages: Vec<EventMessage>,
    /// Items dropped by the per-item policy.
    pub skipped: usize,
}

pub struct Decoder {
    registry: Arc<DataTypeRegistry>,
}

impl Decoder {
    pub fn new(registry: Arc<DataTypeRegistry>) -> Self {
        Self { registry }
    }

    /// Decode a batch of payload items.
    ///
    /// At most one registry refresh is attempted per batch, on the first
    /// unknown data type; a type still unknown afterwards skips its items.
    pub async fn decode(&self, items: &[Value]) -> Result<DecodedBatch> {
        let mut batch = DecodedBatch::default();
        let mut refreshed = false;

        for item in items {
            let Some(object) = item.as_object() else {
                tracing::warn!("batch item is not an object, skipping");
                batch.skipped += 1;
                continue;
            };
            let Some(type_field) = object.get("type").and_then(Value::as_str) else {
                tracing::warn!("batch item has no 'type', skipping");
                batch.skipped += 1;
                continue;
            };

            let kind = classify(type_field);
            let name = kind.data_type();

            let mut data_type = self.registry.get(name).await;
            if data_type.is_none() && !refreshed {
                refreshed = true;
                self.registry.refresh().await?;
                data_type = self.registry.get(name).await;
            }
            let Some(data_type) = data_type else {
                tracing::warn!(data_type = %name, "unknown data type, skipping item");
                batch.skipped += 1;
                continue;
            };

            match kind {
                MessageKind::Data(_) => match DataMessage::from_item(&data_type, object) {
                    Ok(message) => batch.data_messages.push(message),
                    Err(error) => {
                        tracing::warn!(data_type = %name, error = %error, "malformed data message, skipping");
                        batch.skipped += 1;
                    }
                },
                MessageKind::Event(_) => match EventMessage::from_item(name, object) {
                    Ok(message) => batch.event_messages.push(message),
                    Err(error) => {
                        tracing::warn!(data_type = %name, error = %error, "malformed event message, skipping");
                        batch.skipped += 1;
                    }
                },
            }
        }

        Ok(batch)
    }
}
