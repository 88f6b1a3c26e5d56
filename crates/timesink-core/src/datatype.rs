//! Data-type descriptors.
//!
//! A data type corresponds to one database in the store and describes the
//! value types its measurements may carry and the metadata fields a
//! measurement record keeps. Descriptors are loaded by the registry from the
//! store's `metadata` collection and shared read-only across the worker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Description of one named value series within a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTypeInfo {
    pub description: String,
    pub units: String,
}

impl ValueTypeInfo {
    /// The placeholder descriptor used when a value type is first seen in a
    /// batch before anyone has documented it.
    pub fn placeholder(value_type: &str) -> Self {
        Self {
            description: value_type.to_string(),
            units: value_type.to_string(),
        }
    }
}

/// Declaration of one metadata field on a measurement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaField {
    pub required: bool,
}

/// The singleton metadata document of a database, as stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeMetadata {
    #[serde(default)]
    pub value_types: BTreeMap<String, ValueTypeInfo>,
    #[serde(default)]
    pub metadata_fields: BTreeMap<String, MetaField>,
}

/// A loaded data-type descriptor: the metadata document plus its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataType {
    pub name: String,
    pub value_types: BTreeMap<String, ValueTypeInfo>,
    pub metadata_fields: BTreeMap<String, MetaField>,
}

impl DataType {
    pub fn from_metadata(name: &str, metadata: TypeMetadata) -> Self {
        Self {
            name: name.to_string(),
            value_types: metadata.value_types,
            metadata_fields: metadata.metadata_fields,
        }
    }

    /// Derive the measurement identifier from a message's `meta` map.
    ///
    /// The identifier is the values of the required metadata fields joined
    /// with `__` in field-name order; `None` when any required field is
    /// missing or the type declares no required fields. Field-name order
    /// makes the derivation identical across workers.
    pub fn identifier_from_meta(&self, meta: &Map<String, Value>) -> Option<String> {
        let mut parts = Vec::new();
        for (field, declaration) in &self.metadata_fields {
            if !declaration.required {
                continue;
            }
            let value = meta.get(field)?;
            parts.push(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("__"))
        }
    }

    /// Filter a message's `meta` down to the fields declared required.
    ///
    /// Only these entries are persisted on a new measurement record.
    pub fn required_meta(&self, meta: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for (field, declaration) in &self.metadata_fields {
            if !declaration.required {
                continue;
            }
            if let Some(value) = meta.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interface_type() -> DataType {
        let mut metadata_fields = BTreeMap::new();
        metadata_fields.insert("device".to_string(), MetaField { required: true });
        metadata_fields.insert("if_name".to_string(), MetaField { required: true });
        metadata_fields.insert("descr".to_string(), MetaField { required: false });
        DataType::from_metadata(
            "interface",
            TypeMetadata {
                value_types: BTreeMap::new(),
                metadata_fields,
            },
        )
    }

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_identifier_joins_required_fields_in_name_order() {
        let dt = interface_type();
        let m = meta(json!({"device": "rtr_a", "if_name": "ge-0/0/0", "descr": "uplink"}));
        // "device" sorts before "if_name"
        assert_eq!(dt.identifier_from_meta(&m).unwrap(), "rtr_a__ge-0/0/0");
    }

    #[test]
    fn test_identifier_missing_required_field() {
        let dt = interface_type();
        let m = meta(json!({"device": "rtr_a"}));
        assert!(dt.identifier_from_meta(&m).is_none());
    }

    #[test]
    fn test_identifier_non_string_value() {
        let dt = interface_type();
        let m = meta(json!({"device": "rtr_a", "if_name": 7}));
        assert_eq!(dt.identifier_from_meta(&m).unwrap(), "rtr_a__7");
    }

    #[test]
    fn test_identifier_none_without_required_fields() {
        let dt = DataType::from_metadata("bare", TypeMetadata::default());
        assert!(dt.identifier_from_meta(&Map::new()).is_none());
    }

    #[test]
    fn test_required_meta_drops_optional_and_unknown_fields() {
        let dt = interface_type();
        let m = meta(json!({
            "device": "rtr_a",
            "if_name": "xe-1/0/0",
            "descr": "transit",
            "unknown": true
        }));
        let filtered = dt.required_meta(&m);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.get("device").unwrap(), "rtr_a");
        assert_eq!(filtered.get("if_name").unwrap(), "xe-1/0/0");
    }

    #[test]
    fn test_metadata_serde_defaults() {
        let metadata: TypeMetadata = serde_json::from_str("{}").unwrap();
        assert!(metadata.value_types.is_empty());
        assert!(metadata.metadata_fields.is_empty());
    }
}
