//! Cache and lock key builders.
//!
//! Every key used against the key-value cache and the lock service is built
//! here; callers never assemble keys inline. The grammar is
//! `type__collection[__identifier][__start__end]` with `__` as the separator,
//! and lock keys prefix the corresponding cache key with `lock__`.

/// Cache key for a measurement record: `type__measurements__identifier`.
pub fn measurement_key(data_type: &str, identifier: &str) -> String {
    format!("{}__measurements__{}", data_type, identifier)
}

/// Cache key for a data bucket: `type__data__identifier__start__end`.
pub fn data_document_key(data_type: &str, identifier: &str, start: i64, end: i64) -> String {
    format!("{}__data__{}__{}__{}", data_type, identifier, start, end)
}

/// Cache key for a data type's metadata singleton: `type__metadata`.
pub fn metadata_key(data_type: &str) -> String {
    format!("{}__metadata", data_type)
}

/// Cache key for one advertised value type: `type__metadata__value_type`.
pub fn value_type_key(data_type: &str, value_type: &str) -> String {
    format!("{}__metadata__{}", data_type, value_type)
}

/// Cache key for an event bucket: `type__event__event_type__start__end`.
pub fn event_document_key(data_type: &str, event_type: &str, start: i64, end: i64) -> String {
    format!("{}__event__{}__{}__{}", data_type, event_type, start, end)
}

/// Lock key for any cache key: `lock__` + the cache key.
pub fn lock_key(cache_key: &str) -> String {
    format!("lock__{}", cache_key)
}
