//! Timesink Core Data Model
//!
//! Pure types shared by the backend seams and the ingestion worker:
//! cache/lock key builders, data-type descriptors, measurements, data
//! documents (time buckets) and their points, event documents, and the typed
//! messages decoded from queue payloads.
//!
//! Nothing in this crate performs I/O. All bucket arithmetic and identity
//! rules (point identity, event identity, key grammar) live here so that the
//! store, cache, and writers agree on them by construction.

pub mod datatype;
pub mod document;
pub mod event;
pub mod ids;
pub mod measurement;
pub mod message;

pub use datatype::{DataType, MetaField, TypeMetadata, ValueTypeInfo};
pub use document::{
    bucket_bounds, document_length, DataDocument, DataPoint, HIGH_RESOLUTION_DOCUMENT_SIZE,
};
pub use event::{event_bucket_bounds, Event, EventDocument, EVENT_DOCUMENT_DURATION};
pub use measurement::Measurement;
pub use message::{classify, DataMessage, EventMessage, MessageError, MessageKind};
