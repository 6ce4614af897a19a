//! Event model, canonical JSON, and shared error types for the event-graph
//! storage core of a federated messaging homeserver.
#![warn(missing_docs)]

pub mod canonical_json;
mod error;
mod event;

pub use self::{
    canonical_json::{
        encode_canonical_json, prune_for_content_hash, prune_for_reference, to_canonical_value,
        try_from_json_map, CanonicalJsonError, CanonicalJsonObject, CanonicalJsonValue,
    },
    error::{Error, Result},
    event::{Event, EventBuilder, EventId, EventReference, PriorState, RoomId, ServerName},
};
