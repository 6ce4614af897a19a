//! The event data model: identifiers, the `Event` record itself, and the
//! staged builder used to construct one before it is hashed and signed.

use std::{collections::BTreeMap, fmt};

use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::canonical_json::{self, CanonicalJsonError, CanonicalJsonObject};

macro_rules! owned_string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrows the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

owned_string_id!(EventId, "An event's globally-unique, opaque identifier.");
owned_string_id!(RoomId, "A room's opaque identifier.");
owned_string_id!(ServerName, "A homeserver's identity, used as `origin` and as a signature key.");

/// An edge to another event: the event it points at, plus that event's
/// reference hashes as known by the event doing the pointing.
///
/// Encoded as a two-element array, `[event_id, {"sha256": "..."}]`, matching
/// how `prev_events`/`auth_events` entries are represented on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventReference {
    /// The event being referenced.
    pub event_id: EventId,

    /// Reference hashes of the referenced event, keyed by algorithm name.
    pub hashes: BTreeMap<String, String>,
}

impl EventReference {
    /// Creates a reference with no attached hashes.
    pub fn new(event_id: EventId) -> Self {
        Self { event_id, hashes: BTreeMap::new() }
    }
}

impl Serialize for EventReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.event_id)?;
        tup.serialize_element(&self.hashes)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for EventReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (event_id, hashes) = <(EventId, BTreeMap<String, String>)>::deserialize(deserializer)?;
        Ok(Self { event_id, hashes })
    }
}

/// Whether an event-in-progress carries a frozen snapshot of the room's
/// prior state events.
///
/// Modeled as a discriminated union rather than probing for an optional
/// field at signing time: a draft either carries a snapshot or it doesn't,
/// and that's known at construction time.
#[derive(Clone, Debug, Default)]
pub enum PriorState {
    /// No prior-state snapshot; `state_hash` is not computed when sealing.
    #[default]
    None,

    /// A frozen snapshot of state event ids as they stood before this
    /// event. `state_hash` is computed over their canonically-encoded,
    /// sorted list when sealing.
    Frozen(Vec<EventId>),
}

/// A persistent-data-unit: an immutable, content-addressed event in a
/// room's DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event's own id.
    pub event_id: EventId,

    /// The room this event belongs to.
    pub room_id: RoomId,

    /// The event type, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Present iff this is a state event; the state's sub-key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,

    /// Non-negative integer, monotonically increasing along the DAG.
    pub depth: u64,

    /// The server that created this event.
    pub origin: ServerName,

    /// Milliseconds since the Unix epoch, as reported by `origin`.
    pub origin_server_ts: i64,

    /// Arbitrary event-type-specific JSON payload.
    #[serde(default)]
    pub content: JsonValue,

    /// Forward edges: the events this event was created on top of.
    #[serde(default)]
    pub prev_events: Vec<EventReference>,

    /// Authorization edges: the events that permit this event to exist.
    #[serde(default)]
    pub auth_events: Vec<EventReference>,

    /// Content hash, keyed by algorithm name, base64-encoded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,

    /// Hash of the sorted prior-state event id list, when this event
    /// carried a frozen snapshot at signing time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_hash: BTreeMap<String, String>,

    /// Signatures, keyed by server name then by key identifier.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,

    /// Server-local receipt timestamp; never part of a hash or signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_ts: Option<i64>,

    /// Server-local annotations; never part of a hash or signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<JsonValue>,

    /// True when this event was fetched out-of-band (e.g. as an auth
    /// ancestor) and must not participate in extremity tracking.
    #[serde(default)]
    pub outlier: bool,
}

impl Event {
    /// Converts this event to a `CanonicalJsonObject` with all of its
    /// fields, suitable as input to `prune_for_content_hash` or
    /// `prune_for_reference`.
    pub fn to_canonical_json_object(&self) -> Result<CanonicalJsonObject, CanonicalJsonError> {
        let value = serde_json::to_value(self)?;
        let map = value.as_object().cloned().expect("Event always serializes to a JSON object");
        canonical_json::try_from_json_map(map)
    }
}

/// Builds a draft `Event` field by field before it is hashed and signed.
///
/// Produces an unsealed draft (empty `hashes`/`state_hash`/`signatures`);
/// pass it to `EventHasher::seal` in `eventgraph-signing` to obtain the
/// immutable, sealed form.
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event_id: EventId,
    room_id: RoomId,
    event_type: String,
    state_key: Option<String>,
    depth: u64,
    origin: ServerName,
    origin_server_ts: i64,
    content: JsonValue,
    prev_events: Vec<EventReference>,
    auth_events: Vec<EventReference>,
    outlier: bool,
}

impl EventBuilder {
    /// Starts a new builder for the given identity fields.
    pub fn new(
        event_id: impl Into<EventId>,
        room_id: impl Into<RoomId>,
        event_type: impl Into<String>,
        origin: impl Into<ServerName>,
        origin_server_ts: i64,
        depth: u64,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            event_type: event_type.into(),
            state_key: None,
            depth,
            origin: origin.into(),
            origin_server_ts,
            content: JsonValue::Object(Default::default()),
            prev_events: Vec::new(),
            auth_events: Vec::new(),
            outlier: false,
        }
    }

    /// Marks this event as a state event with the given state key.
    pub fn state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = Some(state_key.into());
        self
    }

    /// Sets the event's content.
    pub fn content(mut self, content: JsonValue) -> Self {
        self.content = content;
        self
    }

    /// Sets the forward (`prev_events`) edges.
    pub fn prev_events(mut self, prev_events: Vec<EventReference>) -> Self {
        self.prev_events = prev_events;
        self
    }

    /// Sets the authorization (`auth_events`) edges.
    pub fn auth_events(mut self, auth_events: Vec<EventReference>) -> Self {
        self.auth_events = auth_events;
        self
    }

    /// Marks this event as an outlier, fetched out-of-band.
    pub fn outlier(mut self, outlier: bool) -> Self {
        self.outlier = outlier;
        self
    }

    /// Finishes the draft. The result carries no hashes or signatures yet.
    pub fn build(self) -> Event {
        Event {
            event_id: self.event_id,
            room_id: self.room_id,
            event_type: self.event_type,
            state_key: self.state_key,
            depth: self.depth,
            origin: self.origin,
            origin_server_ts: self.origin_server_ts,
            content: self.content,
            prev_events: self.prev_events,
            auth_events: self.auth_events,
            hashes: BTreeMap::new(),
            state_hash: BTreeMap::new(),
            signatures: BTreeMap::new(),
            age_ts: None,
            unsigned: None,
            outlier: self.outlier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_unsealed_draft() {
        let draft = EventBuilder::new("$a", "!r:example.org", "m.room.message", "example.org", 0, 1)
            .content(serde_json::json!({"body": "hi"}))
            .build();

        assert!(draft.hashes.is_empty());
        assert!(draft.signatures.is_empty());
        assert!(draft.state_hash.is_empty());
        assert!(!draft.outlier);
    }

    #[test]
    fn event_reference_round_trips_as_tuple() {
        let reference = EventReference {
            event_id: EventId::from("$a"),
            hashes: BTreeMap::from([("sha256".to_owned(), "abc".to_owned())]),
        };
        let json = serde_json::to_value(&reference).unwrap();
        assert!(json.is_array());
        let back: EventReference = serde_json::from_value(json).unwrap();
        assert_eq!(back, reference);
    }
}
