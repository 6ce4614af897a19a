//! Canonical JSON: deterministic serialization, and the two pruning
//! operations ("redaction") used before hashing and signing an event.

use std::fmt;

use serde::Serialize;
use serde_json::{Error as JsonError, Value as JsonValue};

mod value;

pub use self::value::{CanonicalJsonObject, CanonicalJsonValue};

/// Errors that can occur while converting to or serializing canonical JSON.
#[derive(Debug)]
pub enum CanonicalJsonError {
    /// A JSON number did not fit the range of values canonical JSON event
    /// fields are expected to hold.
    IntegerOutOfRange,

    /// Serialization or deserialization through `serde_json` failed.
    SerDe(JsonError),
}

impl fmt::Display for CanonicalJsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntegerOutOfRange => f.write_str("number is not a valid canonical JSON integer"),
            Self::SerDe(err) => write!(f, "serde error: {err}"),
        }
    }
}

impl std::error::Error for CanonicalJsonError {}

impl From<JsonError> for CanonicalJsonError {
    fn from(err: JsonError) -> Self {
        Self::SerDe(err)
    }
}

/// Converts a `serde_json::Map` to a `CanonicalJsonObject`, failing if any
/// value is outside the shapes canonical JSON allows.
pub fn try_from_json_map(
    json: serde_json::Map<String, JsonValue>,
) -> Result<CanonicalJsonObject, CanonicalJsonError> {
    json.into_iter().map(|(k, v)| Ok((k, v.try_into()?))).collect()
}

/// Converts any `Serialize` value to a `CanonicalJsonValue`.
pub fn to_canonical_value<T: Serialize>(value: T) -> Result<CanonicalJsonValue, CanonicalJsonError> {
    serde_json::to_value(value)?.try_into()
}

/// Serializes a canonical JSON value to its deterministic byte form:
/// UTF-8, object keys in byte-wise lexicographic order, no insignificant
/// whitespace, shortest-escape strings, integer-only numbers.
///
/// The same input value yields the identical byte string regardless of
/// which implementation produced it — this is the property federation
/// hashing and signing depend on.
pub fn encode_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    let canonical = to_canonical_value(value)?;
    serde_json::to_vec(&canonical).map_err(Into::into)
}

/// Removes the keys that never participate in an event's content hash:
/// `age_ts`, `unsigned`, `signatures`, `hashes`, `outlier`, `destinations`.
///
/// This is a shallow operation — it does not recurse into `content` or any
/// other nested object.
pub fn prune_for_content_hash(mut event: CanonicalJsonObject) -> CanonicalJsonObject {
    for key in ["age_ts", "unsigned", "signatures", "hashes", "outlier", "destinations"] {
        event.remove(key);
    }
    event
}

/// Returns the whitelist of `content` keys retained by the redaction
/// algorithm for a given event type. Event types with no entry here retain
/// no `content` keys at all.
///
/// Grounded in Synapse's `prune_event` redaction rules.
fn content_whitelist(event_type: &str) -> &'static [&'static str] {
    match event_type {
        "m.room.member" => &["membership"],
        "m.room.create" => &["creator"],
        "m.room.join_rules" => &["join_rule"],
        "m.room.power_levels" => &[
            "ban",
            "events",
            "events_default",
            "kick",
            "redact",
            "state_default",
            "users",
            "users_default",
        ],
        "m.room.aliases" => &["aliases"],
        _ => &[],
    }
}

/// Applies the room's redaction rules to an event dict, reducing it to the
/// minimal set of fields that identify the event and preserve DAG
/// structure, then strips the fields that `PruneForContentHash` also
/// strips plus `signatures`, `age_ts`, `unsigned` a second time (some of
/// those may have been reintroduced by a caller building up the dict from
/// scratch).
pub fn prune_for_reference(event: &CanonicalJsonObject) -> CanonicalJsonObject {
    const STRUCTURAL_KEYS: &[&str] =
        &["event_id", "type", "room_id", "sender", "prev_events", "auth_events", "depth", "origin", "origin_server_ts"];

    let mut pruned = CanonicalJsonObject::new();

    for key in STRUCTURAL_KEYS {
        if let Some(value) = event.get(*key) {
            pruned.insert((*key).to_owned(), value.clone());
        }
    }

    if let Some(state_key) = event.get("state_key") {
        pruned.insert("state_key".to_owned(), state_key.clone());
    }

    let event_type = event.get("type").and_then(CanonicalJsonValue::as_str).unwrap_or_default();
    let whitelist = content_whitelist(event_type);
    if let Some(CanonicalJsonValue::Object(content)) = event.get("content") {
        let mut kept = CanonicalJsonObject::new();
        for key in whitelist {
            if let Some(value) = content.get(*key) {
                kept.insert((*key).to_string(), value.clone());
            }
        }
        pruned.insert("content".to_owned(), CanonicalJsonValue::Object(kept));
    } else {
        pruned.insert("content".to_owned(), CanonicalJsonValue::Object(CanonicalJsonObject::new()));
    }

    for key in ["signatures", "age_ts", "unsigned"] {
        pruned.remove(key);
    }

    pruned
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: serde_json::Value) -> CanonicalJsonObject {
        try_from_json_map(value.as_object().unwrap().clone()).unwrap()
    }

    #[test]
    fn encode_sorts_keys_and_strips_whitespace() {
        let value = json!({"b": 1, "a": 2});
        let bytes = encode_canonical_json(&value).unwrap();
        assert_eq!(bytes, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn prune_for_content_hash_removes_exactly_the_listed_keys() {
        let event = obj(json!({
            "event_id": "$a",
            "age_ts": 123,
            "unsigned": {},
            "signatures": {},
            "hashes": {},
            "outlier": false,
            "destinations": ["example.org"],
            "content": {"body": "hi"},
        }));

        let pruned = prune_for_content_hash(event);
        assert!(pruned.contains_key("event_id"));
        assert!(pruned.contains_key("content"));
        for key in ["age_ts", "unsigned", "signatures", "hashes", "outlier", "destinations"] {
            assert!(!pruned.contains_key(key), "expected {key} to be removed");
        }
    }

    #[test]
    fn prune_for_reference_applies_member_whitelist() {
        let event = obj(json!({
            "event_id": "$a",
            "type": "m.room.member",
            "room_id": "!r:example.org",
            "sender": "@alice:example.org",
            "state_key": "@alice:example.org",
            "content": {"membership": "join", "displayname": "Alice", "avatar_url": null},
            "prev_events": [],
            "auth_events": [],
            "depth": 1,
            "origin": "example.org",
            "origin_server_ts": 0,
            "signatures": {"example.org": {"ed25519:1": "abc"}},
        }));

        let pruned = prune_for_reference(&event);
        let content = pruned.get("content").unwrap().as_object().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content.get("membership").unwrap().as_str(), Some("join"));
        assert!(!pruned.contains_key("signatures"));
    }

    #[test]
    fn prune_for_reference_drops_all_content_for_unknown_type() {
        let event = obj(json!({
            "event_id": "$a",
            "type": "m.room.message",
            "room_id": "!r:example.org",
            "sender": "@alice:example.org",
            "content": {"body": "hello"},
            "prev_events": [],
            "auth_events": [],
            "depth": 1,
            "origin": "example.org",
            "origin_server_ts": 0,
        }));

        let pruned = prune_for_reference(&event);
        let content = pruned.get("content").unwrap().as_object().unwrap();
        assert!(content.is_empty());
    }
}
