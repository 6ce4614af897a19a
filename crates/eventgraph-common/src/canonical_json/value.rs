use std::{collections::BTreeMap, fmt};

use js_int::Int;
use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};
use serde_json::{to_string as to_json_string, Value as JsonValue};

use super::CanonicalJsonError;

/// The inner type of [`CanonicalJsonValue::Object`].
///
/// Backed by a `BTreeMap` so that key order is always lexicographic,
/// byte-wise — the property canonical JSON depends on.
pub type CanonicalJsonObject = BTreeMap<String, CanonicalJsonValue>;

/// A JSON value restricted to the shapes canonical JSON allows, and ordered
/// the way canonical JSON requires.
#[derive(Clone, Default, Eq, PartialEq)]
pub enum CanonicalJsonValue {
    /// A JSON null.
    #[default]
    Null,

    /// A JSON boolean.
    Bool(bool),

    /// A JSON integer. Canonical JSON as used for event hashing has no
    /// fractional numbers, so this is the only numeric variant.
    Integer(Int),

    /// A JSON string.
    String(String),

    /// A JSON array.
    Array(Vec<CanonicalJsonValue>),

    /// A JSON object, with keys held in sorted order by the backing
    /// `BTreeMap`.
    Object(CanonicalJsonObject),
}

impl CanonicalJsonValue {
    /// Returns the inner value if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the inner value if this is an `Integer`.
    pub fn as_integer(&self) -> Option<Int> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns a reference to the inner value if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a reference to the inner value if this is an `Object`.
    pub fn as_object(&self) -> Option<&CanonicalJsonObject> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns a mutable reference to the inner value if this is an
    /// `Object`.
    pub fn as_object_mut(&mut self) -> Option<&mut CanonicalJsonObject> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns a reference to the inner value if this is an `Array`.
    pub fn as_array(&self) -> Option<&[CanonicalJsonValue]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for CanonicalJsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.debug_tuple("Null").finish(),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Integer(v) => fmt::Debug::fmt(v, f),
            Self::String(v) => f.debug_tuple("String").field(v).finish(),
            Self::Array(v) => f.debug_tuple("Array").field(v).finish(),
            Self::Object(v) => f.debug_tuple("Object").field(v).finish(),
        }
    }
}

impl fmt::Display for CanonicalJsonValue {
    /// Renders this value as canonical JSON bytes.
    ///
    /// Intentionally ignores formatting flags (`{:#}` etc.) — any added
    /// whitespace would no longer be the canonical form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_json_string(&self).map_err(|_| fmt::Error)?)
    }
}

impl TryFrom<JsonValue> for CanonicalJsonValue {
    type Error = CanonicalJsonError;

    fn try_from(val: JsonValue) -> Result<Self, Self::Error> {
        Ok(match val {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(num) => Self::Integer(
                Int::try_from(num.as_i64().ok_or(CanonicalJsonError::IntegerOutOfRange)?)
                    .map_err(|_| CanonicalJsonError::IntegerOutOfRange)?,
            ),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(vec) => {
                Self::Array(vec.into_iter().map(TryInto::try_into).collect::<Result<_, _>>()?)
            }
            JsonValue::Object(obj) => Self::Object(
                obj.into_iter()
                    .map(|(k, v)| Ok((k, v.try_into()?)))
                    .collect::<Result<CanonicalJsonObject, CanonicalJsonError>>()?,
            ),
        })
    }
}

impl From<CanonicalJsonValue> for JsonValue {
    fn from(val: CanonicalJsonValue) -> Self {
        match val {
            CanonicalJsonValue::Null => Self::Null,
            CanonicalJsonValue::Bool(b) => Self::Bool(b),
            CanonicalJsonValue::Integer(n) => Self::Number(i64::from(n).into()),
            CanonicalJsonValue::String(s) => Self::String(s),
            CanonicalJsonValue::Array(vec) => Self::Array(vec.into_iter().map(Into::into).collect()),
            CanonicalJsonValue::Object(obj) => {
                Self::Object(obj.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for CanonicalJsonValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<String> for CanonicalJsonValue {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

impl From<&str> for CanonicalJsonValue {
    fn from(val: &str) -> Self {
        Self::String(val.to_owned())
    }
}

impl From<Vec<CanonicalJsonValue>> for CanonicalJsonValue {
    fn from(val: Vec<CanonicalJsonValue>) -> Self {
        Self::Array(val)
    }
}

impl From<CanonicalJsonObject> for CanonicalJsonValue {
    fn from(val: CanonicalJsonObject) -> Self {
        Self::Object(val)
    }
}

impl Serialize for CanonicalJsonValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(v) => v.serialize(serializer),
            Self::Object(m) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CanonicalJsonValue {
    fn deserialize<D>(deserializer: D) -> Result<CanonicalJsonValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = JsonValue::deserialize(deserializer)?;
        val.try_into().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::CanonicalJsonValue;

    #[test]
    fn display_renders_canonical_bytes() {
        let json: CanonicalJsonValue =
            json!({ "city": "London", "street": "10 Downing Street" }).try_into().unwrap();

        let expected = r#"{"city":"London","street":"10 Downing Street"}"#;
        assert_eq!(format!("{json}"), expected);
        assert_eq!(format!("{json:#}"), expected);
    }
}
