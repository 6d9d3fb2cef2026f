//! Payload wire form
//!
//! Every record carries two fields: an `event_type` tag and a `payload` blob
//! holding the JSON encoding of a flat string/number mapping. Values that are
//! not strings or numbers are stored as their JSON text.

use std::collections::BTreeMap;
use std::fmt;

use courier_log::Fields;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::CodecError;

/// Field holding the event-type tag.
pub const EVENT_TYPE_FIELD: &str = "event_type";
/// Field holding the JSON-encoded payload.
pub const PAYLOAD_FIELD: &str = "payload";
/// Key used when a non-mapping value is published.
pub const SCALAR_KEY: &str = "data";

/// A single payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Number(Number),
    Text(String),
}

impl PayloadValue {
    /// The text, if this is a text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Numeric view; numeric text is parsed.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::Text(s),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for PayloadValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for PayloadValue {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(n: f64) -> Self {
        // NaN and infinities have no JSON number form.
        Number::from_f64(n).map_or_else(|| Self::Text(n.to_string()), Self::Number)
    }
}

impl From<uuid::Uuid> for PayloadValue {
    fn from(id: uuid::Uuid) -> Self {
        Self::Text(id.to_string())
    }
}

/// Flat, ordered event payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PayloadValue::as_str)
    }

    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PayloadValue::as_f64)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Whether every key in `keys` is present.
    #[must_use]
    pub fn has_all(&self, keys: &[&str]) -> bool {
        keys.iter().all(|k| self.contains_key(k))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PayloadValue)> {
        self.0.iter()
    }

    /// Coerce an arbitrary JSON value into a flat payload.
    ///
    /// Objects keep their keys with non-scalar values stringified; anything
    /// else becomes `{"data": <text>}`.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(
                map.into_iter()
                    .map(|(k, v)| (k, PayloadValue::from_json(v)))
                    .collect(),
            ),
            Value::String(s) => Self::new().with(SCALAR_KEY, s),
            other => Self::new().with(SCALAR_KEY, other.to_string()),
        }
    }

    /// Serialize any value and coerce it with [`Payload::from_value`].
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        Ok(Self::from_value(serde_json::to_value(value)?))
    }

    /// JSON text of this payload.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored payload blob, coercing it to flat form.
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Ok(Self::from_value(serde_json::from_str(json)?))
    }
}

impl FromIterator<(String, PayloadValue)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, PayloadValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Build the stored fields for a record.
pub fn encode(event_type: &str, payload: &Payload) -> Result<Fields, CodecError> {
    let mut fields = Fields::new();
    fields.insert(EVENT_TYPE_FIELD.to_string(), event_type.to_string());
    fields.insert(PAYLOAD_FIELD.to_string(), payload.to_json()?);
    Ok(fields)
}

/// Recover the payload from stored fields. A missing blob is an empty mapping.
pub fn decode(fields: &Fields) -> Result<Payload, CodecError> {
    match fields.get(PAYLOAD_FIELD) {
        Some(json) => Payload::from_json(json),
        None => Ok(Payload::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Payload {
        Payload::new()
            .with("auction_id", "a-1")
            .with("winning_price", 99.99)
            .with("lots", 3_i64)
    }

    #[test]
    fn encode_writes_type_and_json_blob() {
        let fields = encode("AuctionEnded", &sample()).unwrap();

        assert_eq!(fields[EVENT_TYPE_FIELD], "AuctionEnded");
        let blob: Value = serde_json::from_str(&fields[PAYLOAD_FIELD]).unwrap();
        assert_eq!(blob["winning_price"], json!(99.99));
        assert_eq!(blob["auction_id"], json!("a-1"));
    }

    #[test]
    fn decode_inverts_encode() {
        let payload = sample();
        let fields = encode("AuctionEnded", &payload).unwrap();
        assert_eq!(decode(&fields).unwrap(), payload);
    }

    #[test]
    fn encode_is_stable_through_decode() {
        let fields = encode("T", &sample()).unwrap();
        let again = encode("T", &decode(&fields).unwrap()).unwrap();
        assert_eq!(fields, again);
    }

    #[test]
    fn missing_payload_decodes_empty() {
        let fields = Fields::new();
        assert!(decode(&fields).unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut fields = Fields::new();
        fields.insert(PAYLOAD_FIELD.to_string(), "{not json".to_string());
        assert!(decode(&fields).is_err());
    }

    #[test]
    fn non_native_values_become_text() {
        let payload = Payload::from_value(json!({
            "flag": true,
            "nothing": null,
            "list": [1, 2],
            "nested": {"a": 1},
        }));

        assert_eq!(payload.get_str("flag"), Some("true"));
        assert_eq!(payload.get_str("nothing"), Some("null"));
        assert_eq!(payload.get_str("list"), Some("[1,2]"));
        assert_eq!(payload.get_str("nested"), Some("{\"a\":1}"));
    }

    #[test]
    fn scalars_are_wrapped_under_data() {
        assert_eq!(
            Payload::from_value(json!("hello")).get_str(SCALAR_KEY),
            Some("hello")
        );
        assert_eq!(Payload::from_value(json!(42)).get_str(SCALAR_KEY), Some("42"));
    }

    #[test]
    fn from_serialize_flattens_structs() {
        #[derive(Serialize)]
        struct Bid {
            bidder: String,
            amount: f64,
            accepted: bool,
        }

        let payload = Payload::from_serialize(&Bid {
            bidder: "b-1".into(),
            amount: 12.5,
            accepted: false,
        })
        .unwrap();

        assert_eq!(payload.get_str("bidder"), Some("b-1"));
        assert_eq!(payload.get_f64("amount"), Some(12.5));
        assert_eq!(payload.get_str("accepted"), Some("false"));
    }

    #[test]
    fn numeric_text_reads_as_number() {
        let payload = Payload::new().with("amount", "10.25");
        assert_eq!(payload.get_f64("amount"), Some(10.25));
        assert_eq!(payload.get_str("amount"), Some("10.25"));
    }

    #[test]
    fn non_finite_floats_are_stored_as_text() {
        let value = PayloadValue::from(f64::NAN);
        assert_eq!(value, PayloadValue::Text("NaN".to_string()));
    }
}
