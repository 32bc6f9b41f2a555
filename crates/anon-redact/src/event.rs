//! Nested event records.
//!
//! An [`Event`] is a schema-less tree: each field holds a scalar, a nested
//! record (a related sub-event) or a list whose record items are further
//! sub-events. The engine takes `&mut Event` for one anonymization pass and
//! rewrites it in place, so callers must not hold on to sub-structures
//! across that call.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Field that carries the organization an event belongs to.
pub const ORGANIZATION_FIELD: &str = "ORGANIZATION";

/// Envelope key wrapping the event in wire payloads.
pub const ENVELOPE_FIELD: &str = "AlarmEvent";

/// Value of one event field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// JSON `null`; becomes the `NoData` sentinel when a key pattern claims it.
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// A related sub-event.
    Record(Event),
    /// An ordered sequence; record items are related sub-events.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Borrow the value as a string if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form of a scalar, as seen by value patterns.
    ///
    /// Booleans and numbers use their JSON spelling. Returns `None` for
    /// `Null` and for composite values.
    pub fn scalar_text(&self) -> Option<Cow<'_, str>> {
        match self {
            FieldValue::Text(s) => Some(Cow::Borrowed(s)),
            FieldValue::Bool(b) => Some(Cow::Owned(b.to_string())),
            FieldValue::Number(n) => Some(Cow::Owned(n.to_string())),
            FieldValue::Null | FieldValue::Record(_) | FieldValue::List(_) => None,
        }
    }

    /// Whether this value is a record or a list.
    pub fn is_composite(&self) -> bool {
        matches!(self, FieldValue::Record(_) | FieldValue::List(_))
    }

    /// Build a list value out of sub-events.
    pub fn records<I: IntoIterator<Item = Event>>(events: I) -> Self {
        FieldValue::List(events.into_iter().map(FieldValue::Record).collect())
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Event> for FieldValue {
    fn from(event: Event) -> Self {
        FieldValue::Record(event)
    }
}

/// A mutable, recursively nested event record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(BTreeMap<String, FieldValue>);

impl Event {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a bare event object.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Convert a JSON value holding an event object.
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Convert back into a JSON value.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Extract the event from a wire payload.
    ///
    /// Accepts `{"AlarmEvent": {...}}` as well as a bare event object.
    pub fn unwrap_envelope(payload: serde_json::Value) -> serde_json::Result<Self> {
        match payload {
            serde_json::Value::Object(mut map) => match map.remove(ENVELOPE_FIELD) {
                Some(inner @ serde_json::Value::Object(_)) => Self::from_value(inner),
                Some(other) => {
                    map.insert(ENVELOPE_FIELD.to_string(), other);
                    Self::from_value(serde_json::Value::Object(map))
                }
                None => Self::from_value(serde_json::Value::Object(map)),
            },
            other => Self::from_value(other),
        }
    }

    /// Wrap the event back into the wire envelope.
    pub fn wrap_envelope(&self) -> serde_json::Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert(ENVELOPE_FIELD.to_string(), self.to_value()?);
        Ok(serde_json::Value::Object(map))
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut FieldValue> {
        self.0.get_mut(field)
    }

    /// Get a field if it holds text.
    pub fn get_text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldValue)> {
        self.0.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// The event's organization; missing or non-text values read as `""`.
    pub fn organization(&self) -> &str {
        self.get_text(ORGANIZATION_FIELD).unwrap_or("")
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Event {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Event(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_event() {
        let event = Event::from_value(json!({
            "SRC_IP": "10.0.0.5",
            "PORT": 443,
            "ACTIVE": true,
            "USERNAME": null,
            "RELATED_EVENTS_INFO": {
                "a": {"SRC_IP": "10.0.0.6"},
                "b": [{"SRC_IP": "10.0.0.7"}, "loose"]
            }
        }))
        .unwrap();

        assert_eq!(event.get_text("SRC_IP"), Some("10.0.0.5"));
        assert!(matches!(event.get("PORT"), Some(FieldValue::Number(_))));
        assert_eq!(event.get("ACTIVE"), Some(&FieldValue::Bool(true)));
        assert_eq!(event.get("USERNAME"), Some(&FieldValue::Null));

        let related = match event.get("RELATED_EVENTS_INFO") {
            Some(FieldValue::Record(r)) => r,
            other => panic!("expected record, got {:?}", other),
        };
        match related.get("b") {
            Some(FieldValue::List(items)) => {
                assert!(matches!(items[0], FieldValue::Record(_)));
                assert_eq!(items[1], FieldValue::Text("loose".to_string()));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_json_roundtrip_preserves_types() {
        let original = json!({
            "A": null,
            "B": 1.5,
            "C": [1, {"D": "x"}],
        });
        let event = Event::from_value(original.clone()).unwrap();
        assert_eq!(event.to_value().unwrap(), original);
    }

    #[test]
    fn test_organization_defaults_to_empty() {
        let event: Event = [("SRC_IP", "1.2.3.4")].into_iter().collect();
        assert_eq!(event.organization(), "");

        let event = Event::from_value(json!({"ORGANIZATION": null})).unwrap();
        assert_eq!(event.organization(), "");

        let event: Event = [("ORGANIZATION", "hospital")].into_iter().collect();
        assert_eq!(event.organization(), "hospital");
    }

    #[test]
    fn test_unwrap_envelope() {
        let event =
            Event::unwrap_envelope(json!({"AlarmEvent": {"ORGANIZATION": "csi"}})).unwrap();
        assert_eq!(event.organization(), "csi");

        let bare = Event::unwrap_envelope(json!({"ORGANIZATION": "db"})).unwrap();
        assert_eq!(bare.organization(), "db");

        let wrapped = bare.wrap_envelope().unwrap();
        assert_eq!(wrapped, json!({"AlarmEvent": {"ORGANIZATION": "db"}}));
    }

    #[test]
    fn test_unwrap_envelope_rejects_non_object() {
        assert!(Event::unwrap_envelope(json!([1, 2, 3])).is_err());
        assert!(Event::unwrap_envelope(json!("text")).is_err());
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(FieldValue::from("x").scalar_text().as_deref(), Some("x"));
        assert_eq!(FieldValue::Bool(false).scalar_text().as_deref(), Some("false"));
        assert_eq!(
            FieldValue::Number(42.into()).scalar_text().as_deref(),
            Some("42")
        );
        assert_eq!(FieldValue::Null.scalar_text(), None);
        assert_eq!(FieldValue::Record(Event::new()).scalar_text(), None);
    }
}
