// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event types flowing through the output.
//!
//! A [`RawEvent`] is what the host pipeline hands over: an ordered attribute map
//! plus the event's timestamp. The sanitizer turns it into a [`SanitizedEvent`],
//! and one or more sanitized events are shipped to the collector as a
//! [`Payload`].

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ParseError;

/// Field the host pipeline stores the event timestamp under.
pub const PIPELINE_TIMESTAMP_FIELD: &str = "@timestamp";

/// Event as delivered by the host pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    fields: Map<String, Value>,
    timestamp: String,
}

impl RawEvent {
    pub fn new(fields: Map<String, Value>, timestamp: impl Into<String>) -> Self {
        RawEvent {
            fields,
            timestamp: timestamp.into(),
        }
    }

    /// Builds an event from a JSON object, reading the timestamp from its
    /// `@timestamp` field. The field is kept in the attribute map.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let Value::Object(fields) = value else {
            return Err(ParseError::NotAnObject);
        };
        let timestamp = match fields.get(PIPELINE_TIMESTAMP_FIELD) {
            Some(Value::String(ts)) => ts.clone(),
            Some(Value::Number(ts)) => ts.to_string(),
            Some(other) => return Err(ParseError::InvalidTimestamp(other.to_string())),
            None => return Err(ParseError::MissingTimestamp),
        };
        Ok(RawEvent { fields, timestamp })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Whether the event's `tags` array contains `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        match self.fields.get("tags") {
            Some(Value::Array(tags)) => tags.iter().any(|t| t.as_str() == Some(tag)),
            Some(Value::String(single)) => single == tag,
            _ => false,
        }
    }

    /// Event timestamp as whole seconds since the epoch.
    ///
    /// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.fff]` read as UTC, or an
    /// integer number of seconds.
    pub fn epoch_seconds(&self) -> Result<i64, ParseError> {
        parse_epoch_seconds(&self.timestamp)
    }
}

pub(crate) fn parse_epoch_seconds(raw: &str) -> Result<i64, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::MissingTimestamp);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc().timestamp());
        }
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidTimestamp(raw.to_string()))
}

/// An event whose attribute names are safe for the insert API.
///
/// Only the sanitizer constructs these; they are never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SanitizedEvent(Map<String, Value>);

impl SanitizedEvent {
    pub(crate) fn from_map(attributes: Map<String, Value>) -> Self {
        SanitizedEvent(attributes)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Body of one POST to the collector. The insert API treats an object and a
/// one-element array the same way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Single(SanitizedEvent),
    Batch(Vec<SanitizedEvent>),
}

impl Payload {
    /// Number of events carried.
    pub fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Batch(events) => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> &[SanitizedEvent] {
        match self {
            Payload::Single(event) => std::slice::from_ref(event),
            Payload::Batch(events) => events,
        }
    }
}

/// What the host pipeline can hand to the output.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    Event(RawEvent),
    /// Shutdown sentinel. Never processed as data.
    Shutdown,
}

impl From<RawEvent> for PipelineMessage {
    fn from(event: RawEvent) -> Self {
        PipelineMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_epoch_seconds_rfc3339() {
        let event = RawEvent::new(Map::new(), "2014-09-26T20:37:05.123Z");
        assert_eq!(event.epoch_seconds().unwrap(), 1_411_763_825);
    }

    #[test]
    fn test_epoch_seconds_with_offset() {
        let event = RawEvent::new(Map::new(), "2014-09-26T22:37:05+02:00");
        assert_eq!(event.epoch_seconds().unwrap(), 1_411_763_825);
    }

    #[test]
    fn test_epoch_seconds_naive_is_utc() {
        let event = RawEvent::new(Map::new(), "2014-09-26 20:37:05");
        assert_eq!(event.epoch_seconds().unwrap(), 1_411_763_825);
    }

    #[test]
    fn test_epoch_seconds_integer() {
        let event = RawEvent::new(Map::new(), "1411763825");
        assert_eq!(event.epoch_seconds().unwrap(), 1_411_763_825);
    }

    #[test]
    fn test_epoch_seconds_garbage() {
        let event = RawEvent::new(Map::new(), "last tuesday");
        assert!(matches!(
            event.epoch_seconds(),
            Err(ParseError::InvalidTimestamp(ts)) if ts == "last tuesday"
        ));
    }

    #[test]
    fn test_epoch_seconds_empty() {
        let event = RawEvent::new(Map::new(), "  ");
        assert!(matches!(
            event.epoch_seconds(),
            Err(ParseError::MissingTimestamp)
        ));
    }

    #[test]
    fn test_from_value_keeps_pipeline_timestamp() {
        let event = RawEvent::from_value(json!({
            "@timestamp": "2014-09-26T20:37:05Z",
            "message": "hello",
        }))
        .unwrap();
        assert_eq!(event.timestamp(), "2014-09-26T20:37:05Z");
        assert!(event.fields().contains_key("@timestamp"));
        assert_eq!(event.fields()["message"], "hello");
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(matches!(
            RawEvent::from_value(json!(["a"])),
            Err(ParseError::NotAnObject)
        ));
        assert!(matches!(
            RawEvent::from_value(json!({"message": "no ts"})),
            Err(ParseError::MissingTimestamp)
        ));
    }

    #[test]
    fn test_has_tag() {
        let event = RawEvent::new(object(json!({"tags": ["a", "b"]})), "0");
        assert!(event.has_tag("a"));
        assert!(!event.has_tag("c"));

        let untagged = RawEvent::new(object(json!({"message": "x"})), "0");
        assert!(!untagged.has_tag("a"));
    }

    #[test]
    fn test_payload_shapes() {
        let event = SanitizedEvent::from_map(object(json!({"eventType": "t", "timestamp": 1})));

        let single = serde_json::to_value(Payload::Single(event.clone())).unwrap();
        assert_eq!(single, json!({"eventType": "t", "timestamp": 1}));

        let batch = serde_json::to_value(Payload::Batch(vec![event])).unwrap();
        assert_eq!(batch, json!([{"eventType": "t", "timestamp": 1}]));
    }

    #[test]
    fn test_payload_len() {
        let event = SanitizedEvent::from_map(Map::new());
        assert_eq!(Payload::Single(event.clone()).len(), 1);
        assert_eq!(Payload::Batch(vec![event.clone(), event]).len(), 2);
        assert!(Payload::Batch(vec![]).is_empty());
    }
}
