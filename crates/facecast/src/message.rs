//! Wire messages and the event formatter.
//!
//! Every detection record becomes one [`WireMessage`], serialized as a single
//! JSON document per WebSocket text frame:
//!
//! ```json
//! {"timestamp":1700000000000,"face":{"gender":"female","genderConfidence":0.92,
//!  "age":30.0,"position":{"x":10.0,"y":10.0,"width":50.0,"height":50.0},
//!  "expressions":{"happy":0.8}}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::detection::{DetectionRecord, Gender};
use crate::error::Result;

/// Face position as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The `face` object of a wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacePayload {
    pub gender: Gender,
    pub gender_confidence: f64,
    pub age: f64,
    pub position: Position,
    /// Ordered by name so serialization is canonical
    pub expressions: BTreeMap<String, f64>,
}

/// Timestamped envelope transmitted downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub face: FacePayload,
}

impl WireMessage {
    /// Canonical JSON form, one per text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialized `face` only, used for duplicate checks.
    ///
    /// The timestamp changes every tick and is left out.
    pub fn content_key(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.face)?)
    }
}

/// Source of the timestamp stamped onto each message.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Maps detection records to wire messages.
pub struct EventFormatter {
    clock: Box<dyn Clock>,
}

impl Default for EventFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFormatter").finish_non_exhaustive()
    }
}

impl EventFormatter {
    /// Formatter stamping messages with the wall clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }

    /// Format a record stamped with the current clock reading.
    pub fn format(&self, record: &DetectionRecord) -> WireMessage {
        Self::format_at(record, self.clock.now())
    }

    /// Format a record stamped with `at`.
    ///
    /// Non-finite numbers cannot be represented in JSON and are replaced by 0.
    pub fn format_at(record: &DetectionRecord, at: DateTime<Utc>) -> WireMessage {
        let bbox = &record.bounding_box;
        WireMessage {
            timestamp: at.timestamp_millis(),
            face: FacePayload {
                gender: record.gender,
                gender_confidence: finite_or_zero(record.gender_probability),
                age: finite_or_zero(record.age),
                position: Position {
                    x: finite_or_zero(bbox.x),
                    y: finite_or_zero(bbox.y),
                    width: finite_or_zero(bbox.width),
                    height: finite_or_zero(bbox.height),
                },
                expressions: record
                    .expressions
                    .iter()
                    .map(|(name, score)| (name.clone(), finite_or_zero(*score)))
                    .collect(),
            },
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use chrono::TimeZone;
    use rstest::rstest;

    fn sample_record() -> DetectionRecord {
        DetectionRecord::new(BoundingBox::new(10.0, 10.0, 50.0, 50.0))
            .with_gender(Gender::Female, 0.92)
            .with_age(30.0)
            .with_expression("happy", 0.8)
    }

    fn instant() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_wire_shape() {
        let message = EventFormatter::format_at(&sample_record(), instant());
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(value["timestamp"], 1_700_000_000_123i64);
        assert_eq!(value["face"]["gender"], "female");
        assert_eq!(value["face"]["genderConfidence"], 0.92);
        assert_eq!(value["face"]["age"], 30.0);
        assert_eq!(value["face"]["position"]["x"], 10.0);
        assert_eq!(value["face"]["position"]["height"], 50.0);
        assert_eq!(value["face"]["expressions"]["happy"], 0.8);
    }

    #[test]
    fn test_formatting_is_deterministic() {
        let formatter = EventFormatter::with_clock(FixedClock(instant()));
        let record = sample_record()
            .with_expression("surprised", 0.1)
            .with_expression("angry", 0.05);

        let first = formatter.format(&record).to_json().unwrap();
        for _ in 0..10 {
            assert_eq!(formatter.format(&record).to_json().unwrap(), first);
        }
    }

    #[test]
    fn test_content_key_ignores_timestamp() {
        let record = sample_record();
        let earlier = EventFormatter::format_at(&record, instant());
        let later =
            EventFormatter::format_at(&record, instant() + chrono::Duration::milliseconds(100));

        assert_ne!(earlier.to_json().unwrap(), later.to_json().unwrap());
        assert_eq!(earlier.content_key().unwrap(), later.content_key().unwrap());
        assert_ne!(
            earlier.content_key().unwrap(),
            EventFormatter::format_at(&record.with_age(31.0), instant())
                .content_key()
                .unwrap()
        );
    }

    #[test]
    fn test_expressions_are_sorted() {
        let record = DetectionRecord::default()
            .with_expression("surprised", 0.1)
            .with_expression("angry", 0.2);
        let json = EventFormatter::format_at(&record, instant())
            .to_json()
            .unwrap();

        let angry = json.find("angry").unwrap();
        let surprised = json.find("surprised").unwrap();
        assert!(angry < surprised);
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(f64::NEG_INFINITY)]
    fn test_non_finite_values_become_zero(#[case] bad: f64) {
        let record = DetectionRecord::new(BoundingBox::new(bad, 1.0, 2.0, 3.0))
            .with_gender(Gender::Male, bad)
            .with_age(bad)
            .with_expression("neutral", bad);
        let message = EventFormatter::format_at(&record, instant());

        assert_eq!(message.face.position.x, 0.0);
        assert_eq!(message.face.gender_confidence, 0.0);
        assert_eq!(message.face.age, 0.0);
        assert_eq!(message.face.expressions["neutral"], 0.0);
        assert!(!message.to_json().unwrap().contains("null"));
    }

    #[test]
    fn test_sentinel_record_formats() {
        let message = EventFormatter::format_at(&DetectionRecord::default(), instant());
        assert_eq!(message.face.gender, Gender::Unknown);
        assert_eq!(message.face.gender_confidence, 0.0);
        assert!(message.to_json().unwrap().contains(r#""gender":"unknown""#));
    }
}
