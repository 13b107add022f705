//! Detection records and the detection source trait.
//!
//! The inference engine lives outside this crate. It hands over one batch of
//! [`DetectionRecord`]s per tick through a [`DetectionSource`].

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Discrete gender label reported by the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    /// Missing or unrecognised label
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl From<&str> for Gender {
    fn from(label: &str) -> Self {
        if label.eq_ignore_ascii_case("male") {
            Gender::Male
        } else if label.eq_ignore_ascii_case("female") {
            Gender::Female
        } else {
            Gender::Unknown
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Gender {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label.as_deref().map(Gender::from).unwrap_or_default())
    }
}

/// Face bounding box in source pixel units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingBox {
    #[serde(deserialize_with = "lenient_f64")]
    pub x: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub y: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub width: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One inferred face for a single frame.
///
/// Records carry no identity: two records from consecutive ticks are
/// unrelated even when they describe the same person. Every field falls back
/// to a sentinel when missing or `null` so that one sparse record never
/// aborts the rest of its frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectionRecord {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub gender: Gender,
    /// Probability of `gender`, in [0, 1]
    #[serde(deserialize_with = "lenient_f64")]
    pub gender_probability: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub age: f64,
    /// Expression name to intensity in [0, 1]
    #[serde(deserialize_with = "lenient_expressions")]
    pub expressions: BTreeMap<String, f64>,
    /// Detector confidence, compared against the configured threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl DetectionRecord {
    /// Create a record with the given box and sentinel attributes.
    pub fn new(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            ..Default::default()
        }
    }

    pub fn with_gender(mut self, gender: Gender, probability: f64) -> Self {
        self.gender = gender;
        self.gender_probability = probability;
        self
    }

    pub fn with_age(mut self, age: f64) -> Self {
        self.age = age;
        self
    }

    pub fn with_expression(mut self, name: impl Into<String>, intensity: f64) -> Self {
        self.expressions.insert(name.into(), intensity);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Whether the record passes the detector confidence threshold.
    ///
    /// Records without a score were already thresholded upstream.
    pub fn meets_confidence(&self, min_confidence: f64) -> bool {
        self.score.is_none_or(|score| score >= min_confidence)
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

fn lenient_expressions<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Option<f64>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, score)| (name, score.unwrap_or(0.0)))
        .collect())
}

/// Producer of detection records, polled once per tick.
#[async_trait]
pub trait DetectionSource: Send {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    /// Run one detection pass.
    ///
    /// Returns `Ok(None)` once the source is exhausted, and
    /// [`FacecastError::SourceUnavailable`](crate::FacecastError::SourceUnavailable)
    /// while it is not ready yet. Both the empty batch and the unavailable
    /// case turn the tick into a no-op.
    async fn detect(&mut self) -> Result<Option<Vec<DetectionRecord>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_record() {
        let record: DetectionRecord = serde_json::from_str(
            r#"{"box":{"x":10,"y":10,"width":50,"height":50},"gender":"female",
               "genderProbability":0.92,"age":30,"expressions":{"happy":0.8}}"#,
        )
        .unwrap();

        assert_eq!(record.bounding_box, BoundingBox::new(10.0, 10.0, 50.0, 50.0));
        assert_eq!(record.gender, Gender::Female);
        assert_eq!(record.gender_probability, 0.92);
        assert_eq!(record.age, 30.0);
        assert_eq!(record.expressions.get("happy"), Some(&0.8));
        assert_eq!(record.score, None);
    }

    #[test]
    fn test_missing_fields_fall_back_to_sentinels() {
        let record: DetectionRecord =
            serde_json::from_str(r#"{"box":{"x":1,"width":null},"gender":null,"age":null}"#)
                .unwrap();

        assert_eq!(record.bounding_box, BoundingBox::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(record.gender, Gender::Unknown);
        assert_eq!(record.gender_probability, 0.0);
        assert_eq!(record.age, 0.0);
        assert!(record.expressions.is_empty());
    }

    #[test]
    fn test_unrecognised_gender_is_unknown() {
        let record: DetectionRecord = serde_json::from_str(r#"{"gender":"robot"}"#).unwrap();
        assert_eq!(record.gender, Gender::Unknown);

        let record: DetectionRecord = serde_json::from_str(r#"{"gender":"MALE"}"#).unwrap();
        assert_eq!(record.gender, Gender::Male);
    }

    #[test]
    fn test_null_expression_score_is_zero() {
        let record: DetectionRecord =
            serde_json::from_str(r#"{"expressions":{"sad":null,"happy":0.5}}"#).unwrap();
        assert_eq!(record.expressions.get("sad"), Some(&0.0));
        assert_eq!(record.expressions.get("happy"), Some(&0.5));
    }

    #[test]
    fn test_meets_confidence() {
        let record = DetectionRecord::default();
        assert!(record.meets_confidence(0.9));

        let record = record.with_score(0.4);
        assert!(!record.meets_confidence(0.5));
        assert!(record.meets_confidence(0.4));
    }
}
