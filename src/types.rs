//! Core types for the Growth Flux engine
//!
//! This module defines the data structures that flow through the engine:
//! identifiers, tag metadata, raw and signed observations, and the per-tag
//! filter state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Student identifier as issued by the CRM
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

/// Behavioral tag identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub String);

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        StudentId(s.to_string())
    }
}

impl From<&str> for TagId {
    fn from(s: &str) -> Self {
        TagId(s.to_string())
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key for per-(student, tag) data
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagKey {
    pub student_id: StudentId,
    pub tag_id: TagId,
}

impl TagKey {
    pub fn new(student_id: StudentId, tag_id: TagId) -> Self {
        Self { student_id, tag_id }
    }
}

/// Polarity of a behavioral tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    /// Sign applied to logged weights
    pub fn sign(&self) -> f64 {
        match self {
            Sentiment::Positive => 1.0,
            Sentiment::Negative => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "POSITIVE",
            Sentiment::Negative => "NEGATIVE",
        }
    }
}

/// Tag metadata supplied by the taxonomy owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMeta {
    pub tag_id: TagId,
    /// Display name (e.g. "主动提问")
    pub name: String,
    pub sentiment: Sentiment,
    /// Magnitude used when a log entry carries no explicit weight (1-10)
    pub default_weight: f64,
}

/// A teacher-logged tag before signing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub student_id: StudentId,
    pub tag_id: TagId,
    pub timestamp: DateTime<Utc>,
    /// Optional magnitude override (1-10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// A signed, scaled observation as consumed by the estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub student_id: StudentId,
    pub tag_id: TagId,
    pub sentiment: Sentiment,
    pub timestamp: DateTime<Utc>,
    pub signed_weight: f64,
}

impl Observation {
    pub fn key(&self) -> TagKey {
        TagKey::new(self.student_id.clone(), self.tag_id.clone())
    }
}

/// Per-(student, tag) Kalman state
///
/// A cache derived from the observation log and the profile in force; it can
/// always be rebuilt by replaying the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagFilterState {
    pub student_id: StudentId,
    pub tag_id: TagId,
    pub sentiment: Sentiment,
    /// Estimated current magnitude
    pub level: f64,
    /// Estimated change of level per day
    pub trend: f64,
    /// State covariance, indexed [level, trend]
    pub covariance: [[f64; 2]; 2],
    pub total_observations: u32,
    pub last_observed_at: DateTime<Utc>,
    /// Confidence in the level estimate (0-1) as of `last_observed_at`
    pub confidence: f64,
    /// False while fewer than `min_observations` have been seen
    pub is_reliable: bool,
    /// Version of the profile that produced this state
    pub profile_version: u32,
}

impl TagFilterState {
    pub fn key(&self) -> TagKey {
        TagKey::new(self.student_id.clone(), self.tag_id.clone())
    }

    /// Variance of the level estimate
    pub fn level_variance(&self) -> f64 {
        self.covariance[0][0]
    }
}

/// Trend direction shown on prediction panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentiment_serialization() {
        assert_eq!(
            serde_json::to_string(&Sentiment::Positive).unwrap(),
            "\"POSITIVE\""
        );
        let parsed: Sentiment = serde_json::from_str("\"NEGATIVE\"").unwrap();
        assert_eq!(parsed, Sentiment::Negative);
        assert_eq!(parsed.sign(), -1.0);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let key = TagKey::new("stu-1".into(), "tag-9".into());
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"student_id":"stu-1","tag_id":"tag-9"}"#);
    }

    #[test]
    fn test_raw_observation_weight_optional() {
        let raw: RawObservation = serde_json::from_str(
            r#"{"student_id":"s1","tag_id":"t1","timestamp":"2024-03-01T08:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(raw.weight, None);
        assert_eq!(raw.student_id.to_string(), "s1");
    }
}
