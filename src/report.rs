//! Report encoding
//!
//! This module encodes a student's tag states, summary and predictions into
//! the JSON report consumed by dashboards and prediction panels.

use crate::aggregate::{aggregate, GrowthSummary};
use crate::error::ScoreError;
use crate::estimator::KalmanEstimator;
use crate::predict::{predict, Prediction};
use crate::types::{StudentId, TagFilterState};
use crate::{GROWTH_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

/// Report producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Per-tag section of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagReport {
    pub state: TagFilterState,
    /// Confidence projected to the report time
    pub confidence_now: f64,
    pub prediction: Option<Prediction>,
    /// Error code when no prediction could be made
    pub prediction_error: Option<String>,
}

/// Complete growth report for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub student_id: StudentId,
    pub profile_version: u32,
    pub computed_at_utc: String,
    pub horizon_days: f64,
    pub summary: GrowthSummary,
    pub tags: Vec<TagReport>,
}

/// Encoder for growth reports
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Encode a student's states into a report as of `now`
    pub fn encode(
        &self,
        student_id: &StudentId,
        states: &[&TagFilterState],
        estimator: &KalmanEstimator,
        horizon_days: f64,
        now: DateTime<Utc>,
    ) -> Result<GrowthReport, ScoreError> {
        if !horizon_days.is_finite() || horizon_days < 0.0 {
            return Err(ScoreError::InvalidHorizon(horizon_days));
        }

        let mut tags = Vec::with_capacity(states.len());
        for &state in states {
            if &state.student_id != student_id {
                return Err(ScoreError::EncodingError(format!(
                    "state for student {} in report for {}",
                    state.student_id, student_id
                )));
            }

            // states built under another profile, or dated after `now`, keep
            // their own confidence
            let confidence_now = if state.profile_version != estimator.profile().version {
                state.confidence
            } else {
                match estimator.confidence_at(state, now) {
                    Ok(confidence) => confidence,
                    Err(ScoreError::OutOfOrderObservation { .. }) => state.confidence,
                    Err(e) => return Err(e),
                }
            };

            let (prediction, prediction_error) = match predict(state, horizon_days) {
                Ok(prediction) => (Some(prediction), None),
                Err(e @ ScoreError::InsufficientHistory { .. }) => (None, Some(e.code().to_string())),
                Err(e) => return Err(e),
            };

            tags.push(TagReport {
                state: state.clone(),
                confidence_now,
                prediction,
                prediction_error,
            });
        }

        Ok(GrowthReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: GROWTH_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            student_id: student_id.clone(),
            profile_version: estimator.profile().version,
            computed_at_utc: now.to_rfc3339(),
            horizon_days,
            summary: aggregate(states.iter().copied()),
            tags,
        })
    }

    /// Encode a report directly to a JSON string
    pub fn encode_to_json(
        &self,
        student_id: &StudentId,
        states: &[&TagFilterState],
        estimator: &KalmanEstimator,
        horizon_days: f64,
        now: DateTime<Utc>,
    ) -> Result<String, ScoreError> {
        let report = self.encode(student_id, states, estimator, horizon_days, now)?;
        serde_json::to_string(&report).map_err(|e| ScoreError::EncodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigProfile;
    use crate::types::{Observation, Sentiment};
    use chrono::{Duration, TimeZone};

    fn at(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::days(day)
    }

    fn obs(tag: &str, sentiment: Sentiment, weight: f64, day: i64) -> Observation {
        Observation {
            student_id: "stu-1".into(),
            tag_id: tag.into(),
            sentiment,
            timestamp: at(day),
            signed_weight: weight,
        }
    }

    fn states(estimator: &KalmanEstimator) -> Vec<TagFilterState> {
        let reliable: Vec<Observation> = (0..5)
            .map(|d| obs("ask-question", Sentiment::Positive, 4.0 + d as f64, d))
            .collect();
        let fresh = vec![obs("daydreaming", Sentiment::Negative, -3.0, 2)];

        vec![
            estimator.replay(&reliable).unwrap().unwrap(),
            estimator.replay(&fresh).unwrap().unwrap(),
        ]
    }

    #[test]
    fn test_encode_report() {
        let estimator = KalmanEstimator::new(ConfigProfile::default()).unwrap();
        let states = states(&estimator);
        let refs: Vec<&TagFilterState> = states.iter().collect();
        let encoder = ReportEncoder::with_instance_id("test-instance".to_string());

        let report = encoder
            .encode(&"stu-1".into(), &refs, &estimator, 7.0, at(10))
            .unwrap();

        assert_eq!(report.report_version, REPORT_VERSION);
        assert_eq!(report.producer.name, PRODUCER_NAME);
        assert_eq!(report.producer.instance_id, "test-instance");
        assert_eq!(report.tags.len(), 2);
        assert_eq!(report.summary.overall.as_ref().unwrap().tag_count, 2);

        let reliable = &report.tags[0];
        assert!(reliable.prediction.is_some());
        assert!(reliable.confidence_now < reliable.state.confidence);

        let fresh = &report.tags[1];
        assert!(fresh.prediction.is_none());
        assert_eq!(fresh.prediction_error.as_deref(), Some("insufficient_history"));
    }

    #[test]
    fn test_encode_to_json() {
        let estimator = KalmanEstimator::new(ConfigProfile::default()).unwrap();
        let states = states(&estimator);
        let refs: Vec<&TagFilterState> = states.iter().collect();
        let encoder = ReportEncoder::new();

        let json = encoder
            .encode_to_json(&"stu-1".into(), &refs, &estimator, 7.0, at(10))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["student_id"], "stu-1");
        assert_eq!(value["tags"][0]["prediction"]["direction"], "UP");
        assert_eq!(value["tags"][1]["state"]["sentiment"], "NEGATIVE");
        assert!(value["tags"][1]["prediction"].is_null());
    }

    #[test]
    fn test_empty_report() {
        let estimator = KalmanEstimator::new(ConfigProfile::default()).unwrap();
        let report = ReportEncoder::new()
            .encode(&"stu-9".into(), &[], &estimator, 7.0, at(0))
            .unwrap();
        assert!(report.tags.is_empty());
        assert!(!report.summary.has_data());
    }

    #[test]
    fn test_confidence_now_not_projected_across_profiles() {
        let estimator = KalmanEstimator::new(ConfigProfile::default()).unwrap();
        let states = states(&estimator);

        let newer = KalmanEstimator::new(ConfigProfile {
            initial_uncertainty: 50.0,
            version: 2,
            ..ConfigProfile::default()
        })
        .unwrap();
        let refs: Vec<&TagFilterState> = states.iter().collect();
        let report = ReportEncoder::new()
            .encode(&"stu-1".into(), &refs, &newer, 7.0, at(10))
            .unwrap();

        assert_eq!(report.tags[0].confidence_now, states[0].confidence);
        assert_eq!(report.tags[1].confidence_now, states[1].confidence);
    }

    #[test]
    fn test_future_dated_state_keeps_confidence() {
        let estimator = KalmanEstimator::new(ConfigProfile::default()).unwrap();
        let states = states(&estimator);
        let refs: Vec<&TagFilterState> = states.iter().collect();

        let report = ReportEncoder::new()
            .encode(&"stu-1".into(), &refs, &estimator, 7.0, at(0))
            .unwrap();
        assert_eq!(report.tags[0].confidence_now, states[0].confidence);
    }

    #[test]
    fn test_invalid_horizon_and_foreign_state() {
        let estimator = KalmanEstimator::new(ConfigProfile::default()).unwrap();
        let states = states(&estimator);
        let refs: Vec<&TagFilterState> = states.iter().collect();
        let encoder = ReportEncoder::new();

        assert!(matches!(
            encoder.encode(&"stu-1".into(), &refs, &estimator, -2.0, at(10)),
            Err(ScoreError::InvalidHorizon(_))
        ));
        assert!(matches!(
            encoder.encode(&"stu-2".into(), &refs, &estimator, 7.0, at(10)),
            Err(ScoreError::EncodingError(_))
        ));
    }
}
