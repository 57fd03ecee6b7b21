//! Forward extrapolation of tag states
//!
//! Projects a state's level along its trend and classifies the direction for
//! prediction panels.

use crate::error::ScoreError;
use crate::types::{TagFilterState, TrendDirection};
use serde::{Deserialize, Serialize};

/// Trend magnitude (per day) below which a tag is reported as stable
pub const STABILITY_THRESHOLD: f64 = 0.1;

/// Floor on |level| when expressing change as a percentage
pub const LEVEL_FLOOR: f64 = 1.0;

/// Extrapolated outlook for one tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub horizon_days: f64,
    pub predicted_level: f64,
    pub direction: TrendDirection,
    /// Relative change of level over the horizon (percent)
    pub change_rate: f64,
    pub confidence: f64,
}

/// One point of a forecast series with its uncertainty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub horizon_days: f64,
    pub predicted_level: f64,
    /// Standard deviation of the propagated level estimate
    pub std_dev: f64,
}

/// Classify a per-day trend
pub fn classify_trend(trend: f64) -> TrendDirection {
    if trend > STABILITY_THRESHOLD {
        TrendDirection::Up
    } else if trend < -STABILITY_THRESHOLD {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    }
}

/// Extrapolate a reliable state `horizon_days` ahead
pub fn predict(state: &TagFilterState, horizon_days: f64) -> Result<Prediction, ScoreError> {
    check_inputs(state, horizon_days)?;

    let predicted_level = state.level + state.trend * horizon_days;
    let change_rate = (predicted_level - state.level) / state.level.abs().max(LEVEL_FLOOR) * 100.0;

    Ok(Prediction {
        horizon_days,
        predicted_level,
        direction: classify_trend(state.trend),
        change_rate,
        confidence: state.confidence,
    })
}

/// Forecast series over several horizons, with a one-sigma band
pub fn forecast(state: &TagFilterState, horizons: &[f64]) -> Result<Vec<ForecastPoint>, ScoreError> {
    horizons
        .iter()
        .map(|&h| {
            check_inputs(state, h)?;
            let p = state.covariance;
            let variance = (p[0][0] + 2.0 * h * p[0][1] + h * h * p[1][1]).max(0.0);
            Ok(ForecastPoint {
                horizon_days: h,
                predicted_level: state.level + state.trend * h,
                std_dev: variance.sqrt(),
            })
        })
        .collect()
}

fn check_inputs(state: &TagFilterState, horizon_days: f64) -> Result<(), ScoreError> {
    if !state.is_reliable {
        return Err(ScoreError::InsufficientHistory {
            observed: state.total_observations,
        });
    }
    if !horizon_days.is_finite() || horizon_days < 0.0 {
        return Err(ScoreError::InvalidHorizon(horizon_days));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sentiment;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn state(level: f64, trend: f64) -> TagFilterState {
        TagFilterState {
            student_id: "stu-1".into(),
            tag_id: "ask-question".into(),
            sentiment: Sentiment::Positive,
            level,
            trend,
            covariance: [[0.8, 0.4], [0.4, 0.5]],
            total_observations: 6,
            last_observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            confidence: 0.92,
            is_reliable: true,
            profile_version: 1,
        }
    }

    #[test]
    fn test_predict_upward() {
        let prediction = predict(&state(5.0, 0.5), 4.0).unwrap();
        assert_eq!(
            prediction,
            Prediction {
                horizon_days: 4.0,
                predicted_level: 7.0,
                direction: TrendDirection::Up,
                change_rate: 40.0,
                confidence: 0.92,
            }
        );
    }

    #[test]
    fn test_predict_downward_negative_level() {
        let prediction = predict(&state(-4.0, -0.25), 4.0).unwrap();
        assert_eq!(prediction.predicted_level, -5.0);
        assert_eq!(prediction.direction, TrendDirection::Down);
        // change relative to |level|
        assert_eq!(prediction.change_rate, -25.0);
    }

    #[test]
    fn test_stable_band() {
        assert_eq!(classify_trend(0.1), TrendDirection::Stable);
        assert_eq!(classify_trend(-0.1), TrendDirection::Stable);
        assert_eq!(classify_trend(0.0), TrendDirection::Stable);
        assert_eq!(classify_trend(0.11), TrendDirection::Up);
        assert_eq!(classify_trend(-0.11), TrendDirection::Down);
    }

    #[test]
    fn test_level_floor_near_zero() {
        let prediction = predict(&state(0.0, 0.5), 2.0).unwrap();
        assert_eq!(prediction.change_rate, 100.0);
    }

    #[test]
    fn test_unreliable_rejected() {
        let mut s = state(5.0, 0.5);
        s.is_reliable = false;
        s.total_observations = 1;
        assert!(matches!(
            predict(&s, 7.0),
            Err(ScoreError::InsufficientHistory { observed: 1 })
        ));
    }

    #[test]
    fn test_invalid_horizon() {
        assert!(matches!(
            predict(&state(5.0, 0.5), -1.0),
            Err(ScoreError::InvalidHorizon(_))
        ));
        assert!(predict(&state(5.0, 0.5), f64::INFINITY).is_err());
    }

    #[test]
    fn test_forecast_band_widens() {
        let points = forecast(&state(5.0, 0.5), &[0.0, 7.0, 14.0]).unwrap();

        assert_eq!(points.len(), 3);
        assert!((points[0].std_dev - 0.8f64.sqrt()).abs() < 1e-12);
        assert_eq!(points[1].predicted_level, 8.5);
        assert!(points[1].std_dev > points[0].std_dev);
        assert!(points[2].std_dev > points[1].std_dev);
    }
}
