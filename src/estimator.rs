//! Kalman state estimator
//!
//! Maintains a `[level, trend]` estimate for one (student, tag) pair using a
//! local-linear-trend model over irregularly spaced observations:
//!
//! ```text
//! F = [[1, dt], [0, 1]]      H = [1, 0]
//! q = Q * (1 + λ * dt)       Qd = diag(q * dt, q * dt²)
//! ```
//!
//! The predicted level/trend cross-covariance is additionally damped by
//! `exp(-dt / max_days_between)` so that evidence linking level and trend
//! fades over long silences. `dt` is measured in fractional days and capped
//! at `max_days_between`.
//!
//! The estimator is a pure fold: `apply` never mutates its input, and
//! `replay` over a slice performs exactly the same arithmetic as a chain of
//! `apply` calls.

use crate::config::ConfigProfile;
use crate::error::ScoreError;
use crate::types::{Observation, TagFilterState};
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

/// Observation noise variance R, in squared weight units
pub const DEFAULT_OBSERVATION_NOISE: f64 = 1.0;

/// Relative tolerance for the positive semi-definite check
const PSD_TOLERANCE: f64 = 1e-9;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

type Matrix2 = [[f64; 2]; 2];

/// Two-state Kalman filter parameterized by a validated profile
#[derive(Debug, Clone)]
pub struct KalmanEstimator {
    profile: ConfigProfile,
    observation_noise: f64,
}

impl KalmanEstimator {
    /// Create an estimator; fails with `InvalidConfig` for a bad profile
    pub fn new(profile: ConfigProfile) -> Result<Self, ScoreError> {
        profile.validate()?;
        Ok(Self {
            profile,
            observation_noise: DEFAULT_OBSERVATION_NOISE,
        })
    }

    /// Override the observation noise variance R
    pub fn with_observation_noise(mut self, observation_noise: f64) -> Result<Self, ScoreError> {
        if !observation_noise.is_finite() || observation_noise <= 0.0 {
            return Err(ScoreError::InvalidConfig(format!(
                "observation noise must be > 0, got {}",
                observation_noise
            )));
        }
        self.observation_noise = observation_noise;
        Ok(self)
    }

    pub fn profile(&self) -> &ConfigProfile {
        &self.profile
    }

    pub fn observation_noise(&self) -> f64 {
        self.observation_noise
    }

    /// Initialize a state from the first observation of a pair
    pub fn initialize(&self, observation: &Observation) -> Result<TagFilterState, ScoreError> {
        check_weight(observation)?;

        let p0 = self.profile.initial_uncertainty;
        let covariance = [[p0, 0.0], [0.0, p0]];

        debug!(
            student_id = %observation.student_id,
            tag_id = %observation.tag_id,
            weight = observation.signed_weight,
            "initializing tag filter"
        );

        Ok(TagFilterState {
            student_id: observation.student_id.clone(),
            tag_id: observation.tag_id.clone(),
            sentiment: observation.sentiment,
            level: observation.signed_weight,
            trend: 0.0,
            covariance,
            total_observations: 1,
            last_observed_at: observation.timestamp,
            confidence: self.confidence(p0),
            is_reliable: self.is_reliable(1),
            profile_version: self.profile.version,
        })
    }

    /// Fold one observation into a prior state, returning the new state.
    ///
    /// The prior is left untouched on every error path.
    pub fn apply(
        &self,
        prior: &TagFilterState,
        observation: &Observation,
    ) -> Result<TagFilterState, ScoreError> {
        if prior.student_id != observation.student_id || prior.tag_id != observation.tag_id {
            return Err(ScoreError::InvalidObservation(format!(
                "observation for ({}, {}) applied to state of ({}, {})",
                observation.student_id, observation.tag_id, prior.student_id, prior.tag_id
            )));
        }
        if prior.sentiment != observation.sentiment {
            return Err(ScoreError::InvalidObservation(format!(
                "{} observation for ({}, {}) applied to {} state",
                observation.sentiment.as_str(),
                observation.student_id,
                observation.tag_id,
                prior.sentiment.as_str()
            )));
        }
        check_weight(observation)?;

        let dt = self.elapsed_days(prior.last_observed_at, observation.timestamp)?;

        // Predict
        let level_pred = prior.level + dt * prior.trend;
        let trend_pred = prior.trend;
        let p = self.predict_covariance(&prior.covariance, dt);

        // Observe level directly
        let innovation = observation.signed_weight - level_pred;
        let s = p[0][0] + self.observation_noise;
        let k0 = p[0][0] / s;
        let k1 = p[1][0] / s;

        let level = level_pred + k0 * innovation;
        let trend = trend_pred + k1 * innovation;

        // P = (I - K H) P'
        let updated = [
            [(1.0 - k0) * p[0][0], (1.0 - k0) * p[0][1]],
            [p[1][0] - k1 * p[0][0], p[1][1] - k1 * p[0][1]],
        ];
        let covariance = stabilize(updated)?;

        if !level.is_finite() || !trend.is_finite() {
            return Err(ScoreError::NumericalInstability(format!(
                "non-finite state after update: level={}, trend={}",
                level, trend
            )));
        }

        trace!(
            student_id = %observation.student_id,
            tag_id = %observation.tag_id,
            dt,
            innovation,
            gain_level = k0,
            gain_trend = k1,
            "applied observation"
        );

        let total_observations = prior.total_observations.saturating_add(1);

        Ok(TagFilterState {
            student_id: prior.student_id.clone(),
            tag_id: prior.tag_id.clone(),
            sentiment: prior.sentiment,
            level,
            trend,
            covariance,
            total_observations,
            last_observed_at: observation.timestamp,
            confidence: self.confidence(covariance[0][0]),
            is_reliable: self.is_reliable(total_observations),
            profile_version: self.profile.version,
        })
    }

    /// Initialize from nothing or fold into an existing state
    pub fn step(
        &self,
        prior: Option<&TagFilterState>,
        observation: &Observation,
    ) -> Result<TagFilterState, ScoreError> {
        match prior {
            Some(state) => self.apply(state, observation),
            None => self.initialize(observation),
        }
    }

    /// Replay an ordered observation sequence from scratch.
    ///
    /// Returns `None` for an empty sequence.
    pub fn replay<'a, I>(&self, observations: I) -> Result<Option<TagFilterState>, ScoreError>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let mut state: Option<TagFilterState> = None;
        for observation in observations {
            state = Some(self.step(state.as_ref(), observation)?);
        }
        Ok(state)
    }

    /// Confidence derived from a level variance
    pub fn confidence(&self, level_variance: f64) -> f64 {
        (1.0 - level_variance / self.profile.initial_uncertainty).clamp(0.0, 1.0)
    }

    /// Confidence of a state as seen at `now`, with no new evidence since
    /// `last_observed_at`.
    pub fn confidence_at(&self, state: &TagFilterState, now: DateTime<Utc>) -> Result<f64, ScoreError> {
        let dt = self.elapsed_days(state.last_observed_at, now)?;
        let p = self.predict_covariance(&state.covariance, dt);
        Ok(self.confidence(p[0][0]))
    }

    fn is_reliable(&self, total_observations: u32) -> bool {
        total_observations >= self.profile.min_observations
    }

    /// Elapsed days between two instants, capped at `max_days_between`
    fn elapsed_days(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<f64, ScoreError> {
        if to < from {
            return Err(ScoreError::OutOfOrderObservation {
                last_observed_at: from,
                timestamp: to,
            });
        }
        let days = (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY;
        Ok(days.min(self.profile.max_days_between as f64))
    }

    /// Covariance propagation `F P Fᵀ + Qd` with cross-covariance damping
    fn predict_covariance(&self, p: &Matrix2, dt: f64) -> Matrix2 {
        let q = self.profile.process_noise * (1.0 + self.profile.time_decay_factor * dt);
        let damping = (-dt / self.profile.max_days_between as f64).exp();

        let p00 = p[0][0] + 2.0 * dt * p[0][1] + dt * dt * p[1][1] + q * dt;
        let p01 = (p[0][1] + dt * p[1][1]) * damping;
        let p11 = p[1][1] + q * dt * dt;

        [[p00, p01], [p01, p11]]
    }
}

fn check_weight(observation: &Observation) -> Result<(), ScoreError> {
    if !observation.signed_weight.is_finite() {
        return Err(ScoreError::InvalidObservation(format!(
            "non-finite weight {} for ({}, {})",
            observation.signed_weight, observation.student_id, observation.tag_id
        )));
    }
    Ok(())
}

fn symmetrize(p: Matrix2) -> Matrix2 {
    let cross = 0.5 * (p[0][1] + p[1][0]);
    [[p[0][0], cross], [cross, p[1][1]]]
}

fn is_psd(p: &Matrix2) -> bool {
    let scale = p[0][0].abs().max(p[1][1].abs()).max(1.0);
    let tol = PSD_TOLERANCE * scale;
    let det = p[0][0] * p[1][1] - p[0][1] * p[1][0];
    p[0][0] >= -tol && p[1][1] >= -tol && det >= -tol * scale
}

/// Symmetrize, then attempt a single repair if the result is not PSD
fn stabilize(p: Matrix2) -> Result<Matrix2, ScoreError> {
    if p.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ScoreError::NumericalInstability(format!(
            "non-finite covariance {:?}",
            p
        )));
    }

    let symmetric = symmetrize(p);
    if is_psd(&symmetric) {
        return Ok(symmetric);
    }

    warn!(covariance = ?symmetric, "covariance lost positive semi-definiteness, repairing");

    let d0 = symmetric[0][0].max(0.0);
    let d1 = symmetric[1][1].max(0.0);
    let bound = (d0 * d1).sqrt();
    let cross = symmetric[0][1].clamp(-bound, bound);
    let repaired = [[d0, cross], [cross, d1]];

    if is_psd(&repaired) {
        Ok(repaired)
    } else {
        Err(ScoreError::NumericalInstability(format!(
            "covariance {:?} not positive semi-definite after repair",
            repaired
        )))
    }
}
