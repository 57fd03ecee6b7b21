//! Pipeline orchestration
//!
//! This module provides the public API for Growth Flux: the stateless
//! recompute and incremental entry points, and a stateful processor that
//! owns a tag catalog, an observation log and the per-tag state cache.

use crate::aggregate::{aggregate, GrowthSummary};
use crate::catalog::TagCatalog;
use crate::config::ConfigProfile;
use crate::error::ScoreError;
use crate::estimator::KalmanEstimator;
use crate::predict::{predict, Prediction};
use crate::report::{GrowthReport, ReportEncoder};
use crate::store::{ObservationLog, ObservationSource, StateStore};
use crate::types::{Observation, RawObservation, StudentId, TagFilterState, TagId, TagKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Recompute a tag state from scratch.
///
/// Returns `None` when the source holds no observations for the pair.
///
/// # Example
/// ```ignore
/// let state = compute_state(&student_id, &tag_id, &log, &profile)?;
/// ```
pub fn compute_state<S>(
    student_id: &StudentId,
    tag_id: &TagId,
    source: &S,
    profile: &ConfigProfile,
) -> Result<Option<TagFilterState>, ScoreError>
where
    S: ObservationSource + ?Sized,
{
    let estimator = KalmanEstimator::new(profile.clone())?;
    let observations = source.observations(student_id, tag_id);
    estimator.replay(&observations)
}

/// Fold one observation into a prior state (or initialize when `prior` is
/// `None`).
pub fn apply_observation(
    prior: Option<&TagFilterState>,
    observation: &Observation,
    profile: &ConfigProfile,
) -> Result<TagFilterState, ScoreError> {
    let estimator = KalmanEstimator::new(profile.clone())?;
    estimator.step(prior, observation)
}

/// Stateful processor for incremental scoring.
///
/// Every mutating call takes `&mut self`, so a processor has a single writer.
/// Share one across threads behind a `Mutex`.
///
/// States restored with `load_states` carry evidence the log does not hold.
/// Their keys are tracked so that nothing replays the log over them.
pub struct GrowthProcessor {
    estimator: KalmanEstimator,
    catalog: TagCatalog,
    log: ObservationLog,
    states: StateStore,
    loaded: BTreeSet<TagKey>,
    encoder: ReportEncoder,
}

impl GrowthProcessor {
    /// Create a processor for a profile and tag catalog
    pub fn new(profile: ConfigProfile, catalog: TagCatalog) -> Result<Self, ScoreError> {
        Ok(Self {
            estimator: KalmanEstimator::new(profile)?,
            catalog,
            log: ObservationLog::new(),
            states: StateStore::new(),
            loaded: BTreeSet::new(),
            encoder: ReportEncoder::new(),
        })
    }

    /// Create a processor with a custom estimator (e.g. a different observation noise)
    pub fn with_estimator(estimator: KalmanEstimator, catalog: TagCatalog) -> Self {
        Self {
            estimator,
            catalog,
            log: ObservationLog::new(),
            states: StateStore::new(),
            loaded: BTreeSet::new(),
            encoder: ReportEncoder::new(),
        }
    }

    pub fn profile(&self) -> &ConfigProfile {
        self.estimator.profile()
    }

    pub fn catalog(&self) -> &TagCatalog {
        &self.catalog
    }

    pub fn log(&self) -> &ObservationLog {
        &self.log
    }

    /// Sign a raw teacher log and fold it in
    pub fn record(&mut self, raw: &RawObservation) -> Result<TagFilterState, ScoreError> {
        let observation = self.catalog.sign(raw)?;
        self.record_signed(observation)
    }

    /// Fold a signed observation into the log and state cache.
    ///
    /// In-order observations are applied incrementally. A late arrival (earlier
    /// than the cached `last_observed_at`) triggers a replay of the key from
    /// the log, so the result never depends on arrival order. A late arrival
    /// for a key restored by `load_states` cannot be replayed and fails with
    /// `OutOfOrderObservation`. Nothing is recorded if the update fails.
    pub fn record_signed(&mut self, observation: Observation) -> Result<TagFilterState, ScoreError> {
        let key = observation.key();
        let prior = self.states.get(&key);

        let next = match prior {
            Some(state) if observation.timestamp < state.last_observed_at => {
                if self.loaded.contains(&key) {
                    return Err(ScoreError::OutOfOrderObservation {
                        last_observed_at: state.last_observed_at,
                        timestamp: observation.timestamp,
                    });
                }

                let history = self.log.for_key(&key);

                debug!(
                    student_id = %key.student_id,
                    tag_id = %key.tag_id,
                    history = history.len(),
                    "late observation, replaying tag history"
                );

                let mut replayed = history.to_vec();
                let position = replayed.partition_point(|o| o.timestamp <= observation.timestamp);
                replayed.insert(position, observation.clone());
                self.replay_non_empty(&replayed)?
            }
            _ => self.estimator.step(prior, &observation)?,
        };

        self.log.append(observation);
        self.states.upsert(next.clone());
        Ok(next)
    }

    /// Record a batch in the given order, stopping at the first failure
    pub fn record_all(&mut self, raws: &[RawObservation]) -> Result<usize, ScoreError> {
        for raw in raws {
            self.record(raw)?;
        }
        Ok(raws.len())
    }

    /// Swap the active profile and recompute every logged key under it.
    ///
    /// Keys restored by `load_states` keep their state (and its
    /// `profile_version`) since the log cannot rebuild them. On failure the
    /// processor keeps its previous profile and states.
    pub fn set_profile(&mut self, profile: ConfigProfile) -> Result<(), ScoreError> {
        let estimator = KalmanEstimator::new(profile)?
            .with_observation_noise(self.estimator.observation_noise())?;

        let mut rebuilt = self.states.clone();
        for key in self.log.keys().filter(|key| !self.loaded.contains(*key)) {
            if let Some(state) = estimator.replay(self.log.for_key(key))? {
                rebuilt.upsert(state);
            }
        }

        if !self.loaded.is_empty() {
            warn!(
                keys = self.loaded.len(),
                "loaded states cannot be recomputed from the log, keeping them"
            );
        }

        debug!(
            version = estimator.profile().version,
            keys = rebuilt.len(),
            "profile changed, states recomputed"
        );

        self.estimator = estimator;
        self.states = rebuilt;
        Ok(())
    }

    /// Recompute all logged keys from scratch under the current profile
    pub fn rebuild(&mut self) -> Result<(), ScoreError> {
        let profile = self.estimator.profile().clone();
        self.set_profile(profile)
    }

    /// Recompute one key from the log without touching the cache
    pub fn compute_state(
        &self,
        student_id: &StudentId,
        tag_id: &TagId,
    ) -> Result<Option<TagFilterState>, ScoreError> {
        self.estimator
            .replay(&self.log.observations(student_id, tag_id))
    }

    pub fn state(&self, student_id: &StudentId, tag_id: &TagId) -> Option<&TagFilterState> {
        self.states
            .get(&TagKey::new(student_id.clone(), tag_id.clone()))
    }

    pub fn states_for_student(&self, student_id: &StudentId) -> Vec<&TagFilterState> {
        self.states.for_student(student_id)
    }

    /// Sentiment and overall means for a student
    pub fn summary(&self, student_id: &StudentId) -> GrowthSummary {
        aggregate(self.states.for_student(student_id))
    }

    /// Predict one tag `horizon_days` ahead
    pub fn predict(
        &self,
        student_id: &StudentId,
        tag_id: &TagId,
        horizon_days: f64,
    ) -> Result<Prediction, ScoreError> {
        let state = self
            .state(student_id, tag_id)
            .ok_or(ScoreError::InsufficientHistory { observed: 0 })?;
        predict(state, horizon_days)
    }

    /// Confidence of a cached tag as seen at `now`
    pub fn confidence_at(
        &self,
        student_id: &StudentId,
        tag_id: &TagId,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, ScoreError> {
        self.state(student_id, tag_id)
            .map(|state| self.estimator.confidence_at(state, now))
            .transpose()
    }

    /// Build a dashboard report for a student as of now
    pub fn report(&self, student_id: &StudentId, horizon_days: f64) -> Result<GrowthReport, ScoreError> {
        self.report_at(student_id, horizon_days, Utc::now())
    }

    /// Build a dashboard report for a student as of `now`
    pub fn report_at(
        &self,
        student_id: &StudentId,
        horizon_days: f64,
        now: DateTime<Utc>,
    ) -> Result<GrowthReport, ScoreError> {
        let states = self.states.for_student(student_id);
        self.encoder
            .encode(student_id, &states, &self.estimator, horizon_days, now)
    }

    /// Report serialized to JSON
    pub fn report_json(&self, student_id: &StudentId, horizon_days: f64) -> Result<String, ScoreError> {
        let report = self.report(student_id, horizon_days)?;
        serde_json::to_string(&report).map_err(|e| ScoreError::EncodingError(e.to_string()))
    }

    /// Save the state cache to JSON
    pub fn save_states(&self) -> Result<String, ScoreError> {
        self.states
            .to_json()
            .map_err(|e| ScoreError::EncodingError(e.to_string()))
    }

    /// Replace the state cache from JSON.
    ///
    /// Logged keys the snapshot does not cover are recomputed from the log.
    /// On failure the processor is left unchanged.
    pub fn load_states(&mut self, json: &str) -> Result<(), ScoreError> {
        let mut states =
            StateStore::from_json(json).map_err(|e| ScoreError::ParseError(e.to_string()))?;
        let loaded: BTreeSet<TagKey> = states.keys().cloned().collect();

        for key in self.log.keys().filter(|key| !loaded.contains(*key)) {
            if let Some(state) = self.estimator.replay(self.log.for_key(key))? {
                states.upsert(state);
            }
        }

        debug!(loaded = loaded.len(), total = states.len(), "states loaded");

        self.states = states;
        self.loaded = loaded;
        Ok(())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> impl Iterator<Item = &TagFilterState> {
        self.states.iter()
    }

    fn replay_non_empty(&self, observations: &[Observation]) -> Result<TagFilterState, ScoreError> {
        self.estimator.replay(observations)?.ok_or_else(|| {
            ScoreError::InvalidObservation("no observations to replay".to_string())
        })
    }
}
