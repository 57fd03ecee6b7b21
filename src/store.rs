//! Observation log and state cache
//!
//! `ObservationLog` is an in-memory, append-only log keyed by
//! `(student_id, tag_id)`; `StateStore` caches the latest `TagFilterState`
//! per key. Both serialize to JSON so callers can persist them however they
//! like.

use crate::types::{Observation, StudentId, TagFilterState, TagId, TagKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source of ordered observations for one (student, tag) pair
pub trait ObservationSource {
    /// Observations for the pair, in canonical replay order
    fn observations(&self, student_id: &StudentId, tag_id: &TagId) -> Vec<Observation>;
}

impl ObservationSource for [Observation] {
    fn observations(&self, student_id: &StudentId, tag_id: &TagId) -> Vec<Observation> {
        self.iter()
            .filter(|o| &o.student_id == student_id && &o.tag_id == tag_id)
            .cloned()
            .collect()
    }
}

impl ObservationSource for Vec<Observation> {
    fn observations(&self, student_id: &StudentId, tag_id: &TagId) -> Vec<Observation> {
        self.as_slice().observations(student_id, tag_id)
    }
}

/// Append-only observation log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationLog {
    #[serde(with = "keyed_entries")]
    entries: BTreeMap<TagKey, Vec<Observation>>,
}

impl ObservationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation.
    ///
    /// The entry lands after every existing entry with a timestamp at or
    /// before its own, so replay order is timestamp order with ties kept in
    /// arrival order. Returns true when it landed at the tail of its key.
    pub fn append(&mut self, observation: Observation) -> bool {
        let list = self.entries.entry(observation.key()).or_default();
        let position = list.partition_point(|o| o.timestamp <= observation.timestamp);
        let at_tail = position == list.len();
        list.insert(position, observation);
        at_tail
    }

    pub fn for_key(&self, key: &TagKey) -> &[Observation] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &TagKey> {
        self.entries.keys()
    }

    /// Total number of observations across keys
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ObservationSource for ObservationLog {
    fn observations(&self, student_id: &StudentId, tag_id: &TagId) -> Vec<Observation> {
        self.for_key(&TagKey::new(student_id.clone(), tag_id.clone()))
            .to_vec()
    }
}

/// Cache of filter states by (student, tag)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateStore {
    #[serde(with = "keyed_entries")]
    states: BTreeMap<TagKey, TagFilterState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TagKey) -> Option<&TagFilterState> {
        self.states.get(key)
    }

    /// Insert or replace the state for its key
    pub fn upsert(&mut self, state: TagFilterState) {
        self.states.insert(state.key(), state);
    }

    /// All states for one student, ordered by tag id
    pub fn for_student(&self, student_id: &StudentId) -> Vec<&TagFilterState> {
        self.states
            .range(TagKey::new(student_id.clone(), TagId(String::new()))..)
            .take_while(|(key, _)| &key.student_id == student_id)
            .map(|(_, state)| state)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagFilterState> {
        self.states.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TagKey> {
        self.states.keys()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Load a state store from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the state store to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSON object keys must be strings, so keyed maps are written as a list
mod keyed_entries {
    use crate::types::TagKey;
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry<V> {
        key: TagKey,
        value: V,
    }

    pub fn serialize<S, V>(map: &BTreeMap<TagKey, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let entries: Vec<Entry<&V>> = map
            .iter()
            .map(|(key, value)| Entry {
                key: key.clone(),
                value,
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<TagKey, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: DeserializeOwned,
    {
        let entries: Vec<Entry<V>> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.key, e.value)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sentiment;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::days(day)
    }

    fn obs(student: &str, tag: &str, weight: f64, day: i64) -> Observation {
        Observation {
            student_id: student.into(),
            tag_id: tag.into(),
            sentiment: Sentiment::Positive,
            timestamp: at(day),
            signed_weight: weight,
        }
    }

    fn state(student: &str, tag: &str) -> TagFilterState {
        TagFilterState {
            student_id: student.into(),
            tag_id: tag.into(),
            sentiment: Sentiment::Positive,
            level: 5.0,
            trend: 0.1,
            covariance: [[1.0, 0.2], [0.2, 0.5]],
            total_observations: 4,
            last_observed_at: at(3),
            confidence: 0.9,
            is_reliable: true,
            profile_version: 1,
        }
    }

    #[test]
    fn test_append_keeps_timestamp_order() {
        let mut log = ObservationLog::new();
        assert!(log.append(obs("s1", "t1", 1.0, 0)));
        assert!(log.append(obs("s1", "t1", 2.0, 5)));
        assert!(!log.append(obs("s1", "t1", 3.0, 2)));
        // tie with day 5 goes after it
        assert!(log.append(obs("s1", "t1", 4.0, 5)));

        let weights: Vec<f64> = log
            .observations(&"s1".into(), &"t1".into())
            .iter()
            .map(|o| o.signed_weight)
            .collect();
        assert_eq!(weights, vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_log_separates_keys() {
        let mut log = ObservationLog::new();
        log.append(obs("s1", "t1", 1.0, 0));
        log.append(obs("s1", "t2", 2.0, 0));
        log.append(obs("s2", "t1", 3.0, 0));

        assert_eq!(log.keys().count(), 3);
        assert_eq!(log.observations(&"s1".into(), &"t2".into()).len(), 1);
        assert!(log.observations(&"s3".into(), &"t1".into()).is_empty());
    }

    #[test]
    fn test_slice_source_filters_key() {
        let all = vec![obs("s1", "t1", 1.0, 0), obs("s2", "t1", 2.0, 1)];
        let picked = all.observations(&"s2".into(), &"t1".into());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].signed_weight, 2.0);
    }

    #[test]
    fn test_for_student_range() {
        let mut store = StateStore::new();
        store.upsert(state("s1", "b"));
        store.upsert(state("s1", "a"));
        store.upsert(state("s2", "a"));
        store.upsert(state("s0", "z"));

        let tags: Vec<String> = store
            .for_student(&"s1".into())
            .iter()
            .map(|s| s.tag_id.to_string())
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[test]
    fn test_store_json_roundtrip() {
        let mut store = StateStore::new();
        store.upsert(state("s1", "a"));
        store.upsert(state("s2", "b"));

        let json = store.to_json().unwrap();
        let loaded = StateStore::from_json(&json).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get(&TagKey::new("s2".into(), "b".into())),
            store.get(&TagKey::new("s2".into(), "b".into()))
        );
    }
}
