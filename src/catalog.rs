//! Tag catalog and observation signing
//!
//! Raw teacher logs carry an unsigned magnitude. The catalog looks up each
//! tag's sentiment and default weight and turns a `RawObservation` into the
//! signed `Observation` the estimator consumes.

use crate::error::ScoreError;
use crate::types::{Observation, RawObservation, TagId, TagMeta};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Smallest allowed tag weight
pub const MIN_WEIGHT: f64 = 1.0;

/// Largest allowed tag weight
pub const MAX_WEIGHT: f64 = 10.0;

/// Lookup of tag metadata by id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagCatalog {
    tags: HashMap<TagId, TagMeta>,
}

impl TagCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of tags, validating each
    pub fn from_tags(tags: Vec<TagMeta>) -> Result<Self, ScoreError> {
        let mut catalog = Self::new();
        for tag in tags {
            catalog.insert(tag)?;
        }
        Ok(catalog)
    }

    /// Parse a JSON array of tag metadata
    pub fn from_json(json: &str) -> Result<Self, ScoreError> {
        let tags: Vec<TagMeta> = serde_json::from_str(json)?;
        Self::from_tags(tags)
    }

    /// Add or replace a tag
    pub fn insert(&mut self, tag: TagMeta) -> Result<(), ScoreError> {
        if !weight_in_range(tag.default_weight) {
            return Err(ScoreError::InvalidTag(format!(
                "default weight {} for tag {} outside {}-{}",
                tag.default_weight, tag.tag_id, MIN_WEIGHT, MAX_WEIGHT
            )));
        }
        self.tags.insert(tag.tag_id.clone(), tag);
        Ok(())
    }

    pub fn get(&self, tag_id: &TagId) -> Option<&TagMeta> {
        self.tags.get(tag_id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Sign and scale a raw log entry
    pub fn sign(&self, raw: &RawObservation) -> Result<Observation, ScoreError> {
        let meta = self
            .get(&raw.tag_id)
            .ok_or_else(|| ScoreError::UnknownTag(raw.tag_id.to_string()))?;

        let weight = raw.weight.unwrap_or(meta.default_weight);
        if !weight_in_range(weight) {
            return Err(ScoreError::InvalidWeight(weight));
        }

        Ok(Observation {
            student_id: raw.student_id.clone(),
            tag_id: raw.tag_id.clone(),
            sentiment: meta.sentiment,
            timestamp: raw.timestamp,
            signed_weight: meta.sentiment.sign() * weight,
        })
    }

    /// Sign a batch, failing on the first bad entry
    pub fn sign_all(&self, raws: &[RawObservation]) -> Result<Vec<Observation>, ScoreError> {
        raws.iter().map(|raw| self.sign(raw)).collect()
    }
}

fn weight_in_range(weight: f64) -> bool {
    weight.is_finite() && (MIN_WEIGHT..=MAX_WEIGHT).contains(&weight)
}

/// Parser for raw observation input
pub struct RawObservationAdapter;

impl RawObservationAdapter {
    /// Parse a JSON array of raw observations
    pub fn parse_array(json: &str) -> Result<Vec<RawObservation>, ScoreError> {
        let raws: Vec<RawObservation> = serde_json::from_str(json)?;
        Ok(raws)
    }

    /// Parse NDJSON (one raw observation per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawObservation>, ScoreError> {
        let mut raws = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawObservation>(trimmed) {
                Ok(raw) => raws.push(raw),
                Err(e) => {
                    return Err(ScoreError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(raws)
    }

    /// Sign every entry and collect the failures instead of stopping
    pub fn validate(catalog: &TagCatalog, raws: &[RawObservation]) -> Vec<ValidationResult> {
        raws.iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                catalog.sign(raw).err().map(|error| ValidationResult {
                    index,
                    student_id: raw.student_id.to_string(),
                    tag_id: raw.tag_id.to_string(),
                    error,
                })
            })
            .collect()
    }
}

/// A raw entry that could not be signed
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub student_id: String,
    pub tag_id: String,
    pub error: ScoreError,
}
