//! Per-student summaries
//!
//! Combines per-tag filter states into unweighted means, split by sentiment
//! and overall, for dashboard cards.

use crate::types::{Sentiment, TagFilterState};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Means over a group of tag states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub tag_count: usize,
    pub avg_level: f64,
    pub avg_trend: f64,
    pub avg_confidence: f64,
    /// Tags with at least `min_observations` observations
    pub reliable_tags: usize,
}

/// Summaries split by sentiment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentBreakdown {
    pub positive: Option<GroupSummary>,
    pub negative: Option<GroupSummary>,
}

/// Result of aggregating a student's tag states; `None` groups mean no data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthSummary {
    pub by_sentiment: SentimentBreakdown,
    pub overall: Option<GroupSummary>,
}

impl GrowthSummary {
    pub fn has_data(&self) -> bool {
        self.overall.is_some()
    }
}

/// Aggregate tag states into sentiment and overall means
pub fn aggregate<I, S>(states: I) -> GrowthSummary
where
    I: IntoIterator<Item = S>,
    S: Borrow<TagFilterState>,
{
    let mut positive = Accumulator::default();
    let mut negative = Accumulator::default();
    let mut overall = Accumulator::default();

    for state in states {
        let state = state.borrow();
        match state.sentiment {
            Sentiment::Positive => positive.add(state),
            Sentiment::Negative => negative.add(state),
        }
        overall.add(state);
    }

    GrowthSummary {
        by_sentiment: SentimentBreakdown {
            positive: positive.finish(),
            negative: negative.finish(),
        },
        overall: overall.finish(),
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    reliable: usize,
    level: f64,
    trend: f64,
    confidence: f64,
}

impl Accumulator {
    fn add(&mut self, state: &TagFilterState) {
        self.count += 1;
        if state.is_reliable {
            self.reliable += 1;
        }
        self.level += state.level;
        self.trend += state.trend;
        self.confidence += state.confidence;
    }

    fn finish(self) -> Option<GroupSummary> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(GroupSummary {
            tag_count: self.count,
            avg_level: self.level / n,
            avg_trend: self.trend / n,
            avg_confidence: self.confidence / n,
            reliable_tags: self.reliable,
        })
    }
}
