//! Weight factors that drive a leaf's proportional budget share.

use serde::{Deserialize, Serialize};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

/// Weight factors for a node.
///
/// # Formula
/// `historical_usage * complexity * (1 + 0.1 * queue_depth) * (priority / 5)`
///
/// The default weight is exactly `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeWeight {
    /// Usage multiplier learned from past utilization (>= 0)
    pub historical_usage: f64,
    /// Pending requests; each adds 10% weight
    pub queue_depth: u32,
    /// Processing complexity multiplier (>= 0)
    pub complexity: f64,
    /// Priority on a 1-10 scale
    pub priority: u8,
}

impl Default for NodeWeight {
    fn default() -> Self {
        Self {
            historical_usage: 1.0,
            queue_depth: 0,
            complexity: 1.0,
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl NodeWeight {
    /// Combined weight factor.
    pub fn total_weight(&self) -> f64 {
        let base = self.historical_usage * self.complexity;
        let queue_factor = 1.0 + f64::from(self.queue_depth) * 0.1;
        let priority_factor = f64::from(self.priority) / f64::from(DEFAULT_PRIORITY);
        base * queue_factor * priority_factor
    }

    /// Apply a partial update. Out-of-range values are clamped into range.
    pub fn apply(&mut self, factors: &WeightFactors) {
        if let Some(usage) = factors.historical_usage {
            self.historical_usage = non_negative(usage);
        }
        if let Some(depth) = factors.queue_depth {
            self.queue_depth = depth;
        }
        if let Some(complexity) = factors.complexity {
            self.complexity = non_negative(complexity);
        }
        if let Some(priority) = factors.priority {
            self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// A partial update of `NodeWeight`; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightFactors {
    #[serde(default)]
    pub historical_usage: Option<f64>,
    #[serde(default)]
    pub queue_depth: Option<u32>,
    #[serde(default)]
    pub complexity: Option<f64>,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl WeightFactors {
    pub fn with_historical_usage(mut self, value: f64) -> Self {
        self.historical_usage = Some(value);
        self
    }

    pub fn with_queue_depth(mut self, value: u32) -> Self {
        self.queue_depth = Some(value);
        self
    }

    pub fn with_complexity(mut self, value: f64) -> Self {
        self.complexity = Some(value);
        self
    }

    pub fn with_priority(mut self, value: u8) -> Self {
        self.priority = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.historical_usage.is_none()
            && self.queue_depth.is_none()
            && self.complexity.is_none()
            && self.priority.is_none()
    }
}
