//! Plan-level → tier-role policy.
//!
//! Thresholds are cumulative: a plan level qualifies for every rule whose
//! threshold it meets, so a top-tier member also holds every lower tier role.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ledger highlight palette, as RGBA fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Green,
    Blue,
    Yellow,
    Red,
}

impl HighlightColor {
    pub fn rgba(self) -> (f32, f32, f32, f32) {
        match self {
            Self::Green => (0.714, 0.843, 0.659, 1.0),
            Self::Blue => (0.624, 0.773, 0.91, 1.0),
            Self::Yellow => (1.0, 0.898, 0.6, 1.0),
            Self::Red => (0.918, 0.6, 0.6, 1.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRule {
    pub threshold: i64,
    pub role: String,
    #[serde(default = "default_tier_color")]
    pub color: HighlightColor,
}

fn default_tier_color() -> HighlightColor {
    HighlightColor::Green
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPolicy {
    /// Sorted ascending by threshold; declaration order kept for equal thresholds.
    rules: Vec<TierRule>,
    pub mute_role: Option<String>,
    pub former_role: Option<String>,
}

impl TierPolicy {
    pub fn new(mut rules: Vec<TierRule>, mute_role: Option<String>, former_role: Option<String>) -> Self {
        rules.sort_by_key(|rule| rule.threshold);
        Self {
            rules,
            mute_role,
            former_role,
        }
    }

    pub fn rules(&self) -> &[TierRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every role the policy manages, in threshold order without duplicates.
    pub fn tier_roles(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.rules
            .iter()
            .filter(|rule| seen.insert(rule.role.as_str()))
            .map(|rule| rule.role.as_str())
            .collect()
    }

    pub fn is_tier_role(&self, role_id: &str) -> bool {
        self.rules.iter().any(|rule| rule.role == role_id)
    }

    pub fn desired_roles(&self, plan_level: i64) -> BTreeSet<String> {
        self.rules
            .iter()
            .take_while(|rule| plan_level >= rule.threshold)
            .map(|rule| rule.role.clone())
            .collect()
    }

    /// Highest qualifying rule; the last declared wins among equal thresholds.
    pub fn highest_rule(&self, plan_level: i64) -> Option<&TierRule> {
        self.rules
            .iter()
            .take_while(|rule| plan_level >= rule.threshold)
            .last()
    }

    pub fn highlight_for(&self, plan_level: i64) -> Option<HighlightColor> {
        self.highest_rule(plan_level).map(|rule| rule.color)
    }
}
