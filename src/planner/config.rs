//! Planner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How multiple goals on the same timeline relate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalOrdering {
    /// Goals may be met in any order, even by the same token.
    #[default]
    Free,
    /// Goal tokens are distinct and ordered as declared.
    Declaration,
}

/// How concrete times are chosen from the solved network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSelection {
    /// Every timepoint at its earliest time.
    #[default]
    Earliest,
    /// Timepoints fixed in creation order to the middle of their bounds.
    Midpoint,
}

/// Search limits and policies.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use u_timeline::planner::{GoalOrdering, PlannerConfig};
///
/// let config = PlannerConfig::default()
///     .with_max_decisions(500)
///     .with_deadline(Duration::from_secs(2))
///     .with_goal_ordering(GoalOrdering::Declaration);
/// assert_eq!(config.max_decisions, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum number of applied candidates.
    pub max_decisions: usize,
    /// Wall-clock limit of one search.
    pub deadline: Option<Duration>,
    /// Upper bound on every timepoint. `None` = unbounded.
    pub horizon: Option<i64>,
    /// Relation between goals on one timeline.
    pub goal_ordering: GoalOrdering,
    /// Goals must be the last token of their timeline.
    pub final_goals: bool,
    /// Instances an open class may gain during one search.
    pub max_synthesized_per_class: usize,
    /// Time selection policy of plan extraction.
    pub time_selection: TimeSelection,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_decisions: 10_000,
            deadline: None,
            horizon: None,
            goal_ordering: GoalOrdering::Free,
            final_goals: false,
            max_synthesized_per_class: 2,
            time_selection: TimeSelection::Earliest,
        }
    }
}

impl PlannerConfig {
    /// Parses a configuration from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sets the decision budget.
    pub fn with_max_decisions(mut self, max_decisions: usize) -> Self {
        self.max_decisions = max_decisions;
        self
    }

    /// Sets the wall-clock deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the horizon.
    pub fn with_horizon(mut self, horizon: i64) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Sets the goal ordering.
    pub fn with_goal_ordering(mut self, ordering: GoalOrdering) -> Self {
        self.goal_ordering = ordering;
        self
    }

    /// Requires goals to end their timelines.
    pub fn with_final_goals(mut self, final_goals: bool) -> Self {
        self.final_goals = final_goals;
        self
    }

    /// Sets the synthesis bound per open class.
    pub fn with_max_synthesized_per_class(mut self, max: usize) -> Self {
        self.max_synthesized_per_class = max;
        self
    }

    /// Sets the time selection policy.
    pub fn with_time_selection(mut self, selection: TimeSelection) -> Self {
        self.time_selection = selection;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PlannerConfig::default();
        assert_eq!(c.max_decisions, 10_000);
        assert_eq!(c.max_synthesized_per_class, 2);
        assert_eq!(c.goal_ordering, GoalOrdering::Free);
        assert_eq!(c.time_selection, TimeSelection::Earliest);
        assert!(!c.final_goals);
        assert!(c.horizon.is_none());
    }

    #[test]
    fn test_from_partial_json() {
        let c = PlannerConfig::from_json(
            r#"{"horizon": 50, "goal_ordering": "declaration", "time_selection": "midpoint"}"#,
        )
        .unwrap();
        assert_eq!(c.horizon, Some(50));
        assert_eq!(c.goal_ordering, GoalOrdering::Declaration);
        assert_eq!(c.time_selection, TimeSelection::Midpoint);
        assert_eq!(c.max_decisions, 10_000);
    }
}
