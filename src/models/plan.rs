//! Plan (solution) model.
//!
//! A plan lists, per timeline, the tokens of the solved schedule in time
//! order with concrete start/end times and the objects their conditions
//! were bound to. A failed search produces a [`Failure`] instead.
//!
//! # Reference
//! Ghallab, Nau & Traverso (2016), "Automated Planning and Acting", Ch. 4

use serde::{Deserialize, Serialize};

use super::ObjectRef;

/// A complete plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// One entry per timeline, in model order (synthesized timelines last).
    pub timelines: Vec<PlanTimeline>,
}

/// The scheduled tokens of one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTimeline {
    /// Timeline name.
    pub name: String,
    /// Tokens in time order.
    pub tokens: Vec<PlanToken>,
}

/// A scheduled state occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanToken {
    /// State value.
    pub state: String,
    /// Start time.
    pub start: i64,
    /// End time (exclusive).
    pub end: i64,
    /// Objects bound to the token's conditions, in condition order.
    pub bindings: Vec<ObjectRef>,
}

/// Outcome of a failed search, in the output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Why the search stopped.
    pub status: FailureStatus,
    /// Human-readable descriptions of the flaws still open.
    pub flaws_remaining: Vec<String>,
}

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    /// The search space was exhausted: no plan exists within the limits.
    Exhausted,
    /// The decision budget or deadline ran out before a verdict.
    SearchExhausted,
}

/// Either a plan or a failure; serializes untagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SolveOutcome {
    /// Search succeeded.
    Solved(Plan),
    /// Search failed.
    Failed(Failure),
}

/// A property a plan fails to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Type of violation.
    pub violation_type: ViolationType,
    /// Related entity (timeline, resource, or goal).
    pub entity_id: String,
    /// Human-readable description.
    pub message: String,
}

/// Classification of plan violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationType {
    /// Token duration outside its state's bounds.
    DurationOutOfBounds,
    /// Two tokens on one timeline overlap.
    TimelineOverlap,
    /// Resource usage above capacity at some instant.
    CapacityExceeded,
    /// A goal has no token of the required state.
    GoalMissing,
    /// A token names a state, timeline or object the model does not know.
    UnknownEntity,
}

impl Violation {
    fn new(
        violation_type: ViolationType,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            violation_type,
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }

    /// Creates a duration violation.
    pub fn duration(timeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ViolationType::DurationOutOfBounds, timeline, message)
    }

    /// Creates an overlap violation.
    pub fn overlap(timeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ViolationType::TimelineOverlap, timeline, message)
    }

    /// Creates a capacity violation.
    pub fn capacity_exceeded(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ViolationType::CapacityExceeded, resource, message)
    }

    /// Creates a missing-goal violation.
    pub fn goal_missing(timeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ViolationType::GoalMissing, timeline, message)
    }

    /// Creates an unknown-entity violation.
    pub fn unknown(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ViolationType::UnknownEntity, entity, message)
    }
}

impl PlanToken {
    /// Creates a token without bindings.
    pub fn new(state: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            state: state.into(),
            start,
            end,
            bindings: Vec::new(),
        }
    }

    /// Sets the bindings.
    pub fn with_bindings(mut self, bindings: Vec<ObjectRef>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Duration (end - start).
    #[inline]
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Whether the half-open intervals of two tokens share an instant.
    pub fn overlaps(&self, other: &PlanToken) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl PlanTimeline {
    /// Creates an empty timeline entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: Vec::new(),
        }
    }

    /// Adds a token.
    pub fn with_token(mut self, token: PlanToken) -> Self {
        self.tokens.push(token);
        self
    }

    /// Sequence of state values.
    pub fn states(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.state.as_str()).collect()
    }
}

impl Plan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the plan to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Finds the entry of a timeline.
    pub fn timeline(&self, name: &str) -> Option<&PlanTimeline> {
        self.timelines.iter().find(|t| t.name == name)
    }

    /// All tokens of `state` on timeline `name`.
    pub fn tokens_of(&self, name: &str, state: &str) -> Vec<&PlanToken> {
        self.timeline(name)
            .map(|t| t.tokens.iter().filter(|tok| tok.state == state).collect())
            .unwrap_or_default()
    }

    /// Makespan: latest token end across all timelines.
    pub fn makespan(&self) -> i64 {
        self.timelines
            .iter()
            .flat_map(|t| t.tokens.iter())
            .map(|t| t.end)
            .max()
            .unwrap_or(0)
    }

    /// Total number of tokens.
    pub fn token_count(&self) -> usize {
        self.timelines.iter().map(|t| t.tokens.len()).sum()
    }
}
