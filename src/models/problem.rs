//! Problem description (planner input).
//!
//! A problem declares resources, timelines with their state templates,
//! facts known at plan start, and goals. Object names are optional on
//! input; [`Model::load`](super::Model::load) fills them in as
//! `{class}_{index}` before planning.
//!
//! # Example
//!
//! ```
//! use u_timeline::models::{Condition, DurationBounds, Problem, StateTemplate, TimelineSpec};
//!
//! let problem = Problem::new()
//!     .with_timeline(
//!         TimelineSpec::new("Light")
//!             .with_name("light")
//!             .with_state(StateTemplate::new("On").with_condition(Condition::transition_from("Off")))
//!             .with_state(StateTemplate::new("Off").with_condition(Condition::transition_from("On"))),
//!     )
//!     .with_fact("light", "Off")
//!     .with_goal("light", "On");
//! assert_eq!(problem.timelines.len(), 1);
//! ```

use serde::{Deserialize, Serialize};

use super::{Condition, DurationBounds};

/// A complete planning problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Capacity-bounded resources.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Timelines and their state templates.
    #[serde(default)]
    pub timelines: Vec<TimelineSpec>,
    /// Tokens known to hold at plan start.
    #[serde(default)]
    pub facts: Vec<GroundToken>,
    /// Tokens that must appear in the plan.
    #[serde(default)]
    pub goals: Vec<GroundToken>,
    /// Classes whose instances may be synthesized on demand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_classes: Vec<String>,
}

/// A resource declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource class.
    pub class: String,
    /// Instance name (auto-generated when absent).
    #[serde(default)]
    pub name: Option<String>,
    /// Maximum simultaneous usage. `None` = unbounded.
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// A timeline declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSpec {
    /// Timeline class.
    pub class: String,
    /// Instance name (auto-generated when absent).
    #[serde(default)]
    pub name: Option<String>,
    /// States the timeline may occupy.
    #[serde(default)]
    pub states: Vec<StateTemplate>,
}

/// A state a timeline may occupy, with its duration and conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTemplate {
    /// State value.
    pub name: String,
    /// Allowed duration of one occurrence.
    #[serde(default)]
    pub duration: DurationBounds,
    /// Conditions every occurrence must satisfy.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A ground `(timeline, value)` pair, used for facts and goals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundToken {
    /// Timeline name.
    pub timeline_name: String,
    /// State value.
    pub value: String,
}

impl Problem {
    /// Creates an empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a problem from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the problem to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Adds a resource.
    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }

    /// Adds a timeline.
    pub fn with_timeline(mut self, timeline: TimelineSpec) -> Self {
        self.timelines.push(timeline);
        self
    }

    /// Adds a fact.
    pub fn with_fact(mut self, timeline: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.push(GroundToken::new(timeline, value));
        self
    }

    /// Adds a goal.
    pub fn with_goal(mut self, timeline: impl Into<String>, value: impl Into<String>) -> Self {
        self.goals.push(GroundToken::new(timeline, value));
        self
    }

    /// Marks a class as open (instances may be synthesized).
    pub fn with_open_class(mut self, class: impl Into<String>) -> Self {
        self.open_classes.push(class.into());
        self
    }
}

impl ResourceSpec {
    /// Creates an unnamed resource with unbounded capacity.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: None,
            capacity: None,
        }
    }

    /// Sets the instance name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the capacity.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

impl TimelineSpec {
    /// Creates an unnamed timeline with no states.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: None,
            states: Vec::new(),
        }
    }

    /// Sets the instance name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a state template.
    pub fn with_state(mut self, state: StateTemplate) -> Self {
        self.states.push(state);
        self
    }

    /// Finds a state template by value.
    pub fn state(&self, name: &str) -> Option<&StateTemplate> {
        self.states.iter().find(|s| s.name == name)
    }
}

impl StateTemplate {
    /// Creates a state with the default duration `[1, ∞)` and no conditions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: DurationBounds::default(),
            conditions: Vec::new(),
        }
    }

    /// Sets the duration bounds.
    pub fn with_duration(mut self, duration: DurationBounds) -> Self {
        self.duration = duration;
        self
    }

    /// Adds a condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// The `TransitionFrom` predecessor values of this state.
    pub fn transition_sources(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::TransitionFrom(v) => Some(v.as_str()),
            _ => None,
        })
    }
}

impl GroundToken {
    /// Creates a ground token.
    pub fn new(timeline_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timeline_name: timeline_name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectRef;

    #[test]
    fn test_problem_builder() {
        let p = Problem::new()
            .with_resource(ResourceSpec::new("Battery").with_capacity(1))
            .with_timeline(
                TimelineSpec::new("Rover")
                    .with_name("r1")
                    .with_state(StateTemplate::new("Idle"))
                    .with_state(
                        StateTemplate::new("Drive")
                            .with_duration(DurationBounds::between(2, 4))
                            .with_condition(Condition::use_resource(
                                ObjectRef::any_of("Battery"),
                                1,
                            )),
                    ),
            )
            .with_fact("r1", "Idle")
            .with_goal("r1", "Drive")
            .with_open_class("Battery");

        assert_eq!(p.resources[0].capacity, Some(1));
        assert_eq!(p.resources[0].name, None);
        assert_eq!(p.timelines[0].state("Drive").unwrap().duration.max(), Some(4));
        assert!(p.timelines[0].state("Missing").is_none());
        assert_eq!(p.facts[0].value, "Idle");
        assert_eq!(p.goals[0].timeline_name, "r1");
        assert_eq!(p.open_classes, vec!["Battery".to_string()]);
    }

    #[test]
    fn test_problem_from_builder_json() {
        // Fully named problem, as emitted by a generator.
        let json = r#"{
            "resources": [{"class": "Battery", "name": "Battery_0", "capacity": 1}],
            "timelines": [{
                "class": "Light",
                "name": "Light_0",
                "states": [
                    {"name": "On", "duration": [1, null], "conditions": [{"TransitionFrom": "Off"}]},
                    {"name": "Off", "duration": [1, null],
                     "conditions": [{"UseResource": [{"AnyOfClass": "Battery"}, 1]}]}
                ]
            }],
            "facts": [{"timeline_name": "Light_0", "value": "Off"}],
            "goals": [{"timeline_name": "Light_0", "value": "On"}]
        }"#;

        let p = Problem::from_json(json).unwrap();
        assert_eq!(p.timelines[0].states.len(), 2);
        assert!(p.open_classes.is_empty());
        let sources: Vec<&str> = p.timelines[0].states[0].transition_sources().collect();
        assert_eq!(sources, vec!["Off"]);

        let back = Problem::from_json(&p.to_json().unwrap()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_null_name_and_capacity() {
        let p = Problem::from_json(
            r#"{"resources": [{"class": "Tool", "name": null, "capacity": null}]}"#,
        )
        .unwrap();
        assert_eq!(p.resources[0].name, None);
        assert_eq!(p.resources[0].capacity, None);
        assert!(p.timelines.is_empty());
    }
}
