//! Problem validation, model loading, and plan verification.
//!
//! [`load_model`] checks the structural integrity of a [`Problem`] and
//! resolves it into an immutable [`Model`]. It detects:
//! - Duplicate object names (including collisions created by auto-naming)
//! - Duplicate state names within a timeline
//! - Malformed duration bounds
//! - References to unknown timelines, resources, classes, or states
//!
//! All errors are collected before reporting; a problem with any error
//! never reaches the planner.
//!
//! [`validate_plan`] checks a finished [`Plan`] against the model: duration
//! bounds, non-overlap per timeline, resource capacity at every instant, and
//! goal coverage.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::ledger::peak_at_starts;
use crate::models::{
    Condition, DurationBounds, GroundRef, Model, ObjectKey, ObjectRef, Plan, Problem,
    ResourceDef, TimelineDef, Violation,
};

/// Validation result.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// A validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Two objects share the same name.
    DuplicateName,
    /// A timeline declares the same state twice.
    DuplicateState,
    /// A reference names a timeline that does not exist.
    UnknownTimeline,
    /// A reference names a resource that does not exist.
    UnknownResource,
    /// A reference names a class with no instances.
    UnknownClass,
    /// A reference names a state the target timeline cannot occupy.
    UnknownState,
    /// Duration bounds are inverted or outside `[0, MAX_DURATION]`.
    InvalidDuration,
}

impl ValidationError {
    /// Creates a validation error.
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Validates a problem without keeping the loaded model.
pub fn validate_input(problem: &Problem) -> ValidationResult {
    load_model(problem).map(|_| ())
}

/// Validates a problem and resolves it into a [`Model`].
///
/// Checks:
/// 1. Object names (explicit or `{class}_{index}`) are unique
/// 2. State names are unique per timeline; duration bounds are well formed
///    and no larger than [`MAX_DURATION`](crate::models::MAX_DURATION)
/// 3. Facts on undeclared timelines create facts-only timelines
/// 4. Fact and goal values are states of their timeline
/// 5. Condition references resolve to existing objects, classes, and states
/// 6. Open classes name a known class
pub fn load_model(problem: &Problem) -> Result<Model, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names: HashMap<String, ObjectKey> = HashMap::new();

    let resources: Vec<ResourceDef> = problem
        .resources
        .iter()
        .enumerate()
        .map(|(i, r)| ResourceDef {
            name: r.name.clone().unwrap_or_else(|| format!("{}_{}", r.class, i)),
            class: r.class.clone(),
            capacity: r.capacity,
        })
        .collect();

    let mut timelines: Vec<TimelineDef> = problem
        .timelines
        .iter()
        .enumerate()
        .map(|(i, t)| TimelineDef {
            name: t.name.clone().unwrap_or_else(|| format!("{}_{}", t.class, i)),
            class: Some(t.class.clone()),
            states: t.states.clone(),
        })
        .collect();

    for (i, r) in resources.iter().enumerate() {
        if names.insert(r.name.clone(), ObjectKey::Resource(i)).is_some() {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateName,
                format!("Duplicate object name: {}", r.name),
            ));
        }
    }

    for (i, t) in timelines.iter().enumerate() {
        if names.insert(t.name.clone(), ObjectKey::Timeline(i)).is_some() {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateName,
                format!("Duplicate object name: {}", t.name),
            ));
        }

        let mut seen = HashSet::new();
        for state in &t.states {
            if !seen.insert(state.name.as_str()) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::DuplicateState,
                    format!("Timeline '{}' declares state '{}' twice", t.name, state.name),
                ));
            }
            if !state.duration.is_valid() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidDuration,
                    format!(
                        "State '{}.{}' has invalid duration bounds {:?}",
                        t.name, state.name, state.duration
                    ),
                ));
            }
        }
    }

    // Facts may introduce facts-only timelines.
    let mut facts = Vec::new();
    for fact in &problem.facts {
        let timeline = match names.get(&fact.timeline_name) {
            Some(ObjectKey::Timeline(i)) => *i,
            Some(ObjectKey::Resource(_)) => {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownTimeline,
                    format!("Fact names resource '{}' as a timeline", fact.timeline_name),
                ));
                continue;
            }
            None => {
                let i = timelines.len();
                timelines.push(TimelineDef {
                    name: fact.timeline_name.clone(),
                    class: None,
                    states: Vec::new(),
                });
                names.insert(fact.timeline_name.clone(), ObjectKey::Timeline(i));
                i
            }
        };

        let def = &timelines[timeline];
        if def.class.is_some() && !def.states.iter().any(|s| s.name == fact.value) {
            errors.push(ValidationError::new(
                ValidationErrorKind::UnknownState,
                format!("Fact '{}.{}' is not a state of its timeline", def.name, fact.value),
            ));
        }
        facts.push(GroundRef {
            timeline,
            value: fact.value.clone(),
        });
    }

    let mut goals = Vec::new();
    for goal in &problem.goals {
        let timeline = match names.get(&goal.timeline_name) {
            Some(ObjectKey::Timeline(i)) if timelines[*i].class.is_some() => *i,
            _ => {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownTimeline,
                    format!("Goal references unknown timeline '{}'", goal.timeline_name),
                ));
                continue;
            }
        };
        let reachable = timelines[timeline].states.iter().any(|s| s.name == goal.value)
            || facts
                .iter()
                .any(|f| f.timeline == timeline && f.value == goal.value);
        if !reachable {
            errors.push(ValidationError::new(
                ValidationErrorKind::UnknownState,
                format!(
                    "Goal '{}.{}' is not a state of its timeline",
                    goal.timeline_name, goal.value
                ),
            ));
        }
        goals.push(GroundRef {
            timeline,
            value: goal.value.clone(),
        });
    }

    for t in &timelines {
        for state in &t.states {
            for condition in &state.conditions {
                check_condition(condition, t, &state.name, &timelines, &resources, &facts, &names, &mut errors);
            }
        }
    }

    let mut open_classes = BTreeSet::new();
    for class in &problem.open_classes {
        let known = resources.iter().any(|r| &r.class == class)
            || timelines.iter().any(|t| t.class.as_ref() == Some(class));
        if !known {
            errors.push(ValidationError::new(
                ValidationErrorKind::UnknownClass,
                format!("Open class '{class}' has no declared instance"),
            ));
        }
        open_classes.insert(class.clone());
    }

    if errors.is_empty() {
        Ok(Model {
            resources,
            timelines,
            facts,
            goals,
            open_classes,
            names,
        })
    } else {
        Err(errors)
    }
}

#[allow(clippy::too_many_arguments)]
fn check_condition(
    condition: &Condition,
    owner: &TimelineDef,
    state: &str,
    timelines: &[TimelineDef],
    resources: &[ResourceDef],
    facts: &[GroundRef],
    names: &HashMap<String, ObjectKey>,
    errors: &mut Vec<ValidationError>,
) {
    let site = format!("{}.{}", owner.name, state);
    match condition {
        Condition::UseResource(ObjectRef::Named(name), _) => {
            if !matches!(names.get(name), Some(ObjectKey::Resource(_))) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownResource,
                    format!("State '{site}' uses unknown resource '{name}'"),
                ));
            }
        }
        Condition::UseResource(ObjectRef::AnyOfClass(class), _) => {
            if !resources.iter().any(|r| &r.class == class) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownClass,
                    format!("State '{site}' uses unknown resource class '{class}'"),
                ));
            }
        }
        Condition::TransitionFrom(value) => {
            if !owner.states.iter().any(|s| &s.name == value) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownState,
                    format!("State '{site}' transitions from unknown state '{value}'"),
                ));
            }
        }
        Condition::MetBy(target, value) | Condition::During(target, value) => match target {
            ObjectRef::Named(name) => match names.get(name) {
                Some(ObjectKey::Timeline(i)) => {
                    let def = &timelines[*i];
                    let known = def.states.iter().any(|s| &s.name == value)
                        || facts.iter().any(|f| f.timeline == *i && &f.value == value);
                    if !known {
                        errors.push(ValidationError::new(
                            ValidationErrorKind::UnknownState,
                            format!("State '{site}' refers to unknown state '{name}.{value}'"),
                        ));
                    }
                }
                _ => errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownTimeline,
                    format!("State '{site}' refers to unknown timeline '{name}'"),
                )),
            },
            ObjectRef::AnyOfClass(class) => {
                let members: Vec<&TimelineDef> = timelines
                    .iter()
                    .filter(|t| t.class.as_ref() == Some(class))
                    .collect();
                if members.is_empty() {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::UnknownClass,
                        format!("State '{site}' refers to unknown timeline class '{class}'"),
                    ));
                } else if !members
                    .iter()
                    .any(|t| t.states.iter().any(|s| &s.name == value))
                {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::UnknownState,
                        format!("No timeline of class '{class}' has state '{value}' (used by '{site}')"),
                    ));
                }
            }
        },
    }
}

// ================================
// Plan verification
// ================================

/// Checks a plan against the model.
///
/// Returns every violation found; an empty vector means the plan respects
/// duration bounds, timeline exclusivity, resource capacities, and goals.
/// Timelines and resources synthesized during planning are checked against
/// the first declared instance of their class.
pub fn validate_plan(model: &Model, plan: &Plan) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut usage: HashMap<String, Vec<(i64, i64, u32)>> = HashMap::new();

    for entry in &plan.timelines {
        let Some(def) = timeline_template(model, &entry.name) else {
            violations.push(Violation::unknown(
                &entry.name,
                format!("Plan contains unknown timeline '{}'", entry.name),
            ));
            continue;
        };

        for token in &entry.tokens {
            let template = def.states.iter().find(|s| s.name == token.state);
            let bounds = match (template, def.class.is_none()) {
                (Some(t), _) => t.duration,
                (None, true) => DurationBounds::default(),
                (None, false) => {
                    violations.push(Violation::unknown(
                        &entry.name,
                        format!("Token '{}.{}' has no state template", entry.name, token.state),
                    ));
                    continue;
                }
            };

            if !bounds.contains(token.duration()) {
                violations.push(Violation::duration(
                    &entry.name,
                    format!(
                        "Token '{}.{}' [{}, {}) lasts {} outside {:?}",
                        entry.name,
                        token.state,
                        token.start,
                        token.end,
                        token.duration(),
                        bounds
                    ),
                ));
            }

            let Some(template) = template else { continue };
            for (condition, binding) in template.conditions.iter().zip(&token.bindings) {
                if let (Condition::UseResource(_, amount), ObjectRef::Named(resource)) =
                    (condition, binding)
                {
                    usage
                        .entry(resource.clone())
                        .or_default()
                        .push((token.start, token.end, *amount));
                }
            }
        }

        for (i, a) in entry.tokens.iter().enumerate() {
            for b in &entry.tokens[i + 1..] {
                if a.overlaps(b) {
                    violations.push(Violation::overlap(
                        &entry.name,
                        format!(
                            "Tokens '{}' [{}, {}) and '{}' [{}, {}) overlap",
                            a.state, a.start, a.end, b.state, b.start, b.end
                        ),
                    ));
                }
            }
        }
    }

    let mut resources: Vec<&String> = usage.keys().collect();
    resources.sort();
    for name in resources {
        let Some(def) = resource_template(model, name) else {
            violations.push(Violation::unknown(
                name,
                format!("Plan binds unknown resource '{name}'"),
            ));
            continue;
        };
        let Some(capacity) = def.capacity else { continue };
        let peak = peak_at_starts(&usage[name]);
        if peak > u64::from(capacity) {
            violations.push(Violation::capacity_exceeded(
                name,
                format!("Resource '{name}' peaks at {peak} > {capacity}"),
            ));
        }
    }

    for goal in &model.goals {
        let name = &model.timelines[goal.timeline].name;
        if plan.tokens_of(name, &goal.value).is_empty() {
            violations.push(Violation::goal_missing(
                name,
                format!("Goal '{}.{}' has no token", name, goal.value),
            ));
        }
    }

    violations
}

/// Strips a synthesized `_{n}` suffix and returns the class prefix.
fn synthesized_class(name: &str) -> Option<&str> {
    let (class, index) = name.rsplit_once('_')?;
    (!index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())).then_some(class)
}

pub(crate) fn timeline_template<'m>(model: &'m Model, name: &str) -> Option<&'m TimelineDef> {
    if let Some(i) = model.timeline_index(name) {
        return Some(&model.timelines[i]);
    }
    let class = synthesized_class(name)?;
    let first = model.timelines_of_class(class).next()?;
    Some(&model.timelines[first])
}

pub(crate) fn resource_template<'m>(model: &'m Model, name: &str) -> Option<&'m ResourceDef> {
    if let Some(i) = model.resource_index(name) {
        return Some(&model.resources[i]);
    }
    let class = synthesized_class(name)?;
    let first = model.resources_of_class(class).next()?;
    Some(&model.resources[first])
}
