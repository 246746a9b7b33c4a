//! State conditions and object references.
//!
//! A condition is a requirement attached to a state template. Every token
//! instantiated from that template must have each of its conditions
//! supported exactly once in a solved plan.
//!
//! # Wire format
//!
//! Conditions use serde's externally tagged representation, so the four
//! variants read and write as `{"UseResource": [ref, amount]}`,
//! `{"TransitionFrom": value}`, `{"MetBy": [ref, value]}` and
//! `{"During": [ref, value]}`.
//!
//! # Reference
//! Frank & Jónsson (2003), "Constraint-Based Attribute and Interval Planning"

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to an object from inside a condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    /// A specific named instance.
    Named(String),
    /// Any instance of the class; resolved during planning.
    AnyOfClass(String),
}

impl ObjectRef {
    /// Creates a reference to a named instance.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Creates an existential reference over a class.
    pub fn any_of(class: impl Into<String>) -> Self {
        Self::AnyOfClass(class.into())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Named(name) => write!(f, "{name}"),
            ObjectRef::AnyOfClass(class) => write!(f, "any {class}"),
        }
    }
}

/// A condition on a state template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Consumes `amount` units of the resource for the token's interval.
    UseResource(ObjectRef, u32),

    /// The token is immediately preceded (no gap) by a token of this
    /// state on the same timeline.
    TransitionFrom(String),

    /// The token starts exactly when a token of `value` on the referenced
    /// timeline ends.
    MetBy(ObjectRef, String),

    /// The token's interval is contained in a token of `value` on the
    /// referenced timeline.
    During(ObjectRef, String),
}

/// Temporal relation between a consumer token and its supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    /// `end(supplier) == start(consumer)`, locked gap on one timeline.
    Adjacent,
    /// `end(supplier) == start(consumer)` across timelines.
    MetBy,
    /// `start(supplier) <= start(consumer)` and `end(consumer) <= end(supplier)`.
    During,
}

impl Condition {
    /// Creates a resource usage condition.
    pub fn use_resource(resource: ObjectRef, amount: u32) -> Self {
        Self::UseResource(resource, amount)
    }

    /// Creates a transition condition.
    pub fn transition_from(value: impl Into<String>) -> Self {
        Self::TransitionFrom(value.into())
    }

    /// Creates a met-by condition.
    pub fn met_by(timeline: ObjectRef, value: impl Into<String>) -> Self {
        Self::MetBy(timeline, value.into())
    }

    /// Creates a during condition.
    pub fn during(timeline: ObjectRef, value: impl Into<String>) -> Self {
        Self::During(timeline, value.into())
    }

    /// The temporal relation this condition imposes on its supplier token.
    ///
    /// Returns `None` for resource usage, which is supported by a
    /// reservation rather than a token.
    pub fn relation(&self) -> Option<Relation> {
        match self {
            Condition::UseResource(..) => None,
            Condition::TransitionFrom(_) => Some(Relation::Adjacent),
            Condition::MetBy(..) => Some(Relation::MetBy),
            Condition::During(..) => Some(Relation::During),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::UseResource(r, amount) => write!(f, "use {amount} of {r}"),
            Condition::TransitionFrom(v) => write!(f, "transition from {v}"),
            Condition::MetBy(t, v) => write!(f, "met by {t}.{v}"),
            Condition::During(t, v) => write!(f, "during {t}.{v}"),
        }
    }
}

/// Largest duration bound a state may declare.
///
/// Keeps sums of bounds along long token chains inside `i64`.
pub const MAX_DURATION: i64 = 1 << 40;

/// Duration bounds `(min, max)` of a state; `max = None` is unbounded.
///
/// Serializes as a two-element array `[min, max|null]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationBounds(pub i64, pub Option<i64>);

impl DurationBounds {
    /// Bounds with a minimum and no maximum.
    pub fn at_least(min: i64) -> Self {
        Self(min, None)
    }

    /// Closed bounds `[min, max]`.
    pub fn between(min: i64, max: i64) -> Self {
        Self(min, Some(max))
    }

    /// Fixed duration.
    pub fn exactly(d: i64) -> Self {
        Self(d, Some(d))
    }

    /// Minimum duration.
    #[inline]
    pub fn min(&self) -> i64 {
        self.0
    }

    /// Maximum duration, if bounded.
    #[inline]
    pub fn max(&self) -> Option<i64> {
        self.1
    }

    /// Whether the bounds are well formed (`0 <= min <= max <= MAX_DURATION`).
    pub fn is_valid(&self) -> bool {
        (0..=MAX_DURATION).contains(&self.0)
            && self.1.map_or(true, |max| max >= self.0 && max <= MAX_DURATION)
    }

    /// Whether `duration` lies within the bounds.
    pub fn contains(&self, duration: i64) -> bool {
        duration >= self.0 && self.1.map_or(true, |max| duration <= max)
    }
}

impl Default for DurationBounds {
    fn default() -> Self {
        Self::at_least(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_wire_format() {
        let c = Condition::use_resource(ObjectRef::named("Battery_0"), 2);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json, serde_json::json!({"UseResource": [{"Named": "Battery_0"}, 2]}));

        let c = Condition::transition_from("Off");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json, serde_json::json!({"TransitionFrom": "Off"}));

        let c: Condition =
            serde_json::from_str(r#"{"During": [{"AnyOfClass": "Rover"}, "Driving"]}"#).unwrap();
        assert_eq!(c, Condition::during(ObjectRef::any_of("Rover"), "Driving"));
    }

    #[test]
    fn test_relations() {
        assert_eq!(Condition::use_resource(ObjectRef::named("B"), 1).relation(), None);
        assert_eq!(Condition::transition_from("A").relation(), Some(Relation::Adjacent));
        assert_eq!(
            Condition::met_by(ObjectRef::named("T"), "x").relation(),
            Some(Relation::MetBy)
        );
    }

    #[test]
    fn test_duration_bounds() {
        let d = DurationBounds::between(2, 5);
        assert!(d.is_valid());
        assert!(d.contains(2));
        assert!(d.contains(5));
        assert!(!d.contains(6));
        assert!(!d.contains(1));

        let open = DurationBounds::at_least(1);
        assert!(open.contains(1_000_000));
        assert!(!DurationBounds(3, Some(2)).is_valid());
        assert!(!DurationBounds(-1, None).is_valid());
        assert!(DurationBounds::exactly(MAX_DURATION).is_valid());
        assert!(!DurationBounds::exactly(i64::MAX / 2 + 1).is_valid());
        assert!(!DurationBounds::at_least(MAX_DURATION + 1).is_valid());
    }

    #[test]
    fn test_duration_bounds_wire_format() {
        let d: DurationBounds = serde_json::from_str("[1, null]").unwrap();
        assert_eq!(d, DurationBounds::at_least(1));
        let d: DurationBounds = serde_json::from_str("[2, 4]").unwrap();
        assert_eq!(d, DurationBounds::between(2, 4));
        assert_eq!(serde_json::to_string(&DurationBounds::exactly(3)).unwrap(), "[3,3]");
    }
}
