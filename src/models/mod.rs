//! Planning domain models.
//!
//! Provides the input schema ([`Problem`]), the validated and fully named
//! [`Model`] every planning run starts from, and the output [`Plan`].
//!
//! # Domain Mappings
//!
//! | u-timeline | Robotics | Operations | Space missions |
//! |------------|----------|------------|----------------|
//! | Timeline | Rover state | Machine mode | Instrument mode |
//! | StateTemplate | Drive / Idle | Setup / Run | Warmup / Observe |
//! | Resource | Battery | Crane | Downlink bandwidth |
//! | Condition | Needs charge | Needs operator | During daylight |

mod condition;
mod model;
mod plan;
mod problem;

pub use condition::{Condition, DurationBounds, ObjectRef, Relation, MAX_DURATION};
pub use model::{GroundRef, Model, ResourceDef, TimelineDef};
pub(crate) use model::ObjectKey;
pub use plan::{
    Failure, FailureStatus, Plan, PlanTimeline, PlanToken, SolveOutcome, Violation, ViolationType,
};
pub use problem::{GroundToken, Problem, ResourceSpec, StateTemplate, TimelineSpec};
