//! Error taxonomy.
//!
//! [`SearchFailure`] is raised by the engine components while a candidate
//! decision is applied; the planner recovers from it by backtracking.
//! [`SolveError`] is what [`solve`](crate::solve) hands back to the caller.

use thiserror::Error;

use crate::models::{Failure, FailureStatus};
use crate::temporal::InconsistentNetwork;
use crate::validation::ValidationError;

/// A dead end met while applying a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchFailure {
    /// A temporal constraint closed a negative cycle.
    #[error(transparent)]
    InconsistentNetwork(#[from] InconsistentNetwork),

    /// Reservations on a resource cannot fit under its capacity.
    #[error("capacity of {resource} exceeded: {usage} > {capacity}")]
    CapacityExceeded {
        resource: String,
        usage: u64,
        capacity: u32,
    },

    /// The timeline has no template for the requested state.
    #[error("timeline {timeline} has no state {state}")]
    NoSuchState { timeline: String, state: String },

    /// No candidate remains for a flaw.
    #[error("no candidate resolves {flaw}")]
    Unresolvable { flaw: String },
}

/// Why [`solve`](crate::solve) produced no plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    /// The problem failed validation; nothing was searched.
    #[error("invalid problem: {} error(s), first: {}", .0.len(), first_message(.0))]
    Model(Vec<ValidationError>),

    /// Every alternative was tried; no plan exists within the limits.
    #[error("search space exhausted ({} flaw(s) open)", .flaws_remaining.len())]
    Exhausted { flaws_remaining: Vec<String> },

    /// The decision budget or deadline ran out first.
    #[error("search budget exhausted after {decisions} decisions")]
    SearchExhausted {
        decisions: usize,
        flaws_remaining: Vec<String>,
    },
}

fn first_message(errors: &[ValidationError]) -> &str {
    errors.first().map_or("", |e| e.message.as_str())
}

impl SolveError {
    /// The output-schema failure record, for search failures.
    ///
    /// Model errors have no counterpart in the output schema.
    pub fn to_failure(&self) -> Option<Failure> {
        match self {
            SolveError::Model(_) => None,
            SolveError::Exhausted { flaws_remaining } => Some(Failure {
                status: FailureStatus::Exhausted,
                flaws_remaining: flaws_remaining.clone(),
            }),
            SolveError::SearchExhausted {
                flaws_remaining, ..
            } => Some(Failure {
                status: FailureStatus::SearchExhausted,
                flaws_remaining: flaws_remaining.clone(),
            }),
        }
    }

    /// Open flaws at the point the search stopped.
    pub fn flaws_remaining(&self) -> &[String] {
        match self {
            SolveError::Model(_) => &[],
            SolveError::Exhausted { flaws_remaining }
            | SolveError::SearchExhausted {
                flaws_remaining, ..
            } => flaws_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::Timepoint;
    use crate::validation::ValidationErrorKind;

    #[test]
    fn test_failure_records() {
        let err = SolveError::Exhausted {
            flaws_remaining: vec!["goal light.On".into()],
        };
        let failure = err.to_failure().unwrap();
        assert_eq!(failure.status, FailureStatus::Exhausted);
        assert_eq!(err.flaws_remaining(), ["goal light.On".to_string()]);

        let err = SolveError::SearchExhausted {
            decisions: 10,
            flaws_remaining: vec![],
        };
        assert_eq!(err.to_failure().unwrap().status, FailureStatus::SearchExhausted);
        assert!(err.to_string().contains("10 decisions"));
    }

    #[test]
    fn test_model_error_message() {
        let err = SolveError::Model(vec![ValidationError::new(
            ValidationErrorKind::UnknownState,
            "fact light.Dim: unknown state",
        )]);
        assert!(err.to_failure().is_none());
        assert_eq!(
            err.to_string(),
            "invalid problem: 1 error(s), first: fact light.Dim: unknown state"
        );
    }

    #[test]
    fn test_search_failure_from_network() {
        let inconsistent = InconsistentNetwork {
            from: Timepoint::ORIGIN,
            to: Timepoint::ORIGIN,
            lo: 1,
            hi: Some(0),
        };
        let failure: SearchFailure = inconsistent.into();
        assert!(matches!(failure, SearchFailure::InconsistentNetwork(_)));
    }
}
