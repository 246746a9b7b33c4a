//! Backtracking planner.
//!
//! # Algorithm
//!
//! Depth-first plan-space search with chronological backtracking:
//!
//! 1. **Select** the highest-priority flaw of the current state; if none
//!    is left, extract the plan.
//! 2. **Propose**: build the flaw's candidate cursor and push a frame
//!    `(flaw, candidates, mark)`.
//! 3. **Propagate**: undo to the frame's mark, apply the next candidate
//!    and check capacities. On failure try the next candidate; on success
//!    go back to 1.
//! 4. **Backtrack**: a frame with no candidate left is popped and its
//!    parent tries its next candidate. An empty stack means no plan exists.
//!
//! The decision budget and the deadline are checked before every
//! candidate; the deadline also before every flaw selection.
//!
//! # Complexity
//! Exponential in the number of flaws in the worst case; each decision
//! costs O(n²) for the temporal update plus O(r²) for the conflict scan,
//! where n = timepoints, r = reservations on one resource.
//!
//! # Reference
//! Frank & Jónsson (2003), "Constraint-Based Attribute and Interval Planning"

mod config;
mod extract;
mod kpi;
mod state;

pub use config::{GoalOrdering, PlannerConfig, TimeSelection};
pub use extract::extract_plan;
pub use kpi::PlanKpi;
pub use state::{SearchMark, SearchState};

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::error::SolveError;
use crate::models::{Model, Plan, Problem};
use crate::resolver::{self, Candidates, Flaw};

/// One level of the search stack.
#[derive(Debug)]
struct Frame {
    flaw: Flaw,
    candidates: Candidates,
    mark: SearchMark,
}

/// Plans over a loaded model.
///
/// # Example
///
/// ```
/// use u_timeline::models::{Condition, Model, Problem, StateTemplate, TimelineSpec};
/// use u_timeline::planner::{Planner, PlannerConfig};
///
/// let problem = Problem::new()
///     .with_timeline(
///         TimelineSpec::new("Light")
///             .with_name("light")
///             .with_state(StateTemplate::new("On").with_condition(Condition::transition_from("Off")))
///             .with_state(StateTemplate::new("Off").with_condition(Condition::transition_from("On"))),
///     )
///     .with_fact("light", "Off")
///     .with_goal("light", "On");
/// let model = Model::load(&problem).unwrap();
/// let config = PlannerConfig::default();
///
/// let plan = Planner::new(&model, &config).run().unwrap();
/// assert_eq!(plan.timeline("light").unwrap().states(), vec!["Off", "On"]);
/// ```
#[derive(Debug, Clone)]
pub struct Planner<'a> {
    model: &'a Model,
    config: &'a PlannerConfig,
}

impl<'a> Planner<'a> {
    /// Creates a planner.
    pub fn new(model: &'a Model, config: &'a PlannerConfig) -> Self {
        Self { model, config }
    }

    /// Runs the search to a plan or a failure.
    pub fn run(&self) -> Result<Plan, SolveError> {
        let started = Instant::now();
        let mut state = match SearchState::new(self.model, self.config) {
            Ok(state) => state,
            Err(failure) => {
                warn!(%failure, "facts are inconsistent");
                return Err(SolveError::Exhausted {
                    flaws_remaining: vec![failure.to_string()],
                });
            }
        };
        let root_flaws = state.describe_open_flaws();
        info!(
            timelines = self.model.timelines.len(),
            resources = self.model.resources.len(),
            goals = self.model.goals.len(),
            flaws = root_flaws.len(),
            "planning started"
        );

        let mut stack: Vec<Frame> = Vec::new();
        let mut decisions = 0usize;

        loop {
            if self.deadline_passed(started) {
                return Err(self.budget_exhausted(&state, decisions));
            }
            let Some(flaw) = state.next_flaw() else {
                let plan = extract_plan(&state);
                info!(
                    decisions,
                    tokens = plan.token_count(),
                    makespan = plan.makespan(),
                    "plan found"
                );
                return Ok(plan);
            };
            let candidates = resolver::candidates(&flaw, &state);
            debug!(
                flaw = %state.describe(&flaw),
                candidates = candidates.len(),
                depth = stack.len(),
                "flaw selected"
            );
            stack.push(Frame {
                flaw,
                candidates,
                mark: state.mark(),
            });

            loop {
                let depth = stack.len();
                let Some(frame) = stack.last_mut() else {
                    info!(decisions, "search space exhausted");
                    return Err(SolveError::Exhausted {
                        flaws_remaining: root_flaws,
                    });
                };
                if decisions >= self.config.max_decisions || self.deadline_passed(started) {
                    return Err(self.budget_exhausted(&state, decisions));
                }

                state.undo_to(frame.mark);
                let Some(decision) = frame.candidates.next(&state) else {
                    debug!(flaw = %state.describe(&frame.flaw), depth, "backtrack");
                    stack.pop();
                    continue;
                };
                decisions += 1;
                match state.apply(&decision) {
                    Ok(()) => {
                        debug!(%decision, depth, decisions, "decision applied");
                        break;
                    }
                    Err(failure) => trace!(%decision, %failure, "candidate failed"),
                }
            }
        }
    }

    fn deadline_passed(&self, started: Instant) -> bool {
        self.config
            .deadline
            .is_some_and(|deadline| started.elapsed() >= deadline)
    }

    fn budget_exhausted(&self, state: &SearchState<'_>, decisions: usize) -> SolveError {
        let flaws_remaining = state.describe_open_flaws();
        warn!(decisions, open = flaws_remaining.len(), "search budget exhausted");
        SolveError::SearchExhausted {
            decisions,
            flaws_remaining,
        }
    }
}

/// Validates a problem and plans for it.
///
/// # Errors
/// - [`SolveError::Model`] with every validation error of the problem
/// - [`SolveError::Exhausted`] when no plan exists within the limits
/// - [`SolveError::SearchExhausted`] when the budget or deadline ran out
pub fn solve(problem: &Problem, config: &PlannerConfig) -> Result<Plan, SolveError> {
    let model = Model::load(problem).map_err(SolveError::Model)?;
    Planner::new(&model, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Condition, DurationBounds, ObjectRef, PlanToken, ResourceSpec, SolveOutcome,
        StateTemplate, TimelineSpec,
    };
    use crate::validation::validate_plan;

    /// Routes search logs to the test harness; `RUST_LOG=u_timeline=debug`
    /// shows every decision.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    fn light_problem() -> Problem {
        Problem::new()
            .with_timeline(
                TimelineSpec::new("Light")
                    .with_name("light")
                    .with_state(
                        StateTemplate::new("On").with_condition(Condition::transition_from("Off")),
                    )
                    .with_state(
                        StateTemplate::new("Off").with_condition(Condition::transition_from("On")),
                    ),
            )
            .with_fact("light", "Off")
            .with_goal("light", "On")
    }

    fn worker(name: &str) -> TimelineSpec {
        TimelineSpec::new("Worker")
            .with_name(name)
            .with_state(StateTemplate::new("Idle"))
            .with_state(
                StateTemplate::new("Work")
                    .with_duration(DurationBounds::exactly(2))
                    .with_condition(Condition::transition_from("Idle"))
                    .with_condition(Condition::use_resource(ObjectRef::named("Battery_0"), 1)),
            )
    }

    fn battery_problem() -> Problem {
        Problem::new()
            .with_resource(ResourceSpec::new("Battery").with_capacity(1))
            .with_timeline(worker("w1"))
            .with_timeline(worker("w2"))
            .with_fact("w1", "Idle")
            .with_fact("w2", "Idle")
            .with_goal("w1", "Work")
            .with_goal("w2", "Work")
    }

    fn rover_problem(r1_charge: i64) -> Problem {
        let rover = |name: &str| {
            TimelineSpec::new("Rover")
                .with_name(name)
                .with_state(StateTemplate::new("Idle"))
                .with_state(StateTemplate::new("Charge").with_duration(DurationBounds::exactly(r1_charge)))
                .with_state(StateTemplate::new("Drive").with_duration(DurationBounds::at_least(3)))
        };
        Problem::new()
            .with_timeline(
                TimelineSpec::new("Base").with_name("base").with_state(
                    StateTemplate::new("Survey")
                        .with_duration(DurationBounds::exactly(3))
                        .with_condition(Condition::during(ObjectRef::any_of("Rover"), "Drive")),
                ),
            )
            .with_timeline(rover("r1"))
            .with_timeline(rover("r2"))
            .with_timeline(rover("r3"))
            .with_fact("r1", "Charge")
            .with_fact("r2", "Idle")
            .with_fact("r3", "Idle")
            .with_goal("base", "Survey")
    }

    fn assert_valid(problem: &Problem, plan: &Plan) {
        let model = Model::load(problem).unwrap();
        let violations = validate_plan(&model, plan);
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_light_transition() {
        let problem = light_problem();
        let plan = solve(&problem, &PlannerConfig::default()).unwrap();

        let light = plan.timeline("light").unwrap();
        assert_eq!(light.states(), vec!["Off", "On"]);
        assert_eq!(light.tokens[0], PlanToken::new("Off", 0, 1));
        assert_eq!(
            light.tokens[1],
            PlanToken::new("On", 1, 2).with_bindings(vec![ObjectRef::named("light")])
        );
        assert_valid(&problem, &plan);
    }

    #[test]
    fn test_battery_serializes_usage() {
        let problem = battery_problem();
        let plan = solve(&problem, &PlannerConfig::default()).unwrap();

        let w1 = &plan.tokens_of("w1", "Work")[0];
        let w2 = &plan.tokens_of("w2", "Work")[0];
        assert!(!w1.overlaps(w2), "{w1:?} {w2:?}");
        assert_eq!(w1.bindings[1], ObjectRef::named("Battery_0"));
        assert_eq!(plan.makespan(), 5);
        assert_valid(&problem, &plan);
    }

    #[test]
    fn test_battery_tight_horizon_exhausted() {
        init_tracing();
        let config = PlannerConfig::default().with_horizon(4);
        let err = solve(&battery_problem(), &config).unwrap_err();
        match err {
            SolveError::Exhausted { flaws_remaining } => {
                assert_eq!(flaws_remaining, vec!["goal w1.Work", "goal w2.Work"]);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_any_of_class_tries_declared_order() {
        let problem = rover_problem(1);
        let plan = solve(&problem, &PlannerConfig::default()).unwrap();
        let survey = &plan.tokens_of("base", "Survey")[0];
        assert_eq!(survey.bindings, vec![ObjectRef::named("r1")]);
        assert_valid(&problem, &plan);

        let problem = rover_problem(5);
        let config = PlannerConfig::default().with_horizon(6);
        let plan = solve(&problem, &config).unwrap();
        let survey = &plan.tokens_of("base", "Survey")[0];
        assert_eq!(survey.bindings, vec![ObjectRef::named("r2")]);
        assert!(plan.tokens_of("r1", "Drive").is_empty());
        assert_valid(&problem, &plan);
    }

    #[test]
    fn test_synthesizes_open_class_instance() {
        let problem = rover_problem(5).with_open_class("Rover");
        // Every declared rover is busy past the horizon.
        let problem = Problem {
            facts: vec![],
            ..problem
        }
        .with_fact("r1", "Charge")
        .with_fact("r2", "Charge")
        .with_fact("r3", "Charge");
        let config = PlannerConfig::default().with_horizon(6);
        let plan = solve(&problem, &config).unwrap();

        let survey = &plan.tokens_of("base", "Survey")[0];
        // Declared rovers are explicitly named, so the first free index is 0.
        assert_eq!(survey.bindings, vec![ObjectRef::named("Rover_0")]);
        assert_eq!(plan.timeline("Rover_0").unwrap().states(), vec!["Drive"]);
        assert_valid(&problem, &plan);
    }

    #[test]
    fn test_closed_class_exhausted() {
        init_tracing();
        let problem = Problem {
            facts: vec![],
            ..rover_problem(5)
        }
        .with_fact("r1", "Charge")
        .with_fact("r2", "Charge")
        .with_fact("r3", "Charge");
        let config = PlannerConfig::default().with_horizon(6);
        match solve(&problem, &config).unwrap_err() {
            SolveError::Exhausted { flaws_remaining } => {
                assert_eq!(flaws_remaining, vec!["goal base.Survey"]);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_cyclic_transitions_pick_reachable_rover() {
        init_tracing();
        let rover = |name: &str| {
            TimelineSpec::new("Rover")
                .with_name(name)
                .with_state(StateTemplate::new("Idle").with_condition(Condition::transition_from("Drive")))
                .with_state(StateTemplate::new("Drive").with_condition(Condition::transition_from("Idle")))
                .with_state(StateTemplate::new("Charge"))
        };
        let problem = Problem::new()
            .with_timeline(
                TimelineSpec::new("Base").with_name("base").with_state(
                    StateTemplate::new("Survey")
                        .with_condition(Condition::during(ObjectRef::any_of("Rover"), "Drive")),
                ),
            )
            .with_timeline(rover("r1"))
            .with_timeline(rover("r2"))
            .with_fact("r1", "Charge")
            .with_fact("r2", "Idle")
            .with_goal("base", "Survey");
        let config = PlannerConfig::default().with_max_decisions(50);
        let plan = solve(&problem, &config).unwrap();

        let survey = &plan.tokens_of("base", "Survey")[0];
        assert_eq!(survey.bindings, vec![ObjectRef::named("r2")]);
        assert!(plan.tokens_of("r1", "Drive").is_empty());
        assert_eq!(plan.timeline("r2").unwrap().states(), vec!["Idle", "Drive"]);
        assert_valid(&problem, &plan);
    }

    #[test]
    fn test_head_without_predecessor_exhausted() {
        let problem = Problem {
            facts: vec![],
            ..light_problem()
        };
        // Neither state may open the timeline, whatever the budget.
        let config = PlannerConfig::default().with_max_decisions(1_000_000);
        match solve(&problem, &config).unwrap_err() {
            SolveError::Exhausted { flaws_remaining } => {
                assert_eq!(flaws_remaining, vec!["goal light.On"]);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_durations_beyond_limit_rejected() {
        let huge = DurationBounds::exactly(i64::MAX / 2 + 1);
        let problem = Problem::new()
            .with_timeline(
                TimelineSpec::new("Oven")
                    .with_name("oven")
                    .with_state(StateTemplate::new("Heat").with_duration(huge)),
            )
            .with_timeline(
                TimelineSpec::new("Cook").with_name("cook").with_state(
                    StateTemplate::new("Bake")
                        .with_duration(huge)
                        .with_condition(Condition::met_by(ObjectRef::named("oven"), "Heat")),
                ),
            )
            .with_goal("cook", "Bake");
        let err = solve(&problem, &PlannerConfig::default()).unwrap_err();
        assert!(matches!(err, SolveError::Model(ref errors) if errors.len() == 2));
    }

    #[test]
    fn test_deterministic() {
        let problem = battery_problem();
        let config = PlannerConfig::default();
        let a = solve(&problem, &config).unwrap();
        let b = solve(&problem, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_decision_budget() {
        init_tracing();
        let config = PlannerConfig::default().with_max_decisions(1);
        let err = solve(&light_problem(), &config).unwrap_err();
        match &err {
            SolveError::SearchExhausted {
                decisions,
                flaws_remaining,
            } => {
                assert_eq!(*decisions, 1);
                assert_eq!(flaws_remaining, &vec!["light.On#1: transition from Off".to_string()]);
            }
            other => panic!("expected SearchExhausted, got {other:?}"),
        }
        let outcome = SolveOutcome::Failed(err.to_failure().unwrap());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "search_exhausted");
    }

    #[test]
    fn test_model_errors_reported() {
        let problem = light_problem().with_goal("light", "Dim");
        let err = solve(&problem, &PlannerConfig::default()).unwrap_err();
        assert!(matches!(err, SolveError::Model(ref errors) if errors.len() == 1));
    }

    #[test]
    fn test_met_by_across_timelines() {
        let problem = Problem::new()
            .with_timeline(
                TimelineSpec::new("Oven").with_name("oven").with_state(
                    StateTemplate::new("Heat").with_duration(DurationBounds::exactly(4)),
                ),
            )
            .with_timeline(
                TimelineSpec::new("Cook").with_name("cook").with_state(
                    StateTemplate::new("Bake")
                        .with_duration(DurationBounds::exactly(2))
                        .with_condition(Condition::met_by(ObjectRef::named("oven"), "Heat")),
                ),
            )
            .with_goal("cook", "Bake");
        let plan = solve(&problem, &PlannerConfig::default()).unwrap();

        let heat = &plan.tokens_of("oven", "Heat")[0];
        let bake = &plan.tokens_of("cook", "Bake")[0];
        assert_eq!(heat.end, bake.start);
        assert_eq!((bake.start, bake.end), (4, 6));
        assert_valid(&problem, &plan);
    }

    #[test]
    fn test_declaration_goal_ordering() {
        let problem = light_problem().with_goal("light", "Off").with_goal("light", "On");
        let free = solve(&problem, &PlannerConfig::default()).unwrap();
        // Free ordering reuses the fact and the first On token.
        assert_eq!(free.timeline("light").unwrap().states(), vec!["Off", "On"]);

        let config = PlannerConfig::default().with_goal_ordering(GoalOrdering::Declaration);
        let ordered = solve(&problem, &config).unwrap();
        assert_eq!(
            ordered.timeline("light").unwrap().states(),
            vec!["Off", "On", "Off", "On"]
        );
        assert_valid(&problem, &ordered);
    }

    #[test]
    fn test_final_goals_seal_timeline() {
        let problem = light_problem().with_goal("light", "Off");
        let config = PlannerConfig::default().with_final_goals(true);
        // Once On closes the timeline, Off can no longer be last.
        let err = solve(&problem, &config).unwrap_err();
        assert!(matches!(err, SolveError::Exhausted { .. }));

        let plan = solve(&light_problem(), &config).unwrap();
        assert_eq!(plan.timeline("light").unwrap().states(), vec!["Off", "On"]);
    }

    #[test]
    fn test_midpoint_time_selection() {
        let problem = battery_problem();
        let config = PlannerConfig::default()
            .with_horizon(20)
            .with_time_selection(TimeSelection::Midpoint);
        let plan = solve(&problem, &config).unwrap();
        assert_valid(&problem, &plan);
        assert!(plan.makespan() <= 20);
    }

    #[test]
    fn test_solved_plans_validate() {
        for problem in [light_problem(), battery_problem(), rover_problem(2)] {
            let plan = solve(&problem, &PlannerConfig::default()).unwrap();
            assert_valid(&problem, &plan);
            let kpi = PlanKpi::calculate(&plan, &Model::load(&problem).unwrap());
            assert_eq!(kpi.makespan, plan.makespan());
        }
    }
}
