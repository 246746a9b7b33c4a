//! Timeline-based temporal planning and scheduling core.
//!
//! Consumes a declarative problem (timelines with state templates,
//! capacity-bounded resources, facts, goals) and produces a plan: concrete
//! start/end times for every state token, with every condition bound to the
//! object that supports it. When no plan exists within the configured
//! bounds the search says so, and distinguishes a proven dead end from a
//! spent budget.
//!
//! # Modules
//!
//! - **`models`**: Input schema (`Problem`), validated `Model`, output `Plan`
//! - **`validation`**: Problem loading, model errors, plan verification
//! - **`temporal`**: Simple temporal network in minimal form, with undo
//! - **`ledger`**: Resource reservations, capacity checks, conflict detection
//! - **`timeline`**: Token sequences, adjacency locks, causal links
//! - **`resolver`**: Flaws and their ordered repair candidates
//! - **`planner`**: Backtracking search, plan extraction, configuration, KPIs
//! - **`error`**: Search and solve error taxonomy
//!
//! # Example
//!
//! ```
//! use u_timeline::models::{Condition, Problem, StateTemplate, TimelineSpec};
//! use u_timeline::{solve, PlannerConfig};
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
//!
//! let plan = solve(&problem, &PlannerConfig::default()).unwrap();
//! let on = &plan.tokens_of("light", "On")[0];
//! assert_eq!((on.start, on.end), (1, 2));
//! ```
//!
//! # References
//!
//! - Dechter, Meiri & Pearl (1991), "Temporal Constraint Networks"
//! - Frank & Jónsson (2003), "Constraint-Based Attribute and Interval Planning"
//! - Ghallab, Nau & Traverso (2016), "Automated Planning and Acting"

pub mod error;
pub mod ledger;
pub mod models;
pub mod planner;
pub mod resolver;
pub mod temporal;
pub mod timeline;
pub mod validation;

pub use error::{SearchFailure, SolveError};
pub use planner::{solve, PlannerConfig};
