//! Causal link resolver.
//!
//! Turns a [`Flaw`] of the current search state into a [`Candidates`]
//! cursor: the finite, deterministically ordered list of decisions that
//! could repair it. The list is built from the state the flaw was selected
//! in; the temporal feasibility of each entry is checked only when the
//! cursor reaches it, so a frame whose first candidate succeeds never pays
//! for the rest.
//!
//! # Candidate order
//!
//! | Flaw | Candidates |
//! |------|------------|
//! | Open goal | existing tokens of the value, then a new token per insertable position (tail first) |
//! | `UseResource` | matching resources (declared, then synthesized), then a new instance for an open class |
//! | `TransitionFrom` | the predecessor (adjacency lock), then a new predecessor |
//! | `MetBy` / `During` | existing tokens, then a new token per timeline and position, then a new instance for an open class |
//! | Resource conflict | per pair that can still overlap, `a` before `b` then `b` before `a` |
//!
//! A new token is only proposed where its `TransitionFrom` chain can close
//! (see [`TimelineGraph::admits_state`](crate::timeline::TimelineGraph::admits_state)).
//!
//! # Reference
//! Ghallab, Nau & Traverso (2004), "Automated Planning: Theory and
//! Practice", Ch. 14 (plan-space search over flaws and resolvers)

use std::fmt;

use tracing::trace;

use crate::ledger::{can_overlap, ReservationId, ResourceId};
use crate::models::{Condition, ObjectRef, Relation};
use crate::planner::{GoalOrdering, SearchState};
use crate::timeline::{TimelineId, TokenId};

/// A defect of a partial plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flaw {
    /// Goal (by declaration index) with no supporting token.
    OpenGoal { goal: usize },
    /// Condition of a token with no support.
    OpenCondition { token: TokenId, condition: usize },
    /// Reservations that may overload a resource.
    ResourceConflict {
        resource: ResourceId,
        members: Vec<ReservationId>,
    },
}

/// One way of repairing a flaw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let an existing token support the goal.
    SupportGoal { goal: usize, token: TokenId },
    /// Create a goal token at `position` of the goal's timeline.
    InsertGoalToken { goal: usize, position: usize },
    /// Reserve an existing resource.
    Reserve {
        token: TokenId,
        condition: usize,
        resource: ResourceId,
        amount: u32,
    },
    /// Synthesize a resource of `class` and reserve it.
    CreateResource {
        token: TokenId,
        condition: usize,
        class: String,
        amount: u32,
    },
    /// Link the condition to an existing supplier token.
    Link {
        token: TokenId,
        condition: usize,
        supplier: TokenId,
        relation: Relation,
    },
    /// Create a supplier token at `position` of `timeline` and link it.
    InsertSupplier {
        token: TokenId,
        condition: usize,
        timeline: TimelineId,
        state: String,
        position: usize,
        relation: Relation,
    },
    /// Synthesize a timeline of `class` holding a new supplier token.
    CreateTimeline {
        token: TokenId,
        condition: usize,
        class: String,
        state: String,
        relation: Relation,
    },
    /// Order reservation `before` to end before `after` starts.
    Order {
        before: ReservationId,
        after: ReservationId,
    },
}

/// Restartable cursor over the decisions repairing one flaw.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    decisions: Vec<Decision>,
    cursor: usize,
}

impl Candidates {
    /// The next decision that is still feasible in `state`.
    pub(crate) fn next(&mut self, state: &SearchState<'_>) -> Option<Decision> {
        while let Some(decision) = self.decisions.get(self.cursor) {
            self.cursor += 1;
            if state.admits(decision) {
                return Some(decision.clone());
            }
            trace!(?decision, "candidate infeasible");
        }
        None
    }

    /// Rewinds to the first candidate.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Total number of candidates, feasible or not.
    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    /// Whether no candidate exists.
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Remaining unvisited candidates.
    pub fn remaining(&self) -> &[Decision] {
        &self.decisions[self.cursor..]
    }
}

/// Builds the candidate cursor of a flaw.
pub(crate) fn candidates(flaw: &Flaw, state: &SearchState<'_>) -> Candidates {
    let decisions = match flaw {
        Flaw::OpenGoal { goal } => goal_candidates(*goal, state),
        Flaw::OpenCondition { token, condition } => condition_candidates(*token, *condition, state),
        Flaw::ResourceConflict { members, .. } => order_candidates(members, state),
    };
    Candidates {
        decisions,
        cursor: 0,
    }
}

fn order_candidates(members: &[ReservationId], state: &SearchState<'_>) -> Vec<Decision> {
    let overlapping = |a: ReservationId, b: ReservationId| {
        match (state.ledger.reservation(a), state.ledger.reservation(b)) {
            (Some(ra), Some(rb)) => can_overlap(&state.net, ra, rb),
            _ => false,
        }
    };
    let mut decisions = Vec::new();
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            if overlapping(a, b) {
                decisions.push(Decision::Order { before: a, after: b });
                decisions.push(Decision::Order { before: b, after: a });
            }
        }
    }
    decisions
}

fn goal_candidates(goal: usize, state: &SearchState<'_>) -> Vec<Decision> {
    let graph = &state.graph;
    let ground = &state.model.goals[goal];
    let timeline = TimelineId(ground.timeline);
    let tl = graph.timeline(timeline);

    // With declaration ordering, earlier goals of the same timeline fix a
    // lower bound on the position of this goal's token.
    let floor = match state.config.goal_ordering {
        GoalOrdering::Free => None,
        GoalOrdering::Declaration => state.model.goals[..goal]
            .iter()
            .enumerate()
            .filter(|(_, g)| g.timeline == ground.timeline)
            .filter_map(|(i, _)| graph.goal_support(i))
            .filter_map(|t| graph.position_of(t))
            .max(),
    };
    let after_floor = |position: usize| floor.map_or(true, |f| position > f);
    let len = tl.sequence().len();
    let final_goals = state.config.final_goals;

    let mut decisions: Vec<Decision> = graph
        .tokens_with_state(timeline, &ground.value)
        .filter(|&t| graph.position_of(t).is_some_and(after_floor))
        .filter(|&t| !final_goals || tl.tail() == Some(t))
        .map(|token| Decision::SupportGoal { goal, token })
        .collect();

    decisions.extend(
        graph
            .insertable_positions(timeline)
            .into_iter()
            .filter(|&p| after_floor(p))
            .filter(|&p| !final_goals || p == len)
            .filter(|&p| graph.admits_state(timeline, &ground.value, p))
            .map(|position| Decision::InsertGoalToken { goal, position }),
    );
    decisions
}

fn condition_candidates(token: TokenId, condition: usize, state: &SearchState<'_>) -> Vec<Decision> {
    let graph = &state.graph;
    let Some(template) = graph.template(token) else {
        return Vec::new();
    };
    let Some(cond) = template.conditions.get(condition) else {
        return Vec::new();
    };

    match cond {
        Condition::UseResource(target, amount) => {
            resource_candidates(token, condition, target, *amount, state)
        }
        Condition::TransitionFrom(value) => {
            let mut decisions = Vec::new();
            let consumer = graph.token(token);
            if let Some(pred) = graph.predecessor(token) {
                if graph.token(pred).state == *value && !consumer.is_locked_before() {
                    decisions.push(Decision::Link {
                        token,
                        condition,
                        supplier: pred,
                        relation: Relation::Adjacent,
                    });
                }
            }
            let timeline = consumer.timeline;
            if let Some(position) = graph.position_of(token) {
                if graph.admits_state(timeline, value, position) {
                    decisions.push(Decision::InsertSupplier {
                        token,
                        condition,
                        timeline,
                        state: value.clone(),
                        position,
                        relation: Relation::Adjacent,
                    });
                }
            }
            decisions
        }
        Condition::MetBy(target, value) | Condition::During(target, value) => match cond.relation() {
            Some(relation) => supplier_candidates(token, condition, target, value, relation, state),
            None => Vec::new(),
        },
    }
}

fn resource_candidates(
    token: TokenId,
    condition: usize,
    target: &ObjectRef,
    amount: u32,
    state: &SearchState<'_>,
) -> Vec<Decision> {
    let ledger = &state.ledger;
    let matching: Vec<ResourceId> = match target {
        ObjectRef::Named(name) => ledger.find(name).into_iter().collect(),
        ObjectRef::AnyOfClass(class) => ledger.resources_of_class(class).collect(),
    };
    let mut decisions: Vec<Decision> = matching
        .into_iter()
        .filter(|&r| ledger.resource(r).can_hold(amount))
        .map(|resource| Decision::Reserve {
            token,
            condition,
            resource,
            amount,
        })
        .collect();

    if let ObjectRef::AnyOfClass(class) = target {
        let template_fits = state
            .model
            .resources_of_class(class)
            .next()
            .is_some_and(|i| state.model.resources[i].capacity.map_or(true, |c| amount <= c));
        if template_fits && state.may_synthesize(class, ledger.synthesized_count(class)) {
            decisions.push(Decision::CreateResource {
                token,
                condition,
                class: class.clone(),
                amount,
            });
        }
    }
    decisions
}

fn supplier_candidates(
    token: TokenId,
    condition: usize,
    target: &ObjectRef,
    value: &str,
    relation: Relation,
    state: &SearchState<'_>,
) -> Vec<Decision> {
    let graph = &state.graph;
    let timelines: Vec<TimelineId> = match target {
        ObjectRef::Named(name) => graph.find_timeline(name).into_iter().collect(),
        ObjectRef::AnyOfClass(class) => graph.timelines_of_class(class).collect(),
    };

    let mut decisions: Vec<Decision> = timelines
        .iter()
        .flat_map(|&tl| graph.tokens_with_state(tl, value))
        .filter(|&supplier| supplier != token && graph.position_of(supplier).is_some())
        .map(|supplier| Decision::Link {
            token,
            condition,
            supplier,
            relation,
        })
        .collect();

    for &timeline in &timelines {
        if graph.timeline(timeline).state(value).is_none() {
            continue;
        }
        decisions.extend(
            graph
                .insertable_positions(timeline)
                .into_iter()
                .filter(|&p| graph.admits_state(timeline, value, p))
                .map(|position| Decision::InsertSupplier {
                    token,
                    condition,
                    timeline,
                    state: value.to_string(),
                    position,
                    relation,
                }),
        );
    }

    if let ObjectRef::AnyOfClass(class) = target {
        // A synthesized timeline starts empty, so the new token opens it.
        let opens_timeline = state
            .model
            .timelines_of_class(class)
            .next()
            .is_some_and(|i| graph.timeline(TimelineId(i)).can_follow(value, None));
        if opens_timeline && state.may_synthesize(class, graph.synthesized_count(class)) {
            decisions.push(Decision::CreateTimeline {
                token,
                condition,
                class: class.clone(),
                state: value.to_string(),
                relation,
            });
        }
    }
    decisions
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::SupportGoal { goal, token } => write!(f, "goal {goal} <- {token:?}"),
            Decision::InsertGoalToken { goal, position } => {
                write!(f, "goal {goal} <- new token at {position}")
            }
            Decision::Reserve {
                token, resource, ..
            } => write!(f, "{token:?} reserves {resource:?}"),
            Decision::CreateResource { token, class, .. } => {
                write!(f, "{token:?} reserves new {class}")
            }
            Decision::Link {
                token,
                supplier,
                relation,
                ..
            } => write!(f, "{token:?} {relation:?} {supplier:?}"),
            Decision::InsertSupplier {
                token,
                timeline,
                state,
                position,
                relation,
                ..
            } => write!(
                f,
                "{token:?} {relation:?} new {state} on {timeline:?} at {position}"
            ),
            Decision::CreateTimeline {
                token,
                class,
                state,
                relation,
                ..
            } => write!(f, "{token:?} {relation:?} new {class} in {state}"),
            Decision::Order { before, after } => write!(f, "{before:?} before {after:?}"),
        }
    }
}
