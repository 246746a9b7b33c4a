//! Search state: the three trailed components plus the flaw agenda.

use tracing::trace;

use crate::error::SearchFailure;
use crate::ledger::{LedgerMark, ReservationId, ResourceId, ResourceLedger};
use crate::models::{Model, Relation};
use crate::resolver::{Decision, Flaw};
use crate::temporal::{NetworkMark, TemporalNetwork};
use crate::timeline::{GraphMark, Support, TimelineGraph, TimelineId, TokenId};

use super::{PlannerConfig, TimeSelection};

/// Trail positions of all three components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMark {
    net: NetworkMark,
    ledger: LedgerMark,
    graph: GraphMark,
}

/// Everything a partial plan consists of.
#[derive(Debug, Clone)]
pub struct SearchState<'a> {
    pub(crate) model: &'a Model,
    pub(crate) config: &'a PlannerConfig,
    pub(crate) net: TemporalNetwork,
    pub(crate) ledger: ResourceLedger,
    pub(crate) graph: TimelineGraph,
}

impl<'a> SearchState<'a> {
    /// Initial state: declared resources and timelines, facts placed.
    pub fn new(model: &'a Model, config: &'a PlannerConfig) -> Result<Self, SearchFailure> {
        let mut net = match config.horizon {
            Some(h) => TemporalNetwork::with_horizon(h),
            None => TemporalNetwork::new(),
        };
        let mut ledger = ResourceLedger::new();
        for r in &model.resources {
            ledger.add_resource(r.name.clone(), r.class.clone(), r.capacity, false);
        }
        let graph = TimelineGraph::from_model(model, &mut net)?;
        Ok(Self {
            model,
            config,
            net,
            ledger,
            graph,
        })
    }

    /// The temporal network.
    pub fn network(&self) -> &TemporalNetwork {
        &self.net
    }

    /// The resource ledger.
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// The timeline graph.
    pub fn graph(&self) -> &TimelineGraph {
        &self.graph
    }

    /// Current trail positions.
    pub fn mark(&self) -> SearchMark {
        SearchMark {
            net: self.net.mark(),
            ledger: self.ledger.mark(),
            graph: self.graph.mark(),
        }
    }

    /// Restores the state recorded by `mark`.
    pub fn undo_to(&mut self, mark: SearchMark) {
        self.graph.undo_to(mark.graph);
        self.ledger.undo_to(mark.ledger);
        self.net.undo_to(mark.net);
    }

    /// One time per timepoint, as plan extraction will choose them.
    pub fn projection(&self) -> Vec<i64> {
        match self.config.time_selection {
            TimeSelection::Earliest => self.net.earliest_schedule(),
            TimeSelection::Midpoint => self.net.midpoint_schedule(),
        }
    }

    /// Whether another instance of `class` may be synthesized.
    pub(crate) fn may_synthesize(&self, class: &str, already: usize) -> bool {
        self.model.is_open(class) && already < self.config.max_synthesized_per_class
    }

    // ======================================================================
    // Flaws
    // ======================================================================

    /// The highest-priority flaw, if any.
    ///
    /// Open goals (declaration order) come first, then open conditions
    /// (token creation order, then condition order), then resource
    /// conflicts (resource order).
    pub fn next_flaw(&self) -> Option<Flaw> {
        self.open_goals()
            .chain(self.open_conditions())
            .next()
            .or_else(|| self.conflicts().into_iter().next())
    }

    /// Every open flaw, in priority order.
    pub fn open_flaws(&self) -> Vec<Flaw> {
        self.open_goals()
            .chain(self.open_conditions())
            .chain(self.conflicts())
            .collect()
    }

    fn open_goals(&self) -> impl Iterator<Item = Flaw> + '_ {
        (0..self.model.goals.len())
            .filter(|&g| self.graph.goal_support(g).is_none())
            .map(|goal| Flaw::OpenGoal { goal })
    }

    fn open_conditions(&self) -> impl Iterator<Item = Flaw> + '_ {
        self.graph.tokens().flat_map(|(token, t)| {
            t.supports
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_none())
                .map(move |(condition, _)| Flaw::OpenCondition { token, condition })
        })
    }

    fn conflicts(&self) -> Vec<Flaw> {
        self.ledger
            .conflicts(&self.net, &self.projection())
            .into_iter()
            .map(|c| Flaw::ResourceConflict {
                resource: c.resource,
                members: c.members,
            })
            .collect()
    }

    /// Human-readable flaw description.
    pub fn describe(&self, flaw: &Flaw) -> String {
        match flaw {
            Flaw::OpenGoal { goal } => {
                let g = &self.model.goals[*goal];
                format!("goal {}.{}", self.model.timelines[g.timeline].name, g.value)
            }
            Flaw::OpenCondition { token, condition } => {
                let t = self.graph.token(*token);
                let what = self
                    .graph
                    .template(*token)
                    .and_then(|s| s.conditions.get(*condition))
                    .map_or_else(|| format!("condition {condition}"), |c| c.to_string());
                format!(
                    "{}.{}#{}: {}",
                    self.graph.timeline(t.timeline).name,
                    t.state,
                    token.0,
                    what
                )
            }
            Flaw::ResourceConflict { resource, members } => format!(
                "conflict on {}: {} reservations",
                self.ledger.resource(*resource).name,
                members.len()
            ),
        }
    }

    /// Descriptions of every open flaw.
    pub fn describe_open_flaws(&self) -> Vec<String> {
        self.open_flaws().iter().map(|f| self.describe(f)).collect()
    }

    // ======================================================================
    // Decisions
    // ======================================================================

    /// Non-mutating temporal check of a decision.
    pub(crate) fn admits(&self, decision: &Decision) -> bool {
        match decision {
            Decision::Link {
                token,
                supplier,
                relation,
                ..
            } => {
                let consumer = self.graph.token(*token);
                let sup = self.graph.token(*supplier);
                match relation {
                    Relation::Adjacent => {
                        self.graph.predecessor(*token) == Some(*supplier)
                            && self.net.admits(sup.end, consumer.start, 0, Some(0))
                    }
                    Relation::MetBy => self.net.admits(sup.end, consumer.start, 0, Some(0)),
                    Relation::During => {
                        self.net.admits(sup.start, consumer.start, 0, None)
                            && self.net.admits(consumer.end, sup.end, 0, None)
                    }
                }
            }
            Decision::Order { before, after } => {
                match (self.ledger.reservation(*before), self.ledger.reservation(*after)) {
                    (Some(b), Some(a)) => self.net.admits(b.end, a.start, 0, None),
                    _ => false,
                }
            }
            _ => true,
        }
    }

    /// Applies a decision, checks capacities, and commits its reservations.
    ///
    /// On failure the state is partially modified; the caller undoes to its
    /// mark.
    pub fn apply(&mut self, decision: &Decision) -> Result<(), SearchFailure> {
        let mut reserved = Vec::new();
        match decision {
            Decision::SupportGoal { goal, token } => {
                self.graph.support_goal(*goal, *token);
                self.seal_goal_timeline(*goal);
            }
            Decision::InsertGoalToken { goal, position } => {
                let ground = &self.model.goals[*goal];
                let timeline = TimelineId(ground.timeline);
                let token = self
                    .graph
                    .instantiate_token(&mut self.net, timeline, &ground.value)?;
                self.graph.insert_sequential(&mut self.net, token, *position)?;
                self.graph.support_goal(*goal, token);
                self.seal_goal_timeline(*goal);
            }
            Decision::Reserve {
                token,
                condition,
                resource,
                amount,
            } => reserved.push(self.reserve(*token, *condition, *resource, *amount)),
            Decision::CreateResource {
                token,
                condition,
                class,
                amount,
            } => {
                let capacity = self
                    .model
                    .resources_of_class(class)
                    .next()
                    .and_then(|i| self.model.resources[i].capacity);
                let name = self.fresh_name(class);
                trace!(%name, ?capacity, "synthesized resource");
                let resource = self.ledger.add_resource(name, class.clone(), capacity, true);
                reserved.push(self.reserve(*token, *condition, resource, *amount));
            }
            Decision::Link {
                token,
                condition,
                supplier,
                relation,
            } => self.link(*token, *condition, *supplier, *relation)?,
            Decision::InsertSupplier {
                token,
                condition,
                timeline,
                state,
                position,
                relation,
            } => {
                let supplier = self.graph.instantiate_token(&mut self.net, *timeline, state)?;
                self.graph.insert_sequential(&mut self.net, supplier, *position)?;
                self.link(*token, *condition, supplier, *relation)?;
            }
            Decision::CreateTimeline {
                token,
                condition,
                class,
                state,
                relation,
            } => {
                let states = self
                    .model
                    .timelines_of_class(class)
                    .next()
                    .map(|i| self.model.timelines[i].states.clone())
                    .unwrap_or_default();
                let name = self.fresh_name(class);
                trace!(%name, "synthesized timeline");
                let timeline = self.graph.add_timeline(name, Some(class.clone()), states, true);
                let supplier = self.graph.instantiate_token(&mut self.net, timeline, state)?;
                self.graph.insert_sequential(&mut self.net, supplier, 0)?;
                self.link(*token, *condition, supplier, *relation)?;
            }
            Decision::Order { before, after } => {
                let (Some(b), Some(a)) = (
                    self.ledger.reservation(*before),
                    self.ledger.reservation(*after),
                ) else {
                    return Err(SearchFailure::Unresolvable {
                        flaw: format!("order {before:?} before {after:?}"),
                    });
                };
                let (b_end, a_start) = (b.end, a.start);
                self.net.add_precedence(b_end, a_start)?;
            }
        }

        self.ledger.check_capacity(&self.net)?;
        for id in reserved {
            self.ledger.commit(id);
        }
        Ok(())
    }

    fn reserve(
        &mut self,
        token: TokenId,
        condition: usize,
        resource: ResourceId,
        amount: u32,
    ) -> ReservationId {
        let t = self.graph.token(token);
        let (start, end) = (t.start, t.end);
        let reservation = self.ledger.reserve(resource, token, start, end, amount);
        self.graph.set_support(
            token,
            condition,
            Support::Resource {
                resource,
                reservation,
            },
        );
        reservation
    }

    fn link(
        &mut self,
        consumer: TokenId,
        condition: usize,
        supplier: TokenId,
        relation: Relation,
    ) -> Result<(), SearchFailure> {
        let (c_start, c_end) = {
            let c = self.graph.token(consumer);
            (c.start, c.end)
        };
        let (s_start, s_end) = {
            let s = self.graph.token(supplier);
            (s.start, s.end)
        };
        match relation {
            Relation::Adjacent => self.graph.lock_adjacent(&mut self.net, supplier, consumer)?,
            Relation::MetBy => self.net.add_equality(s_end, c_start, 0)?,
            Relation::During => {
                self.net.add_precedence(s_start, c_start)?;
                self.net.add_precedence(c_end, s_end)?;
            }
        }
        self.graph.link(consumer, condition, supplier);
        Ok(())
    }

    fn seal_goal_timeline(&mut self, goal: usize) {
        if self.config.final_goals {
            self.graph.seal(TimelineId(self.model.goals[goal].timeline));
        }
    }

    /// `{class}_{n}` with the smallest `n` not naming any object.
    fn fresh_name(&self, class: &str) -> String {
        (0usize..)
            .map(|n| format!("{class}_{n}"))
            .find(|name| {
                !self.model.has_object(name)
                    && self.graph.find_timeline(name).is_none()
                    && self.ledger.find(name).is_none()
            })
            .unwrap_or_else(|| format!("{class}_new"))
    }
}
