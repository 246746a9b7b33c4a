//! Timeline state graph.
//!
//! Each runtime timeline holds an ordered sequence of tokens. Consecutive
//! tokens are separated by a gap `end(prev) <= start(next)`; a gap becomes
//! *locked* (zero length, closed to insertion) when a `TransitionFrom`
//! condition is resolved across it. Facts open every sequence and are never
//! moved or removed.
//!
//! The graph also records which object supports each condition of each
//! token ([`Support`]), the causal links between tokens, and which token
//! supports each goal. All of it is undone with one trail.
//!
//! # Insertion
//!
//! A position `p` of a sequence of length `n` holding `f` facts is
//! insertable when `f <= p <= n`, the gap at `p` is not locked, and, for
//! `p == n`, the timeline is not sealed behind a final goal.
//!
//! A token of state `s` only goes to a position whose `TransitionFrom`
//! chain can close: either some chain of predecessors, read backwards
//! through `TransitionFrom` sources, reaches a state without such a
//! condition, or it reaches the state of the token already before the gap.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::error::SearchFailure;
use crate::ledger::{ReservationId, ResourceId};
use crate::models::{DurationBounds, Model, StateTemplate};
use crate::temporal::{TemporalNetwork, Timepoint};

/// Handle to a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub(crate) usize);

/// Handle to a runtime timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimelineId(pub(crate) usize);

impl TimelineId {
    /// Index of the timeline; equals its model index for declared timelines.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a token comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Known at plan start; never resolved.
    Fact,
    /// Created by a planning decision.
    Planned,
}

/// What supports one condition of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// A `UseResource` condition, through a reservation.
    Resource {
        resource: ResourceId,
        reservation: ReservationId,
    },
    /// A temporal condition, through a supplier token.
    Token(TokenId),
}

/// A state occurrence on a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Owning timeline.
    pub timeline: TimelineId,
    /// State value.
    pub state: String,
    /// Start timepoint.
    pub start: Timepoint,
    /// End timepoint.
    pub end: Timepoint,
    /// Fact or planned.
    pub origin: TokenOrigin,
    /// One slot per template condition (empty for facts).
    pub supports: Vec<Option<Support>>,
    locked_before: bool,
}

impl Token {
    /// Whether the gap before this token is locked.
    pub fn is_locked_before(&self) -> bool {
        self.locked_before
    }

    /// Index of the first condition without support.
    pub fn first_open_condition(&self) -> Option<usize> {
        self.supports.iter().position(Option::is_none)
    }
}

/// Backward reachability over the `TransitionFrom` conditions of a
/// timeline's states.
#[derive(Debug, Clone, Default, PartialEq)]
struct Reachability {
    /// States that can precede each state, directly or through a chain.
    ancestors: BTreeMap<String, BTreeSet<String>>,
    /// States whose chain can open with a state free of `TransitionFrom`.
    rooted: BTreeSet<String>,
}

impl Reachability {
    fn new(states: &[StateTemplate]) -> Self {
        let mut reach = Self::default();
        for state in states {
            let mut frontier: Vec<&str> = state.transition_sources().collect();
            let mut rooted = frontier.is_empty();
            let mut seen = BTreeSet::new();
            while let Some(value) = frontier.pop() {
                if !seen.insert(value.to_string()) {
                    continue;
                }
                if let Some(source) = states.iter().find(|s| s.name == value) {
                    let before = frontier.len();
                    frontier.extend(source.transition_sources());
                    rooted |= frontier.len() == before;
                }
            }
            if rooted {
                reach.rooted.insert(state.name.clone());
            }
            reach.ancestors.insert(state.name.clone(), seen);
        }
        reach
    }
}

/// A runtime timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    /// Object name.
    pub name: String,
    /// Class; `None` for facts-only timelines.
    pub class: Option<String>,
    /// State templates.
    pub states: Vec<StateTemplate>,
    /// Created during planning rather than declared.
    pub synthesized: bool,
    sequence: Vec<TokenId>,
    facts: usize,
    sealed: bool,
    reach: Reachability,
}

impl Timeline {
    /// The template of a state.
    pub fn state(&self, value: &str) -> Option<&StateTemplate> {
        self.states.iter().find(|s| s.name == value)
    }

    /// Tokens in sequence order.
    pub fn sequence(&self) -> &[TokenId] {
        &self.sequence
    }

    /// Number of leading fact tokens.
    pub fn fact_count(&self) -> usize {
        self.facts
    }

    /// Whether a final goal closed the tail.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Last token of the sequence.
    pub fn tail(&self) -> Option<TokenId> {
        self.sequence.last().copied()
    }

    /// Whether a new token of `state`, placed right after a token in
    /// `previous` (or at the head when `None`), can have its chain of
    /// `TransitionFrom` predecessors closed.
    pub fn can_follow(&self, state: &str, previous: Option<&str>) -> bool {
        self.reach.rooted.contains(state)
            || previous.is_some_and(|p| {
                self.reach
                    .ancestors
                    .get(state)
                    .is_some_and(|ancestors| ancestors.contains(p))
            })
    }
}

/// `consumer.conditions[condition]` is supported by `supplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalLink {
    pub consumer: TokenId,
    pub condition: usize,
    pub supplier: TokenId,
}

/// Position in the undo trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GraphMark(usize);

#[derive(Debug, Clone)]
enum Change {
    NewTimeline,
    NewToken,
    Fact(TimelineId),
    Insert { timeline: TimelineId, position: usize },
    Lock(TokenId),
    Support(TokenId, usize),
    Link,
    GoalSupport(usize),
    Seal(TimelineId),
}

/// Timelines, tokens and supports, with an undo trail.
#[derive(Debug, Clone, Default)]
pub struct TimelineGraph {
    timelines: Vec<Timeline>,
    tokens: Vec<Token>,
    links: Vec<CausalLink>,
    goal_supports: Vec<Option<TokenId>>,
    trail: Vec<Change>,
}

impl TimelineGraph {
    /// Creates an empty graph tracking `goals` goals.
    pub fn new(goals: usize) -> Self {
        Self {
            goal_supports: vec![None; goals],
            ..Self::default()
        }
    }

    /// Creates the graph of a model: every timeline, then every fact.
    pub fn from_model(model: &Model, net: &mut TemporalNetwork) -> Result<Self, SearchFailure> {
        let mut graph = Self::new(model.goals.len());
        for t in &model.timelines {
            graph.add_timeline(t.name.clone(), t.class.clone(), t.states.clone(), false);
        }
        for i in 0..model.timelines.len() {
            for fact in model.facts_on(i) {
                graph.add_fact(net, TimelineId(i), &fact.value)?;
            }
        }
        Ok(graph)
    }

    // ======================================================================
    // Mutation
    // ======================================================================

    /// Adds an empty timeline.
    pub fn add_timeline(
        &mut self,
        name: impl Into<String>,
        class: Option<String>,
        states: Vec<StateTemplate>,
        synthesized: bool,
    ) -> TimelineId {
        self.timelines.push(Timeline {
            name: name.into(),
            class,
            reach: Reachability::new(&states),
            states,
            synthesized,
            sequence: Vec::new(),
            facts: 0,
            sealed: false,
        });
        self.trail.push(Change::NewTimeline);
        TimelineId(self.timelines.len() - 1)
    }

    /// Appends a fact token right after the previous fact (or at time 0).
    ///
    /// Facts are added before any planned token. The duration follows the
    /// state's template when the timeline declares it, `[1, ∞)` otherwise.
    pub fn add_fact(
        &mut self,
        net: &mut TemporalNetwork,
        timeline: TimelineId,
        value: &str,
    ) -> Result<TokenId, SearchFailure> {
        let tl = &self.timelines[timeline.0];
        assert_eq!(
            tl.facts,
            tl.sequence.len(),
            "fact added to {} after planned tokens",
            tl.name
        );
        let duration = tl
            .state(value)
            .map_or_else(DurationBounds::default, |s| s.duration);
        let previous = tl.tail().map(|t| self.tokens[t.0].end);

        let start = net.add_timepoint();
        let end = net.add_timepoint();
        net.add_constraint(start, end, duration.min(), duration.max())?;
        match previous {
            Some(prev_end) => net.add_equality(prev_end, start, 0)?,
            None => net.add_equality(Timepoint::ORIGIN, start, 0)?,
        }

        let id = self.push_token(Token {
            timeline,
            state: value.to_string(),
            start,
            end,
            origin: TokenOrigin::Fact,
            supports: Vec::new(),
            locked_before: previous.is_some(),
        });
        let tl = &mut self.timelines[timeline.0];
        tl.sequence.push(id);
        tl.facts += 1;
        self.trail.push(Change::Fact(timeline));
        Ok(id)
    }

    /// Creates an unplaced token of `state` with its duration constraint.
    pub fn instantiate_token(
        &mut self,
        net: &mut TemporalNetwork,
        timeline: TimelineId,
        state: &str,
    ) -> Result<TokenId, SearchFailure> {
        let tl = &self.timelines[timeline.0];
        let template = tl.state(state).ok_or_else(|| SearchFailure::NoSuchState {
            timeline: tl.name.clone(),
            state: state.to_string(),
        })?;
        let duration = template.duration;
        let conditions = template.conditions.len();

        let start = net.add_timepoint();
        let end = net.add_timepoint();
        net.add_constraint(start, end, duration.min(), duration.max())?;

        Ok(self.push_token(Token {
            timeline,
            state: state.to_string(),
            start,
            end,
            origin: TokenOrigin::Planned,
            supports: vec![None; conditions],
            locked_before: false,
        }))
    }

    fn push_token(&mut self, token: Token) -> TokenId {
        self.tokens.push(token);
        self.trail.push(Change::NewToken);
        TokenId(self.tokens.len() - 1)
    }

    /// Places `token` at `position` of its timeline, ordering it after the
    /// previous token and before the next one.
    ///
    /// # Panics
    /// If the position is not insertable.
    pub fn insert_sequential(
        &mut self,
        net: &mut TemporalNetwork,
        token: TokenId,
        position: usize,
    ) -> Result<(), SearchFailure> {
        let timeline = self.tokens[token.0].timeline;
        assert!(
            self.is_insertable(timeline, position),
            "position {position} of {} is not insertable",
            self.timelines[timeline.0].name
        );
        let seq = &self.timelines[timeline.0].sequence;
        let prev = position.checked_sub(1).map(|p| self.tokens[seq[p].0].end);
        let next = seq.get(position).map(|n| self.tokens[n.0].start);
        let (start, end) = (self.tokens[token.0].start, self.tokens[token.0].end);

        if let Some(prev_end) = prev {
            net.add_precedence(prev_end, start)?;
        }
        if let Some(next_start) = next {
            net.add_precedence(end, next_start)?;
        }
        self.timelines[timeline.0].sequence.insert(position, token);
        self.trail.push(Change::Insert { timeline, position });
        Ok(())
    }

    /// Makes `before` end exactly when `after` starts and locks the gap.
    ///
    /// # Panics
    /// If `before` is not the immediate predecessor of `after`.
    pub fn lock_adjacent(
        &mut self,
        net: &mut TemporalNetwork,
        before: TokenId,
        after: TokenId,
    ) -> Result<(), SearchFailure> {
        assert_eq!(
            self.predecessor(after),
            Some(before),
            "lock between non-adjacent tokens"
        );
        net.add_equality(self.tokens[before.0].end, self.tokens[after.0].start, 0)?;
        if !self.tokens[after.0].locked_before {
            self.tokens[after.0].locked_before = true;
            self.trail.push(Change::Lock(after));
        }
        Ok(())
    }

    /// Records the support of a condition.
    ///
    /// # Panics
    /// If the condition is already supported.
    pub fn set_support(&mut self, token: TokenId, condition: usize, support: Support) {
        let slot = &mut self.tokens[token.0].supports[condition];
        assert!(slot.is_none(), "condition {condition} of {token:?} already supported");
        *slot = Some(support);
        self.trail.push(Change::Support(token, condition));
    }

    /// Records a causal link and the support it provides.
    pub fn link(&mut self, consumer: TokenId, condition: usize, supplier: TokenId) {
        self.set_support(consumer, condition, Support::Token(supplier));
        self.links.push(CausalLink {
            consumer,
            condition,
            supplier,
        });
        self.trail.push(Change::Link);
        trace!(?consumer, condition, ?supplier, "causal link");
    }

    /// Records the token supporting a goal.
    pub fn support_goal(&mut self, goal: usize, token: TokenId) {
        assert!(self.goal_supports[goal].is_none(), "goal {goal} already supported");
        self.goal_supports[goal] = Some(token);
        self.trail.push(Change::GoalSupport(goal));
    }

    /// Closes the tail of a timeline to insertion.
    pub fn seal(&mut self, timeline: TimelineId) {
        let tl = &mut self.timelines[timeline.0];
        if !tl.sealed {
            tl.sealed = true;
            self.trail.push(Change::Seal(timeline));
        }
    }

    // ======================================================================
    // Queries
    // ======================================================================

    /// A timeline by id.
    pub fn timeline(&self, id: TimelineId) -> &Timeline {
        &self.timelines[id.0]
    }

    /// All timelines in creation order.
    pub fn timelines(&self) -> impl Iterator<Item = (TimelineId, &Timeline)> {
        self.timelines
            .iter()
            .enumerate()
            .map(|(i, t)| (TimelineId(i), t))
    }

    /// Finds a timeline by name.
    pub fn find_timeline(&self, name: &str) -> Option<TimelineId> {
        self.timelines
            .iter()
            .position(|t| t.name == name)
            .map(TimelineId)
    }

    /// Timelines of a class: declared first, then synthesized.
    pub fn timelines_of_class<'a>(
        &'a self,
        class: &'a str,
    ) -> impl Iterator<Item = TimelineId> + 'a {
        self.timelines()
            .filter(move |(_, t)| t.class.as_deref() == Some(class))
            .map(|(id, _)| id)
    }

    /// Number of synthesized timelines of a class.
    pub fn synthesized_count(&self, class: &str) -> usize {
        self.timelines
            .iter()
            .filter(|t| t.synthesized && t.class.as_deref() == Some(class))
            .count()
    }

    /// A token by id.
    pub fn token(&self, id: TokenId) -> &Token {
        &self.tokens[id.0]
    }

    /// All tokens in creation order.
    pub fn tokens(&self) -> impl Iterator<Item = (TokenId, &Token)> {
        self.tokens.iter().enumerate().map(|(i, t)| (TokenId(i), t))
    }

    /// Tokens of `state` on a timeline, in creation order.
    pub fn tokens_with_state<'a>(
        &'a self,
        timeline: TimelineId,
        state: &'a str,
    ) -> impl Iterator<Item = TokenId> + 'a {
        self.tokens()
            .filter(move |(_, t)| t.timeline == timeline && t.state == state)
            .map(|(id, _)| id)
    }

    /// The template a token was instantiated from.
    pub fn template(&self, token: TokenId) -> Option<&StateTemplate> {
        let t = &self.tokens[token.0];
        self.timelines[t.timeline.0].state(&t.state)
    }

    /// Position of a token in its timeline's sequence.
    pub fn position_of(&self, token: TokenId) -> Option<usize> {
        let t = &self.tokens[token.0];
        self.timelines[t.timeline.0]
            .sequence
            .iter()
            .position(|&s| s == token)
    }

    /// The token immediately before `token` in its sequence.
    pub fn predecessor(&self, token: TokenId) -> Option<TokenId> {
        let position = self.position_of(token)?;
        let t = &self.tokens[token.0];
        position
            .checked_sub(1)
            .map(|p| self.timelines[t.timeline.0].sequence[p])
    }

    /// Whether a token can be inserted at `position`.
    pub fn is_insertable(&self, timeline: TimelineId, position: usize) -> bool {
        let tl = &self.timelines[timeline.0];
        if position < tl.facts || position > tl.sequence.len() {
            return false;
        }
        match tl.sequence.get(position) {
            Some(next) => !self.tokens[next.0].locked_before,
            None => !tl.sealed,
        }
    }

    /// Whether a new token of `state` can go at `position`: the position
    /// is insertable and the token's predecessor chain can close there.
    pub fn admits_state(&self, timeline: TimelineId, state: &str, position: usize) -> bool {
        if !self.is_insertable(timeline, position) {
            return false;
        }
        let tl = &self.timelines[timeline.0];
        let previous = position
            .checked_sub(1)
            .map(|p| self.tokens[tl.sequence[p].0].state.as_str());
        tl.can_follow(state, previous)
    }

    /// Insertable positions of a timeline, tail first.
    pub fn insertable_positions(&self, timeline: TimelineId) -> Vec<usize> {
        let tl = &self.timelines[timeline.0];
        (tl.facts..=tl.sequence.len())
            .rev()
            .filter(|&p| self.is_insertable(timeline, p))
            .collect()
    }

    /// The token supporting a goal.
    pub fn goal_support(&self, goal: usize) -> Option<TokenId> {
        self.goal_supports[goal]
    }

    /// Causal links in creation order.
    pub fn links(&self) -> &[CausalLink] {
        &self.links
    }

    // ======================================================================
    // Trail
    // ======================================================================

    /// Current trail position.
    pub fn mark(&self) -> GraphMark {
        GraphMark(self.trail.len())
    }

    /// Undoes every change recorded after `mark`.
    ///
    /// # Panics
    /// If `mark` lies beyond the current trail.
    pub fn undo_to(&mut self, mark: GraphMark) {
        assert!(
            mark.0 <= self.trail.len(),
            "graph trail underflow: mark {} > len {}",
            mark.0,
            self.trail.len()
        );
        while self.trail.len() > mark.0 {
            match self.trail.pop() {
                Some(Change::NewTimeline) => {
                    self.timelines.pop();
                }
                Some(Change::NewToken) => {
                    self.tokens.pop();
                }
                Some(Change::Fact(timeline)) => {
                    let tl = &mut self.timelines[timeline.0];
                    tl.sequence.pop();
                    tl.facts -= 1;
                }
                Some(Change::Insert { timeline, position }) => {
                    self.timelines[timeline.0].sequence.remove(position);
                }
                Some(Change::Lock(token)) => self.tokens[token.0].locked_before = false,
                Some(Change::Support(token, condition)) => {
                    self.tokens[token.0].supports[condition] = None;
                }
                Some(Change::Link) => {
                    self.links.pop();
                }
                Some(Change::GoalSupport(goal)) => self.goal_supports[goal] = None,
                Some(Change::Seal(timeline)) => self.timelines[timeline.0].sealed = false,
                None => unreachable!(),
            }
        }
    }
}
