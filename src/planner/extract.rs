//! Plan extraction.
//!
//! Reads a solved [`SearchState`] into a [`Plan`] without modifying it.
//! Times come from [`SearchState::projection`], the same assignment the
//! resource conflict check was run against.

use crate::models::{ObjectRef, Plan, PlanTimeline, PlanToken};
use crate::timeline::{Support, Token};

use super::SearchState;

/// Builds the plan of a flawless state.
///
/// Timelines appear in creation order (declared, facts-only, then
/// synthesized), tokens in sequence order.
pub fn extract_plan(state: &SearchState<'_>) -> Plan {
    let times = state.projection();
    let timelines = state
        .graph
        .timelines()
        .map(|(_, tl)| PlanTimeline {
            name: tl.name.clone(),
            tokens: tl
                .sequence()
                .iter()
                .map(|&id| {
                    let token = state.graph.token(id);
                    PlanToken::new(
                        token.state.clone(),
                        times[token.start.index()],
                        times[token.end.index()],
                    )
                    .with_bindings(bindings(state, token))
                })
                .collect(),
        })
        .collect();
    Plan { timelines }
}

/// Resolved objects of a token's conditions, in condition order.
fn bindings(state: &SearchState<'_>, token: &Token) -> Vec<ObjectRef> {
    token
        .supports
        .iter()
        .flatten()
        .map(|support| match *support {
            Support::Resource { resource, .. } => {
                ObjectRef::Named(state.ledger.resource(resource).name.clone())
            }
            Support::Token(supplier) => {
                let timeline = state.graph.token(supplier).timeline;
                ObjectRef::Named(state.graph.timeline(timeline).name.clone())
            }
        })
        .collect()
}
