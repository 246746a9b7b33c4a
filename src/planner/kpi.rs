//! Plan quality metrics (KPIs).
//!
//! Computes summary indicators from a finished plan and its model.
//!
//! # Metrics
//!
//! | Metric | Definition |
//! |--------|-----------|
//! | Makespan | Latest token end |
//! | Token count | Tokens across all timelines |
//! | Peak usage | Largest summed amount on a resource at one instant |
//! | Utilization | Σ(amount × duration) / (capacity × makespan), bounded resources only |
//!
//! # Reference
//! Pinedo (2016), "Scheduling", Ch. 1.2: Performance Measures

use std::collections::HashMap;

use crate::ledger::peak_at_starts;
use crate::models::{Condition, Model, ObjectRef, Plan};
use crate::validation::{resource_template, timeline_template};

/// Plan performance indicators.
#[derive(Debug, Clone)]
pub struct PlanKpi {
    /// Latest token end.
    pub makespan: i64,
    /// Number of tokens, facts included.
    pub token_count: usize,
    /// Peak simultaneous usage per resource name.
    pub peak_usage_by_resource: HashMap<String, u64>,
    /// Utilization per capacity-bounded resource (0.0..1.0).
    pub utilization_by_resource: HashMap<String, f64>,
    /// Mean of `utilization_by_resource`.
    pub avg_utilization: f64,
}

impl PlanKpi {
    /// Computes KPIs from a plan and the model it was solved from.
    pub fn calculate(plan: &Plan, model: &Model) -> Self {
        let makespan = plan.makespan();
        let mut usage: HashMap<String, Vec<(i64, i64, u32)>> = HashMap::new();

        for entry in &plan.timelines {
            let Some(def) = timeline_template(model, &entry.name) else {
                continue;
            };
            for token in &entry.tokens {
                let Some(template) = def.states.iter().find(|s| s.name == token.state) else {
                    continue;
                };
                for (condition, binding) in template.conditions.iter().zip(&token.bindings) {
                    if let (Condition::UseResource(_, amount), ObjectRef::Named(name)) =
                        (condition, binding)
                    {
                        usage
                            .entry(name.clone())
                            .or_default()
                            .push((token.start, token.end, *amount));
                    }
                }
            }
        }

        let mut peak_usage_by_resource = HashMap::new();
        let mut utilization_by_resource = HashMap::new();
        for (name, uses) in &usage {
            let peak = peak_at_starts(uses);
            peak_usage_by_resource.insert(name.clone(), peak);

            let capacity = resource_template(model, name).and_then(|r| r.capacity);
            if let Some(capacity) = capacity.filter(|&c| c > 0) {
                let busy: i64 = uses.iter().map(|&(s, e, a)| (e - s) * i64::from(a)).sum();
                let utilization = if makespan == 0 {
                    0.0
                } else {
                    busy as f64 / (f64::from(capacity) * makespan as f64)
                };
                utilization_by_resource.insert(name.clone(), utilization);
            }
        }

        let avg_utilization = if utilization_by_resource.is_empty() {
            0.0
        } else {
            let sum: f64 = utilization_by_resource.values().sum();
            sum / utilization_by_resource.len() as f64
        };

        Self {
            makespan,
            token_count: plan.token_count(),
            peak_usage_by_resource,
            utilization_by_resource,
            avg_utilization,
        }
    }

    /// Whether the plan meets the given quality thresholds.
    pub fn meets_thresholds(&self, max_makespan: i64, min_utilization: f64) -> bool {
        self.makespan <= max_makespan && self.avg_utilization >= min_utilization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DurationBounds, PlanTimeline, PlanToken, Problem, ResourceSpec, StateTemplate,
        TimelineSpec,
    };

    fn model() -> Model {
        let worker = |name: &str| {
            TimelineSpec::new("Worker").with_name(name).with_state(
                StateTemplate::new("Work")
                    .with_duration(DurationBounds::exactly(2))
                    .with_condition(Condition::use_resource(ObjectRef::any_of("Tool"), 1)),
            )
        };
        Model::load(
            &Problem::new()
                .with_resource(ResourceSpec::new("Tool").with_name("hammer").with_capacity(2))
                .with_timeline(worker("w1"))
                .with_timeline(worker("w2")),
        )
        .unwrap()
    }

    fn work(start: i64) -> PlanToken {
        PlanToken::new("Work", start, start + 2).with_bindings(vec![ObjectRef::named("hammer")])
    }

    #[test]
    fn test_kpi_basic() {
        let plan = Plan {
            timelines: vec![
                PlanTimeline::new("w1").with_token(work(0)),
                PlanTimeline::new("w2").with_token(work(1)),
            ],
        };
        let kpi = PlanKpi::calculate(&plan, &model());
        assert_eq!(kpi.makespan, 3);
        assert_eq!(kpi.token_count, 2);
        assert_eq!(kpi.peak_usage_by_resource["hammer"], 2);
        // 4 unit-steps used out of 2 × 3 available.
        assert!((kpi.utilization_by_resource["hammer"] - 4.0 / 6.0).abs() < 1e-10);
        assert!((kpi.avg_utilization - 4.0 / 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_kpi_synthesized_resource() {
        let plan = Plan {
            timelines: vec![PlanTimeline::new("w1").with_token(
                PlanToken::new("Work", 0, 2).with_bindings(vec![ObjectRef::named("Tool_1")]),
            )],
        };
        let kpi = PlanKpi::calculate(&plan, &model());
        assert_eq!(kpi.peak_usage_by_resource["Tool_1"], 1);
        assert!((kpi.utilization_by_resource["Tool_1"] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_kpi_empty() {
        let kpi = PlanKpi::calculate(&Plan::new(), &model());
        assert_eq!(kpi.makespan, 0);
        assert_eq!(kpi.token_count, 0);
        assert!(kpi.peak_usage_by_resource.is_empty());
        assert!((kpi.avg_utilization - 0.0).abs() < 1e-10);
    }

    #[test]
    fn test_meets_thresholds() {
        let plan = Plan {
            timelines: vec![PlanTimeline::new("w1").with_token(work(0))],
        };
        let kpi = PlanKpi::calculate(&plan, &model());
        // hammer: 2 / (2 × 2) = 0.5
        assert!(kpi.meets_thresholds(2, 0.5));
        assert!(!kpi.meets_thresholds(1, 0.0));
        assert!(!kpi.meets_thresholds(2, 0.6));
    }
}
