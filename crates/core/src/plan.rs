//! Plan graph: an arena of steps addressed by index.
//!
//! A [`Plan`] can only be obtained through [`Plan::new`], which rejects
//! dangling indices, self-dependencies and cycles. Every `Plan` value is
//! therefore a DAG.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PlanError;

/// One node of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// The sub-task goal
    pub goal: String,

    /// Indices of steps that must have a recorded result first
    #[serde(default, alias = "dependencies")]
    pub depends_on: BTreeSet<usize>,

    /// Whether the overall run fails when this step does not complete
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl PlanStep {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            depends_on: BTreeSet::new(),
            required: true,
        }
    }

    pub fn after(mut self, dependency: usize) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    /// Mark the step as substitutable: its failure does not fail the run.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A validated, acyclic plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
    order: Vec<usize>,
}

impl Plan {
    /// Build a plan, rejecting anything that is not a DAG.
    pub fn new(steps: Vec<PlanStep>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        for (idx, step) in steps.iter().enumerate() {
            for &dep in &step.depends_on {
                if dep == idx {
                    return Err(PlanError::SelfDependency(idx));
                }
                if dep >= steps.len() {
                    return Err(PlanError::DanglingDependency {
                        step: idx,
                        dependency: dep,
                    });
                }
            }
        }
        let order = topological_order(&steps)?;
        Ok(Self { steps, order })
    }

    /// Parse the planner's JSON (`{"steps": [...]}` or a bare array).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PlanError> {
        let steps_value = match value {
            serde_json::Value::Object(map) => map
                .get("steps")
                .cloned()
                .ok_or_else(|| PlanError::Unparseable("missing \"steps\" field".into()))?,
            serde_json::Value::Array(_) => value.clone(),
            other => {
                return Err(PlanError::Unparseable(format!(
                    "expected an object or array, got {other}"
                )));
            }
        };
        let steps: Vec<PlanStep> = serde_json::from_value(steps_value)
            .map_err(|e| PlanError::Unparseable(e.to_string()))?;
        Self::new(steps)
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// A topological order of step indices (lowest index first among peers).
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// Whether every dependency of `idx` is in `resolved`.
    pub fn is_ready(&self, idx: usize, resolved: &BTreeSet<usize>) -> bool {
        self.steps
            .get(idx)
            .is_some_and(|s| s.depends_on.is_subset(resolved))
    }

    /// Steps that depend directly on `idx`.
    pub fn dependents(&self, idx: usize) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.depends_on.contains(&idx))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Kahn's algorithm. On failure the error names the steps left on a cycle.
fn topological_order(steps: &[PlanStep]) -> Result<Vec<usize>, PlanError> {
    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.depends_on.len()).collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for (child, step) in steps.iter().enumerate() {
            if step.depends_on.contains(&node) {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() != steps.len() {
        let stuck = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > 0)
            .map(|(i, _)| i)
            .collect();
        return Err(PlanError::Cycle(stuck));
    }
    Ok(order)
}
