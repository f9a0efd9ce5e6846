//! The immutable unit of work handed to a strategy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A task: goal text plus optional constraints and budget.
///
/// Created by the caller and read by strategies; nothing in the core
/// mutates a task after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: String,

    /// What the caller wants done
    pub goal: String,

    /// Structured constraints (free-form, also matched by routing rules)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub constraints: serde_json::Map<String, serde_json::Value>,

    /// Optional wall-clock deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Optional step budget overriding the strategy default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_budget: Option<u32>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            constraints: serde_json::Map::new(),
            deadline: None,
            step_budget: None,
        }
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    pub fn with_step_budget(mut self, steps: u32) -> Self {
        self.step_budget = Some(steps);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a child task for one plan step.
    ///
    /// Inherits the parent's constraints and deadline, but not its step budget.
    pub fn subtask(&self, index: usize, goal: impl Into<String>) -> Self {
        Self {
            id: format!("{}.{}", self.id, index),
            goal: goal.into(),
            constraints: self.constraints.clone(),
            deadline: self.deadline,
            step_budget: None,
        }
    }

    /// Whether the deadline (if any) has passed.
    pub fn is_past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Utc::now() >= d)
    }

    /// Render goal and constraints as the opening user prompt.
    pub fn prompt(&self) -> String {
        if self.constraints.is_empty() {
            return self.goal.clone();
        }
        let constraints = self
            .constraints
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("- {k}: {s}"),
                other => format!("- {k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\nConstraints:\n{}", self.goal, constraints)
    }
}
