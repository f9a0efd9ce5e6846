//! Named multi-agent workflows.
//!
//! A workflow is an ordered list of steps, each naming a registered agent.
//! A step's goal is built from its prompt template, where `{input}` stands
//! for the previous step's answer (the task goal for the first step). The
//! first step that does not complete ends the workflow.

use arena_core::error::{ErrorKind, RunError};
use arena_core::message::Transcript;
use arena_core::result::{AgentResult, RunStatus, SubtaskResult, SubtaskStatus};
use arena_core::task::Task;
use arena_telemetry::Trace;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::strategy::{NamedAgent, Strategy};

/// Placeholder replaced with the previous step's answer.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub agent: String,
    pub template: Option<String>,
}

impl WorkflowStep {
    fn goal(&self, input: &str) -> String {
        match &self.template {
            Some(template) => template.replace(INPUT_PLACEHOLDER, input),
            None => input.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step that receives the previous answer unchanged.
    pub fn step(mut self, agent: impl Into<String>) -> Self {
        self.steps.push(WorkflowStep {
            agent: agent.into(),
            template: None,
        });
        self
    }

    /// Append a step whose goal is `template` with `{input}` substituted.
    pub fn step_with_template(mut self, agent: impl Into<String>, template: impl Into<String>) -> Self {
        self.steps.push(WorkflowStep {
            agent: agent.into(),
            template: Some(template.into()),
        });
        self
    }
}

/// Coordinates registered agents through named workflows.
#[derive(Default)]
pub struct Orchestrator {
    agents: Vec<NamedAgent>,
    workflows: Vec<Workflow>,
    default_workflow: Option<String>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. A later registration under the same name wins.
    pub fn register_agent(&mut self, agent: NamedAgent) {
        self.agents.retain(|a| a.name != agent.name);
        self.agents.push(agent);
    }

    pub fn add_workflow(&mut self, workflow: Workflow, is_default: bool) {
        if is_default {
            self.default_workflow = Some(workflow.name.clone());
        }
        self.workflows.retain(|w| w.name != workflow.name);
        self.workflows.push(workflow);
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    fn agent(&self, name: &str) -> Option<&NamedAgent> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Run the named workflow, or the default one.
    pub async fn run(&self, task: &Task, workflow: Option<&str>, cancel: &CancellationToken) -> AgentResult {
        match workflow.or(self.default_workflow.as_deref()) {
            Some(name) => self.execute_workflow(name, task, cancel).await,
            None => invalid(task, "no workflow named and no default workflow set"),
        }
    }

    pub async fn execute_workflow(&self, name: &str, task: &Task, cancel: &CancellationToken) -> AgentResult {
        let annotation = format!("workflow:{name}");
        let Some(workflow) = self.workflows.iter().find(|w| w.name == name) else {
            return invalid(task, &format!("workflow '{name}' not found")).annotate(annotation);
        };
        if let Some(missing) = workflow.steps.iter().find(|s| self.agent(&s.agent).is_none()) {
            return invalid(task, &format!("agent '{}' not found", missing.agent)).annotate(annotation);
        }
        if workflow.steps.is_empty() {
            return invalid(task, &format!("workflow '{name}' has no steps")).annotate(annotation);
        }
        info!(run_id = %task.id, workflow = name, steps = workflow.steps.len(), "Executing workflow");

        let mut trace = Trace::new(&task.id);
        let mut records: Vec<SubtaskResult> = Vec::with_capacity(workflow.steps.len());
        let mut input = task.goal.clone();
        let mut last: Option<AgentResult> = None;

        for (idx, step) in workflow.steps.iter().enumerate() {
            let Some(agent) = self.agent(&step.agent) else {
                continue;
            };
            let mut step_task = task.subtask(idx, step.goal(&input));
            step_task.step_budget = task.step_budget;
            let result = agent.run(&step_task, cancel).await;

            let status = match result.status() {
                RunStatus::Completed => SubtaskStatus::Completed,
                RunStatus::Cancelled => SubtaskStatus::Cancelled,
                RunStatus::Failed | RunStatus::BudgetExhausted => SubtaskStatus::Failed,
            };
            records.push(SubtaskResult {
                index: idx,
                goal: step_task.goal.clone(),
                status,
                result: Some(Box::new(result.clone())),
            });

            if !result.is_completed() {
                warn!(
                    run_id = %task.id,
                    workflow = name,
                    step = idx,
                    agent = %step.agent,
                    status = %result.status(),
                    "Workflow step did not complete, stopping"
                );
                if let Some(previous) = last.take() {
                    trace.absorb(previous.trace());
                }
                return result.absorb_trace(&trace).with_subtasks(records).annotate(annotation);
            }
            input = result.answer().to_string();
            if let Some(previous) = last.replace(result) {
                trace.absorb(previous.trace());
            }
        }

        match last {
            Some(result) => result.absorb_trace(&trace).with_subtasks(records).annotate(annotation),
            None => invalid(task, &format!("workflow '{name}' ran no steps")).annotate(annotation),
        }
    }

    /// Run each named agent on its task concurrently. Results keep input order.
    pub async fn run_parallel(&self, names: &[&str], tasks: &[Task], cancel: &CancellationToken) -> Vec<AgentResult> {
        let count = names.len().max(tasks.len());
        let runs = (0..count).map(|idx| async move {
            match (names.get(idx), tasks.get(idx)) {
                (Some(name), Some(task)) => match self.agent(name) {
                    Some(agent) => agent.run(task, cancel).await.annotate(*name),
                    None => invalid(task, &format!("agent '{name}' not found")),
                },
                (_, Some(task)) => invalid(task, "no agent named for this task"),
                (Some(name), None) => invalid(&Task::new(""), &format!("no task given for agent '{name}'")),
                (None, None) => invalid(&Task::new(""), "empty slot"),
            }
        });
        futures::future::join_all(runs).await
    }
}

fn invalid(task: &Task, message: &str) -> AgentResult {
    let mut trace = Trace::new(&task.id);
    trace.end();
    AgentResult::failed(RunError::new(ErrorKind::ValidationError, message), Transcript::new(), trace)
}
