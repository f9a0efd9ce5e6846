//! The strategy interface shared by every agent variant.
//!
//! The set of variants is closed: [`Agent`] enumerates them, and the router
//! and workflows hold [`NamedAgent`] values rather than open trait objects.

use arena_core::result::AgentResult;
use arena_core::task::Task;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::patterns::{PlanningAgent, ReactAgent, ReflectionAgent};
use crate::router::Router;

/// A way of turning a task into an [`AgentResult`].
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the task to a terminal result. Never fails across this boundary.
    async fn run(&self, task: &Task, cancel: &CancellationToken) -> AgentResult;

    /// A prior guess at how well this strategy suits the task, in [0, 1].
    fn estimate_confidence(&self, _task: &Task) -> Option<f32> {
        None
    }
}

/// Every agent variant the core can run.
pub enum Agent {
    React(ReactAgent),
    Reflection(ReflectionAgent),
    Planning(PlanningAgent),
    /// A router is itself a strategy, so routers compose.
    Router(Box<Router>),
}

#[async_trait]
impl Strategy for Agent {
    fn name(&self) -> &str {
        match self {
            Self::React(_) => "react",
            Self::Reflection(_) => "reflection",
            Self::Planning(_) => "planning",
            Self::Router(_) => "router",
        }
    }

    fn description(&self) -> &str {
        match self {
            Self::React(_) => "Reason and act with tools until a final answer",
            Self::Reflection(_) => "Draft an answer, critique it and revise",
            Self::Planning(_) => "Decompose into dependent subtasks, execute and synthesize",
            Self::Router(_) => "Select the best strategy for each task",
        }
    }

    async fn run(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        match self {
            Self::React(agent) => agent.run(task, cancel).await,
            Self::Reflection(agent) => agent.run(task, cancel).await,
            Self::Planning(agent) => agent.run(task, cancel).await,
            Self::Router(router) => router.route(task, cancel).await,
        }
    }

    fn estimate_confidence(&self, task: &Task) -> Option<f32> {
        match self {
            Self::Router(router) => router.estimate_confidence(task),
            _ => None,
        }
    }
}

impl From<ReactAgent> for Agent {
    fn from(agent: ReactAgent) -> Self {
        Self::React(agent)
    }
}

impl From<ReflectionAgent> for Agent {
    fn from(agent: ReflectionAgent) -> Self {
        Self::Reflection(agent)
    }
}

impl From<PlanningAgent> for Agent {
    fn from(agent: PlanningAgent) -> Self {
        Self::Planning(agent)
    }
}

impl From<Router> for Agent {
    fn from(router: Router) -> Self {
        Self::Router(Box::new(router))
    }
}

/// An agent registered under a name.
pub struct NamedAgent {
    pub name: String,
    pub agent: Agent,
}

impl NamedAgent {
    pub fn new(name: impl Into<String>, agent: impl Into<Agent>) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
        }
    }
}

#[async_trait]
impl Strategy for NamedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    async fn run(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        self.agent.run(task, cancel).await
    }

    fn estimate_confidence(&self, task: &Task) -> Option<f32> {
        self.agent.estimate_confidence(task)
    }
}
