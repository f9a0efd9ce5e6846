//! Builds agents and routers from configuration.

use std::sync::Arc;

use arena_config::{ArenaConfig, RESEARCH_REACT_MAX_STEPS, RouterConfig};
use arena_core::event::EventBus;
use arena_core::model::ModelClient;
use arena_core::tool::ToolRegistry;

use crate::engine::{EngineSettings, StepEngine};
use crate::patterns::{PlanningAgent, ReactAgent, ReflectionAgent};
use crate::router::Router;
use crate::strategy::{Agent, NamedAgent};
use crate::workflow::Orchestrator;

/// Strategy names in router priority order.
pub const STRATEGY_ORDER: [&str; 3] = ["react", "reflection", "planning"];

/// Wires one model client and one tool registry into every strategy.
#[derive(Clone)]
pub struct AgentFactory {
    config: ArenaConfig,
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolRegistry>,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentFactory {
    pub fn new(config: ArenaConfig, model: Arc<dyn ModelClient>, tools: Arc<dyn ToolRegistry>) -> Self {
        Self {
            config,
            model,
            tools,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn engine(&self) -> StepEngine {
        let engine = StepEngine::new(Arc::clone(&self.model), Arc::clone(&self.tools))
            .with_settings(EngineSettings::from_config(&self.config.engine));
        match &self.event_bus {
            Some(bus) => engine.with_event_bus(Arc::clone(bus)),
            None => engine,
        }
    }

    pub fn react(&self) -> ReactAgent {
        ReactAgent::from_config(self.engine(), &self.config.react, &self.config.engine)
    }

    pub fn reflection(&self) -> ReflectionAgent {
        ReflectionAgent::from_config(self.react(), &self.config.reflection)
    }

    pub fn planning(&self) -> PlanningAgent {
        PlanningAgent::from_config(self.react(), &self.config.planning)
    }

    /// Build a strategy by name.
    pub fn create(&self, name: &str) -> Option<Agent> {
        match name {
            "react" => Some(self.react().into()),
            "reflection" => Some(self.reflection().into()),
            "planning" => Some(self.planning().into()),
            _ => None,
        }
    }

    fn named_agents(&self) -> Vec<NamedAgent> {
        STRATEGY_ORDER
            .iter()
            .filter_map(|name| self.create(name).map(|agent| NamedAgent::new(*name, agent)))
            .collect()
    }

    /// A router over `[react, reflection, planning]` with the configured
    /// policy, rules and default.
    pub fn build_router(&self) -> Router {
        self.router_over(&self.config.router, self.named_agents())
    }

    /// The research router: model based, with investigations sent to
    /// planning and quick lookups to a react agent capped at
    /// [`RESEARCH_REACT_MAX_STEPS`] steps.
    pub fn build_research_router(&self) -> Router {
        let agents = self
            .named_agents()
            .into_iter()
            .map(|agent| match agent.name.as_str() {
                "react" => NamedAgent::new(
                    "react",
                    self.react().with_max_steps(RESEARCH_REACT_MAX_STEPS),
                ),
                _ => agent,
            })
            .collect();
        self.router_over(&RouterConfig::research(), agents)
    }

    fn router_over(&self, config: &RouterConfig, agents: Vec<NamedAgent>) -> Router {
        let router = agents
            .into_iter()
            .fold(Router::from_config(config), Router::with_agent)
            .with_selector(self.engine());
        match &self.event_bus {
            Some(bus) => router.with_event_bus(Arc::clone(bus)),
            None => router,
        }
    }

    /// An orchestrator with the three strategies registered under their names.
    pub fn orchestrator(&self) -> Orchestrator {
        let mut orchestrator = Orchestrator::new();
        for agent in self.named_agents() {
            orchestrator.register_agent(agent);
        }
        orchestrator
    }
}
