//! The Router: picks a strategy for each task.
//!
//! Strategies are registered in priority order. Three selection policies
//! are supported:
//!
//! - **rule based**: static rules, highest priority first, else the default
//! - **model based**: static rules first, then the model names a strategy
//! - **fan out**: run every strategy and keep the most confident completion
//!
//! The router never changes the task. Whatever it returns is annotated with
//! the name of the strategy that produced it.

use std::sync::Arc;
use std::time::Instant;

use arena_config::{RouterConfig, RoutingPolicyKind, RuleConfig};
use arena_core::error::{ErrorKind, RunError};
use arena_core::event::{DomainEvent, EventBus};
use arena_core::message::{Message, Transcript};
use arena_core::model::CompletionOptions;
use arena_core::result::AgentResult;
use arena_core::task::Task;
use arena_telemetry::{Span, SpanKind, Trace};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{CallSpec, Interrupted, StepEngine};
use crate::strategy::{NamedAgent, Strategy};

const ROUTER_PROMPT: &str = "You are a router. Choose the strategy best suited to the task. \
Reply with the strategy name only.";

/// A static routing rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingRule {
    pub strategy: String,
    /// Lower-cased; any one occurring in the goal matches.
    pub keywords: Vec<String>,
    /// Constraint key and optional expected value.
    pub constraint: Option<(String, Option<serde_json::Value>)>,
    pub priority: i32,
}

impl RoutingRule {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            keywords: Vec::new(),
            constraint: None,
            priority: 0,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        self.constraint = Some((key.into(), value));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn from_config(config: &RuleConfig) -> Self {
        let rule = Self::new(&config.strategy)
            .with_keywords(&config.keywords)
            .with_priority(config.priority);
        match &config.constraint {
            Some(c) => rule.with_constraint(&c.key, c.value.clone()),
            None => rule,
        }
    }

    /// Keywords and constraint must each match when present.
    pub fn matches(&self, task: &Task) -> bool {
        if self.keywords.is_empty() && self.constraint.is_none() {
            return false;
        }
        let goal = task.goal.to_lowercase();
        let keyword_ok = self.keywords.is_empty() || self.keywords.iter().any(|k| goal.contains(k.as_str()));
        let constraint_ok = match &self.constraint {
            None => true,
            Some((key, expected)) => match (task.constraints.get(key), expected) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => actual == expected,
            },
        };
        keyword_ok && constraint_ok
    }
}

/// Normalise a model's strategy answer: trim, lower-case, strip
/// surrounding quotes and punctuation.
pub fn normalize_strategy_name(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .to_lowercase()
}

/// Chooses among a fixed, ordered set of named strategies.
pub struct Router {
    agents: Vec<NamedAgent>,
    policy: RoutingPolicyKind,
    /// Sorted by priority, highest first; ties keep insertion order.
    rules: Vec<RoutingRule>,
    default_strategy: Option<String>,
    /// Consulted by the model-based policy.
    selector: Option<StepEngine>,
    event_bus: Option<Arc<EventBus>>,
}

impl Router {
    pub fn new(policy: RoutingPolicyKind) -> Self {
        Self {
            agents: Vec::new(),
            policy,
            rules: Vec::new(),
            default_strategy: None,
            selector: None,
            event_bus: None,
        }
    }

    /// A router with the policy, rules and default from configuration.
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(config.policy)
            .with_rules(config.rules.iter().map(RoutingRule::from_config).collect())
            .with_default(config.default_strategy.clone())
    }

    /// Register a strategy. Registration order is priority order.
    pub fn register(&mut self, agent: NamedAgent) {
        self.agents.push(agent);
    }

    pub fn with_agent(mut self, agent: NamedAgent) -> Self {
        self.register(agent);
        self
    }

    pub fn with_rules(mut self, mut rules: Vec<RoutingRule>) -> Self {
        // Stable sort keeps the configured order among equal priorities.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.rules = rules;
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_strategy = Some(name.into());
        self
    }

    /// Engine whose model client answers model-based routing questions.
    pub fn with_selector(mut self, engine: StepEngine) -> Self {
        self.selector = Some(engine);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn policy(&self) -> RoutingPolicyKind {
        self.policy
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.name == name)
    }

    /// The configured default if registered, else the first strategy.
    fn default_index(&self) -> usize {
        self.default_strategy
            .as_deref()
            .and_then(|name| self.index_of(name))
            .unwrap_or(0)
    }

    /// The first matching rule that names a registered strategy.
    pub fn match_rules(&self, task: &Task) -> Option<&str> {
        self.rules
            .iter()
            .filter(|r| self.index_of(&r.strategy).is_some())
            .find(|r| r.matches(task))
            .map(|r| r.strategy.as_str())
    }

    /// Route the task to one strategy (or all, when fanning out).
    pub async fn route(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        if self.agents.is_empty() {
            let mut trace = Trace::new(&task.id);
            trace.end();
            return AgentResult::failed(
                RunError::new(ErrorKind::ValidationError, "router has no strategies registered"),
                Transcript::new(),
                trace,
            );
        }
        if self.policy == RoutingPolicyKind::FanOut {
            return self.fan_out(task, cancel).await;
        }

        let started = Instant::now();
        let mut trace = Trace::new(&task.id);
        let idx = match self.select(task, &mut trace, cancel).await {
            Some(idx) => idx,
            None => {
                trace.end();
                return AgentResult::cancelled(Transcript::new(), trace);
            }
        };
        let chosen = &self.agents[idx];
        trace.add_span(
            Span::new(SpanKind::Route, &chosen.name)
                .with_metadata("policy", serde_json::json!(self.policy))
                .finish(true, started.elapsed().as_millis() as u64),
        );
        self.announce(task, &chosen.name);

        chosen.run(task, cancel).await.absorb_trace(&trace).annotate(&chosen.name)
    }

    /// Pick a strategy index. `None` means cancelled while asking the model.
    async fn select(&self, task: &Task, trace: &mut Trace, cancel: &CancellationToken) -> Option<usize> {
        if let Some(name) = self.match_rules(task) {
            debug!(run_id = %task.id, strategy = name, "Routing rule matched");
            return self.index_of(name);
        }
        if self.policy != RoutingPolicyKind::ModelBased {
            return Some(self.default_index());
        }
        let Some(selector) = &self.selector else {
            warn!(run_id = %task.id, "Model-based routing without a model client, using default");
            return Some(self.default_index());
        };

        let catalogue = self
            .agents
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let request = [
            Message::system(ROUTER_PROMPT),
            Message::user(format!("Task:\n{}\n\nStrategies:\n{}", task.prompt(), catalogue)),
        ];
        let options = CompletionOptions {
            temperature: 0.0,
            ..CompletionOptions::default()
        };
        // Spans of the question are kept; the route span is added by the caller.
        let mut question = Trace::new(&task.id);
        let answer = selector
            .consult(
                task,
                CallSpec::single(SpanKind::ModelCall),
                &request,
                &options,
                &mut question,
                cancel,
            )
            .await;
        trace.absorb(&question);

        match answer {
            Ok(completion) => {
                let name = normalize_strategy_name(&completion.text);
                match self.index_of(&name) {
                    Some(idx) => Some(idx),
                    None => {
                        warn!(run_id = %task.id, answer = %name, "Model named an unknown strategy, using default");
                        Some(self.default_index())
                    }
                }
            }
            Err(Interrupted::Cancelled) => None,
            Err(Interrupted::Failed(e)) => {
                warn!(run_id = %task.id, error = %e, "Routing model failed, using default");
                Some(self.default_index())
            }
        }
    }

    /// Run every strategy concurrently and keep the best completed result.
    async fn fan_out(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        info!(run_id = %task.id, strategies = self.agents.len(), "Fanning out");
        let started = Instant::now();
        let results = futures::future::join_all(self.agents.iter().map(|a| a.run(task, cancel))).await;

        let mut best: Option<(usize, Option<f32>)> = None;
        for (idx, result) in results.iter().enumerate() {
            if !result.is_completed() {
                continue;
            }
            let score = result
                .confidence()
                .or_else(|| self.agents[idx].estimate_confidence(task));
            let better = match best {
                None => true,
                Some((_, best_score)) => match (score, best_score) {
                    (Some(s), Some(b)) => s > b,
                    (Some(_), None) => true,
                    _ => false,
                },
            };
            if better {
                best = Some((idx, score));
            }
        }
        let chosen_idx = best.map_or(0, |(idx, _)| idx);

        let mut trace = Trace::new(&task.id);
        for (idx, result) in results.iter().enumerate() {
            if idx != chosen_idx {
                trace.absorb(result.trace());
            }
        }
        let name = self.agents[chosen_idx].name.clone();
        trace.add_span(
            Span::new(SpanKind::Route, &name)
                .with_metadata("policy", serde_json::json!(self.policy))
                .finish(true, started.elapsed().as_millis() as u64),
        );
        self.announce(task, &name);

        results
            .into_iter()
            .nth(chosen_idx)
            .map(|r| r.absorb_trace(&trace).annotate(&name))
            .unwrap_or_else(|| {
                AgentResult::failed(
                    RunError::new(ErrorKind::ValidationError, "fan-out produced no results"),
                    Transcript::new(),
                    trace,
                )
            })
    }

    fn announce(&self, task: &Task, strategy: &str) {
        info!(run_id = %task.id, strategy, policy = ?self.policy, "Strategy selected");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::StrategySelected {
                task_id: task.id.clone(),
                strategy: strategy.to_string(),
                policy: format!("{:?}", self.policy),
                timestamp: Utc::now(),
            });
        }
    }

    /// The most optimistic estimate among the registered strategies.
    pub fn estimate_confidence(&self, task: &Task) -> Option<f32> {
        self.agents
            .iter()
            .filter_map(|a| a.estimate_confidence(task))
            .reduce(f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::ReactAgent;
    use crate::patterns::test_helpers::*;
    use crate::strategy::Agent;
    use arena_core::error::ModelError;
    use arena_core::model::Completion;
    use arena_core::result::RunStatus;

    fn answering(text: &str) -> ReactAgent {
        let model = Arc::new(ScriptedModel::texts(&[text]));
        ReactAgent::new(test_engine(model, empty_registry()))
    }

    fn three_way(policy: RoutingPolicyKind) -> Router {
        Router::new(policy)
            .with_agent(NamedAgent::new("react", answering("from react")))
            .with_agent(NamedAgent::new("reflection", answering("from reflection")))
            .with_agent(NamedAgent::new("planning", answering("from planning")))
    }

    fn default_rules() -> Vec<RoutingRule> {
        RouterConfig::default()
            .rules
            .iter()
            .map(RoutingRule::from_config)
            .collect()
    }

    #[test]
    fn rules_sorted_by_priority_stably() {
        let router = Router::new(RoutingPolicyKind::RuleBased).with_rules(vec![
            RoutingRule::new("a").with_keywords(["x"]),
            RoutingRule::new("b").with_keywords(["x"]).with_priority(5),
            RoutingRule::new("c").with_keywords(["x"]),
        ]);
        let order: Vec<&str> = router.rules().iter().map(|r| r.strategy.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn rule_matching_is_case_insensitive_and_deterministic() {
        let router = three_way(RoutingPolicyKind::RuleBased)
            .with_rules(default_rules())
            .with_default("reflection");
        let task = Task::new("How To set up CI");
        assert_eq!(router.match_rules(&task), Some("planning"));
        assert_eq!(router.match_rules(&task), Some("planning"));
        assert_eq!(router.match_rules(&Task::new("Search the docs")), Some("react"));
        assert_eq!(router.match_rules(&Task::new("Write a poem")), None);
    }

    #[test]
    fn constraint_rule_matches_key_and_value() {
        let rule = RoutingRule::new("reflection").with_constraint("mode", Some(serde_json::json!("careful")));
        assert!(rule.matches(&Task::new("t").with_constraint("mode", serde_json::json!("careful"))));
        assert!(!rule.matches(&Task::new("t").with_constraint("mode", serde_json::json!("fast"))));
        assert!(!rule.matches(&Task::new("t")));

        let key_only = RoutingRule::new("planning").with_constraint("steps", None);
        assert!(key_only.matches(&Task::new("t").with_constraint("steps", serde_json::json!(3))));
    }

    #[test]
    fn strategy_names_are_normalised() {
        assert_eq!(normalize_strategy_name("  **Planning**.\n"), "planning");
        assert_eq!(normalize_strategy_name("\"react\""), "react");
    }

    #[tokio::test]
    async fn rule_based_routes_and_annotates() {
        let router = three_way(RoutingPolicyKind::RuleBased)
            .with_rules(default_rules())
            .with_default("reflection");

        let result = router
            .route(&Task::new("Plan a migration"), &CancellationToken::new())
            .await;

        assert_eq!(result.answer(), "from planning");
        assert_eq!(result.strategy(), Some("planning"));
        assert_eq!(result.trace().count(SpanKind::Route), 1);
    }

    #[tokio::test]
    async fn unmatched_task_uses_configured_default() {
        let router = three_way(RoutingPolicyKind::RuleBased)
            .with_rules(default_rules())
            .with_default("reflection");
        let result = router.route(&Task::new("Write a poem"), &CancellationToken::new()).await;
        assert_eq!(result.strategy(), Some("reflection"));
    }

    #[tokio::test]
    async fn unknown_default_falls_back_to_first() {
        let router = three_way(RoutingPolicyKind::RuleBased).with_default("oracle");
        let result = router.route(&Task::new("Write a poem"), &CancellationToken::new()).await;
        assert_eq!(result.strategy(), Some("react"));
    }

    #[tokio::test]
    async fn model_based_uses_model_answer() {
        let selector = test_engine(
            Arc::new(ScriptedModel::texts(&["`Planning`"])),
            empty_registry(),
        );
        let router = three_way(RoutingPolicyKind::ModelBased)
            .with_default("reflection")
            .with_selector(selector);

        let result = router.route(&Task::new("Write a poem"), &CancellationToken::new()).await;

        assert_eq!(result.strategy(), Some("planning"));
        assert_eq!(result.trace().model_call_count(), 2);
    }

    #[tokio::test]
    async fn model_based_rules_take_precedence() {
        let selector_model = Arc::new(ScriptedModel::texts(&[]));
        let router = three_way(RoutingPolicyKind::ModelBased)
            .with_rules(default_rules())
            .with_selector(test_engine(selector_model.clone(), empty_registry()));

        let result = router.route(&Task::new("Search for crates"), &CancellationToken::new()).await;

        assert_eq!(result.strategy(), Some("react"));
        assert_eq!(selector_model.call_count(), 0);
    }

    #[tokio::test]
    async fn model_based_falls_back_on_unknown_or_error() {
        let unknown = three_way(RoutingPolicyKind::ModelBased)
            .with_default("reflection")
            .with_selector(test_engine(
                Arc::new(ScriptedModel::texts(&["an oracle"])),
                empty_registry(),
            ));
        let result = unknown.route(&Task::new("t"), &CancellationToken::new()).await;
        assert_eq!(result.strategy(), Some("reflection"));

        let failing = three_way(RoutingPolicyKind::ModelBased)
            .with_default("planning")
            .with_selector(test_engine(
                Arc::new(ScriptedModel::new(vec![Err(ModelError::Network("down".into()))])),
                empty_registry(),
            ));
        let result = failing.route(&Task::new("t"), &CancellationToken::new()).await;
        assert_eq!(result.strategy(), Some("planning"));
    }

    #[tokio::test]
    async fn fan_out_picks_only_completed_result() {
        let failing = ReactAgent::new(test_engine(
            Arc::new(ScriptedModel::new(vec![
                Err(ModelError::Network("down".into())),
                Err(ModelError::Network("down".into())),
            ])),
            empty_registry(),
        ));
        let exhausted = ReactAgent::new(test_engine(Arc::new(ScriptedModel::texts(&[])), empty_registry()))
            .with_max_steps(0);
        let router = Router::new(RoutingPolicyKind::FanOut)
            .with_agent(NamedAgent::new("react", failing))
            .with_agent(NamedAgent::new("reflection", answering("the only answer")))
            .with_agent(NamedAgent::new("planning", exhausted));

        let result = router.route(&Task::new("t"), &CancellationToken::new()).await;

        assert!(result.is_completed());
        assert_eq!(result.answer(), "the only answer");
        assert_eq!(result.strategy(), Some("reflection"));
    }

    #[tokio::test]
    async fn fan_out_prefers_highest_confidence() {
        let confident = |text: &str, confidence: f32| {
            ReactAgent::new(test_engine(
                Arc::new(ScriptedModel::new(vec![Ok(Completion::text(text).with_confidence(confidence))])),
                empty_registry(),
            ))
        };
        let router = Router::new(RoutingPolicyKind::FanOut)
            .with_agent(NamedAgent::new("react", confident("low", 0.4)))
            .with_agent(NamedAgent::new("reflection", confident("high", 0.9)))
            .with_agent(NamedAgent::new("planning", confident("also high", 0.9)));

        let result = router.route(&Task::new("t"), &CancellationToken::new()).await;

        assert_eq!(result.answer(), "high");
        assert_eq!(result.strategy(), Some("reflection"));
    }

    #[tokio::test]
    async fn fan_out_without_completion_returns_first() {
        let exhausted = || {
            ReactAgent::new(test_engine(Arc::new(ScriptedModel::texts(&[])), empty_registry()))
                .with_max_steps(0)
        };
        let router = Router::new(RoutingPolicyKind::FanOut)
            .with_agent(NamedAgent::new("react", exhausted()))
            .with_agent(NamedAgent::new("planning", exhausted()));

        let result = router.route(&Task::new("t"), &CancellationToken::new()).await;

        assert_eq!(result.status(), RunStatus::BudgetExhausted);
        assert_eq!(result.strategy(), Some("react"));
    }

    #[tokio::test]
    async fn routers_compose() {
        let inner = three_way(RoutingPolicyKind::RuleBased)
            .with_rules(default_rules())
            .with_default("react");
        let outer = Router::new(RoutingPolicyKind::RuleBased)
            .with_agent(NamedAgent::new("presets", Agent::from(inner)));

        let result = outer.route(&Task::new("Plan the week"), &CancellationToken::new()).await;

        // The innermost annotation is overwritten by the outer router.
        assert_eq!(result.answer(), "from planning");
        assert_eq!(result.strategy(), Some("presets"));
    }

    #[tokio::test]
    async fn empty_router_fails_validation() {
        let router = Router::new(RoutingPolicyKind::RuleBased);
        let result = router.route(&Task::new("t"), &CancellationToken::new()).await;
        assert_eq!(result.error().map(|e| e.kind), Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn cancellation_during_model_selection() {
        let selector_model = Arc::new(
            FnModel::new(|_| Ok(Completion::text("planning"))).with_delay(std::time::Duration::from_secs(10)),
        );
        let router = three_way(RoutingPolicyKind::ModelBased)
            .with_selector(test_engine(selector_model.clone(), empty_registry()));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let result = router.route(&Task::new("Write a poem"), &cancel).await;

        assert_eq!(result.status(), RunStatus::Cancelled);
        assert_eq!(result.strategy(), None);
        assert_eq!(selector_model.call_count(), 1);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
