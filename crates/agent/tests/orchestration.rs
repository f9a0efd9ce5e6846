//! End-to-end runs through the factory, router and strategies.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arena_agent::{AgentFactory, CancellationToken, Strategy, Workflow};
use arena_config::ArenaConfig;
use arena_core::event::{DomainEvent, EventBus};
use arena_core::message::Role;
use arena_core::model::Completion;
use arena_core::result::{RunStatus, SubtaskStatus};
use arena_core::task::Task;
use arena_core::tool::{LocalToolRegistry, ToolCall, ToolRegistry};
use arena_telemetry::{MetricsSummary, SpanKind};

use common::{ListIssues, RuleModel};

fn tools() -> Arc<dyn ToolRegistry> {
    Arc::new(LocalToolRegistry::new().with(Box::new(ListIssues)))
}

fn fast_config() -> ArenaConfig {
    ArenaConfig::from_toml_str(
        r#"
[engine]
retry_backoff_ms = 1
model_timeout_ms = 2000
tool_timeout_ms = 2000

[reflection]
max_iterations = 2
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn list_issues_through_react() {
    let model = Arc::new(
        RuleModel::new()
            .then(Completion::tool_calls(
                "",
                vec![ToolCall::new("c1", "list_issues", serde_json::json!({"repo": "X"}))],
            ))
            .then(Completion::text("Final Answer: 3 open issues")),
    );
    let factory = AgentFactory::new(fast_config(), model, tools());

    let result = factory
        .react()
        .run(&Task::new("summarize repo X issues"), &CancellationToken::new())
        .await;

    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.answer(), "3 open issues");
    let roles: Vec<Role> = result.transcript().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::Tool, Role::Assistant]);
    assert!(result.transcript().messages()[1].content.contains("Crash on start"));
}

#[tokio::test]
async fn router_plans_multi_step_goal() {
    let model = Arc::new(
        RuleModel::new()
            .on_system(
                "You are a planner",
                r#"```json
{"steps": [
  {"goal": "collect issues of repo X"},
  {"goal": "group issues by theme", "depends_on": [0]}
]}
```"#,
            )
            .on_system("You are a synthesizer", "Three issues: one crash, one docs, one perf.")
            .on_goal(
                "collect issues",
                Completion::text("Final Answer: crash, docs typo, slow build"),
            )
            .on_goal("group issues", Completion::text("Final Answer: bug / docs / perf")),
    );
    let factory = AgentFactory::new(fast_config(), model, tools());
    let router = factory.build_router();

    let result = router
        .route(&Task::new("Plan a triage of repo X"), &CancellationToken::new())
        .await;

    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.strategy(), Some("planning"));
    assert_eq!(result.answer(), "Three issues: one crash, one docs, one perf.");
    assert_eq!(result.subtasks().len(), 2);
    assert!(result.subtasks().iter().all(|s| s.status == SubtaskStatus::Completed));

    let summary = MetricsSummary::from_traces([result.trace()]);
    assert_eq!(summary.count(SpanKind::Plan), 1);
    assert_eq!(summary.count(SpanKind::Synthesis), 1);
    assert_eq!(summary.count(SpanKind::ModelCall), 2);
    assert_eq!(summary.count(SpanKind::Route), 1);
}

#[tokio::test]
async fn reflection_revises_once_then_stops() {
    let model = Arc::new(
        RuleModel::new()
            .on_system("You are a critic", r#"{"verdict": "revise", "notes": "shorter"}"#)
            .then(Completion::text("Final Answer: a long rambling poem"))
            .then(Completion::text("Final Answer: a short poem")),
    );
    let factory = AgentFactory::new(fast_config(), model.clone(), tools());

    let result = factory
        .reflection()
        .run(&Task::new("Write a poem"), &CancellationToken::new())
        .await;

    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.answer(), "a short poem");
    // Draft, one critique, one revision.
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn cancellation_interrupts_slow_model() {
    let model = Arc::new(
        RuleModel::new()
            .then(Completion::text("too late"))
            .with_delay(Duration::from_secs(10)),
    );
    let factory = AgentFactory::new(fast_config(), model, tools());
    let agent = factory.react();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let result = agent.run(&Task::new("anything"), &cancel).await;

    assert_eq!(result.status(), RunStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.transcript().is_empty());
}

#[tokio::test]
async fn tool_failure_is_observed_by_model() {
    let model = Arc::new(
        RuleModel::new()
            .then(Completion::tool_calls(
                "",
                vec![ToolCall::new("c1", "list_issues", serde_json::json!({"repo": "missing"}))],
            ))
            .then(Completion::text("Final Answer: the repository does not exist")),
    );
    let factory = AgentFactory::new(fast_config(), model, tools());

    let result = factory
        .react()
        .run(&Task::new("summarize repo missing"), &CancellationToken::new())
        .await;

    assert_eq!(result.status(), RunStatus::Completed);
    let tool_message = &result.transcript().messages()[1];
    assert!(tool_message.content.starts_with("Error (tool_error)"));
    let summary = MetricsSummary::from_traces([result.trace()]);
    assert_eq!(summary.tools["list_issues"].failures, 1);
}

#[tokio::test]
async fn workflow_over_factory_agents() {
    let model = Arc::new(
        RuleModel::new()
            .on_goal("Draft notes", Completion::text("Final Answer: notes"))
            .on_goal("Polish", Completion::text("Final Answer: polished notes")),
    );
    let factory = AgentFactory::new(fast_config(), model, tools());
    let mut orchestrator = factory.orchestrator();
    orchestrator.add_workflow(
        Workflow::new("notes")
            .step_with_template("react", "Draft notes on {input}")
            .step_with_template("react", "Polish: {input}"),
        true,
    );

    let result = orchestrator
        .run(&Task::new("release 0.1"), None, &CancellationToken::new())
        .await;

    assert_eq!(result.status(), RunStatus::Completed);
    assert_eq!(result.answer(), "polished notes");
    assert_eq!(result.strategy(), Some("workflow:notes"));
    assert_eq!(result.subtasks()[1].goal, "Polish: notes");
}

#[tokio::test]
async fn events_flow_to_subscribers() {
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let model = Arc::new(RuleModel::new().then(Completion::text("Final Answer: hi")));
    let mut config = fast_config();
    config.reflection.max_iterations = 1;
    let factory = AgentFactory::new(config, model, tools()).with_event_bus(bus);

    let result = factory
        .build_router()
        .route(&Task::new("greet me"), &CancellationToken::new())
        .await;
    assert_eq!(result.strategy(), Some("reflection"));

    let mut saw_selection = false;
    let mut saw_finish = false;
    while let Ok(event) = rx.try_recv() {
        match event.as_ref() {
            DomainEvent::StrategySelected { strategy, .. } => {
                saw_selection = strategy == "reflection";
            }
            DomainEvent::RunFinished { status, .. } => saw_finish = *status == RunStatus::Completed,
            _ => {}
        }
    }
    assert!(saw_selection);
    assert!(saw_finish);
}

#[test]
fn agent_names_are_stable() {
    let model = Arc::new(RuleModel::new());
    let factory = AgentFactory::new(ArenaConfig::default(), model, tools());
    let names: Vec<String> = ["react", "reflection", "planning"]
        .iter()
        .filter_map(|n| factory.create(n))
        .map(|a| a.name().to_string())
        .collect();
    assert_eq!(names, vec!["react", "reflection", "planning"]);
}
