//! The agent orchestration core of mcp-arena.
//!
//! Every strategy is built on one control loop, the [`StepEngine`]:
//!
//! 1. **Request** a completion for the task and the transcript so far
//! 2. **If tool calls**: validate them, execute them concurrently, append
//!    the results in proposal order, loop back to step 1
//! 3. **If the policy says stop**: return the final answer
//!
//! The loop also ends when the step budget runs out or the caller cancels.
//! On top of it sit the [`ReactAgent`], [`ReflectionAgent`] and
//! [`PlanningAgent`] strategies, the [`Router`] that picks among them, and
//! the workflow [`Orchestrator`] that chains them.

pub mod engine;
pub mod factory;
pub mod patterns;
pub mod router;
pub mod strategy;
pub mod workflow;

pub use engine::{CallSpec, EngineSettings, Interrupted, StepEngine, StepPolicy, ToolFilter};
pub use factory::AgentFactory;
pub use patterns::{Critique, PlanningAgent, ReactAgent, ReflectionAgent, Verdict};
pub use router::{Router, RoutingRule};
pub use strategy::{Agent, NamedAgent, Strategy};
pub use workflow::{Orchestrator, Workflow, WorkflowStep};

pub use tokio_util::sync::CancellationToken;
