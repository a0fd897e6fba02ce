//! The agent node: plan, execute, review, improve.
//!
//! Each iteration asks the model for a task plan, executes the tasks in
//! order, has every configured persona review the latest successful
//! output, and either finishes (aggregated score at or above the threshold)
//! or applies the reviewers' priority improvements and goes again. The loop
//! is bounded by wall time, iterations and improvement cycles.

pub mod plan;
pub mod prompts;
pub mod review;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancellable;
use nodeflow_core::config::AgentConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::{EventStatus, ExecutionEvent, LogEntry};
use nodeflow_core::node::{AgentNodeConfig, NodeRecord};
use nodeflow_core::persona::Persona;
use nodeflow_core::traits::{EventSink, SearchProvider, TextGenerator};
use nodeflow_core::types::GenerationRequest;

pub use plan::{PlannedTask, TaskPlan, TaskResult, TaskStatus};
pub use review::{aggregate, AggregatedReview, PersonaReview, Priority, ReviewScores};
pub use state::{AgentPhase, AgentRunState};

use prompts::{improvement_prompt, plan_prompt, review_prompt, task_prompt};

/// Why a loop step stopped early.
enum Halt {
    /// The time budget ran out mid-call.
    Deadline,
    Failed(NodeflowError),
}

impl From<NodeflowError> for Halt {
    fn from(e: NodeflowError) -> Self {
        Self::Failed(e)
    }
}

type Step<T> = std::result::Result<T, Halt>;

enum Terminal {
    Success(SuccessReport),
    Bounded(AgentPhase),
}

struct SuccessReport {
    plan: TaskPlan,
    reviews: Vec<PersonaReview>,
    aggregated: AggregatedReview,
    summary: Option<PersonaReview>,
}

/// Terminal result of one agent node.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: EventStatus,
    /// Latest content, also on non-success outcomes.
    pub content: String,
    pub error: Option<String>,
    pub execution_log: Vec<LogEntry>,
    pub details: Value,
}

impl AgentOutcome {
    pub fn into_event(self, node: &NodeRecord) -> ExecutionEvent {
        let mut event = ExecutionEvent::new(node, self.status, self.content)
            .with_log(self.execution_log)
            .with_details(self.details);
        event.error = self.error;
        event
    }

    /// Aggregated score that ended the loop, for successful outcomes.
    pub fn success_rate(&self) -> Option<f64> {
        self.details.get("success_rate").and_then(Value::as_f64)
    }
}

/// Runs agent nodes against a text generator and a persona table.
pub struct AgentController {
    generator: Arc<dyn TextGenerator>,
    search: Option<Arc<dyn SearchProvider>>,
    personas: Vec<Persona>,
    limits: AgentConfig,
}

impl AgentController {
    pub fn new(generator: Arc<dyn TextGenerator>, personas: Vec<Persona>, limits: AgentConfig) -> Self {
        Self {
            generator,
            search: None,
            personas,
            limits,
        }
    }

    /// Enable the `web_search` capability.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn limits(&self) -> &AgentConfig {
        &self.limits
    }

    /// Run one agent node to a terminal outcome.
    ///
    /// Running events go to `sink`; the terminal event is built by the
    /// caller from the returned outcome. Collaborator failures other than
    /// unreadable structured output are returned as errors.
    pub async fn run(
        &self,
        node: &NodeRecord,
        config: AgentNodeConfig,
        previous_text: Option<&str>,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        let mut state = AgentRunState::new(config, previous_text);
        info!(node_id = %node.id, goal = %state.goal, "Agent started");
        self.progress(node, &state, sink, AgentPhase::Init, "Initializing agent")
            .await;

        let terminal = match self.drive(node, &mut state, sink, cancel).await {
            Ok(terminal) => terminal,
            Err(Halt::Deadline) => Terminal::Bounded(AgentPhase::Timeout),
            Err(Halt::Failed(e)) => return Err(e),
        };

        let outcome = match terminal {
            Terminal::Success(report) => self.succeeded(state, report),
            Terminal::Bounded(phase) => self.stopped(state, phase),
        };
        info!(
            node_id = %node.id,
            status = ?outcome.status,
            "Agent finished"
        );
        Ok(outcome)
    }

    async fn drive(
        &self,
        node: &NodeRecord,
        state: &mut AgentRunState,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Step<Terminal> {
        let deadline = state.deadline(&self.limits);

        loop {
            if let Some(limit) = state.exhausted(&self.limits) {
                return Ok(Terminal::Bounded(limit));
            }

            state.phase = AgentPhase::Planning;
            let message = format!("Creating task plan (iteration {})", state.iteration + 1);
            self.progress(node, state, sink, state.phase, message).await;
            let plan = TaskPlan::from_response(
                self.structured(plan_prompt(state), deadline, cancel).await?,
            );
            debug!(node_id = %node.id, tasks = plan.tasks.len(), "Plan ready");

            state.phase = AgentPhase::TaskExecuting;
            for task in &plan.tasks {
                let message = format!("Executing task: {}", task.description);
                self.progress(node, state, sink, state.phase, message).await;

                let research = self.research(task, state, deadline, cancel).await?;
                let prompt = task_prompt(task, state, research.as_deref());
                let result = TaskResult::from_response(self.structured(prompt, deadline, cancel).await?);

                state.log(
                    AgentPhase::TaskExecuting.step(),
                    format!("{}: {}", task.description, result.log_line()),
                );
                if result.succeeded() {
                    state.current_content = result.output;
                }
            }

            if !state.current_content.is_empty() {
                state.phase = AgentPhase::QualityChecking;
                self.progress(node, state, sink, state.phase, "Running quality check")
                    .await;

                let mut reviews = Vec::with_capacity(self.personas.len());
                for persona in &self.personas {
                    reviews.push(self.review(persona, &state.current_content, deadline, cancel).await?);
                }
                let aggregated = aggregate(&reviews);
                let rate = aggregated.overall_score;
                state.best_success_rate = state.best_success_rate.max(rate);
                state.log(
                    AgentPhase::QualityChecking.step(),
                    format!("Aggregated score {:.2}", rate),
                );
                info!(
                    node_id = %node.id,
                    iteration = state.iteration,
                    success_rate = rate,
                    "Quality check complete"
                );

                if rate >= self.limits.min_success_rate {
                    let summary = self.summarize(&state.current_content, cancel).await?;
                    state.phase = AgentPhase::Success;
                    return Ok(Terminal::Success(SuccessReport {
                        plan,
                        reviews,
                        aggregated,
                        summary,
                    }));
                }

                if !aggregated.priority_improvements.is_empty() {
                    state.phase = AgentPhase::Improving;
                    let message =
                        format!("Applying improvements (cycle {})", state.improvement_cycle + 1);
                    self.progress(node, state, sink, state.phase, message).await;

                    let request = GenerationRequest::new(improvement_prompt(
                        &state.current_content,
                        &aggregated.priority_improvements,
                    ));
                    let improved = self
                        .bounded(deadline, cancel, self.generator.generate(request))
                        .await?;
                    if !improved.trim().is_empty() {
                        state.current_content = improved;
                    }
                    state.improvement_cycle += 1;
                    state.log(
                        AgentPhase::Improving.step(),
                        format!(
                            "Applied {} improvements",
                            aggregated.priority_improvements.len()
                        ),
                    );
                }
            }

            state.iteration += 1;
        }
    }

    /// Race a collaborator call against cancellation and the time budget.
    async fn bounded<T>(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T>>,
    ) -> Step<T> {
        tokio::select! {
            result = call => result.map_err(Halt::Failed),
            _ = cancel.cancelled() => Err(Halt::Failed(NodeflowError::Cancelled)),
            _ = tokio::time::sleep_until(deadline) => Err(Halt::Deadline),
        }
    }

    /// Structured call; an unreadable response becomes `None`.
    async fn structured(
        &self,
        prompt: String,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Step<Option<Value>> {
        match self
            .bounded(deadline, cancel, self.generator.generate_structured(prompt))
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(Halt::Failed(NodeflowError::LlmParse(msg))) => {
                warn!(error = %msg, "Unreadable structured response");
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    async fn review(
        &self,
        persona: &Persona,
        content: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Step<PersonaReview> {
        let response = self
            .structured(review_prompt(persona, content), deadline, cancel)
            .await?;
        Ok(PersonaReview::from_response(&persona.id, response))
    }

    /// Final summary of accepted content. The result already counts as a
    /// success, so only cancellation interrupts this call.
    async fn summarize(
        &self,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PersonaReview>> {
        let Some(persona) = self.personas.iter().find(|p| p.is_summarizer()) else {
            return Ok(None);
        };
        let call = self
            .generator
            .generate_structured(review_prompt(persona, content));
        let response = match cancellable(cancel, call).await {
            Ok(value) => Some(value),
            Err(NodeflowError::LlmParse(msg)) => {
                warn!(error = %msg, "Unreadable summary response");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Some(PersonaReview::from_response(&persona.id, response)))
    }

    /// Web search for a task when the node has the capability and a
    /// provider is configured. Search failures are not fatal.
    async fn research(
        &self,
        task: &PlannedTask,
        state: &AgentRunState,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Step<Option<String>> {
        let Some(search) = &self.search else {
            return Ok(None);
        };
        if !state.capabilities.get("web_search").copied().unwrap_or(false) {
            return Ok(None);
        }
        match self
            .bounded(deadline, cancel, search.search(task.description.clone()))
            .await
        {
            Ok(text) => Ok(Some(text)),
            Err(Halt::Failed(e)) if !matches!(e, NodeflowError::Cancelled) => {
                warn!(task = %task.description, error = %e, "Web search failed");
                Ok(None)
            }
            Err(halt) => Err(halt),
        }
    }

    async fn progress(
        &self,
        node: &NodeRecord,
        state: &AgentRunState,
        sink: &dyn EventSink,
        phase: AgentPhase,
        message: impl Into<String>,
    ) {
        let message = message.into();
        debug!(node_id = %node.id, step = phase.step(), "{}", message);
        let event = ExecutionEvent::new(node, EventStatus::Running, message.clone())
            .with_log(state.log_with(phase.step(), message));
        sink.emit(event).await;
    }

    fn succeeded(&self, state: AgentRunState, report: SuccessReport) -> AgentOutcome {
        let rate = report.aggregated.overall_score;
        AgentOutcome {
            status: EventStatus::Success,
            error: None,
            details: json!({
                "iteration": state.iteration,
                "improvement_cycle": state.improvement_cycle,
                "best_success_rate": state.best_success_rate,
                "success_rate": rate,
                "plan": report.plan,
                "reviews": report.reviews,
                "aggregated_review": report.aggregated,
                "summary": report.summary,
            }),
            content: state.current_content,
            execution_log: state.execution_log,
        }
    }

    fn stopped(&self, state: AgentRunState, phase: AgentPhase) -> AgentOutcome {
        let reason = match phase {
            AgentPhase::Timeout => format!("Agent timed out after {}s", self.limits.timeout_secs),
            AgentPhase::MaxIterations => format!(
                "Agent reached the limit of {} iterations",
                self.limits.max_iterations
            ),
            AgentPhase::MaxImprovementCycles => format!(
                "Agent reached the limit of {} improvement cycles",
                self.limits.max_improvement_cycles
            ),
            other => format!("Agent stopped in phase {}", other.step()),
        };
        let error = format!(
            "{} without reaching success rate {:.2} (best {:.2})",
            reason, self.limits.min_success_rate, state.best_success_rate
        );
        warn!(status = phase.step(), "{}", error);
        AgentOutcome {
            status: phase.terminal_status().unwrap_or(EventStatus::Error),
            error: Some(error),
            details: json!({
                "iteration": state.iteration,
                "improvement_cycle": state.improvement_cycle,
                "best_success_rate": state.best_success_rate,
            }),
            content: state.current_content,
            execution_log: state.execution_log,
        }
    }
}
