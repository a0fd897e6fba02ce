use std::collections::BTreeMap;

use tokio::time::{Duration, Instant};

use nodeflow_core::config::AgentConfig;
use nodeflow_core::event::{EventStatus, LogEntry};
use nodeflow_core::node::AgentNodeConfig;

/// Where the agent loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Init,
    Planning,
    TaskExecuting,
    QualityChecking,
    Improving,
    Success,
    Timeout,
    MaxIterations,
    MaxImprovementCycles,
}

impl AgentPhase {
    /// Name used for the `step` of progress log entries.
    pub fn step(self) -> &'static str {
        match self {
            Self::Init => "initialization",
            Self::Planning => "planning",
            Self::TaskExecuting => "task_execution",
            Self::QualityChecking => "quality_check",
            Self::Improving => "improvement",
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::MaxIterations => "max_iterations",
            Self::MaxImprovementCycles => "max_improvement_cycles",
        }
    }

    /// Event status of a terminal phase.
    pub fn terminal_status(self) -> Option<EventStatus> {
        match self {
            Self::Success => Some(EventStatus::Success),
            Self::Timeout => Some(EventStatus::Timeout),
            Self::MaxIterations => Some(EventStatus::MaxIterations),
            Self::MaxImprovementCycles => Some(EventStatus::MaxImprovementCycles),
            _ => None,
        }
    }
}

/// State of one agent node execution. Dropped when the node finishes.
#[derive(Debug, Clone)]
pub struct AgentRunState {
    pub goal: String,
    pub constraints: Vec<String>,
    pub capabilities: BTreeMap<String, bool>,
    pub behavior: BTreeMap<String, f64>,
    pub context: serde_json::Value,
    pub iteration: u32,
    pub improvement_cycle: u32,
    pub best_success_rate: f64,
    pub execution_log: Vec<LogEntry>,
    pub current_content: String,
    pub phase: AgentPhase,
    started: Instant,
}

impl AgentRunState {
    pub fn new(config: AgentNodeConfig, previous_text: Option<&str>) -> Self {
        Self {
            goal: config.goal,
            constraints: config.constraints,
            capabilities: config.capabilities,
            behavior: config.behavior,
            context: serde_json::json!({ "previous_text": previous_text.unwrap_or("") }),
            iteration: 0,
            improvement_cycle: 0,
            best_success_rate: 0.0,
            execution_log: Vec::new(),
            current_content: String::new(),
            phase: AgentPhase::Init,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// When the time budget runs out.
    pub fn deadline(&self, limits: &AgentConfig) -> Instant {
        self.started + limits.timeout()
    }

    /// Loop guards, in order: time, iterations, improvement cycles.
    pub fn exhausted(&self, limits: &AgentConfig) -> Option<AgentPhase> {
        if self.elapsed() > limits.timeout() {
            Some(AgentPhase::Timeout)
        } else if self.iteration >= limits.max_iterations {
            Some(AgentPhase::MaxIterations)
        } else if self.improvement_cycle >= limits.max_improvement_cycles {
            Some(AgentPhase::MaxImprovementCycles)
        } else {
            None
        }
    }

    pub fn enabled_capabilities(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn log(&mut self, step: &str, result: impl Into<String>) {
        self.execution_log.push(LogEntry::new(step, result));
    }

    /// The execution log followed by one transient progress line.
    pub fn log_with(&self, step: &str, result: impl Into<String>) -> Vec<LogEntry> {
        let mut log = self.execution_log.clone();
        log.push(LogEntry::new(step, result));
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AgentRunState {
        AgentRunState::new(
            AgentNodeConfig {
                goal: "g".into(),
                ..Default::default()
            },
            Some("prior"),
        )
    }

    #[test]
    fn test_context_carries_previous_text() {
        assert_eq!(state().context["previous_text"], "prior");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_checked_before_counters() {
        let limits = AgentConfig::default();
        let mut s = state();
        s.iteration = limits.max_iterations;
        s.improvement_cycle = limits.max_improvement_cycles;
        assert_eq!(s.exhausted(&limits), Some(AgentPhase::MaxIterations));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(s.exhausted(&limits), Some(AgentPhase::Timeout));
    }

    #[test]
    fn test_iterations_checked_before_cycles() {
        let limits = AgentConfig::default();
        let mut s = state();
        assert_eq!(s.exhausted(&limits), None);
        s.improvement_cycle = 2;
        assert_eq!(s.exhausted(&limits), Some(AgentPhase::MaxImprovementCycles));
        s.iteration = 2;
        assert_eq!(s.exhausted(&limits), Some(AgentPhase::MaxIterations));
    }

    #[test]
    fn test_only_terminal_phases_have_status() {
        assert_eq!(AgentPhase::Planning.terminal_status(), None);
        assert_eq!(
            AgentPhase::MaxImprovementCycles.terminal_status(),
            Some(EventStatus::MaxImprovementCycles)
        );
    }

    #[test]
    fn test_log_with_is_transient() {
        let mut s = state();
        s.log("task_execution", "done");
        let log = s.log_with("quality_check", "reviewing");
        assert_eq!(log.len(), 2);
        assert_eq!(s.execution_log.len(), 1);
    }
}
