//! Main orchestrator - implements the agent loop
//!
//! REASON → DISPATCH → OBSERVE → { REASON | CORRECT | DONE }
//!
//! One invocation is strictly sequential: one reasoning pass, then at most
//! one tool dispatch, alternating until a final answer or the iteration
//! budget. Retry edges are explicit phase transitions so the termination
//! and retry-budget invariants stay enforceable in isolation.

use crate::correction::{CorrectionDecision, CorrectionPolicy};
use crate::models::{
    AgentState, CodeOutcome, Message, ReasoningOutcome, ToolError, ToolRequest, ToolResult,
};
use crate::reasoner::Reasoner;
use crate::tools::{ToolRegistry, PYTHON_INTERPRETER, WEB_SEARCH};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ITERATIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on reasoning passes per invocation. Reaching it is a
    /// controlled termination with a best-effort answer, not an error.
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let max_iterations = std::env::var("AGENT_MAX_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_ITERATIONS);
        Self { max_iterations }
    }
}

/// Loop phases. `Correcting` either re-enters `Dispatch` (transient
/// failure, same request) or falls back to `Reasoning` with corrective
/// context; `Terminal` always carries the final answer text.
enum Phase {
    Reasoning,
    Dispatch(ToolRequest),
    Observing {
        request: ToolRequest,
        result: ToolResult,
    },
    Correcting {
        request: ToolRequest,
        error: ToolError,
    },
    Terminal(String),
}

/// Main orchestrator that drives one invocation to a final answer
pub struct Orchestrator {
    reasoner: Box<dyn Reasoner>,
    registry: ToolRegistry,
    policy: CorrectionPolicy,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(
        reasoner: Box<dyn Reasoner>,
        registry: ToolRegistry,
        policy: CorrectionPolicy,
        config: AgentConfig,
    ) -> Self {
        Self {
            reasoner,
            registry,
            policy,
            config,
        }
    }

    /// Run the loop until a final answer.
    ///
    /// Infallible with respect to tool failures: every failure path ends in
    /// a well-formed assistant message explaining, in plain language, what
    /// could not be completed.
    pub async fn run(&self, mut state: AgentState) -> AgentState {
        // Failure counts per tool lineage, reset on that tool's first
        // success, so one tool's retries never consume another's budget.
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut phase = Phase::Reasoning;

        info!(
            messages = state.messages.len(),
            max_iterations = self.config.max_iterations,
            "Agent: starting invocation"
        );

        loop {
            phase = match phase {
                Phase::Reasoning => self.reasoning_pass(&mut state).await,

                Phase::Dispatch(request) => {
                    debug!(
                        tool_name = %request.tool_name,
                        iteration = state.iteration_count,
                        "Agent: dispatching tool"
                    );

                    if request.tool_name == PYTHON_INTERPRETER {
                        state.pending_code = request
                            .arguments
                            .get("code")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }

                    let result = self.registry.dispatch(&request).await;
                    Phase::Observing { request, result }
                }

                Phase::Observing { request, result } => {
                    self.observe(&mut state, &mut attempts, request, result)
                }

                Phase::Correcting { request, error } => {
                    self.correct(&mut state, &attempts, request, error).await
                }

                Phase::Terminal(answer) => {
                    state.messages.push(Message::assistant(answer));

                    info!(
                        iterations = state.iteration_count,
                        artifacts = state.collected_artifacts.len(),
                        "Agent: invocation complete"
                    );

                    return state;
                }
            };
        }
    }

    /// One reasoning pass, budget permitting.
    async fn reasoning_pass(&self, state: &mut AgentState) -> Phase {
        if state.iteration_count >= self.config.max_iterations {
            warn!(
                max_iterations = self.config.max_iterations,
                "Agent: iteration budget exhausted"
            );
            return Phase::Terminal(self.budget_exhausted_answer(state));
        }

        state.iteration_count += 1;

        match self
            .reasoner
            .reason(&state.messages, state.data_context.as_deref())
            .await
        {
            Ok(ReasoningOutcome::FinalAnswer(answer)) => {
                debug!(
                    iteration = state.iteration_count,
                    "Agent: reasoner emitted final answer"
                );
                Phase::Terminal(answer)
            }
            Ok(ReasoningOutcome::ToolCall(request)) => Phase::Dispatch(request),
            Err(e) => {
                // Includes malformed model output: a contract violation is
                // terminal, not retryable, matching the policy's rule for
                // malformed tool requests.
                warn!(error = %e, "Agent: reasoning step failed");
                Phase::Terminal(self.give_up_answer(
                    state,
                    "the reasoning step could not produce a usable next action",
                ))
            }
        }
    }

    /// Merge a tool result into the state. The conversation is updated
    /// before the next reasoning pass ever sees it; there is no partially
    /// applied result.
    fn observe(
        &self,
        state: &mut AgentState,
        attempts: &mut HashMap<String, u32>,
        request: ToolRequest,
        result: ToolResult,
    ) -> Phase {
        match result {
            Ok(output) => {
                match request.tool_name.as_str() {
                    WEB_SEARCH => state.data_context = Some(output.content.clone()),
                    PYTHON_INTERPRETER => {
                        state.last_code_output = Some(CodeOutcome::Success {
                            stdout: output.content.clone(),
                            artifacts: output.artifacts.clone(),
                        });
                        state.pending_code = None;
                    }
                    _ => {}
                }

                state
                    .collected_artifacts
                    .extend(output.artifacts.iter().cloned());
                state.messages.push(Message::tool(output.content));
                attempts.remove(&request.tool_name);

                Phase::Reasoning
            }
            Err(error) => {
                let count = attempts.entry(request.tool_name.clone()).or_insert(0);
                *count += 1;

                warn!(
                    tool_name = %request.tool_name,
                    kind = %error.kind,
                    attempt = *count,
                    "Agent: tool failed"
                );

                if request.tool_name == PYTHON_INTERPRETER {
                    state.last_code_output = Some(CodeOutcome::Failure {
                        kind: error.kind,
                        message: error.detail.clone(),
                    });
                }

                Phase::Correcting { request, error }
            }
        }
    }

    /// Apply the correction policy to a failed dispatch.
    async fn correct(
        &self,
        state: &mut AgentState,
        attempts: &HashMap<String, u32>,
        request: ToolRequest,
        error: ToolError,
    ) -> Phase {
        let attempt_count = attempts.get(&request.tool_name).copied().unwrap_or(1);

        match self.policy.correct(&error, attempt_count) {
            CorrectionDecision::Retry {
                redispatch,
                delay,
                guidance,
            } => {
                debug!(
                    tool_name = %request.tool_name,
                    attempt = attempt_count,
                    redispatch,
                    "Agent: retrying after failure"
                );

                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                if let Some(guidance) = guidance {
                    // The error becomes corrective context; the reasoner
                    // regenerates the failing step on its next pass.
                    state.messages.push(Message::tool(guidance));
                }

                if redispatch {
                    Phase::Dispatch(request)
                } else {
                    Phase::Reasoning
                }
            }
            CorrectionDecision::GiveUp { explanation } => {
                warn!(
                    tool_name = %request.tool_name,
                    explanation = %explanation,
                    "Agent: giving up on tool"
                );
                Phase::Terminal(self.give_up_answer(state, &explanation))
            }
        }
    }

    /// Best-effort answer when the iteration budget runs out.
    fn budget_exhausted_answer(&self, state: &AgentState) -> String {
        let mut answer = format!(
            "I wasn't able to finish this analysis within the allotted {} steps.",
            self.config.max_iterations
        );

        if let Some(CodeOutcome::Success { stdout, .. }) = &state.last_code_output {
            if !stdout.is_empty() {
                answer.push_str("\n\nThe last completed computation produced:\n");
                answer.push_str(stdout);
            }
        } else if let Some(context) = &state.data_context {
            answer.push_str("\n\nBased on the data gathered so far:\n");
            answer.push_str(&truncate(context, 1500));
        }

        answer.push_str("\n\nNarrowing the question may help me complete it.");
        answer
    }

    /// Degraded answer after a non-recoverable tool failure.
    fn give_up_answer(&self, state: &AgentState, explanation: &str) -> String {
        let mut answer = format!(
            "I couldn't complete part of this analysis: {}.",
            explanation
        );

        if let Some(context) = &state.data_context {
            answer.push_str("\n\nHere is what I found before the problem occurred:\n");
            answer.push_str(&truncate(context, 1500));
        }

        answer
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}…", truncated)
    }
}
