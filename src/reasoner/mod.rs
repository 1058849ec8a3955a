//! Reasoner trait and implementations
//!
//! The reasoning step is a black box: given the full accumulated
//! conversation and any retrieved data context, it produces exactly one of
//! a tool call or a final answer. Implementations validate their own output
//! shape before anything leaves this module; the orchestrator never sees
//! untyped model output.

use crate::error::AgentError;
use crate::models::{Message, ReasoningOutcome};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiReasoner;

/// Trait for the reasoning step (LLM controlled)
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Produce the next step given the whole conversation so far.
    async fn reason(
        &self,
        conversation: &[Message],
        data_context: Option<&str>,
    ) -> Result<ReasoningOutcome>;
}

/// Scripted reasoner for development & testing
/// Plays back a fixed sequence of outcomes without an LLM dependency.
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<ReasoningOutcome>>,
}

impl ScriptedReasoner {
    pub fn new(outcomes: impl IntoIterator<Item = ReasoningOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(
        &self,
        _conversation: &[Message],
        _data_context: Option<&str>,
    ) -> Result<ReasoningOutcome> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| AgentError::ReasoningError("scripted reasoner poisoned".to_string()))?;

        script.pop_front().ok_or_else(|| {
            AgentError::ReasoningError("scripted reasoner ran out of outcomes".to_string())
        })
    }
}
