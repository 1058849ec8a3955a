//! Core data models for the financial analyst agent

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts the frontend's `"human"` encoding as well.
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

//
// ================= Agent State =================
//

/// Mutable working record for one invocation.
///
/// Created fresh per request, mutated only by the orchestrator, discarded
/// once a final answer is emitted. Every field tolerates null/missing on the
/// wire so the frontend may send an all-null skeleton on the first call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Retrieved facts carried between reasoning passes.
    #[serde(default)]
    pub data_context: Option<String>,

    /// Source text awaiting (or last submitted for) execution.
    #[serde(default, rename = "code")]
    pub pending_code: Option<String>,

    /// Outcome of the most recent code execution.
    #[serde(default, rename = "code_output")]
    pub last_code_output: Option<CodeOutcome>,

    /// Number of reasoning passes performed so far.
    #[serde(default, rename = "iterations")]
    pub iteration_count: u32,

    /// Base64 chart payloads collected across executions, in order.
    #[serde(default, rename = "artifacts")]
    pub collected_artifacts: Vec<String>,
}

impl AgentState {
    pub fn from_question(question: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(question)],
            ..Default::default()
        }
    }

    /// Content of the most recent user turn, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Tagged record of a single code execution, threaded through the state so
/// the reasoner can see what the last script produced (or why it failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CodeOutcome {
    Success {
        stdout: String,
        #[serde(default)]
        artifacts: Vec<String>,
    },
    Failure {
        kind: ToolErrorKind,
        message: String,
    },
}

//
// ================= Tool I/O =================
//

/// A tool invocation. Produced only by the reasoning step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Successful tool payload: text for the conversation plus any binary
/// artifacts the tool produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifacts: Vec::new(),
        }
    }
}

/// Closed failure taxonomy for tool dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    MalformedToolRequest,
    ExecutionFailed,
    Timeout,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub detail: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolErrorKind::UnknownTool => "unknown tool",
            ToolErrorKind::MalformedToolRequest => "malformed tool request",
            ToolErrorKind::ExecutionFailed => "execution failed",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Unavailable => "unavailable",
        };
        write!(f, "{}", s)
    }
}

/// Uniform result contract for every tool.
pub type ToolResult = std::result::Result<ToolOutput, ToolError>;

//
// ================= Reasoning =================
//

/// Exactly one of: invoke a tool, or answer the user.
#[derive(Debug, Clone)]
pub enum ReasoningOutcome {
    ToolCall(ToolRequest),
    FinalAnswer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontend_message_aliases() {
        let msg: Message =
            serde_json::from_str(r#"{"type": "human", "content": "What is 2+2?"}"#).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "What is 2+2?");

        let msg: Message = serde_json::from_str(r#"{"type": "ai", "content": "4"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_state_tolerates_all_null_fields() {
        let state: AgentState = serde_json::from_str(
            r#"{
                "messages": [{"type": "human", "content": "hi"}],
                "data_context": null,
                "code": null,
                "code_output": null,
                "iterations": 0,
                "artifacts": []
            }"#,
        )
        .unwrap();

        assert_eq!(state.messages.len(), 1);
        assert!(state.data_context.is_none());
        assert!(state.pending_code.is_none());
        assert!(state.last_code_output.is_none());
        assert_eq!(state.iteration_count, 0);
    }

    #[test]
    fn test_state_tolerates_missing_fields() {
        let state: AgentState = serde_json::from_str(r#"{"messages": []}"#).unwrap();
        assert!(state.messages.is_empty());
        assert_eq!(state.iteration_count, 0);
        assert!(state.collected_artifacts.is_empty());
    }
}
